// Solar position and rise/set calculations
// Low-precision VSOP series; rise/set found by sampling the altitude curve
// across the local day and refining each crossing linearly

use super::coordinates::{ecliptic_to_equatorial, equatorial_to_horizontal, HorizontalPosition};
use super::units::{normalize_degrees, DEG_TO_RAD};
use super::{julian_century, Location};

/// Altitude threshold for sunrise/sunset: 34' refraction + 16' semi-diameter.
pub const RISE_SET_ALTITUDE: f64 = -0.833;

/// Altitude threshold for civil dawn/dusk.
pub const CIVIL_ALTITUDE: f64 = -6.0;

/// Altitude threshold for nautical dawn/dusk.
pub const NAUTICAL_ALTITUDE: f64 = -12.0;

/// Altitude threshold for astronomical dawn/dusk.
pub const ASTRONOMICAL_ALTITUDE: f64 = -18.0;

/// Obliquity of the ecliptic used throughout the solar code.
const OBLIQUITY: f64 = 23.439;

/// Sampling step for the rise/set scan, in minutes.
const SAMPLE_STEP_MINUTES: f64 = 15.0;

/// Calculate geometric mean longitude of the Sun (degrees)
fn sun_geom_mean_long(t: f64) -> f64 {
    normalize_degrees(280.46646 + t * (36000.76983 + t * 0.0003032))
}

/// Calculate geometric mean anomaly of the Sun (degrees)
fn sun_geom_mean_anom(t: f64) -> f64 {
    normalize_degrees(357.52911 + t * (35999.05029 - 0.0001537 * t))
}

/// Calculate the equation of center for the Sun (degrees)
fn sun_eq_of_center(t: f64) -> f64 {
    let m = sun_geom_mean_anom(t) * DEG_TO_RAD;
    (1.914602 - t * (0.004817 + 0.000014 * t)) * m.sin()
        + (0.019993 - 0.000101 * t) * (2.0 * m).sin()
        + 0.000289 * (3.0 * m).sin()
}

/// True ecliptic longitude of the Sun (degrees).
///
/// Also feeds the lunar phase calculation, which works on the difference of
/// the true solar and lunar longitudes.
pub fn sun_true_longitude(t: f64) -> f64 {
    normalize_degrees(sun_geom_mean_long(t) + sun_eq_of_center(t))
}

/// Calculate solar altitude and azimuth at a Julian Day
pub fn solar_position(location: &Location, jd: f64) -> HorizontalPosition {
    let t = julian_century(jd);
    let lambda = sun_true_longitude(t);
    let (ra, dec) = ecliptic_to_equatorial(lambda, 0.0, OBLIQUITY);
    equatorial_to_horizontal(location, jd, ra, dec)
}

/// Solar altitude in degrees at a Julian Day
pub fn solar_altitude(location: &Location, jd: f64) -> f64 {
    solar_position(location, jd).altitude
}

/// Map solar altitude (degrees) to a unitless daylight intensity in 0..1.
///
/// Piecewise curve: twilight ramps in below the horizon, low sun is dimmed
/// relative to the pure sine response, high sun follows sin(altitude).
pub fn sun_intensity(altitude: f64) -> f64 {
    let sin_alt = (altitude * DEG_TO_RAD).sin();
    if altitude <= -6.0 {
        0.0
    } else if altitude <= 0.0 {
        0.1 * (altitude + 6.0) / 6.0
    } else if altitude <= 6.0 {
        0.1 + (sin_alt - 0.1) * altitude / 6.0
    } else if altitude <= 30.0 {
        sin_alt * (0.7 + 0.3 * altitude / 30.0)
    } else {
        sin_alt
    }
    .clamp(0.0, 1.0)
}

/// Rise and set instants found by the altitude scan, in fractional
/// minutes-of-day. A missing side means the event does not occur that day.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolarCrossings {
    pub rise: Option<f64>,
    pub set: Option<f64>,
}

/// Scan the local day for crossings of `threshold` altitude.
///
/// `jd_midnight` is the Julian Day of local midnight. The first upward
/// crossing becomes the rise, the first downward crossing the set; each is
/// refined by linear interpolation between the bracketing samples.
pub fn solar_crossings(location: &Location, jd_midnight: f64, threshold: f64) -> SolarCrossings {
    let mut crossings = SolarCrossings::default();

    let mut prev_minute = 0.0;
    let mut prev_delta = solar_altitude(location, jd_midnight) - threshold;

    let mut minute = SAMPLE_STEP_MINUTES;
    while minute <= 1440.0 {
        let jd = jd_midnight + minute / 1440.0;
        let delta = solar_altitude(location, jd) - threshold;

        if crossings.rise.is_none() && prev_delta <= 0.0 && delta > 0.0 {
            crossings.rise = Some(refine_crossing(prev_minute, minute, prev_delta, delta));
        }
        if crossings.set.is_none() && prev_delta >= 0.0 && delta < 0.0 {
            crossings.set = Some(refine_crossing(prev_minute, minute, prev_delta, delta));
        }

        prev_minute = minute;
        prev_delta = delta;
        minute += SAMPLE_STEP_MINUTES;
    }

    crossings
}

/// Linear interpolation of the zero crossing between two bracketing samples.
pub(crate) fn refine_crossing(min_a: f64, min_b: f64, delta_a: f64, delta_b: f64) -> f64 {
    let span = delta_b - delta_a;
    if span.abs() < f64::EPSILON {
        return min_a;
    }
    let fraction = -delta_a / span;
    (min_a + fraction * (min_b - min_a)).clamp(0.0, 1439.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::astro::julian_day_local;
    use chrono::NaiveDate;

    fn jd_midnight(y: i32, m: u32, d: u32, offset: f64) -> f64 {
        let dt = NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        julian_day_local(&dt, offset)
    }

    #[test]
    fn san_francisco_solstice_rise_set() {
        // 2025-06-21 in San Francisco (UTC-7): sunrise 05:47, sunset 20:34
        let location = Location::clamped(37.7749, -122.4194);
        let jd0 = jd_midnight(2025, 6, 21, -7.0);
        let crossings = solar_crossings(&location, jd0, RISE_SET_ALTITUDE);

        let rise = crossings.rise.expect("sunrise expected");
        let set = crossings.set.expect("sunset expected");
        assert!(
            (rise - 347.0).abs() <= 5.0,
            "sunrise {rise} min, expected ~347"
        );
        assert!((set - 1234.0).abs() <= 5.0, "sunset {set} min, expected ~1234");
    }

    #[test]
    fn polar_night_has_no_crossings() {
        // Tromsø region in deep winter: the sun never clears -0.833 degrees
        let location = Location::clamped(78.0, 15.0);
        let jd0 = jd_midnight(2025, 12, 21, 1.0);
        let crossings = solar_crossings(&location, jd0, RISE_SET_ALTITUDE);
        assert!(crossings.rise.is_none());
        assert!(crossings.set.is_none());
    }

    #[test]
    fn twilight_order() {
        // Dawn boundaries come in astronomical -> nautical -> civil -> rise order
        let location = Location::clamped(37.7749, -122.4194);
        let jd0 = jd_midnight(2025, 3, 15, -7.0);

        let rise = solar_crossings(&location, jd0, RISE_SET_ALTITUDE).rise.unwrap();
        let civil = solar_crossings(&location, jd0, CIVIL_ALTITUDE).rise.unwrap();
        let nautical = solar_crossings(&location, jd0, NAUTICAL_ALTITUDE).rise.unwrap();
        let astro = solar_crossings(&location, jd0, ASTRONOMICAL_ALTITUDE).rise.unwrap();

        assert!(astro < nautical);
        assert!(nautical < civil);
        assert!(civil < rise);
    }

    #[test]
    fn intensity_curve_shape() {
        assert_eq!(sun_intensity(-10.0), 0.0);
        assert_eq!(sun_intensity(-6.0), 0.0);
        assert!((sun_intensity(-3.0) - 0.05).abs() < 1e-9);
        assert!((sun_intensity(0.0) - 0.1).abs() < 1e-9);
        // Mid curve stays monotonic through both piecewise seams
        let mut prev = 0.0;
        for alt in 0..90 {
            let v = sun_intensity(alt as f64);
            assert!(v >= prev - 1e-6, "intensity dipped at {alt}");
            assert!((0.0..=1.0).contains(&v));
            prev = v;
        }
        assert!((sun_intensity(90.0) - 1.0).abs() < 1e-9);
    }
}
