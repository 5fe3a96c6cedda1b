// Astronomical engine
// Owns location, UTC offset and projection settings; produces the per-day
// event table consumed by the schedule interpolator

use chrono::{NaiveDate, NaiveDateTime};
use log::debug;

use super::coordinates::HorizontalPosition;
use super::{julian_day_local, moon, sun, Location, MINUTES_PER_DAY};

/// Remote-reef projection settings.
///
/// When enabled, the sky is evaluated for the configured location but the
/// produced times are remapped onto the local clock by the user time shift.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProjectionConfig {
    pub enabled: bool,
    pub shift_hours: i32,
    pub shift_minutes: i32,
}

impl ProjectionConfig {
    pub fn total_shift_minutes(&self) -> i32 {
        self.shift_hours * 60 + self.shift_minutes
    }
}

/// Today's astronomical event table, all values in minutes-of-day.
///
/// `valid` covers the solar side, `moon_valid` the lunar side; consumers
/// treat the struct as read-only and the engine regenerates it per day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AstronomicalTimes {
    pub sunrise: u16,
    pub sunset: u16,
    pub solar_noon: u16,
    pub civil_dawn: u16,
    pub civil_dusk: u16,
    pub nautical_dawn: u16,
    pub nautical_dusk: u16,
    pub astronomical_dawn: u16,
    pub astronomical_dusk: u16,
    pub moonrise: u16,
    pub moonset: u16,
    /// 0.0 and 1.0 are new moon, 0.5 is full moon
    pub moon_phase: f64,
    pub valid: bool,
    pub moon_valid: bool,
}

impl Default for AstronomicalTimes {
    fn default() -> Self {
        // Fallback day: 07:00 sunrise, 18:00 sunset, twilights stacked at
        // half-hour steps around them
        Self {
            sunrise: 420,
            sunset: 1080,
            solar_noon: 750,
            civil_dawn: 390,
            civil_dusk: 1110,
            nautical_dawn: 360,
            nautical_dusk: 1140,
            astronomical_dawn: 330,
            astronomical_dusk: 1170,
            moonrise: 1200,
            moonset: 360,
            moon_phase: 0.0,
            valid: false,
            moon_valid: false,
        }
    }
}

/// Astronomical engine: computes sun/moon state for a configured location
/// and caches the per-day event table.
#[derive(Debug, Clone)]
pub struct AstroEngine {
    location: Location,
    utc_offset_hours: f64,
    projection: ProjectionConfig,
    cached: Option<(NaiveDate, AstronomicalTimes)>,
}

impl AstroEngine {
    pub fn new(location: Location, utc_offset_hours: f64) -> Self {
        Self {
            location,
            utc_offset_hours,
            projection: ProjectionConfig::default(),
            cached: None,
        }
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn utc_offset_hours(&self) -> f64 {
        self.utc_offset_hours
    }

    pub fn projection(&self) -> ProjectionConfig {
        self.projection
    }

    pub fn set_location(&mut self, location: Location) {
        self.location = location;
        self.invalidate();
    }

    pub fn set_utc_offset_hours(&mut self, hours: f64) {
        self.utc_offset_hours = hours;
        self.invalidate();
    }

    pub fn set_projection(&mut self, projection: ProjectionConfig) {
        self.projection = projection;
        self.invalidate();
    }

    /// Drop the cached day so the next query recomputes.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Event table for a local calendar day, cached per day.
    pub fn times_for_date(&mut self, date: NaiveDate) -> AstronomicalTimes {
        if let Some((cached_date, times)) = self.cached {
            if cached_date == date {
                return times;
            }
        }
        let times = self.compute_times(date);
        debug!(
            "astronomical times for {date}: sunrise {} sunset {} (valid={})",
            times.sunrise, times.sunset, times.valid
        );
        self.cached = Some((date, times));
        times
    }

    /// Solar altitude/azimuth at a local civil instant, projection applied.
    pub fn solar_position_at(&self, dt: &NaiveDateTime) -> HorizontalPosition {
        let jd = self.projected_jd(julian_day_local(dt, self.utc_offset_hours));
        sun::solar_position(&self.location, jd)
    }

    /// Lunar altitude/azimuth at a local civil instant, projection applied.
    pub fn lunar_position_at(&self, dt: &NaiveDateTime) -> HorizontalPosition {
        let jd = self.projected_jd(julian_day_local(dt, self.utc_offset_hours));
        moon::lunar_position(&self.location, jd)
    }

    /// Moon phase fraction at a local civil instant, projection applied.
    pub fn moon_phase_at(&self, dt: &NaiveDateTime) -> f64 {
        let jd = self.projected_jd(julian_day_local(dt, self.utc_offset_hours));
        moon::moon_phase(jd)
    }

    /// Projected Julian Day: shift by the user offset and rewind the
    /// location's own solar-time offset so the remote reef's day lands on
    /// the local clock where requested.
    fn projected_jd(&self, jd: f64) -> f64 {
        if !self.projection.enabled {
            return jd;
        }
        let shift_hours = self.projection.total_shift_minutes() as f64 / 60.0;
        jd + shift_hours / 24.0 - self.location.longitude_degrees() / 15.0 / 24.0
    }

    fn compute_times(&self, date: NaiveDate) -> AstronomicalTimes {
        let midnight = match date.and_hms_opt(0, 0, 0) {
            Some(dt) => dt,
            None => return AstronomicalTimes::default(),
        };
        let jd_midnight = julian_day_local(&midnight, self.utc_offset_hours);

        let rise_set = sun::solar_crossings(&self.location, jd_midnight, sun::RISE_SET_ALTITUDE);
        let civil = sun::solar_crossings(&self.location, jd_midnight, sun::CIVIL_ALTITUDE);
        let nautical = sun::solar_crossings(&self.location, jd_midnight, sun::NAUTICAL_ALTITUDE);
        let astro = sun::solar_crossings(&self.location, jd_midnight, sun::ASTRONOMICAL_ALTITUDE);

        let mut times = AstronomicalTimes::default();

        if let (Some(rise), Some(set)) = (rise_set.rise, rise_set.set) {
            times.valid = true;
            times.sunrise = to_minute(rise);
            times.sunset = to_minute(set);
            times.solar_noon = midpoint_minute(rise, set);

            // Missing twilight boundaries (high latitude summer) collapse
            // onto the nearest resolved boundary
            let civil_dawn = civil.rise.unwrap_or(rise);
            let civil_dusk = civil.set.unwrap_or(set);
            let nautical_dawn = nautical.rise.unwrap_or(civil_dawn);
            let nautical_dusk = nautical.set.unwrap_or(civil_dusk);
            let astro_dawn = astro.rise.unwrap_or(nautical_dawn);
            let astro_dusk = astro.set.unwrap_or(nautical_dusk);

            times.civil_dawn = to_minute(civil_dawn);
            times.civil_dusk = to_minute(civil_dusk);
            times.nautical_dawn = to_minute(nautical_dawn);
            times.nautical_dusk = to_minute(nautical_dusk);
            times.astronomical_dawn = to_minute(astro_dawn);
            times.astronomical_dusk = to_minute(astro_dusk);
        }

        let lunar = moon::lunar_rise_set(&self.location, jd_midnight);
        if let (Some(moonrise), Some(moonset)) = (lunar.rise, lunar.set) {
            times.moon_valid = true;
            times.moonrise = to_minute(moonrise);
            times.moonset = to_minute(moonset);
        }

        times.moon_phase = moon::moon_phase(self.projected_jd(jd_midnight + 0.5));

        if self.projection.enabled {
            let shift = self.projection.total_shift_minutes();
            times.sunrise = shift_minute(times.sunrise, shift);
            times.sunset = shift_minute(times.sunset, shift);
            times.solar_noon = shift_minute(times.solar_noon, shift);
            times.civil_dawn = shift_minute(times.civil_dawn, shift);
            times.civil_dusk = shift_minute(times.civil_dusk, shift);
            times.nautical_dawn = shift_minute(times.nautical_dawn, shift);
            times.nautical_dusk = shift_minute(times.nautical_dusk, shift);
            times.astronomical_dawn = shift_minute(times.astronomical_dawn, shift);
            times.astronomical_dusk = shift_minute(times.astronomical_dusk, shift);
            times.moonrise = shift_minute(times.moonrise, shift);
            times.moonset = shift_minute(times.moonset, shift);
        }

        times
    }
}

fn to_minute(fractional_minutes: f64) -> u16 {
    (fractional_minutes.round() as i64).rem_euclid(i64::from(MINUTES_PER_DAY)) as u16
}

/// Wrap-aware midpoint of two minutes-of-day, for solar noon.
fn midpoint_minute(rise: f64, set: f64) -> u16 {
    let midpoint = if set >= rise {
        (rise + set) / 2.0
    } else {
        ((rise + set + 1440.0) / 2.0) % 1440.0
    };
    to_minute(midpoint)
}

fn shift_minute(minute: u16, shift: i32) -> u16 {
    (i64::from(minute) + i64::from(shift)).rem_euclid(1440) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sf_engine() -> AstroEngine {
        AstroEngine::new(Location::clamped(37.7749, -122.4194), -7.0)
    }

    #[test]
    fn solstice_times_match_landmarks() {
        let mut engine = sf_engine();
        let times = engine.times_for_date(NaiveDate::from_ymd_opt(2025, 6, 21).unwrap());

        assert!(times.valid);
        assert!((i32::from(times.sunrise) - 347).abs() <= 5, "sunrise {}", times.sunrise);
        assert!((i32::from(times.sunset) - 1234).abs() <= 5, "sunset {}", times.sunset);
        assert!(times.astronomical_dawn < times.nautical_dawn);
        assert!(times.nautical_dawn < times.civil_dawn);
        assert!(times.civil_dawn < times.sunrise);
        assert!(times.sunset < times.civil_dusk);
    }

    #[test]
    fn cache_hits_same_day() {
        let mut engine = sf_engine();
        let date = NaiveDate::from_ymd_opt(2025, 6, 21).unwrap();
        let first = engine.times_for_date(date);
        let second = engine.times_for_date(date);
        assert_eq!(first, second);
        assert!(engine.cached.is_some());
    }

    #[test]
    fn invalidate_drops_cache() {
        let mut engine = sf_engine();
        engine.times_for_date(NaiveDate::from_ymd_opt(2025, 6, 21).unwrap());
        engine.invalidate();
        assert!(engine.cached.is_none());
    }

    #[test]
    fn projection_shifts_times() {
        let mut engine = sf_engine();
        let date = NaiveDate::from_ymd_opt(2025, 6, 21).unwrap();
        let base = engine.times_for_date(date);

        engine.set_projection(ProjectionConfig {
            enabled: true,
            shift_hours: 2,
            shift_minutes: 30,
        });
        let shifted = engine.times_for_date(date);

        let expected = (i64::from(base.sunrise) + 150).rem_euclid(1440) as u16;
        assert_eq!(shifted.sunrise, expected);
        let expected_set = (i64::from(base.sunset) + 150).rem_euclid(1440) as u16;
        assert_eq!(shifted.sunset, expected_set);
    }

    #[test]
    fn polar_night_publishes_defaults() {
        let mut engine = AstroEngine::new(Location::clamped(78.0, 15.0), 1.0);
        let times = engine.times_for_date(NaiveDate::from_ymd_opt(2025, 12, 21).unwrap());
        assert!(!times.valid);
        assert_eq!(times.sunrise, 420);
        assert_eq!(times.sunset, 1080);
    }
}
