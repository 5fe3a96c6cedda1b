// Astronomical calculations module
// Implements low-precision VSOP solar and Meeus lunar algorithms, tuned for
// aquarium lighting schedules (rise/set within a few minutes)

pub mod coordinates;
pub mod engine;
pub mod moon;
pub mod sun;
pub mod units;

use chrono::{Datelike, NaiveDateTime, Timelike};

pub use engine::{AstroEngine, AstronomicalTimes, ProjectionConfig};
pub use units::{
    normalize_degrees, normalize_degrees_signed, CoordinateError, Latitude, Longitude,
    DEG_TO_RAD, RAD_TO_DEG,
};

/// Minutes in a civil day; schedule times and rise/set instants all live on
/// this cyclic range.
pub const MINUTES_PER_DAY: u32 = 1440;

/// Julian Day of the J2000.0 epoch (2000-01-01 12:00 UTC), the zero point
/// of every polynomial in the sun and moon series.
pub const J2000_EPOCH_JD: f64 = 2451545.0;

/// Where on Earth the fixture's sky is evaluated. Sea-level observer; the
/// few arcseconds elevation buys are beyond aquarium grade.
#[derive(Debug, Clone, Copy)]
pub struct Location {
    latitude: Latitude,
    longitude: Longitude,
}

impl Location {
    /// Build from user-supplied coordinates, rejecting anything off-Earth.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        Ok(Self {
            latitude: Latitude::checked(latitude)?,
            longitude: Longitude::checked(longitude)?,
        })
    }

    /// Build from stored coordinates, clamping instead of rejecting so a
    /// damaged document still yields a usable sky.
    pub fn clamped(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Latitude::clamped(latitude),
            longitude: Longitude::clamped(longitude),
        }
    }

    pub fn latitude_degrees(&self) -> f64 {
        self.latitude.degrees()
    }

    pub fn longitude_degrees(&self) -> f64 {
        self.longitude.degrees()
    }
}

/// Calculate Julian Day from a civil date-time already expressed in UTC.
///
/// Gregorian formula with the Meeus month shift (January and February are
/// counted as months 13 and 14 of the previous year).
pub fn julian_day_utc(dt: &NaiveDateTime) -> f64 {
    let year = dt.year() as f64;
    let month = dt.month() as f64;
    let day = dt.day() as f64
        + dt.hour() as f64 / 24.0
        + dt.minute() as f64 / 1440.0
        + dt.second() as f64 / 86400.0;

    let mut y = year;
    let mut m = month;

    if month <= 2.0 {
        y -= 1.0;
        m += 12.0;
    }

    let a = (y / 100.0).floor();
    let b = 2.0 - a + (a / 4.0).floor();

    (365.25 * (y + 4716.0)).floor() + (30.6001 * (m + 1.0)).floor() + day + b - 1524.5
}

/// Calculate Julian Day from a local civil date-time plus its UTC offset.
///
/// This is the only time conversion in the engine; everything downstream
/// takes a JD.
pub fn julian_day_local(dt: &NaiveDateTime, utc_offset_hours: f64) -> f64 {
    julian_day_utc(dt) - utc_offset_hours / 24.0
}

/// Julian centuries of 36525 days elapsed since [`J2000_EPOCH_JD`], the
/// argument every series polynomial is written in.
pub fn julian_century(jd: f64) -> f64 {
    (jd - J2000_EPOCH_JD) / 36525.0
}

/// Format a minute-of-day value as an "HH:MM" string.
pub fn format_minutes(minutes: u16) -> String {
    let m = u32::from(minutes) % MINUTES_PER_DAY;
    format!("{:02}:{:02}", m / 60, m % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn naive(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_julian_day_epoch() {
        // January 1, 2000, 12:00:00 UTC = JD 2451545.0
        let jd = julian_day_utc(&naive(2000, 1, 1, 12, 0, 0));
        assert!((jd - 2451545.0).abs() < 0.001);
    }

    #[test]
    fn test_julian_day_local_offset() {
        // 2000-01-01 04:00 at UTC-8 is 2000-01-01 12:00 UTC
        let jd = julian_day_local(&naive(2000, 1, 1, 4, 0, 0), -8.0);
        assert!((jd - 2451545.0).abs() < 0.001);
    }

    #[test]
    fn test_julian_day_monotonic() {
        let mut prev = julian_day_utc(&naive(2024, 12, 31, 23, 0, 0));
        let samples = [
            naive(2025, 1, 1, 0, 0, 0),
            naive(2025, 1, 1, 0, 0, 1),
            naive(2025, 2, 28, 23, 59, 59),
            naive(2025, 3, 1, 0, 0, 0),
            naive(2025, 6, 21, 12, 30, 0),
            naive(2026, 1, 1, 0, 0, 0),
        ];
        for dt in samples {
            let jd = julian_day_utc(&dt);
            assert!(jd > prev, "JD not monotonic at {dt}");
            prev = jd;
        }
    }

    #[test]
    fn test_format_minutes() {
        assert_eq!(format_minutes(0), "00:00");
        assert_eq!(format_minutes(750), "12:30");
        assert_eq!(format_minutes(1439), "23:59");
    }
}
