// Shared coordinate transformations
// Ecliptic -> equatorial -> topocentric horizontal, used by both the solar
// and lunar position code

use super::units::{normalize_degrees, normalize_degrees_signed, DEG_TO_RAD, RAD_TO_DEG};
use super::{Location, J2000_EPOCH_JD};

/// Horizontal (topocentric) position of a body.
#[derive(Debug, Clone, Copy)]
pub struct HorizontalPosition {
    pub altitude: f64, // degrees above horizon
    pub azimuth: f64,  // degrees from North, clockwise (0=N, 90=E)
}

/// Convert ecliptic longitude/latitude (degrees) to equatorial right
/// ascension/declination (degrees) for a given obliquity.
pub fn ecliptic_to_equatorial(lambda: f64, beta: f64, obliquity: f64) -> (f64, f64) {
    let lambda_rad = lambda * DEG_TO_RAD;
    let beta_rad = beta * DEG_TO_RAD;
    let eps_rad = obliquity * DEG_TO_RAD;

    let alpha = (lambda_rad.sin() * eps_rad.cos() - beta_rad.tan() * eps_rad.sin())
        .atan2(lambda_rad.cos());
    let delta = (beta_rad.sin() * eps_rad.cos()
        + beta_rad.cos() * eps_rad.sin() * lambda_rad.sin())
    .asin();

    (normalize_degrees(alpha * RAD_TO_DEG), delta * RAD_TO_DEG)
}

/// Greenwich mean sidereal time in degrees for a Julian Day.
pub fn greenwich_mean_sidereal_time(jd: f64) -> f64 {
    let t = (jd - J2000_EPOCH_JD) / 36525.0;
    let gmst = 280.46061837 + 360.98564736629 * (jd - J2000_EPOCH_JD) + 0.000387933 * t * t
        - t * t * t / 38710000.0;
    normalize_degrees(gmst)
}

/// Convert equatorial coordinates (degrees) to topocentric altitude/azimuth
/// at a location and instant.
pub fn equatorial_to_horizontal(
    location: &Location,
    jd: f64,
    right_ascension: f64,
    declination: f64,
) -> HorizontalPosition {
    let lmst = normalize_degrees(greenwich_mean_sidereal_time(jd) + location.longitude_degrees());
    let hour_angle = normalize_degrees_signed(lmst - right_ascension);

    let lat_rad = location.latitude_degrees() * DEG_TO_RAD;
    let dec_rad = declination * DEG_TO_RAD;
    let ha_rad = hour_angle * DEG_TO_RAD;

    let sin_alt = lat_rad.sin() * dec_rad.sin() + lat_rad.cos() * dec_rad.cos() * ha_rad.cos();
    let altitude = sin_alt.clamp(-1.0, 1.0).asin() * RAD_TO_DEG;

    // Azimuth via atan2 for numerical stability, measured from North clockwise
    let altitude_rad = altitude * DEG_TO_RAD;
    let cos_az =
        (dec_rad.sin() - lat_rad.sin() * altitude_rad.sin()) / (lat_rad.cos() * altitude_rad.cos());
    let sin_az = -ha_rad.sin() * dec_rad.cos() / altitude_rad.cos();

    let mut azimuth = sin_az.atan2(cos_az) * RAD_TO_DEG;
    if azimuth < 0.0 {
        azimuth += 360.0;
    }

    HorizontalPosition { altitude, azimuth }
}
