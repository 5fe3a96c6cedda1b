//! Schedule data model and interpolation.
//!
//! A schedule is an ordered set of points on a cyclic 1440-minute day. A
//! point is either fixed at a wall-clock minute or anchored to one of
//! today's astronomical events with a signed minute offset; evaluation
//! resolves the dynamic points against the current [`AstronomicalTimes`] and
//! interpolates per channel between the two bracketing points.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::astro::{format_minutes, AstronomicalTimes, MINUTES_PER_DAY};

/// Anchor of a schedule point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DynamicTimeType {
    Fixed,
    SunriseRel,
    SunsetRel,
    SolarNoon,
    CivilDawn,
    CivilDusk,
    NauticalDawn,
    NauticalDusk,
    AstronomicalDawn,
    AstronomicalDusk,
}

impl DynamicTimeType {
    /// Today's base minute for a dynamic anchor; `None` for fixed points.
    pub fn base_minutes(&self, astro: &AstronomicalTimes) -> Option<u16> {
        match self {
            DynamicTimeType::Fixed => None,
            DynamicTimeType::SunriseRel => Some(astro.sunrise),
            DynamicTimeType::SunsetRel => Some(astro.sunset),
            DynamicTimeType::SolarNoon => Some(astro.solar_noon),
            DynamicTimeType::CivilDawn => Some(astro.civil_dawn),
            DynamicTimeType::CivilDusk => Some(astro.civil_dusk),
            DynamicTimeType::NauticalDawn => Some(astro.nautical_dawn),
            DynamicTimeType::NauticalDusk => Some(astro.nautical_dusk),
            DynamicTimeType::AstronomicalDawn => Some(astro.astronomical_dawn),
            DynamicTimeType::AstronomicalDusk => Some(astro.astronomical_dusk),
        }
    }
}

/// One schedule point: anchor, per-channel PWM percents and current limits.
///
/// `time_minutes` is the resolved wall-clock minute; for dynamic points it
/// is a cache refreshed against today's astronomical times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulePoint {
    pub time_type: DynamicTimeType,
    pub offset_minutes: i32,
    pub time_minutes: u16,
    pub pwm_values: Vec<f64>,
    pub current_values: Vec<f64>,
}

impl SchedulePoint {
    pub fn fixed(time_minutes: u16, pwm_values: Vec<f64>, current_values: Vec<f64>) -> Self {
        Self {
            time_type: DynamicTimeType::Fixed,
            offset_minutes: 0,
            time_minutes,
            pwm_values,
            current_values,
        }
    }

    pub fn dynamic(
        time_type: DynamicTimeType,
        offset_minutes: i32,
        pwm_values: Vec<f64>,
        current_values: Vec<f64>,
    ) -> Self {
        Self {
            time_type,
            offset_minutes,
            time_minutes: 0,
            pwm_values,
            current_values,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.time_type == DynamicTimeType::Fixed
    }

    /// Two points share an identity when inserting one would replace the
    /// other: same resolved minute for fixed points, same anchor and offset
    /// for dynamic ones.
    pub fn same_identity(&self, other: &Self) -> bool {
        if self.time_type != other.time_type {
            return false;
        }
        if self.is_fixed() {
            self.time_minutes == other.time_minutes
        } else {
            self.offset_minutes == other.offset_minutes
        }
    }

    /// Resolved minute against today's astronomical times.
    pub fn resolve(&self, astro: &AstronomicalTimes) -> u16 {
        match self.time_type.base_minutes(astro) {
            None => self.time_minutes % MINUTES_PER_DAY as u16,
            Some(base) => (i64::from(base) + i64::from(self.offset_minutes))
                .rem_euclid(i64::from(MINUTES_PER_DAY)) as u16,
        }
    }

    /// Advisory "HH:MM" of the cached resolved minute.
    pub fn time_formatted(&self) -> String {
        format_minutes(self.time_minutes)
    }
}

/// Why a point was rejected.
#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("point has {got} channels, schedule expects {expected}")]
    ChannelCountMismatch { expected: usize, got: usize },
    #[error("channel {channel} PWM {value} outside 0..100")]
    PwmOutOfRange { channel: usize, value: f64 },
    #[error("channel {channel} current {value} outside 0..{max}")]
    CurrentOutOfRange { channel: usize, value: f64, max: f64 },
    #[error("dynamic offset {0} outside -1439..1439")]
    OffsetOutOfRange(i32),
    #[error("fixed time {0} outside 0..1439")]
    FixedTimeOutOfRange(u16),
    #[error("unknown preset {0:?}")]
    UnknownPreset(String),
}

/// A resolved point: today's minute plus a borrow of the point it came from.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedPoint<'a> {
    pub time_minutes: u16,
    pub point: &'a SchedulePoint,
}

/// Per-channel output of one schedule evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleOutput {
    pub pwm: Vec<f64>,
    pub current: Vec<f64>,
    pub valid: bool,
}

impl ScheduleOutput {
    pub fn invalid(num_channels: usize) -> Self {
        Self {
            pwm: vec![0.0; num_channels],
            current: vec![0.0; num_channels],
            valid: false,
        }
    }
}

/// The user-authored schedule for all channels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    points: Vec<SchedulePoint>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[SchedulePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Validate and insert a point, replacing any point of the same
    /// identity.
    ///
    /// `max_currents` carries each channel's configured limit; its length is
    /// the channel count the point must match.
    pub fn add(
        &mut self,
        mut point: SchedulePoint,
        max_currents: &[f64],
    ) -> Result<(), ScheduleError> {
        let expected = max_currents.len();
        if point.pwm_values.len() != expected || point.current_values.len() != expected {
            return Err(ScheduleError::ChannelCountMismatch {
                expected,
                got: point.pwm_values.len().max(point.current_values.len()),
            });
        }
        for (channel, &pwm) in point.pwm_values.iter().enumerate() {
            if !(0.0..=100.0).contains(&pwm) {
                return Err(ScheduleError::PwmOutOfRange {
                    channel,
                    value: pwm,
                });
            }
        }
        for (channel, &current) in point.current_values.iter().enumerate() {
            let max = max_currents[channel];
            if current < 0.0 || current > max {
                return Err(ScheduleError::CurrentOutOfRange {
                    channel,
                    value: current,
                    max,
                });
            }
        }
        if point.is_fixed() {
            if point.time_minutes >= MINUTES_PER_DAY as u16 {
                return Err(ScheduleError::FixedTimeOutOfRange(point.time_minutes));
            }
            point.offset_minutes = 0;
        } else if point.offset_minutes.abs() >= MINUTES_PER_DAY as i32 {
            return Err(ScheduleError::OffsetOutOfRange(point.offset_minutes));
        }

        self.points.retain(|existing| !existing.same_identity(&point));
        self.points.push(point);
        Ok(())
    }

    /// Remove the fixed point at a minute. Returns whether a point was
    /// removed; removal never fails.
    pub fn remove_fixed(&mut self, time_minutes: u16) -> bool {
        let before = self.points.len();
        self.points
            .retain(|p| !(p.is_fixed() && p.time_minutes == time_minutes));
        self.points.len() != before
    }

    /// Remove the dynamic point with an anchor and offset.
    pub fn remove_dynamic(&mut self, time_type: DynamicTimeType, offset_minutes: i32) -> bool {
        let before = self.points.len();
        self.points
            .retain(|p| !(p.time_type == time_type && p.offset_minutes == offset_minutes));
        self.points.len() != before
    }

    /// Refresh every point's cached `time_minutes` from today's
    /// astronomical times. Fixed points are untouched.
    pub fn refresh_resolved_times(&mut self, astro: &AstronomicalTimes) {
        for point in &mut self.points {
            point.time_minutes = point.resolve(astro);
        }
    }

    /// Resolve all points against `astro` and sort by minute. The schedule
    /// itself is not mutated.
    pub fn resolve<'a>(&'a self, astro: &AstronomicalTimes) -> Vec<ResolvedPoint<'a>> {
        let mut resolved: Vec<ResolvedPoint<'a>> = self
            .points
            .iter()
            .map(|point| ResolvedPoint {
                time_minutes: point.resolve(astro),
                point,
            })
            .collect();
        resolved.sort_by_key(|r| r.time_minutes);
        resolved
    }

    /// Piecewise-linear interpolation at minute `t` over the resolved,
    /// sorted sequence.
    ///
    /// The day is treated as a cycle: before the first point the bracket is
    /// (last, first) across midnight, and likewise after the last point, so
    /// a schedule of dynamic points keeps producing sensible output as its
    /// resolved minutes drift day to day.
    pub fn interpolate(resolved: &[ResolvedPoint<'_>], t: u16, num_channels: usize) -> ScheduleOutput {
        match resolved {
            [] => ScheduleOutput::invalid(num_channels),
            [only] => ScheduleOutput {
                pwm: only.point.pwm_values.clone(),
                current: only.point.current_values.clone(),
                valid: true,
            },
            _ => {
                let first = &resolved[0];
                let last = &resolved[resolved.len() - 1];

                let (before, after) = if t < first.time_minutes || t > last.time_minutes {
                    (last, first)
                } else {
                    let mut pair = (first, first);
                    for window in resolved.windows(2) {
                        if window[0].time_minutes <= t && t <= window[1].time_minutes {
                            pair = (&window[0], &window[1]);
                            break;
                        }
                    }
                    pair
                };

                let span = (i64::from(after.time_minutes) - i64::from(before.time_minutes))
                    .rem_euclid(i64::from(MINUTES_PER_DAY));
                if span == 0 {
                    return ScheduleOutput {
                        pwm: before.point.pwm_values.clone(),
                        current: before.point.current_values.clone(),
                        valid: true,
                    };
                }
                let elapsed = (i64::from(t) - i64::from(before.time_minutes))
                    .rem_euclid(i64::from(MINUTES_PER_DAY));
                let ratio = elapsed as f64 / span as f64;

                let lerp = |a: &[f64], b: &[f64]| -> Vec<f64> {
                    a.iter()
                        .zip(b.iter())
                        .map(|(&from, &to)| from + ratio * (to - from))
                        .collect()
                };

                ScheduleOutput {
                    pwm: lerp(&before.point.pwm_values, &after.point.pwm_values),
                    current: lerp(&before.point.current_values, &after.point.current_values),
                    valid: true,
                }
            }
        }
    }
}

/// Build the point list of a named preset, or an error for an unknown name.
///
/// Presets are data: each row is (anchor, offset, PWM percent, current amps)
/// broadcast across all channels.
pub fn preset_points(name: &str, num_channels: usize) -> Result<Vec<SchedulePoint>, ScheduleError> {
    use DynamicTimeType::*;

    type Row = (DynamicTimeType, i32, u16, f64, f64);
    let rows: &[Row] = match name {
        "simple" => &[
            (Fixed, 0, 480, 0.0, 0.0),
            (Fixed, 0, 720, 80.0, 1.0),
            (Fixed, 0, 1200, 0.0, 0.0),
        ],
        "default" => &[
            (Fixed, 0, 540, 0.0, 0.0),
            (Fixed, 0, 600, 60.0, 0.8),
            (Fixed, 0, 840, 90.0, 1.0),
            (Fixed, 0, 1080, 60.0, 0.8),
            (Fixed, 0, 1140, 0.0, 0.0),
        ],
        "sunrise_sunset" => &[
            (Fixed, 0, 360, 0.0, 0.0),
            (Fixed, 0, 450, 30.0, 0.5),
            (Fixed, 0, 720, 100.0, 1.0),
            (Fixed, 0, 990, 30.0, 0.5),
            (Fixed, 0, 1080, 0.0, 0.0),
        ],
        "dynamic_sunrise_sunset" => &[
            (SunriseRel, -30, 0, 0.0, 0.0),
            (SunriseRel, 60, 0, 50.0, 0.8),
            (SolarNoon, 0, 0, 90.0, 1.0),
            (SunsetRel, -60, 0, 50.0, 0.8),
            (SunsetRel, 30, 0, 0.0, 0.0),
        ],
        "full_spectrum" => &[
            (NauticalDawn, 0, 0, 0.0, 0.0),
            (CivilDawn, 0, 0, 10.0, 0.2),
            (SunriseRel, 0, 0, 40.0, 0.6),
            (SolarNoon, 0, 0, 100.0, 1.0),
            (SunsetRel, 0, 0, 40.0, 0.6),
            (CivilDusk, 0, 0, 10.0, 0.2),
            (NauticalDusk, 0, 0, 0.0, 0.0),
        ],
        other => return Err(ScheduleError::UnknownPreset(other.to_string())),
    };

    Ok(rows
        .iter()
        .map(|&(time_type, offset, minute, pwm, current)| {
            let pwm_values = vec![pwm; num_channels];
            let current_values = vec![current; num_channels];
            if time_type == Fixed {
                SchedulePoint::fixed(minute, pwm_values, current_values)
            } else {
                SchedulePoint::dynamic(time_type, offset, pwm_values, current_values)
            }
        })
        .collect())
}
