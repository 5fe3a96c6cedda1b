//! The persisted configuration document.
//!
//! A single versioned JSON object is the source of truth for every
//! user-tunable setting: channel configs, schedule, moonlight, location and
//! projection, timezone offset, temperature control, and the scheduler
//! enable flag. The control loop owns the in-memory form; export produces
//! the canonical JSON (with advisory read-only fields filled in), import
//! applies a parsed document field group by field group.

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::astro::AstronomicalTimes;
use crate::moonlight::MoonSimulation;
use crate::schedule::{Schedule, SchedulePoint};
use crate::temp::TemperatureControlConfig;

/// JSON schema version this build reads and writes.
pub const SUPPORTED_VERSION: u32 = 2;

pub const MIN_CHANNELS: usize = 1;
pub const MAX_CHANNELS: usize = 16;

/// Channel current limits are clamped to this range, amps.
pub const MIN_CHANNEL_CURRENT: f64 = 0.1;
pub const MAX_CHANNEL_CURRENT: f64 = 2.0;

/// Per-channel display name, color hint, and current ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub rgb_hex: String,
    pub max_current: f64,
}

impl ChannelConfig {
    pub fn new(index: usize) -> Self {
        Self {
            name: format!("Channel {}", index + 1),
            rgb_hex: "#FFFFFF".to_string(),
            max_current: 1.0,
        }
    }

    /// Clamp the current limit and fall back on a malformed color hint.
    pub fn sanitized(mut self) -> Self {
        self.max_current = self.max_current.clamp(MIN_CHANNEL_CURRENT, MAX_CHANNEL_CURRENT);
        if self.rgb_hex.len() != 7 || !self.rgb_hex.starts_with('#') {
            warn!("channel {:?}: invalid color hint {:?}", self.name, self.rgb_hex);
            self.rgb_hex = "#FFFFFF".to_string();
        }
        self
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("unsupported document version {0} (supported: {SUPPORTED_VERSION})")]
    UnsupportedVersion(u32),
    #[error("document parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The complete user-tunable state of the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedDocument {
    pub num_channels: usize,
    pub channel_configs: Vec<ChannelConfig>,
    pub schedule: Schedule,
    pub moon_simulation: MoonSimulation,
    pub temperature: TemperatureControlConfig,
    /// Advisory IANA name; the offset below is what the core computes with
    pub timezone: String,
    pub timezone_offset_hours: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub astronomical_projection: bool,
    pub time_shift_hours: i32,
    pub time_shift_minutes: i32,
    pub enabled: bool,
}

impl PersistedDocument {
    pub fn new(num_channels: usize) -> Self {
        let num_channels = num_channels.clamp(MIN_CHANNELS, MAX_CHANNELS);
        Self {
            num_channels,
            channel_configs: (0..num_channels).map(ChannelConfig::new).collect(),
            schedule: Schedule::new(),
            moon_simulation: MoonSimulation::new(num_channels),
            temperature: TemperatureControlConfig::default(),
            timezone: "Australia/Brisbane".to_string(),
            timezone_offset_hours: 10.0,
            latitude: -18.2871,
            longitude: 147.6992,
            astronomical_projection: false,
            time_shift_hours: 0,
            time_shift_minutes: 0,
            enabled: true,
        }
    }

    /// Per-channel current ceilings, the shape schedule validation wants.
    pub fn max_currents(&self) -> Vec<f64> {
        self.channel_configs.iter().map(|c| c.max_current).collect()
    }

    /// Serialize the canonical document, filling in the advisory read-only
    /// fields from live state.
    pub fn export_json(
        &self,
        astro: &AstronomicalTimes,
        current_time_minutes: u16,
    ) -> Result<String, DocumentError> {
        let wire = WireDocument {
            version: SUPPORTED_VERSION,
            num_channels: self.num_channels,
            channel_configs: self.channel_configs.clone(),
            schedule_points: self
                .schedule
                .points()
                .iter()
                .map(WireSchedulePoint::from)
                .collect(),
            astronomical_times: Some(WireAstronomicalTimes::from(astro)),
            moon_simulation: self.moon_simulation.clone(),
            temperature_control: self.temperature.clone(),
            timezone: self.timezone.clone(),
            timezone_offset_hours: self.timezone_offset_hours,
            latitude: self.latitude,
            longitude: self.longitude,
            astronomical_projection: self.astronomical_projection,
            time_shift_hours: self.time_shift_hours,
            time_shift_minutes: self.time_shift_minutes,
            enabled: self.enabled,
            current_time_minutes: Some(current_time_minutes),
        };
        Ok(serde_json::to_string_pretty(&wire)?)
    }

    /// Parse and apply a document.
    ///
    /// A version mismatch leaves the current state untouched. Field groups
    /// apply in a fixed order (channels, schedule, moonlight, astronomy,
    /// temperature, enabled); individually invalid schedule points are
    /// logged and skipped rather than failing the whole import.
    pub fn import_json(&mut self, json: &str) -> Result<(), DocumentError> {
        let wire: WireDocument = serde_json::from_str(json)?;
        if wire.version != SUPPORTED_VERSION {
            return Err(DocumentError::UnsupportedVersion(wire.version));
        }

        // Channel configs first: schedule validation depends on them
        self.num_channels = wire.num_channels.clamp(MIN_CHANNELS, MAX_CHANNELS);
        let mut configs: Vec<ChannelConfig> = wire
            .channel_configs
            .into_iter()
            .take(self.num_channels)
            .map(ChannelConfig::sanitized)
            .collect();
        for index in configs.len()..self.num_channels {
            configs.push(ChannelConfig::new(index));
        }
        self.channel_configs = configs;

        let max_currents = self.max_currents();
        self.schedule.clear();
        for wire_point in wire.schedule_points {
            let point = SchedulePoint::from(wire_point);
            if let Err(err) = self.schedule.add(point, &max_currents) {
                warn!("dropping schedule point on import: {err}");
            }
        }

        self.moon_simulation = wire.moon_simulation;
        self.moon_simulation.resize(self.num_channels);

        self.timezone = wire.timezone;
        self.timezone_offset_hours = wire.timezone_offset_hours.clamp(-14.0, 14.0);
        if (-90.0..=90.0).contains(&wire.latitude) && (-180.0..=180.0).contains(&wire.longitude) {
            self.latitude = wire.latitude;
            self.longitude = wire.longitude;
        } else {
            warn!(
                "ignoring out-of-range location ({}, {})",
                wire.latitude, wire.longitude
            );
        }
        self.astronomical_projection = wire.astronomical_projection;
        self.time_shift_hours = wire.time_shift_hours;
        self.time_shift_minutes = wire.time_shift_minutes;

        self.temperature = wire.temperature_control.sanitized();
        self.enabled = wire.enabled;
        Ok(())
    }
}

impl Default for PersistedDocument {
    fn default() -> Self {
        Self::new(8)
    }
}

/// Wire form of the document, shaped exactly like the external contract.
#[derive(Debug, Serialize, Deserialize)]
struct WireDocument {
    version: u32,
    num_channels: usize,
    channel_configs: Vec<ChannelConfig>,
    schedule_points: Vec<WireSchedulePoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    astronomical_times: Option<WireAstronomicalTimes>,
    moon_simulation: MoonSimulation,
    temperature_control: TemperatureControlConfig,
    timezone: String,
    timezone_offset_hours: f64,
    latitude: f64,
    longitude: f64,
    astronomical_projection: bool,
    time_shift_hours: i32,
    time_shift_minutes: i32,
    enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_time_minutes: Option<u16>,
}

/// Schedule point on the wire; `time_formatted` is advisory for tooling.
#[derive(Debug, Serialize, Deserialize)]
struct WireSchedulePoint {
    time_type: crate::schedule::DynamicTimeType,
    offset_minutes: i32,
    time_minutes: u16,
    #[serde(default)]
    time_formatted: String,
    pwm_values: Vec<f64>,
    current_values: Vec<f64>,
}

impl From<&SchedulePoint> for WireSchedulePoint {
    fn from(point: &SchedulePoint) -> Self {
        Self {
            time_type: point.time_type,
            offset_minutes: point.offset_minutes,
            time_minutes: point.time_minutes,
            time_formatted: point.time_formatted(),
            pwm_values: point.pwm_values.clone(),
            current_values: point.current_values.clone(),
        }
    }
}

impl From<WireSchedulePoint> for SchedulePoint {
    fn from(wire: WireSchedulePoint) -> Self {
        Self {
            time_type: wire.time_type,
            offset_minutes: wire.offset_minutes,
            time_minutes: wire.time_minutes,
            pwm_values: wire.pwm_values,
            current_values: wire.current_values,
        }
    }
}

/// Read-only astronomical snapshot emitted on export.
#[derive(Debug, Serialize, Deserialize)]
struct WireAstronomicalTimes {
    sunrise_minutes: u16,
    sunset_minutes: u16,
    civil_dawn_minutes: u16,
    civil_dusk_minutes: u16,
    nautical_dawn_minutes: u16,
    nautical_dusk_minutes: u16,
    solar_noon_minutes: u16,
}

impl From<&AstronomicalTimes> for WireAstronomicalTimes {
    fn from(astro: &AstronomicalTimes) -> Self {
        Self {
            sunrise_minutes: astro.sunrise,
            sunset_minutes: astro.sunset,
            civil_dawn_minutes: astro.civil_dawn,
            civil_dusk_minutes: astro.civil_dusk,
            nautical_dawn_minutes: astro.nautical_dawn,
            nautical_dusk_minutes: astro.nautical_dusk,
            solar_noon_minutes: astro.solar_noon,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::DynamicTimeType;

    fn populated_document() -> PersistedDocument {
        let mut doc = PersistedDocument::new(2);
        doc.channel_configs[0].name = "Royal Blue".to_string();
        doc.channel_configs[0].rgb_hex = "#0033FF".to_string();
        doc.channel_configs[0].max_current = 1.5;
        let limits = doc.max_currents();
        doc.schedule
            .add(
                SchedulePoint::fixed(540, vec![0.0, 0.0], vec![0.0, 0.0]),
                &limits,
            )
            .unwrap();
        doc.schedule
            .add(
                SchedulePoint::dynamic(
                    DynamicTimeType::SunsetRel,
                    45,
                    vec![12.0, 8.0],
                    vec![0.3, 0.2],
                ),
                &limits,
            )
            .unwrap();
        doc.moon_simulation.enabled = true;
        doc.moon_simulation.base_intensity = vec![1.5, 0.0];
        doc.timezone_offset_hours = -7.0;
        doc.latitude = 37.7749;
        doc.longitude = -122.4194;
        doc.enabled = false;
        doc
    }

    #[test]
    fn export_import_round_trips() {
        let doc = populated_document();
        let json = doc
            .export_json(&AstronomicalTimes::default(), 615)
            .unwrap();

        let mut restored = PersistedDocument::default();
        restored.import_json(&json).unwrap();
        assert_eq!(restored, doc);
    }

    #[test]
    fn version_mismatch_leaves_defaults() {
        let doc = populated_document();
        let json = doc
            .export_json(&AstronomicalTimes::default(), 0)
            .unwrap()
            .replace("\"version\": 2", "\"version\": 1");

        let mut restored = PersistedDocument::default();
        let err = restored.import_json(&json).unwrap_err();
        assert!(matches!(err, DocumentError::UnsupportedVersion(1)));
        assert_eq!(restored, PersistedDocument::default());
    }

    #[test]
    fn import_drops_invalid_schedule_points() {
        let doc = populated_document();
        let json = doc
            .export_json(&AstronomicalTimes::default(), 0)
            .unwrap()
            // Push the dynamic point's current beyond channel 0's 1.5 A limit
            .replace("0.3", "1.9");

        let mut restored = PersistedDocument::default();
        restored.import_json(&json).unwrap();
        assert_eq!(restored.schedule.len(), 1);
    }

    #[test]
    fn import_sanitizes_channel_configs() {
        let mut doc = populated_document();
        doc.channel_configs[1].rgb_hex = "bogus".to_string();
        doc.channel_configs[1].max_current = 99.0;
        let json = doc
            .export_json(&AstronomicalTimes::default(), 0)
            .unwrap();

        let mut restored = PersistedDocument::default();
        restored.import_json(&json).unwrap();
        assert_eq!(restored.channel_configs[1].rgb_hex, "#FFFFFF");
        assert_eq!(restored.channel_configs[1].max_current, MAX_CHANNEL_CURRENT);
    }

    #[test]
    fn export_contains_contract_fields() {
        let doc = populated_document();
        let json = doc
            .export_json(&AstronomicalTimes::default(), 615)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["version"], 2);
        assert_eq!(value["num_channels"], 2);
        assert_eq!(value["current_time_minutes"], 615);
        assert_eq!(value["schedule_points"][0]["time_formatted"], "09:00");
        assert_eq!(value["schedule_points"][1]["time_type"], "SUNSET_REL");
        assert_eq!(value["astronomical_times"]["sunrise_minutes"], 420);
        assert_eq!(value["temperature_control"]["target_temp_c"], 45.0);
    }

    #[test]
    fn new_clamps_channel_count() {
        assert_eq!(PersistedDocument::new(0).num_channels, 1);
        assert_eq!(PersistedDocument::new(99).num_channels, 16);
    }
}
