//! Collaborator contracts between the control core and the hardware.
//!
//! The core never blocks on any of these: every call is expected to return
//! promptly, and a backend that needs slow I/O (persistence in particular)
//! should enqueue and return. File- and system-backed implementations for
//! the CLI simulator live here too; tests use the recording variants.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{Datelike, Local, Offset, Timelike};

/// One wall-clock sample: civil local date-time plus the live UTC offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockReading {
    pub valid: bool,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub utc_offset_seconds: i32,
}

impl ClockReading {
    /// Minute-of-day for schedule evaluation.
    pub fn minute_of_day(&self) -> u16 {
        (self.hour * 60 + self.minute).min(1439) as u16
    }
}

/// Wall-clock source. `monotonic_ms` backs all interval timing (fan update
/// period, emergency arming, sensor staleness) and never jumps with NTP.
pub trait WallClock {
    fn now(&mut self) -> ClockReading;
    fn monotonic_ms(&mut self) -> u64;
}

/// Per-channel PWM driver; `on` maps to the driver enable pin.
pub trait PwmDriver {
    fn set_channel(&mut self, channel: usize, pwm_fraction: f64, on: bool);
}

/// Per-channel maximum-current setpoint driver.
pub trait CurrentDriver {
    fn set_current(&mut self, channel: usize, amps: f64);
}

/// Cooling fan: a power switch and a speed setting, reported RPM.
pub trait FanDriver {
    fn set_fan_pwm(&mut self, percent: f64);
    fn set_fan_enabled(&mut self, enabled: bool);
    fn fan_rpm(&mut self) -> f64;
}

/// One temperature sample from a named probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorReading {
    pub valid: bool,
    pub celsius: f64,
    pub last_update_ms: u64,
}

/// A named temperature source producing Celsius readings.
pub trait TemperatureProbe {
    fn name(&self) -> &str;
    fn read(&mut self) -> SensorReading;
}

/// Size-bounded, best-effort persistence.
pub trait PersistenceBackend {
    fn capacity(&self) -> usize;
    fn save(&mut self, bytes: &[u8]) -> Result<()>;
    fn load(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Fire-and-forget notifications to external surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    EmergencyEntered,
    EmergencyCleared,
    ConfigSaved,
    AstronomyRefreshed,
}

pub trait EventSink {
    fn notify(&mut self, event: ControlEvent);
}

/// Event sink that drops everything.
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn notify(&mut self, _event: ControlEvent) {}
}

/// Wall clock backed by the host system time.
#[derive(Debug)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock for SystemClock {
    fn now(&mut self) -> ClockReading {
        let now = Local::now();
        ClockReading {
            valid: true,
            year: now.year(),
            month: now.month(),
            day: now.day(),
            hour: now.hour(),
            minute: now.minute(),
            second: now.second(),
            utc_offset_seconds: now.offset().fix().local_minus_utc(),
        }
    }

    fn monotonic_ms(&mut self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Wall clock driven by hand, for tests and schedule previews.
#[derive(Debug, Clone)]
pub struct ManualClock {
    pub reading: ClockReading,
    pub monotonic_ms: u64,
}

impl ManualClock {
    pub fn new(year: i32, month: u32, day: u32, utc_offset_seconds: i32) -> Self {
        Self {
            reading: ClockReading {
                valid: true,
                year,
                month,
                day,
                hour: 0,
                minute: 0,
                second: 0,
                utc_offset_seconds,
            },
            monotonic_ms: 0,
        }
    }

    pub fn set_time(&mut self, hour: u32, minute: u32, second: u32) {
        self.reading.hour = hour;
        self.reading.minute = minute;
        self.reading.second = second;
    }

    pub fn advance_ms(&mut self, ms: u64) {
        self.monotonic_ms += ms;
    }
}

impl WallClock for ManualClock {
    fn now(&mut self) -> ClockReading {
        self.reading
    }

    fn monotonic_ms(&mut self) -> u64 {
        self.monotonic_ms
    }
}

/// File-backed persistence with a fixed capacity and an atomic write path
/// (write to a sibling temp file, then rename).
#[derive(Debug)]
pub struct FilePersistence {
    path: PathBuf,
    capacity: usize,
}

impl FilePersistence {
    pub const DEFAULT_CAPACITY: usize = 32 * 1024;

    pub fn new(path: PathBuf, capacity: usize) -> Self {
        Self { path, capacity }
    }

    /// Default on-disk location (~/.coralux.json).
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".coralux.json"))
    }
}

impl PersistenceBackend for FilePersistence {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn save(&mut self, bytes: &[u8]) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes).context("Failed to write document temp file")?;
        fs::rename(&tmp, &self.path).context("Failed to replace document file")?;
        Ok(())
    }

    fn load(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path).context("Failed to read document file")?;
        Ok(Some(bytes))
    }
}

/// In-memory persistence used by tests and the simulator.
#[derive(Debug)]
pub struct MemoryPersistence {
    capacity: usize,
    pub stored: Option<Vec<u8>>,
    pub save_count: usize,
}

impl MemoryPersistence {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            stored: None,
            save_count: 0,
        }
    }
}

impl PersistenceBackend for MemoryPersistence {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn save(&mut self, bytes: &[u8]) -> Result<()> {
        self.stored = Some(bytes.to_vec());
        self.save_count += 1;
        Ok(())
    }

    fn load(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.stored.clone())
    }
}

/// PWM driver that remembers the last value written per channel.
#[derive(Debug)]
pub struct RecordingPwmDriver {
    pub channels: Vec<(f64, bool)>,
    pub write_count: usize,
}

impl RecordingPwmDriver {
    pub fn new(num_channels: usize) -> Self {
        Self {
            channels: vec![(0.0, false); num_channels],
            write_count: 0,
        }
    }
}

impl PwmDriver for RecordingPwmDriver {
    fn set_channel(&mut self, channel: usize, pwm_fraction: f64, on: bool) {
        if let Some(slot) = self.channels.get_mut(channel) {
            *slot = (pwm_fraction, on);
            self.write_count += 1;
        }
    }
}

/// Current driver that remembers the last value written per channel.
#[derive(Debug)]
pub struct RecordingCurrentDriver {
    pub channels: Vec<f64>,
    pub write_count: usize,
}

impl RecordingCurrentDriver {
    pub fn new(num_channels: usize) -> Self {
        Self {
            channels: vec![0.0; num_channels],
            write_count: 0,
        }
    }
}

impl CurrentDriver for RecordingCurrentDriver {
    fn set_current(&mut self, channel: usize, amps: f64) {
        if let Some(slot) = self.channels.get_mut(channel) {
            *slot = amps;
            self.write_count += 1;
        }
    }
}

/// Fan driver that remembers the last commanded state.
#[derive(Debug, Default)]
pub struct RecordingFanDriver {
    pub pwm_percent: f64,
    pub enabled: bool,
    pub rpm: f64,
}

impl FanDriver for RecordingFanDriver {
    fn set_fan_pwm(&mut self, percent: f64) {
        self.pwm_percent = percent;
    }

    fn set_fan_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn fan_rpm(&mut self) -> f64 {
        self.rpm
    }
}

/// Fixed-temperature probe for tests and the simulator.
#[derive(Debug)]
pub struct FixedProbe {
    name: String,
    pub celsius: f64,
    pub last_update_ms: u64,
    pub valid: bool,
}

impl FixedProbe {
    pub fn new(name: &str, celsius: f64) -> Self {
        Self {
            name: name.to_string(),
            celsius,
            last_update_ms: 0,
            valid: true,
        }
    }
}

impl TemperatureProbe for FixedProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> SensorReading {
        SensorReading {
            valid: self.valid,
            celsius: self.celsius,
            last_update_ms: self.last_update_ms,
        }
    }
}

/// Event sink that collects events in order, for tests and the simulator.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    pub events: Vec<ControlEvent>,
}

impl EventSink for RecordingEventSink {
    fn notify(&mut self, event: ControlEvent) {
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_of_day() {
        let reading = ClockReading {
            hour: 12,
            minute: 30,
            ..Default::default()
        };
        assert_eq!(reading.minute_of_day(), 750);
    }

    #[test]
    fn memory_persistence_round_trip() {
        let mut backend = MemoryPersistence::new(1024);
        assert!(backend.load().unwrap().is_none());
        backend.save(b"{}").unwrap();
        assert_eq!(backend.load().unwrap().unwrap(), b"{}");
        assert_eq!(backend.save_count, 1);
    }

    #[test]
    fn recording_pwm_ignores_bad_channel() {
        let mut driver = RecordingPwmDriver::new(2);
        driver.set_channel(5, 0.5, true);
        assert_eq!(driver.write_count, 0);
        driver.set_channel(1, 0.5, true);
        assert_eq!(driver.channels[1], (0.5, true));
    }
}
