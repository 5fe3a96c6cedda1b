//! The control loop.
//!
//! One [`LightController`] owns the persisted document and all derived
//! state. Each tick, in strict order: thermal gate, timezone tracking,
//! throttled astronomy refresh, schedule evaluation, driver push with
//! near-duplicate suppression, temperature control, deferred save. No error
//! escapes a tick; degraded inputs are logged and the loop keeps running.
//!
//! External surfaces mutate the document only through the methods here, on
//! the same execution context as `tick` — there is no mid-tick mutation.

use chrono::NaiveDate;
use log::{debug, info, warn};

use crate::astro::{AstroEngine, AstronomicalTimes, CoordinateError, Location, ProjectionConfig};
use crate::document::{ChannelConfig, DocumentError, PersistedDocument};
use crate::hal::{
    ClockReading, ControlEvent, CurrentDriver, EventSink, FanDriver, PersistenceBackend,
    PwmDriver, SensorReading, TemperatureProbe, WallClock,
};
use crate::moonlight::MoonSimulation;
use crate::schedule::{preset_points, DynamicTimeType, Schedule, ScheduleError, SchedulePoint};
use crate::temp::{
    EmergencyTransition, TempControl, TemperatureControlConfig, TemperatureControlStatus,
};

/// Astronomical times are recomputed at most this often unless forced.
const ASTRO_REFRESH_INTERVAL_MS: u64 = 5 * 60 * 1000;

/// The wall clock's UTC offset is polled at most this often.
const TZ_CHECK_INTERVAL_MS: u64 = 60 * 1000;

/// Offset drift below this is treated as jitter, seconds.
const TZ_DRIFT_THRESHOLD_SECONDS: i64 = 36;

/// Write suppression thresholds: PWM as a 0..1 fraction, current in amps.
const PWM_WRITE_EPSILON: f64 = 0.001;
const CURRENT_WRITE_EPSILON: f64 = 0.01;

/// All collaborator handles a tick needs, borrowed for its duration.
pub struct ControllerIo<'a> {
    pub clock: &'a mut dyn WallClock,
    pub pwm: &'a mut dyn PwmDriver,
    pub current: &'a mut dyn CurrentDriver,
    pub fan: &'a mut dyn FanDriver,
    pub probes: &'a mut [Box<dyn TemperatureProbe>],
    pub persistence: &'a mut dyn PersistenceBackend,
    pub events: &'a mut dyn EventSink,
}

/// Last values pushed to one channel's drivers.
#[derive(Debug, Clone, Copy, Default)]
struct PushedState {
    pwm_fraction: Option<f64>,
    current_amps: Option<f64>,
}

/// Per-channel output as last commanded, for status surfaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelOutput {
    pub pwm_percent: f64,
    pub current_amps: f64,
}

/// Owner of the document, the astronomical engine, the interpolator state
/// and the thermal controller.
pub struct LightController {
    doc: PersistedDocument,
    engine: AstroEngine,
    temp: TempControl,
    astro: AstronomicalTimes,
    pwm_scale: f64,
    thermal_emergency: bool,
    force_update: bool,
    astro_refresh_due: bool,
    last_astro_refresh_ms: Option<u64>,
    last_tz_check_ms: Option<u64>,
    last_pushed: Vec<PushedState>,
    last_minute: u16,
    dirty: bool,
    boot_complete: bool,
    pending_save: bool,
}

impl LightController {
    pub fn new(doc: PersistedDocument) -> Self {
        let engine = AstroEngine::new(
            Location::clamped(doc.latitude, doc.longitude),
            doc.timezone_offset_hours,
        );
        let temp = TempControl::new(doc.temperature.clone());
        let num_channels = doc.num_channels;
        let mut controller = Self {
            doc,
            engine,
            temp,
            astro: AstronomicalTimes::default(),
            pwm_scale: 1.0,
            thermal_emergency: false,
            force_update: true,
            astro_refresh_due: true,
            last_astro_refresh_ms: None,
            last_tz_check_ms: None,
            last_pushed: vec![PushedState::default(); num_channels],
            last_minute: 0,
            dirty: false,
            boot_complete: false,
            pending_save: false,
        };
        controller.rebuild_derived_state();
        controller
    }

    pub fn document(&self) -> &PersistedDocument {
        &self.doc
    }

    pub fn astronomical_times(&self) -> &AstronomicalTimes {
        &self.astro
    }

    pub fn in_thermal_emergency(&self) -> bool {
        self.thermal_emergency
    }

    pub fn pwm_scale(&self) -> f64 {
        self.pwm_scale
    }

    /// Last commanded per-channel outputs.
    pub fn channel_outputs(&self) -> Vec<ChannelOutput> {
        self.last_pushed
            .iter()
            .map(|state| ChannelOutput {
                pwm_percent: state.pwm_fraction.unwrap_or(0.0) * 100.0,
                current_amps: state.current_amps.unwrap_or(0.0),
            })
            .collect()
    }

    pub fn temperature_status(&mut self, fan: &mut dyn FanDriver) -> TemperatureControlStatus {
        let rpm = fan.fan_rpm();
        self.temp.status(rpm)
    }

    /// Canonical JSON of the current document.
    pub fn export_json(&self) -> Result<String, DocumentError> {
        self.doc.export_json(&self.astro, self.last_minute)
    }

    /// Load and apply the stored document. Called once before the first
    /// tick; a missing or unreadable document leaves defaults in place.
    pub fn boot(&mut self, persistence: &mut dyn PersistenceBackend) {
        match persistence.load() {
            Ok(Some(bytes)) => match String::from_utf8(bytes) {
                Ok(json) => match self.doc.import_json(&json) {
                    Ok(()) => {
                        info!("configuration restored from persistence");
                        self.rebuild_derived_state();
                    }
                    Err(err) => warn!("stored document rejected, keeping defaults: {err}"),
                },
                Err(_) => warn!("stored document is not valid UTF-8, keeping defaults"),
            },
            Ok(None) => info!("no stored configuration, using defaults"),
            Err(err) => warn!("persistence load failed, using defaults: {err}"),
        }
    }

    /// Mark boot finished and flush a save coalesced during boot. Until this
    /// is called, saves are deferred so a mutation arriving mid-load cannot
    /// race the load into a garbled document.
    pub fn complete_boot(&mut self, io: &mut ControllerIo) {
        self.boot_complete = true;
        if self.pending_save {
            self.pending_save = false;
            self.save_now(io);
        }
    }

    /// One pass of the control loop.
    pub fn tick(&mut self, io: &mut ControllerIo) {
        let now_ms = io.clock.monotonic_ms();
        let reading = io.clock.now();

        // Thermal gate first: nothing downstream may lift a channel while
        // the emergency is latched
        if self.thermal_emergency {
            self.force_all_channels_off(io);
            self.run_temperature(now_ms, io);
            self.maybe_save(io);
            return;
        }

        if reading.valid {
            self.track_timezone(now_ms, &reading);
            self.refresh_astronomy(now_ms, &reading, io.events);
            self.last_minute = reading.minute_of_day();
        }

        if self.doc.enabled && reading.valid {
            let minute = reading.minute_of_day();
            let output = self.evaluate_schedule(minute);
            if let Some(output) = output {
                self.push_outputs(&output.0, &output.1, io);
            }
        }
        // Scheduler disabled: outputs stay untouched so manual control works

        self.run_temperature(now_ms, io);
        self.maybe_save(io);
    }

    /// Manual per-channel output, effective only while the scheduler is
    /// disabled and no emergency is latched.
    pub fn set_manual_output(
        &mut self,
        channel: usize,
        pwm_percent: f64,
        current_amps: f64,
        io: &mut ControllerIo,
    ) -> bool {
        if self.doc.enabled {
            debug!("manual control ignored: scheduler is enabled");
            return false;
        }
        if self.thermal_emergency {
            debug!("manual control ignored: thermal emergency");
            return false;
        }
        let Some(config) = self.doc.channel_configs.get(channel) else {
            warn!("manual control ignored: channel {channel} out of range");
            return false;
        };

        let pwm_fraction = (pwm_percent / 100.0).clamp(0.0, 1.0);
        let amps = current_amps.clamp(0.0, config.max_current);
        io.pwm.set_channel(channel, pwm_fraction, pwm_fraction > 0.0);
        io.current.set_current(channel, amps);
        self.last_pushed[channel] = PushedState {
            pwm_fraction: Some(pwm_fraction),
            current_amps: Some(amps),
        };
        true
    }

    // --- document mutations -------------------------------------------------

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.doc.enabled == enabled {
            return;
        }
        self.doc.enabled = enabled;
        if enabled {
            self.force_update = true;
        }
        self.dirty = true;
    }

    /// Global PWM multiplier in 0..1, applied after interpolation. Runtime
    /// knob, not persisted.
    pub fn set_pwm_scale(&mut self, scale: f64) {
        self.pwm_scale = scale.clamp(0.0, 1.0);
        self.force_update = true;
    }

    pub fn set_location(&mut self, latitude: f64, longitude: f64) -> Result<(), CoordinateError> {
        let location = Location::new(latitude, longitude)?;
        self.doc.latitude = latitude;
        self.doc.longitude = longitude;
        self.engine.set_location(location);
        self.invalidate_astronomy();
        self.dirty = true;
        Ok(())
    }

    pub fn set_projection(&mut self, enabled: bool, shift_hours: i32, shift_minutes: i32) {
        self.doc.astronomical_projection = enabled;
        self.doc.time_shift_hours = shift_hours;
        self.doc.time_shift_minutes = shift_minutes;
        self.engine.set_projection(ProjectionConfig {
            enabled,
            shift_hours,
            shift_minutes,
        });
        self.invalidate_astronomy();
        self.dirty = true;
    }

    pub fn set_timezone(&mut self, name: &str, offset_hours: f64) {
        self.doc.timezone = name.to_string();
        self.doc.timezone_offset_hours = offset_hours.clamp(-14.0, 14.0);
        self.engine
            .set_utc_offset_hours(self.doc.timezone_offset_hours);
        self.invalidate_astronomy();
        self.dirty = true;
    }

    pub fn set_channel_config(&mut self, channel: usize, config: ChannelConfig) -> bool {
        let Some(slot) = self.doc.channel_configs.get_mut(channel) else {
            warn!("channel config ignored: channel {channel} out of range");
            return false;
        };
        *slot = config.sanitized();
        self.force_update = true;
        self.dirty = true;
        true
    }

    pub fn set_temperature_config(&mut self, config: TemperatureControlConfig) {
        self.temp.set_config(config);
        self.doc.temperature = self.temp.config().clone();
        self.dirty = true;
    }

    pub fn set_temperature_enabled(&mut self, enabled: bool, fan: &mut dyn FanDriver) {
        self.temp.set_enabled(enabled, fan);
    }

    pub fn set_moon_simulation(&mut self, mut simulation: MoonSimulation) {
        simulation.resize(self.doc.num_channels);
        self.doc.moon_simulation = simulation;
        self.force_update = true;
        self.dirty = true;
    }

    pub fn add_schedule_point(&mut self, point: SchedulePoint) -> Result<(), ScheduleError> {
        let max_currents = self.doc.max_currents();
        self.doc.schedule.add(point, &max_currents)?;
        self.force_update = true;
        self.dirty = true;
        Ok(())
    }

    pub fn remove_fixed_point(&mut self, time_minutes: u16) -> bool {
        let removed = self.doc.schedule.remove_fixed(time_minutes);
        if removed {
            self.force_update = true;
            self.dirty = true;
        }
        removed
    }

    pub fn remove_dynamic_point(&mut self, time_type: DynamicTimeType, offset_minutes: i32) -> bool {
        let removed = self.doc.schedule.remove_dynamic(time_type, offset_minutes);
        if removed {
            self.force_update = true;
            self.dirty = true;
        }
        removed
    }

    pub fn clear_schedule(&mut self) {
        self.doc.schedule.clear();
        self.force_update = true;
        self.dirty = true;
    }

    /// Replace the schedule with a named preset.
    pub fn apply_preset(&mut self, name: &str) -> Result<(), ScheduleError> {
        let points = preset_points(name, self.doc.num_channels)?;
        let max_currents = self.doc.max_currents();
        let mut schedule = Schedule::new();
        for point in points {
            schedule.add(point, &max_currents)?;
        }
        info!("applied preset {name:?} ({} points)", schedule.len());
        self.doc.schedule = schedule;
        self.force_update = true;
        self.dirty = true;
        Ok(())
    }

    // --- tick internals ----------------------------------------------------

    fn rebuild_derived_state(&mut self) {
        self.engine = AstroEngine::new(
            Location::clamped(self.doc.latitude, self.doc.longitude),
            self.doc.timezone_offset_hours,
        );
        self.engine.set_projection(ProjectionConfig {
            enabled: self.doc.astronomical_projection,
            shift_hours: self.doc.time_shift_hours,
            shift_minutes: self.doc.time_shift_minutes,
        });
        self.temp.set_config(self.doc.temperature.clone());
        self.last_pushed = vec![PushedState::default(); self.doc.num_channels];
        self.invalidate_astronomy();
    }

    fn invalidate_astronomy(&mut self) {
        self.engine.invalidate();
        self.astro_refresh_due = true;
        self.force_update = true;
    }

    fn track_timezone(&mut self, now_ms: u64, reading: &ClockReading) {
        let due = self
            .last_tz_check_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= TZ_CHECK_INTERVAL_MS);
        if !due {
            return;
        }
        self.last_tz_check_ms = Some(now_ms);

        let cached_seconds = (self.doc.timezone_offset_hours * 3600.0).round() as i64;
        let drift = (i64::from(reading.utc_offset_seconds) - cached_seconds).abs();
        if drift > TZ_DRIFT_THRESHOLD_SECONDS {
            let hours = f64::from(reading.utc_offset_seconds) / 3600.0;
            info!(
                "UTC offset drifted to {hours:+.2} h (was {:+.2} h), recomputing astronomy",
                self.doc.timezone_offset_hours
            );
            self.doc.timezone_offset_hours = hours;
            self.engine.set_utc_offset_hours(hours);
            self.invalidate_astronomy();
            self.dirty = true;
        }
    }

    fn refresh_astronomy(&mut self, now_ms: u64, reading: &ClockReading, events: &mut dyn EventSink) {
        let interval_elapsed = self
            .last_astro_refresh_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= ASTRO_REFRESH_INTERVAL_MS);
        if !self.astro_refresh_due && !interval_elapsed {
            return;
        }

        let Some(date) = NaiveDate::from_ymd_opt(reading.year, reading.month, reading.day) else {
            warn!(
                "clock produced impossible date {}-{}-{}",
                reading.year, reading.month, reading.day
            );
            return;
        };

        self.astro = self.engine.times_for_date(date);
        self.doc.schedule.refresh_resolved_times(&self.astro);
        self.last_astro_refresh_ms = Some(now_ms);
        self.astro_refresh_due = false;
        events.notify(ControlEvent::AstronomyRefreshed);
    }

    /// Interpolate, overlay, clamp and scale. Returns per-channel PWM
    /// percents and currents, or `None` when the schedule is empty.
    fn evaluate_schedule(&self, minute: u16) -> Option<(Vec<f64>, Vec<f64>)> {
        let resolved = self.doc.schedule.resolve(&self.astro);
        let mut output = Schedule::interpolate(&resolved, minute, self.doc.num_channels);
        self.doc
            .moon_simulation
            .apply(&mut output, &self.astro, minute);
        if !output.valid {
            return None;
        }

        for (channel, config) in self.doc.channel_configs.iter().enumerate() {
            output.current[channel] = output.current[channel].clamp(0.0, config.max_current);
            output.pwm[channel] = (output.pwm[channel] * self.pwm_scale).clamp(0.0, 100.0);
        }
        Some((output.pwm, output.current))
    }

    fn push_outputs(&mut self, pwm_percents: &[f64], currents: &[f64], io: &mut ControllerIo) {
        for channel in 0..self.doc.num_channels {
            let fraction = (pwm_percents[channel] / 100.0).clamp(0.0, 1.0);
            let amps = currents[channel];
            let pushed = &mut self.last_pushed[channel];

            let pwm_changed = pushed
                .pwm_fraction
                .map_or(true, |last| (fraction - last).abs() >= PWM_WRITE_EPSILON);
            if self.force_update || pwm_changed {
                io.pwm.set_channel(channel, fraction, fraction > 0.0);
                pushed.pwm_fraction = Some(fraction);
            }

            let current_changed = pushed
                .current_amps
                .map_or(true, |last| (amps - last).abs() >= CURRENT_WRITE_EPSILON);
            if self.force_update || current_changed {
                io.current.set_current(channel, amps);
                pushed.current_amps = Some(amps);
            }
        }
        self.force_update = false;
    }

    /// Emergency output: every channel to 0%, 0 A, written unconditionally.
    fn force_all_channels_off(&mut self, io: &mut ControllerIo) {
        for channel in 0..self.doc.num_channels {
            io.pwm.set_channel(channel, 0.0, false);
            io.current.set_current(channel, 0.0);
            self.last_pushed[channel] = PushedState {
                pwm_fraction: Some(0.0),
                current_amps: Some(0.0),
            };
        }
    }

    fn run_temperature(&mut self, now_ms: u64, io: &mut ControllerIo) {
        let readings: Vec<SensorReading> = io.probes.iter_mut().map(|probe| probe.read()).collect();
        match self.temp.update(now_ms, &readings, io.fan) {
            Some(EmergencyTransition::Entered) => {
                self.thermal_emergency = true;
                io.events.notify(ControlEvent::EmergencyEntered);
            }
            Some(EmergencyTransition::Cleared) => {
                self.thermal_emergency = false;
                self.force_update = true;
                io.events.notify(ControlEvent::EmergencyCleared);
            }
            None => {}
        }
    }

    fn maybe_save(&mut self, io: &mut ControllerIo) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        if !self.boot_complete {
            // Coalesce: one save fires when boot completes
            self.pending_save = true;
            return;
        }
        self.save_now(io);
    }

    fn save_now(&mut self, io: &mut ControllerIo) {
        let json = match self.doc.export_json(&self.astro, self.last_minute) {
            Ok(json) => json,
            Err(err) => {
                warn!("document export failed: {err}");
                return;
            }
        };
        let mut bytes = json.into_bytes();
        let capacity = io.persistence.capacity();
        if bytes.len() > capacity {
            log::error!(
                "document is {} bytes, backend holds {capacity}; truncating",
                bytes.len()
            );
            bytes.truncate(capacity);
        }
        match io.persistence.save(&bytes) {
            Ok(()) => {
                debug!("configuration saved ({} bytes)", bytes.len());
                io.events.notify(ControlEvent::ConfigSaved);
            }
            Err(err) => warn!("configuration save failed, will retry on next change: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{
        FixedProbe, ManualClock, MemoryPersistence, RecordingCurrentDriver, RecordingEventSink,
        RecordingFanDriver, RecordingPwmDriver,
    };

    struct Rig {
        clock: ManualClock,
        pwm: RecordingPwmDriver,
        current: RecordingCurrentDriver,
        fan: RecordingFanDriver,
        probes: Vec<Box<dyn TemperatureProbe>>,
        persistence: MemoryPersistence,
        events: RecordingEventSink,
    }

    impl Rig {
        fn new(num_channels: usize) -> Self {
            Self {
                clock: ManualClock::new(2025, 6, 21, -7 * 3600),
                pwm: RecordingPwmDriver::new(num_channels),
                current: RecordingCurrentDriver::new(num_channels),
                fan: RecordingFanDriver::default(),
                probes: vec![Box::new(FixedProbe::new("heatsink", 40.0))],
                persistence: MemoryPersistence::new(32 * 1024),
                events: RecordingEventSink::default(),
            }
        }

        fn io(&mut self) -> ControllerIo<'_> {
            ControllerIo {
                clock: &mut self.clock,
                pwm: &mut self.pwm,
                current: &mut self.current,
                fan: &mut self.fan,
                probes: &mut self.probes,
                persistence: &mut self.persistence,
                events: &mut self.events,
            }
        }

        fn set_probe(&mut self, celsius: f64, last_update_ms: u64) {
            self.probes[0] = Box::new({
                let mut probe = FixedProbe::new("heatsink", celsius);
                probe.last_update_ms = last_update_ms;
                probe
            });
        }
    }

    fn two_channel_controller() -> LightController {
        let mut doc = PersistedDocument::new(2);
        // Match the test clock so timezone tracking stays quiet
        doc.timezone = "America/Los_Angeles".to_string();
        doc.timezone_offset_hours = -7.0;
        doc.latitude = 37.7749;
        doc.longitude = -122.4194;
        doc.channel_configs[0].max_current = 2.0;
        doc.channel_configs[1].max_current = 2.0;
        let limits = doc.max_currents();
        doc.schedule
            .add(
                SchedulePoint::fixed(540, vec![0.0, 0.0], vec![0.0, 0.0]),
                &limits,
            )
            .unwrap();
        doc.schedule
            .add(
                SchedulePoint::fixed(660, vec![100.0, 50.0], vec![2.0, 1.0]),
                &limits,
            )
            .unwrap();
        LightController::new(doc)
    }

    fn booted(mut controller: LightController, rig: &mut Rig) -> LightController {
        controller.boot(&mut rig.persistence);
        controller.complete_boot(&mut rig.io());
        controller
    }

    #[test]
    fn tick_pushes_interpolated_midpoint() {
        let mut rig = Rig::new(2);
        let mut controller = booted(two_channel_controller(), &mut rig);

        rig.clock.set_time(10, 0, 0);
        controller.tick(&mut rig.io());

        assert!((rig.pwm.channels[0].0 - 0.5).abs() < 1e-9);
        assert!(rig.pwm.channels[0].1);
        assert!((rig.pwm.channels[1].0 - 0.25).abs() < 1e-9);
        assert!((rig.current.channels[0] - 1.0).abs() < 1e-9);
        assert!((rig.current.channels[1] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn near_duplicate_writes_are_suppressed() {
        let mut rig = Rig::new(2);
        let mut controller = booted(two_channel_controller(), &mut rig);

        rig.clock.set_time(10, 0, 0);
        controller.tick(&mut rig.io());
        let writes_after_first = rig.pwm.write_count;

        rig.clock.advance_ms(1000);
        controller.tick(&mut rig.io());
        assert_eq!(rig.pwm.write_count, writes_after_first);
        assert_eq!(rig.current.write_count, 2);
    }

    #[test]
    fn pwm_scale_multiplies_output() {
        let mut rig = Rig::new(2);
        let mut controller = booted(two_channel_controller(), &mut rig);
        controller.set_pwm_scale(0.5);

        rig.clock.set_time(11, 0, 0);
        controller.tick(&mut rig.io());
        assert!((rig.pwm.channels[0].0 - 0.5).abs() < 1e-9);
        assert!((rig.pwm.channels[1].0 - 0.25).abs() < 1e-9);
    }

    #[test]
    fn current_clamped_to_channel_limit() {
        let mut rig = Rig::new(2);
        let mut controller = two_channel_controller();
        controller.set_channel_config(
            0,
            ChannelConfig {
                name: "Blue".to_string(),
                rgb_hex: "#0000FF".to_string(),
                max_current: 0.5,
            },
        );
        let mut controller = booted(controller, &mut rig);

        rig.clock.set_time(11, 0, 0);
        controller.tick(&mut rig.io());
        assert!((rig.current.channels[0] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn emergency_forces_zeros_and_recovery_restores() {
        let mut rig = Rig::new(2);
        let mut controller = booted(two_channel_controller(), &mut rig);
        rig.clock.set_time(10, 0, 0);

        // Hot probe: arm, then latch after the delay
        rig.set_probe(70.0, 0);
        controller.tick(&mut rig.io());
        assert!(!controller.in_thermal_emergency());

        rig.clock.advance_ms(15_000);
        rig.set_probe(70.0, 15_000);
        controller.tick(&mut rig.io());
        assert!(controller.in_thermal_emergency());
        assert!(rig.events.events.contains(&ControlEvent::EmergencyEntered));

        // Latched: zeros on every tick even though the schedule says 50%
        rig.clock.advance_ms(1000);
        controller.tick(&mut rig.io());
        assert_eq!(rig.pwm.channels[0], (0.0, false));
        assert_eq!(rig.current.channels[0], 0.0);

        // Recovery: 0.3 * 20 + 0.7 * 70 filters to 55, below the 58 recovery
        // threshold, clearing the latch; the next tick re-pushes the schedule
        rig.clock.advance_ms(1000);
        rig.set_probe(20.0, 17_000);
        controller.tick(&mut rig.io());
        assert!(!controller.in_thermal_emergency());
        assert!(rig.events.events.contains(&ControlEvent::EmergencyCleared));

        rig.clock.advance_ms(1000);
        controller.tick(&mut rig.io());
        assert!(rig.pwm.channels[0].0 > 0.0);
    }

    #[test]
    fn disabled_scheduler_leaves_outputs_and_allows_manual() {
        let mut rig = Rig::new(2);
        let mut controller = booted(two_channel_controller(), &mut rig);
        controller.set_enabled(false);

        rig.clock.set_time(10, 0, 0);
        controller.tick(&mut rig.io());
        assert_eq!(rig.pwm.write_count, 0);

        assert!(controller.set_manual_output(0, 42.0, 0.7, &mut rig.io()));
        assert!((rig.pwm.channels[0].0 - 0.42).abs() < 1e-9);
        assert!((rig.current.channels[0] - 0.7).abs() < 1e-9);

        // Manual clamps current to the channel limit
        assert!(controller.set_manual_output(1, 10.0, 5.0, &mut rig.io()));
        assert!((rig.current.channels[1] - 2.0).abs() < 1e-9);

        // Re-enabling turns manual off
        controller.set_enabled(true);
        assert!(!controller.set_manual_output(0, 10.0, 0.1, &mut rig.io()));
    }

    #[test]
    fn save_deferred_until_boot_complete() {
        let mut rig = Rig::new(2);
        let mut controller = two_channel_controller();

        controller.set_enabled(false);
        rig.clock.set_time(9, 0, 0);
        controller.tick(&mut rig.io());
        assert_eq!(rig.persistence.save_count, 0, "save must wait for boot");

        controller.complete_boot(&mut rig.io());
        assert_eq!(rig.persistence.save_count, 1);
        assert!(rig.events.events.contains(&ControlEvent::ConfigSaved));
    }

    #[test]
    fn mutation_after_boot_saves_once() {
        let mut rig = Rig::new(2);
        let mut controller = booted(two_channel_controller(), &mut rig);
        rig.clock.set_time(9, 0, 0);

        controller.tick(&mut rig.io());
        assert_eq!(rig.persistence.save_count, 0);

        controller.set_enabled(false);
        controller.tick(&mut rig.io());
        assert_eq!(rig.persistence.save_count, 1);

        rig.clock.advance_ms(1000);
        controller.tick(&mut rig.io());
        assert_eq!(rig.persistence.save_count, 1, "no change, no save");
    }

    #[test]
    fn timezone_drift_updates_offset_and_saves() {
        let mut rig = Rig::new(2);
        let mut controller = booted(two_channel_controller(), &mut rig);
        rig.clock.set_time(9, 0, 0);
        controller.tick(&mut rig.io());

        // DST ends: offset moves a full hour
        rig.clock.reading.utc_offset_seconds = -8 * 3600;
        rig.clock.advance_ms(TZ_CHECK_INTERVAL_MS);
        let saves_before = rig.persistence.save_count;
        controller.tick(&mut rig.io());

        assert!((controller.document().timezone_offset_hours - (-8.0)).abs() < 1e-9);
        assert_eq!(rig.persistence.save_count, saves_before + 1);
    }

    #[test]
    fn astronomy_refresh_emits_event_once_per_interval() {
        let mut rig = Rig::new(2);
        let mut controller = booted(two_channel_controller(), &mut rig);
        rig.clock.set_time(9, 0, 0);

        controller.tick(&mut rig.io());
        let refreshes = |events: &RecordingEventSink| {
            events
                .events
                .iter()
                .filter(|e| **e == ControlEvent::AstronomyRefreshed)
                .count()
        };
        assert_eq!(refreshes(&rig.events), 1);

        // Within the 5-minute throttle window: no refresh
        rig.clock.advance_ms(60_000);
        controller.tick(&mut rig.io());
        assert_eq!(refreshes(&rig.events), 1);

        // Config change forces an immediate refresh
        controller
            .set_location(21.3069, -157.8583)
            .unwrap();
        controller.tick(&mut rig.io());
        assert_eq!(refreshes(&rig.events), 2);
    }

    #[test]
    fn preset_installs_and_survives_round_trip() {
        let mut rig = Rig::new(2);
        let mut controller = booted(two_channel_controller(), &mut rig);
        controller.apply_preset("dynamic_sunrise_sunset").unwrap();
        assert_eq!(controller.document().schedule.len(), 5);

        controller.tick(&mut rig.io());
        let json = rig.persistence.stored.clone().expect("document saved");

        let mut restored = PersistedDocument::default();
        restored
            .import_json(std::str::from_utf8(&json).unwrap())
            .unwrap();
        assert_eq!(restored.schedule, controller.document().schedule);
    }

    #[test]
    fn outputs_bounded_for_arbitrary_minutes() {
        let mut rig = Rig::new(2);
        let mut controller = booted(two_channel_controller(), &mut rig);
        controller.set_pwm_scale(0.8);

        for minute in (0..1440).step_by(7) {
            rig.clock
                .set_time(minute as u32 / 60, minute as u32 % 60, 0);
            rig.clock.advance_ms(1000);
            controller.tick(&mut rig.io());
            for channel in 0..2 {
                let (fraction, _) = rig.pwm.channels[channel];
                assert!(
                    (0.0..=0.8).contains(&fraction),
                    "pwm fraction {fraction} out of scaled bounds"
                );
                let amps = rig.current.channels[channel];
                assert!((0.0..=2.0).contains(&amps));
            }
        }
    }
}
