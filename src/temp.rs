//! Thermal management: sensor filtering, fan regulation, and the latched
//! thermal emergency.
//!
//! The fan loop is reverse-acting (hotter than target means more fan), so
//! the regulator runs on the cooling error while the PID itself keeps its
//! direct-acting contract: the measurement fed in is `target - T`, giving a
//! positive PID error and a damping derivative when the fixture heats up.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::hal::{FanDriver, SensorReading};
use crate::pid::PidController;

/// User-tunable temperature control settings.
///
/// Serialized field names follow the persisted document schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureControlConfig {
    #[serde(rename = "target_temp_c")]
    pub target_c: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub min_fan_pwm: f64,
    pub max_fan_pwm: f64,
    pub fan_update_interval_ms: u64,
    #[serde(rename = "emergency_temp_c")]
    pub emergency_c: f64,
    #[serde(rename = "recovery_temp_c")]
    pub recovery_c: f64,
    pub emergency_delay_ms: u64,
    pub sensor_timeout_ms: u64,
    pub temp_filter_alpha: f64,
}

impl Default for TemperatureControlConfig {
    fn default() -> Self {
        Self {
            target_c: 45.0,
            kp: 4.0,
            ki: 0.02,
            kd: 0.0,
            min_fan_pwm: 0.0,
            max_fan_pwm: 100.0,
            fan_update_interval_ms: 5000,
            emergency_c: 65.0,
            recovery_c: 58.0,
            emergency_delay_ms: 10_000,
            sensor_timeout_ms: 30_000,
            temp_filter_alpha: 0.3,
        }
    }
}

impl TemperatureControlConfig {
    /// Clamp fields to sane ranges; recovery must sit below emergency.
    pub fn sanitized(mut self) -> Self {
        self.min_fan_pwm = self.min_fan_pwm.clamp(0.0, 100.0);
        self.max_fan_pwm = self.max_fan_pwm.clamp(self.min_fan_pwm, 100.0);
        self.temp_filter_alpha = self.temp_filter_alpha.clamp(f64::EPSILON, 1.0);
        if self.recovery_c >= self.emergency_c {
            warn!(
                "recovery temperature {} >= emergency {}; pulling recovery down",
                self.recovery_c, self.emergency_c
            );
            self.recovery_c = self.emergency_c - 1.0;
        }
        self
    }
}

/// Derived status snapshot for external surfaces.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureControlStatus {
    pub enabled: bool,
    pub thermal_emergency: bool,
    pub fan_enabled: bool,
    pub current_c: f64,
    pub target_c: f64,
    pub fan_pwm_percent: f64,
    pub fan_rpm: f64,
    pub pid_error: f64,
    pub pid_output: f64,
    pub valid_sensor_count: usize,
    pub total_sensor_count: usize,
}

/// Emergency state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyState {
    Normal,
    Arming { since_ms: u64 },
    Emergency,
}

/// Transition reported back to the control loop, which owns the latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyTransition {
    Entered,
    Cleared,
}

/// Sensor filtering, fan command, and the emergency state machine.
#[derive(Debug)]
pub struct TempControl {
    config: TemperatureControlConfig,
    enabled: bool,
    pid: PidController,
    filtered: Option<f64>,
    state: EmergencyState,
    last_fan_update_ms: Option<u64>,
    fan_pwm: f64,
    fan_enabled: bool,
    valid_sensor_count: usize,
    total_sensor_count: usize,
    last_error: f64,
    last_output: f64,
}

impl TempControl {
    /// Fan is considered running above this PWM percentage.
    const FAN_ON_THRESHOLD: f64 = 0.1;

    pub fn new(config: TemperatureControlConfig) -> Self {
        let config = config.sanitized();
        let mut pid = PidController::new(
            config.kp,
            config.ki,
            config.kd,
            config.min_fan_pwm,
            config.max_fan_pwm,
        );
        pid.set_target(0.0);
        Self {
            config,
            enabled: true,
            pid,
            filtered: None,
            state: EmergencyState::Normal,
            last_fan_update_ms: None,
            fan_pwm: 0.0,
            fan_enabled: false,
            valid_sensor_count: 0,
            total_sensor_count: 0,
            last_error: 0.0,
            last_output: 0.0,
        }
    }

    pub fn config(&self) -> &TemperatureControlConfig {
        &self.config
    }

    /// Replace the configuration, retuning the regulator in place.
    pub fn set_config(&mut self, config: TemperatureControlConfig) {
        let config = config.sanitized();
        self.pid.set_tunings(config.kp, config.ki, config.kd);
        self.pid.set_limits(config.min_fan_pwm, config.max_fan_pwm);
        self.config = config;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling forces the fan off; the emergency state is left as-is.
    pub fn set_enabled(&mut self, enabled: bool, fan: &mut dyn FanDriver) {
        self.enabled = enabled;
        if !enabled {
            self.fan_pwm = 0.0;
            self.fan_enabled = false;
            fan.set_fan_pwm(0.0);
            fan.set_fan_enabled(false);
        }
    }

    pub fn in_emergency(&self) -> bool {
        self.state == EmergencyState::Emergency
    }

    pub fn filtered_temperature(&self) -> Option<f64> {
        self.filtered
    }

    /// One control tick: ingest readings, filter, evaluate the emergency
    /// machine, and (outside emergency) run the fan regulator.
    pub fn update(
        &mut self,
        now_ms: u64,
        readings: &[SensorReading],
        fan: &mut dyn FanDriver,
    ) -> Option<EmergencyTransition> {
        self.total_sensor_count = readings.len();
        let valid: Vec<f64> = readings
            .iter()
            .filter(|r| r.valid && now_ms.saturating_sub(r.last_update_ms) <= self.config.sensor_timeout_ms)
            .map(|r| r.celsius)
            .collect();
        self.valid_sensor_count = valid.len();

        if !valid.is_empty() {
            let mean = valid.iter().sum::<f64>() / valid.len() as f64;
            let alpha = self.config.temp_filter_alpha;
            self.filtered = Some(match self.filtered {
                Some(previous) => alpha * mean + (1.0 - alpha) * previous,
                None => mean,
            });
        }

        // No reading ever received: nothing to regulate on
        let t_filt = self.filtered?;

        let transition = self.step_emergency(now_ms, t_filt, fan);

        if self.state != EmergencyState::Emergency && self.enabled {
            let due = match self.last_fan_update_ms {
                Some(last) => now_ms.saturating_sub(last) >= self.config.fan_update_interval_ms,
                None => true,
            };
            if due {
                let dt_ms = self
                    .last_fan_update_ms
                    .map(|last| now_ms.saturating_sub(last))
                    .unwrap_or(self.config.fan_update_interval_ms);
                // Reverse-acting: feed target - T so the PID error is T - target
                let output = self.pid.compute(self.config.target_c - t_filt, dt_ms);
                self.last_error = t_filt - self.config.target_c;
                self.last_output = output;
                self.fan_pwm = output;
                self.fan_enabled = output > Self::FAN_ON_THRESHOLD;
                fan.set_fan_pwm(self.fan_pwm);
                fan.set_fan_enabled(self.fan_enabled);
                self.last_fan_update_ms = Some(now_ms);
            }
        }

        transition
    }

    fn step_emergency(
        &mut self,
        now_ms: u64,
        t_filt: f64,
        fan: &mut dyn FanDriver,
    ) -> Option<EmergencyTransition> {
        match self.state {
            EmergencyState::Normal => {
                if t_filt >= self.config.emergency_c {
                    info!(
                        "temperature {t_filt:.1}C at emergency threshold, arming ({} ms delay)",
                        self.config.emergency_delay_ms
                    );
                    self.state = EmergencyState::Arming { since_ms: now_ms };
                }
                None
            }
            EmergencyState::Arming { since_ms } => {
                if t_filt < self.config.emergency_c {
                    info!("temperature {t_filt:.1}C back below threshold, disarming");
                    self.state = EmergencyState::Normal;
                    None
                } else if now_ms.saturating_sub(since_ms) >= self.config.emergency_delay_ms {
                    warn!("thermal emergency: {t_filt:.1}C, forcing fan to maximum");
                    self.state = EmergencyState::Emergency;
                    self.fan_pwm = self.config.max_fan_pwm;
                    self.fan_enabled = true;
                    fan.set_fan_pwm(self.fan_pwm);
                    fan.set_fan_enabled(true);
                    Some(EmergencyTransition::Entered)
                } else {
                    None
                }
            }
            EmergencyState::Emergency => {
                if t_filt <= self.config.recovery_c {
                    info!("temperature {t_filt:.1}C at recovery threshold, clearing emergency");
                    self.state = EmergencyState::Normal;
                    self.pid.reset();
                    Some(EmergencyTransition::Cleared)
                } else {
                    None
                }
            }
        }
    }

    pub fn status(&self, fan_rpm: f64) -> TemperatureControlStatus {
        TemperatureControlStatus {
            enabled: self.enabled,
            thermal_emergency: self.in_emergency(),
            fan_enabled: self.fan_enabled,
            current_c: self.filtered.unwrap_or(0.0),
            target_c: self.config.target_c,
            fan_pwm_percent: self.fan_pwm,
            fan_rpm,
            pid_error: self.last_error,
            pid_output: self.last_output,
            valid_sensor_count: self.valid_sensor_count,
            total_sensor_count: self.total_sensor_count,
        }
    }
}
