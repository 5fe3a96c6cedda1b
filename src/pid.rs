//! Bounded PID regulator.
//!
//! Anti-windup by integral clamping, derivative on measurement so setpoint
//! steps produce no kick. Output is always inside the configured limits.

/// Standalone PID controller with bounded output.
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    target: f64,
    out_min: f64,
    out_max: f64,
    integral: f64,
    last_measurement: f64,
    last_output: f64,
    first_run: bool,
}

impl PidController {
    pub fn new(kp: f64, ki: f64, kd: f64, out_min: f64, out_max: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            target: 0.0,
            out_min,
            out_max,
            integral: 0.0,
            last_measurement: 0.0,
            last_output: out_min.min(out_max),
            first_run: true,
        }
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn set_target(&mut self, target: f64) {
        self.target = target;
    }

    pub fn set_tunings(&mut self, kp: f64, ki: f64, kd: f64) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
    }

    /// Change the output limits. The integral and the last output are
    /// reclamped immediately so the next compute starts inside the new range.
    pub fn set_limits(&mut self, out_min: f64, out_max: f64) {
        self.out_min = out_min;
        self.out_max = out_max;
        self.clamp_integral();
        self.last_output = self.last_output.clamp(out_min, out_max);
    }

    pub fn last_output(&self) -> f64 {
        self.last_output
    }

    /// One regulator step over `dt_ms`. A zero interval returns the previous
    /// output unchanged.
    pub fn compute(&mut self, measurement: f64, dt_ms: u64) -> f64 {
        if dt_ms == 0 {
            return self.last_output;
        }
        let dt_s = dt_ms as f64 / 1000.0;
        let error = self.target - measurement;

        self.integral += error * dt_s;
        self.clamp_integral();

        let derivative = if self.first_run {
            0.0
        } else {
            -(measurement - self.last_measurement) / dt_s
        };

        let output = (self.kp * error + self.ki * self.integral + self.kd * derivative)
            .clamp(self.out_min, self.out_max);

        self.last_measurement = measurement;
        self.last_output = output;
        self.first_run = false;
        output
    }

    /// Clear accumulated state; the next compute behaves like the first.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_measurement = 0.0;
        self.last_output = self.out_min.min(self.out_max);
        self.first_run = true;
    }

    fn clamp_integral(&mut self) {
        if self.ki > 0.0 {
            let limit = (self.out_max - self.out_min) / self.ki;
            self.integral = self.integral.clamp(-limit, limit);
        }
    }
}
