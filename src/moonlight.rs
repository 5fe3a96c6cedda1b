//! Moonlight simulation overlay.
//!
//! When the scene is dark and the moon is up, the overlay replaces the
//! interpolated output with a per-channel moonlight base, optionally scaled
//! by the lunar phase.

use serde::{Deserialize, Serialize};

use crate::astro::AstronomicalTimes;
use crate::schedule::ScheduleOutput;

/// The schedule counts as dark when every channel is below this PWM percent.
const DARK_PWM_THRESHOLD: f64 = 0.1;

/// Moonlight overlay settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoonSimulation {
    pub enabled: bool,
    pub phase_scaling_pwm: bool,
    pub phase_scaling_current: bool,
    /// PWM percent emitted per channel while the overlay is active
    pub base_intensity: Vec<f64>,
    /// Current limit per channel while the overlay is active, amps
    pub base_current: Vec<f64>,
    /// Channels driven by the overlay never drop below this current, amps
    pub min_current_threshold: f64,
}

impl MoonSimulation {
    pub fn new(num_channels: usize) -> Self {
        Self {
            enabled: false,
            phase_scaling_pwm: true,
            phase_scaling_current: false,
            base_intensity: vec![0.0; num_channels],
            base_current: vec![0.0; num_channels],
            min_current_threshold: 0.05,
        }
    }

    /// Resize channel vectors after a channel-count change, padding with
    /// zeros.
    pub fn resize(&mut self, num_channels: usize) {
        self.base_intensity.resize(num_channels, 0.0);
        self.base_current.resize(num_channels, 0.0);
    }

    /// Replace `output` with moonlight when all gates hold. Returns whether
    /// the overlay fired.
    ///
    /// Gates: overlay enabled, both sides of the astronomical table valid,
    /// moon above the horizon at `minute`, and every interpolated channel
    /// effectively dark.
    pub fn apply(
        &self,
        output: &mut ScheduleOutput,
        astro: &AstronomicalTimes,
        minute: u16,
    ) -> bool {
        if !self.enabled || !astro.valid || !astro.moon_valid {
            return false;
        }
        if !moon_visible(astro, minute) {
            return false;
        }
        if output
            .pwm
            .iter()
            .any(|&pwm| pwm >= DARK_PWM_THRESHOLD)
        {
            return false;
        }

        let factor = phase_factor(astro.moon_phase);
        for (channel, pwm) in output.pwm.iter_mut().enumerate() {
            let base = self.base_intensity.get(channel).copied().unwrap_or(0.0);
            *pwm = if self.phase_scaling_pwm {
                base * factor
            } else {
                base
            };
        }
        for (channel, current) in output.current.iter_mut().enumerate() {
            let base = self.base_current.get(channel).copied().unwrap_or(0.0);
            let mut amps = if self.phase_scaling_current {
                base * factor
            } else {
                base
            };
            // Channels that are emitting get held above the dropout floor
            if output.pwm[channel] > 0.0 && amps < self.min_current_threshold {
                amps = self.min_current_threshold;
            }
            *current = amps;
        }
        output.valid = true;
        true
    }
}

/// Phase brightness factor: 1.0 at full moon, 0.0 at new moon.
pub fn phase_factor(phase: f64) -> f64 {
    (1.0 - (phase - 0.5).abs() * 2.0).clamp(0.0, 1.0)
}

/// Whether the moon is up at `minute`, handling rise/set pairs that straddle
/// midnight.
pub fn moon_visible(astro: &AstronomicalTimes, minute: u16) -> bool {
    if astro.moonrise < astro.moonset {
        (astro.moonrise..=astro.moonset).contains(&minute)
    } else {
        minute >= astro.moonrise || minute <= astro.moonset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn astro_with_moon() -> AstronomicalTimes {
        AstronomicalTimes {
            moonrise: 1200,
            moonset: 360,
            moon_phase: 0.5,
            valid: true,
            moon_valid: true,
            ..Default::default()
        }
    }

    fn dark_output() -> ScheduleOutput {
        ScheduleOutput {
            pwm: vec![0.0, 0.05],
            current: vec![0.0, 0.0],
            valid: true,
        }
    }

    fn simulation() -> MoonSimulation {
        MoonSimulation {
            enabled: true,
            base_intensity: vec![2.0, 1.0],
            base_current: vec![0.1, 0.02],
            ..MoonSimulation::new(2)
        }
    }

    #[test]
    fn fires_when_dark_and_moon_up() {
        let mut output = dark_output();
        assert!(simulation().apply(&mut output, &astro_with_moon(), 1300));
        assert_eq!(output.pwm, vec![2.0, 1.0]);
        // Emitting channels are raised to the current floor
        assert_eq!(output.current, vec![0.1, 0.05]);
    }

    #[test]
    fn phase_scales_pwm() {
        let mut astro = astro_with_moon();
        astro.moon_phase = 0.25; // half brightness
        let mut output = dark_output();
        assert!(simulation().apply(&mut output, &astro, 1300));
        assert_eq!(output.pwm, vec![1.0, 0.5]);
    }

    #[test]
    fn does_not_fire_when_scene_lit() {
        let mut output = ScheduleOutput {
            pwm: vec![0.0, 25.0],
            current: vec![0.0, 0.5],
            valid: true,
        };
        assert!(!simulation().apply(&mut output, &astro_with_moon(), 1300));
        assert_eq!(output.pwm, vec![0.0, 25.0]);
    }

    #[test]
    fn does_not_fire_when_moon_down() {
        let mut output = dark_output();
        assert!(!simulation().apply(&mut output, &astro_with_moon(), 720));
    }

    #[test]
    fn does_not_fire_when_disabled_or_invalid() {
        let mut output = dark_output();
        let mut sim = simulation();
        sim.enabled = false;
        assert!(!sim.apply(&mut output, &astro_with_moon(), 1300));

        let sim = simulation();
        let mut astro = astro_with_moon();
        astro.moon_valid = false;
        assert!(!sim.apply(&mut output, &astro, 1300));
    }

    #[test]
    fn visibility_handles_both_orderings() {
        let wrapped = astro_with_moon(); // rise 20:00, set 06:00
        assert!(moon_visible(&wrapped, 0));
        assert!(moon_visible(&wrapped, 1439));
        assert!(!moon_visible(&wrapped, 720));

        let same_day = AstronomicalTimes {
            moonrise: 300,
            moonset: 900,
            ..astro_with_moon()
        };
        assert!(moon_visible(&same_day, 600));
        assert!(!moon_visible(&same_day, 1000));
    }

    #[test]
    fn phase_factor_peaks_at_full_moon() {
        assert_eq!(phase_factor(0.5), 1.0);
        assert_eq!(phase_factor(0.0), 0.0);
        assert_eq!(phase_factor(1.0), 0.0);
        assert_eq!(phase_factor(0.25), 0.5);
    }
}
