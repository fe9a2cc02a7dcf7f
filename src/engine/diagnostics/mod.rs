// ABOUTME: Run diagnostics - sanity checks, intensity history, and the final summary
// ABOUTME: The summary is emitted even when a run dies; emergency halt is an absorbing state

use tracing::{error, info};

use crate::engine::core::field::Field3;
use crate::engine::error::SimulationError;

/// Aggregated diagnostics for one simulation run.
#[derive(Clone, Debug, Default)]
pub struct SimulationDiagnostics {
    /// Sparse (frame, max wind m/s) samples.
    pub max_wind_history: Vec<(u64, f64)>,
    pub peak_wind_ms: f64,
    pub peak_theta_prime_k: f64,
    /// Total condensed moisture, kg/kg summed over cells and steps.
    pub total_condensed: f64,
    pub track_distance_km: f64,
    pub fetch_reversions: u32,
    pub emergency_halted: bool,
}

impl SimulationDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_wind(&mut self, frame: u64, max_wind_ms: f64) {
        self.max_wind_history.push((frame, max_wind_ms));
        self.peak_wind_ms = self.peak_wind_ms.max(max_wind_ms);
    }

    pub fn record_theta(&mut self, theta_max_abs: f64) {
        self.peak_theta_prime_k = self.peak_theta_prime_k.max(theta_max_abs);
    }

    pub fn add_condensation(&mut self, condensed: f64) {
        self.total_condensed += condensed;
    }

    pub fn add_track_leg(&mut self, km: f64) {
        self.track_distance_km += km;
    }

    pub fn note_fetch_reversion(&mut self) {
        self.fetch_reversions += 1;
    }

    /// NaN/Inf and theta-bound check over the prognostic fields. A failure
    /// here is fatal and flips the absorbing halt state.
    pub fn sanity_check(
        &mut self,
        frame: u64,
        fields: &[(&'static str, &Field3)],
        theta_p: &Field3,
        theta_min: f64,
        theta_max: f64,
    ) -> Result<(), SimulationError> {
        for (name, field) in fields {
            if !field.is_finite() {
                self.emergency_halted = true;
                return Err(SimulationError::NonFinite { field: name, frame });
            }
        }
        let observed_min = theta_p.min();
        let observed_max = theta_p.max();
        if observed_min < theta_min || observed_max > theta_max {
            self.emergency_halted = true;
            return Err(SimulationError::ThetaOutOfBounds {
                frame,
                observed_min,
                observed_max,
                bound_min: theta_min,
                bound_max: theta_max,
            });
        }
        Ok(())
    }

    pub fn summary(&self, frames_completed: u64, simulated_hours: f64) -> RunSummary {
        RunSummary {
            frames_completed,
            simulated_hours,
            peak_wind_ms: self.peak_wind_ms,
            peak_theta_prime_k: self.peak_theta_prime_k,
            total_condensed: self.total_condensed,
            track_distance_km: self.track_distance_km,
            fetch_reversions: self.fetch_reversions,
            emergency_halted: self.emergency_halted,
        }
    }
}

/// Final run summary, surfaced on clean exit and on fatal error alike.
#[derive(Clone, Copy, Debug)]
pub struct RunSummary {
    pub frames_completed: u64,
    pub simulated_hours: f64,
    pub peak_wind_ms: f64,
    pub peak_theta_prime_k: f64,
    pub total_condensed: f64,
    pub track_distance_km: f64,
    pub fetch_reversions: u32,
    pub emergency_halted: bool,
}

impl RunSummary {
    pub fn emit(&self) {
        if self.emergency_halted {
            error!(
                frames = self.frames_completed,
                simulated_hours = format!("{:.1}", self.simulated_hours),
                "simulation halted by sanity check"
            );
        }
        info!(
            frames = self.frames_completed,
            simulated_hours = format!("{:.1}", self.simulated_hours),
            peak_wind_ms = format!("{:.1}", self.peak_wind_ms),
            peak_theta_prime_k = format!("{:.1}", self.peak_theta_prime_k),
            total_condensed = format!("{:.3e}", self.total_condensed),
            track_distance_km = format!("{:.0}", self.track_distance_km),
            fetch_reversions = self.fetch_reversions,
            "run summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanity_check_passes_clean_fields() {
        let mut diag = SimulationDiagnostics::new();
        let f = Field3::new(4, 4, 4, 1.0);
        let theta = Field3::new(4, 4, 4, 2.0);
        assert!(
            diag.sanity_check(10, &[("u", &f)], &theta, -50.0, 50.0)
                .is_ok()
        );
        assert!(!diag.emergency_halted);
    }

    #[test]
    fn test_sanity_check_catches_nan() {
        let mut diag = SimulationDiagnostics::new();
        let mut f = Field3::new(4, 4, 4, 1.0);
        f.set(1, 1, 1, f64::NAN);
        let theta = Field3::zeros(4, 4, 4);
        let err = diag
            .sanity_check(10, &[("w", &f)], &theta, -50.0, 50.0)
            .unwrap_err();
        assert!(matches!(err, SimulationError::NonFinite { field: "w", .. }));
        assert!(diag.emergency_halted);
    }

    #[test]
    fn test_sanity_check_catches_theta_bound() {
        let mut diag = SimulationDiagnostics::new();
        let f = Field3::zeros(4, 4, 4);
        let mut theta = Field3::zeros(4, 4, 4);
        theta.set(0, 0, 0, 75.0);
        let err = diag
            .sanity_check(7, &[("u", &f)], &theta, -50.0, 50.0)
            .unwrap_err();
        assert!(matches!(err, SimulationError::ThetaOutOfBounds { .. }));
        assert!(diag.emergency_halted);
    }

    #[test]
    fn test_peaks_accumulate() {
        let mut diag = SimulationDiagnostics::new();
        diag.record_wind(0, 20.0);
        diag.record_wind(100, 45.0);
        diag.record_wind(200, 30.0);
        diag.record_theta(12.0);
        diag.add_track_leg(55.0);
        diag.add_track_leg(45.0);
        let summary = diag.summary(200, 0.5);
        assert_eq!(summary.peak_wind_ms, 45.0);
        assert_eq!(summary.peak_theta_prime_k, 12.0);
        assert_eq!(summary.track_distance_km, 100.0);
        assert!(!summary.emergency_halted);
    }
}
