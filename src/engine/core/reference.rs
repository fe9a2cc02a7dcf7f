// ABOUTME: Fixed reference state - theta0(z), P(z), and moisture reference profiles
// ABOUTME: The thermodynamic pipeline prognoses perturbations against these stably stratified profiles

use crate::engine::error::SimulationError;

/// Reference pressure for potential temperature, Pa.
pub const P0: f64 = 1.0e5;
/// Gas constant for dry air, J/(kg K).
pub const R_D: f64 = 287.04;
/// Specific heat of dry air at constant pressure, J/(kg K).
pub const C_P: f64 = 1004.5;
/// Poisson exponent R_d / C_p.
pub const KAPPA: f64 = R_D / C_P;
/// Latent heat of vaporization, J/kg.
pub const L_V: f64 = 2.5e6;
/// Gravitational acceleration, m/s^2.
pub const G: f64 = 9.81;
/// Ratio of gas constants (epsilon) for the Magnus saturation formula.
pub const EPSILON: f64 = 0.622;

/// Parameters defining the reference profiles.
#[derive(Clone, Debug)]
pub struct ReferenceParameters {
    /// Surface potential temperature, K.
    pub theta_surface: f64,
    /// Potential temperature lapse rate, K/km.
    pub gamma_theta: f64,
    /// Pressure scale height, m.
    pub scale_height: f64,
    /// Surface specific humidity for the moisture reference, kg/kg.
    pub base_humidity: f64,
    /// Moisture reference scale height, m.
    pub humidity_scale_height: f64,
}

impl Default for ReferenceParameters {
    fn default() -> Self {
        Self {
            theta_surface: 300.0,
            gamma_theta: 4.0,
            scale_height: 8500.0,
            base_humidity: 0.018,
            humidity_scale_height: 2500.0,
        }
    }
}

/// Precomputed reference profiles on the vertical grid.
///
/// theta0 is strictly increasing with height (static stability); the
/// constructor refuses parameters that would violate that.
#[derive(Clone, Debug)]
pub struct ReferenceState {
    params: ReferenceParameters,
    theta0: Vec<f64>,
    pressure: Vec<f64>,
    q_ref: Vec<f64>,
    dtheta0_dz: f64,
}

impl ReferenceState {
    pub fn new(
        params: ReferenceParameters,
        nz: usize,
        dz_phys: f64,
    ) -> Result<Self, SimulationError> {
        if params.gamma_theta <= 0.0 || !params.gamma_theta.is_finite() {
            return Err(SimulationError::Config(format!(
                "gamma_theta must be positive for a stably stratified reference, got {}",
                params.gamma_theta
            )));
        }
        if params.theta_surface <= 0.0
            || params.scale_height <= 0.0
            || params.base_humidity < 0.0
            || !params.theta_surface.is_finite()
            || !params.scale_height.is_finite()
        {
            return Err(SimulationError::Config(
                "reference state parameters must be finite and physical".to_string(),
            ));
        }

        let dtheta0_dz = params.gamma_theta / 1000.0;
        let mut theta0 = Vec::with_capacity(nz);
        let mut pressure = Vec::with_capacity(nz);
        let mut q_ref = Vec::with_capacity(nz);
        for k in 0..nz {
            let z = k as f64 * dz_phys;
            theta0.push(params.theta_surface + dtheta0_dz * z);
            pressure.push(P0 * (-z / params.scale_height).exp());
            q_ref.push(params.base_humidity * (-z / params.humidity_scale_height).exp());
        }

        Ok(Self {
            params,
            theta0,
            pressure,
            q_ref,
            dtheta0_dz,
        })
    }

    #[inline]
    pub fn theta0(&self, k: usize) -> f64 {
        self.theta0[k]
    }

    #[inline]
    pub fn pressure(&self, k: usize) -> f64 {
        self.pressure[k]
    }

    #[inline]
    pub fn q_ref(&self, k: usize) -> f64 {
        self.q_ref[k]
    }

    #[inline]
    pub fn dtheta0_dz(&self) -> f64 {
        self.dtheta0_dz
    }

    pub fn params(&self) -> &ReferenceParameters {
        &self.params
    }

    /// Absolute temperature in K from potential temperature and pressure.
    #[inline]
    pub fn temperature_k(theta: f64, pressure: f64) -> f64 {
        theta * (pressure / P0).powf(KAPPA)
    }

    /// Potential temperature from absolute temperature and pressure.
    #[inline]
    pub fn theta_from_temperature_k(t_k: f64, pressure: f64) -> f64 {
        t_k * (P0 / pressure).powf(KAPPA)
    }

    /// Diagnostic temperature in Celsius at level k for a given perturbation.
    #[inline]
    pub fn temperature_c(&self, theta_prime: f64, k: usize) -> f64 {
        Self::temperature_k(self.theta0[k] + theta_prime, self.pressure[k]) - 273.15
    }

    /// Saturation specific humidity via the Magnus formula, kg/kg.
    #[inline]
    pub fn q_saturation(t_c: f64, pressure: f64) -> f64 {
        let e_sat = 610.78 * (17.27 * t_c / (t_c + 237.3)).exp();
        EPSILON * e_sat / pressure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> ReferenceState {
        ReferenceState::new(ReferenceParameters::default(), 64, 250.0).unwrap()
    }

    #[test]
    fn test_theta0_strictly_increasing() {
        let r = reference();
        for k in 1..64 {
            assert!(r.theta0(k) > r.theta0(k - 1));
        }
        assert!((r.theta0(0) - 300.0).abs() < 1e-12);
        // 4 K/km over 250 m spacing
        assert!((r.theta0(4) - 301.0).abs() < 1e-9);
    }

    #[test]
    fn test_pressure_exponential_decay() {
        let r = reference();
        assert!((r.pressure(0) - P0).abs() < 1e-9);
        let z: f64 = 34.0 * 250.0; // 8500 m, one scale height
        let expected = P0 * (-z / 8500.0).exp();
        assert!((r.pressure(34) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_temperature_theta_round_trip() {
        for &p in &[1.0e5, 8.0e4, 5.0e4, 2.5e4] {
            for &t in &[220.0, 273.15, 300.0, 310.0] {
                let theta = ReferenceState::theta_from_temperature_k(t, p);
                let back = ReferenceState::temperature_k(theta, p);
                assert!((back - t).abs() < 1e-9, "round trip failed at T={t}, p={p}");
            }
        }
    }

    #[test]
    fn test_saturation_humidity_magnitude() {
        // ~28 C at the surface should give roughly 24 g/kg
        let q = ReferenceState::q_saturation(28.0, P0);
        assert!(q > 0.020 && q < 0.028, "q_sat(28C) = {q}");
        // Colder air holds less moisture
        assert!(ReferenceState::q_saturation(5.0, P0) < q / 3.0);
    }

    #[test]
    fn test_rejects_unstable_reference() {
        let params = ReferenceParameters {
            gamma_theta: -1.0,
            ..Default::default()
        };
        assert!(ReferenceState::new(params, 64, 250.0).is_err());
    }
}
