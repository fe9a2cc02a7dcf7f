// ABOUTME: Potential-temperature perturbation pipeline - stratification, moist adjustment, buoyancy, sinks
// ABOUTME: Prognoses theta' against the fixed reference profiles; pass order is contractual (see sim.rs)

use crate::engine::core::field::Field3;
use crate::engine::core::grid::GridSpec;
use crate::engine::core::reference::{C_P, G, L_V, ReferenceState};
use crate::engine::physics::spectral::SpectralSolver;

/// Betts-Miller relaxed convective adjustment parameters.
#[derive(Clone, Copy, Debug)]
pub struct BettsMillerParameters {
    /// Relaxation timescale, s.
    pub tau_s: f64,
    /// Reference profile target relative humidity.
    pub reference_rh: f64,
    /// Taper start height, m: zero tendency below.
    pub taper_start_m: f64,
    /// Taper full height, m: full tendency above.
    pub taper_full_m: f64,
    /// Taper shape exponent.
    pub taper_power: f64,
}

impl Default for BettsMillerParameters {
    fn default() -> Self {
        Self {
            tau_s: 900.0,
            reference_rh: 0.90,
            taper_start_m: 200.0,
            taper_full_m: 2200.0,
            taper_power: 1.0,
        }
    }
}

/// Newtonian radiative cooling parameters.
#[derive(Clone, Copy, Debug)]
pub struct RadiativeCoolingParameters {
    pub tau_base_s: f64,
    /// When set, tau shortens with |theta'| down to tau_min.
    pub dynamic: bool,
    pub tau_min_s: f64,
    pub theta_scale_k: f64,
}

/// Thermodynamic safety limits, active only when firewalls are enabled.
#[derive(Clone, Copy, Debug)]
pub struct FirewallParameters {
    /// Soft tanh cap on buoyancy acceleration, m/s^2.
    pub buoyancy_cap: f64,
    /// Hard cap on |w|, m/s.
    pub max_updraft_ms: f64,
}

/// Full parameter set for the theta' pipeline.
#[derive(Clone, Copy, Debug)]
pub struct ThermoParameters {
    /// Minimum moist factor in saturated updrafts.
    pub moist_floor: f64,
    /// Apply moist stratification reduction only where w > 0.
    pub updraft_only_moist: bool,
    /// Fraction of latent heat retained as theta' warming.
    pub precip_efficiency: f64,
    /// None selects instant saturation adjustment.
    pub betts_miller: Option<BettsMillerParameters>,
    /// Surface saturation cap as a multiple of q_sat; None disables warm rain.
    pub warm_rain_cap: Option<f64>,
    pub radiative: Option<RadiativeCoolingParameters>,
    pub mean_removal: bool,
    /// (radius_km, tau_s) for far-field theta' relaxation.
    pub environment_relax: Option<(f64, f64)>,
    /// Diffusivity for selective cold-anomaly smoothing.
    pub cold_diffusion_strength: Option<f64>,
    pub firewalls: Option<FirewallParameters>,
    /// Specific humidity floor, kg/kg.
    pub moisture_floor: f64,
    /// Timescale for the poleward theta' relaxation, s.
    pub high_lat_tau_s: f64,
    /// Far-field moisture relaxation timescale, s.
    pub moisture_relax_tau_s: f64,
}

impl Default for ThermoParameters {
    fn default() -> Self {
        Self {
            moist_floor: 0.3,
            updraft_only_moist: false,
            precip_efficiency: 0.25,
            betts_miller: None,
            warm_rain_cap: None,
            radiative: None,
            mean_removal: false,
            environment_relax: None,
            cold_diffusion_strength: None,
            firewalls: None,
            moisture_floor: 1.0e-4,
            high_lat_tau_s: 6.0 * 3600.0,
            moisture_relax_tau_s: 12.0 * 3600.0,
        }
    }
}

/// The theta' evolution pipeline. Stateless apart from its parameters; the
/// simulation drives the passes in the contractual order.
pub struct ThermodynamicPipeline {
    params: ThermoParameters,
}

impl ThermodynamicPipeline {
    pub fn new(params: ThermoParameters) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ThermoParameters {
        &self.params
    }

    /// Stratification source: d(theta')/dt = -w d(theta0)/dz, reduced in
    /// saturated air where latent heating partially offsets adiabatic
    /// cooling.
    pub fn stratification(
        &self,
        theta_p: &mut Field3,
        w: &Field3,
        t_c: &Field3,
        q: &Field3,
        reference: &ReferenceState,
        grid: &GridSpec,
        dt_seconds: f64,
    ) {
        let dtheta0_dz = reference.dtheta0_dz();
        for k in 0..grid.nz {
            let pressure = reference.pressure(k);
            for j in 0..grid.ny {
                for i in 0..grid.nx {
                    let w_phys = w.get(i, j, k) * grid.u_char;
                    let temp_c = t_c.get(i, j, k);
                    let q_sat = ReferenceState::q_saturation(temp_c, pressure);
                    let rh = if q_sat > 0.0 { q.get(i, j, k) / q_sat } else { 0.0 };
                    let saturation_blend = ((rh - 0.80) / (0.95 - 0.80)).clamp(0.0, 1.0);
                    let moist_factor =
                        (0.4 + 0.003 * temp_c).clamp(self.params.moist_floor, 0.7);
                    let mut effective = 1.0 - saturation_blend * (1.0 - moist_factor);
                    if self.params.updraft_only_moist && w_phys <= 0.0 {
                        effective = 1.0;
                    }
                    let dtheta = -w_phys * dtheta0_dz * effective * dt_seconds;
                    theta_p.set(i, j, k, theta_p.get(i, j, k) + dtheta);
                }
            }
        }
    }

    /// Moist adjustment; returns total condensed moisture (kg/kg summed
    /// over cells) for diagnostics.
    pub fn moist_adjustment(
        &self,
        theta_p: &mut Field3,
        q: &mut Field3,
        reference: &ReferenceState,
        grid: &GridSpec,
        dt_seconds: f64,
    ) -> f64 {
        match self.params.betts_miller {
            Some(bm) => self.betts_miller(theta_p, q, reference, grid, dt_seconds, &bm),
            None => self.instant_saturation(theta_p, q, reference, grid),
        }
    }

    /// Instant saturation adjustment via the Magnus formula.
    fn instant_saturation(
        &self,
        theta_p: &mut Field3,
        q: &mut Field3,
        reference: &ReferenceState,
        grid: &GridSpec,
    ) -> f64 {
        let eta = self.params.precip_efficiency;
        let mut condensed = 0.0;
        for k in 0..grid.nz {
            let pressure = reference.pressure(k);
            let theta0 = reference.theta0(k);
            for j in 0..grid.ny {
                for i in 0..grid.nx {
                    let theta = theta0 + theta_p.get(i, j, k);
                    let t_k = ReferenceState::temperature_k(theta, pressure);
                    let q_sat = ReferenceState::q_saturation(t_k - 273.15, pressure);
                    let q_val = q.get(i, j, k);
                    if q_val > q_sat {
                        let dq = q_sat - q_val;
                        q.set(i, j, k, q_sat);
                        let dt_heat = (L_V / C_P) * (-dq);
                        let dtheta = (theta / t_k) * dt_heat * eta;
                        theta_p.set(i, j, k, theta_p.get(i, j, k) + dtheta);
                        condensed -= dq;
                    }
                }
            }
        }
        condensed
    }

    /// Betts-Miller relaxation toward a reference-RH profile, tapered near
    /// the surface and guarded against column moistening.
    fn betts_miller(
        &self,
        theta_p: &mut Field3,
        q: &mut Field3,
        reference: &ReferenceState,
        grid: &GridSpec,
        dt_seconds: f64,
        bm: &BettsMillerParameters,
    ) -> f64 {
        let eta = self.params.precip_efficiency;
        let rate = dt_seconds / bm.tau_s;
        let mut condensed = 0.0;
        let mut column_dq = vec![0.0f64; grid.nz];

        for j in 0..grid.ny {
            for i in 0..grid.nx {
                let mut cloudy = false;
                for k in 0..grid.nz {
                    let pressure = reference.pressure(k);
                    let theta = reference.theta0(k) + theta_p.get(i, j, k);
                    let t_k = ReferenceState::temperature_k(theta, pressure);
                    let q_sat = ReferenceState::q_saturation(t_k - 273.15, pressure);
                    let target = bm.reference_rh * q_sat;
                    let q_val = q.get(i, j, k);
                    if q_val > target {
                        cloudy = true;
                        let taper = ((grid.z_phys(k) - bm.taper_start_m)
                            / (bm.taper_full_m - bm.taper_start_m))
                            .clamp(0.0, 1.0)
                            .powf(bm.taper_power);
                        column_dq[k] = -(q_val - target) * rate * taper;
                    } else {
                        column_dq[k] = 0.0;
                    }
                }
                if !cloudy {
                    continue;
                }
                // A relaxation that would moisten the column is discarded.
                if column_dq.iter().sum::<f64>() > 0.0 {
                    continue;
                }
                for k in 0..grid.nz {
                    let dq = column_dq[k];
                    if dq == 0.0 {
                        continue;
                    }
                    let pressure = reference.pressure(k);
                    let theta = reference.theta0(k) + theta_p.get(i, j, k);
                    let t_k = ReferenceState::temperature_k(theta, pressure);
                    q.set(i, j, k, (q.get(i, j, k) + dq).max(self.params.moisture_floor));
                    let dtheta = (theta / t_k) * (L_V / C_P) * (-dq) * eta;
                    theta_p.set(i, j, k, theta_p.get(i, j, k) + dtheta);
                    condensed -= dq;
                }
            }
        }
        condensed
    }

    /// Warm-rain soft cap with virga-weighted heating: moisture above
    /// cap*q_sat precipitates at every level, but only low-level condensate
    /// heats the column; upper-level excess re-evaporates below.
    pub fn warm_rain(
        &self,
        theta_p: &mut Field3,
        q: &mut Field3,
        reference: &ReferenceState,
        grid: &GridSpec,
    ) -> f64 {
        let Some(cap_factor) = self.params.warm_rain_cap else {
            return 0.0;
        };
        let eta = self.params.precip_efficiency;
        let mut condensed = 0.0;
        for k in 0..grid.nz {
            let pressure = reference.pressure(k);
            let theta0 = reference.theta0(k);
            let virga = ((4000.0 - grid.z_phys(k)) / 2000.0).clamp(0.0, 1.0);
            for j in 0..grid.ny {
                for i in 0..grid.nx {
                    let theta = theta0 + theta_p.get(i, j, k);
                    let t_k = ReferenceState::temperature_k(theta, pressure);
                    let q_sat = ReferenceState::q_saturation(t_k - 273.15, pressure);
                    let cap = cap_factor * q_sat;
                    let excess = q.get(i, j, k) - cap;
                    if excess > 0.0 {
                        q.set(i, j, k, cap);
                        let dtheta = (theta / t_k) * (L_V / C_P) * excess * eta * virga;
                        theta_p.set(i, j, k, theta_p.get(i, j, k) + dtheta);
                        condensed += excess;
                    }
                }
            }
        }
        condensed
    }

    /// Buoyancy tendency on w: b = g theta'/theta0(z).
    pub fn buoyancy(
        &self,
        w: &mut Field3,
        theta_p: &Field3,
        reference: &ReferenceState,
        grid: &GridSpec,
        dt_solver: f64,
    ) {
        let to_nd = grid.t_char() / grid.u_char * dt_solver;
        for k in 0..grid.nz {
            let theta0 = reference.theta0(k);
            for j in 0..grid.ny {
                for i in 0..grid.nx {
                    let mut b = G * theta_p.get(i, j, k) / theta0;
                    if let Some(fw) = self.params.firewalls {
                        if fw.buoyancy_cap > 0.0 {
                            b = fw.buoyancy_cap * (b / fw.buoyancy_cap).tanh();
                        }
                    }
                    w.set(i, j, k, w.get(i, j, k) + b * to_nd);
                }
            }
        }
        if let Some(fw) = self.params.firewalls {
            let w_cap = fw.max_updraft_ms / grid.u_char;
            w.clamp(-w_cap, w_cap);
        }
    }

    /// Energy-conserving Coriolis rotation via the Cayley transform.
    pub fn coriolis(u: &mut Field3, v: &mut Field3, f_coriolis: f64, t_char: f64, dt_solver: f64) {
        let alpha = 0.5 * f_coriolis * t_char * dt_solver;
        let a2 = alpha * alpha;
        let denom = 1.0 + a2;
        for idx in 0..u.len() {
            let u_old = u.data()[idx];
            let v_old = v.data()[idx];
            u.data_mut()[idx] = ((1.0 - a2) * u_old + 2.0 * alpha * v_old) / denom;
            v.data_mut()[idx] = (-2.0 * alpha * u_old + (1.0 - a2) * v_old) / denom;
        }
    }

    /// Newtonian radiative relaxation of theta' toward zero.
    pub fn radiative_cooling(&self, theta_p: &mut Field3, dt_seconds: f64) {
        let Some(rad) = self.params.radiative else {
            return;
        };
        theta_p.map_in_place(|t| {
            let tau = if rad.dynamic {
                (rad.tau_base_s * (-t.abs() / rad.theta_scale_k).exp()).max(rad.tau_min_s)
            } else {
                rad.tau_base_s
            };
            t * (1.0 - dt_seconds / tau)
        });
    }

    /// Subtract the horizontal mean of theta' at each level.
    pub fn mean_removal(&self, theta_p: &mut Field3, grid: &GridSpec) {
        if !self.params.mean_removal {
            return;
        }
        for k in 0..grid.nz {
            let mean = theta_p.level_mean(k);
            for v in theta_p.level_mut(k) {
                *v -= mean;
            }
        }
    }

    /// Relax theta' toward zero outside the storm radius, with a smooth
    /// 50 km transition band (mimics ventilation in the periodic domain).
    pub fn environment_relax(&self, theta_p: &mut Field3, grid: &GridSpec, dt_seconds: f64) {
        let Some((radius_km, tau_s)) = self.params.environment_relax else {
            return;
        };
        let radius_m = radius_km * 1000.0;
        for j in 0..grid.ny {
            for i in 0..grid.nx {
                let r = grid.radius_m(i, j);
                let mask = ((r - radius_m) / 50_000.0).clamp(0.0, 1.0);
                if mask == 0.0 {
                    continue;
                }
                let factor = 1.0 - mask * dt_seconds / tau_s;
                for k in 0..grid.nz {
                    theta_p.set(i, j, k, theta_p.get(i, j, k) * factor);
                }
            }
        }
    }

    /// Poleward theta' relaxation: tropical warm anomalies are drained
    /// north of 40 degrees latitude, capped at 10% per step.
    pub fn high_latitude_relax(
        &self,
        theta_p: &mut Field3,
        grid: &GridSpec,
        center_lat: f64,
        dt_seconds: f64,
    ) {
        let tau = self.params.high_lat_tau_s;
        for j in 0..grid.ny {
            let lat = grid.latitude_of_row(j, center_lat).abs();
            if lat <= 40.0 {
                continue;
            }
            let rate = ((dt_seconds / tau) * (1.0 + (lat - 40.0) / 10.0)).min(0.1);
            let factor = 1.0 - rate;
            for k in 0..grid.nz {
                for i in 0..grid.nx {
                    theta_p.set(i, j, k, theta_p.get(i, j, k) * factor);
                }
            }
        }
    }

    /// Selective diffusion of cold anomalies (theta' < -4 K). A correction
    /// larger than 10 K is rejected as numerically suspect.
    pub fn cold_anomaly_diffusion(&self, theta_p: &mut Field3, spectral: &SpectralSolver) {
        let Some(strength) = self.params.cold_diffusion_strength else {
            return;
        };
        let lap = spectral.laplacian(theta_p);
        for idx in 0..theta_p.len() {
            if theta_p.data()[idx] < -4.0 {
                let correction = strength * lap.data()[idx];
                if correction.abs() <= 10.0 {
                    theta_p.data_mut()[idx] += correction;
                }
            }
        }
    }

    /// Rayleigh sponge over the top 20% of the column: absorbs gravity
    /// waves by damping w and theta' to zero and q to its reference.
    pub fn vertical_sponge(
        &self,
        w: &mut Field3,
        theta_p: &mut Field3,
        q: &mut Field3,
        reference: &ReferenceState,
        grid: &GridSpec,
    ) {
        let z_top = grid.z_phys(grid.nz - 1);
        let z_base = 0.8 * z_top;
        if z_top <= z_base {
            return;
        }
        for k in 0..grid.nz {
            let z = grid.z_phys(k);
            if z < z_base {
                continue;
            }
            let s = (z - z_base) / (z_top - z_base);
            // cos^2 ramp: zero at the sponge base, full at the model top
            let mask = (std::f64::consts::FRAC_PI_2 * (1.0 - s)).cos().powi(2);
            let damp = 0.05 * mask;
            let q_ref = reference.q_ref(k);
            for j in 0..grid.ny {
                for i in 0..grid.nx {
                    w.set(i, j, k, w.get(i, j, k) * (1.0 - damp));
                    theta_p.set(i, j, k, theta_p.get(i, j, k) * (1.0 - damp));
                    q.set(i, j, k, q.get(i, j, k) + damp * (q_ref - q.get(i, j, k)));
                }
            }
        }
    }

    /// Far-field moisture relaxation toward q_ref(z), ramping in over
    /// 400-600 km radius. Called on a 10-step cadence by the core.
    pub fn far_field_moisture_relax(
        &self,
        q: &mut Field3,
        reference: &ReferenceState,
        grid: &GridSpec,
        dt_seconds: f64,
        cadence_steps: u64,
    ) {
        let alpha = cadence_steps as f64 * dt_seconds / self.params.moisture_relax_tau_s;
        for j in 0..grid.ny {
            for i in 0..grid.nx {
                let r = grid.radius_m(i, j);
                let mask = ((r - 400_000.0) / 200_000.0).clamp(0.0, 1.0);
                if mask == 0.0 {
                    continue;
                }
                for k in 0..grid.nz {
                    let q_ref = reference.q_ref(k);
                    let q_val = q.get(i, j, k);
                    q.set(i, j, k, q_val + alpha * mask * (q_ref - q_val));
                }
            }
        }
    }

    /// Edge sponge on the horizontal momentum: cos^2 ramp over the outer
    /// 15% band, suppressing boundary artifacts of the periodic domain.
    pub fn horizontal_sponge(u: &mut Field3, v: &mut Field3, grid: &GridSpec, strength: f64) {
        if strength <= 0.0 {
            return;
        }
        let band = (0.15 * grid.nx.min(grid.ny) as f64).max(1.0);
        for j in 0..grid.ny {
            for i in 0..grid.nx {
                let d = i
                    .min(grid.nx - 1 - i)
                    .min(j.min(grid.ny - 1 - j)) as f64;
                if d >= band {
                    continue;
                }
                let mask = (std::f64::consts::FRAC_PI_2 * d / band).cos().powi(2);
                let factor = 1.0 - strength * mask;
                for k in 0..grid.nz {
                    u.set(i, j, k, u.get(i, j, k) * factor);
                    v.set(i, j, k, v.get(i, j, k) * factor);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::core::reference::ReferenceParameters;

    fn grid() -> GridSpec {
        GridSpec::new(8, 8, 16, 15_000.0, 15_000.0, 500.0, 15_000.0, 10.0).unwrap()
    }

    fn reference(g: &GridSpec) -> ReferenceState {
        ReferenceState::new(ReferenceParameters::default(), g.nz, g.dz_phys).unwrap()
    }

    #[test]
    fn test_coriolis_conserves_kinetic_energy() {
        let mut u = Field3::new(4, 4, 4, 0.7);
        let mut v = Field3::new(4, 4, 4, -0.3);
        let ke_before: f64 = u
            .data()
            .iter()
            .zip(v.data())
            .map(|(a, b)| a * a + b * b)
            .sum();
        // Large rotation angle to stress the transform
        ThermodynamicPipeline::coriolis(&mut u, &mut v, 1.0e-4, 1500.0, 1.0);
        let ke_after: f64 = u
            .data()
            .iter()
            .zip(v.data())
            .map(|(a, b)| a * a + b * b)
            .sum();
        assert!(
            ((ke_after - ke_before) / ke_before).abs() < 1e-12,
            "KE drift {}",
            (ke_after - ke_before) / ke_before
        );
    }

    #[test]
    fn test_coriolis_turns_northern_wind_clockwise() {
        let mut u = Field3::new(2, 2, 2, 1.0);
        let mut v = Field3::zeros(2, 2, 2);
        ThermodynamicPipeline::coriolis(&mut u, &mut v, 3.8e-5, 1500.0, 0.5);
        // Northern hemisphere: eastward wind deflects equatorward (v < 0)
        assert!(v.get(0, 0, 0) < 0.0);
        assert!(u.get(0, 0, 0) < 1.0);
    }

    #[test]
    fn test_stratification_cools_updrafts() {
        let g = grid();
        let r = reference(&g);
        let pipe = ThermodynamicPipeline::new(ThermoParameters::default());
        let mut theta_p = Field3::zeros(8, 8, 16);
        let w = Field3::new(8, 8, 16, 0.5);
        let t_c = Field3::new(8, 8, 16, 20.0);
        let q = Field3::zeros(8, 8, 16);
        pipe.stratification(&mut theta_p, &w, &t_c, &q, &r, &g, 4.0);
        // Dry ascent against stable stratification cools
        assert!(theta_p.max() < 0.0);
        let expected = -0.5 * 10.0 * r.dtheta0_dz() * 4.0;
        assert!((theta_p.get(4, 4, 4) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_saturated_updraft_cools_less() {
        let g = grid();
        let r = reference(&g);
        let pipe = ThermodynamicPipeline::new(ThermoParameters::default());
        let w = Field3::new(8, 8, 16, 0.5);
        let t_c = Field3::new(8, 8, 16, 25.0);

        let mut theta_dry = Field3::zeros(8, 8, 16);
        let q_dry = Field3::zeros(8, 8, 16);
        pipe.stratification(&mut theta_dry, &w, &t_c, &q_dry, &r, &g, 4.0);

        let mut theta_moist = Field3::zeros(8, 8, 16);
        let mut q_moist = Field3::zeros(8, 8, 16);
        for k in 0..16 {
            let q_sat = ReferenceState::q_saturation(25.0, r.pressure(k));
            for j in 0..8 {
                for i in 0..8 {
                    q_moist.set(i, j, k, q_sat);
                }
            }
        }
        pipe.stratification(&mut theta_moist, &w, &t_c, &q_moist, &r, &g, 4.0);
        assert!(theta_moist.get(4, 4, 4) > theta_dry.get(4, 4, 4));
    }

    #[test]
    fn test_instant_saturation_heats_and_dries() {
        let g = grid();
        let r = reference(&g);
        let pipe = ThermodynamicPipeline::new(ThermoParameters::default());
        let mut theta_p = Field3::zeros(8, 8, 16);
        let mut q = Field3::zeros(8, 8, 16);
        // Supersaturate the surface level
        let q_sat0 = ReferenceState::q_saturation(
            ReferenceState::temperature_k(r.theta0(0), r.pressure(0)) - 273.15,
            r.pressure(0),
        );
        for j in 0..8 {
            for i in 0..8 {
                q.set(i, j, 0, 1.5 * q_sat0);
            }
        }
        let condensed = pipe.moist_adjustment(&mut theta_p, &mut q, &r, &g, 4.0);
        assert!(condensed > 0.0);
        assert!(theta_p.get(0, 0, 0) > 0.0);
        assert!(q.get(0, 0, 0) <= 1.5 * q_sat0);
        // Unsaturated levels untouched
        assert_eq!(theta_p.get(0, 0, 8), 0.0);
    }

    #[test]
    fn test_betts_miller_relaxes_toward_reference() {
        let g = grid();
        let r = reference(&g);
        let params = ThermoParameters {
            betts_miller: Some(BettsMillerParameters::default()),
            ..Default::default()
        };
        let pipe = ThermodynamicPipeline::new(params);
        let mut theta_p = Field3::zeros(8, 8, 16);
        let mut q = Field3::zeros(8, 8, 16);
        // Moist column well above the reference RH at mid-levels
        for k in 0..16 {
            let t_k = ReferenceState::temperature_k(r.theta0(k), r.pressure(k));
            let q_sat = ReferenceState::q_saturation(t_k - 273.15, r.pressure(k));
            for j in 0..8 {
                for i in 0..8 {
                    q.set(i, j, k, 0.99 * q_sat);
                }
            }
        }
        let q_before = q.clone();
        let condensed = pipe.moist_adjustment(&mut theta_p, &mut q, &r, &g, 60.0);
        assert!(condensed > 0.0);
        // Below the taper start nothing changes; above taper-full it dries
        assert_eq!(q.get(4, 4, 0), q_before.get(4, 4, 0));
        assert!(q.get(4, 4, 10) < q_before.get(4, 4, 10));
        assert!(theta_p.get(4, 4, 10) > 0.0);
    }

    #[test]
    fn test_warm_rain_virga_heats_low_levels_only() {
        let g = grid();
        let r = reference(&g);
        let params = ThermoParameters {
            warm_rain_cap: Some(1.5),
            ..Default::default()
        };
        let pipe = ThermodynamicPipeline::new(params);
        let mut theta_p = Field3::zeros(8, 8, 16);
        let mut q = Field3::zeros(8, 8, 16);
        // Force 2x saturation everywhere
        for k in 0..16 {
            let t_k = ReferenceState::temperature_k(r.theta0(k), r.pressure(k));
            let q_sat = ReferenceState::q_saturation(t_k - 273.15, r.pressure(k));
            for j in 0..8 {
                for i in 0..8 {
                    q.set(i, j, k, 2.0 * q_sat);
                }
            }
        }
        let q_before = q.clone();
        let condensed = pipe.warm_rain(&mut theta_p, &mut q, &r, &g);
        assert!(condensed > 0.0);
        // z = 1 km: full virga weight, heating
        assert!(theta_p.get(4, 4, 2) > 0.0);
        // z >= 4 km (k >= 8 at dz 500 m): moisture removed, no heating
        assert!(q.get(4, 4, 10) < q_before.get(4, 4, 10));
        assert_eq!(theta_p.get(4, 4, 10), 0.0);
    }

    #[test]
    fn test_buoyancy_accelerates_warm_air() {
        let g = grid();
        let r = reference(&g);
        let pipe = ThermodynamicPipeline::new(ThermoParameters::default());
        let mut w = Field3::zeros(8, 8, 16);
        let theta_p = Field3::new(8, 8, 16, 3.0);
        pipe.buoyancy(&mut w, &theta_p, &r, &g, 0.0027);
        assert!(w.min() > 0.0);
        // b = g*3/300 ~ 0.0981 m/s^2 at the surface
        let expected = G * 3.0 / r.theta0(0) * (g.t_char() / g.u_char) * 0.0027;
        assert!((w.get(0, 0, 0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_firewalls_cap_updraft() {
        let g = grid();
        let r = reference(&g);
        let params = ThermoParameters {
            firewalls: Some(FirewallParameters {
                buoyancy_cap: 0.5,
                max_updraft_ms: 50.0,
            }),
            ..Default::default()
        };
        let pipe = ThermodynamicPipeline::new(params);
        let mut w = Field3::new(8, 8, 16, 10.0);
        let theta_p = Field3::new(8, 8, 16, 40.0);
        pipe.buoyancy(&mut w, &theta_p, &r, &g, 0.0027);
        assert!(w.max() * g.u_char <= 50.0 + 1e-9);
    }

    #[test]
    fn test_radiative_cooling_decays_anomalies() {
        let params = ThermoParameters {
            radiative: Some(RadiativeCoolingParameters {
                tau_base_s: 86_400.0,
                dynamic: true,
                tau_min_s: 3600.0,
                theta_scale_k: 20.0,
            }),
            ..Default::default()
        };
        let pipe = ThermodynamicPipeline::new(params);
        let mut theta_p = Field3::new(4, 4, 4, 10.0);
        theta_p.set(0, 0, 0, 60.0);
        let before_hot = theta_p.get(0, 0, 0);
        let before_warm = theta_p.get(1, 1, 1);
        pipe.radiative_cooling(&mut theta_p, 60.0);
        let hot_decay = 1.0 - theta_p.get(0, 0, 0) / before_hot;
        let warm_decay = 1.0 - theta_p.get(1, 1, 1) / before_warm;
        // Dynamic tau cools extreme anomalies faster
        assert!(hot_decay > warm_decay);
    }

    #[test]
    fn test_mean_removal_zeroes_level_means() {
        let g = grid();
        let params = ThermoParameters {
            mean_removal: true,
            ..Default::default()
        };
        let pipe = ThermodynamicPipeline::new(params);
        let mut theta_p = Field3::new(8, 8, 16, 2.0);
        theta_p.set(3, 3, 5, 12.0);
        pipe.mean_removal(&mut theta_p, &g);
        for k in 0..16 {
            assert!(theta_p.level_mean(k).abs() < 1e-12);
        }
    }

    #[test]
    fn test_high_latitude_relax_caps_at_ten_percent() {
        let g = grid();
        let pipe = ThermodynamicPipeline::new(ThermoParameters::default());
        let mut theta_p = Field3::new(8, 8, 16, 10.0);
        // Extreme latitude and huge dt: rate must clamp to 0.1
        pipe.high_latitude_relax(&mut theta_p, &g, 80.0, 1.0e9);
        assert!(theta_p.min() >= 9.0 - 1e-9);
    }

    #[test]
    fn test_vertical_sponge_damps_top_levels() {
        let g = grid();
        let r = reference(&g);
        let pipe = ThermodynamicPipeline::new(ThermoParameters::default());
        let mut w = Field3::new(8, 8, 16, 1.0);
        let mut theta_p = Field3::new(8, 8, 16, 5.0);
        let mut q = Field3::zeros(8, 8, 16);
        pipe.vertical_sponge(&mut w, &mut theta_p, &mut q, &r, &g);
        // Top level damped by the full 5%, interior untouched
        assert!((w.get(4, 4, 15) - 0.95).abs() < 1e-12);
        assert_eq!(w.get(4, 4, 5), 1.0);
        // Moisture pulled toward the reference
        assert!(q.get(4, 4, 15) > 0.0);
    }

    #[test]
    fn test_vertical_sponge_e_folds_top_energy() {
        // theta' seeded only in the sponge: after t_char/dt steps the top
        // level must lose at least a factor e.
        let g = grid();
        let r = reference(&g);
        let pipe = ThermodynamicPipeline::new(ThermoParameters::default());
        let mut w = Field3::zeros(8, 8, 16);
        let mut theta_p = Field3::zeros(8, 8, 16);
        let mut q = Field3::zeros(8, 8, 16);
        for j in 0..8 {
            for i in 0..8 {
                theta_p.set(i, j, 15, 1.0);
            }
        }
        let steps = (g.t_char() / 4.0).ceil() as usize;
        for _ in 0..steps {
            pipe.vertical_sponge(&mut w, &mut theta_p, &mut q, &r, &g);
        }
        assert!(theta_p.get(4, 4, 15) < (-1.0f64).exp());
    }

    #[test]
    fn test_cold_diffusion_only_touches_cold_cells() {
        let g = grid();
        let spectral = SpectralSolver::new(&g);
        let params = ThermoParameters {
            cold_diffusion_strength: Some(0.05),
            ..Default::default()
        };
        let pipe = ThermodynamicPipeline::new(params);
        let mut theta_p = Field3::zeros(8, 8, 16);
        theta_p.set(4, 4, 8, -8.0);
        theta_p.set(2, 2, 8, 3.0);
        let warm_before = theta_p.get(2, 2, 8);
        pipe.cold_anomaly_diffusion(&mut theta_p, &spectral);
        // Cold hole smoothed upward, warm cell untouched
        assert!(theta_p.get(4, 4, 8) > -8.0);
        assert_eq!(theta_p.get(2, 2, 8), warm_before);
    }

    #[test]
    fn test_horizontal_sponge_decays_edge_energy() {
        let g = grid();
        let mut u = Field3::new(8, 8, 16, 1.0);
        let mut v = Field3::new(8, 8, 16, 1.0);
        ThermodynamicPipeline::horizontal_sponge(&mut u, &mut v, &g, 0.01);
        // Corner cell damped, center cell untouched
        assert!(u.get(0, 0, 0) < 1.0);
        assert_eq!(u.get(4, 4, 0), 1.0);
        let edge = u.get(0, 0, 0);
        ThermodynamicPipeline::horizontal_sponge(&mut u, &mut v, &g, 0.01);
        assert!(u.get(0, 0, 0) < edge, "edge decay must be monotonic");
    }

    #[test]
    fn test_far_field_moisture_relax_ramps_with_radius() {
        // Use a wide grid so radii straddle the 400-600 km band
        let g = GridSpec::new(96, 96, 8, 15_000.0, 15_000.0, 500.0, 15_000.0, 10.0).unwrap();
        let r = ReferenceState::new(ReferenceParameters::default(), 8, 500.0).unwrap();
        let pipe = ThermodynamicPipeline::new(ThermoParameters::default());
        let mut q = Field3::zeros(96, 96, 8);
        pipe.far_field_moisture_relax(&mut q, &r, &g, 4.0, 10);
        // Center (r=0) untouched, far corner pulled toward q_ref
        assert_eq!(q.get(48, 48, 0), 0.0);
        assert!(q.get(0, 0, 0) > 0.0);
    }
}
