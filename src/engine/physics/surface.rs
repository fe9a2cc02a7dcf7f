// ABOUTME: Bulk aerodynamic sea-air fluxes with WISHE boosting, flux throttling, and land blending
// ABOUTME: Operates on the bottom model level only; all returned fields stay finite

use tracing::{debug, info};

use crate::engine::core::field::{Field2, Field3};
use crate::engine::core::reference::ReferenceState;

/// Damping factors logged only when first crossed, to keep long runs quiet.
const DAMPING_LOG_THRESHOLDS: [f64; 5] = [0.9, 0.75, 0.5, 0.25, 0.1];

/// Wind-induced surface heat exchange boost.
#[derive(Clone, Copy, Debug)]
pub struct WisheParameters {
    pub enabled: bool,
    /// Boost factor reached at wind_max_ms.
    pub boost_max: f64,
    /// 10-m wind speed where the boost ramp begins, m/s.
    pub wind_min_ms: f64,
    /// 10-m wind speed where the boost saturates, m/s.
    pub wind_max_ms: f64,
}

/// Flux throttle scheme guarding against runaway surface heating.
#[derive(Clone, Copy, Debug)]
pub enum ThrottleMode {
    Off,
    /// Disable WISHE entirely while the heating rate exceeds the threshold.
    Binary { threshold_k_per_min: f64 },
    /// Scale the boost continuously by min(derivative, integral) factors.
    Proportional {
        threshold_k_per_min: f64,
        theta_soft_limit_k: f64,
        theta_hard_limit_k: f64,
    },
}

/// Bulk-flux parameters for the sea-air boundary.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceParameters {
    /// Bulk exchange coefficient for heat.
    pub exchange_coeff_heat: f64,
    /// Bulk exchange coefficient for moisture.
    pub exchange_coeff_moisture: f64,
    /// Surface drag coefficient.
    pub drag_coeff: f64,
    /// Minimum effective 10-m wind for flux computation, m/s.
    pub gustiness_floor_ms: f64,
    /// Effective boundary-layer depth receiving the fluxes, m.
    pub flux_depth_m: f64,
    /// Flux magnitude multiplier over land (dry, low heat capacity).
    pub land_flux_factor: f64,
    /// Drag multiplier over land (rougher surface).
    pub land_drag_factor: f64,
    /// Specific humidity floor, kg/kg.
    pub moisture_floor: f64,
    pub wishe: WisheParameters,
    pub throttle: ThrottleMode,
}

impl Default for SurfaceParameters {
    fn default() -> Self {
        Self {
            exchange_coeff_heat: 1.2e-3,
            exchange_coeff_moisture: 1.2e-3,
            drag_coeff: 2.0e-3,
            gustiness_floor_ms: 4.0,
            flux_depth_m: 100.0,
            land_flux_factor: 0.2,
            land_drag_factor: 2.5,
            moisture_floor: 1.0e-4,
            wishe: WisheParameters {
                enabled: false,
                boost_max: 1.4,
                wind_min_ms: 15.0,
                wind_max_ms: 40.0,
            },
            throttle: ThrottleMode::Off,
        }
    }
}

/// Step-local context the flux pass needs from the simulation.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceForcing {
    pub dt_seconds: f64,
    pub u_char: f64,
    pub center_lat_deg: f64,
    /// Observed max d(theta')/dt over the last step, K/min.
    pub theta_rate_k_per_min: f64,
    /// Current max theta' over the domain, K.
    pub theta_prime_max_k: f64,
    /// Reference pressure at the bottom level, Pa.
    pub surface_pressure: f64,
}

/// Totals reported back for diagnostics.
#[derive(Clone, Copy, Debug, Default)]
pub struct SurfaceFluxReport {
    pub boost_peak: f64,
    pub throttle_factor: f64,
    pub high_latitude_damping: f64,
    pub moisture_flux_total: f64,
    pub heat_flux_total: f64,
}

/// Surface and boundary-layer flux subsystem.
///
/// Holds the binary-throttle state machine and the last logged damping
/// bucket so threshold crossings are reported exactly once.
pub struct SurfaceLayer {
    params: SurfaceParameters,
    throttled: bool,
    last_damping_bucket: usize,
}

impl SurfaceLayer {
    pub fn new(params: SurfaceParameters) -> Self {
        Self {
            params,
            throttled: false,
            last_damping_bucket: 0,
        }
    }

    pub fn params(&self) -> &SurfaceParameters {
        &self.params
    }

    pub fn is_throttled(&self) -> bool {
        self.throttled
    }

    /// Effective throttle factor in [0, 1] scaling the WISHE boost amount.
    fn throttle_factor(&mut self, forcing: &SurfaceForcing) -> f64 {
        match self.params.throttle {
            ThrottleMode::Off => 1.0,
            ThrottleMode::Binary { threshold_k_per_min } => {
                let over = forcing.theta_rate_k_per_min > threshold_k_per_min;
                if over != self.throttled {
                    if over {
                        info!(
                            rate = forcing.theta_rate_k_per_min,
                            threshold = threshold_k_per_min,
                            "flux throttle engaged: WISHE boost disabled"
                        );
                    } else {
                        info!("flux throttle released: WISHE boost restored");
                    }
                    self.throttled = over;
                }
                if self.throttled { 0.0 } else { 1.0 }
            }
            ThrottleMode::Proportional {
                threshold_k_per_min,
                theta_soft_limit_k,
                theta_hard_limit_k,
            } => {
                let rate = forcing.theta_rate_k_per_min.max(1.0e-6);
                let derivative = (threshold_k_per_min / rate).clamp(0.1, 1.0);
                let span = (theta_hard_limit_k - theta_soft_limit_k).max(1.0e-6);
                let integral =
                    ((theta_hard_limit_k - forcing.theta_prime_max_k) / span).clamp(0.0, 1.0);
                derivative.min(integral)
            }
        }
    }

    /// High-latitude damping on the surface theta tendency, with
    /// crossing-only logging.
    fn high_latitude_damping(&mut self, center_lat_deg: f64) -> f64 {
        let lat = center_lat_deg.abs();
        let damping = if lat > 30.0 {
            (-(lat - 30.0) / 7.0).exp()
        } else {
            1.0
        };
        let bucket = DAMPING_LOG_THRESHOLDS
            .iter()
            .filter(|&&t| damping < t)
            .count();
        if bucket != self.last_damping_bucket {
            if bucket > self.last_damping_bucket {
                info!(
                    latitude = lat,
                    damping, "surface fluxes damped at high latitude"
                );
            } else {
                debug!(latitude = lat, damping, "surface flux damping relaxed");
            }
            self.last_damping_bucket = bucket;
        }
        damping
    }

    /// Apply surface drag and enthalpy/moisture fluxes at the bottom level.
    ///
    /// Mutates the surface slices of (u, v) for drag and of (theta', q) for
    /// the fluxes. `t_c` is the diagnostic temperature in Celsius.
    pub fn apply_surface_fluxes(
        &mut self,
        u: &mut Field3,
        v: &mut Field3,
        theta_p: &mut Field3,
        q: &mut Field3,
        t_c: &Field3,
        sst: &Field2,
        land_fraction: &Field2,
        forcing: &SurfaceForcing,
    ) -> SurfaceFluxReport {
        let p = self.params;
        let throttle = self.throttle_factor(forcing);
        let damping = self.high_latitude_damping(forcing.center_lat_deg);
        let effective_boost_max = 1.0 + (p.wishe.boost_max - 1.0) * throttle;

        let nx = u.nx();
        let ny = u.ny();
        let mut report = SurfaceFluxReport {
            boost_peak: 1.0,
            throttle_factor: throttle,
            high_latitude_damping: damping,
            ..Default::default()
        };

        for j in 0..ny {
            for i in 0..nx {
                let land = land_fraction.get(i, j).clamp(0.0, 1.0);
                let ocean = 1.0 - land;
                let flux_scale = ocean + land * p.land_flux_factor;
                let drag_scale = ocean + land * p.land_drag_factor;

                let uu = u.get(i, j, 0);
                let vv = v.get(i, j, 0);
                let ws = (uu * uu + vv * vv).sqrt() * forcing.u_char;
                let ws_eff = ws.max(p.gustiness_floor_ms);

                // Moisture flux toward saturation at the sea surface.
                let q_sat_sea =
                    ReferenceState::q_saturation(sst.get(i, j), forcing.surface_pressure);
                let q_old = q.get(i, j, 0);
                let dq = p.exchange_coeff_moisture * flux_scale * ws_eff
                    * (q_sat_sea - q_old)
                    / p.flux_depth_m
                    * forcing.dt_seconds;
                let q_new = (q_old + dq).max(p.moisture_floor);
                q.set(i, j, 0, q_new);
                report.moisture_flux_total += q_new - q_old;

                // Sensible heat flux with WISHE boost on the theta tendency.
                let boost = if p.wishe.enabled {
                    let ramp = ((ws - p.wishe.wind_min_ms)
                        / (p.wishe.wind_max_ms - p.wishe.wind_min_ms))
                        .clamp(0.0, 1.0);
                    1.0 + (effective_boost_max - 1.0) * ramp
                } else {
                    1.0
                };
                report.boost_peak = report.boost_peak.max(boost);

                let dtheta = p.exchange_coeff_heat * flux_scale * ws_eff
                    * (sst.get(i, j) - t_c.get(i, j, 0))
                    / p.flux_depth_m
                    * forcing.dt_seconds
                    * boost
                    * damping;
                theta_p.set(i, j, 0, theta_p.get(i, j, 0) + dtheta);
                report.heat_flux_total += dtheta;

                // Momentum sink. Bounded so an extreme gust cannot reverse
                // the wind within one step.
                let drag = (p.drag_coeff * drag_scale * ws_eff * forcing.dt_seconds
                    / p.flux_depth_m)
                    .min(0.5);
                u.set(i, j, 0, uu * (1.0 - drag));
                v.set(i, j, 0, vv * (1.0 - drag));
            }
        }
        report
    }
}
