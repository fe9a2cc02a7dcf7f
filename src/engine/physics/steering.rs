// ABOUTME: Moving-nest steering - deep-layer-mean environmental wind, beta drift, and position integration
// ABOUTME: Carries the H3+ hysteresis state and the cached steering vector between coarse refreshes

use tracing::{debug, info};

use crate::engine::core::field::Field2;
use crate::engine::core::grid::{GridSpec, METERS_PER_DEGREE};
use crate::engine::data::{FetchedEnvironment, resample_to_nest};

/// Knots per m/s.
pub const MS_TO_KT: f64 = 1.943_844;

/// H3+ hysteresis thresholds on max wind.
const H3_ACTIVATE_KT: f64 = 96.0;
const H3_DEACTIVATE_KT: f64 = 83.0;

/// Physically correct beta-drift heading, degrees from east.
const BETA_ANGLE_NORTH_DEG: f64 = 120.0;
const BETA_ANGLE_SOUTH_DEG: f64 = 240.0;
const BETA_CAP_MS: f64 = 4.0;

/// Westward steering clamp inside the Gulf box, m/s.
const GULF_WESTWARD_CAP_MS: f64 = -3.0;

/// Beta-drift configuration.
#[derive(Clone, Copy, Debug)]
pub struct BetaDriftParameters {
    pub enabled: bool,
    /// Base drift magnitude at the 15N reference latitude, m/s.
    pub base_speed_ms: f64,
    /// Fractional increase per degree of latitude above 15N.
    pub lat_scale_per_deg: f64,
    pub intensity_scaling: bool,
    pub longitude_scaling: bool,
    pub basin_damping: bool,
    pub confidence_weighting: bool,
    /// Enables the H3+ hysteresis regime.
    pub h3_boost: bool,
}

impl Default for BetaDriftParameters {
    fn default() -> Self {
        Self {
            enabled: false,
            base_speed_ms: 2.5,
            lat_scale_per_deg: 0.05,
            intensity_scaling: true,
            longitude_scaling: true,
            basin_damping: true,
            confidence_weighting: true,
            h3_boost: true,
        }
    }
}

/// Steering-engine configuration.
#[derive(Clone, Copy, Debug)]
pub struct SteeringParameters {
    /// Restore environmental flow (instead of the self-mean) in the
    /// pressure projection.
    pub injection_enabled: bool,
    /// Sample the environmental wind from an annulus (inner_km, outer_km)
    /// instead of the doughnut-filtered center.
    pub annular: Option<(f64, f64)>,
    pub dlm_scale: f64,
    /// Doughnut-filter inner radius, km.
    pub dlm_inner_radius_km: f64,
    /// Final scalar multiplier on the cached steering vector.
    pub multiplier: f64,
    /// Minimum steering speed, m/s; None disables the floor.
    pub floor_ms: Option<f64>,
    /// Reference environmental speed for beta confidence weighting, m/s.
    pub steer_ref_ms: f64,
    pub beta: BetaDriftParameters,
}

impl Default for SteeringParameters {
    fn default() -> Self {
        Self {
            injection_enabled: false,
            annular: None,
            dlm_scale: 1.0,
            dlm_inner_radius_km: 300.0,
            multiplier: 1.0,
            floor_ms: Some(3.0),
            steer_ref_ms: 6.0,
            beta: BetaDriftParameters::default(),
        }
    }
}

/// One entry of the nest position history.
#[derive(Clone, Copy, Debug)]
pub struct PositionFix {
    pub frame: u64,
    pub lat: f64,
    pub lon: f64,
}

/// Steering engine and moving-nest state.
pub struct SteeringEngine {
    params: SteeringParameters,
    center_lat: f64,
    center_lon: f64,
    cached_u_steer_ms: f64,
    cached_v_steer_ms: f64,
    cached_direction: Option<(f64, f64)>,
    h3_active: bool,
    last_steer_frame: u64,
    history: Vec<PositionFix>,
}

impl SteeringEngine {
    pub fn new(params: SteeringParameters, genesis_lat: f64, genesis_lon: f64) -> Self {
        Self {
            params,
            center_lat: genesis_lat,
            center_lon: genesis_lon,
            cached_u_steer_ms: 0.0,
            cached_v_steer_ms: 0.0,
            cached_direction: None,
            h3_active: false,
            last_steer_frame: 0,
            history: vec![PositionFix {
                frame: 0,
                lat: genesis_lat,
                lon: genesis_lon,
            }],
        }
    }

    pub fn params(&self) -> &SteeringParameters {
        &self.params
    }

    pub fn center(&self) -> (f64, f64) {
        (self.center_lat, self.center_lon)
    }

    pub fn cached_steering_ms(&self) -> (f64, f64) {
        (self.cached_u_steer_ms, self.cached_v_steer_ms)
    }

    pub fn h3_active(&self) -> bool {
        self.h3_active
    }

    pub fn last_steer_frame(&self) -> u64 {
        self.last_steer_frame
    }

    pub fn history(&self) -> &[PositionFix] {
        &self.history
    }

    /// Two-state hysteresis on the H3+ regime: activate at 96 kt, release
    /// below 83 kt. In between, the current state holds.
    pub fn update_intensity(&mut self, max_wind_ms: f64) {
        if !self.params.beta.h3_boost {
            self.h3_active = false;
            return;
        }
        let kt = max_wind_ms * MS_TO_KT;
        if self.h3_active {
            if kt < H3_DEACTIVATE_KT {
                self.h3_active = false;
                info!(intensity_kt = kt, "H3+ regime released");
            }
        } else if kt >= H3_ACTIVATE_KT {
            self.h3_active = true;
            info!(intensity_kt = kt, "H3+ regime active: full beta drift engaged");
        }
    }

    /// Compute the deep-layer-mean steering field on the nest grid from a
    /// fetched multi-level environment.
    pub fn deep_layer_mean(
        &self,
        env: &FetchedEnvironment,
        grid: &GridSpec,
        land_fraction_center: f64,
    ) -> (Field2, Field2) {
        let levels = &env.winds.levels_hpa;
        let n_lev = levels.len();
        let mut u_levels = Vec::with_capacity(n_lev);
        let mut v_levels = Vec::with_capacity(n_lev);
        for l in 0..n_lev {
            u_levels.push(resample_to_nest(&env.winds.u[l], grid.nx, grid.ny));
            v_levels.push(resample_to_nest(&env.winds.v[l], grid.nx, grid.ny));
        }
        fill_column_nans(&mut u_levels, levels);
        fill_column_nans(&mut v_levels, levels);

        // Log-pressure layer thicknesses from level midpoints.
        let dlnp = log_pressure_weights(levels);

        let land_blend = ((land_fraction_center - 0.3) / 0.2).clamp(0.0, 1.0);
        let mut u_dlm = Field2::zeros(grid.nx, grid.ny);
        let mut v_dlm = Field2::zeros(grid.nx, grid.ny);
        for j in 0..grid.ny {
            let lat = grid.latitude_of_row(j, self.center_lat).abs();
            let extratropical_blend = ((lat - 20.0) / 8.0).clamp(0.0, 1.0);
            for i in 0..grid.nx {
                let mut u_num = 0.0;
                let mut u_den = 0.0;
                let mut v_num = 0.0;
                let mut v_den = 0.0;
                for l in 0..n_lev {
                    let hpa = levels[l];
                    let (wu, wv) =
                        blended_weights(hpa, extratropical_blend, land_blend);
                    let wu = wu * dlnp[l];
                    let wv = wv * dlnp[l];
                    u_num += u_levels[l].get(i, j) * wu;
                    u_den += wu;
                    v_num += v_levels[l].get(i, j) * wv;
                    v_den += wv;
                }
                u_dlm.set(i, j, self.params.dlm_scale * u_num / u_den.max(1e-12));
                v_dlm.set(i, j, self.params.dlm_scale * v_num / v_den.max(1e-12));
            }
        }

        self.doughnut_filter(&mut u_dlm, grid);
        self.doughnut_filter(&mut v_dlm, grid);
        (u_dlm, v_dlm)
    }

    /// Replace the vortex-contaminated core of the DLM field with the mean
    /// over the complementary annulus.
    fn doughnut_filter(&self, field: &mut Field2, grid: &GridSpec) {
        let inner_m = self.params.dlm_inner_radius_km * 1000.0;
        let mut sum = 0.0;
        let mut count = 0usize;
        for j in 0..grid.ny {
            for i in 0..grid.nx {
                if grid.radius_m(i, j) >= inner_m {
                    sum += field.get(i, j);
                    count += 1;
                }
            }
        }
        if count == 0 {
            return;
        }
        let annulus_mean = sum / count as f64;
        for j in 0..grid.ny {
            for i in 0..grid.nx {
                if grid.radius_m(i, j) < inner_m {
                    field.set(i, j, annulus_mean);
                }
            }
        }
    }

    /// Mean of a field over the (r_inner, r_outer) annulus around the nest
    /// center.
    fn annulus_mean(field: &Field2, grid: &GridSpec, r_inner_km: f64, r_outer_km: f64) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for j in 0..grid.ny {
            for i in 0..grid.nx {
                let r = grid.radius_m(i, j);
                if r >= r_inner_km * 1000.0 && r <= r_outer_km * 1000.0 {
                    sum += field.get(i, j);
                    count += 1;
                }
            }
        }
        if count == 0 { 0.0 } else { sum / count as f64 }
    }

    /// Refresh the cached steering vector from the DLM fields plus beta
    /// drift, floor, recurve assist, and Gulf safeguards. Returns the new
    /// (u, v) steering in m/s.
    pub fn refresh_steering(
        &mut self,
        u_dlm: &Field2,
        v_dlm: &Field2,
        grid: &GridSpec,
        max_wind_ms: f64,
        land_fraction_center: f64,
        frame: u64,
    ) -> (f64, f64) {
        self.update_intensity(max_wind_ms);

        let (mut u, mut v) = match self.params.annular {
            Some((inner_km, outer_km)) => (
                Self::annulus_mean(u_dlm, grid, inner_km, outer_km),
                Self::annulus_mean(v_dlm, grid, inner_km, outer_km),
            ),
            None => (
                u_dlm.get(grid.nx / 2, grid.ny / 2),
                v_dlm.get(grid.nx / 2, grid.ny / 2),
            ),
        };
        u *= self.params.multiplier;
        v *= self.params.multiplier;

        let environmental_speed = (u * u + v * v).sqrt();
        let (beta_u, beta_v) =
            self.beta_drift(max_wind_ms, environmental_speed, land_fraction_center);
        u += beta_u;
        v += beta_v;

        // Steering floor: a stalled storm is unphysical in these basins.
        if let Some(floor) = self.params.floor_ms {
            let speed = (u * u + v * v).sqrt();
            if speed < floor {
                if speed > 1e-3 {
                    let scale = floor / speed;
                    u *= scale;
                    v *= scale;
                } else if let Some((du, dv)) = self.cached_direction {
                    u = du * floor;
                    v = dv * floor;
                }
            }
        }

        let in_gulf = self.center_lon < -80.0 && self.center_lat > 10.0 && self.center_lat < 30.0;
        if in_gulf {
            // Emergency recurvature: the farther west and the farther south,
            // the harder the poleward nudge.
            if self.center_lon < -88.0 {
                let west_factor = ((-88.0 - self.center_lon) / 6.0).clamp(0.0, 1.0);
                let lat_factor = ((26.0 - self.center_lat) / 4.0).clamp(0.0, 1.0);
                v += west_factor * 3.0 * (1.0 + lat_factor);
            }
            // Degenerate westward drift into land is clamped.
            u = u.max(GULF_WESTWARD_CAP_MS);
        }

        self.cached_u_steer_ms = u;
        self.cached_v_steer_ms = v;
        let speed = (u * u + v * v).sqrt();
        if speed > 1e-3 {
            self.cached_direction = Some((u / speed, v / speed));
        }
        self.last_steer_frame = frame;
        debug!(
            u_steer = u,
            v_steer = v,
            h3 = self.h3_active,
            "steering cache refreshed"
        );
        (u, v)
    }

    /// Poleward-westward beta-drift vector, m/s.
    fn beta_drift(
        &self,
        max_wind_ms: f64,
        environmental_speed: f64,
        land_fraction_center: f64,
    ) -> (f64, f64) {
        let beta = &self.params.beta;
        if !beta.enabled {
            return (0.0, 0.0);
        }
        let lat = self.center_lat;
        let lon = self.center_lon;

        let mut magnitude =
            beta.base_speed_ms * (1.0 + beta.lat_scale_per_deg * (lat.abs() - 15.0).max(0.0));

        if beta.intensity_scaling && !self.h3_active {
            magnitude *= (max_wind_ms / 30.0).sqrt().clamp(0.7, 1.5);
        }

        // Confidence in the environmental flow and basin damping never
        // stack: only the stronger constraint applies.
        let confidence = if beta.confidence_weighting && !self.h3_active {
            self.params.steer_ref_ms / (self.params.steer_ref_ms + environmental_speed)
        } else {
            1.0
        };
        let basin = if beta.basin_damping && !self.h3_active && lat > 10.0 && lat < 30.0 {
            if lon <= -80.0 {
                0.5
            } else if lon < -75.0 {
                0.5 + 0.5 * (lon + 80.0) / 5.0
            } else {
                1.0
            }
        } else {
            1.0
        };
        magnitude *= confidence.min(basin);

        if beta.longitude_scaling && lon < -80.0 {
            magnitude *= (1.0 - 0.05 * (-80.0 - lon)).clamp(0.5, 1.0);
        }

        // Beta drift is a planetary-vorticity effect of the ocean-coupled
        // vortex; it collapses over land.
        magnitude *= 1.0 - ((land_fraction_center - 0.1) / 0.4).clamp(0.0, 1.0);

        magnitude = magnitude.min(BETA_CAP_MS);
        let angle = if lat >= 0.0 {
            BETA_ANGLE_NORTH_DEG
        } else {
            BETA_ANGLE_SOUTH_DEG
        }
        .to_radians();
        (magnitude * angle.cos(), magnitude * angle.sin())
    }

    /// Continuous position integration on the fine cadence.
    ///
    /// `dt_seconds` is the simulated time since the previous integration.
    /// Per-step displacements are sanity-clamped at one degree.
    pub fn integrate_position(&mut self, dt_seconds: f64, frame: u64) -> f64 {
        let dlat = (self.cached_v_steer_ms * dt_seconds / METERS_PER_DEGREE).clamp(-1.0, 1.0);
        let cos_lat = self.center_lat.to_radians().cos().max(0.1);
        let dlon = (self.cached_u_steer_ms * dt_seconds / (METERS_PER_DEGREE * cos_lat))
            .clamp(-1.0, 1.0);
        self.center_lat += dlat;
        self.center_lon += dlon;
        self.history.push(PositionFix {
            frame,
            lat: self.center_lat,
            lon: self.center_lon,
        });
        // Great-circle-free small-displacement distance, km
        let dist_m = ((dlat * METERS_PER_DEGREE).powi(2)
            + (dlon * METERS_PER_DEGREE * cos_lat).powi(2))
        .sqrt();
        dist_m / 1000.0
    }
}

/// Fill non-finite cells by 1D linear interpolation along the pressure
/// axis (in log pressure), extending the nearest finite neighbor at the
/// column ends. An all-NaN column becomes calm.
fn fill_column_nans(levels: &mut [Field2], levels_hpa: &[f64]) {
    let n_lev = levels.len();
    if n_lev == 0 {
        return;
    }
    let nx = levels[0].nx();
    let ny = levels[0].ny();
    let lnp: Vec<f64> = levels_hpa.iter().map(|p| p.ln()).collect();
    let mut column = vec![0.0f64; n_lev];
    for j in 0..ny {
        for i in 0..nx {
            let mut any_bad = false;
            for l in 0..n_lev {
                column[l] = levels[l].get(i, j);
                if !column[l].is_finite() {
                    any_bad = true;
                }
            }
            if !any_bad {
                continue;
            }
            let finite: Vec<usize> = (0..n_lev).filter(|&l| column[l].is_finite()).collect();
            for l in 0..n_lev {
                if column[l].is_finite() {
                    continue;
                }
                let below = finite.iter().copied().filter(|&f| f < l).last();
                let above = finite.iter().copied().find(|&f| f > l);
                let filled = match (below, above) {
                    (Some(b), Some(a)) => {
                        let t = (lnp[l] - lnp[b]) / (lnp[a] - lnp[b]);
                        column[b] + t * (column[a] - column[b])
                    }
                    (Some(b), None) => column[b],
                    (None, Some(a)) => column[a],
                    (None, None) => 0.0,
                };
                levels[l].set(i, j, filled);
            }
        }
    }
}

/// Midpoint log-pressure thicknesses for the weighted vertical integral.
fn log_pressure_weights(levels_hpa: &[f64]) -> Vec<f64> {
    let n = levels_hpa.len();
    if n == 1 {
        return vec![1.0];
    }
    let lnp: Vec<f64> = levels_hpa.iter().map(|p| p.ln()).collect();
    (0..n)
        .map(|l| {
            let upper = if l + 1 < n {
                0.5 * (lnp[l] + lnp[l + 1])
            } else {
                lnp[l]
            };
            let lower = if l > 0 { 0.5 * (lnp[l - 1] + lnp[l]) } else { lnp[l] };
            (lower - upper).abs()
        })
        .collect()
}

/// Pressure-level weights for tropical oceanic steering, zonal component.
/// Mid-levels dominate; the upper-level anticyclone outflow is suppressed.
fn tropical_u_weight(hpa: f64) -> f64 {
    if hpa < 250.0 {
        0.5
    } else if hpa < 350.0 {
        1.0
    } else if hpa < 450.0 {
        1.5
    } else if hpa <= 600.0 {
        2.5
    } else if hpa < 800.0 {
        2.0
    } else {
        1.0
    }
}

/// Tropical meridional weights keep more of the upper-level contribution:
/// the trough that drives recurvature lives there.
fn tropical_v_weight(hpa: f64) -> f64 {
    if hpa < 350.0 {
        1.0
    } else if hpa < 450.0 {
        1.5
    } else if hpa <= 700.0 {
        2.0
    } else {
        1.0
    }
}

/// Extratropical weights: the storm is steered by the upper-level flow.
fn extratropical_weight(hpa: f64) -> f64 {
    if hpa < 250.0 {
        4.0
    } else if hpa < 350.0 {
        2.0
    } else {
        1.0
    }
}

/// Over land the vortex shallows; low-level flow dominates.
fn land_weight(hpa: f64) -> f64 {
    if hpa >= 850.0 {
        2.0
    } else if hpa >= 700.0 {
        1.5
    } else {
        1.0
    }
}

/// Latitude- and land-blended weights for one pressure level.
fn blended_weights(hpa: f64, extratropical_blend: f64, land_blend: f64) -> (f64, f64) {
    let extra = extratropical_weight(hpa);
    let ocean_u = (1.0 - extratropical_blend) * tropical_u_weight(hpa) + extratropical_blend * extra;
    let ocean_v = (1.0 - extratropical_blend) * tropical_v_weight(hpa) + extratropical_blend * extra;
    let land = land_weight(hpa);
    (
        (1.0 - land_blend) * ocean_u + land_blend * land,
        (1.0 - land_blend) * ocean_v + land_blend * land,
    )
}
