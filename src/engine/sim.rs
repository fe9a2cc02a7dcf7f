// ABOUTME: Flow core - composes spectral, thermodynamic, surface, and steering subsystems per step
// ABOUTME: The §-ordered pass sequence inside step() is contractual; reordering changes results materially

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::prelude::*;
use tracing::info;

use crate::engine::config::{GenesisRecord, RunManifest, SimulationConfig};
use crate::engine::core::field::{Field2, Field3};
use crate::engine::core::grid::{GridSpec, METERS_PER_DEGREE};
use crate::engine::core::reference::ReferenceState;
use crate::engine::data::{
    DataFetcher, FetchWindow, FetchWorker, FetchedEnvironment, TrackOracle, resample_to_nest,
    smooth_land_fraction,
};
use crate::engine::diagnostics::{RunSummary, SimulationDiagnostics};
use crate::engine::error::SimulationError;
use crate::engine::physics::advection::SemiLagrangianAdvector;
use crate::engine::physics::basin::BasinEnvironment;
use crate::engine::physics::spectral::{ProjectionSettings, SpectralSolver};
use crate::engine::physics::steering::SteeringEngine;
use crate::engine::physics::surface::{SurfaceForcing, SurfaceLayer};
use crate::engine::physics::thermo::ThermodynamicPipeline;
use crate::engine::physics::turbulence::SmagorinskyClosure;

/// m/s per knot.
pub const KT_TO_MS: f64 = 0.514_444;

/// Earth's rotation rate, rad/s.
const EARTH_ROTATION_RATE: f64 = 7.292e-5;

/// Cadence constants, in frames.
const SANITY_CHECK_INTERVAL: u64 = 100;
const MOISTURE_RELAX_INTERVAL: u64 = 10;
const POSITION_INTERVAL: u64 = 100;
const WIND_RECORD_INTERVAL: u64 = 100;

/// Nest recenter trigger: storm displacement from the window center, degrees.
const RECENTER_THRESHOLD_DEG: f64 = 0.25;

/// Bound on waiting for an in-flight reanalysis fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// The five prognostic fields. Created at init, mutated only by the step
/// loop, dimensionless velocities and physical theta'/q.
pub struct PrognosticFields {
    pub u: Field3,
    pub v: Field3,
    pub w: Field3,
    pub theta_p: Field3,
    pub q: Field3,
}

/// Environmental layers on the nest footprint. Rewritten only on
/// recenter/fetch events; read by steering injection and surface fluxes.
pub struct EnvironmentState {
    pub sst: Field2,
    pub ohc: Field2,
    pub land_fraction: Field2,
    /// Deep-layer-mean steering targets, m/s.
    pub u_target: Field2,
    pub v_target: Field2,
}

/// The simulation: moving-nest tropical cyclone solver.
pub struct Simulation {
    config: SimulationConfig,
    grid: GridSpec,
    reference: ReferenceState,
    spectral: SpectralSolver,
    advector: SemiLagrangianAdvector,
    closure: SmagorinskyClosure,
    thermo: ThermodynamicPipeline,
    surface: SurfaceLayer,
    steering: SteeringEngine,
    basin: BasinEnvironment,
    fetch: FetchWorker,
    pub fields: PrognosticFields,
    pub temperature_c: Field3,
    pub env: EnvironmentState,
    pub diagnostics: SimulationDiagnostics,
    frame: u64,
    dt_solver: f64,
    steer_interval: u64,
    genesis_time: DateTime<Utc>,
    window_center: (f64, f64),
    f_coriolis: f64,
    prev_theta_max: f64,
    theta_rate_k_per_min: f64,
    seed: u64,
}

impl Simulation {
    pub fn new(
        config: SimulationConfig,
        fetcher: Box<dyn DataFetcher>,
        oracle: &dyn TrackOracle,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        let grid = config.grid_spec()?;
        let reference =
            ReferenceState::new(config.reference_parameters(), grid.nz, grid.dz_phys)?;
        let genesis = oracle.genesis(&config.run.storm, config.run.year)?;
        let seed = config.run.seed.unwrap_or(config.run.year.unsigned_abs() as u64);

        let spectral = SpectralSolver::new(&grid);
        let advector = SemiLagrangianAdvector::new(
            &grid,
            config.interpolation_order(),
            config.grid.monotonic_advection,
        );
        let closure =
            SmagorinskyClosure::new(&grid, config.grid.smagorinsky_cs, config.grid.resolution_boost);
        let thermo = ThermodynamicPipeline::new(config.thermo_parameters());
        let surface = SurfaceLayer::new(config.surface_parameters());
        let steering =
            SteeringEngine::new(config.steering_parameters(), genesis.lat, genesis.lon);
        let basin = BasinEnvironment::new();

        let (half_lat, half_lon) = grid.window_half_extent_deg(genesis.lat);
        let (sst, ohc) = basin.sample(
            genesis.lat - half_lat,
            genesis.lat + half_lat,
            genesis.lon - half_lon,
            genesis.lon + half_lon,
            grid.nx,
            grid.ny,
        );

        let nx = grid.nx;
        let ny = grid.ny;
        let nz = grid.nz;
        let dt_solver = config.run.seconds_per_frame / grid.t_char();
        let steer_interval = ((3600.0 / config.run.seconds_per_frame).round() as u64).max(1);
        let f_coriolis = 2.0 * EARTH_ROTATION_RATE * genesis.lat.to_radians().sin();

        let mut sim = Self {
            fetch: FetchWorker::spawn(fetcher),
            fields: PrognosticFields {
                u: Field3::zeros(nx, ny, nz),
                v: Field3::zeros(nx, ny, nz),
                w: Field3::zeros(nx, ny, nz),
                theta_p: Field3::zeros(nx, ny, nz),
                q: Field3::zeros(nx, ny, nz),
            },
            temperature_c: Field3::zeros(nx, ny, nz),
            env: EnvironmentState {
                sst,
                ohc,
                land_fraction: Field2::zeros(nx, ny),
                u_target: Field2::zeros(nx, ny),
                v_target: Field2::zeros(nx, ny),
            },
            diagnostics: SimulationDiagnostics::new(),
            frame: 0,
            dt_solver,
            steer_interval,
            genesis_time: genesis.time,
            window_center: (genesis.lat, genesis.lon),
            f_coriolis,
            prev_theta_max: 0.0,
            theta_rate_k_per_min: 0.0,
            seed,
            config,
            grid,
            reference,
            spectral,
            advector,
            closure,
            thermo,
            surface,
            steering,
            basin,
        };

        let initial_wind_kt = sim
            .config
            .run
            .initial_wind_kt
            .unwrap_or(genesis.max_wind_kt);
        sim.initialize_vortex(initial_wind_kt * KT_TO_MS);
        sim.update_temperature();
        sim.prev_theta_max = sim.fields.theta_p.max();

        if !sim.config.steering.pure_physics {
            sim.fetch.request(sim.fetch_window(), sim.genesis_time);
            sim.collect_fetch_result();
            sim.refresh_steering_cache();
        }
        Ok(sim)
    }

    /// Lamb-Oseen azimuthal vortex with a warm core and a moist envelope.
    fn initialize_vortex(&mut self, v_max_ms: f64) {
        let cfg = &self.config;
        let warm_core = cfg.thermo.warm_core_theta_prime;
        let core_rh = cfg.thermo.core_rh_init;
        let ambient_rh = 0.75;
        let r_max = 50_000.0;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let nx = self.grid.nx;
        let ny = self.grid.ny;
        for k in 0..self.grid.nz {
            let z = self.grid.z_phys(k);
            let wind_profile = (-z / 8000.0).exp();
            let warm_profile = (-((z - 6000.0) / 3000.0).powi(2)).exp();
            let pressure = self.reference.pressure(k);
            let theta0 = self.reference.theta0(k);
            for j in 0..ny {
                for i in 0..nx {
                    let dx = (i as f64 - nx as f64 / 2.0) * self.grid.dx_phys;
                    let dy = (j as f64 - ny as f64 / 2.0) * self.grid.dy_phys;
                    let r = (dx * dx + dy * dy).sqrt();
                    let shape = (r / r_max) * (0.5 * (1.0 - (r / r_max).powi(2))).exp();
                    let v_t = v_max_ms * shape * wind_profile;
                    if r > 1.0 {
                        self.fields.u.set(i, j, k, -v_t * dy / r / self.grid.u_char);
                        self.fields.v.set(i, j, k, v_t * dx / r / self.grid.u_char);
                    }

                    let theta_p =
                        warm_core * (-(r / (2.0 * r_max)).powi(2)).exp() * warm_profile;
                    self.fields.theta_p.set(i, j, k, theta_p);

                    let rh = ambient_rh
                        + (core_rh - ambient_rh) * (-(r / 150_000.0).powi(2)).exp();
                    let t_k = ReferenceState::temperature_k(theta0 + theta_p, pressure);
                    let q_sat = ReferenceState::q_saturation(t_k - 273.15, pressure);
                    let noise = 1.0 + 0.01 * (rng.r#gen::<f64>() - 0.5);
                    let q = (rh * q_sat * noise).max(cfg.throttle.moisture_floor);
                    self.fields.q.set(i, j, k, q);
                }
            }
        }
    }

    fn fetch_window(&self) -> FetchWindow {
        let (lat, lon) = self.steering.center();
        let (half_lat, half_lon) = self.grid.window_half_extent_deg(lat);
        FetchWindow::centered(lat, lon, half_lat, half_lon)
    }

    fn simulation_time(&self) -> DateTime<Utc> {
        self.genesis_time
            + ChronoDuration::seconds(
                (self.frame as f64 * self.config.run.seconds_per_frame) as i64,
            )
    }

    pub fn simulated_hours(&self) -> f64 {
        self.frame as f64 * self.config.run.seconds_per_frame / 3600.0
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn reference(&self) -> &ReferenceState {
        &self.reference
    }

    pub fn steering(&self) -> &SteeringEngine {
        &self.steering
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Maximum horizontal wind speed over the domain, m/s.
    pub fn max_wind_ms(&self) -> f64 {
        let mut max2 = 0.0f64;
        for (uu, vv) in self.fields.u.data().iter().zip(self.fields.v.data()) {
            max2 = max2.max(uu * uu + vv * vv);
        }
        max2.sqrt() * self.grid.u_char
    }

    fn land_fraction_center(&self) -> f64 {
        self.env
            .land_fraction
            .get(self.grid.nx / 2, self.grid.ny / 2)
    }

    fn update_temperature(&mut self) {
        for k in 0..self.grid.nz {
            for j in 0..self.grid.ny {
                for i in 0..self.grid.nx {
                    let t_c = self
                        .reference
                        .temperature_c(self.fields.theta_p.get(i, j, k), k);
                    self.temperature_c.set(i, j, k, t_c);
                }
            }
        }
    }

    /// Install a fetched environment: smoothed land fraction plus fresh
    /// deep-layer-mean steering targets.
    fn install_environment(&mut self, fetched: FetchedEnvironment) {
        let mask = resample_to_nest(&fetched.land_sea_mask, self.grid.nx, self.grid.ny);
        self.env.land_fraction = smooth_land_fraction(&mask, 2.0);
        let land_center = self.land_fraction_center();
        let (u_dlm, v_dlm) = self
            .steering
            .deep_layer_mean(&fetched, &self.grid, land_center);
        self.env.u_target = u_dlm;
        self.env.v_target = v_dlm;
    }

    /// Collect an outstanding fetch, reverting to the cached environment
    /// on any failure.
    fn collect_fetch_result(&mut self) {
        if let Some(result) = self.fetch.poll(FETCH_TIMEOUT) {
            match result {
                Ok(env) => self.install_environment(env),
                Err(err) => {
                    info!(error = %err, "fetch failed; keeping last good environment");
                    self.diagnostics.note_fetch_reversion();
                }
            }
        }
    }

    /// Coarse-cadence steering refresh from the current targets.
    fn refresh_steering_cache(&mut self) {
        let max_wind = self.max_wind_ms();
        let land_center = self.land_fraction_center();
        self.steering.refresh_steering(
            &self.env.u_target,
            &self.env.v_target,
            &self.grid,
            max_wind,
            land_center,
            self.frame,
        );
    }

    /// Recenter the nest window onto the storm once it has drifted far
    /// enough: resample the basin, update Coriolis, and queue a fetch.
    fn recenter_if_needed(&mut self) {
        let (lat, lon) = self.steering.center();
        let (wlat, wlon) = self.window_center;
        let cos_lat = lat.to_radians().cos();
        let displacement =
            ((lat - wlat).powi(2) + ((lon - wlon) * cos_lat).powi(2)).sqrt();
        if displacement < RECENTER_THRESHOLD_DEG {
            return;
        }
        self.window_center = (lat, lon);
        let (half_lat, half_lon) = self.grid.window_half_extent_deg(lat);
        let (sst, ohc) = self.basin.sample(
            lat - half_lat,
            lat + half_lat,
            lon - half_lon,
            lon + half_lon,
            self.grid.nx,
            self.grid.ny,
        );
        self.env.sst = sst;
        self.env.ohc = ohc;
        self.f_coriolis = 2.0 * EARTH_ROTATION_RATE * lat.to_radians().sin();
        self.fetch.request(self.fetch_window(), self.simulation_time());
        info!(lat, lon, "nest recentered");
    }

    /// Advance one frame. The pass order below is contractual.
    pub fn step(&mut self) -> Result<(), SimulationError> {
        let dt = self.dt_solver;
        let dt_s = dt * self.grid.t_char();

        // 1. Semi-Lagrangian advection of all prognostic fields
        let u0 = self.fields.u.clone();
        let v0 = self.fields.v.clone();
        let w0 = self.fields.w.clone();
        self.fields.u = self.advector.advect(&u0, &u0, &v0, &w0, dt);
        self.fields.v = self.advector.advect(&v0, &u0, &v0, &w0, dt);
        self.fields.w = self.advector.advect(&w0, &u0, &v0, &w0, dt);
        self.fields.theta_p = self
            .advector
            .advect(&self.fields.theta_p, &u0, &v0, &w0, dt);
        self.fields.q = self.advector.advect(&self.fields.q, &u0, &v0, &w0, dt);

        // 2. Smagorinsky diffusion. The eddy viscosity is clamped at the
        // explicit stability limit of the largest wavenumber.
        let mut nu_t = self.closure.eddy_viscosity(
            &self.spectral,
            &self.fields.u,
            &self.fields.v,
            &self.fields.w,
        );
        let nu_cap = 0.9 / (self.spectral.max_k_squared() * dt);
        nu_t.clamp(0.0, nu_cap);
        let lap = self.spectral.laplacian(&self.fields.u);
        self.fields.u.add_weighted(&nu_t, &lap, dt);
        let lap = self.spectral.laplacian(&self.fields.v);
        self.fields.v.add_weighted(&nu_t, &lap, dt);
        let lap = self.spectral.laplacian(&self.fields.w);
        self.fields.w.add_weighted(&nu_t, &lap, dt);
        let lap = self.spectral.laplacian(&self.fields.theta_p);
        self.fields.theta_p.add_weighted(&nu_t, &lap, dt);
        let lap = self.spectral.laplacian(&self.fields.q);
        self.fields.q.add_weighted(&nu_t, &lap, dt);

        // 3-4. Surface drag and sea-air fluxes (WISHE, throttle, land blend)
        let (center_lat, _) = self.steering.center();
        let forcing = SurfaceForcing {
            dt_seconds: dt_s,
            u_char: self.grid.u_char,
            center_lat_deg: center_lat,
            theta_rate_k_per_min: self.theta_rate_k_per_min,
            theta_prime_max_k: self.prev_theta_max,
            surface_pressure: self.reference.pressure(0),
        };
        self.surface.apply_surface_fluxes(
            &mut self.fields.u,
            &mut self.fields.v,
            &mut self.fields.theta_p,
            &mut self.fields.q,
            &self.temperature_c,
            &self.env.sst,
            &self.env.land_fraction,
            &forcing,
        );

        // 5. Moist adjustment (instant saturation or Betts-Miller)
        let condensed = self.thermo.moist_adjustment(
            &mut self.fields.theta_p,
            &mut self.fields.q,
            &self.reference,
            &self.grid,
            dt_s,
        );
        // 6. Warm-rain cap with virga heating
        let rained = self.thermo.warm_rain(
            &mut self.fields.theta_p,
            &mut self.fields.q,
            &self.reference,
            &self.grid,
        );
        self.diagnostics.add_condensation(condensed + rained);

        // 7. Stratification source on theta'
        self.thermo.stratification(
            &mut self.fields.theta_p,
            &self.fields.w,
            &self.temperature_c,
            &self.fields.q,
            &self.reference,
            &self.grid,
            dt_s,
        );

        // 8. Buoyancy tendency on w
        self.thermo.buoyancy(
            &mut self.fields.w,
            &self.fields.theta_p,
            &self.reference,
            &self.grid,
            dt,
        );

        // 9. Coriolis rotation
        ThermodynamicPipeline::coriolis(
            &mut self.fields.u,
            &mut self.fields.v,
            self.f_coriolis,
            self.grid.t_char(),
            dt,
        );

        // 10. Pressure projection with steering injection
        let steering_restore = if self.steering.params().injection_enabled {
            let (us, vs) = self.steering.cached_steering_ms();
            Some((us / self.grid.u_char, vs / self.grid.u_char))
        } else {
            None
        };
        let settings = ProjectionSettings {
            horizontal_damping: 1.0,
            vertical_damping: 1.0,
            steering_restore,
            governor: self.config.velocity_governor(),
            u_char: self.grid.u_char,
        };
        self.spectral.project(
            &mut self.fields.u,
            &mut self.fields.v,
            &mut self.fields.w,
            &settings,
        );

        // 11. Horizontal edge sponge on momentum
        ThermodynamicPipeline::horizontal_sponge(
            &mut self.fields.u,
            &mut self.fields.v,
            &self.grid,
            self.config.grid.sponge_strength,
        );

        // 12. Vertical sponge over the top 20%
        self.thermo.vertical_sponge(
            &mut self.fields.w,
            &mut self.fields.theta_p,
            &mut self.fields.q,
            &self.reference,
            &self.grid,
        );

        // 13. Far-field moisture relaxation on its own cadence
        if self.frame % MOISTURE_RELAX_INTERVAL == 0 {
            self.thermo.far_field_moisture_relax(
                &mut self.fields.q,
                &self.reference,
                &self.grid,
                dt_s,
                MOISTURE_RELAX_INTERVAL,
            );
        }

        // 14. Optional theta' sinks
        self.thermo.radiative_cooling(&mut self.fields.theta_p, dt_s);
        self.thermo.mean_removal(&mut self.fields.theta_p, &self.grid);
        self.thermo
            .environment_relax(&mut self.fields.theta_p, &self.grid, dt_s);
        self.thermo
            .high_latitude_relax(&mut self.fields.theta_p, &self.grid, center_lat, dt_s);
        self.thermo
            .cold_anomaly_diffusion(&mut self.fields.theta_p, &self.spectral);

        // Moisture floor invariant holds at the end of every step
        self.fields.q.clamp_min(self.config.throttle.moisture_floor);

        // 15. Diagnostic temperature
        self.update_temperature();

        let theta_max = self.fields.theta_p.max();
        self.theta_rate_k_per_min = ((theta_max - self.prev_theta_max) / dt_s * 60.0).abs();
        self.prev_theta_max = theta_max;
        self.diagnostics.record_theta(self.fields.theta_p.max_abs());

        self.frame += 1;

        // 16. Sanity check
        if self.frame % SANITY_CHECK_INTERVAL == 0 {
            self.sanity_check()?;
        }

        // 17-18. Steering cadences and nest recentering
        if !self.config.steering.pure_physics {
            if self.frame % self.steer_interval == 0 {
                self.collect_fetch_result();
                self.refresh_steering_cache();
            }
            if self.frame % POSITION_INTERVAL == 0 {
                let leg_km = self
                    .steering
                    .integrate_position(POSITION_INTERVAL as f64 * dt_s, self.frame);
                self.diagnostics.add_track_leg(leg_km);
                self.recenter_if_needed();
            }
        }

        if self.frame % WIND_RECORD_INTERVAL == 0 {
            let wind = self.max_wind_ms();
            self.diagnostics.record_wind(self.frame, wind);
        }
        if self.config.run.plot_interval > 0 && self.frame % self.config.run.plot_interval == 0 {
            let (lat, lon) = self.steering.center();
            info!(
                frame = self.frame,
                sim_hours = format!("{:.1}", self.simulated_hours()),
                max_wind_ms = format!("{:.1}", self.max_wind_ms()),
                theta_max = format!("{:.2}", theta_max),
                lat = format!("{:.2}", lat),
                lon = format!("{:.2}", lon),
                "progress"
            );
        }
        Ok(())
    }

    fn sanity_check(&mut self) -> Result<(), SimulationError> {
        self.diagnostics.sanity_check(
            self.frame,
            &[
                ("u", &self.fields.u),
                ("v", &self.fields.v),
                ("w", &self.fields.w),
                ("theta_p", &self.fields.theta_p),
                ("q", &self.fields.q),
            ],
            &self.fields.theta_p,
            self.config.thermo.theta_prime_min,
            self.config.thermo.theta_prime_max,
        )
    }

    /// Run to the configured frame count. The summary is emitted even on a
    /// fatal sanity failure.
    pub fn run(&mut self) -> Result<RunSummary, SimulationError> {
        let total = self.config.total_frames();
        info!(
            storm = %self.config.run.storm,
            year = self.config.run.year,
            frames = total,
            seconds_per_frame = self.config.run.seconds_per_frame,
            "simulation starting"
        );
        while self.frame < total {
            if let Err(err) = self.step() {
                let summary = self.diagnostics.summary(self.frame, self.simulated_hours());
                summary.emit();
                return Err(err);
            }
        }
        let summary = self.diagnostics.summary(self.frame, self.simulated_hours());
        summary.emit();
        Ok(summary)
    }

    /// Build the per-run manifest for persistence.
    pub fn manifest(&self) -> RunManifest {
        let run_tag = format!(
            "{}_{}_seed{}",
            self.config.run.storm, self.config.run.year, self.seed
        );
        let total = self.config.total_frames();
        RunManifest {
            version: "maelstrom-0.1".to_string(),
            run_tag,
            storm: self.config.run.storm.clone(),
            year: self.config.run.year,
            frames: total,
            seed: self.seed,
            grid: (self.grid.nx, self.grid.ny, self.grid.nz),
            seconds_per_frame: self.config.run.seconds_per_frame,
            simulated_hours: total as f64 * self.config.run.seconds_per_frame / 3600.0,
            genesis: GenesisRecord {
                lat: self.steering.history()[0].lat,
                lon: self.steering.history()[0].lon,
                time: self.genesis_time,
            },
            manifest_path: self.config.run.manifest_dir.clone(),
            config: self.config.clone(),
        }
    }

    /// Displacement of the storm center from genesis, km.
    pub fn track_displacement_km(&self) -> f64 {
        let first = self.steering.history()[0];
        let (lat, lon) = self.steering.center();
        let cos_lat = lat.to_radians().cos();
        (((lat - first.lat) * METERS_PER_DEGREE).powi(2)
            + ((lon - first.lon) * METERS_PER_DEGREE * cos_lat).powi(2))
        .sqrt()
            / 1000.0
    }
}
