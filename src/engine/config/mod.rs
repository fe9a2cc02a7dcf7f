// ABOUTME: Typed simulation configuration - one structure built at startup and passed by reference
// ABOUTME: Bridges the flat CLI surface into subsystem parameters and persists the per-run manifest

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::engine::core::grid::GridSpec;
use crate::engine::core::reference::ReferenceParameters;
use crate::engine::error::SimulationError;
use crate::engine::physics::advection::InterpolationOrder;
use crate::engine::physics::spectral::VelocityGovernor;
use crate::engine::physics::steering::{BetaDriftParameters, SteeringParameters};
use crate::engine::physics::surface::{
    SurfaceParameters, ThrottleMode, WisheParameters,
};
use crate::engine::physics::thermo::{
    BettsMillerParameters, FirewallParameters, RadiativeCoolingParameters, ThermoParameters,
};

/// Grid and numerics configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GridConfig {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Horizontal grid spacing, km.
    pub dx_km: f64,
    /// Vertical grid spacing, m.
    pub dz_m: f64,
    /// Characteristic velocity scale, m/s.
    pub u_char_ms: f64,
    pub advection_order: u8,
    pub monotonic_advection: bool,
    pub resolution_boost: f64,
    pub smagorinsky_cs: f64,
    pub sponge_strength: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            nx: 128,
            ny: 128,
            nz: 64,
            dx_km: 15.0,
            dz_m: 250.0,
            u_char_ms: 10.0,
            advection_order: 3,
            monotonic_advection: false,
            resolution_boost: 1500.0,
            smagorinsky_cs: 0.17,
            sponge_strength: 0.003,
        }
    }
}

/// Reference-state configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferenceConfig {
    pub theta_surface: f64,
    pub gamma_theta: f64,
    pub scale_height: f64,
    pub base_humidity: f64,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            theta_surface: 300.0,
            gamma_theta: 4.0,
            scale_height: 8500.0,
            base_humidity: 0.018,
        }
    }
}

/// Thermodynamic pipeline configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThermoConfig {
    pub moist_floor: f64,
    pub updraft_only_moist: bool,
    pub core_rh_init: f64,
    /// Initial warm-core anomaly, K.
    pub warm_core_theta_prime: f64,
    pub theta_prime_min: f64,
    pub theta_prime_max: f64,
    pub betts_miller: bool,
    pub tau_bm: f64,
    pub bm_reference_rh: f64,
    pub bm_taper_start: f64,
    pub bm_taper_full: f64,
    pub bm_taper_power: f64,
    pub flux_depth: f64,
    pub precip_efficiency: f64,
    pub warm_rain: bool,
    pub warm_rain_cap: f64,
}

impl Default for ThermoConfig {
    fn default() -> Self {
        Self {
            moist_floor: 0.3,
            updraft_only_moist: false,
            core_rh_init: 0.95,
            warm_core_theta_prime: 5.0,
            theta_prime_min: -50.0,
            theta_prime_max: 50.0,
            betts_miller: false,
            tau_bm: 900.0,
            bm_reference_rh: 0.90,
            bm_taper_start: 200.0,
            bm_taper_full: 2200.0,
            bm_taper_power: 1.0,
            flux_depth: 100.0,
            precip_efficiency: 0.25,
            warm_rain: false,
            warm_rain_cap: 1.5,
        }
    }
}

/// Governor toggles. Each `no_*` flag disables one safety net.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GovernorConfig {
    pub no_flux_governor: bool,
    pub no_thermo_firewalls: bool,
    pub no_velocity_governor: bool,
    pub fully_unconstrained: bool,
    pub buoyancy_cap: f64,
    pub max_updraft: f64,
    pub velocity_soft_limit: f64,
    pub velocity_hard_limit: f64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            no_flux_governor: false,
            no_thermo_firewalls: false,
            // The velocity governor alters energy non-conservatively; it is
            // an opt-in safety net.
            no_velocity_governor: true,
            fully_unconstrained: false,
            buoyancy_cap: 0.5,
            max_updraft: 50.0,
            velocity_soft_limit: 90.0,
            velocity_hard_limit: 120.0,
        }
    }
}

/// WISHE boost configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WisheConfig {
    pub wishe_boost: bool,
    pub wishe_boost_max: f64,
    pub wishe_wind_min: f64,
    pub wishe_wind_max: f64,
}

impl Default for WisheConfig {
    fn default() -> Self {
        Self {
            wishe_boost: false,
            wishe_boost_max: 1.4,
            wishe_wind_min: 15.0,
            wishe_wind_max: 40.0,
        }
    }
}

/// Flux throttle configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub flux_throttle: bool,
    pub flux_throttle_threshold: f64,
    pub proportional_throttle: bool,
    pub theta_prime_soft_limit: f64,
    pub theta_prime_hard_limit: f64,
    pub moisture_floor: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            flux_throttle: false,
            flux_throttle_threshold: 5.0,
            proportional_throttle: false,
            theta_prime_soft_limit: 60.0,
            theta_prime_hard_limit: 100.0,
            moisture_floor: 1.0e-4,
        }
    }
}

/// Optional theta' sinks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SinkConfig {
    pub radiative_cooling: bool,
    pub tau_rad: f64,
    pub dynamic_cooling: bool,
    pub tau_rad_min: f64,
    pub theta_scale: f64,
    pub mean_removal: bool,
    pub environment_relax: bool,
    pub relax_radius: f64,
    pub relax_tau: f64,
    pub cold_diffusion: bool,
    pub cold_diffusion_strength: f64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            radiative_cooling: false,
            tau_rad: 86_400.0,
            dynamic_cooling: false,
            tau_rad_min: 3600.0,
            theta_scale: 20.0,
            mean_removal: false,
            environment_relax: false,
            relax_radius: 300.0,
            relax_tau: 3600.0,
            cold_diffusion: false,
            cold_diffusion_strength: 0.05,
        }
    }
}

/// Steering and moving-nest configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SteeringConfig {
    pub pure_physics: bool,
    pub steering_injection: bool,
    pub annular_steering: bool,
    pub annular_inner_km: f64,
    pub annular_outer_km: f64,
    pub dlm_scale: f64,
    pub dlm_inner_radius: f64,
    pub steering_multiplier: f64,
    pub beta_drift: bool,
    pub beta_drift_speed: f64,
    pub beta_drift_lat_scale: f64,
    pub steering_floor: f64,
    pub no_steering_floor: bool,
    pub steer_ref: f64,
    pub no_basin_damping: bool,
    pub no_confidence_weighting: bool,
    pub no_longitude_scaling: bool,
    pub no_intensity_scaling: bool,
    pub no_h3_boost: bool,
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            pure_physics: false,
            steering_injection: false,
            annular_steering: false,
            annular_inner_km: 200.0,
            annular_outer_km: 600.0,
            dlm_scale: 1.0,
            dlm_inner_radius: 300.0,
            steering_multiplier: 1.0,
            beta_drift: false,
            beta_drift_speed: 2.5,
            beta_drift_lat_scale: 0.05,
            steering_floor: 3.0,
            no_steering_floor: false,
            steer_ref: 6.0,
            no_basin_damping: false,
            no_confidence_weighting: false,
            no_longitude_scaling: false,
            no_intensity_scaling: false,
            no_h3_boost: false,
        }
    }
}

/// Run identity and duration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    pub storm: String,
    pub year: i32,
    pub frames: u64,
    pub target_days: Option<f64>,
    pub plot_interval: u64,
    pub seed: Option<u64>,
    /// Initial intensity override, kt; the best-track genesis fix is used
    /// when absent.
    pub initial_wind_kt: Option<f64>,
    pub seconds_per_frame: f64,
    pub dry_run: bool,
    pub write_manifest: bool,
    pub manifest_dir: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            storm: "HUGO".to_string(),
            year: 1989,
            frames: 100_000,
            target_days: None,
            plot_interval: 7200,
            seed: None,
            initial_wind_kt: Some(50.0),
            seconds_per_frame: 4.0,
            dry_run: false,
            write_manifest: true,
            manifest_dir: "run_manifests".to_string(),
        }
    }
}

/// Complete simulation configuration, built once at startup.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub grid: GridConfig,
    pub reference: ReferenceConfig,
    pub thermo: ThermoConfig,
    pub governors: GovernorConfig,
    pub wishe: WisheConfig,
    pub throttle: ThrottleConfig,
    pub sinks: SinkConfig,
    pub steering: SteeringConfig,
    pub run: RunConfig,
}

impl SimulationConfig {
    /// Validate before any step runs; all failures are `ConfigError`-class.
    pub fn validate(&self) -> Result<(), SimulationError> {
        let g = &self.grid;
        if g.nx < 4 || g.ny < 4 || g.nz < 4 {
            return Err(SimulationError::Config(format!(
                "grid {}x{}x{} too small",
                g.nx, g.ny, g.nz
            )));
        }
        for (name, v) in [
            ("dx_km", g.dx_km),
            ("dz_m", g.dz_m),
            ("u_char", g.u_char_ms),
            ("resolution_boost", g.resolution_boost),
            ("smagorinsky_cs", g.smagorinsky_cs),
            ("seconds_per_frame", self.run.seconds_per_frame),
            ("theta_surface", self.reference.theta_surface),
            ("gamma_theta", self.reference.gamma_theta),
            ("scale_height", self.reference.scale_height),
            ("tau_bm", self.thermo.tau_bm),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(SimulationError::Config(format!(
                    "{name} must be finite and positive, got {v}"
                )));
            }
        }
        if self.run.frames == 0 && self.run.target_days.is_none() {
            return Err(SimulationError::Config(
                "either frames or target_days must be set".to_string(),
            ));
        }
        if self.thermo.theta_prime_min >= self.thermo.theta_prime_max {
            return Err(SimulationError::Config(format!(
                "theta_prime bounds inverted: [{}, {}]",
                self.thermo.theta_prime_min, self.thermo.theta_prime_max
            )));
        }
        if !(0.0..=1.0).contains(&self.thermo.core_rh_init) {
            return Err(SimulationError::Config(format!(
                "core_rh_init must lie in [0, 1], got {}",
                self.thermo.core_rh_init
            )));
        }
        if !(0.0..=1.0).contains(&self.thermo.precip_efficiency) {
            return Err(SimulationError::Config(format!(
                "precip_efficiency must lie in [0, 1], got {}",
                self.thermo.precip_efficiency
            )));
        }
        if self.wishe.wishe_wind_min >= self.wishe.wishe_wind_max {
            return Err(SimulationError::Config(
                "wishe_wind_min must be below wishe_wind_max".to_string(),
            ));
        }
        if self.thermo.bm_taper_start >= self.thermo.bm_taper_full {
            return Err(SimulationError::Config(
                "bm_taper_start must be below bm_taper_full".to_string(),
            ));
        }
        if self.steering.annular_inner_km >= self.steering.annular_outer_km {
            return Err(SimulationError::Config(
                "annular_inner_km must be below annular_outer_km".to_string(),
            ));
        }
        Ok(())
    }

    /// Total frames, honoring a target-days request.
    pub fn total_frames(&self) -> u64 {
        match self.run.target_days {
            Some(days) => (days * 86_400.0 / self.run.seconds_per_frame).round() as u64,
            None => self.run.frames,
        }
    }

    pub fn grid_spec(&self) -> Result<GridSpec, SimulationError> {
        let dx = self.grid.dx_km * 1000.0;
        GridSpec::new(
            self.grid.nx,
            self.grid.ny,
            self.grid.nz,
            dx,
            dx,
            self.grid.dz_m,
            dx,
            self.grid.u_char_ms,
        )
    }

    pub fn reference_parameters(&self) -> ReferenceParameters {
        ReferenceParameters {
            theta_surface: self.reference.theta_surface,
            gamma_theta: self.reference.gamma_theta,
            scale_height: self.reference.scale_height,
            base_humidity: self.reference.base_humidity,
            ..ReferenceParameters::default()
        }
    }

    pub fn interpolation_order(&self) -> InterpolationOrder {
        InterpolationOrder::from_cli(self.grid.advection_order)
    }

    fn firewalls_enabled(&self) -> bool {
        !self.governors.no_thermo_firewalls && !self.governors.fully_unconstrained
    }

    fn flux_governor_enabled(&self) -> bool {
        !self.governors.no_flux_governor && !self.governors.fully_unconstrained
    }

    pub fn velocity_governor(&self) -> Option<VelocityGovernor> {
        if self.governors.no_velocity_governor || self.governors.fully_unconstrained {
            None
        } else {
            Some(VelocityGovernor {
                soft_limit_ms: self.governors.velocity_soft_limit,
                hard_limit_ms: self.governors.velocity_hard_limit,
            })
        }
    }

    pub fn thermo_parameters(&self) -> ThermoParameters {
        ThermoParameters {
            moist_floor: self.thermo.moist_floor,
            updraft_only_moist: self.thermo.updraft_only_moist,
            precip_efficiency: self.thermo.precip_efficiency,
            betts_miller: self.thermo.betts_miller.then(|| BettsMillerParameters {
                tau_s: self.thermo.tau_bm,
                reference_rh: self.thermo.bm_reference_rh,
                taper_start_m: self.thermo.bm_taper_start,
                taper_full_m: self.thermo.bm_taper_full,
                taper_power: self.thermo.bm_taper_power,
            }),
            warm_rain_cap: self.thermo.warm_rain.then_some(self.thermo.warm_rain_cap),
            radiative: self
                .sinks
                .radiative_cooling
                .then(|| RadiativeCoolingParameters {
                    tau_base_s: self.sinks.tau_rad,
                    dynamic: self.sinks.dynamic_cooling,
                    tau_min_s: self.sinks.tau_rad_min,
                    theta_scale_k: self.sinks.theta_scale,
                }),
            mean_removal: self.sinks.mean_removal,
            environment_relax: self
                .sinks
                .environment_relax
                .then_some((self.sinks.relax_radius, self.sinks.relax_tau)),
            cold_diffusion_strength: self
                .sinks
                .cold_diffusion
                .then_some(self.sinks.cold_diffusion_strength),
            firewalls: self.firewalls_enabled().then(|| FirewallParameters {
                buoyancy_cap: self.governors.buoyancy_cap,
                max_updraft_ms: self.governors.max_updraft,
            }),
            moisture_floor: self.throttle.moisture_floor,
            ..ThermoParameters::default()
        }
    }

    pub fn surface_parameters(&self) -> SurfaceParameters {
        let throttle = if !self.throttle.flux_throttle || !self.flux_governor_enabled() {
            ThrottleMode::Off
        } else if self.throttle.proportional_throttle {
            ThrottleMode::Proportional {
                threshold_k_per_min: self.throttle.flux_throttle_threshold,
                theta_soft_limit_k: self.throttle.theta_prime_soft_limit,
                theta_hard_limit_k: self.throttle.theta_prime_hard_limit,
            }
        } else {
            ThrottleMode::Binary {
                threshold_k_per_min: self.throttle.flux_throttle_threshold,
            }
        };
        SurfaceParameters {
            flux_depth_m: self.thermo.flux_depth,
            moisture_floor: self.throttle.moisture_floor,
            wishe: WisheParameters {
                enabled: self.wishe.wishe_boost,
                boost_max: self.wishe.wishe_boost_max,
                wind_min_ms: self.wishe.wishe_wind_min,
                wind_max_ms: self.wishe.wishe_wind_max,
            },
            throttle,
            ..SurfaceParameters::default()
        }
    }

    pub fn steering_parameters(&self) -> SteeringParameters {
        let s = &self.steering;
        SteeringParameters {
            injection_enabled: s.steering_injection && !s.pure_physics,
            annular: s
                .annular_steering
                .then_some((s.annular_inner_km, s.annular_outer_km)),
            dlm_scale: s.dlm_scale,
            dlm_inner_radius_km: s.dlm_inner_radius,
            multiplier: s.steering_multiplier,
            floor_ms: (!s.no_steering_floor).then_some(s.steering_floor),
            steer_ref_ms: s.steer_ref,
            beta: BetaDriftParameters {
                enabled: s.beta_drift && !s.pure_physics,
                base_speed_ms: s.beta_drift_speed,
                lat_scale_per_deg: s.beta_drift_lat_scale,
                intensity_scaling: !s.no_intensity_scaling,
                longitude_scaling: !s.no_longitude_scaling,
                basin_damping: !s.no_basin_damping,
                confidence_weighting: !s.no_confidence_weighting,
                h3_boost: !s.no_h3_boost,
            },
        }
    }
}

/// Per-run manifest persisted next to the logs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunManifest {
    pub version: String,
    pub run_tag: String,
    pub storm: String,
    pub year: i32,
    pub frames: u64,
    pub seed: u64,
    pub grid: (usize, usize, usize),
    pub seconds_per_frame: f64,
    pub simulated_hours: f64,
    pub genesis: GenesisRecord,
    pub manifest_path: String,
    pub config: SimulationConfig,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GenesisRecord {
    pub lat: f64,
    pub lon: f64,
    pub time: DateTime<Utc>,
}

impl RunManifest {
    pub fn write(&self) -> Result<PathBuf, SimulationError> {
        let dir = PathBuf::from(&self.config.run.manifest_dir);
        std::fs::create_dir_all(&dir)
            .map_err(|e| SimulationError::Persistence(e.to_string()))?;
        let path = dir.join(format!("{}.yaml", self.run_tag));
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| SimulationError::Persistence(e.to_string()))?;
        std::fs::write(&path, yaml).map_err(|e| SimulationError::Persistence(e.to_string()))?;
        Ok(path)
    }
}

/// Flat CLI surface mapped into the typed configuration.
#[derive(Debug, Parser)]
#[command(
    name = "maelstrom",
    about = "Tropical cyclone lifecycle simulation on a moving nested domain"
)]
pub struct Cli {
    // Run identity and duration
    #[arg(long, default_value = "HUGO")]
    pub storm: String,
    #[arg(long, default_value_t = 1989)]
    pub year: i32,
    #[arg(long, default_value_t = 100_000)]
    pub frames: u64,
    #[arg(long)]
    pub target_days: Option<f64>,
    #[arg(long, default_value_t = 7200)]
    pub plot_interval: u64,
    #[arg(long)]
    pub seed: Option<u64>,
    /// Initial wind speed, kt
    #[arg(long)]
    pub wind: Option<f64>,
    /// Initialize, print timing, write the manifest, and exit
    #[arg(long)]
    pub dry_run: bool,
    #[arg(long, default_value = "run_manifests")]
    pub manifest_dir: String,

    // Grid
    #[arg(long, default_value_t = 128)]
    pub nx: usize,
    #[arg(long, default_value_t = 128)]
    pub ny: usize,
    #[arg(long, default_value_t = 64)]
    pub nz: usize,
    #[arg(long, default_value_t = 3)]
    pub advection_order: u8,
    #[arg(long)]
    pub monotonic_advection: bool,
    #[arg(long, default_value_t = 1500.0)]
    pub resolution_boost: f64,
    #[arg(long, default_value_t = 0.17)]
    pub smagorinsky_cs: f64,
    #[arg(long, default_value_t = 0.003)]
    pub sponge_strength: f64,

    // Reference state
    #[arg(long, default_value_t = 300.0)]
    pub theta_surface: f64,
    #[arg(long, default_value_t = 4.0)]
    pub gamma_theta: f64,
    #[arg(long, default_value_t = 8500.0)]
    pub scale_height: f64,
    #[arg(long, default_value_t = 0.018)]
    pub base_humidity: f64,

    // Thermodynamics
    #[arg(long, default_value_t = 0.3)]
    pub moist_floor: f64,
    #[arg(long)]
    pub updraft_only_moist: bool,
    #[arg(long, default_value_t = 0.95)]
    pub core_rh_init: f64,
    /// Initial warm core anomaly, K
    #[arg(long, default_value_t = 5.0)]
    pub warm_core_theta_prime: f64,
    #[arg(long, default_value_t = -50.0)]
    pub theta_prime_min: f64,
    #[arg(long, default_value_t = 50.0)]
    pub theta_prime_max: f64,
    #[arg(long)]
    pub betts_miller: bool,
    #[arg(long, default_value_t = 900.0)]
    pub tau_bm: f64,
    #[arg(long, default_value_t = 0.90)]
    pub bm_reference_rh: f64,
    #[arg(long, default_value_t = 200.0)]
    pub bm_taper_start: f64,
    #[arg(long, default_value_t = 2200.0)]
    pub bm_taper_full: f64,
    #[arg(long, default_value_t = 1.0)]
    pub bm_taper_power: f64,
    #[arg(long, default_value_t = 100.0)]
    pub flux_depth: f64,
    #[arg(long, default_value_t = 0.25)]
    pub precip_efficiency: f64,
    #[arg(long)]
    pub warm_rain: bool,
    #[arg(long, default_value_t = 1.5)]
    pub warm_rain_cap: f64,

    // Governors
    #[arg(long)]
    pub no_flux_governor: bool,
    #[arg(long)]
    pub no_thermo_firewalls: bool,
    /// Enable the velocity governor inside the pressure projection
    #[arg(long)]
    pub velocity_governor: bool,
    /// Force the velocity governor off (compatibility flag; wins over
    /// --velocity-governor)
    #[arg(long)]
    pub no_velocity_governor: bool,
    #[arg(long)]
    pub fully_unconstrained: bool,
    #[arg(long, default_value_t = 0.5)]
    pub buoyancy_cap: f64,
    #[arg(long, default_value_t = 50.0)]
    pub max_updraft: f64,

    // WISHE
    #[arg(long)]
    pub wishe_boost: bool,
    #[arg(long, default_value_t = 1.4)]
    pub wishe_boost_max: f64,
    #[arg(long, default_value_t = 15.0)]
    pub wishe_wind_min: f64,
    #[arg(long, default_value_t = 40.0)]
    pub wishe_wind_max: f64,

    // Flux throttle
    #[arg(long)]
    pub flux_throttle: bool,
    #[arg(long, default_value_t = 5.0)]
    pub flux_throttle_threshold: f64,
    #[arg(long)]
    pub proportional_throttle: bool,
    #[arg(long, default_value_t = 60.0)]
    pub theta_prime_soft_limit: f64,
    #[arg(long, default_value_t = 100.0)]
    pub theta_prime_hard_limit: f64,
    #[arg(long, default_value_t = 1.0e-4)]
    pub moisture_floor: f64,

    // Sinks
    #[arg(long)]
    pub radiative_cooling: bool,
    #[arg(long, default_value_t = 86_400.0)]
    pub tau_rad: f64,
    #[arg(long)]
    pub dynamic_cooling: bool,
    #[arg(long, default_value_t = 3600.0)]
    pub tau_rad_min: f64,
    #[arg(long, default_value_t = 20.0)]
    pub theta_scale: f64,
    #[arg(long)]
    pub mean_removal: bool,
    #[arg(long)]
    pub environment_relax: bool,
    #[arg(long, default_value_t = 300.0)]
    pub relax_radius: f64,
    #[arg(long, default_value_t = 3600.0)]
    pub relax_tau: f64,
    #[arg(long)]
    pub cold_diffusion: bool,
    #[arg(long, default_value_t = 0.05)]
    pub cold_diffusion_strength: f64,

    // Steering
    #[arg(long)]
    pub pure_physics: bool,
    #[arg(long)]
    pub steering_injection: bool,
    #[arg(long)]
    pub annular_steering: bool,
    #[arg(long, default_value_t = 200.0)]
    pub annular_inner_km: f64,
    #[arg(long, default_value_t = 600.0)]
    pub annular_outer_km: f64,
    #[arg(long, default_value_t = 1.0)]
    pub dlm_scale: f64,
    #[arg(long, default_value_t = 300.0)]
    pub dlm_inner_radius: f64,
    #[arg(long, default_value_t = 1.0)]
    pub steering_multiplier: f64,
    #[arg(long)]
    pub beta_drift: bool,
    #[arg(long, default_value_t = 2.5)]
    pub beta_drift_speed: f64,
    #[arg(long, default_value_t = 0.05)]
    pub beta_drift_lat_scale: f64,
    #[arg(long, default_value_t = 3.0)]
    pub steering_floor: f64,
    #[arg(long)]
    pub no_steering_floor: bool,
    #[arg(long, default_value_t = 6.0)]
    pub steer_ref: f64,
    #[arg(long)]
    pub no_basin_damping: bool,
    #[arg(long)]
    pub no_confidence_weighting: bool,
    #[arg(long)]
    pub no_longitude_scaling: bool,
    #[arg(long)]
    pub no_intensity_scaling: bool,
    #[arg(long)]
    pub no_h3_boost: bool,
}

impl Cli {
    pub fn into_config(self) -> SimulationConfig {
        SimulationConfig {
            grid: GridConfig {
                nx: self.nx,
                ny: self.ny,
                nz: self.nz,
                advection_order: self.advection_order,
                monotonic_advection: self.monotonic_advection,
                resolution_boost: self.resolution_boost,
                smagorinsky_cs: self.smagorinsky_cs,
                sponge_strength: self.sponge_strength,
                ..GridConfig::default()
            },
            reference: ReferenceConfig {
                theta_surface: self.theta_surface,
                gamma_theta: self.gamma_theta,
                scale_height: self.scale_height,
                base_humidity: self.base_humidity,
            },
            thermo: ThermoConfig {
                moist_floor: self.moist_floor,
                updraft_only_moist: self.updraft_only_moist,
                core_rh_init: self.core_rh_init,
                warm_core_theta_prime: self.warm_core_theta_prime,
                theta_prime_min: self.theta_prime_min,
                theta_prime_max: self.theta_prime_max,
                betts_miller: self.betts_miller,
                tau_bm: self.tau_bm,
                bm_reference_rh: self.bm_reference_rh,
                bm_taper_start: self.bm_taper_start,
                bm_taper_full: self.bm_taper_full,
                bm_taper_power: self.bm_taper_power,
                flux_depth: self.flux_depth,
                precip_efficiency: self.precip_efficiency,
                warm_rain: self.warm_rain,
                warm_rain_cap: self.warm_rain_cap,
            },
            governors: GovernorConfig {
                no_flux_governor: self.no_flux_governor,
                no_thermo_firewalls: self.no_thermo_firewalls,
                no_velocity_governor: self.no_velocity_governor || !self.velocity_governor,
                fully_unconstrained: self.fully_unconstrained,
                buoyancy_cap: self.buoyancy_cap,
                max_updraft: self.max_updraft,
                ..GovernorConfig::default()
            },
            wishe: WisheConfig {
                wishe_boost: self.wishe_boost,
                wishe_boost_max: self.wishe_boost_max,
                wishe_wind_min: self.wishe_wind_min,
                wishe_wind_max: self.wishe_wind_max,
            },
            throttle: ThrottleConfig {
                flux_throttle: self.flux_throttle,
                flux_throttle_threshold: self.flux_throttle_threshold,
                proportional_throttle: self.proportional_throttle,
                theta_prime_soft_limit: self.theta_prime_soft_limit,
                theta_prime_hard_limit: self.theta_prime_hard_limit,
                moisture_floor: self.moisture_floor,
            },
            sinks: SinkConfig {
                radiative_cooling: self.radiative_cooling,
                tau_rad: self.tau_rad,
                dynamic_cooling: self.dynamic_cooling,
                tau_rad_min: self.tau_rad_min,
                theta_scale: self.theta_scale,
                mean_removal: self.mean_removal,
                environment_relax: self.environment_relax,
                relax_radius: self.relax_radius,
                relax_tau: self.relax_tau,
                cold_diffusion: self.cold_diffusion,
                cold_diffusion_strength: self.cold_diffusion_strength,
            },
            steering: SteeringConfig {
                pure_physics: self.pure_physics,
                steering_injection: self.steering_injection,
                annular_steering: self.annular_steering,
                annular_inner_km: self.annular_inner_km,
                annular_outer_km: self.annular_outer_km,
                dlm_scale: self.dlm_scale,
                dlm_inner_radius: self.dlm_inner_radius,
                steering_multiplier: self.steering_multiplier,
                beta_drift: self.beta_drift,
                beta_drift_speed: self.beta_drift_speed,
                beta_drift_lat_scale: self.beta_drift_lat_scale,
                steering_floor: self.steering_floor,
                no_steering_floor: self.no_steering_floor,
                steer_ref: self.steer_ref,
                no_basin_damping: self.no_basin_damping,
                no_confidence_weighting: self.no_confidence_weighting,
                no_longitude_scaling: self.no_longitude_scaling,
                no_intensity_scaling: self.no_intensity_scaling,
                no_h3_boost: self.no_h3_boost,
            },
            run: RunConfig {
                storm: self.storm,
                year: self.year,
                frames: self.frames,
                target_days: self.target_days,
                plot_interval: self.plot_interval,
                seed: self.seed,
                initial_wind_kt: self.wind,
                dry_run: self.dry_run,
                manifest_dir: self.manifest_dir,
                ..RunConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        SimulationConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_grid_and_bounds() {
        let mut cfg = SimulationConfig::default();
        cfg.grid.nx = 2;
        assert!(cfg.validate().is_err());

        let mut cfg = SimulationConfig::default();
        cfg.thermo.theta_prime_min = 60.0;
        assert!(cfg.validate().is_err());

        let mut cfg = SimulationConfig::default();
        cfg.reference.gamma_theta = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_target_days_overrides_frames() {
        let mut cfg = SimulationConfig::default();
        cfg.run.target_days = Some(1.0);
        cfg.run.seconds_per_frame = 4.0;
        assert_eq!(cfg.total_frames(), 21_600);
    }

    #[test]
    fn test_fully_unconstrained_disables_governors() {
        let mut cfg = SimulationConfig::default();
        cfg.governors.fully_unconstrained = true;
        cfg.throttle.flux_throttle = true;
        assert!(cfg.velocity_governor().is_none());
        assert!(cfg.thermo_parameters().firewalls.is_none());
        assert!(matches!(
            cfg.surface_parameters().throttle,
            ThrottleMode::Off
        ));
    }

    #[test]
    fn test_pure_physics_disables_coupling() {
        let mut cfg = SimulationConfig::default();
        cfg.steering.pure_physics = true;
        cfg.steering.steering_injection = true;
        cfg.steering.beta_drift = true;
        let params = cfg.steering_parameters();
        assert!(!params.injection_enabled);
        assert!(!params.beta.enabled);
    }

    #[test]
    fn test_cli_round_trip_through_config() {
        let cli = Cli::parse_from([
            "maelstrom",
            "--storm",
            "IVAN",
            "--year",
            "2004",
            "--frames",
            "500",
            "--betts-miller",
            "--wishe-boost",
            "--steering-injection",
            "--beta-drift",
            "--no-h3-boost",
            "--advection-order",
            "1",
        ]);
        let cfg = cli.into_config();
        cfg.validate().unwrap();
        assert_eq!(cfg.run.storm, "IVAN");
        assert_eq!(cfg.total_frames(), 500);
        assert!(cfg.thermo.betts_miller);
        assert!(cfg.wishe.wishe_boost);
        assert_eq!(cfg.interpolation_order(), InterpolationOrder::Linear);
        let steering = cfg.steering_parameters();
        assert!(steering.injection_enabled);
        assert!(steering.beta.enabled);
        assert!(!steering.beta.h3_boost);
    }

    #[test]
    fn test_manifest_serializes_to_yaml() {
        let cfg = SimulationConfig::default();
        let manifest = RunManifest {
            version: "V7".to_string(),
            run_tag: "test".to_string(),
            storm: cfg.run.storm.clone(),
            year: cfg.run.year,
            frames: 100,
            seed: 1989,
            grid: (cfg.grid.nx, cfg.grid.ny, cfg.grid.nz),
            seconds_per_frame: 4.0,
            simulated_hours: 0.11,
            genesis: GenesisRecord {
                lat: 12.1,
                lon: -26.4,
                time: Utc::now(),
            },
            manifest_path: String::new(),
            config: cfg,
        };
        let yaml = serde_yaml::to_string(&manifest).unwrap();
        assert!(yaml.contains("run_tag: test"));
        assert!(yaml.contains("nx: 128"));
    }
}
