// ABOUTME: End-to-end scenario - pure westward steering must translate the nest at the steering speed
// ABOUTME: Validates continuous position integration against the analytic displacement to 1%

use chrono::{DateTime, Utc};

use maelstrom::engine::config::SimulationConfig;
use maelstrom::engine::core::field::Field2;
use maelstrom::engine::core::grid::METERS_PER_DEGREE;
use maelstrom::engine::data::{
    DataFetcher, FetchError, FetchWindow, FetchedEnvironment, HistoricalTrackOracle,
    PressureLevelWinds,
};
use maelstrom::engine::sim::Simulation;

/// Returns the same uniform wind at every level, everywhere, forever.
struct UniformWindFetcher {
    u: f64,
    v: f64,
}

impl DataFetcher for UniformWindFetcher {
    fn fetch(
        &self,
        window: &FetchWindow,
        time: DateTime<Utc>,
    ) -> Result<FetchedEnvironment, FetchError> {
        let n = 17;
        let levels = vec![850.0, 700.0, 500.0, 300.0, 200.0];
        Ok(FetchedEnvironment {
            window: *window,
            valid_time: time,
            winds: PressureLevelWinds {
                u: levels.iter().map(|_| Field2::new(n, n, self.u)).collect(),
                v: levels.iter().map(|_| Field2::new(n, n, self.v)).collect(),
                levels_hpa: levels,
            },
            land_sea_mask: Field2::zeros(n, n),
        })
    }
}

#[test]
fn westward_steering_translates_nest_within_one_percent() {
    let mut cfg = SimulationConfig::default();
    cfg.grid.nx = 16;
    cfg.grid.ny = 16;
    cfg.grid.nz = 16;
    cfg.run.frames = 3000;
    cfg.run.plot_interval = 0;
    cfg.steering.steering_injection = true;
    cfg.steering.no_steering_floor = true;
    // Genesis for HUGO sits at 12.1N; beta drift stays off by default.

    let mut sim = Simulation::new(
        cfg,
        Box::new(UniformWindFetcher { u: -7.0, v: 0.0 }),
        &HistoricalTrackOracle,
    )
    .unwrap();

    let (lat0, lon0) = sim.steering().center();
    let frames = 3000u64;
    for _ in 0..frames {
        sim.step().unwrap();
    }

    // Longitude decreases monotonically along the position history
    let lons: Vec<f64> = sim.steering().history().iter().map(|p| p.lon).collect();
    assert!(lons.len() > 10, "position history not populated");
    assert!(
        lons.windows(2).all(|w| w[1] < w[0]),
        "westward drift must be monotonic"
    );

    let (lat1, lon1) = sim.steering().center();
    assert!((lat1 - lat0).abs() < 1e-6, "no meridional steering requested");

    let dt_total = frames as f64 * 4.0;
    let expected_dlon =
        -7.0 * dt_total / (METERS_PER_DEGREE * lat0.to_radians().cos());
    let actual_dlon = lon1 - lon0;
    assert!(
        ((actual_dlon - expected_dlon) / expected_dlon).abs() < 0.01,
        "drift {actual_dlon:.4} deg vs expected {expected_dlon:.4} deg"
    );
    assert!(sim.fields.u.is_finite());
}
