// ABOUTME: End-to-end scenario - a quiescent atmosphere on a warm ocean must stay quiet
// ABOUTME: Zero winds, zero theta', reference moisture: no spin-up, no condensation, no NaNs

use maelstrom::engine::config::SimulationConfig;
use maelstrom::engine::data::{ClimatologicalFetcher, HistoricalTrackOracle};
use maelstrom::engine::sim::Simulation;

fn small_config() -> SimulationConfig {
    let mut cfg = SimulationConfig::default();
    cfg.grid.nx = 16;
    cfg.grid.ny = 16;
    cfg.grid.nz = 16;
    cfg.run.frames = 2000;
    cfg.run.plot_interval = 0;
    cfg.steering.pure_physics = true;
    cfg
}

#[test]
fn quiescent_atmosphere_stays_at_noise_level() {
    let cfg = small_config();
    let mut sim = Simulation::new(
        cfg,
        Box::new(ClimatologicalFetcher::default()),
        &HistoricalTrackOracle,
    )
    .unwrap();

    // Replace the initial vortex with a resting atmosphere in reference
    // state over a uniform 28 C ocean.
    sim.fields.u.fill(0.0);
    sim.fields.v.fill(0.0);
    sim.fields.w.fill(0.0);
    sim.fields.theta_p.fill(0.0);
    for k in 0..16 {
        let q_ref = sim.reference().q_ref(k);
        sim.fields.q.level_mut(k).fill(q_ref);
        let t_c = sim.reference().temperature_c(0.0, k);
        sim.temperature_c.level_mut(k).fill(t_c);
    }
    sim.env.sst.fill(28.0);
    sim.env.land_fraction.fill(0.0);

    for _ in 0..2000 {
        sim.step().unwrap();
    }

    assert!(
        sim.max_wind_ms() < 0.1,
        "quiescent atmosphere spun up to {} m/s",
        sim.max_wind_ms()
    );
    assert_eq!(
        sim.diagnostics.total_condensed, 0.0,
        "condensation occurred in a subsaturated resting atmosphere"
    );
    assert!(sim.fields.theta_p.max_abs() < 1.0);
    assert!(sim.fields.u.is_finite());
    assert!(sim.fields.q.is_finite());
    assert!(sim.fields.q.min() >= 1.0e-4);
}
