// ABOUTME: CLI entry point - parses the flat option surface and drives one simulation run
// ABOUTME: Delegates all physics to the engine; only logging setup and manifest output live here

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use maelstrom::engine::config::Cli;
use maelstrom::engine::data::{ClimatologicalFetcher, HistoricalTrackOracle};
use maelstrom::engine::sim::Simulation;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config();
    let dry_run = config.run.dry_run;
    let write_manifest = config.run.write_manifest;

    let mut sim = Simulation::new(
        config,
        Box::new(ClimatologicalFetcher::default()),
        &HistoricalTrackOracle,
    )?;

    if write_manifest {
        let path = sim.manifest().write()?;
        info!(path = %path.display(), "manifest written");
    }

    info!(
        seconds_per_frame = sim.config().run.seconds_per_frame,
        total_frames = sim.config().total_frames(),
        simulated_hours = format!(
            "{:.1}",
            sim.config().total_frames() as f64 * sim.config().run.seconds_per_frame / 3600.0
        ),
        "simulation timing"
    );

    if dry_run {
        info!("dry run requested; exiting before the step loop");
        return Ok(());
    }

    sim.run()?;
    Ok(())
}
