// ABOUTME: Library interface for the Maelstrom tropical cyclone simulation engine
// ABOUTME: Exposes clean public API for external use while keeping internal organization

pub mod engine;

// Re-export key engine components for library users
pub use engine::config::{Cli, SimulationConfig};
pub use engine::data::{DataFetcher, FetchedEnvironment, TrackOracle};
pub use engine::{FetchError, RunSummary, Simulation, SimulationError};
