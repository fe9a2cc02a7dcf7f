// ABOUTME: Error taxonomy for the simulation core - fatal and recoverable failure classes
// ABOUTME: Fetch failures are recoverable (revert to cached state); NaN/theta-bound/config errors halt the run

use thiserror::Error;

/// Fatal errors that end a simulation run.
///
/// Everything else is handled locally: fetch failures revert to the last
/// cached environment, interpolation failures fall back to unclamped
/// interpolation, and the Poisson k=0 degeneracy is gauge-fixed silently.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Invalid configuration detected at init, before any step runs.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A prognostic field contains NaN or Inf values.
    #[error("non-finite values detected in {field} at frame {frame}")]
    NonFinite { field: &'static str, frame: u64 },

    /// Potential temperature perturbation escaped its sanity bounds.
    #[error(
        "theta-prime out of bounds at frame {frame}: range [{observed_min:.2}, {observed_max:.2}] K, allowed [{bound_min:.1}, {bound_max:.1}] K"
    )]
    ThetaOutOfBounds {
        frame: u64,
        observed_min: f64,
        observed_max: f64,
        bound_min: f64,
        bound_max: f64,
    },

    /// Best-track lookup failed for the requested storm.
    #[error("no best-track data for {storm} ({year})")]
    UnknownStorm { storm: String, year: i32 },

    /// Manifest or other run artifact could not be written.
    #[error("failed to persist run artifact: {0}")]
    Persistence(String),
}

/// Reanalysis retrieval failure. Always recoverable: the core reverts to the
/// last known good steering targets and land fraction and keeps stepping.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("reanalysis request failed: {0}")]
    Request(String),

    #[error("reanalysis returned non-finite or empty data")]
    InvalidData,

    #[error("reanalysis request timed out after {0:.0} s")]
    Timeout(f64),

    #[error("fetch worker is gone")]
    WorkerGone,
}
