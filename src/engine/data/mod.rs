// ABOUTME: External data contracts - reanalysis fetcher, best-track oracle, and the background fetch worker
// ABOUTME: Fetches run off-thread and install at a safe point; failures revert to the last cached environment

use std::thread;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::engine::core::field::Field2;
pub use crate::engine::error::FetchError;
use crate::engine::error::SimulationError;

/// Geographic window of a reanalysis request (degrees).
#[derive(Clone, Copy, Debug)]
pub struct FetchWindow {
    pub lat_north: f64,
    pub lon_west: f64,
    pub lat_south: f64,
    pub lon_east: f64,
}

impl FetchWindow {
    pub fn centered(center_lat: f64, center_lon: f64, half_lat: f64, half_lon: f64) -> Self {
        Self {
            lat_north: center_lat + half_lat,
            lon_west: center_lon - half_lon,
            lat_south: center_lat - half_lat,
            lon_east: center_lon + half_lon,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (
            0.5 * (self.lat_north + self.lat_south),
            0.5 * (self.lon_west + self.lon_east),
        )
    }
}

/// Multi-level horizontal winds on the fetched window grid, m/s.
#[derive(Clone, Debug)]
pub struct PressureLevelWinds {
    pub levels_hpa: Vec<f64>,
    pub u: Vec<Field2>,
    pub v: Vec<Field2>,
}

/// One complete reanalysis response.
#[derive(Clone, Debug)]
pub struct FetchedEnvironment {
    pub window: FetchWindow,
    pub valid_time: DateTime<Utc>,
    pub winds: PressureLevelWinds,
    pub land_sea_mask: Field2,
}

impl FetchedEnvironment {
    /// Reject structurally broken responses. Non-finite wind cells are
    /// tolerated here (the DLM fills them along the pressure axis); an
    /// all-NaN response is not.
    pub fn validate(&self) -> Result<(), FetchError> {
        let n = self.winds.levels_hpa.len();
        if n == 0 || self.winds.u.len() != n || self.winds.v.len() != n {
            return Err(FetchError::InvalidData);
        }
        let any_finite = self
            .winds
            .u
            .iter()
            .chain(self.winds.v.iter())
            .any(|f| f.data().iter().any(|v| v.is_finite()));
        if !any_finite {
            return Err(FetchError::InvalidData);
        }
        Ok(())
    }

    /// Order levels from the lowest (highest pressure) upward, the layout
    /// the deep-layer-mean integration expects.
    pub fn sort_levels_descending(&mut self) {
        let mut order: Vec<usize> = (0..self.winds.levels_hpa.len()).collect();
        order.sort_by(|&a, &b| {
            self.winds.levels_hpa[b].total_cmp(&self.winds.levels_hpa[a])
        });
        self.winds.levels_hpa = order.iter().map(|&i| self.winds.levels_hpa[i]).collect();
        self.winds.u = order.iter().map(|&i| self.winds.u[i].clone()).collect();
        self.winds.v = order.iter().map(|&i| self.winds.v[i].clone()).collect();
    }
}

/// Reanalysis retrieval contract. Implementations live outside the core;
/// transient retries are their concern, not the caller's.
pub trait DataFetcher: Send {
    fn fetch(
        &self,
        window: &FetchWindow,
        time: DateTime<Utc>,
    ) -> Result<FetchedEnvironment, FetchError>;
}

/// One historical best-track fix.
#[derive(Clone, Copy, Debug)]
pub struct TrackPoint {
    pub time: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub max_wind_kt: f64,
}

/// Best-track provider. Only the genesis fix is consulted in pure-physics
/// mode.
pub trait TrackOracle {
    fn best_track(&self, storm: &str, year: i32) -> Result<Vec<TrackPoint>, SimulationError>;

    fn genesis(&self, storm: &str, year: i32) -> Result<TrackPoint, SimulationError> {
        let track = self.best_track(storm, year)?;
        track
            .first()
            .copied()
            .ok_or_else(|| SimulationError::UnknownStorm {
                storm: storm.to_string(),
                year,
            })
    }
}

/// Deterministic stand-in for the reanalysis layer: zonally sheared trade
/// easterlies giving way to midlatitude westerlies, calm meridional flow,
/// open ocean. Useful for long-haul runs without network access.
#[derive(Clone, Debug)]
pub struct ClimatologicalFetcher {
    /// Sample points per axis of the returned window grid.
    pub resolution: usize,
}

impl Default for ClimatologicalFetcher {
    fn default() -> Self {
        Self { resolution: 33 }
    }
}

impl ClimatologicalFetcher {
    fn zonal_wind(lat: f64, hpa: f64) -> f64 {
        // 0 in the deep tropics, 1 poleward of ~30 degrees
        let midlat = 0.5 * (1.0 + ((lat.abs() - 25.0) / 5.0).tanh());
        // 0 at 850 hPa, 1 at 200 hPa
        let depth = ((850.0 - hpa) / 650.0).clamp(0.0, 1.0);
        let trades = -7.0 * (1.0 - midlat) * (1.0 - 0.5 * depth);
        let westerlies = (8.0 + 14.0 * depth) * midlat;
        trades + westerlies
    }

    fn meridional_wind(lat: f64, hpa: f64) -> f64 {
        // Weak poleward drift aloft on the equatorward flank of the jet
        let depth = ((850.0 - hpa) / 650.0).clamp(0.0, 1.0);
        1.5 * depth * (-(lat.abs() - 30.0).powi(2) / 100.0).exp() * lat.signum()
    }
}

impl DataFetcher for ClimatologicalFetcher {
    fn fetch(
        &self,
        window: &FetchWindow,
        time: DateTime<Utc>,
    ) -> Result<FetchedEnvironment, FetchError> {
        let n = self.resolution.max(2);
        let levels = vec![850.0, 700.0, 600.0, 500.0, 400.0, 300.0, 250.0, 200.0];
        let mut u = Vec::with_capacity(levels.len());
        let mut v = Vec::with_capacity(levels.len());
        for &hpa in &levels {
            let mut fu = Field2::zeros(n, n);
            let mut fv = Field2::zeros(n, n);
            for j in 0..n {
                let t = j as f64 / (n - 1) as f64;
                let lat = window.lat_south + t * (window.lat_north - window.lat_south);
                let uu = Self::zonal_wind(lat, hpa);
                let vv = Self::meridional_wind(lat, hpa);
                for i in 0..n {
                    fu.set(i, j, uu);
                    fv.set(i, j, vv);
                }
            }
            u.push(fu);
            v.push(fv);
        }
        Ok(FetchedEnvironment {
            window: *window,
            valid_time: time,
            winds: PressureLevelWinds {
                levels_hpa: levels,
                u,
                v,
            },
            land_sea_mask: Field2::zeros(n, n),
        })
    }
}

/// Embedded best-track table covering the storms the long-haul runner
/// targets. Sparse fixes are enough: the core only needs genesis and an
/// initial intensity.
#[derive(Clone, Debug, Default)]
pub struct HistoricalTrackOracle;

impl HistoricalTrackOracle {
    fn fix(y: i32, m: u32, d: u32, h: u32, lat: f64, lon: f64, kt: f64) -> TrackPoint {
        TrackPoint {
            time: Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap(),
            lat,
            lon,
            max_wind_kt: kt,
        }
    }
}

impl TrackOracle for HistoricalTrackOracle {
    fn best_track(&self, storm: &str, year: i32) -> Result<Vec<TrackPoint>, SimulationError> {
        let track = match (storm.to_ascii_uppercase().as_str(), year) {
            ("HUGO", 1989) => vec![
                Self::fix(1989, 9, 10, 12, 12.1, -26.4, 35.0),
                Self::fix(1989, 9, 13, 12, 13.6, -43.9, 85.0),
                Self::fix(1989, 9, 15, 12, 15.1, -54.8, 140.0),
                Self::fix(1989, 9, 18, 0, 18.2, -64.9, 120.0),
                Self::fix(1989, 9, 22, 4, 33.0, -80.0, 120.0),
            ],
            ("IVAN", 2004) => vec![
                Self::fix(2004, 9, 3, 6, 9.7, -27.6, 30.0),
                Self::fix(2004, 9, 9, 0, 11.6, -61.4, 115.0),
                Self::fix(2004, 9, 12, 0, 17.3, -78.1, 140.0),
                Self::fix(2004, 9, 16, 6, 30.2, -87.9, 105.0),
            ],
            ("KATRINA", 2005) => vec![
                Self::fix(2005, 8, 23, 18, 23.1, -75.1, 30.0),
                Self::fix(2005, 8, 26, 0, 25.9, -80.3, 70.0),
                Self::fix(2005, 8, 28, 18, 26.3, -88.6, 150.0),
                Self::fix(2005, 8, 29, 11, 29.3, -89.6, 110.0),
            ],
            _ => {
                return Err(SimulationError::UnknownStorm {
                    storm: storm.to_string(),
                    year,
                });
            }
        };
        Ok(track)
    }
}

/// Bilinear resample of a fetched window field onto the nest grid. The
/// window and nest share the same geographic footprint.
pub fn resample_to_nest(src: &Field2, nx: usize, ny: usize) -> Field2 {
    let mut out = Field2::zeros(nx, ny);
    let sx = (src.nx() - 1) as f64 / (nx - 1).max(1) as f64;
    let sy = (src.ny() - 1) as f64 / (ny - 1).max(1) as f64;
    for j in 0..ny {
        for i in 0..nx {
            out.set(i, j, src.sample(i as f64 * sx, j as f64 * sy));
        }
    }
    out
}

/// Gaussian-smoothed land fraction from a raw land-sea mask.
///
/// NaN cells are reset to ocean before smoothing and the result is clipped
/// to [0, 1], so downstream consumers always see finite fractions.
pub fn smooth_land_fraction(mask: &Field2, sigma_cells: f64) -> Field2 {
    let mut clean = mask.clone();
    let replaced = clean.replace_non_finite(0.0);
    if replaced > 0 {
        debug!(replaced, "land-sea mask contained non-finite cells; reset to ocean");
    }
    clean.data_mut().iter_mut().for_each(|v| *v = v.clamp(0.0, 1.0));
    if sigma_cells <= 0.0 {
        return clean;
    }

    let radius = (3.0 * sigma_cells).ceil() as i64;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|d| (-(d as f64).powi(2) / (2.0 * sigma_cells * sigma_cells)).exp())
        .collect();
    let norm: f64 = kernel.iter().sum();

    let nx = clean.nx();
    let ny = clean.ny();
    let mut pass_x = Field2::zeros(nx, ny);
    for j in 0..ny {
        for i in 0..nx {
            let mut acc = 0.0;
            for (ki, kv) in kernel.iter().enumerate() {
                let ii = (i as i64 + ki as i64 - radius).clamp(0, nx as i64 - 1) as usize;
                acc += kv * clean.get(ii, j);
            }
            pass_x.set(i, j, acc / norm);
        }
    }
    let mut out = Field2::zeros(nx, ny);
    for j in 0..ny {
        for i in 0..nx {
            let mut acc = 0.0;
            for (ki, kv) in kernel.iter().enumerate() {
                let jj = (j as i64 + ki as i64 - radius).clamp(0, ny as i64 - 1) as usize;
                acc += kv * pass_x.get(i, jj);
            }
            out.set(i, j, (acc / norm).clamp(0.0, 1.0));
        }
    }
    out
}

type FetchResult = Result<FetchedEnvironment, FetchError>;

/// Off-thread fetch executor.
///
/// The step loop never blocks on the network: requests are queued on
/// recenter events and collected with a bounded timeout at the next
/// steering refresh. A request that timed out is discarded when its late
/// result eventually lands.
pub struct FetchWorker {
    request_tx: Sender<(FetchWindow, DateTime<Utc>)>,
    result_rx: Receiver<FetchResult>,
    in_flight: bool,
    stale: usize,
}

impl FetchWorker {
    pub fn spawn(fetcher: Box<dyn DataFetcher>) -> Self {
        let (request_tx, request_rx) = channel::unbounded::<(FetchWindow, DateTime<Utc>)>();
        let (result_tx, result_rx) = channel::unbounded::<FetchResult>();
        thread::spawn(move || {
            while let Ok((window, time)) = request_rx.recv() {
                let result = fetcher.fetch(&window, time).and_then(|mut env| {
                    env.validate()?;
                    env.sort_levels_descending();
                    Ok(env)
                });
                if result_tx.send(result).is_err() {
                    break;
                }
            }
        });
        Self {
            request_tx,
            result_rx,
            in_flight: false,
            stale: 0,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Queue a fetch. A second request while one is outstanding is dropped;
    /// the nest will ask again on its next recenter.
    pub fn request(&mut self, window: FetchWindow, time: DateTime<Utc>) {
        if self.in_flight {
            return;
        }
        if self.request_tx.send((window, time)).is_ok() {
            self.in_flight = true;
        }
    }

    /// Collect the outstanding result, waiting at most `timeout`. Returns
    /// None when nothing is outstanding.
    pub fn poll(&mut self, timeout: Duration) -> Option<FetchResult> {
        if !self.in_flight {
            return None;
        }
        loop {
            match self.result_rx.recv_timeout(timeout) {
                Ok(result) => {
                    if self.stale > 0 {
                        self.stale -= 1;
                        continue;
                    }
                    self.in_flight = false;
                    return Some(result);
                }
                Err(RecvTimeoutError::Timeout) => {
                    // The late result, if it ever arrives, is garbage.
                    self.stale += 1;
                    self.in_flight = false;
                    return Some(Err(FetchError::Timeout(timeout.as_secs_f64())));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.in_flight = false;
                    return Some(Err(FetchError::WorkerGone));
                }
            }
        }
    }
}
