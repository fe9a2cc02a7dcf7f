// ABOUTME: Static zonal basin climatology - SST anchors by latitude and the derived ocean heat content floor
// ABOUTME: Fixed in Earth coordinates; the moving nest resamples it on every recentering event

use crate::engine::core::field::Field2;

/// August North Atlantic SST climatology anchors: (latitude degN, SST degC).
const ATLANTIC_SST_CLIMATOLOGY: [(f64, f64); 13] = [
    (0.0, 27.0),
    (5.0, 28.0),
    (10.0, 28.5),
    (15.0, 29.0),
    (20.0, 28.5),
    (25.0, 27.5),
    (30.0, 26.0),
    (35.0, 24.0),
    (40.0, 21.0),
    (45.0, 18.0),
    (50.0, 15.0),
    (55.0, 12.0),
    (60.0, 10.0),
];

/// Zonally symmetric basin environment.
///
/// SST depends on latitude only; ocean heat content is derived as
/// `max(0, 50 (SST - 26)) + 20` kJ/cm^2. Immutable after construction.
#[derive(Clone, Debug)]
pub struct BasinEnvironment {
    anchors: Vec<(f64, f64)>,
}

impl Default for BasinEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl BasinEnvironment {
    pub fn new() -> Self {
        Self {
            anchors: ATLANTIC_SST_CLIMATOLOGY.to_vec(),
        }
    }

    /// Construct from custom (latitude, SST) anchors, e.g. for other basins.
    pub fn from_anchors(mut anchors: Vec<(f64, f64)>) -> Self {
        anchors.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { anchors }
    }

    /// Climatological SST at a latitude, linear between anchors, clamped
    /// to the table ends.
    pub fn sst_at(&self, lat: f64) -> f64 {
        let lat = lat.abs();
        let first = self.anchors[0];
        let last = self.anchors[self.anchors.len() - 1];
        if lat <= first.0 {
            return first.1;
        }
        if lat >= last.0 {
            return last.1;
        }
        for pair in self.anchors.windows(2) {
            let (lat0, sst0) = pair[0];
            let (lat1, sst1) = pair[1];
            if lat <= lat1 {
                let t = (lat - lat0) / (lat1 - lat0);
                return sst0 + t * (sst1 - sst0);
            }
        }
        last.1
    }

    /// Ocean heat content floor from SST, kJ/cm^2.
    pub fn ohc_from_sst(sst: f64) -> f64 {
        (50.0 * (sst - 26.0)).max(0.0) + 20.0
    }

    /// Resample SST and OHC onto a nest window.
    ///
    /// Row j spans lat_min..lat_max, column i spans lon_min..lon_max; the
    /// longitude axis only fixes the window footprint since the climatology
    /// is zonal.
    pub fn sample(
        &self,
        lat_min: f64,
        lat_max: f64,
        _lon_min: f64,
        _lon_max: f64,
        nx: usize,
        ny: usize,
    ) -> (Field2, Field2) {
        let mut sst = Field2::zeros(nx, ny);
        let mut ohc = Field2::zeros(nx, ny);
        for j in 0..ny {
            let t = if ny > 1 {
                j as f64 / (ny - 1) as f64
            } else {
                0.5
            };
            let lat = lat_min + t * (lat_max - lat_min);
            let sst_val = self.sst_at(lat);
            let ohc_val = Self::ohc_from_sst(sst_val);
            for i in 0..nx {
                sst.set(i, j, sst_val);
                ohc.set(i, j, ohc_val);
            }
        }
        (sst, ohc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sst_interpolates_between_anchors() {
        let basin = BasinEnvironment::new();
        assert!((basin.sst_at(15.0) - 29.0).abs() < 1e-12);
        // Midway between 15 (29.0) and 20 (28.5)
        assert!((basin.sst_at(17.5) - 28.75).abs() < 1e-12);
        // Clamped beyond the table
        assert!((basin.sst_at(75.0) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_ohc_floor() {
        // Cold water never goes below the 20 kJ/cm^2 margin
        assert!((BasinEnvironment::ohc_from_sst(20.0) - 20.0).abs() < 1e-12);
        // 29 C: 50 * 3 + 20
        assert!((BasinEnvironment::ohc_from_sst(29.0) - 170.0).abs() < 1e-12);
    }

    #[test]
    fn test_sample_is_zonal() {
        let basin = BasinEnvironment::new();
        let (sst, ohc) = basin.sample(10.0, 20.0, -60.0, -50.0, 8, 8);
        // Constant along each row, warmer toward the 15N peak
        for j in 0..8 {
            for i in 1..8 {
                assert_eq!(sst.get(i, j), sst.get(0, j));
            }
        }
        assert!(sst.get(0, 0) < sst.get(0, 4));
        assert!(ohc.is_finite());
    }
}
