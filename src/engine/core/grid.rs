// ABOUTME: Grid geometry and characteristic scales for the triply periodic nest
// ABOUTME: Separates physical spacing (meters) from the dimensionless solver coordinates

use crate::engine::error::SimulationError;

/// Mean meters per degree of latitude, used for nest geometry.
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// Geometry of the moving nest: a triply periodic rectilinear mesh.
///
/// Velocities inside the solver are dimensionless (divided by `u_char`);
/// lengths are divided by `l_char`. The derived `t_char = l_char / u_char`
/// converts solver time to seconds.
#[derive(Clone, Debug)]
pub struct GridSpec {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Physical grid spacing in meters.
    pub dx_phys: f64,
    pub dy_phys: f64,
    pub dz_phys: f64,
    /// Characteristic length scale in meters.
    pub l_char: f64,
    /// Characteristic velocity scale in m/s.
    pub u_char: f64,
}

impl GridSpec {
    pub fn new(
        nx: usize,
        ny: usize,
        nz: usize,
        dx_phys: f64,
        dy_phys: f64,
        dz_phys: f64,
        l_char: f64,
        u_char: f64,
    ) -> Result<Self, SimulationError> {
        if nx < 4 || ny < 4 || nz < 4 {
            return Err(SimulationError::Config(format!(
                "grid too small: {}x{}x{} (minimum 4 points per axis)",
                nx, ny, nz
            )));
        }
        for (name, v) in [
            ("dx", dx_phys),
            ("dy", dy_phys),
            ("dz", dz_phys),
            ("l_char", l_char),
            ("u_char", u_char),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(SimulationError::Config(format!(
                    "grid parameter {name} must be finite and positive, got {v}"
                )));
            }
        }
        Ok(Self {
            nx,
            ny,
            nz,
            dx_phys,
            dy_phys,
            dz_phys,
            l_char,
            u_char,
        })
    }

    /// Characteristic time scale in seconds.
    #[inline]
    pub fn t_char(&self) -> f64 {
        self.l_char / self.u_char
    }

    /// Dimensionless spacings.
    #[inline]
    pub fn dx(&self) -> f64 {
        self.dx_phys / self.l_char
    }

    #[inline]
    pub fn dy(&self) -> f64 {
        self.dy_phys / self.l_char
    }

    #[inline]
    pub fn dz(&self) -> f64 {
        self.dz_phys / self.l_char
    }

    /// Physical height of level k (cell center convention, k=0 at the surface).
    #[inline]
    pub fn z_phys(&self, k: usize) -> f64 {
        k as f64 * self.dz_phys
    }

    /// Total physical domain extents in meters.
    #[inline]
    pub fn extent_x_m(&self) -> f64 {
        self.nx as f64 * self.dx_phys
    }

    #[inline]
    pub fn extent_y_m(&self) -> f64 {
        self.ny as f64 * self.dy_phys
    }

    #[inline]
    pub fn extent_z_m(&self) -> f64 {
        self.nz as f64 * self.dz_phys
    }

    /// Horizontal distance in meters of cell (i, j) from the domain center.
    pub fn radius_m(&self, i: usize, j: usize) -> f64 {
        let dx = (i as f64 - self.nx as f64 / 2.0) * self.dx_phys;
        let dy = (j as f64 - self.ny as f64 / 2.0) * self.dy_phys;
        (dx * dx + dy * dy).sqrt()
    }

    /// Latitude of row j when the nest is centered at `center_lat`.
    pub fn latitude_of_row(&self, j: usize, center_lat: f64) -> f64 {
        center_lat + (j as f64 - self.ny as f64 / 2.0) * self.dy_phys / METERS_PER_DEGREE
    }

    /// Half-extents of the nest window in degrees at the given center latitude.
    pub fn window_half_extent_deg(&self, center_lat: f64) -> (f64, f64) {
        let half_lat = 0.5 * self.extent_y_m() / METERS_PER_DEGREE;
        let cos_lat = center_lat.to_radians().cos().max(0.1);
        let half_lon = 0.5 * self.extent_x_m() / (METERS_PER_DEGREE * cos_lat);
        (half_lat, half_lon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> GridSpec {
        GridSpec::new(128, 128, 64, 15_000.0, 15_000.0, 250.0, 15_000.0, 10.0).unwrap()
    }

    #[test]
    fn test_characteristic_time() {
        let g = grid();
        assert!((g.t_char() - 1500.0).abs() < 1e-9);
        assert!((g.dx() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_degenerate_grid() {
        assert!(GridSpec::new(2, 128, 64, 15e3, 15e3, 250.0, 15e3, 10.0).is_err());
        assert!(GridSpec::new(128, 128, 64, -1.0, 15e3, 250.0, 15e3, 10.0).is_err());
        assert!(GridSpec::new(128, 128, 64, f64::NAN, 15e3, 250.0, 15e3, 10.0).is_err());
    }

    #[test]
    fn test_radius_and_latitude_helpers() {
        let g = grid();
        assert_eq!(g.radius_m(64, 64), 0.0);
        assert!((g.radius_m(65, 64) - 15_000.0).abs() < 1e-9);
        let lat = g.latitude_of_row(64, 15.0);
        assert!((lat - 15.0).abs() < 1e-12);
    }
}
