// ABOUTME: Pseudo-spectral operators on the triply periodic nest - gradients, Laplacian, Poisson projection
// ABOUTME: Owns the FFT plans and wavenumber tables as an explicit backend capability built once at init

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::engine::core::field::Field3;
use crate::engine::core::grid::GridSpec;

/// Coordinate axis selector for spectral derivatives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// Optional velocity safety net applied inside the projection.
///
/// Above the soft threshold the whole fluctuation field is damped by a
/// continuous factor that removes half of the excess; above the hard
/// threshold individual cell vectors are clamped to the hard magnitude.
/// Non-conservative; ships disabled.
#[derive(Clone, Copy, Debug)]
pub struct VelocityGovernor {
    pub soft_limit_ms: f64,
    pub hard_limit_ms: f64,
}

/// Per-call settings for the pressure projection.
#[derive(Clone, Copy, Debug)]
pub struct ProjectionSettings {
    /// Damping factor on the horizontal pressure-gradient correction.
    pub horizontal_damping: f64,
    /// Damping factor on the vertical pressure-gradient correction.
    pub vertical_damping: f64,
    /// When set, the horizontal means restored after projection are these
    /// dimensionless steering components instead of the subtracted
    /// self-means. Couples the vortex to the synoptic environment.
    pub steering_restore: Option<(f64, f64)>,
    pub governor: Option<VelocityGovernor>,
    /// Characteristic velocity, m/s, for governor thresholds.
    pub u_char: f64,
}

/// FFT-based spectral operators bound to one grid.
///
/// All plans and wavenumber tables are built once; the solver is the only
/// numerical backend object and is passed by reference where needed rather
/// than living behind a global.
pub struct SpectralSolver {
    nx: usize,
    ny: usize,
    nz: usize,
    kx: Vec<f64>,
    ky: Vec<f64>,
    kz: Vec<f64>,
    fwd_x: Arc<dyn Fft<f64>>,
    inv_x: Arc<dyn Fft<f64>>,
    fwd_y: Arc<dyn Fft<f64>>,
    inv_y: Arc<dyn Fft<f64>>,
    fwd_z: Arc<dyn Fft<f64>>,
    inv_z: Arc<dyn Fft<f64>>,
}

impl SpectralSolver {
    pub fn new(grid: &GridSpec) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            nx: grid.nx,
            ny: grid.ny,
            nz: grid.nz,
            kx: angular_wavenumbers(grid.nx, grid.dx()),
            ky: angular_wavenumbers(grid.ny, grid.dy()),
            kz: angular_wavenumbers(grid.nz, grid.dz()),
            fwd_x: planner.plan_fft_forward(grid.nx),
            inv_x: planner.plan_fft_inverse(grid.nx),
            fwd_y: planner.plan_fft_forward(grid.ny),
            inv_y: planner.plan_fft_inverse(grid.ny),
            fwd_z: planner.plan_fft_forward(grid.nz),
            inv_z: planner.plan_fft_inverse(grid.nz),
        }
    }

    fn len(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// Forward 3D transform of a real field.
    pub fn fft3(&self, f: &Field3) -> Vec<Complex<f64>> {
        let mut spec: Vec<Complex<f64>> =
            f.data().iter().map(|&v| Complex::new(v, 0.0)).collect();
        // x lanes are contiguous; process() splits the buffer into
        // chunks of the plan length automatically.
        self.fwd_x.process(&mut spec);
        self.transform_strided(&mut spec, Axis::Y, true);
        self.transform_strided(&mut spec, Axis::Z, true);
        spec
    }

    /// Inverse 3D transform, returning the real part (normalized).
    pub fn ifft3_real(&self, mut spec: Vec<Complex<f64>>) -> Field3 {
        self.inv_x.process(&mut spec);
        self.transform_strided(&mut spec, Axis::Y, false);
        self.transform_strided(&mut spec, Axis::Z, false);
        let norm = 1.0 / self.len() as f64;
        let mut out = Field3::zeros(self.nx, self.ny, self.nz);
        for (o, s) in out.data_mut().iter_mut().zip(spec.iter()) {
            *o = s.re * norm;
        }
        out
    }

    /// Gathered lane transform along a strided axis.
    fn transform_strided(&self, data: &mut [Complex<f64>], axis: Axis, forward: bool) {
        let (n_lane, stride, plan) = match (axis, forward) {
            (Axis::Y, true) => (self.ny, self.nx, &self.fwd_y),
            (Axis::Y, false) => (self.ny, self.nx, &self.inv_y),
            (Axis::Z, true) => (self.nz, self.nx * self.ny, &self.fwd_z),
            (Axis::Z, false) => (self.nz, self.nx * self.ny, &self.inv_z),
            (Axis::X, _) => unreachable!("x lanes are contiguous"),
        };
        let mut lane = vec![Complex::new(0.0, 0.0); n_lane];
        match axis {
            Axis::Y => {
                for k in 0..self.nz {
                    for i in 0..self.nx {
                        let base = k * self.ny * self.nx + i;
                        for j in 0..n_lane {
                            lane[j] = data[base + j * stride];
                        }
                        plan.process(&mut lane);
                        for j in 0..n_lane {
                            data[base + j * stride] = lane[j];
                        }
                    }
                }
            }
            Axis::Z => {
                for j in 0..self.ny {
                    for i in 0..self.nx {
                        let base = j * self.nx + i;
                        for k in 0..n_lane {
                            lane[k] = data[base + k * stride];
                        }
                        plan.process(&mut lane);
                        for k in 0..n_lane {
                            data[base + k * stride] = lane[k];
                        }
                    }
                }
            }
            Axis::X => unreachable!(),
        }
    }

    #[inline]
    fn wavenumber_at(&self, idx: usize, axis: Axis) -> f64 {
        let i = idx % self.nx;
        let j = (idx / self.nx) % self.ny;
        let k = idx / (self.nx * self.ny);
        match axis {
            Axis::X => self.kx[i],
            Axis::Y => self.ky[j],
            Axis::Z => self.kz[k],
        }
    }

    /// Largest representable K^2; explicit diffusion must keep
    /// nu K^2 dt below 2 to remain stable.
    pub fn max_k_squared(&self) -> f64 {
        let kmax = |k: &[f64]| k.iter().fold(0.0f64, |a, v| a.max(v.abs()));
        kmax(&self.kx).powi(2) + kmax(&self.ky).powi(2) + kmax(&self.kz).powi(2)
    }

    #[inline]
    fn k_squared_at(&self, idx: usize) -> f64 {
        let i = idx % self.nx;
        let j = (idx / self.nx) % self.ny;
        let k = idx / (self.nx * self.ny);
        self.kx[i] * self.kx[i] + self.ky[j] * self.ky[j] + self.kz[k] * self.kz[k]
    }

    /// Spectral derivative along one axis: IFFT(i k FFT(f)).
    pub fn gradient(&self, f: &Field3, axis: Axis) -> Field3 {
        let mut spec = self.fft3(f);
        for (idx, s) in spec.iter_mut().enumerate() {
            let k = self.wavenumber_at(idx, axis);
            *s = Complex::new(-k * s.im, k * s.re);
        }
        self.ifft3_real(spec)
    }

    /// All three derivatives from a single forward transform.
    pub fn gradients(&self, f: &Field3) -> (Field3, Field3, Field3) {
        let spec = self.fft3(f);
        let mut dx = spec.clone();
        let mut dy = spec.clone();
        let mut dz = spec;
        for idx in 0..self.len() {
            let kx = self.wavenumber_at(idx, Axis::X);
            let ky = self.wavenumber_at(idx, Axis::Y);
            let kz = self.wavenumber_at(idx, Axis::Z);
            let s = dx[idx];
            dx[idx] = Complex::new(-kx * s.im, kx * s.re);
            dy[idx] = Complex::new(-ky * s.im, ky * s.re);
            dz[idx] = Complex::new(-kz * s.im, kz * s.re);
        }
        (
            self.ifft3_real(dx),
            self.ifft3_real(dy),
            self.ifft3_real(dz),
        )
    }

    /// Spectral Laplacian: IFFT(-K^2 FFT(f)).
    pub fn laplacian(&self, f: &Field3) -> Field3 {
        let mut spec = self.fft3(f);
        for (idx, s) in spec.iter_mut().enumerate() {
            let k2 = self.k_squared_at(idx);
            *s *= -k2;
        }
        self.ifft3_real(spec)
    }

    /// Velocity divergence du/dx + dv/dy + dw/dz.
    pub fn divergence(&self, u: &Field3, v: &Field3, w: &Field3) -> Field3 {
        let mut div = self.gradient(u, Axis::X);
        div.add_scaled(&self.gradient(v, Axis::Y), 1.0);
        div.add_scaled(&self.gradient(w, Axis::Z), 1.0);
        div
    }

    /// Poisson pressure projection enforcing incompressibility.
    ///
    /// Subtracts the field means, solves for the pressure of the
    /// fluctuation, removes its gradient, and restores either the
    /// subtracted means or the environmental steering flow. The k=0 mode
    /// of the pressure is gauge-fixed to zero and never surfaced as an
    /// error. Returns the solved pressure field.
    pub fn project(
        &self,
        u: &mut Field3,
        v: &mut Field3,
        w: &mut Field3,
        settings: &ProjectionSettings,
    ) -> Field3 {
        let u_mean = u.mean();
        let v_mean = v.mean();
        let w_mean = w.mean();
        u.map_in_place(|x| x - u_mean);
        v.map_in_place(|x| x - v_mean);
        w.map_in_place(|x| x - w_mean);

        let div = self.divergence(u, v, w);
        let mut p_hat = self.fft3(&div);
        p_hat[0] = Complex::new(0.0, 0.0);
        for idx in 1..self.len() {
            let k2 = self.k_squared_at(idx);
            // Gauge: any residual zero wavenumber combination stays zero.
            if k2 > 0.0 {
                p_hat[idx] = -p_hat[idx] / k2;
            } else {
                p_hat[idx] = Complex::new(0.0, 0.0);
            }
        }
        let pressure = self.ifft3_real(p_hat);

        let (px, py, pz) = self.gradients(&pressure);
        u.add_scaled(&px, -settings.horizontal_damping);
        v.add_scaled(&py, -settings.horizontal_damping);
        w.add_scaled(&pz, -settings.vertical_damping);

        if let Some(governor) = settings.governor {
            self.apply_velocity_governor(u, v, w, governor, settings.u_char);
        }

        match settings.steering_restore {
            Some((u_steer, v_steer)) => {
                u.map_in_place(|x| x + u_steer);
                v.map_in_place(|x| x + v_steer);
            }
            None => {
                u.map_in_place(|x| x + u_mean);
                v.map_in_place(|x| x + v_mean);
            }
        }
        w.map_in_place(|x| x + w_mean);

        pressure
    }

    fn apply_velocity_governor(
        &self,
        u: &mut Field3,
        v: &mut Field3,
        w: &mut Field3,
        governor: VelocityGovernor,
        u_char: f64,
    ) {
        let mut vmax2 = 0.0f64;
        for idx in 0..self.len() {
            let s2 = u.data()[idx] * u.data()[idx]
                + v.data()[idx] * v.data()[idx]
                + w.data()[idx] * w.data()[idx];
            vmax2 = vmax2.max(s2);
        }
        let vmax = vmax2.sqrt() * u_char;
        if vmax > governor.soft_limit_ms {
            let target = governor.soft_limit_ms + 0.5 * (vmax - governor.soft_limit_ms);
            let scale = target / vmax;
            u.scale(scale);
            v.scale(scale);
            w.scale(scale);
        }
        let hard_nd = governor.hard_limit_ms / u_char;
        let hard2 = hard_nd * hard_nd;
        for idx in 0..self.len() {
            let uu = u.data()[idx];
            let vv = v.data()[idx];
            let ww = w.data()[idx];
            let s2 = uu * uu + vv * vv + ww * ww;
            if s2 > hard2 {
                let scale = hard_nd / s2.sqrt();
                u.data_mut()[idx] = uu * scale;
                v.data_mut()[idx] = vv * scale;
                w.data_mut()[idx] = ww * scale;
            }
        }
    }
}

/// Angular wavenumbers 2*pi*fftfreq(n, d) in FFT ordering.
fn angular_wavenumbers(n: usize, d: f64) -> Vec<f64> {
    let n_f = n as f64;
    (0..n)
        .map(|i| {
            let freq = if i <= (n - 1) / 2 {
                i as f64 / (n_f * d)
            } else {
                (i as f64 - n_f) / (n_f * d)
            };
            2.0 * std::f64::consts::PI * freq
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::core::grid::GridSpec;
    use rand::prelude::*;

    fn grid(n: usize) -> GridSpec {
        GridSpec::new(n, n, n, 15_000.0, 15_000.0, 15_000.0, 15_000.0, 10.0).unwrap()
    }

    fn random_field(g: &GridSpec, seed: u64) -> Field3 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut f = Field3::zeros(g.nx, g.ny, g.nz);
        for v in f.data_mut() {
            *v = rng.r#gen::<f64>() - 0.5;
        }
        f
    }

    fn settings() -> ProjectionSettings {
        ProjectionSettings {
            horizontal_damping: 1.0,
            vertical_damping: 1.0,
            steering_restore: None,
            governor: None,
            u_char: 10.0,
        }
    }

    #[test]
    fn test_fft_round_trip_is_identity() {
        let g = grid(8);
        let solver = SpectralSolver::new(&g);
        let f = random_field(&g, 1);
        let back = solver.ifft3_real(solver.fft3(&f));
        for (a, b) in f.data().iter().zip(back.data()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_gradient_of_sine_is_cosine() {
        let n = 16;
        // dx chosen so the domain spans exactly 2*pi in dimensionless units
        let dx_nd = 2.0 * std::f64::consts::PI / n as f64;
        let dx_phys = dx_nd * 15_000.0;
        let g = GridSpec::new(n, n, n, dx_phys, dx_phys, dx_phys, 15_000.0, 10.0).unwrap();
        let solver = SpectralSolver::new(&g);
        let mut f = Field3::zeros(n, n, n);
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    f.set(i, j, k, (i as f64 * dx_nd).sin());
                }
            }
        }
        let df = solver.gradient(&f, Axis::X);
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    let expected = (i as f64 * dx_nd).cos();
                    assert!(
                        (df.get(i, j, k) - expected).abs() < 1e-10,
                        "d/dx mismatch at i={i}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_projection_removes_divergence() {
        let g = grid(8);
        let solver = SpectralSolver::new(&g);
        let mut u = random_field(&g, 2);
        let mut v = random_field(&g, 3);
        let mut w = random_field(&g, 4);
        solver.project(&mut u, &mut v, &mut w, &settings());
        let div = solver.divergence(&u, &v, &w);
        assert!(div.max_abs() < 1e-10, "residual divergence {}", div.max_abs());
    }

    #[test]
    fn test_projection_is_idempotent() {
        let g = grid(8);
        let solver = SpectralSolver::new(&g);
        let mut u = random_field(&g, 5);
        let mut v = random_field(&g, 6);
        let mut w = random_field(&g, 7);
        solver.project(&mut u, &mut v, &mut w, &settings());
        let (u1, v1, w1) = (u.clone(), v.clone(), w.clone());
        solver.project(&mut u, &mut v, &mut w, &settings());
        for (a, b) in u.data().iter().zip(u1.data()) {
            assert!((a - b).abs() < 1e-10);
        }
        for (a, b) in v.data().iter().zip(v1.data()) {
            assert!((a - b).abs() < 1e-10);
        }
        for (a, b) in w.data().iter().zip(w1.data()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_pressure_gauge_is_zero_mean() {
        let g = grid(8);
        let solver = SpectralSolver::new(&g);
        let mut u = random_field(&g, 8);
        let mut v = random_field(&g, 9);
        let mut w = random_field(&g, 10);
        let p = solver.project(&mut u, &mut v, &mut w, &settings());
        assert!(p.mean().abs() < 1e-12, "pressure gauge drift {}", p.mean());
    }

    #[test]
    fn test_steering_restore_sets_horizontal_mean() {
        let g = grid(8);
        let solver = SpectralSolver::new(&g);
        let mut u = random_field(&g, 11);
        let mut v = random_field(&g, 12);
        let mut w = random_field(&g, 13);
        let mut s = settings();
        s.steering_restore = Some((0.3, -0.2));
        solver.project(&mut u, &mut v, &mut w, &s);
        assert!((u.mean() - 0.3).abs() < 1e-10);
        assert!((v.mean() + 0.2).abs() < 1e-10);
    }

    #[test]
    fn test_governor_hard_clamp_bounds_speed() {
        let g = grid(8);
        let solver = SpectralSolver::new(&g);
        let mut u = Field3::new(g.nx, g.ny, g.nz, 0.0);
        // One violent cell: 40x u_char = 400 m/s
        u.set(2, 2, 2, 40.0);
        let mut v = Field3::zeros(g.nx, g.ny, g.nz);
        let mut w = Field3::zeros(g.nx, g.ny, g.nz);
        let mut s = settings();
        s.governor = Some(VelocityGovernor {
            soft_limit_ms: 90.0,
            hard_limit_ms: 120.0,
        });
        solver.project(&mut u, &mut v, &mut w, &s);
        let mut vmax = 0.0f64;
        for idx in 0..u.len() {
            let s2 = u.data()[idx].powi(2) + v.data()[idx].powi(2) + w.data()[idx].powi(2);
            vmax = vmax.max(s2.sqrt() * 10.0);
        }
        // Mean restoration can nudge the magnitude slightly past the clamp
        assert!(vmax < 125.0, "governed speed {vmax} m/s");
    }
}
