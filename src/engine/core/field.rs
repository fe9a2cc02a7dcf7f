// ABOUTME: Flat-layout dense field arrays for 3D prognostic and 2D environmental data
// ABOUTME: Cache-efficient Vec-backed storage with elementwise helpers and finite checks

use rayon::prelude::*;

/// Dense 3D scalar field with flat memory layout.
///
/// Index order is x-fastest: `idx = (k * ny + j) * nx + i`, so horizontal
/// x-rows are contiguous and FFT lanes along x need no gather step.
#[derive(Clone, Debug)]
pub struct Field3 {
    data: Vec<f64>,
    nx: usize,
    ny: usize,
    nz: usize,
}

impl Field3 {
    pub fn new(nx: usize, ny: usize, nz: usize, fill: f64) -> Self {
        Self {
            data: vec![fill; nx * ny * nz],
            nx,
            ny,
            nz,
        }
    }

    pub fn zeros(nx: usize, ny: usize, nz: usize) -> Self {
        Self::new(nx, ny, nz, 0.0)
    }

    #[inline]
    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(
            i < self.nx && j < self.ny && k < self.nz,
            "Field3 index out of bounds: ({}, {}, {}) for {}x{}x{}",
            i,
            j,
            k,
            self.nx,
            self.ny,
            self.nz
        );
        (k * self.ny + j) * self.nx + i
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        let idx = self.idx(i, j, k);
        unsafe { *self.data.get_unchecked(idx) }
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: f64) {
        let idx = self.idx(i, j, k);
        unsafe {
            *self.data.get_unchecked_mut(idx) = value;
        }
    }

    #[inline]
    pub fn nx(&self) -> usize {
        self.nx
    }

    #[inline]
    pub fn ny(&self) -> usize {
        self.ny
    }

    #[inline]
    pub fn nz(&self) -> usize {
        self.nz
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    pub fn min(&self) -> f64 {
        self.data.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0f64, |acc, v| acc.max(v.abs()))
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            0.0
        } else {
            self.sum() / self.data.len() as f64
        }
    }

    /// Horizontal mean over one z-level.
    pub fn level_mean(&self, k: usize) -> f64 {
        let plane = self.nx * self.ny;
        let start = k * plane;
        self.data[start..start + plane].iter().sum::<f64>() / plane as f64
    }

    /// Contiguous slice of one z-level.
    pub fn level(&self, k: usize) -> &[f64] {
        let plane = self.nx * self.ny;
        &self.data[k * plane..(k + 1) * plane]
    }

    pub fn level_mut(&mut self, k: usize) -> &mut [f64] {
        let plane = self.nx * self.ny;
        &mut self.data[k * plane..(k + 1) * plane]
    }

    pub fn map_in_place<F>(&mut self, f: F)
    where
        F: Fn(f64) -> f64 + Sync + Send,
    {
        self.data.par_iter_mut().for_each(|v| *v = f(*v));
    }

    /// `self += scale * other`, elementwise.
    pub fn add_scaled(&mut self, other: &Field3, scale: f64) {
        debug_assert_eq!(self.data.len(), other.data.len());
        self.data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .for_each(|(a, b)| *a += scale * b);
    }

    /// `self += weights .* other * scale`, elementwise.
    pub fn add_weighted(&mut self, weights: &Field3, other: &Field3, scale: f64) {
        debug_assert_eq!(self.data.len(), other.data.len());
        debug_assert_eq!(self.data.len(), weights.data.len());
        self.data
            .par_iter_mut()
            .zip(weights.data.par_iter().zip(other.data.par_iter()))
            .for_each(|(a, (w, b))| *a += w * b * scale);
    }

    pub fn scale(&mut self, factor: f64) {
        self.data.par_iter_mut().for_each(|v| *v *= factor);
    }

    pub fn clamp_min(&mut self, floor: f64) {
        self.data.par_iter_mut().for_each(|v| {
            if *v < floor {
                *v = floor;
            }
        });
    }

    pub fn clamp(&mut self, lo: f64, hi: f64) {
        self.data.par_iter_mut().for_each(|v| *v = v.clamp(lo, hi));
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

/// Dense 2D scalar field with flat row-major layout (`idx = j * nx + i`).
/// Used for environmental layers on the nest footprint: SST, OHC, land
/// fraction, and steering targets.
#[derive(Clone, Debug)]
pub struct Field2 {
    data: Vec<f64>,
    nx: usize,
    ny: usize,
}

impl Field2 {
    pub fn new(nx: usize, ny: usize, fill: f64) -> Self {
        Self {
            data: vec![fill; nx * ny],
            nx,
            ny,
        }
    }

    pub fn zeros(nx: usize, ny: usize) -> Self {
        Self::new(nx, ny, 0.0)
    }

    #[inline]
    pub fn idx(&self, i: usize, j: usize) -> usize {
        debug_assert!(
            i < self.nx && j < self.ny,
            "Field2 index out of bounds: ({}, {}) for {}x{}",
            i,
            j,
            self.nx,
            self.ny
        );
        j * self.nx + i
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let idx = self.idx(i, j);
        unsafe { *self.data.get_unchecked(idx) }
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        let idx = self.idx(i, j);
        unsafe {
            *self.data.get_unchecked_mut(idx) = value;
        }
    }

    #[inline]
    pub fn nx(&self) -> usize {
        self.nx
    }

    #[inline]
    pub fn ny(&self) -> usize {
        self.ny
    }

    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            0.0
        } else {
            self.data.iter().sum::<f64>() / self.data.len() as f64
        }
    }

    pub fn min(&self) -> f64 {
        self.data.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Bilinear sample at fractional grid coordinates, clamped to the edges.
    pub fn sample(&self, x: f64, y: f64) -> f64 {
        let x = x.clamp(0.0, (self.nx - 1) as f64);
        let y = y.clamp(0.0, (self.ny - 1) as f64);
        let i0 = x.floor() as usize;
        let j0 = y.floor() as usize;
        let i1 = (i0 + 1).min(self.nx - 1);
        let j1 = (j0 + 1).min(self.ny - 1);
        let fx = x - i0 as f64;
        let fy = y - j0 as f64;
        let top = self.get(i0, j0) * (1.0 - fx) + self.get(i1, j0) * fx;
        let bot = self.get(i0, j1) * (1.0 - fx) + self.get(i1, j1) * fx;
        top * (1.0 - fy) + bot * fy
    }

    /// Replace non-finite entries with the given value.
    pub fn replace_non_finite(&mut self, value: f64) -> usize {
        let mut replaced = 0;
        for v in &mut self.data {
            if !v.is_finite() {
                *v = value;
                replaced += 1;
            }
        }
        replaced
    }
}
