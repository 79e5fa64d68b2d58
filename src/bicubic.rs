//! Bicubic surface interpolation over a 4x4 sample neighborhood.
//!
//! Used to reconstruct a dense, smooth field from levels sampled only at
//! mesh vertices, e.g. when rasterizing or contouring a noise grid. The
//! coefficients follow Paul Breeuwsma's cubic-convolution (Catmull-Rom)
//! basis, valid for the unit cell between `samples[1][1]` and
//! `samples[2][2]`.

/// Bicubic interpolator for one grid cell.
///
/// Feed it a 4x4 neighborhood with [`update_coefficients`] and query
/// fractional offsets inside the central cell with [`value`]. Adjacent
/// cells built from the same samples shifted by one share values and first
/// derivatives along their common edge. Callers must pad boundary rows and
/// columns themselves, by replication or extrapolation.
///
/// [`update_coefficients`]: BicubicSurface::update_coefficients
/// [`value`]: BicubicSurface::value
#[derive(Debug, Clone, Copy, Default)]
pub struct BicubicSurface {
    a: [[f64; 4]; 4],
}

impl BicubicSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Precomputes the sixteen polynomial coefficients from a 4x4 grid of
    /// samples. `p[i][j]` holds the sample at x offset `i - 1`, y offset
    /// `j - 1` relative to the cell origin.
    pub fn update_coefficients(&mut self, p: &[[f64; 4]; 4]) {
        let a = &mut self.a;
        a[0][0] = p[1][1];
        a[0][1] = -0.5 * p[1][0] + 0.5 * p[1][2];
        a[0][2] = p[1][0] - 2.5 * p[1][1] + 2.0 * p[1][2] - 0.5 * p[1][3];
        a[0][3] = -0.5 * p[1][0] + 1.5 * p[1][1] - 1.5 * p[1][2] + 0.5 * p[1][3];
        a[1][0] = -0.5 * p[0][1] + 0.5 * p[2][1];
        a[1][1] = 0.25 * p[0][0] - 0.25 * p[0][2] - 0.25 * p[2][0] + 0.25 * p[2][2];
        a[1][2] = -0.5 * p[0][0] + 1.25 * p[0][1] - p[0][2] + 0.25 * p[0][3] + 0.5 * p[2][0]
            - 1.25 * p[2][1]
            + p[2][2]
            - 0.25 * p[2][3];
        a[1][3] = 0.25 * p[0][0] - 0.75 * p[0][1] + 0.75 * p[0][2] - 0.25 * p[0][3] - 0.25 * p[2][0]
            + 0.75 * p[2][1]
            - 0.75 * p[2][2]
            + 0.25 * p[2][3];
        a[2][0] = p[0][1] - 2.5 * p[1][1] + 2.0 * p[2][1] - 0.5 * p[3][1];
        a[2][1] = -0.5 * p[0][0] + 0.5 * p[0][2] + 1.25 * p[1][0] - 1.25 * p[1][2] - p[2][0]
            + p[2][2]
            + 0.25 * p[3][0]
            - 0.25 * p[3][2];
        a[2][2] = p[0][0] - 2.5 * p[0][1] + 2.0 * p[0][2] - 0.5 * p[0][3] - 2.5 * p[1][0]
            + 6.25 * p[1][1]
            - 5.0 * p[1][2]
            + 1.25 * p[1][3]
            + 2.0 * p[2][0]
            - 5.0 * p[2][1]
            + 4.0 * p[2][2]
            - p[2][3]
            - 0.5 * p[3][0]
            + 1.25 * p[3][1]
            - p[3][2]
            + 0.25 * p[3][3];
        a[2][3] = -0.5 * p[0][0] + 1.5 * p[0][1] - 1.5 * p[0][2] + 0.5 * p[0][3] + 1.25 * p[1][0]
            - 3.75 * p[1][1]
            + 3.75 * p[1][2]
            - 1.25 * p[1][3]
            - p[2][0]
            + 3.0 * p[2][1]
            - 3.0 * p[2][2]
            + p[2][3]
            + 0.25 * p[3][0]
            - 0.75 * p[3][1]
            + 0.75 * p[3][2]
            - 0.25 * p[3][3];
        a[3][0] = -0.5 * p[0][1] + 1.5 * p[1][1] - 1.5 * p[2][1] + 0.5 * p[3][1];
        a[3][1] = 0.25 * p[0][0] - 0.25 * p[0][2] - 0.75 * p[1][0] + 0.75 * p[1][2] + 0.75 * p[2][0]
            - 0.75 * p[2][2]
            - 0.25 * p[3][0]
            + 0.25 * p[3][2];
        a[3][2] = -0.5 * p[0][0] + 1.25 * p[0][1] - p[0][2] + 0.25 * p[0][3] + 1.5 * p[1][0]
            - 3.75 * p[1][1]
            + 3.0 * p[1][2]
            - 0.75 * p[1][3]
            - 1.5 * p[2][0]
            + 3.75 * p[2][1]
            - 3.0 * p[2][2]
            + 0.75 * p[2][3]
            + 0.5 * p[3][0]
            - 1.25 * p[3][1]
            + p[3][2]
            - 0.25 * p[3][3];
        a[3][3] = 0.25 * p[0][0] - 0.75 * p[0][1] + 0.75 * p[0][2] - 0.25 * p[0][3] - 0.75 * p[1][0]
            + 2.25 * p[1][1]
            - 2.25 * p[1][2]
            + 0.75 * p[1][3]
            + 0.75 * p[2][0]
            - 2.25 * p[2][1]
            + 2.25 * p[2][2]
            - 0.75 * p[2][3]
            - 0.25 * p[3][0]
            + 0.75 * p[3][1]
            - 0.75 * p[3][2]
            + 0.25 * p[3][3];
    }

    /// Evaluates the interpolated value at `(x, y)` with `x, y` in `[0, 1)`.
    pub fn value(&self, x: f64, y: f64) -> f64 {
        let a = &self.a;
        let x2 = x * x;
        let x3 = x2 * x;
        let y2 = y * y;
        let y3 = y2 * y;
        (a[0][0] + a[0][1] * y + a[0][2] * y2 + a[0][3] * y3)
            + (a[1][0] + a[1][1] * y + a[1][2] * y2 + a[1][3] * y3) * x
            + (a[2][0] + a[2][1] * y + a[2][2] * y2 + a[2][3] * y3) * x2
            + (a[3][0] + a[3][1] * y + a[3][2] * y2 + a[3][3] * y3) * x3
    }
}

/// One-dimensional Catmull-Rom interpolation over four samples, for callers
/// that only have a single row or column available.
pub fn cubic_value(p: &[f64; 4], x: f64) -> f64 {
    p[1] + 0.5
        * x
        * (p[2] - p[0]
            + x * (2.0 * p[0] - 5.0 * p[1] + 4.0 * p[2] - p[3]
                + x * (3.0 * (p[1] - p[2]) + p[3] - p[0])))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface(p: &[[f64; 4]; 4]) -> BicubicSurface {
        let mut s = BicubicSurface::new();
        s.update_coefficients(p);
        s
    }

    #[test]
    fn exact_at_cell_corners() {
        let mut p = [[0.0; 4]; 4];
        for (i, row) in p.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (i * i) as f64 + 0.5 * (j as f64) + 0.25;
            }
        }
        let s = surface(&p);
        assert!((s.value(0.0, 0.0) - p[1][1]).abs() < 1e-12);
        assert!((s.value(1.0, 0.0) - p[2][1]).abs() < 1e-12);
        assert!((s.value(0.0, 1.0) - p[1][2]).abs() < 1e-12);
        assert!((s.value(1.0, 1.0) - p[2][2]).abs() < 1e-12);
    }

    #[test]
    fn reproduces_linear_fields() {
        let mut p = [[0.0; 4]; 4];
        for (i, row) in p.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = 2.0 * i as f64 + 3.0 * j as f64;
            }
        }
        let s = surface(&p);
        for &(x, y) in &[(0.25, 0.5), (0.75, 0.1), (0.5, 0.9)] {
            let expect = 2.0 * (1.0 + x) + 3.0 * (1.0 + y);
            assert!((s.value(x, y) - expect).abs() < 1e-9);
        }
    }

    #[test]
    fn continuous_across_shared_edge() {
        // Two horizontally adjacent cells of the same sample field must
        // agree along the shared column.
        let field = |i: i32, j: i32| ((i * i) as f64).sin() + 0.3 * j as f64;
        let mut left = [[0.0; 4]; 4];
        let mut right = [[0.0; 4]; 4];
        for i in 0..4 {
            for j in 0..4 {
                left[i as usize][j as usize] = field(i, j);
                right[i as usize][j as usize] = field(i + 1, j);
            }
        }
        let l = surface(&left);
        let r = surface(&right);
        for &y in &[0.0, 0.25, 0.5, 0.75] {
            assert!((l.value(1.0, y) - r.value(0.0, y)).abs() < 1e-9);
        }
    }

    #[test]
    fn cubic_value_matches_row() {
        let p = [1.0, 2.0, 3.0, 4.0];
        assert!((cubic_value(&p, 0.0) - 2.0).abs() < 1e-12);
        assert!((cubic_value(&p, 1.0) - 3.0).abs() < 1e-12);
        assert!((cubic_value(&p, 0.5) - 2.5).abs() < 1e-9);
    }
}
