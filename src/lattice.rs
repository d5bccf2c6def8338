// lattice.rs — B-spline control lattice over a 2-D bounding box.
//
// This is the data structure behind both backends' interpolation surface.
// A lattice with nx × ny cells carries (nx+3) × (ny+3) control values:
// one per knot, plus one phantom row/column on each side so that every
// cell has a full 4×4 control neighbourhood.
//
//   control index a ∈ [0, nx+2] maps to logical knot k = a - 1 ∈ [-1, nx+1]
//
// Three operations:
//
//   fit     — the BA algorithm (Lee/Wolberg/Shin 1997): each data point
//             spreads its value into the 16 surrounding control values,
//             weighted by its squared basis weights. Control values that
//             receive no weight stay 0, so a lattice fit to residuals is
//             a no-op wherever there is no data.
//
//   eval    — tensor-product evaluation: 16 control values blended by
//             B_k(s) * B_l(t).
//
//   refine  — dyadic subdivision to a 2nx × 2ny lattice representing the
//             SAME surface, via the cubic midpoint subdivision masks
//             (1,6,1)/8 at even knots and (1,1)/2 at odd knots. Used by
//             the multilevel driver to flatten the hierarchy into one
//             dense lattice (the form both vex::mba and mba::cloud ship
//             to their evaluators).
//
// Everything is f64; the GPU backend truncates to f32 at upload time.

use crate::bspline::weights;

/// A dense cubic B-spline control lattice over `[xmin, xmax] × [ymin, ymax]`.
#[derive(Clone)]
pub struct Lattice {
    /// Cells along x.
    nx: usize,
    /// Cells along y.
    ny: usize,
    /// Control values, x-major: index = a * (ny + 3) + b.
    phi: Vec<f64>,
    xmin: f64,
    ymin: f64,
    /// Cell size along each axis.
    hx: f64,
    hy: f64,
}

impl Lattice {
    /// Fit a lattice to scattered data with the BA algorithm.
    ///
    /// For each point: locate its cell, compute the 4×4 basis weights
    /// w_kl = B_k(s) B_l(t), and accumulate
    ///
    ///   delta_kl += w_kl^2 * (w_kl * v / sum w^2)
    ///   omega_kl += w_kl^2
    ///
    /// then phi = delta / omega (0 where omega is 0). A single data point
    /// is reproduced exactly; overlapping points are blended in the
    /// least-squares sense.
    ///
    /// # Panics
    /// Panics if `points.len() != values.len()`, if the grid is empty, or
    /// if the bounding box is degenerate.
    pub fn fit(
        lo: [f64; 2],
        hi: [f64; 2],
        nx: usize,
        ny: usize,
        points: &[[f64; 2]],
        values: &[f64],
    ) -> Self {
        assert_eq!(
            points.len(),
            values.len(),
            "point count ({}) must match value count ({})",
            points.len(),
            values.len(),
        );
        assert!(nx >= 1 && ny >= 1, "grid must have at least 1×1 cells (got {nx}×{ny})");
        assert!(
            hi[0] > lo[0] && hi[1] > lo[1],
            "degenerate bounding box: [{:?}, {:?}]",
            lo,
            hi,
        );

        let mut lat = Lattice {
            nx,
            ny,
            phi: vec![0.0; (nx + 3) * (ny + 3)],
            xmin: lo[0],
            ymin: lo[1],
            hx: (hi[0] - lo[0]) / nx as f64,
            hy: (hi[1] - lo[1]) / ny as f64,
        };

        let stride = ny + 3;
        let mut delta = vec![0.0f64; lat.phi.len()];
        let mut omega = vec![0.0f64; lat.phi.len()];

        for (p, &v) in points.iter().zip(values.iter()) {
            let (i, s) = lat.locate_x(p[0]);
            let (j, t) = lat.locate_y(p[1]);
            let wx = weights(s);
            let wy = weights(t);

            // sum of squared weights; >= 1/16 because the 16 weights are
            // non-negative and sum to 1.
            let mut w2_sum = 0.0;
            for &a in &wx {
                for &b in &wy {
                    let w = a * b;
                    w2_sum += w * w;
                }
            }
            let scale = v / w2_sum;

            for (k, &a) in wx.iter().enumerate() {
                for (l, &b) in wy.iter().enumerate() {
                    let w = a * b;
                    let idx = (i + k) * stride + (j + l);
                    delta[idx] += w * w * (w * scale);
                    omega[idx] += w * w;
                }
            }
        }

        for (phi, (&d, &o)) in lat.phi.iter_mut().zip(delta.iter().zip(omega.iter())) {
            if o > 0.0 {
                *phi = d / o;
            }
        }

        lat
    }

    /// Evaluate the surface at `(x, y)`.
    ///
    /// Coordinates outside the bounding box are clamped to the boundary
    /// cell and evaluated on the polynomial continuation; callers that
    /// care should keep queries inside the box.
    #[inline]
    pub fn eval(&self, x: f64, y: f64) -> f64 {
        let (i, s) = self.locate_x(x);
        let (j, t) = self.locate_y(y);
        let wx = weights(s);
        let wy = weights(t);
        let stride = self.ny + 3;

        let mut acc = 0.0;
        for (k, &a) in wx.iter().enumerate() {
            let row = (i + k) * stride + j;
            let mut inner = 0.0;
            for (l, &b) in wy.iter().enumerate() {
                inner += b * self.phi[row + l];
            }
            acc += a * inner;
        }
        acc
    }

    /// Subdivide to a `2nx × 2ny` lattice representing the same surface.
    ///
    /// Separable: refine along x into an intermediate grid, then along y.
    /// Exact up to floating-point round-off (see `refine_preserves_surface`
    /// in the tests).
    pub fn refine(&self) -> Lattice {
        let (nx, ny) = (self.nx, self.ny);
        let (fnx, fny) = (2 * nx, 2 * ny);
        let coarse_stride = ny + 3;

        // Pass 1: x direction. (fnx+3) × (ny+3).
        let mut tmp = vec![0.0f64; (fnx + 3) * coarse_stride];
        for ap in 0..fnx + 3 {
            let (taps, n_taps) = subdivision_taps(ap as i64 - 1);
            for b in 0..coarse_stride {
                let mut acc = 0.0;
                for &(k, w) in &taps[..n_taps] {
                    acc += w * self.phi[(k + 1) as usize * coarse_stride + b];
                }
                tmp[ap * coarse_stride + b] = acc;
            }
        }

        // Pass 2: y direction. (fnx+3) × (fny+3).
        let fine_stride = fny + 3;
        let mut phi = vec![0.0f64; (fnx + 3) * fine_stride];
        for ap in 0..fnx + 3 {
            for bp in 0..fny + 3 {
                let (taps, n_taps) = subdivision_taps(bp as i64 - 1);
                let mut acc = 0.0;
                for &(l, w) in &taps[..n_taps] {
                    acc += w * tmp[ap * coarse_stride + (l + 1) as usize];
                }
                phi[ap * fine_stride + bp] = acc;
            }
        }

        Lattice {
            nx: fnx,
            ny: fny,
            phi,
            xmin: self.xmin,
            ymin: self.ymin,
            hx: self.hx / 2.0,
            hy: self.hy / 2.0,
        }
    }

    /// Element-wise sum with another lattice of the same shape.
    ///
    /// The surfaces add because evaluation is linear in the control values.
    ///
    /// # Panics
    /// Panics if the shapes differ.
    pub fn add(&mut self, other: &Lattice) {
        assert_eq!(
            (self.nx, self.ny),
            (other.nx, other.ny),
            "cannot add lattices of different shape: {}×{} vs {}×{}",
            self.nx,
            self.ny,
            other.nx,
            other.ny,
        );
        for (a, &b) in self.phi.iter_mut().zip(other.phi.iter()) {
            *a += b;
        }
    }

    // --- Accessors (used by the GPU upload path) ---

    #[inline]
    pub fn nx(&self) -> usize {
        self.nx
    }

    #[inline]
    pub fn ny(&self) -> usize {
        self.ny
    }

    #[inline]
    pub fn xmin(&self) -> f64 {
        self.xmin
    }

    #[inline]
    pub fn ymin(&self) -> f64 {
        self.ymin
    }

    #[inline]
    pub fn hx(&self) -> f64 {
        self.hx
    }

    #[inline]
    pub fn hy(&self) -> f64 {
        self.hy
    }

    /// Control values, x-major, length `(nx+3) * (ny+3)`.
    pub fn as_slice(&self) -> &[f64] {
        &self.phi
    }

    // --- Internal helpers ---

    /// Cell index and local coordinate along x. The index is clamped to
    /// [0, nx-1] so that x == xmax lands in the last cell with s == 1.
    #[inline]
    fn locate_x(&self, x: f64) -> (usize, f64) {
        let u = (x - self.xmin) / self.hx;
        let i = (u.floor().max(0.0) as usize).min(self.nx - 1);
        (i, u - i as f64)
    }

    #[inline]
    fn locate_y(&self, y: f64) -> (usize, f64) {
        let v = (y - self.ymin) / self.hy;
        let j = (v.floor().max(0.0) as usize).min(self.ny - 1);
        (j, v - j as f64)
    }
}

impl std::fmt::Debug for Lattice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Lattice {{ {}×{} cells, bbox [{}, {}] + {}×{}, {} control values }}",
            self.nx,
            self.ny,
            self.xmin,
            self.ymin,
            self.hx * self.nx as f64,
            self.hy * self.ny as f64,
            self.phi.len(),
        )
    }
}

/// Subdivision taps for fine logical knot `kp`: up to three
/// `(coarse logical knot, weight)` pairs.
///
/// Even fine knots sit on coarse knots and take (1, 6, 1)/8 of their
/// neighbourhood; odd fine knots sit on cell midpoints and average the
/// two flanking coarse knots. All referenced coarse knots stay within
/// the coarse lattice's [-1, n+1] range for fine knots in [-1, 2n+1].
#[inline]
fn subdivision_taps(kp: i64) -> ([(i64, f64); 3], usize) {
    if kp % 2 == 0 {
        let k = kp / 2;
        ([(k - 1, 0.125), (k, 0.75), (k + 1, 0.125)], 3)
    } else {
        // kp - 1 is even, so the division is exact for negative kp too.
        let k = (kp - 1) / 2;
        ([(k, 0.5), (k + 1, 0.5), (0, 0.0)], 2)
    }
}
