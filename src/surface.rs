// surface.rs — multilevel B-spline approximation (the CPU backend).
//
// The multilevel loop (Lee/Wolberg/Shin 1997, as shipped by mba::cloud and
// vex::mba):
//
//   residual = values
//   for each level:
//       fit a lattice to the residual on the current grid
//       subtract the lattice's prediction from the residual
//       merge the lattice into the running sum (refine the sum, then add)
//       stop if max |residual| <= tolerance, else double the grid
//
// Coarse levels capture the broad shape; fine levels fix local detail where
// data exists. Because each level is fit to residuals, a cell with no data
// contributes nothing at that level. The flattened result is one dense
// lattice, which is what the GPU backend uploads.
//
// Evaluation of many queries is embarrassingly parallel: each output slot
// is written exactly once from read-only inputs, so `eval_into` hands the
// loop to rayon with no further synchronisation.

use rayon::prelude::*;

use crate::lattice::Lattice;

/// Build parameters for [`MbaSurface::build`].
///
/// The defaults match the ones `vex::mba` applies when the caller passes
/// only a grid: up to 8 levels, stopping early once the worst residual
/// drops below 1e-8.
#[derive(Debug, Clone, Copy)]
pub struct MbaParams {
    /// Initial grid resolution in cells per axis. Doubled at every level.
    pub grid: [usize; 2],
    /// Maximum number of refinement levels.
    pub max_levels: usize,
    /// Stop refining once max |residual| falls below this.
    pub tolerance: f64,
}

impl Default for MbaParams {
    fn default() -> Self {
        MbaParams {
            grid: [2, 2],
            max_levels: 8,
            tolerance: 1e-8,
        }
    }
}

/// A scattered-data approximation surface, flattened to one dense lattice.
///
/// Built once, then read-only: evaluation never mutates, so a surface can
/// be shared across threads freely.
pub struct MbaSurface {
    lattice: Lattice,
    /// Worst absolute residual at the data points after the final level.
    residual: f64,
    /// Number of levels actually fit (may be fewer than `max_levels` if
    /// the tolerance was reached early).
    levels: usize,
}

impl MbaSurface {
    /// Fit a surface to `values` at `points` over the box `[lo, hi]`.
    ///
    /// # Panics
    /// Panics if the point set is empty, if the point and value counts
    /// differ, or if the bounding box is degenerate. A surface fit to
    /// nothing is a caller bug, not a recoverable condition.
    pub fn build(
        lo: [f64; 2],
        hi: [f64; 2],
        points: &[[f64; 2]],
        values: &[f64],
        params: MbaParams,
    ) -> Self {
        assert!(!points.is_empty(), "cannot fit a surface to an empty point set");
        assert_eq!(
            points.len(),
            values.len(),
            "point count ({}) must match value count ({})",
            points.len(),
            values.len(),
        );
        assert!(params.max_levels >= 1, "max_levels must be at least 1");

        let [mut nx, mut ny] = params.grid;
        let mut residual: Vec<f64> = values.to_vec();
        let mut acc: Option<Lattice> = None;
        let mut max_err = f64::INFINITY;
        let mut levels = 0;

        for _ in 0..params.max_levels {
            let lat = Lattice::fit(lo, hi, nx, ny, points, &residual);

            max_err = 0.0f64;
            for (r, p) in residual.iter_mut().zip(points.iter()) {
                *r -= lat.eval(p[0], p[1]);
                max_err = max_err.max(r.abs());
            }

            acc = Some(match acc {
                None => lat,
                Some(prev) => {
                    let mut fine = prev.refine();
                    fine.add(&lat);
                    fine
                }
            });
            levels += 1;

            if max_err <= params.tolerance {
                break;
            }
            nx *= 2;
            ny *= 2;
        }

        MbaSurface {
            // max_levels >= 1 is asserted above, so the loop ran at least once.
            lattice: acc.expect("at least one level was fit"),
            residual: max_err,
            levels,
        }
    }

    /// Evaluate the surface at a single point.
    #[inline]
    pub fn eval(&self, x: f64, y: f64) -> f64 {
        self.lattice.eval(x, y)
    }

    /// Evaluate the surface at every `(xs[i], ys[i])`, writing `out[i]`.
    ///
    /// Runs on the rayon thread pool; the call joins before returning, so
    /// a timer stopped immediately afterwards covers all the work.
    ///
    /// # Panics
    /// Panics if the three slices differ in length.
    pub fn eval_into(&self, xs: &[f64], ys: &[f64], out: &mut [f64]) {
        assert!(
            xs.len() == ys.len() && ys.len() == out.len(),
            "query slices must share a length: xs={}, ys={}, out={}",
            xs.len(),
            ys.len(),
            out.len(),
        );
        out.par_iter_mut()
            .zip(xs.par_iter().zip(ys.par_iter()))
            .for_each(|(z, (&x, &y))| {
                *z = self.eval(x, y);
            });
    }

    /// Worst absolute residual at the data points after the final level.
    pub fn residual(&self) -> f64 {
        self.residual
    }

    /// Number of levels actually fit.
    pub fn levels(&self) -> usize {
        self.levels
    }

    /// The flattened control lattice (read by the GPU upload path).
    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }
}

impl std::fmt::Debug for MbaSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MbaSurface {{ {} levels, final grid {}×{}, residual {:.3e} }}",
            self.levels,
            self.lattice.nx(),
            self.lattice.ny(),
            self.residual,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LO: [f64; 2] = [-0.01, -0.01];
    const HI: [f64; 2] = [1.01, 1.01];

    fn paraboloid_cloud(side: usize) -> (Vec<[f64; 2]>, Vec<f64>) {
        // Regular grid of points on the paraboloid centred at (0.5, 0.5).
        let pts: Vec<[f64; 2]> = (0..side * side)
            .map(|i| {
                let x = (i % side) as f64 / (side - 1) as f64;
                let y = (i / side) as f64 / (side - 1) as f64;
                [x, y]
            })
            .collect();
        let vals = pts
            .iter()
            .map(|p| (p[0] - 0.5).powi(2) + (p[1] - 0.5).powi(2))
            .collect();
        (pts, vals)
    }

    #[test]
    fn residual_shrinks_with_levels() {
        let (pts, vals) = paraboloid_cloud(20);
        let coarse = MbaSurface::build(LO, HI, &pts, &vals, MbaParams { max_levels: 1, ..Default::default() });
        let fine = MbaSurface::build(LO, HI, &pts, &vals, MbaParams { max_levels: 6, ..Default::default() });
        assert!(
            fine.residual() < coarse.residual() / 10.0,
            "6 levels should beat 1 level by an order of magnitude: {:.3e} vs {:.3e}",
            fine.residual(),
            coarse.residual(),
        );
    }

    #[test]
    fn approximates_smooth_data_at_center() {
        let (pts, vals) = paraboloid_cloud(32);
        let surf = MbaSurface::build(LO, HI, &pts, &vals, MbaParams::default());
        // True value at the paraboloid's minimum is 0.
        let v = surf.eval(0.5, 0.5);
        assert!(v.abs() < 1e-2, "center value should be near 0, got {v}");
        // And a point away from the minimum.
        let v = surf.eval(0.25, 0.25);
        assert!((v - 0.125).abs() < 1e-2, "surf(0.25,0.25) should be near 0.125, got {v}");
    }

    #[test]
    fn single_point_build_is_exact() {
        // The n = 1 boundary case: BA reproduces one point exactly, so the
        // first level already hits the tolerance.
        let surf = MbaSurface::build(LO, HI, &[[0.4, 0.6]], &[2.0], MbaParams::default());
        assert!((surf.eval(0.4, 0.6) - 2.0).abs() < 1e-9);
        assert_eq!(surf.levels(), 1);
    }

    #[test]
    fn tolerance_stops_refinement_early() {
        let (pts, vals) = paraboloid_cloud(10);
        let surf = MbaSurface::build(
            LO,
            HI,
            &pts,
            &vals,
            MbaParams { tolerance: 1e-2, ..Default::default() },
        );
        assert!(surf.levels() < 8, "loose tolerance should stop before 8 levels");
        assert!(surf.residual() <= 1e-2);
    }

    #[test]
    fn eval_into_matches_eval() {
        let (pts, vals) = paraboloid_cloud(16);
        let surf = MbaSurface::build(LO, HI, &pts, &vals, MbaParams::default());

        let xs: Vec<f64> = (0..100).map(|i| i as f64 / 99.0).collect();
        let ys: Vec<f64> = (0..100).map(|i| (99 - i) as f64 / 99.0).collect();
        let mut out = vec![0.0; 100];
        surf.eval_into(&xs, &ys, &mut out);

        for i in 0..100 {
            let expect = surf.eval(xs[i], ys[i]);
            assert_eq!(out[i], expect, "parallel eval diverged at index {i}");
        }
    }

    #[test]
    #[should_panic(expected = "empty point set")]
    fn empty_point_set_panics() {
        let _ = MbaSurface::build(LO, HI, &[], &[], MbaParams::default());
    }

    #[test]
    #[should_panic(expected = "share a length")]
    fn eval_into_length_mismatch_panics() {
        let surf = MbaSurface::build(LO, HI, &[[0.5, 0.5]], &[1.0], MbaParams::default());
        let mut out = vec![0.0; 3];
        surf.eval_into(&[0.1, 0.2], &[0.1, 0.2], &mut out);
    }
}
