// scatter.rs — seeded test-data generation for the benchmark harness.
//
// Produces the three inputs the harness needs: scatter points uniform in
// the unit square, their values on a paraboloid centred at (0.5, 0.5),
// and an independent set of query coordinates stored as two parallel
// arrays (the layout both backends consume directly).
//
// Query 0 is pinned to the paraboloid's minimum so that both backends can
// report an interpolated value whose true answer is known to be 0. The
// RNG is constructed from the seed here and nowhere else; the same seed
// always yields the same sequences.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// The fixed verification query shared by both backends. The paraboloid's
/// true value there is 0.
pub const SANITY_POINT: [f64; 2] = [0.5, 0.5];

/// Scatter data plus query coordinates for one benchmark run.
///
/// Immutable once generated; both backends read it without copying.
pub struct ScatterData {
    /// `n` scatter coordinates in `[0,1]²`.
    pub points: Vec<[f64; 2]>,
    /// Paraboloid value at each scatter point.
    pub values: Vec<f64>,
    /// Query x coordinates; `qx[0]` is pinned to 0.5.
    pub qx: Vec<f64>,
    /// Query y coordinates; `qy[0]` is pinned to 0.5.
    pub qy: Vec<f64>,
}

/// The benchmark's test function: squared distance from (0.5, 0.5).
#[inline]
pub fn paraboloid(x: f64, y: f64) -> f64 {
    let dx = x - 0.5;
    let dy = y - 0.5;
    dx * dx + dy * dy
}

/// Generate `n` scatter points and `n` queries from the given seed.
///
/// Deterministic: the same `(n, seed)` always produces identical data.
/// For `n >= 1` the first query is overwritten with [`SANITY_POINT`];
/// `n == 0` yields four empty vectors (building a surface from them is
/// rejected downstream).
pub fn generate(n: usize, seed: u64) -> ScatterData {
    let mut rng = StdRng::seed_from_u64(seed);

    let points: Vec<[f64; 2]> = (0..n).map(|_| [rng.gen::<f64>(), rng.gen::<f64>()]).collect();
    let values: Vec<f64> = points.iter().map(|p| paraboloid(p[0], p[1])).collect();

    let mut qx: Vec<f64> = (0..n).map(|_| rng.gen::<f64>()).collect();
    let mut qy: Vec<f64> = (0..n).map(|_| rng.gen::<f64>()).collect();

    if n > 0 {
        qx[0] = SANITY_POINT[0];
        qy[0] = SANITY_POINT[1];
    }

    ScatterData { points, values, qx, qy }
}
