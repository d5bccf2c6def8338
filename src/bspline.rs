// bspline.rs — uniform cubic B-spline basis functions.
//
// The four basis values for a local cell coordinate t in [0, 1]:
//
//   B0(t) = (1 - t)^3 / 6
//   B1(t) = (3t^3 - 6t^2 + 4) / 6
//   B2(t) = (-3t^3 + 3t^2 + 3t + 1) / 6
//   B3(t) = t^3 / 6
//
// They are non-negative on [0, 1] and sum to exactly 1 (partition of
// unity), which is what makes the BA accumulation in lattice.rs stable:
// the squared-weight sum per point is bounded below by 1/16.
//
// The same four polynomials are transcribed into shaders/mba_eval.wgsl;
// the two must stay in sync.

/// The four cubic B-spline basis values at local coordinate `t`.
///
/// `t` is the fractional position within a lattice cell. Values for
/// `t` slightly outside [0, 1] are the polynomial continuation; callers
/// clamp the cell index so this only happens at the domain boundary.
#[inline]
pub fn weights(t: f64) -> [f64; 4] {
    let it = 1.0 - t;
    let t2 = t * t;
    let t3 = t2 * t;
    [
        it * it * it / 6.0,
        (3.0 * t3 - 6.0 * t2 + 4.0) / 6.0,
        (-3.0 * t3 + 3.0 * t2 + 3.0 * t + 1.0) / 6.0,
        t3 / 6.0,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_of_unity() {
        for i in 0..=100 {
            let t = i as f64 / 100.0;
            let w = weights(t);
            let sum: f64 = w.iter().sum();
            assert!(
                (sum - 1.0).abs() < 1e-12,
                "basis does not sum to 1 at t={t}: sum={sum}"
            );
        }
    }

    #[test]
    fn non_negative_on_unit_interval() {
        for i in 0..=100 {
            let t = i as f64 / 100.0;
            for (k, &w) in weights(t).iter().enumerate() {
                assert!(w >= 0.0, "B{k}({t}) = {w} is negative");
            }
        }
    }

    #[test]
    fn endpoint_values() {
        // At t=0 the knot value is (1/6, 4/6, 1/6, 0); at t=1 it shifts
        // one slot, which is what makes adjacent cells join C2-smoothly.
        let w0 = weights(0.0);
        assert!((w0[0] - 1.0 / 6.0).abs() < 1e-15);
        assert!((w0[1] - 4.0 / 6.0).abs() < 1e-15);
        assert!((w0[2] - 1.0 / 6.0).abs() < 1e-15);
        assert!(w0[3].abs() < 1e-15);

        let w1 = weights(1.0);
        assert!(w1[0].abs() < 1e-15);
        assert!((w1[1] - 1.0 / 6.0).abs() < 1e-15);
        assert!((w1[2] - 4.0 / 6.0).abs() < 1e-15);
        assert!((w1[3] - 1.0 / 6.0).abs() < 1e-15);
    }

    #[test]
    fn symmetry() {
        // B0(t) == B3(1-t) and B1(t) == B2(1-t).
        for i in 0..=50 {
            let t = i as f64 / 50.0;
            let a = weights(t);
            let b = weights(1.0 - t);
            assert!((a[0] - b[3]).abs() < 1e-12);
            assert!((a[1] - b[2]).abs() < 1e-12);
        }
    }
}
