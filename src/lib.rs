// scatterfit: GPU-accelerated multilevel B-spline approximation (MBA)
// for 2-D scattered data, with a CPU reference implementation.
//
// Reference: Lee, Wolberg, Shin, "Scattered Data Interpolation with
// Multilevel B-Splines" (IEEE TVCG 1997)
//
// The CPU modules are the authoritative reference; the `gpu` module mirrors
// the evaluation path with wgpu compute kernels validated against them.

pub mod bspline;
pub mod lattice;
pub mod surface;
pub mod scatter;
pub mod profiler;

pub mod gpu;
