// gpu/mod.rs — wgpu compute mirror of the CPU evaluation path.
//
// The CPU implementation in `surface` remains the authoritative reference;
// the GPU surface is validated against it value-for-value (at f32
// precision, since WGSL has no f64).
//
// Division of labour:
//
//   CPU: multilevel lattice construction (data-dependent, branchy,
//        sequential across levels) and everything between runs.
//   GPU: bulk evaluation of the finished lattice over large query
//        batches, one invocation per query.
//
// The lattice is small (a few hundred KB at 8 levels) and uploaded once;
// queries live in device-resident storage so repeated evaluation rounds
// touch no host memory.

pub mod device;
pub mod surface;
