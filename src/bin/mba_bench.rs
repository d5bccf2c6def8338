// bin/mba_bench.rs — GPU vs CPU scattered-data interpolation benchmark.
//
// Fits a multilevel B-spline surface to n random points on a paraboloid
// and evaluates it at n random queries, 100 times per backend:
//
//   GPU: lattice uploaded once, queries device-resident, evaluation
//        timed on the device timeline where the adapter allows.
//   CPU: the same surface evaluated with a rayon parallel-for.
//
// Both backends print their value at (0.5, 0.5), where the true value is
// 0, so the two runs can be sanity-checked against each other and
// against the analytic answer. A timing summary follows.
//
// USAGE
//   cargo run --release --bin mba_bench            # n = 1,048,576
//   cargo run --release --bin mba_bench -- 65536   # explicit n
//
// Pin an adapter with SCATTERFIT_ADAPTER=<name substring>.

use std::process::ExitCode;

use scatterfit::gpu::device::GpuDevice;
use scatterfit::gpu::surface::{GpuMbaSurface, QueryBatch};
use scatterfit::profiler::Profiler;
use scatterfit::scatter;
use scatterfit::surface::{MbaParams, MbaSurface};

/// Bounding box: the unit square padded by the margin the original MBA
/// benchmarks use, so no data point sits exactly on the box edge.
const LO: [f64; 2] = [-0.01, -0.01];
const HI: [f64; 2] = [1.01, 1.01];

/// Evaluation rounds per backend. Only the last result is kept;
/// evaluation is idempotent and the repeats amortise timing noise.
const ROUNDS: usize = 100;

const DEFAULT_N: usize = 1 << 20;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let n: usize = match args.get(1) {
        None => DEFAULT_N,
        Some(arg) => match arg.parse() {
            Ok(n) => n,
            Err(_) => {
                eprintln!("[mba_bench] invalid point count {arg:?}");
                eprintln!("usage: mba_bench [n]   (default n = {DEFAULT_N})");
                return ExitCode::from(2);
            }
        },
    };

    let mut prof = Profiler::new();

    prof.tic("generate data");
    let data = scatter::generate(n, 0);
    prof.toc("generate data");
    eprintln!("[mba_bench] n = {n} points, {ROUNDS} evaluation rounds");

    let params = MbaParams::default();

    // --- GPU backend ---
    prof.tic("GPU");
    let gpu = GpuDevice::new().expect("failed to initialise a Vulkan GPU");
    println!("{}", gpu.adapter_info);
    if !gpu.supports_timestamps() {
        eprintln!("[mba_bench] adapter lacks TIMESTAMP_QUERY; GPU interpolate scope is host wall time");
    }
    {
        prof.tic("setup");
        let surf = GpuMbaSurface::new(&gpu, LO, HI, &data.points, &data.values, params);
        prof.toc("setup");
        eprintln!(
            "[mba_bench] GPU surface: {} levels, residual {:.3e}",
            surf.levels, surf.residual
        );

        let batch = QueryBatch::upload(&gpu, &data.qx, &data.qy);

        let device_time = surf.eval_repeat(&gpu, &batch, ROUNDS);
        prof.record("interpolate", device_time);

        let z = surf.readback(&gpu, &batch);
        println!("surf(0.5, 0.5) = {}", z[0]);
    }
    prof.toc("GPU");

    // --- CPU backend ---
    prof.tic("CPU");
    {
        prof.tic("setup");
        let surf = MbaSurface::build(LO, HI, &data.points, &data.values, params);
        prof.toc("setup");

        let mut z = vec![0.0f64; n];
        prof.tic("interpolate");
        for _ in 0..ROUNDS {
            surf.eval_into(&data.qx, &data.qy, &mut z);
        }
        prof.toc("interpolate");
        println!("surf(0.5, 0.5) = {}", z[0]);
    }
    prof.toc("CPU");

    println!("{prof}");
    ExitCode::SUCCESS
}
