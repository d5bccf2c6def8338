// benches/gpu_benchmarks.rs — GPU vs CPU evaluation benchmarks.
//
// Mirrors benchmarks.rs structure. Each CPU evaluation size has a GPU
// benchmark in the same group for direct comparison. Requires a Vulkan
// adapter; the device is created once per benchmark fn.
//
//   cargo bench --bench gpu_benchmarks
//
// CRITERION + GPU CAVEATS
// Criterion measures wall time including CPU overhead (bind group
// creation, submit, poll). GPU shader execution is included via poll().
// This is the right metric for the harness's use case: the caller blocks
// on results before proceeding. Warmup matters because wgpu compiles
// pipelines lazily on some drivers; warm_up_time is set explicitly.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use scatterfit::gpu::device::GpuDevice;
use scatterfit::gpu::surface::{GpuMbaSurface, QueryBatch};
use scatterfit::scatter;
use scatterfit::surface::{MbaParams, MbaSurface};

const LO: [f64; 2] = [-0.01, -0.01];
const HI: [f64; 2] = [1.01, 1.01];

// ============================================================
// Evaluation: CPU vs GPU at several query counts
// ============================================================

fn bench_interpolate(c: &mut Criterion) {
    let gpu = GpuDevice::new().expect("no Vulkan GPU");
    eprintln!("[gpu_benchmarks] {}", gpu.adapter_info);

    let mut group = c.benchmark_group("interpolate");
    group.warm_up_time(Duration::from_secs(2));

    for &n in &[1usize << 14, 1 << 18] {
        let data = scatter::generate(n, 0);
        let cpu_surf = MbaSurface::build(LO, HI, &data.points, &data.values, MbaParams::default());
        let gpu_surf = GpuMbaSurface::from_surface(&gpu, &cpu_surf);
        let batch = QueryBatch::upload(&gpu, &data.qx, &data.qy);

        group.bench_with_input(BenchmarkId::new("cpu_rayon", n), &n, |b, _| {
            let mut out = vec![0.0f64; n];
            b.iter(|| cpu_surf.eval_into(&data.qx, &data.qy, &mut out))
        });

        group.bench_with_input(BenchmarkId::new("gpu", n), &n, |b, _| {
            b.iter(|| gpu_surf.eval_repeat(&gpu, &batch, 1))
        });
    }

    group.finish();
}

// ============================================================
// Setup cost: host build + upload
// ============================================================

fn bench_setup(c: &mut Criterion) {
    let gpu = GpuDevice::new().expect("no Vulkan GPU");

    let n = 1usize << 14;
    let data = scatter::generate(n, 0);

    let mut group = c.benchmark_group("setup");
    group.warm_up_time(Duration::from_secs(2));
    group.sample_size(20);

    group.bench_function("cpu_build", |b| {
        b.iter(|| MbaSurface::build(LO, HI, &data.points, &data.values, MbaParams::default()))
    });

    group.bench_function("gpu_build_upload", |b| {
        b.iter(|| GpuMbaSurface::new(&gpu, LO, HI, &data.points, &data.values, MbaParams::default()))
    });

    group.finish();
}

// ============================================================
// Register
// ============================================================

criterion_group!(benches, bench_interpolate, bench_setup);
criterion_main!(benches);
