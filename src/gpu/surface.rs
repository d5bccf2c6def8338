// gpu/surface.rs — device-resident MBA surface evaluation.
//
// Construction runs the same host-side multilevel build as the CPU
// backend (the lattice hierarchy is data-dependent and sequential across
// levels; there is nothing for the GPU to do there), then uploads the
// flattened control lattice to a storage buffer. Queries are uploaded
// once into a `QueryBatch` and evaluated in place as many times as the
// caller likes; only `readback` touches host memory again.
//
// PRECISION: WGSL has no f64, so the lattice and queries are truncated to
// f32 at upload. For the benchmark's sanity check this costs ~1e-6
// absolute; GPU-vs-CPU agreement is asserted at 1e-3 in the tests.
//
// DEVICE TIMING: eval_repeat() encodes all m dispatches in one command
// buffer and brackets them with pass timestamps (first pass writes query
// 0 at its beginning, last pass writes query 1 at its end), so the
// reported interval is device execution only, excluding host dispatch
// overhead. When the adapter lacks TIMESTAMP_QUERY the interval falls
// back to host wall time around submit + wait, and says so once.

use std::time::{Duration, Instant};

use wgpu::util::DeviceExt;

use crate::gpu::device::GpuDevice;
use crate::surface::{MbaParams, MbaSurface};

// ---------------------------------------------------------------------------
// Uniform params (must match WGSL struct EvalParams exactly)
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct EvalParams {
    nx: u32,
    ny: u32,
    n_queries: u32,
    _pad: u32,
    xmin: f32,
    ymin: f32,
    inv_hx: f32,
    inv_hy: f32,
}

// ---------------------------------------------------------------------------
// QueryBatch
// ---------------------------------------------------------------------------

/// Query coordinates and their output slot, resident on the device.
///
/// Upload once, evaluate many times. Dropping the batch releases the
/// device memory.
pub struct QueryBatch {
    qx_buf: wgpu::Buffer,
    qy_buf: wgpu::Buffer,
    z_buf: wgpu::Buffer,
    len: u32,
}

impl QueryBatch {
    /// Upload query coordinates to device-resident storage.
    ///
    /// # Panics
    /// Panics if the slices differ in length or are empty.
    pub fn upload(gpu: &GpuDevice, xs: &[f64], ys: &[f64]) -> Self {
        assert_eq!(
            xs.len(),
            ys.len(),
            "query slices must share a length: xs={}, ys={}",
            xs.len(),
            ys.len(),
        );
        assert!(!xs.is_empty(), "cannot upload an empty query batch");

        let qx: Vec<f32> = xs.iter().map(|&v| v as f32).collect();
        let qy: Vec<f32> = ys.iter().map(|&v| v as f32).collect();

        let qx_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("QueryBatch::qx"),
            contents: bytemuck::cast_slice(&qx),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let qy_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("QueryBatch::qy"),
            contents: bytemuck::cast_slice(&qy),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let z_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("QueryBatch::z"),
            size: (xs.len() * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        QueryBatch { qx_buf, qy_buf, z_buf, len: xs.len() as u32 }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// ---------------------------------------------------------------------------
// GpuMbaSurface
// ---------------------------------------------------------------------------

/// A multilevel B-spline surface whose evaluation runs on the GPU.
///
/// Create once per data set; evaluate any number of [`QueryBatch`]es.
pub struct GpuMbaSurface {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
    lattice_buf: wgpu::Buffer,
    params: EvalParams,
    /// Build diagnostics carried over from the host-side fit.
    pub levels: usize,
    pub residual: f64,
}

impl GpuMbaSurface {
    /// Fit the surface on the host and upload the flattened lattice.
    ///
    /// Same parameters and semantics as [`MbaSurface::build`], including
    /// its panics on empty or mismatched input.
    pub fn new(
        gpu: &GpuDevice,
        lo: [f64; 2],
        hi: [f64; 2],
        points: &[[f64; 2]],
        values: &[f64],
        params: MbaParams,
    ) -> Self {
        let cpu = MbaSurface::build(lo, hi, points, values, params);
        Self::from_surface(gpu, &cpu)
    }

    /// Upload an already-built CPU surface.
    pub fn from_surface(gpu: &GpuDevice, surface: &MbaSurface) -> Self {
        let lat = surface.lattice();

        let phi: Vec<f32> = lat.as_slice().iter().map(|&v| v as f32).collect();
        let lattice_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GpuMbaSurface::lattice"),
            contents: bytemuck::cast_slice(&phi),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let params = EvalParams {
            nx: lat.nx() as u32,
            ny: lat.ny() as u32,
            n_queries: 0, // patched per batch
            _pad: 0,
            xmin: lat.xmin() as f32,
            ymin: lat.ymin() as f32,
            inv_hx: (1.0 / lat.hx()) as f32,
            inv_hy: (1.0 / lat.hy()) as f32,
        };

        let shader_src = include_str!("../shaders/mba_eval.wgsl")
            .replace("{{WG_X}}", &gpu.workgroup_size.x.to_string());

        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("mba_eval.wgsl"),
            source: wgpu::ShaderSource::Wgsl(shader_src.into()),
        });

        let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GpuMbaSurface BGL"),
            entries: &[
                // 0 — control lattice (storage read)
                storage_entry(0, true),
                // 1 — query x (storage read)
                storage_entry(1, true),
                // 2 — query y (storage read)
                storage_entry(2, true),
                // 3 — output z (storage read_write)
                storage_entry(3, false),
                // 4 — params uniform
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout =
            gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("GpuMbaSurface pipeline layout"),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });

        let pipeline =
            gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label:               Some("eval_surface"),
                layout:              Some(&pipeline_layout),
                module:              &shader,
                entry_point:         "eval_surface",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache:               None,
            });

        GpuMbaSurface {
            pipeline,
            bgl,
            lattice_buf,
            params,
            levels: surface.levels(),
            residual: surface.residual(),
        }
    }

    /// Evaluate the surface over `batch`, `rounds` times back to back,
    /// and return the device-execution time for all rounds.
    ///
    /// Evaluation is idempotent; every round overwrites the same output
    /// slots, so repeated rounds exist purely to amortise timing noise.
    pub fn eval_repeat(&self, gpu: &GpuDevice, batch: &QueryBatch, rounds: usize) -> Duration {
        assert!(rounds >= 1, "at least one evaluation round is required");

        let params = EvalParams { n_queries: batch.len, ..self.params };
        let params_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GpuMbaSurface params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GpuMbaSurface BG"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: self.lattice_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: batch.qx_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: batch.qy_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: batch.z_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: params_buf.as_entire_binding() },
            ],
        });

        let timestamps = self.make_timestamp_resources(gpu);
        let workgroups = gpu.dispatch_size(batch.len);

        let mut encoder = gpu.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor { label: Some("GpuMbaSurface eval") },
        );

        for round in 0..rounds {
            // Only the first and last pass carry timestamp writes; a
            // writes struct with neither index set fails validation.
            let timestamp_writes = match &timestamps {
                Some(t) if round == 0 || round == rounds - 1 => {
                    Some(wgpu::ComputePassTimestampWrites {
                        query_set: &t.query_set,
                        beginning_of_pass_write_index: (round == 0).then_some(0),
                        end_of_pass_write_index: (round == rounds - 1).then_some(1),
                    })
                }
                _ => None,
            };
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("eval_surface"),
                timestamp_writes,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }

        if let Some(t) = &timestamps {
            encoder.resolve_query_set(&t.query_set, 0..2, &t.resolve_buf, 0);
            encoder.copy_buffer_to_buffer(&t.resolve_buf, 0, &t.readback_buf, 0, 16);
        }

        let host_start = Instant::now();
        gpu.queue.submit(std::iter::once(encoder.finish()));
        gpu.device.poll(wgpu::Maintain::Wait);
        let host_elapsed = host_start.elapsed();

        match &timestamps {
            Some(t) => {
                let ticks = read_timestamps(gpu, &t.readback_buf);
                let period_ns = gpu.queue.get_timestamp_period() as f64;
                let nanos = (ticks[1].saturating_sub(ticks[0])) as f64 * period_ns;
                Duration::from_nanos(nanos as u64)
            }
            None => host_elapsed,
        }
    }

    /// Read the output buffer back to the host.
    ///
    /// Expensive and synchronous; the benchmark calls it once, after the
    /// timed rounds, to fetch the sanity value.
    pub fn readback(&self, gpu: &GpuDevice, batch: &QueryBatch) -> Vec<f32> {
        let size = (batch.len() * std::mem::size_of::<f32>()) as u64;
        let rb = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuMbaSurface readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor { label: Some("GpuMbaSurface readback") },
        );
        encoder.copy_buffer_to_buffer(&batch.z_buf, 0, &rb, 0, size);
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = rb.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            tx.send(r).expect("readback channel closed");
        });
        gpu.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .expect("readback map callback never fired")
            .expect("readback map failed");

        let mapped = slice.get_mapped_range();
        let out: Vec<f32> = bytemuck::cast_slice(&mapped).to_vec();
        drop(mapped);
        rb.unmap();
        out
    }

    fn make_timestamp_resources(&self, gpu: &GpuDevice) -> Option<TimestampResources> {
        if !gpu.supports_timestamps() {
            return None;
        }
        let query_set = gpu.device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("GpuMbaSurface timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: 2,
        });
        let resolve_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuMbaSurface ts resolve"),
            size: 16,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuMbaSurface ts readback"),
            size: 16,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Some(TimestampResources { query_set, resolve_buf, readback_buf })
    }
}

struct TimestampResources {
    query_set: wgpu::QuerySet,
    resolve_buf: wgpu::Buffer,
    readback_buf: wgpu::Buffer,
}

fn read_timestamps(gpu: &GpuDevice, buf: &wgpu::Buffer) -> [u64; 2] {
    let slice = buf.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        tx.send(r).expect("timestamp channel closed");
    });
    gpu.device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .expect("timestamp map callback never fired")
        .expect("timestamp map failed");

    let mapped = slice.get_mapped_range();
    let ticks: &[u64] = bytemuck::cast_slice(&mapped);
    let out = [ticks[0], ticks[1]];
    drop(mapped);
    buf.unmap();
    out
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scatter;
    use crate::surface::{MbaParams, MbaSurface};

    const LO: [f64; 2] = [-0.01, -0.01];
    const HI: [f64; 2] = [1.01, 1.01];

    // Same subprocess isolation pattern as gpu::device — dzn crashes on
    // exit. Inner tests run inside a child process; outer wrappers spawn
    // the child and assert "GPU_TEST_OK" appears in the output.

    fn run_gpu_test_in_subprocess(test_name: &str) -> String {
        let output = std::process::Command::new("cargo")
            .args(["test", "--lib", "--", test_name, "--exact", "--ignored", "--nocapture"])
            .output()
            .unwrap_or_else(|e| panic!("failed to spawn subprocess for {test_name}: {e}"));
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        print!("{stdout}");
        eprint!("{stderr}");
        stdout + &stderr
    }

    // Inner tests ------------------------------------------------------------

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_matches_cpu() {
        let data = scatter::generate(512, 0);
        let cpu = MbaSurface::build(LO, HI, &data.points, &data.values, MbaParams::default());

        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let surf = GpuMbaSurface::from_surface(&gpu, &cpu);
        let batch = QueryBatch::upload(&gpu, &data.qx, &data.qy);

        let _ = surf.eval_repeat(&gpu, &batch, 1);
        let gpu_z = surf.readback(&gpu, &batch);

        let mut cpu_z = vec![0.0f64; data.qx.len()];
        cpu.eval_into(&data.qx, &data.qy, &mut cpu_z);

        let mut worst = 0.0f64;
        for (i, (&g, &c)) in gpu_z.iter().zip(cpu_z.iter()).enumerate() {
            let diff = (g as f64 - c).abs();
            worst = worst.max(diff);
            assert!(diff < 1e-3, "query {i}: GPU={g} CPU={c} (diff {diff:.3e})");
        }
        eprintln!("[test] worst GPU-vs-CPU diff: {worst:.3e}");
        println!("GPU_TEST_OK");
        drop(batch);
        drop(surf);
        drop(gpu);
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_sanity_point_near_zero() {
        let data = scatter::generate(1024, 0);
        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let surf = GpuMbaSurface::new(&gpu, LO, HI, &data.points, &data.values, MbaParams::default());
        let batch = QueryBatch::upload(&gpu, &data.qx, &data.qy);

        let _ = surf.eval_repeat(&gpu, &batch, 1);
        let z = surf.readback(&gpu, &batch);
        // Query 0 is pinned to the paraboloid's minimum; true value 0.
        assert!(z[0].abs() < 1e-2, "surf(0.5, 0.5) = {} is not near 0", z[0]);
        println!("GPU_TEST_OK");
        drop(batch);
        drop(surf);
        drop(gpu);
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_repeated_rounds_are_idempotent() {
        let data = scatter::generate(256, 3);
        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let surf = GpuMbaSurface::new(&gpu, LO, HI, &data.points, &data.values, MbaParams::default());
        let batch = QueryBatch::upload(&gpu, &data.qx, &data.qy);

        let _ = surf.eval_repeat(&gpu, &batch, 1);
        let once = surf.readback(&gpu, &batch);
        let elapsed = surf.eval_repeat(&gpu, &batch, 10);
        let many = surf.readback(&gpu, &batch);

        assert_eq!(once, many, "repeated evaluation changed the output");
        assert!(elapsed > Duration::ZERO);
        println!("GPU_TEST_OK");
        drop(batch);
        drop(surf);
        drop(gpu);
    }

    // Outer wrappers ---------------------------------------------------------

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_gpu_matches_cpu() {
        let out = run_gpu_test_in_subprocess("gpu::surface::tests::inner_gpu_matches_cpu");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_sanity_point_near_zero() {
        let out = run_gpu_test_in_subprocess("gpu::surface::tests::inner_sanity_point_near_zero");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_repeated_rounds_are_idempotent() {
        let out =
            run_gpu_test_in_subprocess("gpu::surface::tests::inner_repeated_rounds_are_idempotent");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }
}
