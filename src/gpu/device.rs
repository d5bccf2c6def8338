// gpu/device.rs — wgpu device abstraction.
//
// Responsibilities:
//   - Enumerate Vulkan adapters and select one, honouring the
//     SCATTERFIT_ADAPTER environment variable (case-insensitive name
//     substring) so benchmark runs can pin a device without code changes.
//   - Request TIMESTAMP_QUERY when the adapter offers it, so the
//     evaluation kernel can be timed on the device timeline instead of
//     the host clock.
//   - Provide a validated 1-D `WorkgroupSize` used when creating compute
//     pipelines over flat query arrays.
//
// ADAPTER SELECTION:
// wgpu's default `request_adapter` uses power preference heuristics that
// may grab llvmpipe/softpipe on WSL2 (where the software renderer appears
// as a valid Vulkan device). We enumerate explicitly and prefer real
// hardware, taking software renderers only as a last resort. With
// SCATTERFIT_ADAPTER set, the first adapter whose name contains the
// filter (case-insensitive) wins outright.

use std::fmt;

/// A workgroup size for 1-D compute dispatches over flat arrays.
///
/// Must be a power of two and must not exceed the device's
/// `max_compute_invocations_per_workgroup`. Construct via
/// [`WorkgroupSize::default`] (64, safe everywhere) or
/// [`GpuDevice::set_workgroup_size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
}

impl Default for WorkgroupSize {
    /// 64 invocations: two NVIDIA warps, one AMD wavefront, and well
    /// within every Vulkan implementation's minimum limit of 128.
    fn default() -> Self {
        WorkgroupSize { x: 64 }
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} invocations", self.x)
    }
}

/// Cached adapter information for logging and debugging.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}, {:?})",
            self.name, self.backend, self.device_type
        )
    }
}

/// The core GPU context: adapter, device, queue.
///
/// Create via `GpuDevice::new()`. Hold one `GpuDevice` for the lifetime of
/// the run; it is expensive to create (Vulkan instance + device init).
///
/// # Field drop order
/// Rust drops struct fields in declaration order (top to bottom).
/// `_instance` is declared last so the `wgpu::Instance` (and its internal
/// Vulkan instance handle) outlives `device` and `queue`. This prevents a
/// crash in dzn (the D3D12-to-Vulkan layer on WSL2) that occurs when the
/// Vulkan instance is destroyed while device-level objects still hold
/// dangling back-references to it.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: AdapterInfo,
    pub workgroup_size: WorkgroupSize,
    /// Keeps the `wgpu::Instance` alive until `device` and `queue` are
    /// dropped. Never access this field directly.
    _instance: wgpu::Instance,
}

/// Name of the environment variable that pins adapter selection.
pub const ADAPTER_ENV: &str = "SCATTERFIT_ADAPTER";

impl GpuDevice {
    /// Create a `GpuDevice`, honouring [`ADAPTER_ENV`] if set.
    ///
    /// # Errors
    /// Returns `Err` if no adapter matches, or the device request fails.
    pub fn new() -> Result<Self, GpuError> {
        pollster::block_on(Self::init_async())
    }

    async fn init_async() -> Result<Self, GpuError> {
        // Request only Vulkan — no DX12, no Metal, no WebGPU.
        //
        // ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER lets wgpu enumerate
        // non-conformant layers such as dzn on WSL2; we run compute-only
        // kernels and need nothing from rendering conformance.
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
                | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        } else {
            wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            flags,
            ..Default::default()
        });

        let all_adapters: Vec<wgpu::Adapter> = instance
            .enumerate_adapters(wgpu::Backends::VULKAN)
            .into_iter()
            .collect();

        if all_adapters.is_empty() {
            return Err(GpuError::NoSuitableAdapter);
        }

        for a in &all_adapters {
            let info = a.get_info();
            eprintln!(
                "[scatterfit] Vulkan adapter: {} ({:?}, {:?})",
                info.name, info.backend, info.device_type
            );
        }

        let env_filter = std::env::var(ADAPTER_ENV).ok();
        let adapter = match env_filter {
            // Explicit pin: first adapter whose name contains the filter.
            Some(ref filter) => {
                let needle = filter.to_ascii_lowercase();
                all_adapters
                    .into_iter()
                    .find(|a| a.get_info().name.to_ascii_lowercase().contains(&needle))
                    .ok_or_else(|| GpuError::AdapterFilterMiss(filter.clone()))?
            }
            // Tiered selection:
            //   DiscreteGpu / IntegratedGpu — real hardware      <- prefer
            //   VirtualGpu / Other — dzn, VM pass-through        <- acceptable
            //   Cpu — llvmpipe / software renderer               <- last resort
            None => all_adapters
                .into_iter()
                .find(|a| {
                    matches!(
                        a.get_info().device_type,
                        wgpu::DeviceType::DiscreteGpu
                            | wgpu::DeviceType::IntegratedGpu
                            | wgpu::DeviceType::VirtualGpu
                            | wgpu::DeviceType::Other
                    )
                })
                .or_else(|| {
                    instance
                        .enumerate_adapters(wgpu::Backends::VULKAN)
                        .into_iter()
                        .next()
                })
                .ok_or(GpuError::NoSuitableAdapter)?,
        };

        let raw_info = adapter.get_info();
        let adapter_info = AdapterInfo {
            name: raw_info.name.clone(),
            vendor: raw_info.vendor,
            device: raw_info.device,
            device_type: raw_info.device_type,
            backend: raw_info.backend,
        };

        // Device-timeline timing needs TIMESTAMP_QUERY. Request it only
        // when the adapter offers it; gpu::surface falls back to host wall
        // time otherwise.
        let required_features = adapter.features() & wgpu::Features::TIMESTAMP_QUERY;

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("scatterfit"),
                    required_features,
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(GpuError::DeviceRequest)?;

        Ok(GpuDevice {
            device,
            queue,
            adapter_info,
            workgroup_size: WorkgroupSize::default(),
            _instance: instance,
        })
    }

    /// Whether the device can time compute passes on its own timeline.
    pub fn supports_timestamps(&self) -> bool {
        self.device
            .features()
            .contains(wgpu::Features::TIMESTAMP_QUERY)
    }

    /// Override the default workgroup size, validating against the
    /// device's invocation limit.
    pub fn set_workgroup_size(&mut self, x: u32) -> Result<(), GpuError> {
        let max = self.device.limits().max_compute_invocations_per_workgroup;
        if x > max {
            return Err(GpuError::WorkgroupTooLarge { total: x, max });
        }
        self.workgroup_size = WorkgroupSize { x };
        Ok(())
    }

    /// Number of workgroups needed to cover `n` elements with the active
    /// workgroup size. Ceiling division; the shader guards the tail:
    /// ```wgsl
    /// if (gid.x >= params.n_queries) { return; }
    /// ```
    pub fn dispatch_size(&self, n: u32) -> u32 {
        (n + self.workgroup_size.x - 1) / self.workgroup_size.x
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, workgroup: {}, timestamps: {} }}",
            self.adapter_info,
            self.workgroup_size,
            self.supports_timestamps(),
        )
    }
}

// ============================================================
// Error type
// ============================================================

/// Errors from GPU device initialization and configuration.
#[derive(Debug)]
pub enum GpuError {
    /// No Vulkan adapter found at all. On WSL2: check that Vulkan is
    /// installed and `vulkaninfo` shows a device.
    NoSuitableAdapter,
    /// SCATTERFIT_ADAPTER was set but no adapter name contained it.
    AdapterFilterMiss(String),
    /// wgpu device request failed (driver issue, unsupported limits, etc.).
    DeviceRequest(wgpu::RequestDeviceError),
    /// Requested workgroup size exceeds the device's invocation limit.
    WorkgroupTooLarge { total: u32, max: u32 },
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoSuitableAdapter => write!(
                f,
                "no Vulkan adapter found. Ensure Vulkan is installed and \
                 `vulkaninfo` lists a device."
            ),
            GpuError::AdapterFilterMiss(filter) => write!(
                f,
                "{ADAPTER_ENV}={filter} matched no adapter name; unset it or \
                 check the enumeration lines above for available names"
            ),
            GpuError::DeviceRequest(e) => write!(f, "device request failed: {e}"),
            GpuError::WorkgroupTooLarge { total, max } => write!(
                f,
                "workgroup size {total} exceeds device limit of {max} invocations"
            ),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::DeviceRequest(e) => Some(e),
            _ => None,
        }
    }
}

// ============================================================
// Tests
// ============================================================
