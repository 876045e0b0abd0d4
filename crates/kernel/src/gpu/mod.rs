//! GPU (Metal/Vulkan/DX12 via wgpu) compute backend.
//!
//! `GpuBackend` implements `ComputeBackend` with one WGSL program per stage:
//!
//! - `hash.wgsl` -- position -> proxy
//! - `bitonic.wgsl` -- one compare-exchange stage; all stages are recorded in
//!   a single pass, selecting the stage uniform by dynamic offset
//! - `offsets.wgsl` -- bucket reset, then boundary detection
//! - `solve.wgsl` -- density/pressure pass, then acceleration pass
//! - `integrate.wgsl` -- semi-implicit Euler with gravity
//!
//! Each `submit` records and submits one command buffer; `wait` blocks on
//! that submission index. Validation errors raised while building programs
//! or recording a dispatch are captured through error scopes.

pub mod buffers;

use std::num::NonZeroU64;

use glam::Vec2;

use crate::backend::{check_dispatch, ComputeBackend, Dispatch, HostMirror, Stage, Submission};
use crate::error::BackendError;
use crate::neighbor::{BucketRange, Proxy};
use buffers::{read_buffer, GpuBuffers, SortStageUniform};

/// Invocations per workgroup; matches `@workgroup_size` in every shader.
const WORKGROUP_SIZE: u32 = 256;

/// Check whether any wgpu adapter is available.
pub fn gpu_available() -> bool {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .is_some()
}

/// Calculate dispatch workgroup count: ceil(total / workgroup_size).
fn dispatch_size(total: u32) -> u32 {
    total.div_ceil(WORKGROUP_SIZE)
}

// ---- Bind group layout entry helpers ----

fn bgl_uniform(binding: u32, dynamic: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_ro(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_rw(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Compiled program of one stage: its layout and entry-point pipelines.
struct StageProgram {
    layout: wgpu::BindGroupLayout,
    pipelines: Vec<wgpu::ComputePipeline>,
}

/// Build a stage program inside a validation error scope.
fn build_program(
    device: &wgpu::Device,
    stage: Stage,
    label: &str,
    source: &str,
    entries: &[wgpu::BindGroupLayoutEntry],
    entry_points: &[&str],
) -> Result<StageProgram, BackendError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("{label}_bgl")),
        entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&format!("{label}_pl")),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let pipelines = entry_points
        .iter()
        .map(|entry| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        })
        .collect();
    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        return Err(BackendError::ShaderCompile {
            stage,
            message: err.to_string(),
        });
    }
    Ok(StageProgram { layout, pipelines })
}

/// Every stage program.
struct Programs {
    hash: StageProgram,
    sort: StageProgram,
    offsets: StageProgram,
    solve: StageProgram,
    integrate: StageProgram,
}

impl Programs {
    fn new(device: &wgpu::Device) -> Result<Self, BackendError> {
        Ok(Self {
            hash: build_program(
                device,
                Stage::Hash,
                "hash",
                include_str!("shaders/hash.wgsl"),
                &[bgl_uniform(0, false), bgl_storage_ro(1), bgl_storage_rw(2)],
                &["main"],
            )?,
            sort: build_program(
                device,
                Stage::Sort,
                "bitonic",
                include_str!("shaders/bitonic.wgsl"),
                &[bgl_uniform(0, true), bgl_storage_rw(1)],
                &["main"],
            )?,
            offsets: build_program(
                device,
                Stage::BuildOffsets,
                "offsets",
                include_str!("shaders/offsets.wgsl"),
                &[bgl_uniform(0, false), bgl_storage_ro(1), bgl_storage_rw(2)],
                &["clear_buckets", "mark_boundaries"],
            )?,
            solve: build_program(
                device,
                Stage::Solve,
                "solve",
                include_str!("shaders/solve.wgsl"),
                &[
                    bgl_uniform(0, false),
                    bgl_storage_ro(1), // positions
                    bgl_storage_ro(2), // velocities
                    bgl_storage_ro(3), // proxies
                    bgl_storage_ro(4), // offsets
                    bgl_storage_rw(5), // densities
                    bgl_storage_rw(6), // pressures
                    bgl_storage_rw(7), // accelerations
                ],
                &["density", "forces"],
            )?,
            integrate: build_program(
                device,
                Stage::Integrate,
                "integrate",
                include_str!("shaders/integrate.wgsl"),
                &[
                    bgl_uniform(0, false),
                    bgl_storage_rw(1), // positions
                    bgl_storage_rw(2), // velocities
                    bgl_storage_ro(3), // accelerations
                ],
                &["main"],
            )?,
        })
    }
}

/// Bind groups tying the programs to one `GpuBuffers` set.
struct BindGroups {
    hash: wgpu::BindGroup,
    sort: wgpu::BindGroup,
    offsets: wgpu::BindGroup,
    solve: wgpu::BindGroup,
    integrate: wgpu::BindGroup,
}

fn bind_group(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    buffers: &[&wgpu::Buffer],
) -> wgpu::BindGroup {
    let entries: Vec<wgpu::BindGroupEntry> = buffers
        .iter()
        .enumerate()
        .map(|(i, buffer)| wgpu::BindGroupEntry {
            binding: i as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &entries,
    })
}

impl BindGroups {
    fn new(device: &wgpu::Device, programs: &Programs, bufs: &GpuBuffers) -> Self {
        let sort = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sort_bg"),
            layout: &programs.sort.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &bufs.sort_stages,
                        offset: 0,
                        size: NonZeroU64::new(std::mem::size_of::<SortStageUniform>() as u64),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: bufs.proxies.as_entire_binding(),
                },
            ],
        });
        Self {
            hash: bind_group(
                device,
                "hash_bg",
                &programs.hash.layout,
                &[&bufs.hash_params, &bufs.positions, &bufs.proxies],
            ),
            sort,
            offsets: bind_group(
                device,
                "offsets_bg",
                &programs.offsets.layout,
                &[&bufs.offset_params, &bufs.proxies, &bufs.offsets],
            ),
            solve: bind_group(
                device,
                "solve_bg",
                &programs.solve.layout,
                &[
                    &bufs.solve_params,
                    &bufs.positions,
                    &bufs.velocities,
                    &bufs.proxies,
                    &bufs.offsets,
                    &bufs.densities,
                    &bufs.pressures,
                    &bufs.accelerations,
                ],
            ),
            integrate: bind_group(
                device,
                "integrate_bg",
                &programs.integrate.layout,
                &[
                    &bufs.integrate_params,
                    &bufs.positions,
                    &bufs.velocities,
                    &bufs.accelerations,
                ],
            ),
        }
    }
}

/// Buffers plus the bind groups that reference them; dropped together.
struct Allocation {
    groups: BindGroups,
    buffers: GpuBuffers,
}

/// Record one compute pass running `pipeline` over `items` invocations.
fn encode_pass(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::ComputePipeline,
    group: &wgpu::BindGroup,
    items: u32,
) {
    if items == 0 {
        return;
    }
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, group, &[]);
    pass.dispatch_workgroups(dispatch_size(items), 1, 1);
}

/// wgpu compute backend.
pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    programs: Programs,
    uniform_alignment: u32,
    max_workgroups: u32,
    allocation: Option<Allocation>,
    count: usize,
    next_ticket: u64,
    pending: Option<(u64, wgpu::SubmissionIndex)>,
}

impl GpuBackend {
    /// Pick a high-performance adapter, create a device and compile every
    /// stage program.
    pub fn new() -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(BackendError::NoAdapter)?;
        let adapter_name = adapter.get_info().name;
        tracing::info!(adapter = %adapter_name, "GPU adapter selected");

        // Large particle sets need more than the default binding size.
        let adapter_limits = adapter.limits();
        let mut required_limits = wgpu::Limits::default();
        required_limits.max_storage_buffer_binding_size = adapter_limits.max_storage_buffer_binding_size;
        required_limits.max_buffer_size = adapter_limits.max_buffer_size;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("sph2d_device"),
                required_features: wgpu::Features::empty(),
                required_limits,
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| BackendError::RequestDevice(e.to_string()))?;

        let limits = device.limits();
        let programs = Programs::new(&device)?;
        Ok(Self {
            uniform_alignment: limits.min_uniform_buffer_offset_alignment,
            max_workgroups: limits.max_compute_workgroups_per_dimension,
            device,
            queue,
            adapter_name,
            programs,
            allocation: None,
            count: 0,
            next_ticket: 0,
            pending: None,
        })
    }

    /// Name of the adapter driving this backend.
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn allocation(&self) -> Result<&Allocation, BackendError> {
        self.allocation.as_ref().ok_or(BackendError::NotAllocated)
    }

    /// Write the dispatch's uniforms and record its passes.
    fn encode(
        &self,
        alloc: &Allocation,
        dispatch: &Dispatch,
        encoder: &mut wgpu::CommandEncoder,
    ) -> Result<(), BackendError> {
        let bufs = &alloc.buffers;
        let groups = &alloc.groups;
        let widest = match dispatch {
            Dispatch::Hash(p) => p.padded,
            Dispatch::Sort(p) => p.padded,
            Dispatch::BuildOffsets(p) => p.key_space.max(p.count),
            Dispatch::Solve(p) => p.count,
            Dispatch::Integrate(p) => p.count,
        };
        if dispatch_size(widest) > self.max_workgroups {
            return Err(BackendError::Dispatch {
                stage: dispatch.stage(),
                message: format!("{widest} invocations exceed the device's workgroup limit"),
            });
        }

        match dispatch {
            Dispatch::Hash(p) => {
                self.queue.write_buffer(&bufs.hash_params, 0, bytemuck::bytes_of(p));
                encode_pass(encoder, "hash", &self.programs.hash.pipelines[0], &groups.hash, p.padded);
            }
            Dispatch::Sort(p) => {
                if bufs.sort_stage_count > 0 {
                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("bitonic"),
                        timestamp_writes: None,
                    });
                    pass.set_pipeline(&self.programs.sort.pipelines[0]);
                    let workgroups = dispatch_size(p.padded);
                    for stage in 0..bufs.sort_stage_count {
                        pass.set_bind_group(0, &groups.sort, &[stage * bufs.sort_stride]);
                        pass.dispatch_workgroups(workgroups, 1, 1);
                    }
                }
            }
            Dispatch::BuildOffsets(p) => {
                self.queue.write_buffer(&bufs.offset_params, 0, bytemuck::bytes_of(p));
                let [clear, mark] = &self.programs.offsets.pipelines[..] else {
                    return Err(missing_entry(Stage::BuildOffsets));
                };
                encode_pass(encoder, "clear_buckets", clear, &groups.offsets, p.key_space);
                encode_pass(encoder, "mark_boundaries", mark, &groups.offsets, p.count);
            }
            Dispatch::Solve(p) => {
                self.queue.write_buffer(&bufs.solve_params, 0, bytemuck::bytes_of(p));
                let [density, forces] = &self.programs.solve.pipelines[..] else {
                    return Err(missing_entry(Stage::Solve));
                };
                encode_pass(encoder, "density", density, &groups.solve, p.count);
                encode_pass(encoder, "forces", forces, &groups.solve, p.count);
            }
            Dispatch::Integrate(p) => {
                self.queue.write_buffer(&bufs.integrate_params, 0, bytemuck::bytes_of(p));
                encode_pass(
                    encoder,
                    "integrate",
                    &self.programs.integrate.pipelines[0],
                    &groups.integrate,
                    p.count,
                );
            }
        }
        Ok(())
    }
}

fn missing_entry(stage: Stage) -> BackendError {
    BackendError::ShaderCompile {
        stage,
        message: "entry point pipeline missing".into(),
    }
}

impl ComputeBackend for GpuBackend {
    fn name(&self) -> &str {
        "gpu"
    }

    fn allocate(&mut self, capacity: usize) -> Result<(), BackendError> {
        self.allocation = None;
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffers = GpuBuffers::new(&self.device, capacity, self.uniform_alignment);
        let groups = BindGroups::new(&self.device, &self.programs, &buffers);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::RequestDevice(err.to_string()));
        }
        tracing::debug!(capacity, padded = buffers.padded, "gpu buffers allocated");
        self.allocation = Some(Allocation { groups, buffers });
        self.count = 0;
        Ok(())
    }

    fn release(&mut self) {
        self.allocation = None;
        self.count = 0;
        self.pending = None;
    }

    fn allocated_capacity(&self) -> Option<usize> {
        self.allocation.as_ref().map(|a| a.buffers.capacity)
    }

    fn upload(&mut self, positions: &[Vec2], velocities: &[Vec2]) -> Result<(), BackendError> {
        let alloc = self.allocation()?;
        let n = positions.len();
        if n > alloc.buffers.capacity || velocities.len() != n {
            return Err(BackendError::CapacityMismatch {
                required: n.max(velocities.len()),
                allocated: alloc.buffers.capacity,
            });
        }
        alloc.buffers.upload(&self.queue, positions, velocities);
        self.count = n;
        Ok(())
    }

    fn submit(&mut self, dispatch: Dispatch) -> Result<Submission, BackendError> {
        let stage = dispatch.stage();
        if self.pending.is_some() {
            return Err(BackendError::Dispatch {
                stage,
                message: "previous submission was not awaited".into(),
            });
        }
        let alloc = self.allocation()?;
        check_dispatch(&dispatch, alloc.buffers.capacity)?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(stage.name()),
        });
        let encoded = self.encode(alloc, &dispatch, &mut encoder);
        let index = self.queue.submit(std::iter::once(encoder.finish()));
        let scope = pollster::block_on(self.device.pop_error_scope());
        encoded?;
        if let Some(err) = scope {
            return Err(BackendError::Dispatch {
                stage,
                message: err.to_string(),
            });
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending = Some((ticket, index));
        Ok(Submission { stage, ticket })
    }

    fn wait(&mut self, submission: Submission) -> Result<(), BackendError> {
        match self.pending.take() {
            Some((ticket, index)) if ticket == submission.ticket => {
                self.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
                Ok(())
            }
            _ => Err(BackendError::Dispatch {
                stage: submission.stage,
                message: format!("unknown submission {}", submission.ticket),
            }),
        }
    }

    fn download(&mut self, mirror: HostMirror<'_>) -> Result<(), BackendError> {
        let n = mirror.len();
        if n > self.count {
            return Err(BackendError::CapacityMismatch {
                required: n,
                allocated: self.count,
            });
        }
        let bufs = &self.allocation()?.buffers;
        let positions: Vec<Vec2> = read_buffer(&self.device, &self.queue, &bufs.positions, n)?;
        let velocities: Vec<Vec2> = read_buffer(&self.device, &self.queue, &bufs.velocities, n)?;
        let weights: Vec<f32> = read_buffer(&self.device, &self.queue, &bufs.densities, n)?;
        mirror.positions.copy_from_slice(&positions);
        mirror.velocities.copy_from_slice(&velocities);
        mirror.weights.copy_from_slice(&weights);
        Ok(())
    }

    fn read_proxies(&mut self) -> Result<Vec<Proxy>, BackendError> {
        let bufs = &self.allocation()?.buffers;
        read_buffer(&self.device, &self.queue, &bufs.proxies, bufs.padded as usize)
    }

    fn read_offsets(&mut self) -> Result<Vec<BucketRange>, BackendError> {
        let bufs = &self.allocation()?.buffers;
        read_buffer(&self.device, &self.queue, &bufs.offsets, bufs.key_space as usize)
    }
}
