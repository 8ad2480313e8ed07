use wgpu::util::DeviceExt;
use anyhow::Result;
use log::{debug, info};
use crate::{
    error::{EngineError, EngineResult},
    lattice::Lattice,
    scheduler::{ComputeBackend, StepParams},
    Float,
};

const WORKGROUP_SIZE: u32 = 8;
const CELL_BYTES: wgpu::BufferAddress = std::mem::size_of::<[Float; 9]>() as wgpu::BufferAddress;

/// D2Q9 step on the GPU: collision, streaming and inflow as three compute
/// passes over a device-resident copy of the lattice.
pub struct GPUContext {
    device: wgpu::Device,
    queue: wgpu::Queue,

    // Compute shaders
    collision_pipeline: wgpu::ComputePipeline,
    streaming_pipeline: wgpu::ComputePipeline,
    boundary_pipeline: wgpu::ComputePipeline,

    // Buffers
    lattice_buffer: wgpu::Buffer,
    barrier_buffer: wgpu::Buffer,
    params_buffer: wgpu::Buffer,

    // Bind groups
    collision_bind_group: wgpu::BindGroup,
    streaming_bind_group: wgpu::BindGroup,
    boundary_bind_group: wgpu::BindGroup,

    // Dimensions
    nx: u32,
    ny: u32,

    /// Lattice revision last copied to the device
    uploaded_revision: Option<u64>,
}

impl GPUContext {
    pub async fn new(nx: usize, ny: usize) -> Result<Self> {
        // Initialize WGPU
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await?;

        let adapter_info = adapter.get_info();
        info!("GPU Adapter Selected: {} ({:?}, {:?}, {:?})",
              adapter_info.name, adapter_info.vendor, adapter_info.device_type, adapter_info.backend);

        // Large grids need more than the default 128 MiB storage binding
        let adapter_limits = adapter.limits();
        let cells = nx * ny;
        let lattice_size = cells as wgpu::BufferAddress * CELL_BYTES;
        if lattice_size > adapter_limits.max_storage_buffer_binding_size as u64
            || lattice_size > adapter_limits.max_buffer_size
        {
            return Err(EngineError::Allocation {
                cells,
                reason: format!(
                    "{} byte lattice exceeds device limits (binding {}, buffer {})",
                    lattice_size, adapter_limits.max_storage_buffer_binding_size, adapter_limits.max_buffer_size
                ),
            }
            .into());
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits {
                        max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
                        max_buffer_size: adapter_limits.max_buffer_size,
                        ..Default::default()
                    },
                    label: None,
                    memory_hints: wgpu::MemoryHints::Performance,
                    ..Default::default()
                },
            )
            .await?;

        let nx = nx as u32;
        let ny = ny as u32;

        // Create buffers
        let lattice_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Lattice Buffer"),
            size: lattice_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let temp_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Temporary Buffer"),
            size: lattice_size,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let barrier_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Barrier Buffer"),
            size: cells as wgpu::BufferAddress * std::mem::size_of::<u32>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Params Buffer"),
            contents: bytemuck::cast_slice(&[GPUParams::new(nx, ny, &StepParams {
                omega: 1.0,
                inflow_speed: None,
            })]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let load_shader = |label: &str, source: &'static str| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        };
        let collision_shader = load_shader("Collision Shader", include_str!("shaders/collision.wgsl"));
        let streaming_shader = load_shader("Streaming Shader", include_str!("shaders/streaming.wgsl"));
        let boundary_shader = load_shader("Boundary Shader", include_str!("shaders/boundary.wgsl"));

        // All passes share one layout: source, destination, barriers, params
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Step Bind Group Layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, false),
                storage_entry(2, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
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

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Step Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let create_pipeline = |label: &str, module: &wgpu::ShaderModule| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            })
        };
        let collision_pipeline = create_pipeline("Collision Pipeline", &collision_shader);
        let streaming_pipeline = create_pipeline("Streaming Pipeline", &streaming_shader);
        let boundary_pipeline = create_pipeline("Boundary Pipeline", &boundary_shader);

        let create_bind_group = |label: &str, src: &wgpu::Buffer, dst: &wgpu::Buffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: src.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: dst.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: barrier_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: params_buffer.as_entire_binding(),
                    },
                ],
            })
        };
        // collision: lattice -> temp, streaming: temp -> lattice, boundary edits lattice in place
        let collision_bind_group = create_bind_group("Collision Bind Group", &lattice_buffer, &temp_buffer);
        let streaming_bind_group = create_bind_group("Streaming Bind Group", &temp_buffer, &lattice_buffer);
        let boundary_bind_group = create_bind_group("Boundary Bind Group", &temp_buffer, &lattice_buffer);

        Ok(Self {
            device,
            queue,
            collision_pipeline,
            streaming_pipeline,
            boundary_pipeline,
            lattice_buffer,
            barrier_buffer,
            params_buffer,
            collision_bind_group,
            streaming_bind_group,
            boundary_bind_group,
            nx,
            ny,
            uploaded_revision: None,
        })
    }

    pub fn upload_lattice_data(&mut self, lattice: &Lattice) {
        self.queue.write_buffer(&self.lattice_buffer, 0, bytemuck::cast_slice(lattice.densities()));
        self.queue.write_buffer(&self.barrier_buffer, 0, bytemuck::cast_slice(lattice.barriers()));
        self.uploaded_revision = Some(lattice.revision());
    }

    pub async fn read_lattice_data(&self) -> Result<Vec<[Float; 9]>> {
        let buffer_size = (self.nx * self.ny) as wgpu::BufferAddress * CELL_BYTES;

        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Copy Encoder"),
        });

        encoder.copy_buffer_to_buffer(&self.lattice_buffer, 0, &staging_buffer, 0, buffer_size);

        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        self.device.poll(wgpu::PollType::Wait)?;
        receiver.await??;

        let data = buffer_slice.get_mapped_range();
        let result: Vec<[Float; 9]> = bytemuck::cast_slice(&data).to_vec();

        drop(data);
        staging_buffer.unmap();

        Ok(result)
    }

    /// Encode and submit `steps` full steps, then wait for the device.
    pub fn step(&self, params: &StepParams, steps: usize) -> Result<()> {
        let start_time = std::time::Instant::now();

        self.queue.write_buffer(
            &self.params_buffer,
            0,
            bytemuck::cast_slice(&[GPUParams::new(self.nx, self.ny, params)]),
        );

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("LBM Step Encoder"),
        });

        let dispatch_x = self.nx.div_ceil(WORKGROUP_SIZE);
        let dispatch_y = self.ny.div_ceil(WORKGROUP_SIZE);

        let passes = [
            ("Collision Pass", &self.collision_pipeline, &self.collision_bind_group),
            ("Streaming Pass", &self.streaming_pipeline, &self.streaming_bind_group),
            ("Boundary Pass", &self.boundary_pipeline, &self.boundary_bind_group),
        ];

        // Pass boundaries order the storage writes between stages
        for _ in 0..steps {
            for (label, pipeline, bind_group) in passes {
                let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(label),
                    timestamp_writes: None,
                });
                compute_pass.set_pipeline(pipeline);
                compute_pass.set_bind_group(0, bind_group, &[]);
                compute_pass.dispatch_workgroups(dispatch_x, dispatch_y, 1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));

        self.device.poll(wgpu::PollType::Wait)?;

        let elapsed = start_time.elapsed();
        if elapsed.as_millis() > 10 {
            debug!("GPU advanced {} steps in {:.2}ms", steps, elapsed.as_secs_f64() * 1000.0);
        }

        Ok(())
    }
}

impl ComputeBackend for GPUContext {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn advance(&mut self, lattice: &mut Lattice, params: &StepParams, steps: usize) -> EngineResult<()> {
        if lattice.nx() as u32 != self.nx || lattice.ny() as u32 != self.ny {
            return Err(EngineError::Backend(format!(
                "device grid is {}x{}, lattice is {}x{}",
                self.nx,
                self.ny,
                lattice.nx(),
                lattice.ny()
            )));
        }
        if steps == 0 {
            return Ok(());
        }

        if self.uploaded_revision != Some(lattice.revision()) {
            debug!("uploading lattice revision {}", lattice.revision());
            self.upload_lattice_data(lattice);
        }

        self.step(params, steps).map_err(|e| EngineError::Backend(e.to_string()))?;
        let data = pollster::block_on(self.read_lattice_data()).map_err(|e| EngineError::Backend(e.to_string()))?;
        lattice.overwrite_front(&data)
    }
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

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct GPUParams {
    nx: u32,
    ny: u32,
    omega: f32,
    inflow_speed: f32,
    inflow_enabled: u32,
    padding: [u32; 3], // uniform blocks are 16-byte aligned
}

impl GPUParams {
    fn new(nx: u32, ny: u32, params: &StepParams) -> Self {
        Self {
            nx,
            ny,
            omega: params.omega,
            inflow_speed: params.inflow_speed.unwrap_or(0.0),
            inflow_enabled: params.inflow_speed.is_some() as u32,
            padding: [0; 3],
        }
    }
}
