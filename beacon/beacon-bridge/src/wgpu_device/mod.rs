//! wgpu implementation of [`beacon_rhi::Device`].
//!
//! wgpu has no slot model, so the device keeps per-stage slot tables itself and turns them into
//! bind groups at draw time using the reflected bindings of the current program. Pipelines are
//! created lazily and cached per (program, stages, topology, target formats, blend mode). Every
//! clear and every draw is recorded into its own render pass and submitted immediately, which
//! keeps buffer writes issued between draws ordered with the draws that read them.

pub mod convert;
pub mod reflect;

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;

use beacon_rhi::{
    BlendMode, BufferAccess, BufferDescriptor, BufferId, BufferUsage, Device, DeviceError,
    PrimitiveTopology, ProgramDescriptor, ProgramId, RenderTarget, ResourceId, SamplerDescriptor,
    SamplerId, Stage, StageMask, TextureDescriptor, TextureDimension, TextureFormat, TextureId,
    TextureUsage, UploadMode, VertexSemantic, MAX_COLOR_TARGETS, MAX_SLOTS,
};

pub use reflect::{reflect_program, BindingKind, ReflectedBinding};

use reflect::GROUP_COUNT;

/// Uniform bindings read whole 16-byte rows.
const CONSTANT_ALIGNMENT: u64 = 16;

struct GpuBuffer {
    buffer: wgpu::Buffer,
    desc: BufferDescriptor,
}

struct GpuTexture {
    texture: wgpu::Texture,
    /// View over every mip and layer, cube-shaped for cube textures.
    sample_view: wgpu::TextureView,
    desc: TextureDescriptor,
}

struct GpuProgram {
    label: String,
    module: wgpu::ShaderModule,
    vertex_entry: String,
    pixel_entry: Option<String>,
    stages: StageMask,
    vertex_layout: Vec<VertexSemantic>,
    bindings: Vec<ReflectedBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    stages: StageMask,
    topology: PrimitiveTopology,
    colors: Vec<wgpu::TextureFormat>,
    depth: Option<wgpu::TextureFormat>,
    blend: BlendMode,
}

struct CachedPipeline {
    pipeline: wgpu::RenderPipeline,
    layouts: Vec<wgpu::BindGroupLayout>,
    /// Bindings of the active stages only.
    bindings: Vec<ReflectedBinding>,
}

#[derive(Debug, Default, Clone, Copy)]
struct SlotTable {
    constant_buffers: [Option<BufferId>; MAX_SLOTS],
    textures: [Option<TextureId>; MAX_SLOTS],
    samplers: [Option<SamplerId>; MAX_SLOTS],
}

/// Resolved attachment for one render pass.
struct Attachment {
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
}

fn slot_index(kind: &'static str, slot: u32) -> Result<usize, DeviceError> {
    if (slot as usize) < MAX_SLOTS {
        Ok(slot as usize)
    } else {
        Err(DeviceError::SlotOutOfRange {
            kind,
            slot,
            max: MAX_SLOTS,
        })
    }
}

/// Zero-pad `data` to the copy alignment wgpu requires for buffer writes.
fn padded(data: &[u8]) -> Cow<'_, [u8]> {
    let len = wgpu::util::align_to(data.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT) as usize;
    if len == data.len() {
        Cow::Borrowed(data)
    } else {
        let mut owned = data.to_vec();
        owned.resize(len, 0);
        Cow::Owned(owned)
    }
}

fn layout_entry(binding: &ReflectedBinding) -> wgpu::BindGroupLayoutEntry {
    let ty = match binding.kind {
        BindingKind::ConstantBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingKind::Texture { dimension, depth } => wgpu::BindingType::Texture {
            sample_type: if depth {
                wgpu::TextureSampleType::Depth
            } else {
                wgpu::TextureSampleType::Float { filterable: true }
            },
            view_dimension: match dimension {
                TextureDimension::D2 => wgpu::TextureViewDimension::D2,
                TextureDimension::Cube => wgpu::TextureViewDimension::Cube,
            },
            multisampled: false,
        },
        BindingKind::Sampler { comparison } => wgpu::BindingType::Sampler(if comparison {
            wgpu::SamplerBindingType::Comparison
        } else {
            wgpu::SamplerBindingType::Filtering
        }),
    };
    wgpu::BindGroupLayoutEntry {
        binding: binding.slot,
        visibility: convert::shader_stages(binding.stages),
        ty,
        count: None,
    }
}

/// Immediate-mode device on a wgpu device and queue.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    next_id: ResourceId,
    buffers: HashMap<BufferId, GpuBuffer>,
    textures: HashMap<TextureId, GpuTexture>,
    samplers: HashMap<SamplerId, wgpu::Sampler>,
    programs: HashMap<ProgramId, GpuProgram>,
    pipelines: HashMap<PipelineKey, CachedPipeline>,
    backbuffer: TextureId,
    /// Swapchain image standing in for the backbuffer during a windowed frame.
    surface: Option<wgpu::SurfaceTexture>,

    program: Option<ProgramId>,
    stages: StageMask,
    topology: Option<PrimitiveTopology>,
    slots: [SlotTable; 3],
    colors: Vec<RenderTarget>,
    depth: Option<RenderTarget>,
    blend: BlendMode,
    vertex_buffer: Option<(BufferId, u32)>,
    index_buffer: Option<BufferId>,
    in_frame: bool,
}

impl std::fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("buffers", &self.buffers.len())
            .field("textures", &self.textures.len())
            .field("programs", &self.programs.len())
            .field("pipelines", &self.pipelines.len())
            .field("backbuffer", &self.backbuffer)
            .field("surface_attached", &self.surface.is_some())
            .finish()
    }
}

impl WgpuDevice {
    /// Wrap an existing device and queue. The backbuffer is an offscreen `Rgba8Unorm` texture of
    /// the given size until a surface texture is attached.
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        width: u32,
        height: u32,
    ) -> Result<Self, DeviceError> {
        let mut this = Self {
            device,
            queue,
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            samplers: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            backbuffer: TextureId(0),
            surface: None,
            program: None,
            stages: StageMask::empty(),
            topology: None,
            slots: [SlotTable::default(); 3],
            colors: Vec::new(),
            depth: None,
            blend: BlendMode::Opaque,
            vertex_buffer: None,
            index_buffer: None,
            in_frame: false,
        };
        this.backbuffer = this.create_texture(
            &TextureDescriptor {
                label: Some("backbuffer".into()),
                size: (width.max(1), height.max(1)),
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
                ..Default::default()
            },
            None,
        )?;
        Ok(this)
    }

    /// Device on the default adapter with no surface.
    pub fn headless(width: u32, height: u32) -> Result<Self, DeviceError> {
        let (device, queue) = pollster::block_on(async {
            let instance = wgpu::Instance::default();
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions::default())
                .await
                .ok_or_else(|| DeviceError::CreationFailed {
                    kind: "adapter",
                    message: "no adapter".into(),
                })?;
            log::info!("wgpu adapter: {:?}", adapter.get_info().name);
            adapter
                .request_device(&wgpu::DeviceDescriptor::default(), None)
                .await
                .map_err(|e| DeviceError::CreationFailed {
                    kind: "device",
                    message: e.to_string(),
                })
        })?;
        Self::new(device, queue, width, height)
    }

    pub fn wgpu_device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Render into `frame` instead of the offscreen backbuffer until [`take_surface`](Self::take_surface).
    pub fn attach_surface(&mut self, frame: wgpu::SurfaceTexture) {
        self.surface = Some(frame);
    }

    pub fn take_surface(&mut self) -> Option<wgpu::SurfaceTexture> {
        self.surface.take()
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    fn alloc_id(&mut self) -> ResourceId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Run `f` inside a validation error scope.
    fn scoped<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        let error = pollster::block_on(self.device.pop_error_scope());
        (value, error)
    }

    fn texture(&self, texture: TextureId) -> Result<&GpuTexture, DeviceError> {
        self.textures.get(&texture).ok_or(DeviceError::InvalidHandle {
            kind: "texture",
            id: texture.0,
        })
    }

    fn buffer(&self, buffer: BufferId) -> Result<&GpuBuffer, DeviceError> {
        self.buffers.get(&buffer).ok_or(DeviceError::InvalidHandle {
            kind: "buffer",
            id: buffer.0,
        })
    }

    /// Single mip, single layer view of a render target.
    fn attachment(&self, target: &RenderTarget) -> Result<Attachment, DeviceError> {
        if target.texture == self.backbuffer {
            if let Some(frame) = &self.surface {
                let format = frame.texture.format();
                let view = frame.texture.create_view(&wgpu::TextureViewDescriptor {
                    format: Some(format),
                    ..Default::default()
                });
                return Ok(Attachment { view, format });
            }
        }
        let gpu = self.texture(target.texture)?;
        if !gpu.desc.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            return Err(DeviceError::Binding(format!(
                "texture {} is not a render target",
                target.texture.0
            )));
        }
        if target.mip_level >= gpu.desc.mip_level_count
            || target.layer >= gpu.desc.dimension.layer_count()
        {
            return Err(DeviceError::Binding(format!(
                "texture {} has no mip {} layer {}",
                target.texture.0, target.mip_level, target.layer
            )));
        }
        let format = convert::texture_format(gpu.desc.format);
        let view = gpu.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("render target"),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_mip_level: target.mip_level,
            mip_level_count: Some(1),
            base_array_layer: target.layer,
            array_layer_count: Some(1),
            ..Default::default()
        });
        Ok(Attachment { view, format })
    }

    fn submit_clear(
        &self,
        color: Option<(&Attachment, wgpu::Color)>,
        depth: Option<(&Attachment, f32)>,
    ) -> Result<(), DeviceError> {
        let ((), error) = self.scoped(|device| {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("beacon_clear"),
            });
            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = color
                .iter()
                .map(|(attachment, value)| {
                    Some(wgpu::RenderPassColorAttachment {
                        view: &attachment.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(*value),
                            store: wgpu::StoreOp::Store,
                        },
                    })
                })
                .collect();
            let depth_stencil_attachment =
                depth.map(|(attachment, value)| wgpu::RenderPassDepthStencilAttachment {
                    view: &attachment.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(value),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                });
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("beacon_clear_pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.queue.submit(Some(encoder.finish()));
        });
        match error {
            Some(e) => Err(DeviceError::Draw(format!("clear: {e}"))),
            None => Ok(()),
        }
    }

    fn create_pipeline(&self, key: &PipelineKey) -> Result<CachedPipeline, DeviceError> {
        let program = self.programs.get(&key.program).ok_or(DeviceError::InvalidHandle {
            kind: "program",
            id: key.program.0,
        })?;
        let topology = convert::topology(key.topology).ok_or_else(|| {
            DeviceError::Unsupported(format!("{:?} topology", key.topology))
        })?;
        let bindings: Vec<ReflectedBinding> = program
            .bindings
            .iter()
            .filter(|b| b.stages.intersects(key.stages))
            .map(|b| ReflectedBinding {
                stages: b.stages & key.stages,
                ..*b
            })
            .collect();

        let (pipeline, error) = self.scoped(|device| {
            let layouts: Vec<wgpu::BindGroupLayout> = (0..GROUP_COUNT as u32)
                .map(|group| {
                    let entries: Vec<wgpu::BindGroupLayoutEntry> = bindings
                        .iter()
                        .filter(|b| b.group == group)
                        .map(layout_entry)
                        .collect();
                    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some(program.label.as_str()),
                        entries: &entries,
                    })
                })
                .collect();
            let layout_refs: Vec<&wgpu::BindGroupLayout> = layouts.iter().collect();
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(program.label.as_str()),
                bind_group_layouts: &layout_refs,
                push_constant_ranges: &[],
            });

            let attributes = convert::vertex_attributes(&program.vertex_layout);
            let vertex_buffers = [wgpu::VertexBufferLayout {
                array_stride: u64::from(VertexSemantic::stride(&program.vertex_layout)),
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &attributes,
            }];
            let buffers: &[wgpu::VertexBufferLayout] = if program.vertex_layout.is_empty() {
                &[]
            } else {
                &vertex_buffers
            };
            let targets: Vec<Option<wgpu::ColorTargetState>> = key
                .colors
                .iter()
                .map(|&format| {
                    Some(wgpu::ColorTargetState {
                        format,
                        blend: convert::blend_state(key.blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })
                })
                .collect();
            let fragment = match (&program.pixel_entry, key.stages.contains(StageMask::PIXEL)) {
                (Some(entry), true) => Some(wgpu::FragmentState {
                    module: &program.module,
                    entry_point: Some(entry.as_str()),
                    targets: &targets,
                    compilation_options: Default::default(),
                }),
                _ => None,
            };
            let strip_index_format = (topology == wgpu::PrimitiveTopology::TriangleStrip)
                .then_some(wgpu::IndexFormat::Uint32);

            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(program.label.as_str()),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &program.module,
                    entry_point: Some(program.vertex_entry.as_str()),
                    buffers,
                    compilation_options: Default::default(),
                },
                fragment,
                primitive: wgpu::PrimitiveState {
                    topology,
                    strip_index_format,
                    ..Default::default()
                },
                depth_stencil: key.depth.map(|format| wgpu::DepthStencilState {
                    format,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::LessEqual,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
            (pipeline, layouts)
        });
        if let Some(e) = error {
            return Err(DeviceError::CreationFailed {
                kind: "pipeline",
                message: format!("`{}`: {e}", program.label),
            });
        }
        let (pipeline, layouts) = pipeline;
        log::debug!(
            "pipeline `{}` {:?} colors {:?} depth {:?} blend {:?}",
            program.label,
            key.stages,
            key.colors,
            key.depth,
            key.blend
        );
        Ok(CachedPipeline {
            pipeline,
            layouts,
            bindings,
        })
    }

    /// Slot table a binding reads from: pixel for anything the fragment stage sees.
    fn table_for(&self, binding: &ReflectedBinding) -> &SlotTable {
        let stage = if binding.stages.contains(StageMask::PIXEL) {
            Stage::Pixel
        } else {
            Stage::Vertex
        };
        &self.slots[stage.index()]
    }

    fn binding_resource(
        &self,
        binding: &ReflectedBinding,
    ) -> Result<wgpu::BindingResource<'_>, DeviceError> {
        let table = self.table_for(binding);
        let slot = binding.slot as usize;
        let missing = |kind: &str| {
            DeviceError::Binding(format!(
                "no {kind} bound at slot {} for {:?}",
                binding.slot, binding.stages
            ))
        };
        match binding.kind {
            BindingKind::ConstantBuffer => {
                let id = table.constant_buffers[slot].ok_or_else(|| missing("constant buffer"))?;
                Ok(self.buffer(id)?.buffer.as_entire_binding())
            }
            BindingKind::Texture { dimension, .. } => {
                let id = table.textures[slot].ok_or_else(|| missing("texture"))?;
                let gpu = self.texture(id)?;
                if gpu.desc.dimension != dimension {
                    return Err(DeviceError::Binding(format!(
                        "texture {} is {:?}, slot {} expects {:?}",
                        id.0, gpu.desc.dimension, binding.slot, dimension
                    )));
                }
                Ok(wgpu::BindingResource::TextureView(&gpu.sample_view))
            }
            BindingKind::Sampler { .. } => {
                let id = table.samplers[slot].ok_or_else(|| missing("sampler"))?;
                let sampler = self.samplers.get(&id).ok_or(DeviceError::InvalidHandle {
                    kind: "sampler",
                    id: id.0,
                })?;
                Ok(wgpu::BindingResource::Sampler(sampler))
            }
        }
    }

    fn bind_groups(&self, cached: &CachedPipeline) -> Result<Vec<wgpu::BindGroup>, DeviceError> {
        let mut groups = Vec::with_capacity(GROUP_COUNT);
        for (group, layout) in cached.layouts.iter().enumerate() {
            let mut entries = Vec::new();
            for binding in cached.bindings.iter().filter(|b| b.group == group as u32) {
                entries.push(wgpu::BindGroupEntry {
                    binding: binding.slot,
                    resource: self.binding_resource(binding)?,
                });
            }
            groups.push(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("beacon_slots"),
                layout,
                entries: &entries,
            }));
        }
        Ok(groups)
    }

    fn draw_inner(&mut self, count: u32, indexed: bool) -> Result<(), DeviceError> {
        let program = self
            .program
            .ok_or_else(|| DeviceError::Draw("no program bound".into()))?;
        let topology = self
            .topology
            .ok_or_else(|| DeviceError::Draw("no topology set".into()))?;
        if !self.stages.contains(StageMask::VERTEX) {
            return Err(DeviceError::Draw("vertex stage not bound".into()));
        }
        if self.colors.is_empty() && self.depth.is_none() {
            return Err(DeviceError::Draw("no render targets set".into()));
        }
        let colors = self
            .colors
            .iter()
            .map(|t| self.attachment(t))
            .collect::<Result<Vec<_>, _>>()?;
        let depth = self.depth.as_ref().map(|t| self.attachment(t)).transpose()?;

        let key = PipelineKey {
            program,
            stages: self.stages,
            topology,
            colors: colors.iter().map(|a| a.format).collect(),
            depth: depth.as_ref().map(|a| a.format),
            blend: self.blend,
        };
        if !self.pipelines.contains_key(&key) {
            let created = self.create_pipeline(&key)?;
            self.pipelines.insert(key.clone(), created);
        }
        let cached = &self.pipelines[&key];
        let gpu_program = &self.programs[&program];

        let vertex = if gpu_program.vertex_layout.is_empty() {
            None
        } else {
            let (id, stride) = self
                .vertex_buffer
                .ok_or_else(|| DeviceError::Draw("no vertex buffer bound".into()))?;
            let expected = VertexSemantic::stride(&gpu_program.vertex_layout);
            if stride != expected {
                return Err(DeviceError::Draw(format!(
                    "vertex stride {stride} does not match `{}` layout stride {expected}",
                    gpu_program.label
                )));
            }
            Some(&self.buffer(id)?.buffer)
        };
        let index = if indexed {
            let id = self
                .index_buffer
                .ok_or_else(|| DeviceError::Draw("no index buffer bound".into()))?;
            Some(&self.buffer(id)?.buffer)
        } else {
            None
        };

        let (result, error) = self.scoped(|device| -> Result<(), DeviceError> {
            let groups = self.bind_groups(cached)?;
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("beacon_draw"),
            });
            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = colors
                .iter()
                .map(|attachment| {
                    Some(wgpu::RenderPassColorAttachment {
                        view: &attachment.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })
                })
                .collect();
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some(gpu_program.label.as_str()),
                    color_attachments: &color_attachments,
                    depth_stencil_attachment: depth.as_ref().map(|attachment| {
                        wgpu::RenderPassDepthStencilAttachment {
                            view: &attachment.view,
                            depth_ops: Some(wgpu::Operations {
                                load: wgpu::LoadOp::Load,
                                store: wgpu::StoreOp::Store,
                            }),
                            stencil_ops: None,
                        }
                    }),
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(&cached.pipeline);
                for (group, bind_group) in groups.iter().enumerate() {
                    pass.set_bind_group(group as u32, bind_group, &[]);
                }
                if let Some(buffer) = vertex {
                    pass.set_vertex_buffer(0, buffer.slice(..));
                }
                match index {
                    Some(buffer) => {
                        pass.set_index_buffer(buffer.slice(..), wgpu::IndexFormat::Uint32);
                        pass.draw_indexed(0..count, 0, 0..1);
                    }
                    None => pass.draw(0..count, 0..1),
                }
            }
            self.queue.submit(Some(encoder.finish()));
            Ok(())
        });
        result?;
        if let Some(e) = error {
            return Err(DeviceError::Draw(format!("`{}`: {e}", gpu_program.label)));
        }
        log::trace!("draw `{}` count {}", gpu_program.label, count);
        Ok(())
    }
}

impl Device for WgpuDevice {
    fn create_buffer(
        &mut self,
        desc: &BufferDescriptor,
        contents: Option<&[u8]>,
    ) -> Result<BufferId, DeviceError> {
        if desc.size == 0 {
            return Err(DeviceError::CreationFailed {
                kind: "buffer",
                message: "zero-sized buffer".into(),
            });
        }
        if contents.is_some_and(|c| c.len() as u64 > desc.size) {
            return Err(DeviceError::CreationFailed {
                kind: "buffer",
                message: format!("initial contents exceed size {}", desc.size),
            });
        }
        let alignment = if desc.usage.contains(BufferUsage::CONSTANT) {
            CONSTANT_ALIGNMENT
        } else {
            wgpu::COPY_BUFFER_ALIGNMENT
        };
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::util::align_to(desc.size, alignment),
            usage: convert::buffer_usage(desc.usage),
            mapped_at_creation: false,
        });
        if let Some(contents) = contents {
            self.queue.write_buffer(&buffer, 0, &padded(contents));
        }
        let id = BufferId(self.alloc_id());
        self.buffers.insert(
            id,
            GpuBuffer {
                buffer,
                desc: desc.clone(),
            },
        );
        Ok(id)
    }

    fn update_buffer(
        &mut self,
        buffer: BufferId,
        data: &[u8],
        mode: UploadMode,
    ) -> Result<(), DeviceError> {
        let gpu = self.buffer(buffer)?;
        if mode == UploadMode::Discard && gpu.desc.access != BufferAccess::Dynamic {
            return Err(DeviceError::Unsupported(format!(
                "discard upload on non-dynamic buffer {}",
                buffer.0
            )));
        }
        if data.len() as u64 > gpu.desc.size {
            return Err(DeviceError::Binding(format!(
                "{} bytes written into {}-byte buffer {}",
                data.len(),
                gpu.desc.size,
                buffer.0
            )));
        }
        self.queue.write_buffer(&gpu.buffer, 0, &padded(data));
        Ok(())
    }

    fn create_texture(
        &mut self,
        desc: &TextureDescriptor,
        contents: Option<&[u8]>,
    ) -> Result<TextureId, DeviceError> {
        let (width, height) = desc.size;
        if width == 0 || height == 0 || desc.mip_level_count == 0 {
            return Err(DeviceError::CreationFailed {
                kind: "texture",
                message: format!("degenerate texture {:?}", desc.label),
            });
        }
        if desc.dimension == TextureDimension::Cube && width != height {
            return Err(DeviceError::CreationFailed {
                kind: "texture",
                message: "cube faces must be square".into(),
            });
        }
        let format = convert::texture_format(desc.format);
        let mut usage = convert::texture_usage(desc.usage);
        if contents.is_some() {
            if desc.format.is_depth() {
                return Err(DeviceError::CreationFailed {
                    kind: "texture",
                    message: "depth textures cannot be initialised with data".into(),
                });
            }
            let expected = desc.upload_size();
            if contents.map_or(0, <[u8]>::len) as u64 != expected {
                return Err(DeviceError::CreationFailed {
                    kind: "texture",
                    message: format!("expected {expected} bytes for {:?}", desc.label),
                });
            }
            usage |= wgpu::TextureUsages::COPY_DST;
        }
        let bytes_per_row = width
            .checked_mul(desc.format.block_size())
            .ok_or_else(|| DeviceError::CreationFailed {
                kind: "texture",
                message: format!("row of {width} texels overflows for {:?}", desc.label),
            })?;
        let layers = desc.dimension.layer_count();
        let (texture, error) = self.scoped(|device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: desc.label.as_deref(),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: layers,
                },
                mip_level_count: desc.mip_level_count,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        });
        if let Some(e) = error {
            return Err(DeviceError::CreationFailed {
                kind: "texture",
                message: e.to_string(),
            });
        }
        if let Some(contents) = contents {
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                contents,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        }
        let sample_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: desc.label.as_deref(),
            dimension: Some(match desc.dimension {
                TextureDimension::D2 => wgpu::TextureViewDimension::D2,
                TextureDimension::Cube => wgpu::TextureViewDimension::Cube,
            }),
            ..Default::default()
        });
        let id = TextureId(self.alloc_id());
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                sample_view,
                desc: desc.clone(),
            },
        );
        Ok(id)
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> Result<SamplerId, DeviceError> {
        let sampler = self
            .device
            .create_sampler(&convert::sampler_descriptor(desc));
        let id = SamplerId(self.alloc_id());
        self.samplers.insert(id, sampler);
        Ok(id)
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> Result<ProgramId, DeviceError> {
        if desc.tessellation_entries.is_some() || desc.topology == PrimitiveTopology::PatchList3 {
            return Err(DeviceError::Unsupported(format!(
                "`{}`: tessellation is not available on wgpu",
                desc.label
            )));
        }
        let vertex_entry = desc.vertex_entry.clone().ok_or_else(|| {
            DeviceError::ShaderCompilation {
                label: desc.label.clone(),
                message: "program has no vertex entry point".into(),
            }
        })?;
        let mut entries = vec![(Stage::Vertex, vertex_entry.as_str())];
        if let Some(pixel) = &desc.pixel_entry {
            entries.push((Stage::Pixel, pixel.as_str()));
        }
        let bindings = reflect_program(&desc.label, &desc.source, &entries)?;

        let (module, error) = self.scoped(|device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.label.as_str()),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(desc.source.as_str())),
            })
        });
        if let Some(e) = error {
            return Err(DeviceError::ShaderCompilation {
                label: desc.label.clone(),
                message: e.to_string(),
            });
        }
        let id = ProgramId(self.alloc_id());
        log::debug!("program `{}`: {} bindings", desc.label, bindings.len());
        self.programs.insert(
            id,
            GpuProgram {
                label: desc.label.clone(),
                module,
                vertex_entry,
                pixel_entry: desc.pixel_entry.clone(),
                stages: desc.stages(),
                vertex_layout: desc.vertex_layout.clone(),
                bindings,
            },
        );
        Ok(id)
    }

    fn destroy(&mut self, id: ResourceId) {
        if let Some(gpu) = self.buffers.remove(&BufferId(id)) {
            gpu.buffer.destroy();
            return;
        }
        if let Some(gpu) = self.textures.remove(&TextureId(id)) {
            gpu.texture.destroy();
            return;
        }
        if self.samplers.remove(&SamplerId(id)).is_some() {
            return;
        }
        if self.programs.remove(&ProgramId(id)).is_some() {
            self.pipelines.retain(|key, _| key.program != ProgramId(id));
            return;
        }
        log::warn!("WgpuDevice: destroy of unknown resource {}", id);
    }

    fn backbuffer(&self) -> TextureId {
        self.backbuffer
    }

    fn texture_size(&self, texture: TextureId) -> Result<(u32, u32), DeviceError> {
        if texture == self.backbuffer {
            if let Some(frame) = &self.surface {
                return Ok((frame.texture.width(), frame.texture.height()));
            }
        }
        self.texture(texture).map(|gpu| gpu.desc.size)
    }

    fn begin_frame(&mut self) -> Result<(), DeviceError> {
        if self.in_frame {
            return Err(DeviceError::Surface("begin_frame inside a frame".into()));
        }
        self.in_frame = true;
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), DeviceError> {
        if !self.in_frame {
            return Err(DeviceError::Surface("end_frame without begin_frame".into()));
        }
        self.in_frame = false;
        let _ = self.device.poll(wgpu::Maintain::Poll);
        Ok(())
    }

    fn set_program(
        &mut self,
        program: Option<ProgramId>,
        stages: StageMask,
    ) -> Result<(), DeviceError> {
        if let Some(id) = program {
            let gpu = self.programs.get(&id).ok_or(DeviceError::InvalidHandle {
                kind: "program",
                id: id.0,
            })?;
            if !gpu.stages.contains(stages) {
                return Err(DeviceError::Binding(format!(
                    "program `{}` lacks stages {:?}",
                    gpu.label,
                    stages - gpu.stages
                )));
            }
        }
        self.program = program;
        self.stages = if program.is_some() {
            stages
        } else {
            StageMask::empty()
        };
        Ok(())
    }

    fn set_topology(&mut self, topology: Option<PrimitiveTopology>) -> Result<(), DeviceError> {
        if topology == Some(PrimitiveTopology::PatchList3) {
            return Err(DeviceError::Unsupported("patch-list-3 topology".into()));
        }
        self.topology = topology;
        Ok(())
    }

    fn bind_constant_buffer(
        &mut self,
        stage: Stage,
        slot: u32,
        buffer: Option<BufferId>,
    ) -> Result<(), DeviceError> {
        let index = slot_index("constant buffer", slot)?;
        if let Some(id) = buffer {
            self.buffer(id)?;
        }
        self.slots[stage.index()].constant_buffers[index] = buffer;
        Ok(())
    }

    fn bind_texture(
        &mut self,
        stage: Stage,
        slot: u32,
        texture: Option<TextureId>,
    ) -> Result<(), DeviceError> {
        let index = slot_index("texture", slot)?;
        if let Some(id) = texture {
            self.texture(id)?;
        }
        self.slots[stage.index()].textures[index] = texture;
        Ok(())
    }

    fn bind_sampler(
        &mut self,
        stage: Stage,
        slot: u32,
        sampler: Option<SamplerId>,
    ) -> Result<(), DeviceError> {
        let index = slot_index("sampler", slot)?;
        if let Some(id) = sampler {
            if !self.samplers.contains_key(&id) {
                return Err(DeviceError::InvalidHandle {
                    kind: "sampler",
                    id: id.0,
                });
            }
        }
        self.slots[stage.index()].samplers[index] = sampler;
        Ok(())
    }

    fn set_render_targets(
        &mut self,
        colors: &[RenderTarget],
        depth: Option<RenderTarget>,
    ) -> Result<(), DeviceError> {
        if colors.len() > MAX_COLOR_TARGETS {
            return Err(DeviceError::SlotOutOfRange {
                kind: "color target",
                slot: colors.len() as u32,
                max: MAX_COLOR_TARGETS,
            });
        }
        for target in colors.iter().chain(depth.iter()) {
            self.attachment(target)?;
        }
        self.colors = colors.to_vec();
        self.depth = depth;
        Ok(())
    }

    fn set_blend_mode(&mut self, mode: BlendMode) -> Result<(), DeviceError> {
        self.blend = mode;
        Ok(())
    }

    fn clear_color(&mut self, target: RenderTarget, color: [f32; 4]) -> Result<(), DeviceError> {
        let attachment = self.attachment(&target)?;
        let [r, g, b, a] = color.map(f64::from);
        self.submit_clear(Some((&attachment, wgpu::Color { r, g, b, a })), None)
    }

    fn clear_depth(&mut self, target: RenderTarget, depth: f32) -> Result<(), DeviceError> {
        let attachment = self.attachment(&target)?;
        if !attachment.format.is_depth_stencil_format() {
            return Err(DeviceError::Binding(format!(
                "clear_depth on color texture {}",
                target.texture.0
            )));
        }
        self.submit_clear(None, Some((&attachment, depth)))
    }

    fn set_vertex_buffer(
        &mut self,
        buffer: Option<BufferId>,
        stride: u32,
    ) -> Result<(), DeviceError> {
        if let Some(id) = buffer {
            self.buffer(id)?;
        }
        self.vertex_buffer = buffer.map(|id| (id, stride));
        Ok(())
    }

    fn set_index_buffer(&mut self, buffer: Option<BufferId>) -> Result<(), DeviceError> {
        if let Some(id) = buffer {
            self.buffer(id)?;
        }
        self.index_buffer = buffer;
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32) -> Result<(), DeviceError> {
        self.draw_inner(vertex_count, false)
    }

    fn draw_indexed(&mut self, index_count: u32) -> Result<(), DeviceError> {
        self.draw_inner(index_count, true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
