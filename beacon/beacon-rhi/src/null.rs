//! Headless device that validates handles and records every call. Used by tests and tools.

use std::any::Any;
use std::collections::HashMap;

use crate::{
    BlendMode, BufferAccess, BufferDescriptor, BufferId, Device, DeviceError, PrimitiveTopology,
    ProgramDescriptor, ProgramId, RenderTarget, ResourceId, SamplerDescriptor, SamplerId, Stage,
    StageMask, TextureDescriptor, TextureDimension, TextureFormat, TextureId, TextureUsage,
    UploadMode, MAX_COLOR_TARGETS, MAX_SLOTS,
};

/// One recorded device call.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateBuffer { buffer: BufferId, size: u64 },
    UpdateBuffer { buffer: BufferId, mode: UploadMode, len: usize },
    CreateTexture { texture: TextureId, label: Option<String> },
    CreateSampler { sampler: SamplerId, desc: SamplerDescriptor },
    CreateProgram { program: ProgramId, label: String },
    Destroy(ResourceId),
    BeginFrame,
    EndFrame,
    SetProgram { program: Option<ProgramId>, stages: StageMask },
    SetTopology(Option<PrimitiveTopology>),
    BindConstantBuffer { stage: Stage, slot: u32, buffer: Option<BufferId> },
    BindTexture { stage: Stage, slot: u32, texture: Option<TextureId> },
    BindSampler { stage: Stage, slot: u32, sampler: Option<SamplerId> },
    SetRenderTargets { colors: Vec<RenderTarget>, depth: Option<RenderTarget> },
    SetBlendMode(BlendMode),
    ClearColor { target: RenderTarget, color: [f32; 4] },
    ClearDepth { target: RenderTarget, depth: f32 },
    SetVertexBuffer { buffer: Option<BufferId>, stride: u32 },
    SetIndexBuffer(Option<BufferId>),
    Draw { program: ProgramId, vertex_count: u32 },
    DrawIndexed { program: ProgramId, index_count: u32 },
}

impl DeviceCall {
    pub fn is_slot_bind(&self) -> bool {
        matches!(
            self,
            DeviceCall::BindConstantBuffer { .. }
                | DeviceCall::BindTexture { .. }
                | DeviceCall::BindSampler { .. }
        )
    }

    pub fn is_draw(&self) -> bool {
        matches!(self, DeviceCall::Draw { .. } | DeviceCall::DrawIndexed { .. })
    }
}

#[derive(Debug)]
struct NullBuffer {
    desc: BufferDescriptor,
    contents: Vec<u8>,
}

#[derive(Debug, Default, Clone)]
struct SlotTables {
    constant_buffers: [Option<BufferId>; MAX_SLOTS],
    textures: [Option<TextureId>; MAX_SLOTS],
    samplers: [Option<SamplerId>; MAX_SLOTS],
}

#[derive(Debug)]
pub struct NullDevice {
    next_id: ResourceId,
    backbuffer: TextureId,
    buffers: HashMap<BufferId, NullBuffer>,
    textures: HashMap<TextureId, TextureDescriptor>,
    samplers: HashMap<SamplerId, SamplerDescriptor>,
    programs: HashMap<ProgramId, ProgramDescriptor>,
    program: Option<ProgramId>,
    stages: StageMask,
    topology: Option<PrimitiveTopology>,
    slots: [SlotTables; 3],
    targets: (Vec<RenderTarget>, Option<RenderTarget>),
    blend: BlendMode,
    in_frame: bool,
    fail_programs: Option<String>,
    calls: Vec<DeviceCall>,
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

impl NullDevice {
    /// Device whose backbuffer has the given size.
    pub fn new(width: u32, height: u32) -> Self {
        let mut device = Self {
            next_id: 1,
            backbuffer: TextureId(0),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            samplers: HashMap::new(),
            programs: HashMap::new(),
            program: None,
            stages: StageMask::empty(),
            topology: None,
            slots: Default::default(),
            targets: (Vec::new(), None),
            blend: BlendMode::Opaque,
            in_frame: false,
            fail_programs: None,
            calls: Vec::new(),
        };
        let id = TextureId(device.alloc_id());
        device.textures.insert(
            id,
            TextureDescriptor {
                label: Some("backbuffer".into()),
                size: (width, height),
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::RENDER_ATTACHMENT,
                ..Default::default()
            },
        );
        device.backbuffer = id;
        device
    }

    /// Make every following `create_program` fail with `message` (None restores success).
    pub fn fail_program_creation(&mut self, message: Option<&str>) {
        self.fail_programs = message.map(str::to_owned);
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<DeviceCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn count(&self, pred: impl Fn(&DeviceCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn draw_count(&self) -> usize {
        self.count(DeviceCall::is_draw)
    }

    pub fn buffer_contents(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.contents.as_slice())
    }

    pub fn buffer_descriptor(&self, buffer: BufferId) -> Option<&BufferDescriptor> {
        self.buffers.get(&buffer).map(|b| &b.desc)
    }

    pub fn texture_descriptor(&self, texture: TextureId) -> Option<&TextureDescriptor> {
        self.textures.get(&texture)
    }

    pub fn program_descriptor(&self, program: ProgramId) -> Option<&ProgramDescriptor> {
        self.programs.get(&program)
    }

    pub fn bound_program(&self) -> Option<ProgramId> {
        self.program
    }

    pub fn bound_texture(&self, stage: Stage, slot: u32) -> Option<TextureId> {
        self.slots[stage.index()].textures[slot as usize]
    }

    pub fn bound_constant_buffer(&self, stage: Stage, slot: u32) -> Option<BufferId> {
        self.slots[stage.index()].constant_buffers[slot as usize]
    }

    /// Buffers, textures, samplers and programs alive, backbuffer included.
    pub fn live_resource_count(&self) -> usize {
        self.buffers.len() + self.textures.len() + self.samplers.len() + self.programs.len()
    }

    fn alloc_id(&mut self) -> ResourceId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_slot(kind: &'static str, slot: u32) -> Result<usize, DeviceError> {
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

    fn check_texture(&self, texture: TextureId) -> Result<&TextureDescriptor, DeviceError> {
        self.textures.get(&texture).ok_or(DeviceError::InvalidHandle {
            kind: "texture",
            id: texture.0,
        })
    }

    fn check_target(&self, target: &RenderTarget) -> Result<(), DeviceError> {
        let desc = self.check_texture(target.texture)?;
        if !desc.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            return Err(DeviceError::Binding(format!(
                "texture {} is not a render target",
                target.texture.0
            )));
        }
        if target.mip_level >= desc.mip_level_count || target.layer >= desc.dimension.layer_count()
        {
            return Err(DeviceError::Binding(format!(
                "texture {} has no mip {} layer {}",
                target.texture.0, target.mip_level, target.layer
            )));
        }
        Ok(())
    }

    fn check_draw(&self) -> Result<ProgramId, DeviceError> {
        let program = self
            .program
            .ok_or_else(|| DeviceError::Draw("no program bound".into()))?;
        if self.topology.is_none() {
            return Err(DeviceError::Draw("no topology set".into()));
        }
        if self.targets.0.is_empty() && self.targets.1.is_none() {
            return Err(DeviceError::Draw("no render targets set".into()));
        }
        Ok(program)
    }
}

impl Device for NullDevice {
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
        let mut data = vec![0u8; desc.size as usize];
        if let Some(contents) = contents {
            if contents.len() > data.len() {
                return Err(DeviceError::CreationFailed {
                    kind: "buffer",
                    message: format!("{} initial bytes exceed size {}", contents.len(), desc.size),
                });
            }
            data[..contents.len()].copy_from_slice(contents);
        }
        let id = BufferId(self.alloc_id());
        self.buffers.insert(
            id,
            NullBuffer {
                desc: desc.clone(),
                contents: data,
            },
        );
        self.calls.push(DeviceCall::CreateBuffer {
            buffer: id,
            size: desc.size,
        });
        Ok(id)
    }

    fn update_buffer(
        &mut self,
        buffer: BufferId,
        data: &[u8],
        mode: UploadMode,
    ) -> Result<(), DeviceError> {
        let entry = self.buffers.get_mut(&buffer).ok_or(DeviceError::InvalidHandle {
            kind: "buffer",
            id: buffer.0,
        })?;
        if mode == UploadMode::Discard && entry.desc.access != BufferAccess::Dynamic {
            return Err(DeviceError::Unsupported(format!(
                "discard upload on non-dynamic buffer {}",
                buffer.0
            )));
        }
        if data.len() > entry.contents.len() {
            return Err(DeviceError::Binding(format!(
                "{} bytes written into {}-byte buffer {}",
                data.len(),
                entry.contents.len(),
                buffer.0
            )));
        }
        entry.contents[..data.len()].copy_from_slice(data);
        self.calls.push(DeviceCall::UpdateBuffer {
            buffer,
            mode,
            len: data.len(),
        });
        Ok(())
    }

    fn create_texture(
        &mut self,
        desc: &TextureDescriptor,
        contents: Option<&[u8]>,
    ) -> Result<TextureId, DeviceError> {
        if desc.size.0 == 0 || desc.size.1 == 0 || desc.mip_level_count == 0 {
            return Err(DeviceError::CreationFailed {
                kind: "texture",
                message: format!("degenerate texture {:?}", desc.label),
            });
        }
        if let Some(contents) = contents {
            let expected = desc.upload_size();
            if contents.len() as u64 != expected {
                return Err(DeviceError::CreationFailed {
                    kind: "texture",
                    message: format!("expected {} bytes, got {}", expected, contents.len()),
                });
            }
        }
        if desc.dimension == TextureDimension::Cube && desc.size.0 != desc.size.1 {
            return Err(DeviceError::CreationFailed {
                kind: "texture",
                message: "cube faces must be square".into(),
            });
        }
        let id = TextureId(self.alloc_id());
        self.textures.insert(id, desc.clone());
        self.calls.push(DeviceCall::CreateTexture {
            texture: id,
            label: desc.label.clone(),
        });
        Ok(id)
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> Result<SamplerId, DeviceError> {
        let id = SamplerId(self.alloc_id());
        self.samplers.insert(id, *desc);
        self.calls.push(DeviceCall::CreateSampler {
            sampler: id,
            desc: *desc,
        });
        Ok(id)
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> Result<ProgramId, DeviceError> {
        if let Some(message) = &self.fail_programs {
            return Err(DeviceError::ShaderCompilation {
                label: desc.label.clone(),
                message: message.clone(),
            });
        }
        if desc.stages().is_empty() {
            return Err(DeviceError::ShaderCompilation {
                label: desc.label.clone(),
                message: "program has no entry points".into(),
            });
        }
        let id = ProgramId(self.alloc_id());
        self.programs.insert(id, desc.clone());
        self.calls.push(DeviceCall::CreateProgram {
            program: id,
            label: desc.label.clone(),
        });
        Ok(id)
    }

    fn destroy(&mut self, id: ResourceId) {
        let removed = self.buffers.remove(&BufferId(id)).is_some()
            || self.textures.remove(&TextureId(id)).is_some()
            || self.samplers.remove(&SamplerId(id)).is_some()
            || self.programs.remove(&ProgramId(id)).is_some();
        if removed {
            self.calls.push(DeviceCall::Destroy(id));
        } else {
            log::warn!("NullDevice: destroy of unknown resource {}", id);
        }
    }

    fn backbuffer(&self) -> TextureId {
        self.backbuffer
    }

    fn texture_size(&self, texture: TextureId) -> Result<(u32, u32), DeviceError> {
        self.check_texture(texture).map(|d| d.size)
    }

    fn begin_frame(&mut self) -> Result<(), DeviceError> {
        if self.in_frame {
            return Err(DeviceError::Surface("begin_frame inside a frame".into()));
        }
        self.in_frame = true;
        self.calls.push(DeviceCall::BeginFrame);
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), DeviceError> {
        if !self.in_frame {
            return Err(DeviceError::Surface("end_frame without begin_frame".into()));
        }
        self.in_frame = false;
        self.calls.push(DeviceCall::EndFrame);
        Ok(())
    }

    fn set_program(
        &mut self,
        program: Option<ProgramId>,
        stages: StageMask,
    ) -> Result<(), DeviceError> {
        if let Some(id) = program {
            let desc = self.programs.get(&id).ok_or(DeviceError::InvalidHandle {
                kind: "program",
                id: id.0,
            })?;
            if !desc.stages().contains(stages) {
                return Err(DeviceError::Binding(format!(
                    "program `{}` lacks stages {:?}",
                    desc.label,
                    stages - desc.stages()
                )));
            }
        }
        self.program = program;
        self.stages = if program.is_some() {
            stages
        } else {
            StageMask::empty()
        };
        self.calls.push(DeviceCall::SetProgram { program, stages });
        Ok(())
    }

    fn set_topology(&mut self, topology: Option<PrimitiveTopology>) -> Result<(), DeviceError> {
        self.topology = topology;
        self.calls.push(DeviceCall::SetTopology(topology));
        Ok(())
    }

    fn bind_constant_buffer(
        &mut self,
        stage: Stage,
        slot: u32,
        buffer: Option<BufferId>,
    ) -> Result<(), DeviceError> {
        let index = Self::check_slot("constant buffer", slot)?;
        if let Some(id) = buffer {
            if !self.buffers.contains_key(&id) {
                return Err(DeviceError::InvalidHandle {
                    kind: "buffer",
                    id: id.0,
                });
            }
        }
        self.slots[stage.index()].constant_buffers[index] = buffer;
        self.calls.push(DeviceCall::BindConstantBuffer {
            stage,
            slot,
            buffer,
        });
        Ok(())
    }

    fn bind_texture(
        &mut self,
        stage: Stage,
        slot: u32,
        texture: Option<TextureId>,
    ) -> Result<(), DeviceError> {
        let index = Self::check_slot("texture", slot)?;
        if let Some(id) = texture {
            self.check_texture(id)?;
        }
        self.slots[stage.index()].textures[index] = texture;
        self.calls.push(DeviceCall::BindTexture {
            stage,
            slot,
            texture,
        });
        Ok(())
    }

    fn bind_sampler(
        &mut self,
        stage: Stage,
        slot: u32,
        sampler: Option<SamplerId>,
    ) -> Result<(), DeviceError> {
        let index = Self::check_slot("sampler", slot)?;
        if let Some(id) = sampler {
            if !self.samplers.contains_key(&id) {
                return Err(DeviceError::InvalidHandle {
                    kind: "sampler",
                    id: id.0,
                });
            }
        }
        self.slots[stage.index()].samplers[index] = sampler;
        self.calls.push(DeviceCall::BindSampler {
            stage,
            slot,
            sampler,
        });
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
            self.check_target(target)?;
        }
        self.targets = (colors.to_vec(), depth);
        self.calls.push(DeviceCall::SetRenderTargets {
            colors: colors.to_vec(),
            depth,
        });
        Ok(())
    }

    fn set_blend_mode(&mut self, mode: BlendMode) -> Result<(), DeviceError> {
        self.blend = mode;
        self.calls.push(DeviceCall::SetBlendMode(mode));
        Ok(())
    }

    fn clear_color(&mut self, target: RenderTarget, color: [f32; 4]) -> Result<(), DeviceError> {
        self.check_target(&target)?;
        self.calls.push(DeviceCall::ClearColor { target, color });
        Ok(())
    }

    fn clear_depth(&mut self, target: RenderTarget, depth: f32) -> Result<(), DeviceError> {
        self.check_target(&target)?;
        if !self.check_texture(target.texture)?.format.is_depth() {
            return Err(DeviceError::Binding(format!(
                "clear_depth on color texture {}",
                target.texture.0
            )));
        }
        self.calls.push(DeviceCall::ClearDepth { target, depth });
        Ok(())
    }

    fn set_vertex_buffer(
        &mut self,
        buffer: Option<BufferId>,
        stride: u32,
    ) -> Result<(), DeviceError> {
        if let Some(id) = buffer {
            if !self.buffers.contains_key(&id) {
                return Err(DeviceError::InvalidHandle {
                    kind: "buffer",
                    id: id.0,
                });
            }
        }
        self.calls.push(DeviceCall::SetVertexBuffer { buffer, stride });
        Ok(())
    }

    fn set_index_buffer(&mut self, buffer: Option<BufferId>) -> Result<(), DeviceError> {
        if let Some(id) = buffer {
            if !self.buffers.contains_key(&id) {
                return Err(DeviceError::InvalidHandle {
                    kind: "buffer",
                    id: id.0,
                });
            }
        }
        self.calls.push(DeviceCall::SetIndexBuffer(buffer));
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32) -> Result<(), DeviceError> {
        let program = self.check_draw()?;
        self.calls.push(DeviceCall::Draw {
            program,
            vertex_count,
        });
        Ok(())
    }

    fn draw_indexed(&mut self, index_count: u32) -> Result<(), DeviceError> {
        let program = self.check_draw()?;
        self.calls.push(DeviceCall::DrawIndexed {
            program,
            index_count,
        });
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
