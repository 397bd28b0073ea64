//! Headless GPU access and the upload contracts for skinned meshes.

use renderer::{AsVertexLayout, BufferDescriptor, BufferError, BufferId, Renderer};

use crate::skinning::{assemble::SkinnedVertex, model::SkinnedModel, playback::BonePalette};

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable graphics adapter found")]
    NoAdapter,

    #[error("Could not request device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Create a [Renderer] without a surface.
pub fn create_headless() -> Result<Renderer, GpuError> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        force_fallback_adapter: false,
        compatible_surface: None,
    }))
    .ok_or(GpuError::NoAdapter)?;

    tracing::info!("Using adapter: {}", adapter.get_info().name);

    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("skinning_device"),
            ..Default::default()
        },
        None,
    ))?;

    Ok(Renderer::new(device, queue))
}

/// GPU handles for one skinned mesh.
#[derive(Debug)]
pub struct GpuSkinnedMesh {
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    /// One [BonePalette], rewritten every tick.
    pub bone_buffer: BufferId,
}

impl GpuSkinnedMesh {
    /// Bytes held by the mesh's buffers.
    pub fn size(&self, renderer: &Renderer) -> u64 {
        [self.vertex_buffer, self.index_buffer, self.bone_buffer]
            .into_iter()
            .filter_map(|id| renderer.descriptor(id))
            .map(|descriptor| descriptor.size)
            .sum()
    }
}

/// Upload vertices and indices once and create a bone buffer for every mesh.
pub fn upload_model(renderer: &mut Renderer, model: &SkinnedModel) -> Vec<GpuSkinnedMesh> {
    let layout = SkinnedVertex::vertex_buffer_layout();
    debug_assert_eq!(layout.array_stride, layout.packed_size());

    model
        .meshes
        .iter()
        .zip(model.palettes.iter())
        .map(|(mesh, palette)| {
            let vertex_buffer = renderer.create_buffer_init(
                BufferDescriptor::vertex(format!("{}_vertex_buffer", mesh.name)),
                bytemuck::cast_slice(&mesh.assembled.vertices),
            );

            // Index buffers must be a multiple of 4 bytes.
            let mut indices = mesh.assembled.indices.clone();
            if indices.len() % 2 == 1 {
                indices.push(0);
            }
            let index_buffer = renderer.create_buffer_init(
                BufferDescriptor::index(format!("{}_index_buffer", mesh.name)),
                bytemuck::cast_slice(&indices),
            );

            let bone_buffer = renderer.create_buffer_init(
                BufferDescriptor::uniform::<BonePalette>(format!("{}_bone_buffer", mesh.name)),
                palette.as_bytes(),
            );

            GpuSkinnedMesh {
                vertex_buffer,
                index_buffer,
                bone_buffer,
            }
        })
        .collect()
}

/// Queue this tick's bone palettes. Must run before the tick's draws are submitted.
pub fn write_palettes(
    renderer: &Renderer,
    model: &SkinnedModel,
    meshes: &[GpuSkinnedMesh],
) -> Result<(), GpuError> {
    for (gpu_mesh, palette) in meshes.iter().zip(model.palettes.iter()) {
        renderer.write_buffer(gpu_mesh.bone_buffer, palette.as_bytes())?;
    }
    renderer.flush();
    Ok(())
}
