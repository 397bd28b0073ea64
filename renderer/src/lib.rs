//! A wrapper around `wgpu` primitives used to feed skinned draws: vertex and index buffers that are
//! uploaded once, and bone matrix buffers that are overwritten every frame.

mod buffers;
mod vertex_layouts;

pub use buffers::*;
pub use vertex_layouts::*;

use generational_arena::Arena;
use wgpu::util::DeviceExt;

pub struct Renderer {
    device: wgpu::Device,
    queue: wgpu::Queue,

    buffers: Arena<BufferEntry>,
}

impl Renderer {
    /// Creates a new renderer wrapper around a `wgpu` device and queue.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            buffers: Arena::default(),
        }
    }

    /// Creates a tracked buffer filled with `contents` and returns its handle.
    pub fn create_buffer_init(
        &mut self,
        descriptor: BufferDescriptor,
        contents: &[u8],
    ) -> BufferId {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&descriptor.label),
                contents,
                usage: descriptor.usages | BufferUsages::COPY_DST,
            });

        tracing::debug!(
            "Created buffer \"{}\" ({} bytes).",
            descriptor.label,
            contents.len()
        );

        BufferId(self.buffers.insert(BufferEntry {
            descriptor: BufferDescriptor {
                size: contents.len() as u64,
                ..descriptor
            },
            buffer,
        }))
    }

    /// Queue a write of `data` to the start of the buffer. The write is visible to every command
    /// buffer submitted after this call.
    pub fn write_buffer(&self, id: BufferId, data: &[u8]) -> Result<(), BufferError> {
        let entry = self.buffers.get(id.0).ok_or(BufferError::Missing)?;

        if data.len() as u64 > entry.descriptor.size {
            return Err(BufferError::Overflow {
                label: entry.descriptor.label.clone(),
                size: entry.descriptor.size,
                requested: data.len() as u64,
            });
        }

        self.queue.write_buffer(&entry.buffer, 0, data);

        Ok(())
    }

    pub fn descriptor(&self, id: BufferId) -> Option<&BufferDescriptor> {
        self.buffers.get(id.0).map(|entry| &entry.descriptor)
    }

    /// Submit all queued writes.
    pub fn flush(&self) {
        self.queue.submit(std::iter::empty());
    }
}

struct BufferEntry {
    descriptor: BufferDescriptor,
    buffer: wgpu::Buffer,
}
