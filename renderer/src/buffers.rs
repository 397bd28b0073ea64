pub use wgpu::BufferUsages;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct BufferId(pub generational_arena::Index);

#[derive(Clone, Debug)]
pub struct BufferDescriptor {
    pub label: String,
    pub size: u64,
    pub usages: BufferUsages,
}

impl BufferDescriptor {
    pub fn vertex(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            size: 0,
            usages: BufferUsages::VERTEX,
        }
    }

    pub fn index(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            size: 0,
            usages: BufferUsages::INDEX,
        }
    }

    /// A uniform buffer large enough to hold one `T`.
    pub fn uniform<T: bytemuck::NoUninit>(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            size: std::mem::size_of::<T>() as u64,
            usages: BufferUsages::UNIFORM,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("Buffer handle does not exist")]
    Missing,

    #[error("Write of {requested} bytes does not fit in buffer \"{label}\" ({size} bytes)")]
    Overflow {
        label: String,
        size: u64,
        requested: u64,
    },
}
