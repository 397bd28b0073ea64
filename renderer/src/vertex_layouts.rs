/// Describes how one vertex buffer is laid out.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub attributes: &'static [VertexAttribute],
}

impl VertexBufferLayout {
    /// The end of the last attribute. Equal to `array_stride` for tightly packed vertices.
    pub fn packed_size(&self) -> u64 {
        self.attributes
            .iter()
            .map(|attribute| attribute.offset + attribute.format.size())
            .max()
            .unwrap_or(0)
    }
}

/// Implemented by vertex types that can be uploaded into a vertex buffer.
pub trait AsVertexLayout {
    fn vertex_buffer_layout() -> VertexBufferLayout;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VertexAttribute {
    pub format: VertexFormat,
    pub offset: u64,
    pub shader_location: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32x4,
}

impl VertexFormat {
    /// Size of the attribute in bytes.
    pub fn size(self) -> u64 {
        match self {
            Self::Float32x2 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 | Self::Uint32x4 => 16,
        }
    }
}
