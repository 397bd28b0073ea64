use glam::{Vec2, Vec3};
use renderer::{AsVertexLayout, VertexAttribute, VertexBufferLayout, VertexFormat};

use super::{
    influences::BoneInfluence,
    scene::{Mapping, MeshData},
};

/// Bone influences kept per vertex. Extra influences on a control point are dropped.
pub const MAX_BONE_INFLUENCES: usize = 4;

/// Every vertex is addressed by a `u16` index.
pub const MAX_VERTICES: usize = u16::MAX as usize + 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::NoUninit)]
#[repr(C)]
pub struct SkinnedVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tex_coord: Vec2,
    pub tangent: Vec3,
    pub bone_indices: [u32; MAX_BONE_INFLUENCES],
    pub bone_weights: [f32; MAX_BONE_INFLUENCES],
}

impl AsVertexLayout for SkinnedVertex {
    fn vertex_buffer_layout() -> VertexBufferLayout {
        const ATTRIBUTES: &[VertexAttribute] = &[
            VertexAttribute {
                format: VertexFormat::Float32x3,
                offset: 0,
                shader_location: 0,
            },
            VertexAttribute {
                format: VertexFormat::Float32x3,
                offset: 12,
                shader_location: 1,
            },
            VertexAttribute {
                format: VertexFormat::Float32x2,
                offset: 24,
                shader_location: 2,
            },
            VertexAttribute {
                format: VertexFormat::Float32x3,
                offset: 32,
                shader_location: 3,
            },
            VertexAttribute {
                format: VertexFormat::Uint32x4,
                offset: 44,
                shader_location: 4,
            },
            VertexAttribute {
                format: VertexFormat::Float32x4,
                offset: 60,
                shader_location: 5,
            },
        ];

        VertexBufferLayout {
            array_stride: std::mem::size_of::<SkinnedVertex>() as u64,
            attributes: ATTRIBUTES,
        }
    }
}

/// A contiguous range of the index buffer drawn with one material.
#[derive(Clone, Debug, PartialEq)]
pub struct Subset {
    pub name: String,
    pub material_slot: usize,
    pub index_start: u32,
    pub index_count: u32,
}

#[derive(Clone, Debug, Default)]
pub struct AssembledMesh {
    pub vertices: Vec<SkinnedVertex>,
    pub indices: Vec<u16>,
    pub subsets: Vec<Subset>,
}

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("Mesh \"{mesh}\" needs {vertices} vertices, more than 65536")]
    VertexBudgetExceeded { mesh: String, vertices: usize },

    #[error("Mesh \"{mesh}\": polygon {polygon} has {corners} corners")]
    NotTriangulated {
        mesh: String,
        polygon: usize,
        corners: usize,
    },

    #[error("Mesh \"{mesh}\": polygon {polygon} uses material slot {slot} of {slot_count}")]
    MaterialSlotOutOfRange {
        mesh: String,
        polygon: usize,
        slot: usize,
        slot_count: usize,
    },

    #[error("Mesh \"{mesh}\": polygon {polygon} references missing control point {control_point}")]
    ControlPointOutOfRange {
        mesh: String,
        polygon: usize,
        control_point: u32,
    },

    #[error("Mesh \"{mesh}\" has {control_points} control points but {influences} influence lists")]
    InfluenceTableMismatch {
        mesh: String,
        control_points: usize,
        influences: usize,
    },
}

/// Flatten a triangulated mesh into one vertex per polygon corner, grouped into one subset per
/// material slot.
pub fn assemble(
    mesh: &MeshData,
    influences: &[Vec<BoneInfluence>],
) -> Result<AssembledMesh, AssembleError> {
    if influences.len() != mesh.control_points.len() {
        return Err(AssembleError::InfluenceTableMismatch {
            mesh: mesh.name.clone(),
            control_points: mesh.control_points.len(),
            influences: influences.len(),
        });
    }

    if let Some((polygon, p)) = mesh.polygons.iter().enumerate().find(|(_, p)| p.len() != 3) {
        return Err(AssembleError::NotTriangulated {
            mesh: mesh.name.clone(),
            polygon,
            corners: p.len(),
        });
    }

    let vertex_count = mesh.polygons.len() * 3;
    if vertex_count > MAX_VERTICES {
        return Err(AssembleError::VertexBudgetExceeded {
            mesh: mesh.name.clone(),
            vertices: vertex_count,
        });
    }

    // Without materials everything lands in a single subset.
    let slot_count = mesh.material_slots.len().max(1);
    let slot_of = |polygon: usize| -> Result<usize, AssembleError> {
        if mesh.material_slots.is_empty() {
            return Ok(0);
        }
        let slot = mesh.polygon_materials.get(polygon).copied().unwrap_or(0);
        if slot >= slot_count {
            return Err(AssembleError::MaterialSlotOutOfRange {
                mesh: mesh.name.clone(),
                polygon,
                slot,
                slot_count,
            });
        }
        Ok(slot)
    };

    let mut subsets: Vec<Subset> = (0..slot_count)
        .map(|slot| Subset {
            name: format!("{}{}", mesh.name, slot),
            material_slot: slot,
            index_start: 0,
            index_count: 0,
        })
        .collect();

    // Pass 1: size every subset, then turn the sizes into start offsets.
    for polygon in 0..mesh.polygons.len() {
        subsets[slot_of(polygon)?].index_count += 3;
    }
    let mut start = 0;
    for subset in subsets.iter_mut() {
        subset.index_start = start;
        start += subset.index_count;
        subset.index_count = 0;
    }

    // Pass 2: emit vertices and fill each subset's range.
    let mut vertices = Vec::with_capacity(vertex_count);
    let mut indices = vec![0_u16; vertex_count];
    let mut polygon_vertex = 0;

    for (polygon_index, polygon) in mesh.polygons.iter().enumerate() {
        let subset = &mut subsets[slot_of(polygon_index)?];

        for &control_point in polygon {
            let Some(&position) = mesh.control_points.get(control_point as usize) else {
                return Err(AssembleError::ControlPointOutOfRange {
                    mesh: mesh.name.clone(),
                    polygon: polygon_index,
                    control_point,
                });
            };

            let mut vertex = SkinnedVertex {
                position,
                normal: mesh
                    .normals
                    .as_ref()
                    .and_then(|layer| layer.get(control_point, polygon_vertex))
                    .unwrap_or(Vec3::ZERO),
                tex_coord: mesh
                    .uvs
                    .as_ref()
                    .and_then(|layer| layer.get(control_point, polygon_vertex))
                    .unwrap_or(Vec2::ZERO),
                tangent: mesh
                    .tangents
                    .as_ref()
                    .filter(|layer| layer.mapping == Mapping::ByPolygonVertex)
                    .and_then(|layer| layer.get(control_point, polygon_vertex))
                    .unwrap_or(Vec3::ZERO),
                ..Default::default()
            };

            for (i, influence) in influences[control_point as usize]
                .iter()
                .take(MAX_BONE_INFLUENCES)
                .enumerate()
            {
                vertex.bone_indices[i] = influence.bone_index;
                vertex.bone_weights[i] = influence.weight;
            }

            indices[(subset.index_start + subset.index_count) as usize] = vertices.len() as u16;
            subset.index_count += 1;
            vertices.push(vertex);

            polygon_vertex += 1;
        }
    }

    Ok(AssembledMesh {
        vertices,
        indices,
        subsets,
    })
}
