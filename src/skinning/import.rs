//! Reads glTF 2.0 files (`.gltf` and `.glb`) into a [Scene].

use std::path::Path;

use gltf::{animation::util::ReadOutputs, buffer::Data, mesh::Mode};
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

use crate::engine::transform::Transform;

use super::{
    scene::{
        AnimationStack, Cluster, LayerElement, Material, MeshData, NO_PARENT, NodeAttribute,
        NodeCurves, NodeIndex, Scene, Skin,
    },
    track::{Interpolation, Track},
};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Could not read glTF file: {0}")]
    Gltf(#[from] gltf::Error),

    #[error("Corrupt glTF data: {0}")]
    Corrupt(String),

    #[error("Could not triangulate mesh \"{mesh}\": polygon {polygon} has {corners} corners")]
    Triangulation {
        mesh: String,
        polygon: usize,
        corners: usize,
    },
}

/// The result of an import: the scene graph and the nodes of interest in depth-first order.
#[derive(Debug)]
pub struct ImportedScene {
    pub scene: Scene,
    pub mesh_nodes: Vec<NodeIndex>,
    pub skeleton_nodes: Vec<NodeIndex>,
}

/// Import a glTF file from disk. External buffers are resolved relative to the file.
pub fn import(path: impl AsRef<Path>) -> Result<ImportedScene, ImportError> {
    let path = path.as_ref();

    let bytes = std::fs::read(path).map_err(gltf::Error::Io)?;
    let imported = import_slice(&bytes, path.parent())?;

    tracing::info!(
        "Imported {} ({} nodes, {} meshes, {} animation stacks).",
        path.display(),
        imported.scene.nodes.len(),
        imported.mesh_nodes.len(),
        imported.scene.animation_stacks.len(),
    );

    Ok(imported)
}

/// Import a `.glb` or `.gltf` from memory. External buffers are resolved relative to `base`;
/// without one only embedded buffers can be read.
pub fn import_slice(bytes: &[u8], base: Option<&Path>) -> Result<ImportedScene, ImportError> {
    let gltf::Gltf { document, blob } = gltf::Gltf::from_slice(bytes)?;
    let buffers = gltf::import_buffers(&document, base, blob)?;

    Importer::new(&document, &buffers).import()
}

struct Importer<'a> {
    document: &'a gltf::Document,
    buffers: &'a [Data],
    scene: Scene,
    /// Scene node for every glTF node that is part of the scene.
    node_map: Vec<Option<NodeIndex>>,
    /// Scene material used by primitives without a material.
    default_material: Option<usize>,
}

impl<'a> Importer<'a> {
    fn new(document: &'a gltf::Document, buffers: &'a [Data]) -> Self {
        Self {
            document,
            buffers,
            scene: Scene::default(),
            node_map: vec![None; document.nodes().count()],
            default_material: None,
        }
    }

    fn import(mut self) -> Result<ImportedScene, ImportError> {
        self.import_materials();
        let nodes = self.import_nodes();

        let bind_globals = self.scene.bind_globals();
        for (node, index) in nodes.iter() {
            let Some(mesh) = node.mesh() else {
                continue;
            };
            let mesh_data = self.import_mesh(node, &mesh, bind_globals[*index as usize])?;
            let mesh_index = self.scene.meshes.len();
            self.scene.meshes.push(mesh_data);
            self.scene.nodes[*index as usize].attribute = NodeAttribute::Mesh(mesh_index);
        }

        for skin in self.document.skins() {
            for joint in skin.joints() {
                if let Some(index) = self.node_map[joint.index()] {
                    let node = &mut self.scene.nodes[index as usize];
                    if node.attribute == NodeAttribute::None {
                        node.attribute = NodeAttribute::Skeleton;
                    }
                }
            }
        }

        for animation in self.document.animations() {
            let stack = self.import_animation(&animation)?;
            self.scene.animation_stacks.push(stack);
        }

        for mesh in self.scene.meshes.iter_mut() {
            mesh.triangulate()
                .map_err(|err| ImportError::Triangulation {
                    mesh: mesh.name.clone(),
                    polygon: err.polygon,
                    corners: err.corners,
                })?;
        }

        let mut mesh_nodes = Vec::default();
        let mut skeleton_nodes = Vec::default();
        for index in self.scene.traverse() {
            match self.scene.nodes[index as usize].attribute {
                NodeAttribute::Mesh(_) => mesh_nodes.push(index),
                NodeAttribute::Skeleton => skeleton_nodes.push(index),
                NodeAttribute::None => {}
            }
        }

        Ok(ImportedScene {
            scene: self.scene,
            mesh_nodes,
            skeleton_nodes,
        })
    }

    fn import_materials(&mut self) {
        for material in self.document.materials() {
            let pbr = material.pbr_metallic_roughness();
            self.scene.materials.push(Material {
                name: material
                    .name()
                    .map(String::from)
                    .unwrap_or_else(|| format!("material{}", material.index().unwrap_or(0))),
                diffuse: Vec4::from(pbr.base_color_factor()),
                diffuse_texture: pbr
                    .base_color_texture()
                    .and_then(|info| texture_reference(&info.texture())),
                normal_texture: material
                    .normal_texture()
                    .and_then(|normal| texture_reference(&normal.texture())),
                specular_texture: None,
            });
        }
    }

    /// Add the nodes of the default scene in depth-first order, parents before children.
    fn import_nodes(&mut self) -> Vec<(gltf::Node<'a>, NodeIndex)> {
        let roots: Vec<gltf::Node<'a>> = match self
            .document
            .default_scene()
            .or_else(|| self.document.scenes().next())
        {
            Some(scene) => scene.nodes().collect(),
            None => {
                let mut is_child = vec![false; self.document.nodes().count()];
                for node in self.document.nodes() {
                    for child in node.children() {
                        is_child[child.index()] = true;
                    }
                }
                self.document
                    .nodes()
                    .filter(|node| !is_child[node.index()])
                    .collect()
            }
        };

        let mut nodes = Vec::with_capacity(self.node_map.len());
        let mut stack: Vec<(gltf::Node<'a>, NodeIndex)> =
            roots.into_iter().rev().map(|node| (node, NO_PARENT)).collect();

        while let Some((node, parent)) = stack.pop() {
            if self.node_map[node.index()].is_some() {
                tracing::warn!("Node {} is referenced more than once.", node.index());
                continue;
            }

            let (translation, rotation, scale) = node.transform().decomposed();
            let index = self.scene.add_node(
                node_name(&node),
                parent,
                Transform::new(
                    Vec3::from(translation),
                    Quat::from_array(rotation),
                    Vec3::from(scale),
                ),
                NodeAttribute::None,
            );
            self.node_map[node.index()] = Some(index);

            let children: Vec<_> = node.children().collect();
            stack.extend(children.into_iter().rev().map(|child| (child, index)));

            nodes.push((node, index));
        }

        nodes
    }

    fn material_slot(&mut self, mesh: &mut MeshData, material: &gltf::Material) -> usize {
        let scene_material = match material.index() {
            Some(index) => index,
            None => *self.default_material.get_or_insert_with(|| {
                self.scene.materials.push(Material::default());
                self.scene.materials.len() - 1
            }),
        };

        match mesh.material_slots.iter().position(|&m| m == scene_material) {
            Some(slot) => slot,
            None => {
                mesh.material_slots.push(scene_material);
                mesh.material_slots.len() - 1
            }
        }
    }

    fn import_mesh(
        &mut self,
        node: &gltf::Node,
        mesh: &gltf::Mesh,
        mesh_global: Mat4,
    ) -> Result<MeshData, ImportError> {
        let name = mesh
            .name()
            .map(String::from)
            .unwrap_or_else(|| node_name(node));

        let buffers = self.buffers;
        let mut data = MeshData {
            name: name.clone(),
            ..Default::default()
        };

        let mut normals = Vec::new();
        let mut uvs = Vec::new();
        let mut tangents = Vec::new();
        let mut has_normals = false;
        let mut has_uvs = false;
        let mut has_tangents = false;

        // Per joint: control points and weights.
        let mut joint_weights: Vec<(Vec<u32>, Vec<f32>)> = Vec::new();

        for primitive in mesh.primitives() {
            let reader = primitive.reader(|buffer| {
                buffers
                    .get(buffer.index())
                    .map(|data| data.0.as_slice())
            });

            let positions: Vec<Vec3> = reader
                .read_positions()
                .ok_or_else(|| {
                    ImportError::Corrupt(format!(
                        "Mesh \"{name}\" has a primitive without positions"
                    ))
                })?
                .map(Vec3::from)
                .collect();
            let vertex_count = positions.len();
            let base = data.control_points.len() as u32;

            data.control_points.extend(positions);
            if u32::try_from(data.control_points.len()).is_err() {
                return Err(ImportError::Corrupt(format!(
                    "Mesh \"{name}\" has more vertices than can be indexed"
                )));
            }

            match reader.read_normals() {
                Some(iter) => {
                    has_normals = true;
                    normals.extend(iter.map(Vec3::from));
                }
                None => normals.extend(std::iter::repeat_n(Vec3::ZERO, vertex_count)),
            }
            match reader.read_tex_coords(0) {
                Some(iter) => {
                    has_uvs = true;
                    uvs.extend(iter.into_f32().map(Vec2::from));
                }
                None => uvs.extend(std::iter::repeat_n(Vec2::ZERO, vertex_count)),
            }
            let primitive_tangents: Option<Vec<Vec3>> = reader
                .read_tangents()
                .map(|iter| iter.map(|t| Vec3::new(t[0], t[1], t[2])).collect());
            has_tangents |= primitive_tangents.is_some();

            let mut set = 0;
            while let (Some(joints), Some(weights)) =
                (reader.read_joints(set), reader.read_weights(set))
            {
                for (vertex, (joints, weights)) in
                    joints.into_u16().zip(weights.into_f32()).enumerate()
                {
                    for (&joint, &weight) in joints.iter().zip(weights.iter()) {
                        if weight == 0.0 {
                            continue;
                        }
                        let joint = joint as usize;
                        if joint >= joint_weights.len() {
                            joint_weights.resize_with(joint + 1, Default::default);
                        }
                        joint_weights[joint].0.push(base + vertex as u32);
                        joint_weights[joint].1.push(weight);
                    }
                }
                set += 1;
            }

            let indices: Vec<u32> = match reader.read_indices() {
                Some(indices) => indices
                    .into_u32()
                    .map(|i| {
                        if (i as usize) < vertex_count {
                            Ok(base + i)
                        } else {
                            Err(ImportError::Corrupt(format!(
                                "Mesh \"{name}\" has index {i} past its {vertex_count} vertices"
                            )))
                        }
                    })
                    .collect::<Result<_, _>>()?,
                None => (base..base + vertex_count as u32).collect(),
            };

            let first_polygon = data.polygons.len();
            match primitive.mode() {
                Mode::Triangles => {
                    data.polygons
                        .extend(indices.chunks_exact(3).map(|t| t.to_vec()));
                }
                Mode::TriangleStrip => {
                    data.polygons.extend(indices.windows(3).enumerate().map(|(i, w)| {
                        if i % 2 == 0 {
                            vec![w[0], w[1], w[2]]
                        } else {
                            vec![w[1], w[0], w[2]]
                        }
                    }));
                }
                Mode::TriangleFan => data.polygons.push(indices),
                mode => {
                    return Err(ImportError::Triangulation {
                        mesh: name,
                        polygon: first_polygon,
                        corners: match mode {
                            Mode::Points => 1,
                            _ => 2,
                        },
                    });
                }
            }

            let slot = self.material_slot(&mut data, &primitive.material());
            let polygon_count = data.polygons.len() - first_polygon;
            data.polygon_materials
                .extend(std::iter::repeat_n(slot, polygon_count));

            // Tangents are stored per polygon vertex.
            let primitive_tangents = primitive_tangents.unwrap_or_default();
            for polygon in &data.polygons[first_polygon..] {
                tangents.extend(polygon.iter().map(|&cp| {
                    primitive_tangents
                        .get((cp - base) as usize)
                        .copied()
                        .unwrap_or(Vec3::ZERO)
                }));
            }
        }

        if has_normals {
            data.normals = Some(LayerElement::by_control_point(normals));
        }
        if has_uvs {
            data.uvs = Some(LayerElement::by_control_point(uvs));
        }
        if has_tangents {
            data.tangents = Some(LayerElement::by_polygon_vertex(tangents));
        }

        match node.skin() {
            Some(skin) => {
                data.skins.push(self.import_skin(&skin, joint_weights, mesh_global)?);
            }
            None if !joint_weights.is_empty() => {
                tracing::warn!("Mesh \"{name}\" has joint weights but its node has no skin.");
            }
            None => {}
        }

        Ok(data)
    }

    fn import_skin(
        &self,
        skin: &gltf::Skin,
        mut joint_weights: Vec<(Vec<u32>, Vec<f32>)>,
        mesh_global: Mat4,
    ) -> Result<Skin, ImportError> {
        let reader = skin.reader(|buffer| {
            self.buffers
                .get(buffer.index())
                .map(|data| data.0.as_slice())
        });
        let inverse_bind_matrices: Vec<Mat4> = reader
            .read_inverse_bind_matrices()
            .map(|iter| iter.map(|m| Mat4::from_cols_array_2d(&m)).collect())
            .unwrap_or_default();

        let joint_count = skin.joints().count();
        if joint_weights.len() > joint_count {
            return Err(ImportError::Corrupt(format!(
                "Vertices reference joint {} but the skin has {} joints",
                joint_weights.len() - 1,
                joint_count
            )));
        }
        joint_weights.resize_with(joint_count, Default::default);

        let mut clusters = Vec::with_capacity(joint_count);
        for ((i, joint), (control_points, weights)) in
            skin.joints().enumerate().zip(joint_weights)
        {
            let link = self.node_map[joint.index()].ok_or_else(|| {
                ImportError::Corrupt(format!("Joint {} is not part of the scene", joint.index()))
            })?;

            let inverse_bind = inverse_bind_matrices
                .get(i)
                .copied()
                .unwrap_or(Mat4::IDENTITY);

            clusters.push(Cluster {
                link,
                control_points,
                weights,
                transform: mesh_global,
                transform_link: mesh_global * inverse_bind.inverse(),
            });
        }

        Ok(Skin { clusters })
    }

    fn import_animation(&self, animation: &gltf::Animation) -> Result<AnimationStack, ImportError> {
        let mut stack = AnimationStack {
            name: animation
                .name()
                .map(String::from)
                .unwrap_or_else(|| format!("animation{}", animation.index())),
            ..Default::default()
        };

        for channel in animation.channels() {
            let target = channel.target().node();
            let Some(node) = self.node_map[target.index()] else {
                tracing::warn!(
                    "Animation \"{}\" targets node {} outside the scene.",
                    stack.name,
                    target.index()
                );
                continue;
            };

            let (interpolation, stride) = match channel.sampler().interpolation() {
                gltf::animation::Interpolation::Step => (Interpolation::Step, 1),
                gltf::animation::Interpolation::Linear => (Interpolation::Linear, 1),
                // Only the key values are used, tangents are dropped.
                gltf::animation::Interpolation::CubicSpline => (Interpolation::Linear, 3),
            };
            let skip = stride / 2;

            let reader = channel.reader(|buffer| {
                self.buffers
                    .get(buffer.index())
                    .map(|data| data.0.as_slice())
            });

            let times: Vec<f32> = reader
                .read_inputs()
                .ok_or_else(|| {
                    ImportError::Corrupt(format!(
                        "Animation \"{}\" has a channel without key times",
                        stack.name
                    ))
                })?
                .collect();

            let Some(outputs) = reader.read_outputs() else {
                return Err(ImportError::Corrupt(format!(
                    "Animation \"{}\" has a channel without key values",
                    stack.name
                )));
            };

            let curves: &mut NodeCurves = stack.curves.entry(node).or_default();
            match outputs {
                ReadOutputs::Translations(values) => {
                    curves.translation = Track::from_keys(
                        interpolation,
                        times.iter().copied(),
                        values.skip(skip).step_by(stride).map(Vec3::from),
                    );
                }
                ReadOutputs::Rotations(values) => {
                    curves.rotation = Track::from_keys(
                        interpolation,
                        times.iter().copied(),
                        values
                            .into_f32()
                            .skip(skip)
                            .step_by(stride)
                            .map(|q| Quat::from_array(q).normalize()),
                    );
                }
                ReadOutputs::Scales(values) => {
                    curves.scale = Track::from_keys(
                        interpolation,
                        times.iter().copied(),
                        values.skip(skip).step_by(stride).map(Vec3::from),
                    );
                }
                ReadOutputs::MorphTargetWeights(_) => {}
            }
        }

        stack.curves.retain(|_, curves| !curves.is_empty());

        let range = stack
            .curves
            .values()
            .filter_map(NodeCurves::time_range)
            .reduce(|(a0, a1), (b0, b1)| (a0.min(b0), a1.max(b1)));
        if let Some((start, end)) = range {
            stack.start = start;
            stack.end = end;
        }

        tracing::debug!(
            "Animation \"{}\": {} animated nodes, {:.3}s to {:.3}s.",
            stack.name,
            stack.curves.len(),
            stack.start,
            stack.end
        );

        Ok(stack)
    }
}

fn node_name(node: &gltf::Node) -> String {
    node.name()
        .map(String::from)
        .unwrap_or_else(|| format!("node{}", node.index()))
}

fn texture_reference(texture: &gltf::Texture) -> Option<String> {
    let image = texture.source();
    match image.source() {
        gltf::image::Source::Uri { uri, .. } => Some(String::from(uri)),
        gltf::image::Source::View { .. } => image.name().map(String::from),
    }
}
