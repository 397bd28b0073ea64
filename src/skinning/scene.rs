//! In-memory scene graph produced by the importer.
//!
//! The graph is independent of the file format it was read from. Meshes store their geometry as
//! control points and polygons, with per-vertex attributes held in [LayerElement]s that can map
//! either by control point or by polygon vertex (the running corner counter over all polygons).

use ahash::HashMap;
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

use crate::engine::transform::Transform;

use super::track::Track;

pub type NodeIndex = u32;

/// Parent of root nodes.
pub const NO_PARENT: NodeIndex = u32::MAX;

type NameLookup = HashMap<String, NodeIndex>;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum NodeAttribute {
    #[default]
    None,
    /// Index into [Scene::meshes].
    Mesh(usize),
    Skeleton,
}

#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    /// An index to the node's parent, or [NO_PARENT].
    pub parent: NodeIndex,
    pub children: Vec<NodeIndex>,
    /// Local rest transform.
    pub transform: Transform,
    pub attribute: NodeAttribute,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mapping {
    ByControlPoint,
    ByPolygonVertex,
}

/// Per-vertex attribute data. When `index` is present the element is in index-to-direct mode and
/// the mapped position is looked up in `index` before reading `direct`.
#[derive(Clone, Debug)]
pub struct LayerElement<T> {
    pub mapping: Mapping,
    pub direct: Vec<T>,
    pub index: Option<Vec<u32>>,
}

impl<T: Copy> LayerElement<T> {
    pub fn by_control_point(direct: Vec<T>) -> Self {
        Self {
            mapping: Mapping::ByControlPoint,
            direct,
            index: None,
        }
    }

    pub fn by_polygon_vertex(direct: Vec<T>) -> Self {
        Self {
            mapping: Mapping::ByPolygonVertex,
            direct,
            index: None,
        }
    }

    /// Resolve the value for a corner that references `control_point` and has the running
    /// `polygon_vertex` counter.
    pub fn get(&self, control_point: u32, polygon_vertex: usize) -> Option<T> {
        let mapped = match self.mapping {
            Mapping::ByControlPoint => control_point as usize,
            Mapping::ByPolygonVertex => polygon_vertex,
        };
        let direct = match self.index {
            Some(ref index) => *index.get(mapped)? as usize,
            None => mapped,
        };
        self.direct.get(direct).copied()
    }

    /// Reorder polygon vertex data after triangulation. `corners` lists, for every new polygon
    /// vertex, the polygon vertex it was copied from.
    fn remap(&mut self, corners: &[usize]) {
        if self.mapping != Mapping::ByPolygonVertex {
            return;
        }

        match self.index {
            Some(ref mut index) => {
                let remapped = corners
                    .iter()
                    .map(|&c| index.get(c).copied().unwrap_or(u32::MAX))
                    .collect();
                *index = remapped;
            }
            None => {
                // Corners that had no data stay missing after the remap.
                let mut index = Vec::with_capacity(corners.len());
                for &c in corners {
                    index.push(if c < self.direct.len() {
                        c as u32
                    } else {
                        u32::MAX
                    });
                }
                self.index = Some(index);
            }
        }
    }
}

/// One bone's influence on a set of control points.
#[derive(Clone, Debug)]
pub struct Cluster {
    /// The bone node driving this cluster.
    pub link: NodeIndex,
    pub control_points: Vec<u32>,
    pub weights: Vec<f32>,
    /// Global transform of the mesh node at bind time.
    pub transform: Mat4,
    /// Global transform of the bone at bind time.
    pub transform_link: Mat4,
}

/// A skin deformer.
#[derive(Clone, Debug, Default)]
pub struct Skin {
    pub clusters: Vec<Cluster>,
}

#[derive(Clone, Debug)]
pub struct Material {
    pub name: String,
    pub diffuse: Vec4,
    pub diffuse_texture: Option<String>,
    pub normal_texture: Option<String>,
    pub specular_texture: Option<String>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::from("default"),
            diffuse: Vec4::ONE,
            diffuse_texture: None,
            normal_texture: None,
            specular_texture: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub name: String,
    pub control_points: Vec<Vec3>,
    pub polygons: Vec<Vec<u32>>,
    /// Material slot for every polygon.
    pub polygon_materials: Vec<usize>,
    /// Material slots, each an index into [Scene::materials].
    pub material_slots: Vec<usize>,
    pub normals: Option<LayerElement<Vec3>>,
    pub uvs: Option<LayerElement<Vec2>>,
    pub tangents: Option<LayerElement<Vec3>>,
    pub skins: Vec<Skin>,
}

#[derive(Debug, thiserror::Error)]
#[error("Polygon {polygon} has {corners} corners")]
pub struct DegeneratePolygon {
    pub polygon: usize,
    pub corners: usize,
}

impl MeshData {
    #[inline]
    pub fn polygon_vertex_count(&self) -> usize {
        self.polygons.iter().map(Vec::len).sum()
    }

    #[inline]
    pub fn is_triangulated(&self) -> bool {
        self.polygons.iter().all(|p| p.len() == 3)
    }

    /// Split every polygon with more than 3 corners into a fan of triangles around its first
    /// corner. Polygon vertex layers and per-polygon materials follow the split.
    pub fn triangulate(&mut self) -> Result<(), DegeneratePolygon> {
        if let Some((polygon, p)) = self.polygons.iter().enumerate().find(|(_, p)| p.len() < 3) {
            return Err(DegeneratePolygon {
                polygon,
                corners: p.len(),
            });
        }

        if self.is_triangulated() {
            return Ok(());
        }

        let mut polygons = Vec::with_capacity(self.polygons.len());
        let mut polygon_materials = Vec::with_capacity(self.polygons.len());
        let mut corners = Vec::with_capacity(self.polygon_vertex_count());

        let mut first_corner = 0;
        for (polygon_index, polygon) in self.polygons.iter().enumerate() {
            let material = self
                .polygon_materials
                .get(polygon_index)
                .copied()
                .unwrap_or(0);

            for i in 1..polygon.len() - 1 {
                polygons.push(vec![polygon[0], polygon[i], polygon[i + 1]]);
                polygon_materials.push(material);
                corners.extend([first_corner, first_corner + i, first_corner + i + 1]);
            }

            first_corner += polygon.len();
        }

        if let Some(ref mut normals) = self.normals {
            normals.remap(&corners);
        }
        if let Some(ref mut uvs) = self.uvs {
            uvs.remap(&corners);
        }
        if let Some(ref mut tangents) = self.tangents {
            tangents.remap(&corners);
        }

        self.polygons = polygons;
        self.polygon_materials = polygon_materials;

        Ok(())
    }
}

/// Animation curves for a single node. Empty tracks leave the rest value in place.
#[derive(Clone, Debug, Default)]
pub struct NodeCurves {
    pub translation: Track<Vec3>,
    pub rotation: Track<Quat>,
    pub scale: Track<Vec3>,
}

impl NodeCurves {
    pub fn is_empty(&self) -> bool {
        self.translation.is_empty() && self.rotation.is_empty() && self.scale.is_empty()
    }

    /// Times of the earliest and the latest key over all tracks.
    pub fn time_range(&self) -> Option<(f32, f32)> {
        let start = [
            self.translation.first_time(),
            self.rotation.first_time(),
            self.scale.first_time(),
        ]
        .into_iter()
        .flatten()
        .reduce(f32::min)?;
        let end = [
            self.translation.last_time(),
            self.rotation.last_time(),
            self.scale.last_time(),
        ]
        .into_iter()
        .flatten()
        .reduce(f32::max)?;

        Some((start, end))
    }

    pub fn evaluate(&self, rest: Transform, time: f32) -> Transform {
        Transform {
            translation: self.translation.sample(time).unwrap_or(rest.translation),
            rotation: self.rotation.sample(time).unwrap_or(rest.rotation),
            scale: self.scale.sample(time).unwrap_or(rest.scale),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AnimationStack {
    pub name: String,
    /// Seconds.
    pub start: f32,
    /// Seconds.
    pub end: f32,
    pub curves: HashMap<NodeIndex, NodeCurves>,
}

impl AnimationStack {
    #[inline]
    pub fn duration(&self) -> f32 {
        (self.end - self.start).max(0.0)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Scene {
    pub nodes: Vec<Node>,
    pub roots: Vec<NodeIndex>,
    pub meshes: Vec<MeshData>,
    pub materials: Vec<Material>,
    pub animation_stacks: Vec<AnimationStack>,
    /// Frames per second stored in the file, if the format has one.
    pub frame_rate: Option<f32>,
    /// Look up node indices according to original node names. First node wins.
    name_lookup: NameLookup,
}

impl Scene {
    /// Add a node and link it to its parent. Parents must be added before their children.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        parent: NodeIndex,
        transform: Transform,
        attribute: NodeAttribute,
    ) -> NodeIndex {
        let name = name.into();
        let index = self.nodes.len() as NodeIndex;

        if let Some(parent) = self.nodes.get_mut(parent as usize) {
            parent.children.push(index);
        } else {
            self.roots.push(index);
        }

        self.name_lookup.entry(name.clone()).or_insert(index);

        self.nodes.push(Node {
            name,
            parent,
            children: Vec::default(),
            transform,
            attribute,
        });

        index
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeIndex> {
        self.name_lookup.get(name).cloned()
    }

    pub fn animation_stack(&self, name: &str) -> Option<&AnimationStack> {
        self.animation_stacks.iter().find(|stack| stack.name == name)
    }

    /// All node indices in depth-first order, starting at the roots.
    pub fn traverse(&self) -> Vec<NodeIndex> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeIndex> = self.roots.iter().rev().copied().collect();

        while let Some(index) = stack.pop() {
            order.push(index);
            if let Some(node) = self.nodes.get(index as usize) {
                stack.extend(node.children.iter().rev());
            }
        }

        order
    }

    /// Global transforms for every node with `stack` applied at `time`. Without a stack the rest
    /// pose is returned.
    pub fn evaluate_globals(&self, stack: Option<&AnimationStack>, time: f32) -> Vec<Mat4> {
        let mut globals = vec![Mat4::IDENTITY; self.nodes.len()];

        for index in self.traverse() {
            let node = &self.nodes[index as usize];

            let local = match stack.and_then(|s| s.curves.get(&index)) {
                Some(curves) => curves.evaluate(node.transform, time),
                None => node.transform,
            }
            .to_mat4();

            let global = match globals.get(node.parent as usize) {
                Some(parent) => *parent * local,
                None => local,
            };
            globals[index as usize] = global;
        }

        globals
    }

    #[inline]
    pub fn bind_globals(&self) -> Vec<Mat4> {
        self.evaluate_globals(None, 0.0)
    }
}
