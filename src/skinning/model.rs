//! Ties the pipeline together: every mesh of a file is assembled, gets a skeleton, and has the
//! file's animation stacks baked for it. Motion files add more clips afterwards.

use std::path::Path;

use ahash::HashSet;
use glam::Mat4;

use crate::config::ImportOptions;

use super::{
    assemble::{AssembleError, AssembledMesh, assemble},
    import::{ImportError, ImportedScene, import},
    influences::{CorruptSkinData, build_influences},
    playback::{
        BoneBudgetExceeded, BonePalette, FrameLookup, MAX_BONES, PlaybackControl, PlaybackState,
        advance, current_frame, select_next_clip,
    },
    sampler::{Clip, SampleError, Skeleton, sample_all_clips},
    scene::{Material, NodeAttribute, NodeIndex, Scene},
};

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("Corrupt skin data: {0}")]
    CorruptSkinData(#[from] CorruptSkinData),
    #[error(transparent)]
    Assemble(#[from] AssembleError),
}

#[derive(Debug)]
pub struct SkinnedMesh {
    pub name: String,
    /// Name of the mesh node, used to find the node in animated scenes.
    pub node_name: String,
    pub node: NodeIndex,
    pub global_bind: Mat4,
    pub assembled: AssembledMesh,
    /// Material for every material slot.
    pub materials: Vec<Material>,
    pub skeleton: Skeleton,
    pub clips: Vec<Clip>,
    pub state: PlaybackState,
}

impl SkinnedMesh {
    fn build(
        scene: &Scene,
        node: NodeIndex,
        mesh_index: usize,
        options: &ImportOptions,
    ) -> Result<Self, MeshError> {
        let scene_node = &scene.nodes[node as usize];
        let mesh = &scene.meshes[mesh_index];

        let influences = build_influences(mesh.control_points.len(), &mesh.skins)?;
        let assembled = assemble(mesh, &influences)?;
        let skeleton = Skeleton::from_mesh(scene, mesh);

        let materials = if mesh.material_slots.is_empty() {
            vec![Material::default()]
        } else {
            mesh.material_slots
                .iter()
                .map(|&m| scene.materials.get(m).cloned().unwrap_or_default())
                .collect()
        };

        let clips = if skeleton.is_empty() {
            Vec::default()
        } else {
            playable_clips(
                &mesh.name,
                sample_all_clips(&skeleton, &scene_node.name, scene, options),
            )
        };

        Ok(Self {
            name: mesh.name.clone(),
            node_name: scene_node.name.clone(),
            node,
            global_bind: scene.bind_globals()[node as usize],
            assembled,
            materials,
            skeleton,
            clips,
            state: PlaybackState::default(),
        })
    }

    pub fn current_clip(&self) -> Option<&Clip> {
        self.clips.get(self.state.clip_index)
    }

    /// Write the frame for the current tick into `palette`, then advance the tick.
    pub fn update(
        &mut self,
        delta_seconds: f32,
        control: &PlaybackControl,
        palette: &mut BonePalette,
    ) -> Result<(), BoneBudgetExceeded> {
        let Some(clip) = self.clips.get(self.state.clip_index) else {
            palette.write_bind_pose();
            return Ok(());
        };

        let (state, lookup) = current_frame(self.state, clip);
        self.state = state;

        match lookup {
            FrameLookup::Frame { frame, .. } => palette.write_frame(frame)?,
            FrameLookup::BindPose => palette.write_bind_pose(),
        }

        self.state = advance(self.state, delta_seconds, control.effective_speed());

        Ok(())
    }
}

/// Clips with more bones than the palette holds can't be drawn.
fn playable_clips(mesh: &str, clips: Vec<Clip>) -> Vec<Clip> {
    clips
        .into_iter()
        .filter(|clip| {
            let fits = clip.bone_count() <= MAX_BONES;
            if !fits {
                tracing::warn!(
                    "Dropping clip \"{}\" of mesh \"{}\": {} bones, at most {} supported.",
                    clip.name,
                    mesh,
                    clip.bone_count(),
                    MAX_BONES
                );
            }
            fits
        })
        .collect()
}

/// All the skinned meshes of a file, each with its own bone palette.
#[derive(Debug)]
pub struct SkinnedModel {
    pub meshes: Vec<SkinnedMesh>,
    pub palettes: Vec<BonePalette>,
    options: ImportOptions,
}

impl SkinnedModel {
    /// Import a model file. Meshes that fail to build are skipped.
    pub fn load(path: impl AsRef<Path>, options: &ImportOptions) -> Result<Self, ImportError> {
        let imported = import(path)?;
        Ok(Self::from_imported(&imported, options))
    }

    pub fn from_imported(imported: &ImportedScene, options: &ImportOptions) -> Self {
        let mut meshes = Vec::with_capacity(imported.mesh_nodes.len());

        for &node in imported.mesh_nodes.iter() {
            let NodeAttribute::Mesh(mesh_index) = imported.scene.nodes[node as usize].attribute
            else {
                continue;
            };

            match SkinnedMesh::build(&imported.scene, node, mesh_index, options) {
                Ok(mesh) => {
                    tracing::info!(
                        "Mesh \"{}\": {} vertices, {} subsets, {} bones, {} clips.",
                        mesh.name,
                        mesh.assembled.vertices.len(),
                        mesh.assembled.subsets.len(),
                        mesh.skeleton.len(),
                        mesh.clips.len()
                    );
                    meshes.push(mesh);
                }
                Err(err) => {
                    tracing::warn!(
                        "Skipping mesh on node \"{}\": {}",
                        imported.scene.nodes[node as usize].name,
                        err
                    );
                }
            }
        }

        let palettes = vec![BonePalette::default(); meshes.len()];

        Self {
            meshes,
            palettes,
            options: options.clone(),
        }
    }

    /// Import a file and bake all of its animation stacks against the skinned meshes. Returns the
    /// number of clips added.
    pub fn load_motion(&mut self, path: impl AsRef<Path>) -> Result<usize, ImportError> {
        let imported = import(path)?;
        Ok(self.add_motion(&imported.scene))
    }

    pub fn add_motion(&mut self, scene: &Scene) -> usize {
        let mut added = 0;

        for mesh in self.meshes.iter_mut() {
            if mesh.skeleton.is_empty() {
                continue;
            }

            let clips = playable_clips(
                &mesh.name,
                sample_all_clips(&mesh.skeleton, &mesh.node_name, scene, &self.options),
            );
            added += clips.len();
            mesh.clips.extend(clips);
        }

        added
    }

    /// Point every mesh at the clip called `name`. Meshes without it fall back to their first clip.
    pub fn select_clip(&mut self, name: &str) {
        for mesh in self.meshes.iter_mut() {
            if mesh.clips.is_empty() {
                continue;
            }

            let clip_index = match mesh.clips.iter().position(|clip| clip.name == name) {
                Some(index) => index,
                None => {
                    tracing::warn!(
                        "{} on mesh \"{}\", using \"{}\".",
                        SampleError::AnimationStackNotFound(String::from(name)),
                        mesh.name,
                        mesh.clips[0].name
                    );
                    0
                }
            };

            mesh.state.clip_index = clip_index;
        }
    }

    pub fn next_clip(&mut self) {
        for mesh in self.meshes.iter_mut() {
            mesh.state = select_next_clip(mesh.state, mesh.clips.len());
        }
    }

    /// Update every mesh, in order, for one render tick.
    pub fn update(&mut self, delta_seconds: f32, control: &PlaybackControl) {
        for (mesh, palette) in self.meshes.iter_mut().zip(self.palettes.iter_mut()) {
            if let Err(err) = mesh.update(delta_seconds, control, palette) {
                tracing::warn!("Mesh \"{}\": {}", mesh.name, err);
            }
        }
    }

    /// Clip names over all meshes, each once, in first seen order.
    pub fn clip_names(&self) -> Vec<&str> {
        let mut seen = HashSet::default();
        self.meshes
            .iter()
            .flat_map(|mesh| mesh.clips.iter().map(|clip| clip.name.as_str()))
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::transform::Transform,
        skinning::scene::{AnimationStack, Cluster, MeshData, NO_PARENT, Skin},
    };
    use glam::Vec3;

    const SINGLE_BONE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/assets/tests/single_bone.gltf");

    fn translation(m: Mat4) -> Vec3 {
        m.transform_point3(Vec3::ZERO)
    }

    #[test]
    fn loads_single_bone_model() {
        let model = SkinnedModel::load(SINGLE_BONE, &ImportOptions::default()).unwrap();

        assert_eq!(model.meshes.len(), 1);
        assert_eq!(model.palettes.len(), 1);

        let mesh = &model.meshes[0];
        assert_eq!(mesh.name, "body");
        assert_eq!(mesh.assembled.vertices.len(), 3);
        assert_eq!(mesh.materials[0].name, "skin");
        assert_eq!(mesh.clips.len(), 1);
        assert_eq!(mesh.current_clip().unwrap().name, "slide");
        assert_eq!(mesh.global_bind, Mat4::IDENTITY);
    }

    #[test]
    fn update_writes_then_advances() {
        let mut model = SkinnedModel::load(SINGLE_BONE, &ImportOptions::default()).unwrap();
        let control = PlaybackControl::default();
        let duration = model.meshes[0].clips[0].duration();

        model.update(0.5, &control);
        assert!(translation(model.palettes[0].bones[0]).abs_diff_eq(Vec3::ZERO, 1e-5));
        assert_eq!(model.meshes[0].state.tick, 0.5);

        model.update(0.0, &control);
        let x = translation(model.palettes[0].bones[0]).x;
        assert!((x - 0.5).abs() < 1e-4);

        // A whole clip later the tick is past the end and wraps to frame 0.
        model.meshes[0].state.tick = 0.0;
        model.update(duration, &control);
        model.update(0.0, &control);
        assert_eq!(model.meshes[0].state.tick, 0.0);
        assert!(translation(model.palettes[0].bones[0]).abs_diff_eq(Vec3::ZERO, 1e-5));
    }

    #[test]
    fn paused_playback_holds_the_tick() {
        let mut model = SkinnedModel::load(SINGLE_BONE, &ImportOptions::default()).unwrap();
        let mut control = PlaybackControl::default();
        control.toggle();

        model.update(0.25, &control);
        assert_eq!(model.meshes[0].state.tick, 0.0);
    }

    #[test]
    fn motion_files_add_clips() {
        let mut model = SkinnedModel::load(SINGLE_BONE, &ImportOptions::default()).unwrap();
        assert_eq!(model.load_motion(SINGLE_BONE).unwrap(), 1);
        assert_eq!(model.meshes[0].clips.len(), 2);

        model.meshes[0].state.tick = 0.25;
        model.next_clip();
        assert_eq!(model.meshes[0].state.clip_index, 1);
        assert_eq!(model.meshes[0].state.tick, 0.25);

        model.next_clip();
        assert_eq!(model.meshes[0].state.clip_index, 0);
    }

    #[test]
    fn unknown_clip_falls_back_to_the_first() {
        let mut model = SkinnedModel::load(SINGLE_BONE, &ImportOptions::default()).unwrap();
        model.load_motion(SINGLE_BONE).unwrap();
        model.meshes[0].state.clip_index = 1;

        model.select_clip("walk");
        assert_eq!(model.meshes[0].state.clip_index, 0);
        assert_eq!(model.clip_names(), vec!["slide"]);
    }

    fn scene_with_mesh(mesh: MeshData) -> ImportedScene {
        let mut scene = Scene::default();
        let node = scene.add_node("mesh", NO_PARENT, Transform::IDENTITY, NodeAttribute::Mesh(0));
        scene.add_node("bone", NO_PARENT, Transform::IDENTITY, NodeAttribute::Skeleton);
        scene.meshes.push(mesh);
        scene.animation_stacks.push(AnimationStack {
            name: String::from("idle"),
            start: 0.0,
            end: 1.0,
            ..Default::default()
        });

        ImportedScene {
            scene,
            mesh_nodes: vec![node],
            skeleton_nodes: vec![1],
        }
    }

    fn triangle(clusters: Vec<Cluster>) -> MeshData {
        MeshData {
            name: String::from("triangle"),
            control_points: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            polygons: vec![vec![0, 1, 2]],
            skins: vec![Skin { clusters }],
            ..Default::default()
        }
    }

    fn cluster(control_points: Vec<u32>) -> Cluster {
        Cluster {
            link: 1,
            weights: vec![1.0; control_points.len()],
            control_points,
            transform: Mat4::IDENTITY,
            transform_link: Mat4::IDENTITY,
        }
    }

    #[test]
    fn corrupt_meshes_are_skipped() {
        let imported = scene_with_mesh(triangle(vec![cluster(vec![7])]));
        let model = SkinnedModel::from_imported(&imported, &ImportOptions::default());
        assert!(model.meshes.is_empty());
    }

    #[test]
    fn clips_over_the_bone_budget_are_dropped() {
        let clusters = (0..MAX_BONES + 1).map(|_| cluster(vec![0])).collect();
        let imported = scene_with_mesh(triangle(clusters));

        let model = SkinnedModel::from_imported(&imported, &ImportOptions::default());
        assert_eq!(model.meshes.len(), 1);
        assert_eq!(model.meshes[0].skeleton.len(), MAX_BONES + 1);
        assert!(model.meshes[0].clips.is_empty());
    }

    #[test]
    fn clip_names_are_listed_once_in_order() {
        let mut scene = Scene::default();
        let first = scene.add_node("first", NO_PARENT, Transform::IDENTITY, NodeAttribute::Mesh(0));
        scene.add_node("bone", NO_PARENT, Transform::IDENTITY, NodeAttribute::Skeleton);
        let second =
            scene.add_node("second", NO_PARENT, Transform::IDENTITY, NodeAttribute::Mesh(1));
        scene.meshes.push(triangle(vec![cluster(vec![0])]));
        scene.meshes.push(triangle(vec![cluster(vec![0])]));
        for name in ["b", "a"] {
            scene.animation_stacks.push(AnimationStack {
                name: String::from(name),
                start: 0.0,
                end: 1.0,
                ..Default::default()
            });
        }

        let imported = ImportedScene {
            scene,
            mesh_nodes: vec![first, second],
            skeleton_nodes: vec![1],
        };
        let model = SkinnedModel::from_imported(&imported, &ImportOptions::default());

        assert_eq!(model.meshes.len(), 2);
        assert_eq!(model.clip_names(), vec!["b", "a"]);
    }
}
