//! Bakes animation stacks into clips of per-bone skinning matrices.

use glam::Mat4;

use crate::config::{ImportOptions, SkinningSpace};

use super::scene::{AnimationStack, MeshData, NodeIndex, Scene};

/// A bone of a mesh's skin. The index into [Skeleton::bones] is the bone index stored in the
/// vertices.
#[derive(Clone, Debug)]
pub struct Bone {
    pub name: String,
    /// The bone's node in the scene it was imported from.
    pub node: NodeIndex,
    /// Global transform of the mesh node at bind time.
    pub reference_global_init: Mat4,
    /// Global transform of the bone at bind time.
    pub cluster_global_init: Mat4,
}

#[derive(Clone, Debug, Default)]
pub struct Skeleton {
    pub bones: Vec<Bone>,
}

impl Skeleton {
    /// One bone per cluster, counted across all skins of the mesh.
    pub fn from_mesh(scene: &Scene, mesh: &MeshData) -> Self {
        let bones = mesh
            .skins
            .iter()
            .flat_map(|skin| skin.clusters.iter())
            .map(|cluster| Bone {
                name: scene
                    .nodes
                    .get(cluster.link as usize)
                    .map(|node| node.name.clone())
                    .unwrap_or_default(),
                node: cluster.link,
                reference_global_init: cluster.transform,
                cluster_global_init: cluster.transform_link,
            })
            .collect();

        Self { bones }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bones.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }
}

/// One skinning matrix per bone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SkeletalFrame {
    pub bones: Vec<Mat4>,
}

#[derive(Clone, Debug)]
pub struct Clip {
    pub name: String,
    pub frames: Vec<SkeletalFrame>,
    /// Frames per second.
    pub sampling_rate: f32,
}

impl Clip {
    pub fn empty(name: impl Into<String>, sampling_rate: f32) -> Self {
        Self {
            name: name.into(),
            frames: Vec::default(),
            sampling_rate,
        }
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Length of the clip in seconds.
    #[inline]
    pub fn duration(&self) -> f32 {
        self.frames.len() as f32 / self.sampling_rate
    }

    /// Bone count of the frames. All frames have the same count.
    pub fn bone_count(&self) -> usize {
        self.frames.first().map(|f| f.bones.len()).unwrap_or(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("Animation stack \"{0}\" not found")]
    AnimationStackNotFound(String),
}

/// Bake the stack `stack_name` of `scene` for `skeleton`.
///
/// Bones and the reference (mesh) node are looked up by name in `scene`, so the scene does not
/// have to be the one the skeleton was imported from. Bones that can't be found hold their bind
/// pose.
pub fn sample_clip(
    skeleton: &Skeleton,
    reference_node: &str,
    scene: &Scene,
    stack_name: &str,
    options: &ImportOptions,
) -> Result<Clip, SampleError> {
    if scene.animation_stacks.is_empty() {
        return Ok(Clip::empty(
            stack_name,
            options.sampling_rate(scene.frame_rate),
        ));
    }

    let stack = scene
        .animation_stack(stack_name)
        .ok_or_else(|| SampleError::AnimationStackNotFound(String::from(stack_name)))?;

    Ok(sample_stack(skeleton, reference_node, scene, stack, options))
}

/// Bake every stack of `scene`, in order.
pub fn sample_all_clips(
    skeleton: &Skeleton,
    reference_node: &str,
    scene: &Scene,
    options: &ImportOptions,
) -> Vec<Clip> {
    scene
        .animation_stacks
        .iter()
        .map(|stack| sample_stack(skeleton, reference_node, scene, stack, options))
        .collect()
}

/// The node driving `bone` in `scene`. The bone's own node is used when it carries the bone's
/// name, so duplicate names in the bone's source scene resolve to the right node.
fn resolve_bone(scene: &Scene, bone: &Bone) -> Option<NodeIndex> {
    match scene.nodes.get(bone.node as usize) {
        Some(node) if node.name == bone.name => Some(bone.node),
        _ => scene.node_by_name(&bone.name),
    }
}

/// Bake `stack`, which must belong to `scene`.
pub fn sample_stack(
    skeleton: &Skeleton,
    reference_node: &str,
    scene: &Scene,
    stack: &AnimationStack,
    options: &ImportOptions,
) -> Clip {
    let sampling_rate = options.sampling_rate(scene.frame_rate);
    let frame_count = (stack.duration() * sampling_rate).ceil() as usize;

    let reference = scene.node_by_name(reference_node);
    let bone_nodes: Vec<Option<NodeIndex>> = skeleton
        .bones
        .iter()
        .map(|bone| resolve_bone(scene, bone))
        .collect();

    let mut missing = 0;
    for (bone, node) in skeleton.bones.iter().zip(bone_nodes.iter()) {
        if node.is_none() {
            tracing::debug!(
                "Bone \"{}\" (node {}) is not in the animated scene.",
                bone.name,
                bone.node
            );
            missing += 1;
        }
    }
    if missing > 0 {
        tracing::warn!(
            "{} of {} bones are not animated by \"{}\".",
            missing,
            skeleton.len(),
            stack.name
        );
    }

    // Bind part of every bone: cluster_global_init⁻¹ · reference_global_init
    let bind: Vec<Mat4> = skeleton
        .bones
        .iter()
        .map(|bone| bone.cluster_global_init.inverse() * bone.reference_global_init)
        .collect();

    let frames = (0..frame_count)
        .map(|i| {
            let time = stack.start + i as f32 / sampling_rate;
            let globals = scene.evaluate_globals(Some(stack), time);

            let bones = skeleton
                .bones
                .iter()
                .zip(bone_nodes.iter())
                .zip(bind.iter())
                .map(|((bone, node), bind)| {
                    let cluster_current = node
                        .map(|n| globals[n as usize])
                        .unwrap_or(bone.cluster_global_init);

                    match options.skinning_space {
                        SkinningSpace::MeshLocal => {
                            let reference_current = reference
                                .map(|n| globals[n as usize])
                                .unwrap_or(bone.reference_global_init);
                            reference_current.inverse() * cluster_current * *bind
                        }
                        SkinningSpace::World => cluster_current * *bind,
                    }
                })
                .collect();

            SkeletalFrame { bones }
        })
        .collect();

    tracing::debug!(
        "Baked \"{}\": {} frames at {} fps for {} bones.",
        stack.name,
        frame_count,
        sampling_rate,
        skeleton.len()
    );

    Clip {
        name: stack.name.clone(),
        frames,
        sampling_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::transform::Transform,
        skinning::{
            import::import,
            scene::{NO_PARENT, NodeAttribute, NodeCurves},
            track::{Interpolation, Track},
        },
    };
    use glam::Vec3;

    const SINGLE_BONE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/assets/tests/single_bone.gltf");

    fn approx_v3(a: Vec3, b: Vec3, tolerance: f32) -> bool {
        (a - b).abs().max_element() <= tolerance
    }

    fn load_single_bone() -> (Scene, Skeleton, String) {
        let imported = import(SINGLE_BONE).unwrap();
        let mesh_node = imported.mesh_nodes[0];
        let scene = imported.scene;
        let skeleton = Skeleton::from_mesh(&scene, &scene.meshes[0]);
        let reference = scene.nodes[mesh_node as usize].name.clone();
        (scene, skeleton, reference)
    }

    #[test]
    fn single_bone_slide() {
        let (scene, skeleton, reference) = load_single_bone();
        let options = ImportOptions::default();

        assert_eq!(skeleton.len(), 1);
        assert_eq!(skeleton.bones[0].name, "bone");

        let clip = sample_clip(&skeleton, &reference, &scene, "slide", &options).unwrap();

        assert_eq!(clip.frame_count(), 30);
        assert_eq!(clip.bone_count(), 1);
        assert_eq!(clip.duration(), 1.0);

        // One sampling step, plus rounding.
        let step = 1.0 / clip.sampling_rate + 1e-4;
        let first = clip.frames[0].bones[0].transform_point3(Vec3::ZERO);
        let last = clip.frames[29].bones[0].transform_point3(Vec3::ZERO);
        assert!(approx_v3(first, Vec3::ZERO, step));
        assert!(approx_v3(last, Vec3::new(1.0, 0.0, 0.0), step));
    }

    #[test]
    fn frame_count_follows_sampling_rate() {
        let (scene, skeleton, reference) = load_single_bone();

        for rate in [1.0, 7.0, 24.0, 29.97, 60.0] {
            let options = ImportOptions {
                sampling_rate: Some(rate),
                ..Default::default()
            };
            let clip = sample_clip(&skeleton, &reference, &scene, "slide", &options).unwrap();
            let expected = (1.0_f32 * rate).ceil() as usize;
            assert!(clip.frame_count().abs_diff(expected) <= 1);
            assert!(clip.frames.iter().all(|f| f.bones.len() == 1));
        }
    }

    #[test]
    fn missing_stack() {
        let (scene, skeleton, reference) = load_single_bone();

        assert!(matches!(
            sample_clip(&skeleton, &reference, &scene, "walk", &ImportOptions::default()),
            Err(SampleError::AnimationStackNotFound(name)) if name == "walk"
        ));
    }

    #[test]
    fn scene_without_stacks_gives_an_empty_clip() {
        let (mut scene, skeleton, reference) = load_single_bone();
        scene.animation_stacks.clear();

        let clip =
            sample_clip(&skeleton, &reference, &scene, "slide", &ImportOptions::default()).unwrap();
        assert_eq!(clip.frame_count(), 0);
        let clips = sample_all_clips(&skeleton, &reference, &scene, &ImportOptions::default());
        assert!(clips.is_empty());
    }

    /// A moving mesh node with a static bone: mesh-local frames cancel the mesh motion, world
    /// frames keep it.
    #[test]
    fn skinning_spaces() {
        let mut scene = Scene::default();
        let body = scene.add_node("body", NO_PARENT, Transform::IDENTITY, NodeAttribute::None);
        let bone = scene.add_node(
            "bone",
            NO_PARENT,
            Transform::IDENTITY,
            NodeAttribute::Skeleton,
        );

        let mut stack = AnimationStack {
            name: String::from("drift"),
            start: 0.0,
            end: 1.0,
            ..Default::default()
        };
        stack.curves.insert(
            body,
            NodeCurves {
                translation: Track::from_keys(
                    Interpolation::Linear,
                    [0.0, 1.0],
                    [Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0)],
                ),
                ..Default::default()
            },
        );
        scene.animation_stacks.push(stack);

        let skeleton = Skeleton {
            bones: vec![Bone {
                name: String::from("bone"),
                node: bone,
                reference_global_init: Mat4::IDENTITY,
                cluster_global_init: Mat4::IDENTITY,
            }],
        };

        let options = ImportOptions {
            sampling_rate: Some(2.0),
            ..Default::default()
        };
        let clip = sample_clip(&skeleton, "body", &scene, "drift", &options).unwrap();
        let p = clip.frames[1].bones[0].transform_point3(Vec3::ZERO);
        assert!(approx_v3(p, Vec3::new(0.0, -1.0, 0.0), 1e-5));

        let options = ImportOptions {
            skinning_space: SkinningSpace::World,
            ..options
        };
        let clip = sample_clip(&skeleton, "body", &scene, "drift", &options).unwrap();
        let p = clip.frames[1].bones[0].transform_point3(Vec3::ZERO);
        assert!(approx_v3(p, Vec3::ZERO, 1e-5));
    }

    #[test]
    fn unknown_bones_hold_bind_pose() {
        let (scene, mut skeleton, reference) = load_single_bone();
        skeleton.bones[0].name = String::from("not-in-scene");

        let clip =
            sample_clip(&skeleton, &reference, &scene, "slide", &ImportOptions::default()).unwrap();
        assert!(
            clip.frames
                .iter()
                .all(|f| f.bones[0].abs_diff_eq(Mat4::IDENTITY, 1e-5))
        );
    }

    fn slide(scene: &mut Scene, name: &str, node: NodeIndex, to: Vec3) {
        let mut stack = AnimationStack {
            name: String::from(name),
            start: 0.0,
            end: 1.0,
            ..Default::default()
        };
        stack.curves.insert(
            node,
            NodeCurves {
                translation: Track::from_keys(Interpolation::Linear, [0.0, 1.0], [Vec3::ZERO, to]),
                ..Default::default()
            },
        );
        scene.animation_stacks.push(stack);
    }

    fn bone(name: &str, node: NodeIndex) -> Bone {
        Bone {
            name: String::from(name),
            node,
            reference_global_init: Mat4::IDENTITY,
            cluster_global_init: Mat4::IDENTITY,
        }
    }

    #[test]
    fn stacks_with_the_same_name_keep_their_own_motion() {
        let mut scene = Scene::default();
        scene.add_node("body", NO_PARENT, Transform::IDENTITY, NodeAttribute::None);
        let joint =
            scene.add_node("joint", NO_PARENT, Transform::IDENTITY, NodeAttribute::Skeleton);
        slide(&mut scene, "Take", joint, Vec3::X);
        slide(&mut scene, "Take", joint, Vec3::Y);

        let skeleton = Skeleton {
            bones: vec![bone("joint", joint)],
        };
        let clips = sample_all_clips(&skeleton, "body", &scene, &ImportOptions::default());
        assert_eq!(clips.len(), 2);

        let last = |clip: &Clip| clip.frames[29].bones[0].transform_point3(Vec3::ZERO);
        let step = 1.0 / 30.0 + 1e-4;
        assert!(approx_v3(last(&clips[0]), Vec3::X, step));
        assert!(approx_v3(last(&clips[1]), Vec3::Y, step));
    }

    #[test]
    fn bones_with_duplicate_names_follow_their_own_nodes() {
        let mut scene = Scene::default();
        scene.add_node("body", NO_PARENT, Transform::IDENTITY, NodeAttribute::None);
        let first =
            scene.add_node("joint", NO_PARENT, Transform::IDENTITY, NodeAttribute::Skeleton);
        let second =
            scene.add_node("joint", NO_PARENT, Transform::IDENTITY, NodeAttribute::Skeleton);
        slide(&mut scene, "wave", second, Vec3::X);

        let skeleton = Skeleton {
            bones: vec![bone("joint", first), bone("joint", second)],
        };
        let options = ImportOptions {
            sampling_rate: Some(2.0),
            ..Default::default()
        };
        let clip = sample_clip(&skeleton, "body", &scene, "wave", &options).unwrap();

        let frame = &clip.frames[1];
        assert!(approx_v3(frame.bones[0].transform_point3(Vec3::ZERO), Vec3::ZERO, 1e-5));
        assert!(approx_v3(
            frame.bones[1].transform_point3(Vec3::ZERO),
            Vec3::new(0.5, 0.0, 0.0),
            1e-5
        ));
    }

    #[test]
    fn bones_from_another_scene_are_found_by_name() {
        let mut motion = Scene::default();
        motion.add_node("root", NO_PARENT, Transform::IDENTITY, NodeAttribute::None);
        motion.add_node("body", NO_PARENT, Transform::IDENTITY, NodeAttribute::None);
        let joint = motion.add_node("joint", NO_PARENT, Transform::IDENTITY, NodeAttribute::None);
        slide(&mut motion, "wave", joint, Vec3::X);

        // Node 1 of the motion scene is "body", not the bone.
        let skeleton = Skeleton {
            bones: vec![bone("joint", 1)],
        };
        let options = ImportOptions {
            sampling_rate: Some(2.0),
            ..Default::default()
        };
        let clip = sample_clip(&skeleton, "body", &motion, "wave", &options).unwrap();
        assert!(approx_v3(
            clip.frames[1].bones[0].transform_point3(Vec3::ZERO),
            Vec3::new(0.5, 0.0, 0.0),
            1e-5
        ));
    }
}
