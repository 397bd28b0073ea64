use super::scene::Skin;

/// A single bone's contribution to a control point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneInfluence {
    pub bone_index: u32,
    pub weight: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum CorruptSkinData {
    #[error("Cluster {cluster} references control point {control_point} of {control_point_count}")]
    ControlPointOutOfRange {
        cluster: u32,
        control_point: u32,
        control_point_count: usize,
    },

    #[error("Cluster {cluster} has {indices} control points and {weights} weights")]
    LengthMismatch {
        cluster: u32,
        indices: usize,
        weights: usize,
    },
}

/// Collect the bone influences of every control point. Bone indices are counted across all skins
/// in order, so the second skin's first cluster follows the first skin's last one.
///
/// Weights are copied as stored; they are not normalized.
pub fn build_influences(
    control_point_count: usize,
    skins: &[Skin],
) -> Result<Vec<Vec<BoneInfluence>>, CorruptSkinData> {
    let mut influences = vec![Vec::new(); control_point_count];

    let clusters = skins.iter().flat_map(|skin| skin.clusters.iter());
    for (bone_index, cluster) in clusters.enumerate() {
        let bone_index = bone_index as u32;

        if cluster.control_points.len() != cluster.weights.len() {
            return Err(CorruptSkinData::LengthMismatch {
                cluster: bone_index,
                indices: cluster.control_points.len(),
                weights: cluster.weights.len(),
            });
        }

        for (&control_point, &weight) in cluster.control_points.iter().zip(cluster.weights.iter())
        {
            let Some(list) = influences.get_mut(control_point as usize) else {
                return Err(CorruptSkinData::ControlPointOutOfRange {
                    cluster: bone_index,
                    control_point,
                    control_point_count,
                });
            };
            list.push(BoneInfluence { bone_index, weight });
        }
    }

    Ok(influences)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skinning::scene::Cluster;
    use glam::Mat4;

    fn cluster(link: u32, control_points: Vec<u32>, weights: Vec<f32>) -> Cluster {
        Cluster {
            link,
            control_points,
            weights,
            transform: Mat4::IDENTITY,
            transform_link: Mat4::IDENTITY,
        }
    }

    #[test]
    fn collects_every_cluster_entry() {
        let skins = vec![Skin {
            clusters: vec![
                cluster(1, vec![0, 1], vec![0.5, 1.0]),
                cluster(2, vec![0, 2], vec![0.5, 0.25]),
            ],
        }];

        let influences = build_influences(4, &skins).unwrap();

        assert_eq!(influences.len(), 4);
        assert_eq!(
            influences[0],
            vec![
                BoneInfluence {
                    bone_index: 0,
                    weight: 0.5
                },
                BoneInfluence {
                    bone_index: 1,
                    weight: 0.5
                },
            ]
        );
        assert_eq!(influences[1].len(), 1);
        assert!(influences[3].is_empty());

        // Sum over all lists equals the sum of cluster lengths.
        let total: usize = influences.iter().map(Vec::len).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn weights_are_not_normalized() {
        let skins = vec![Skin {
            clusters: vec![cluster(0, vec![0], vec![0.25])],
        }];

        let influences = build_influences(1, &skins).unwrap();
        assert_eq!(influences[0][0].weight, 0.25);
    }

    #[test]
    fn bone_indices_continue_across_skins() {
        let skins = vec![
            Skin {
                clusters: vec![cluster(0, vec![0], vec![1.0])],
            },
            Skin {
                clusters: vec![cluster(5, vec![0], vec![1.0])],
            },
        ];

        let influences = build_influences(1, &skins).unwrap();
        let bones: Vec<u32> = influences[0].iter().map(|i| i.bone_index).collect();
        assert_eq!(bones, vec![0, 1]);
    }

    #[test]
    fn out_of_range_control_point_is_corrupt() {
        let skins = vec![Skin {
            clusters: vec![cluster(0, vec![3], vec![1.0])],
        }];

        assert!(matches!(
            build_influences(3, &skins),
            Err(CorruptSkinData::ControlPointOutOfRange {
                control_point: 3,
                ..
            })
        ));
    }

    #[test]
    fn mismatched_arrays_are_corrupt() {
        let skins = vec![Skin {
            clusters: vec![cluster(0, vec![0, 1], vec![1.0])],
        }];

        assert!(matches!(
            build_influences(2, &skins),
            Err(CorruptSkinData::LengthMismatch { .. })
        ));
    }
}
