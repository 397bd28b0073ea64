/// The space the baked bone matrices map vertices into.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum SkinningSpace {
    /// Relative to the mesh node's current global transform. The mesh transform is applied
    /// separately when drawing.
    #[default]
    MeshLocal,
    /// World space. The mesh node's own animation is baked into every bone.
    World,
}

#[derive(Clone, Debug)]
pub struct ImportOptions {
    /// Overrides the frame rate stored in the file.
    pub sampling_rate: Option<f32>,
    /// Used when the file does not store a frame rate.
    pub native_frame_rate: f32,
    pub skinning_space: SkinningSpace,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            sampling_rate: None,
            native_frame_rate: 30.0,
            skinning_space: SkinningSpace::default(),
        }
    }
}

impl ImportOptions {
    /// The rate clips are baked at for a file with the given native frame rate.
    pub fn sampling_rate(&self, file_rate: Option<f32>) -> f32 {
        self.sampling_rate
            .or(file_rate)
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .unwrap_or(self.native_frame_rate)
    }
}

#[derive(Clone, Debug)]
pub struct PlaybackOptions {
    /// Name of the clip to start with. The first clip is used when `None`.
    pub clip: Option<String>,
    pub speed: f32,
    /// How long to run the simulated render loop for.
    pub seconds: f32,
    /// Simulated render ticks per second.
    pub tick_rate: f32,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            clip: None,
            speed: 1.0,
            seconds: 2.0,
            tick_rate: 60.0,
        }
    }
}
