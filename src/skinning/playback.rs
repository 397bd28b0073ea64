//! Per tick clip playback and the bone matrix palette handed to the GPU.

use glam::Mat4;

use super::sampler::{Clip, SkeletalFrame};

/// Bone matrices available to a single draw.
pub const MAX_BONES: usize = 128;

/// Amount the playback speed changes per speed up / slow down.
pub const SPEED_STEP: f32 = 0.25;

/// Fraction of a frame below a frame boundary that still counts as the next frame. Covers the
/// rounding of `frames / rate` so a tick of exactly one clip duration lands past the last frame.
const FRAME_EPSILON: f32 = 1.0e-3;

/// Where a mesh is in its clip list. Passed by value.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlaybackState {
    /// Seconds into the current clip.
    pub tick: f32,
    pub clip_index: usize,
}

/// The frame to show for a [PlaybackState].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameLookup<'a> {
    Frame {
        index: usize,
        frame: &'a SkeletalFrame,
    },
    /// The clip has no frames; draw the bind pose.
    BindPose,
}

/// Move the tick forward by `delta_seconds` scaled by `speed`.
#[inline]
pub fn advance(state: PlaybackState, delta_seconds: f32, speed: f32) -> PlaybackState {
    PlaybackState {
        tick: state.tick + delta_seconds * speed,
        ..state
    }
}

/// Look up the frame for the current tick. A tick past the end of the clip, or one that does not
/// map to a frame at all, resets the tick to 0 and returns the first frame.
pub fn current_frame(state: PlaybackState, clip: &Clip) -> (PlaybackState, FrameLookup<'_>) {
    if clip.frames.is_empty() {
        return (state, FrameLookup::BindPose);
    }

    let position = (state.tick * clip.sampling_rate + FRAME_EPSILON).floor();
    let (state, index) = if state.tick >= 0.0
        && position.is_finite()
        && (position as usize) < clip.frames.len()
    {
        (state, position as usize)
    } else {
        (PlaybackState { tick: 0.0, ..state }, 0)
    };

    (
        state,
        FrameLookup::Frame {
            index,
            frame: &clip.frames[index],
        },
    )
}

/// Select the next clip, wrapping to the first. The tick is kept.
pub fn select_next_clip(state: PlaybackState, clip_count: usize) -> PlaybackState {
    let clip_index = if clip_count == 0 || state.clip_index + 1 >= clip_count {
        0
    } else {
        state.clip_index + 1
    };

    PlaybackState { clip_index, ..state }
}

/// User facing playback controls.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaybackControl {
    pub speed: f32,
    pub playing: bool,
}

impl Default for PlaybackControl {
    fn default() -> Self {
        Self {
            speed: 1.0,
            playing: true,
        }
    }
}

impl PlaybackControl {
    pub fn speed_up(&mut self) {
        self.speed += SPEED_STEP;
    }

    pub fn slow_down(&mut self) {
        self.speed -= SPEED_STEP;
    }

    pub fn toggle(&mut self) {
        self.playing = !self.playing;
    }

    /// Speed to advance with; zero while paused.
    #[inline]
    pub fn effective_speed(&self) -> f32 {
        if self.playing { self.speed } else { 0.0 }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Frame has {bones} bones, the palette holds 128")]
pub struct BoneBudgetExceeded {
    pub bones: usize,
}

/// The per instance bone matrices uploaded before each draw.
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::NoUninit)]
#[repr(C)]
pub struct BonePalette {
    pub bones: [Mat4; MAX_BONES],
}

impl Default for BonePalette {
    fn default() -> Self {
        Self {
            bones: [Mat4::IDENTITY; MAX_BONES],
        }
    }
}

impl BonePalette {
    /// Copy the frame's matrices into the palette. Slots past the frame's bone count are left
    /// untouched. Nothing is written when the frame does not fit.
    pub fn write_frame(&mut self, frame: &SkeletalFrame) -> Result<(), BoneBudgetExceeded> {
        if frame.bones.len() > MAX_BONES {
            return Err(BoneBudgetExceeded {
                bones: frame.bones.len(),
            });
        }

        self.bones[..frame.bones.len()].copy_from_slice(&frame.bones);

        Ok(())
    }

    /// Reset every slot to identity.
    pub fn write_bind_pose(&mut self) {
        self.bones = [Mat4::IDENTITY; MAX_BONES];
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}
