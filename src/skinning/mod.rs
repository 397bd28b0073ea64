//! Skinned mesh import, animation baking and playback.

pub mod assemble;
pub mod import;
pub mod influences;
pub mod interpolate;
pub mod model;
pub mod playback;
pub mod sampler;
pub mod scene;
pub mod track;
