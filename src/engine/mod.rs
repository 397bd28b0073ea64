pub mod gpu;
pub mod transform;
