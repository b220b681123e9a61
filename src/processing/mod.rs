//! CPU-side preparation of depth data: sampling, dilation, meshing and layout.

pub mod depth_field;
pub mod layout;
pub mod mesh;
