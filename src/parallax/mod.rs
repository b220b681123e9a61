pub mod compositor;
pub mod idle;
pub mod shader;
pub mod view;
