pub mod blit;
pub mod canvas;
pub mod parallax;
