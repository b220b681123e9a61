pub mod config;
pub mod error;
pub mod events;
pub mod gpu;
pub mod immersive;
pub mod parallax;
pub mod processing;
pub mod tasks {
    pub mod control;
    pub mod host;
    pub mod loader;
    pub mod viewer;
}
