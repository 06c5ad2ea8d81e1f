pub mod bbox;
pub mod compositor;
pub mod config;
pub mod crop;
pub mod error;
pub mod events;
pub mod layer;
pub mod loader;
pub mod scan;
pub mod segment;
pub mod session;
pub mod stack;
pub mod surface;
pub mod tasks {
    pub mod segmenter;
}

pub use error::Error;
