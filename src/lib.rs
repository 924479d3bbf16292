pub mod audio;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod separate;
#[cfg(feature = "server")]
pub mod server;

pub use error::{GenreError, Result};
