pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod game;

pub use api::Session;
pub use config::Config;
pub use error::{GlitchError, Result};
