pub mod assistant;
pub mod config;
pub mod db;
pub mod debounce;
pub mod editor;
pub mod error;
pub mod notes;
pub mod output;
pub mod playback;
pub mod services;
pub mod session;
pub mod transcript;

pub use error::{Error, Result};
