pub mod config;
pub mod coordination;
pub mod error;
pub mod library;
pub mod logging;
pub mod media;
pub mod navigation;
pub mod playlist;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod supervisor;
pub mod viewer;
pub mod web;

pub use error::{PlaybackError, Result};
