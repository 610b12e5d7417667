//! Client for the out-of-process playback engine

pub mod api;
pub mod models;

pub use api::*;
pub use models::*;
