//! # Jukebot Common Library
//!
//! Shared code for the jukebot playback services including:
//! - Core playback data model (resources, metadata, queue items)
//! - Event types (PlaybackEvent enum) and the EventBus
//! - Playback configuration loading
//! - Common error types

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::PlaybackConfig;
pub use error::{Error, Result};
