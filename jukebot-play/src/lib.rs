//! # Jukebot Playback Library (jukebot-play)
//!
//! Playback scheduling and song-preparation pipeline.
//!
//! **Purpose:** Resolve queued links in the background, prefetch and
//! analyze the next song while the current one is still playing, and
//! start playback without ever running two preparations concurrently or
//! racing against user-issued skip/stop/clear commands.
//!
//! **Architecture:** A pure [`playback::PlayQueue`], a single-slot
//! [`playback::StartSongTaskHost`] owning at most one cancellable
//! [`playback::StartSongTask`], and the [`playback::PlayManager`]
//! orchestrator tying them to the external resolver, gain detector, and
//! player collaborators declared in [`backend`].

pub mod backend;
pub mod error;
pub mod playback;

pub use error::{Error, Result};
pub use playback::manager::{Backends, CurrentPlayData, PlayManager};
