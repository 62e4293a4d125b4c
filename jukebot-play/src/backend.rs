//! Collaborator boundaries of the playback pipeline
//!
//! Link resolution, gain detection, the audio player, the playlist store,
//! and end-of-queue recovery are external services; this module declares
//! the traits the pipeline drives them through.

use crate::error::Result;
use async_trait::async_trait;
use jukebot_common::types::{AudioResource, PlayResource, QueueItem};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Resolves audio resources into something the player can open.
#[async_trait]
pub trait ResourceResolver: Send + Sync {
    /// Resolve a resource into a playable one. Failures are load failures.
    async fn load(&self, resource: &AudioResource) -> Result<PlayResource>;

    /// Reconstruct a human-facing source URL for a resource.
    async fn restore_link(&self, resource: &AudioResource) -> Result<String>;

    /// Whether the backend that owns this resource normalizes loudness,
    /// making a gain probe worthwhile for resources without an explicit
    /// gain.
    fn wants_gain_probe(&self, resource: &AudioResource) -> bool;
}

/// Probes the loudness-normalization adjustment for a play URI.
#[async_trait]
pub trait GainDetector: Send + Sync {
    /// Measure the decibel adjustment for `play_uri`.
    ///
    /// Implementations must watch `cancel` and return [`crate::Error::Aborted`]
    /// promptly once it fires, including when it is already cancelled on
    /// entry.
    async fn detect(&self, play_uri: &str, cancel: &CancellationToken) -> Result<i32>;
}

/// Opaque audio streaming backend.
///
/// The pipeline drives `play`/`stop` only from inside its exclusive
/// player section; `volume`/`length`/`position` may be read at any time.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Start streaming the resolved resource with the given decibel gain.
    async fn play(&self, resource: &PlayResource, gain: i32) -> Result<()>;

    /// Stop whatever is streaming.
    async fn stop(&self);

    /// Current output volume in [0.0, 1.0].
    async fn volume(&self) -> f32;

    /// Set the output volume.
    async fn set_volume(&self, volume: f32);

    /// Total length of the playing song, once parsed.
    async fn length(&self) -> Option<Duration>;

    /// Position within the playing song.
    async fn position(&self) -> Option<Duration>;
}

/// Persists probed resource updates back into their containing playlist.
#[async_trait]
pub trait PlaylistStore: Send + Sync {
    /// Replace `old` with `new` wherever it appears in the playlist.
    /// Best-effort; a failure is logged by the caller, never propagated.
    async fn splice_resource(
        &self,
        playlist_id: &str,
        old: &AudioResource,
        new: &AudioResource,
    ) -> Result<()>;
}

/// Supplies a follow-up entry when playback runs off the end of the queue.
#[async_trait]
pub trait StopRecovery: Send + Sync {
    /// Called under the manager's lock when the queue is exhausted; must
    /// not call back into the manager. Returning an item re-enqueues and
    /// starts it.
    async fn recover(&self, shadow_next: Option<QueueItem>) -> Option<QueueItem>;
}

/// Notifications surfaced by the audio player backend.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// The playing song ran out on its own
    SongEnd,
    /// The player finished parsing the song length
    SongLengthParsed(Duration),
    /// Stream metadata changed mid-song
    SongInfoChanged { title: String },
}
