//! Core playback data model shared across jukebot services

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// A playable resource as understood by a resolver backend.
///
/// Immutable once built; updates (e.g. a probed gain) produce a copy via
/// [`AudioResource::with_gain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioResource {
    /// Backend-specific identifier (file path, video id, stream URL, ...)
    pub resource_id: String,

    /// Name of the resolver backend that owns `resource_id`
    pub source: String,

    /// Display title
    pub title: String,

    /// Loudness-normalization adjustment in decibels, if known
    pub gain: Option<i32>,

    /// Whether the title was set by a user rather than the resolver
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_is_user_set: Option<bool>,

    /// Backend-specific extras (quality hints, cookies, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional: Option<BTreeMap<String, String>>,
}

impl AudioResource {
    pub fn new(
        resource_id: impl Into<String>,
        source: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            source: source.into(),
            title: title.into(),
            gain: None,
            title_is_user_set: None,
            additional: None,
        }
    }

    /// Returns a copy of this resource with the given gain filled in.
    pub fn with_gain(&self, gain: i32) -> Self {
        let mut updated = self.clone();
        updated.gain = Some(gain);
        updated
    }
}

/// Invocation context attached to a queue entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaData {
    /// Chat-server uid of the user that requested this entry
    pub invoker: Option<String>,

    /// Playlist the entry came from, if any
    pub playlist_id: Option<String>,

    /// Offset at which playback should begin
    pub start_offset: Option<Duration>,
}

/// A queue entry: a resource paired with its invocation metadata.
///
/// Identity is the `id` assigned at construction. Two entries with equal
/// contents but different ids are distinct entries; the preparation
/// pipeline uses this to decide whether a running attempt already targets
/// "this" entry. Cloning preserves the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    id: Uuid,
    pub resource: AudioResource,
    pub meta: MetaData,
}

impl QueueItem {
    pub fn new(resource: AudioResource, meta: MetaData) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource,
            meta,
        }
    }

    /// Identity of this entry.
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for QueueItem {}

/// Resolver output: everything the player needs to open a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayResource {
    /// URI the player can open directly
    pub play_uri: String,

    /// The (possibly updated) resource this was resolved from
    pub base: AudioResource,

    /// Invocation metadata carried through resolution
    pub meta: MetaData,
}

impl PlayResource {
    pub fn new(play_uri: impl Into<String>, base: AudioResource, meta: MetaData) -> Self {
        Self {
            play_uri: play_uri.into(),
            base,
            meta,
        }
    }
}
