//! Mock collaborators and event helpers for playback scenario tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use jukebot_common::events::PlaybackEvent;
use jukebot_common::types::{AudioResource, MetaData, PlayResource, QueueItem};
use jukebot_play::backend::{
    AudioPlayer, GainDetector, PlaylistStore, ResourceResolver, StopRecovery,
};
use jukebot_play::{Error, Result};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jukebot_play=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Build a queue item for resolver id `name` with source `source`.
pub fn item_from(name: &str, source: &str) -> QueueItem {
    QueueItem::new(
        AudioResource::new(name, source, format!("title of {name}")),
        MetaData::default(),
    )
}

pub fn item(name: &str) -> QueueItem {
    item_from(name, "file")
}

/// Resolver that serves `media://<id>` URIs and can be told to fail or
/// stall on specific ids.
#[derive(Default)]
pub struct MockResolver {
    /// Resource ids whose load fails
    pub fail_ids: HashSet<String>,
    /// Sources whose resources want a gain probe
    pub probe_sources: HashSet<String>,
    /// Per-id artificial load latency
    pub load_delays: HashMap<String, Duration>,
    load_calls: Mutex<HashMap<String, usize>>,
}

impl MockResolver {
    pub fn failing(ids: &[&str]) -> Self {
        Self {
            fail_ids: ids.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn probing(sources: &[&str]) -> Self {
        Self {
            probe_sources: sources.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn load_count(&self, id: &str) -> usize {
        self.load_calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ResourceResolver for MockResolver {
    async fn load(&self, resource: &AudioResource) -> Result<PlayResource> {
        *self
            .load_calls
            .lock()
            .unwrap()
            .entry(resource.resource_id.clone())
            .or_insert(0) += 1;
        if let Some(delay) = self.load_delays.get(&resource.resource_id) {
            tokio::time::sleep(*delay).await;
        }
        if self.fail_ids.contains(&resource.resource_id) {
            return Err(Error::Load(format!(
                "no such resource: {}",
                resource.resource_id
            )));
        }
        Ok(PlayResource::new(
            format!("media://{}", resource.resource_id),
            resource.clone(),
            MetaData::default(),
        ))
    }

    async fn restore_link(&self, resource: &AudioResource) -> Result<String> {
        Ok(format!("https://songs.example/{}", resource.resource_id))
    }

    fn wants_gain_probe(&self, resource: &AudioResource) -> bool {
        self.probe_sources.contains(&resource.source)
    }
}

/// Detector that always reports the same adjustment.
pub struct MockDetector {
    pub gain: i32,
    pub calls: AtomicUsize,
}

impl MockDetector {
    pub fn new(gain: i32) -> Self {
        Self {
            gain,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GainDetector for MockDetector {
    async fn detect(&self, _play_uri: &str, cancel: &CancellationToken) -> Result<i32> {
        if cancel.is_cancelled() {
            return Err(Error::Aborted);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.gain)
    }
}

/// Player that records every start and stop.
pub struct MockPlayer {
    plays: Mutex<Vec<(String, i32)>>,
    stops: AtomicUsize,
    volume: Mutex<f32>,
    pub length: Mutex<Option<Duration>>,
}

impl Default for MockPlayer {
    fn default() -> Self {
        Self {
            plays: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            volume: Mutex::new(0.5),
            length: Mutex::new(None),
        }
    }
}

impl MockPlayer {
    pub fn plays(&self) -> Vec<(String, i32)> {
        self.plays.lock().unwrap().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn current_volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }
}

#[async_trait]
impl AudioPlayer for MockPlayer {
    async fn play(&self, resource: &PlayResource, gain: i32) -> Result<()> {
        self.plays
            .lock()
            .unwrap()
            .push((resource.play_uri.clone(), gain));
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    async fn volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }

    async fn set_volume(&self, volume: f32) {
        *self.volume.lock().unwrap() = volume;
    }

    async fn length(&self) -> Option<Duration> {
        *self.length.lock().unwrap()
    }

    async fn position(&self) -> Option<Duration> {
        Some(Duration::ZERO)
    }
}

/// Playlist store that records every splice.
#[derive(Default)]
pub struct MockPlaylistStore {
    splices: Mutex<Vec<(String, Option<i32>, Option<i32>)>>,
}

impl MockPlaylistStore {
    /// Recorded splices as (playlist id, old gain, new gain).
    pub fn splices(&self) -> Vec<(String, Option<i32>, Option<i32>)> {
        self.splices.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlaylistStore for MockPlaylistStore {
    async fn splice_resource(
        &self,
        playlist_id: &str,
        old: &AudioResource,
        new: &AudioResource,
    ) -> Result<()> {
        self.splices
            .lock()
            .unwrap()
            .push((playlist_id.to_string(), old.gain, new.gain));
        Ok(())
    }
}

/// Recovery collaborator handing out one prepared follow-up entry.
pub struct MockRecovery {
    follow_up: Mutex<Option<QueueItem>>,
    pub seen_shadow: Mutex<Vec<Option<QueueItem>>>,
}

impl MockRecovery {
    pub fn with_follow_up(item: QueueItem) -> Self {
        Self {
            follow_up: Mutex::new(Some(item)),
            seen_shadow: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl StopRecovery for MockRecovery {
    async fn recover(&self, shadow_next: Option<QueueItem>) -> Option<QueueItem> {
        self.seen_shadow.lock().unwrap().push(shadow_next);
        self.follow_up.lock().unwrap().take()
    }
}

/// Wait for the next event of the given type, skipping everything else.
pub async fn next_event_of(
    rx: &mut broadcast::Receiver<PlaybackEvent>,
    kind: &str,
) -> PlaybackEvent {
    timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if event.event_type() == kind => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("event stream closed while waiting for {kind}")
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {kind}"))
}

/// Assert that no event of the given type arrives within `window`.
pub async fn expect_no_event_of(
    rx: &mut broadcast::Receiver<PlaybackEvent>,
    kind: &str,
    window: Duration,
) {
    let saw = timeout(window, async {
        loop {
            match rx.recv().await {
                Ok(event) if event.event_type() == kind => return,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(saw.is_err(), "unexpected {kind} event");
}
