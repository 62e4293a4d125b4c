//! Playback orchestration
//!
//! [`PlayManager`] owns the queue and the preparation slot behind one
//! exclusive lock, reacts to player events and to user commands, and
//! re-evaluates the prefetch target after every queue mutation. A second,
//! shared player section serializes every `play()`/`stop()` call between
//! user commands and the start stage of a preparation attempt, so no two
//! attempts ever drive the player concurrently and a cancelled attempt is
//! dropped before it can start.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{
    AudioPlayer, GainDetector, PlayerEvent, PlaylistStore, ResourceResolver, StopRecovery,
};
use crate::error::{Error, Result};
use crate::playback::host::{StartSongTaskHost, TaskRole};
use crate::playback::queue::PlayQueue;
use crate::playback::task::{PlayInfo, TaskContext, TaskEvent};
use jukebot_common::config::PlaybackConfig;
use jukebot_common::events::{EventBus, PlaybackEvent};
use jukebot_common::types::QueueItem;

/// External collaborators the orchestrator drives.
pub struct Backends {
    pub resolver: Arc<dyn ResourceResolver>,
    pub gain: Arc<dyn GainDetector>,
    pub player: Arc<dyn AudioPlayer>,
    /// Receives probed gain updates for playlist-backed entries
    pub playlists: Option<Arc<dyn PlaylistStore>>,
    /// Supplies a follow-up entry when the queue runs out
    pub recovery: Option<Arc<dyn StopRecovery>>,
}

/// What is currently playing, as visible to the outside.
#[derive(Debug, Clone)]
pub struct CurrentPlayData {
    /// Identity of the queue entry whose playback started
    pub item_id: Uuid,
    /// The resolved resource and its invocation context
    pub info: PlayInfo,
}

/// State guarded by the manager lock.
struct Inner {
    queue: PlayQueue,
    host: StartSongTaskHost,
    current: Option<CurrentPlayData>,
    auto_start: bool,
}

/// Playback orchestrator.
pub struct PlayManager {
    inner: Arc<Mutex<Inner>>,
    bus: EventBus,
    player: Arc<dyn AudioPlayer>,
    playlists: Option<Arc<dyn PlaylistStore>>,
    recovery: Option<Arc<dyn StopRecovery>>,
    /// Shared with preparation attempts; see module docs
    player_section: Arc<Mutex<()>>,
}

impl PlayManager {
    /// Create the orchestrator and start its feedback pump.
    pub fn new(config: PlaybackConfig, backends: Backends) -> Arc<Self> {
        let bus = EventBus::new(config.event_capacity);
        let (feedback_tx, mut feedback_rx) = mpsc::unbounded_channel();
        let player_section = Arc::new(Mutex::new(()));

        let ctx = Arc::new(TaskContext {
            resolver: backends.resolver,
            gain: backends.gain,
            player: Arc::clone(&backends.player),
            feedback: feedback_tx,
            player_section: Arc::clone(&player_section),
            volume_bounds: (config.volume_min, config.volume_max),
        });
        let host = StartSongTaskHost::new(ctx, config.prefetch_lead());

        let manager = Arc::new(Self {
            inner: Arc::new(Mutex::new(Inner {
                queue: PlayQueue::new(),
                host,
                current: None,
                auto_start: config.auto_start_playing,
            })),
            bus,
            player: backends.player,
            playlists: backends.playlists,
            recovery: backends.recovery,
            player_section,
        });

        let pump = Arc::clone(&manager);
        tokio::spawn(async move {
            while let Some(event) = feedback_rx.recv().await {
                pump.handle_task_event(event).await;
            }
        });

        manager
    }

    /// Subscribe to playback notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.bus.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    // ---- user commands -------------------------------------------------

    /// Append an entry; starts it when the queue was idle and auto-start
    /// is on.
    pub async fn enqueue(&self, item: QueueItem) {
        let mut inner = self.inner.lock().await;
        inner.queue.enqueue(item);
        self.emit_queue_changed(&inner);
        self.try_auto_start(&mut inner);
        self.update_prefetch(&mut inner).await;
    }

    /// Append several entries with a single queue-changed notification.
    pub async fn enqueue_all(&self, items: Vec<QueueItem>) {
        if items.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().await;
        inner.queue.enqueue_all(items);
        self.emit_queue_changed(&inner);
        self.try_auto_start(&mut inner);
        self.update_prefetch(&mut inner).await;
    }

    /// Stage an entry directly behind the current one.
    pub async fn play_after_current(&self, item: QueueItem) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.queue.insert_after_current(item)?;
        self.emit_queue_changed(&inner);
        self.update_prefetch(&mut inner).await;
        Ok(())
    }

    /// Remove the entry at `at`; the current entry cannot be removed.
    pub async fn remove(&self, at: usize) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let index_moved = inner.queue.remove(at)?;
        self.emit_queue_changed(&inner);
        if index_moved {
            self.emit_index_changed(&inner);
        }
        self.update_prefetch(&mut inner).await;
        Ok(())
    }

    /// Remove the inclusive range `from..=to` of entries.
    pub async fn remove_range(&self, from: usize, to: usize) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let index_moved = inner.queue.remove_range(from, to)?;
        self.emit_queue_changed(&inner);
        if index_moved {
            self.emit_index_changed(&inner);
        }
        self.update_prefetch(&mut inner).await;
        Ok(())
    }

    /// Skip forward by `count` entries.
    pub async fn next(&self, count: usize) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.advance(&mut inner, count).await
    }

    /// Step back to the previous entry.
    pub async fn previous(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.queue.index() == 0 {
            return Err(Error::Queue("there is no previous entry".to_string()));
        }
        self.stop_playing(&mut inner, true).await;
        inner.queue.previous();
        self.emit_index_changed(&inner);
        self.start_current(&mut inner);
        self.update_prefetch(&mut inner).await;
        Ok(())
    }

    /// Drop the whole queue and stop playback.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        let shadow = inner.host.shadow_next().cloned();
        self.stop_playing(&mut inner, true).await;
        inner.queue.clear();
        inner.host.clear_task();
        self.emit_queue_changed(&inner);
        self.emit_index_changed(&inner);
        self.raise_playback_stopped(&mut inner, shadow).await;
    }

    /// Stop playback and discard any preparation, leaving the queue
    /// untouched.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        self.stop_playing(&mut inner, true).await;
        inner.host.clear_task();
    }

    // ---- player callbacks ----------------------------------------------

    /// The playing song ran out on its own.
    pub async fn on_song_end(&self) {
        let mut inner = self.inner.lock().await;
        if inner.current.take().is_some() {
            self.emit(PlaybackEvent::ResourceStopped {
                explicit: false,
                timestamp: Utc::now(),
            });
        }
        // End of queue is not an error here
        if let Err(error) = self.advance(&mut inner, 1).await {
            debug!(%error, "song ended with nothing left to play");
        }
    }

    /// The player finished parsing the song length; reschedule the
    /// prefetch from the fresh estimate.
    pub async fn on_song_length_parsed(&self, length: Duration) {
        let inner = self.inner.lock().await;
        let position = self.player.position().await.unwrap_or_default();
        inner.host.update_remaining(length.saturating_sub(position));
    }

    /// Stream metadata changed mid-song.
    pub async fn on_song_info_changed(&self, title: String) {
        let inner = self.inner.lock().await;
        if inner.current.is_some() {
            self.emit(PlaybackEvent::ResourceUpdated {
                title,
                timestamp: Utc::now(),
            });
        }
    }

    /// Forward a channel of player notifications into the callbacks above.
    pub fn drive_player_events(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<PlayerEvent>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    PlayerEvent::SongEnd => manager.on_song_end().await,
                    PlayerEvent::SongLengthParsed(length) => {
                        manager.on_song_length_parsed(length).await
                    }
                    PlayerEvent::SongInfoChanged { title } => {
                        manager.on_song_info_changed(title).await
                    }
                }
            }
        });
    }

    // ---- introspection -------------------------------------------------

    pub async fn is_playing(&self) -> bool {
        self.inner.lock().await.current.is_some()
    }

    pub async fn current_play_data(&self) -> Option<CurrentPlayData> {
        self.inner.lock().await.current.clone()
    }

    pub async fn auto_start(&self) -> bool {
        self.inner.lock().await.auto_start
    }

    pub async fn set_auto_start(&self, auto_start: bool) {
        self.inner.lock().await.auto_start = auto_start;
    }

    pub async fn queue_items(&self) -> Vec<QueueItem> {
        self.inner.lock().await.queue.items().to_vec()
    }

    pub async fn queue_len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn queue_index(&self) -> usize {
        self.inner.lock().await.queue.index()
    }

    /// Whether a preparation attempt is currently held.
    pub async fn has_preparation(&self) -> bool {
        self.inner.lock().await.host.held_task().is_some()
    }

    /// Attempts cancelled by supersede or clear so far.
    pub async fn preparation_cancellations(&self) -> u64 {
        self.inner.lock().await.host.cancellations()
    }

    // ---- internals (all called with the lock held) ---------------------

    /// Skip forward: stop what plays, move the cursor, start or wind down.
    async fn advance(&self, inner: &mut MutexGuard<'_, Inner>, count: usize) -> Result<()> {
        if !inner.queue.can_skip(count) {
            return Err(Error::Queue(format!(
                "cannot skip {count} of {} remaining entries",
                inner.queue.len().saturating_sub(inner.queue.index())
            )));
        }
        self.stop_playing(inner, true).await;
        let has_current = inner.queue.skip(count);
        self.emit_index_changed(inner);
        if has_current {
            self.start_current(inner);
        } else {
            let shadow = inner.host.shadow_next().cloned();
            self.raise_playback_stopped(inner, shadow).await;
        }
        self.update_prefetch(inner).await;
        Ok(())
    }

    /// Cancel an in-flight preparation of the current entry and stop the
    /// player if something is actually playing.
    ///
    /// After cancelling, the player section is entered even when nothing
    /// is known to play: an attempt that slipped past its final
    /// cancellation check has then already started the player, and
    /// serializing behind it lets the stop land after its start.
    async fn stop_playing(&self, inner: &mut MutexGuard<'_, Inner>, explicit: bool) {
        let cancel_preparation = match (inner.queue.current(), inner.host.held_task()) {
            (Some(current), Some((task, TaskRole::Current))) => task.target().id() == current.id(),
            _ => false,
        };
        if cancel_preparation {
            inner.host.clear_task();
        }
        let was_playing = inner.current.take().is_some();
        if cancel_preparation || was_playing {
            let _section = self.player_section.lock().await;
            self.player.stop().await;
            if was_playing {
                self.emit(PlaybackEvent::ResourceStopped {
                    explicit,
                    timestamp: Utc::now(),
                });
            }
        }
    }

    /// Request preparation of the queue's current entry and let it start
    /// as soon as it is ready.
    fn start_current(&self, inner: &mut MutexGuard<'_, Inner>) {
        let Some(item) = inner.queue.current().cloned() else {
            debug_assert!(false, "start requested without a current entry");
            return;
        };
        inner.host.set_current_song(&item, None);
        inner.host.play_current_when_finished();
    }

    /// Start the freshly enqueued entry when the queue was idle.
    fn try_auto_start(&self, inner: &mut MutexGuard<'_, Inner>) {
        if inner.current.is_some() || !inner.auto_start || inner.host.is_preparing_current() {
            return;
        }
        if inner.queue.current().is_some() {
            self.start_current(inner);
        }
    }

    /// Re-evaluate what should be prefetched; called after every queue
    /// mutation and after a song starts.
    async fn update_prefetch(&self, inner: &mut MutexGuard<'_, Inner>) {
        let wanted = inner
            .queue
            .next_item()
            .cloned()
            .or_else(|| inner.host.shadow_next().cloned());
        match wanted {
            None => {
                if inner.host.role() == Some(TaskRole::Next) {
                    inner.host.clear_task();
                }
            }
            Some(item) => {
                let remaining = self.remaining_play_time(inner).await;
                inner.host.set_next_song(&item, remaining);
            }
        }
    }

    /// How much of the current song is left, when the player knows.
    async fn remaining_play_time(&self, inner: &Inner) -> Option<Duration> {
        if inner.current.is_none() {
            return None;
        }
        let length = self.player.length().await?;
        let position = self.player.position().await.unwrap_or_default();
        Some(length.saturating_sub(position))
    }

    /// The queue ran out; announce it and let the recovery collaborator
    /// stage a follow-up.
    async fn raise_playback_stopped(
        &self,
        inner: &mut MutexGuard<'_, Inner>,
        shadow: Option<QueueItem>,
    ) {
        info!("playback stopped, queue exhausted");
        self.emit(PlaybackEvent::PlaybackStopped {
            shadow_next: shadow.clone(),
            timestamp: Utc::now(),
        });
        if let Some(recovery) = &self.recovery {
            if let Some(item) = recovery.recover(shadow).await {
                debug!(item = %item.id(), "recovery supplied a follow-up entry");
                inner.queue.enqueue(item);
                self.emit_queue_changed(inner);
                if inner.queue.current().is_some() {
                    self.start_current(inner);
                }
            }
        }
    }

    /// Feedback from a preparation attempt. Anything raised by an attempt
    /// that no longer holds the slot is stale and dropped.
    async fn handle_task_event(&self, event: TaskEvent) {
        match event {
            TaskEvent::BeforeStarted { task_id, info, .. } => {
                let inner = self.inner.lock().await;
                if inner.host.held_task_id() != Some(task_id) {
                    debug!(task = %task_id, "dropping stale before-started");
                    return;
                }
                self.emit(PlaybackEvent::BeforeResourceStarted {
                    invoker: info.invoker,
                    resource: info.resource,
                    source_url: info.source_url,
                    timestamp: Utc::now(),
                });
            }
            TaskEvent::AfterStarted {
                task_id,
                item_id,
                info,
            } => {
                let mut inner = self.inner.lock().await;
                if inner.host.held_task_id() != Some(task_id) {
                    debug!(task = %task_id, "dropping stale after-started");
                    return;
                }
                inner.host.remove_finished_task();
                inner.current = Some(CurrentPlayData {
                    item_id,
                    info: info.clone(),
                });
                info!(item = %item_id, title = %info.resource.base.title, "resource started");
                self.emit(PlaybackEvent::AfterResourceStarted {
                    invoker: info.invoker,
                    resource: info.resource,
                    source_url: info.source_url,
                    timestamp: Utc::now(),
                });
                self.update_prefetch(&mut inner).await;
            }
            TaskEvent::LoadFailed {
                task_id,
                item,
                error,
            } => {
                let mut inner = self.inner.lock().await;
                if inner.host.held_task_id() != Some(task_id) {
                    debug!(task = %task_id, "dropping stale load failure");
                    return;
                }
                warn!(item = %item.id(), %error, "song preparation failed, skipping entry");
                inner.host.remove_finished_task();
                // One failure, one advance; never a retry loop
                if let Err(error) = self.advance(&mut inner, 1).await {
                    debug!(%error, "cannot advance past the failed entry");
                }
            }
            TaskEvent::ResourceUpdated { item, resource, .. } => {
                // Valid even when the attempt has since been superseded:
                // the probed gain is worth persisting either way.
                if let Some(playlists) = &self.playlists {
                    if let Some(playlist_id) = item.meta.playlist_id.as_deref() {
                        if let Err(error) = playlists
                            .splice_resource(playlist_id, &item.resource, &resource)
                            .await
                        {
                            warn!(playlist = %playlist_id, %error, "failed to persist updated resource");
                        }
                    }
                }
            }
        }
    }

    // ---- event emission ------------------------------------------------

    fn emit(&self, event: PlaybackEvent) {
        self.bus.emit_lossy(event);
    }

    fn emit_queue_changed(&self, inner: &Inner) {
        self.emit(PlaybackEvent::QueueChanged {
            len: inner.queue.len(),
            timestamp: Utc::now(),
        });
    }

    fn emit_index_changed(&self, inner: &Inner) {
        self.emit(PlaybackEvent::QueueIndexChanged {
            index: inner.queue.index(),
            timestamp: Utc::now(),
        });
    }
}
