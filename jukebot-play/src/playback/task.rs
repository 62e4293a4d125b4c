//! Background song-preparation attempt
//!
//! One [`StartSongTask`] is created per preparation attempt and never
//! reused. The attempt resolves its queue entry, fills in missing gain,
//! sleeps until its scheduled start, waits for the play gate, and finally
//! starts playback inside the shared player section. Every stage is a
//! cancellation point; a cancelled attempt never calls the player.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{AudioPlayer, GainDetector, ResourceResolver};
use crate::error::{Error, Result};
use crate::playback::wait::WaitTask;
use jukebot_common::types::{AudioResource, PlayResource, QueueItem};

/// Where a preparation attempt currently is in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStage {
    Analyzing,
    Waiting,
    GatedForPlay,
    Starting,
    Done,
    Cancelled,
    Failed,
}

/// Payload of the before/after-started notifications. Both carry the same
/// data so subscribers observing only one of the two stay consistent.
#[derive(Debug, Clone)]
pub struct PlayInfo {
    pub invoker: Option<String>,
    pub resource: PlayResource,
    pub source_url: String,
}

/// Feedback raised by a preparation attempt toward the orchestrator.
///
/// Every variant names the raising attempt; the orchestrator drops
/// anything whose attempt no longer holds the slot.
#[derive(Debug, Clone)]
pub(crate) enum TaskEvent {
    BeforeStarted {
        task_id: Uuid,
        item_id: Uuid,
        info: PlayInfo,
    },
    AfterStarted {
        task_id: Uuid,
        item_id: Uuid,
        info: PlayInfo,
    },
    LoadFailed {
        task_id: Uuid,
        item: QueueItem,
        error: Error,
    },
    ResourceUpdated {
        task_id: Uuid,
        item: QueueItem,
        resource: AudioResource,
    },
}

/// Everything a preparation attempt needs from the outside world.
pub(crate) struct TaskContext {
    pub resolver: Arc<dyn ResourceResolver>,
    pub gain: Arc<dyn GainDetector>,
    pub player: Arc<dyn AudioPlayer>,
    pub feedback: mpsc::UnboundedSender<TaskEvent>,
    /// Exclusive section shared with the orchestrator; serializes every
    /// `play()`/`stop()` against user commands.
    pub player_section: Arc<tokio::sync::Mutex<()>>,
    /// Player volume is clamped into these bounds right after a start.
    pub volume_bounds: (f32, f32),
}

/// Handle to one preparation attempt.
pub struct StartSongTask {
    id: Uuid,
    item: QueueItem,
    wait: Arc<WaitTask>,
    gate: watch::Sender<bool>,
    cancel: CancellationToken,
    stage: Arc<Mutex<TaskStage>>,
    worker: JoinHandle<()>,
}

impl StartSongTask {
    /// Spawn a fresh attempt for `item`, starting work after
    /// `initial_delay` (zero means immediately).
    pub(crate) fn spawn(ctx: Arc<TaskContext>, item: QueueItem, initial_delay: Duration) -> Self {
        let id = Uuid::new_v4();
        let wait = Arc::new(WaitTask::new(initial_delay));
        let (gate, gate_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let stage = Arc::new(Mutex::new(TaskStage::Analyzing));

        let worker = tokio::spawn(run_attempt(
            ctx,
            id,
            item.clone(),
            Arc::clone(&wait),
            gate_rx,
            cancel.clone(),
            Arc::clone(&stage),
        ));

        Self {
            id,
            item,
            wait,
            gate,
            cancel,
            stage,
            worker,
        }
    }

    /// Attempt identity; compared by the orchestrator to drop stale
    /// feedback.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The queue entry this attempt prepares.
    pub fn target(&self) -> &QueueItem {
        &self.item
    }

    pub fn stage(&self) -> TaskStage {
        *self.stage.lock().unwrap()
    }

    /// Reschedule the pre-start delay; effective even while the attempt is
    /// already sleeping on it.
    pub fn update_start_delay(&self, delay: Duration) {
        self.wait.update_wait_time(delay);
    }

    /// Open the play gate. Harmless when called more than once or after
    /// the attempt finished.
    pub fn allow_play(&self) {
        let _ = self.gate.send(true);
    }

    /// Request cooperative cancellation. Wakes the schedule wait and the
    /// play gate; the attempt aborts at its next cancellation point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the background worker has run to completion.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
}

async fn run_attempt(
    ctx: Arc<TaskContext>,
    id: Uuid,
    item: QueueItem,
    wait: Arc<WaitTask>,
    gate_rx: watch::Receiver<bool>,
    cancel: CancellationToken,
    stage: Arc<Mutex<TaskStage>>,
) {
    let set_stage = |s: TaskStage| *stage.lock().unwrap() = s;
    match prepare(&ctx, id, &item, &wait, gate_rx, &cancel, &set_stage).await {
        Ok(()) => {
            set_stage(TaskStage::Done);
            debug!(task = %id, item = %item.id(), "preparation attempt finished");
        }
        Err(Error::Aborted) => {
            set_stage(TaskStage::Cancelled);
            debug!(task = %id, item = %item.id(), "preparation attempt cancelled");
        }
        Err(error) => {
            set_stage(TaskStage::Failed);
            warn!(task = %id, item = %item.id(), %error, "preparation attempt failed");
            let _ = ctx.feedback.send(TaskEvent::LoadFailed {
                task_id: id,
                item: item.clone(),
                error,
            });
        }
    }
}

async fn prepare(
    ctx: &TaskContext,
    id: Uuid,
    item: &QueueItem,
    wait: &WaitTask,
    mut gate_rx: watch::Receiver<bool>,
    cancel: &CancellationToken,
    set_stage: &impl Fn(TaskStage),
) -> Result<()> {
    // Analyze: resolve the resource and fill in missing gain.
    let mut loaded = ctx
        .resolver
        .load(&item.resource)
        .await
        .map_err(into_load_error)?;
    // The invocation context (invoker, playlist, start offset) travels
    // with the play resource, not with whatever the resolver attached.
    loaded.meta = item.meta.clone();
    let source_url = ctx
        .resolver
        .restore_link(&loaded.base)
        .await
        .map_err(into_load_error)?;
    if cancel.is_cancelled() {
        return Err(Error::Aborted);
    }
    let play = fill_gain(ctx, id, item, loaded, cancel).await?;

    // Sleep until the scheduled start.
    set_stage(TaskStage::Waiting);
    wait.run(cancel).await?;

    // Wait for explicit permission to start.
    set_stage(TaskStage::GatedForPlay);
    tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Aborted),
        opened = gate_rx.wait_for(|open| *open) => {
            // A dropped gate means the handle is gone; treat as cancelled.
            if opened.is_err() {
                return Err(Error::Aborted);
            }
        }
    }

    // Start, atomically with respect to concurrent next/stop/clear.
    set_stage(TaskStage::Starting);
    let info = PlayInfo {
        invoker: item.meta.invoker.clone(),
        resource: play.clone(),
        source_url,
    };
    {
        let _section = ctx.player_section.lock().await;
        if cancel.is_cancelled() {
            return Err(Error::Aborted);
        }
        if play.play_uri.trim().is_empty() {
            return Err(Error::InvalidResource(
                "resolved play uri is empty".to_string(),
            ));
        }
        let gain = play.base.gain.unwrap_or(0);
        let _ = ctx.feedback.send(TaskEvent::BeforeStarted {
            task_id: id,
            item_id: item.id(),
            info: info.clone(),
        });
        ctx.player
            .play(&play, gain)
            .await
            .map_err(|e| Error::Start(e.to_string()))?;

        let (min, max) = ctx.volume_bounds;
        let volume = ctx.player.volume().await;
        let clamped = volume.clamp(min, max);
        if clamped != volume {
            ctx.player.set_volume(clamped).await;
        }

        let _ = ctx.feedback.send(TaskEvent::AfterStarted {
            task_id: id,
            item_id: item.id(),
            info,
        });
    }
    Ok(())
}

/// Probe the gain for resources whose backend sound-normalizes.
///
/// A successful probe yields an updated resource copy and a
/// resource-updated notification so the caller can persist the gain; a
/// probe failure other than cancellation is logged and playback proceeds
/// without gain.
async fn fill_gain(
    ctx: &TaskContext,
    id: Uuid,
    item: &QueueItem,
    loaded: PlayResource,
    cancel: &CancellationToken,
) -> Result<PlayResource> {
    if loaded.base.gain.is_some() || !ctx.resolver.wants_gain_probe(&loaded.base) {
        return Ok(loaded);
    }
    match ctx.gain.detect(&loaded.play_uri, cancel).await {
        Ok(decibel) => {
            let updated = loaded.base.with_gain(decibel);
            let _ = ctx.feedback.send(TaskEvent::ResourceUpdated {
                task_id: id,
                item: item.clone(),
                resource: updated.clone(),
            });
            Ok(PlayResource {
                base: updated,
                ..loaded
            })
        }
        Err(Error::Aborted) => Err(Error::Aborted),
        Err(error) => {
            warn!(task = %id, item = %item.id(), %error, "gain probe failed, playing without gain");
            Ok(loaded)
        }
    }
}

fn into_load_error(error: Error) -> Error {
    match error {
        Error::Aborted => Error::Aborted,
        Error::Load(msg) => Error::Load(msg),
        other => Error::Load(other.to_string()),
    }
}
