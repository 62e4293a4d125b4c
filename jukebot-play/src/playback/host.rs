//! Single-slot owner of the active preparation attempt
//!
//! The host holds at most one [`StartSongTask`] at a time and tracks
//! whether it targets the current entry or the prefetched next one. Every
//! install path synchronously cancels whatever was previously held, which
//! is the core concurrency invariant of the pipeline: no two attempts are
//! ever live at once.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::playback::task::{StartSongTask, TaskContext};
use jukebot_common::types::QueueItem;

/// Which queue position the held attempt is preparing for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRole {
    /// Preparing the entry at the queue cursor
    Current,
    /// Prefetching the entry behind the cursor (or the shadow entry)
    Next,
}

/// Owns the preparation slot and the shadow-next placeholder.
///
/// Driven only under the manager's lock; no interior synchronization.
pub struct StartSongTaskHost {
    ctx: Arc<TaskContext>,
    /// How far before the projected song end the next preparation starts
    lead_time: Duration,
    slot: Option<(StartSongTask, TaskRole)>,
    /// Prefetch target remembered independently of a live attempt; kept
    /// after the attempt completes so an empty queue can still stage a
    /// song for enqueue-and-play.
    shadow_next: Option<QueueItem>,
    cancellations: u64,
}

impl StartSongTaskHost {
    pub(crate) fn new(ctx: Arc<TaskContext>, lead_time: Duration) -> Self {
        Self {
            ctx,
            lead_time,
            slot: None,
            shadow_next: None,
            cancellations: 0,
        }
    }

    /// Prepare `item` as the current song.
    ///
    /// Clears the shadow placeholder. If the held attempt already targets
    /// `item` it is kept, its delay rescheduled, and its role flipped to
    /// current; otherwise the held attempt is cancelled and a fresh one
    /// installed.
    pub fn set_current_song(&mut self, item: &QueueItem, remaining: Option<Duration>) {
        self.shadow_next = None;
        if let Some((task, role)) = &mut self.slot {
            if task.target().id() == item.id() {
                task.update_start_delay(start_delay(remaining, self.lead_time));
                *role = TaskRole::Current;
                return;
            }
        }
        self.install(item.clone(), TaskRole::Current, remaining);
    }

    /// Prepare `item` as the next song.
    ///
    /// A held attempt that already targets `item` only gets its delay
    /// rescheduled. A held current-song attempt is never preempted by a
    /// prefetch request. Otherwise the held attempt is cancelled and a
    /// fresh prefetch installed, remembering `item` as the shadow entry.
    pub fn set_next_song(&mut self, item: &QueueItem, remaining: Option<Duration>) {
        if let Some((task, role)) = &self.slot {
            if task.target().id() == item.id() {
                task.update_start_delay(start_delay(remaining, self.lead_time));
                return;
            }
            if *role == TaskRole::Current {
                return;
            }
        }
        self.shadow_next = Some(item.clone());
        self.install(item.clone(), TaskRole::Next, remaining);
    }

    /// Open the held attempt's play gate.
    pub fn play_current_when_finished(&self) {
        match &self.slot {
            Some((task, _)) => task.allow_play(),
            None => {
                debug_assert!(false, "play requested with no preparation attempt held");
                warn!("play requested with no preparation attempt held");
            }
        }
    }

    /// Reschedule the held attempt from a fresh remaining-song-time
    /// estimate.
    pub fn update_remaining(&self, remaining: Duration) {
        if let Some((task, _)) = &self.slot {
            task.update_start_delay(remaining.saturating_sub(self.lead_time));
        }
    }

    /// Cancel and discard the held attempt and the shadow placeholder.
    pub fn clear_task(&mut self) {
        self.shadow_next = None;
        self.drop_cancelled();
    }

    /// Discard the slot without cancelling; the attempt has already
    /// completed. A finished prefetch also consumes the shadow
    /// placeholder.
    pub fn remove_finished_task(&mut self) {
        if let Some((task, role)) = self.slot.take() {
            debug!(task = %task.id(), "releasing finished preparation attempt");
            if role == TaskRole::Next {
                self.shadow_next = None;
            }
        }
    }

    pub fn held_task(&self) -> Option<(&StartSongTask, TaskRole)> {
        self.slot.as_ref().map(|(task, role)| (task, *role))
    }

    pub fn held_task_id(&self) -> Option<Uuid> {
        self.slot.as_ref().map(|(task, _)| task.id())
    }

    pub fn role(&self) -> Option<TaskRole> {
        self.slot.as_ref().map(|(_, role)| *role)
    }

    pub fn is_preparing_current(&self) -> bool {
        self.role() == Some(TaskRole::Current)
    }

    pub fn shadow_next(&self) -> Option<&QueueItem> {
        self.shadow_next.as_ref()
    }

    /// Number of attempts cancelled by supersede or clear. Increments only
    /// on an actual cancellation, never on a same-target reschedule.
    pub fn cancellations(&self) -> u64 {
        self.cancellations
    }

    fn install(&mut self, item: QueueItem, role: TaskRole, remaining: Option<Duration>) {
        self.drop_cancelled();
        debug_assert!(self.slot.is_none(), "a second preparation attempt would go live");
        let task = StartSongTask::spawn(
            Arc::clone(&self.ctx),
            item,
            start_delay(remaining, self.lead_time),
        );
        debug!(task = %task.id(), ?role, item = %task.target().id(), "installed preparation attempt");
        self.slot = Some((task, role));
    }

    fn drop_cancelled(&mut self) {
        if let Some((task, role)) = self.slot.take() {
            debug!(task = %task.id(), ?role, "cancelling superseded preparation attempt");
            task.cancel();
            self.cancellations += 1;
        }
    }
}

/// Start early enough that preparation finishes before the current song
/// ends; without an estimate, start immediately.
fn start_delay(remaining: Option<Duration>, lead_time: Duration) -> Duration {
    remaining
        .map(|r| r.saturating_sub(lead_time))
        .unwrap_or(Duration::ZERO)
}
