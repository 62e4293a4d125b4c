//! Playback pipeline: queue, preparation tasks, orchestration

pub mod host;
pub mod manager;
pub mod queue;
pub mod task;
pub mod wait;

pub use host::{StartSongTaskHost, TaskRole};
pub use manager::PlayManager;
pub use queue::PlayQueue;
pub use task::{PlayInfo, StartSongTask, TaskStage};
pub use wait::WaitTask;
