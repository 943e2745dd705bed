//! Orchestrator services
//!
//! - `orchestrator`: round lifecycle, gate and data operations
//! - `publisher`: snapshot swap and availability signal
//! - `cancellable_task`: shared handle for one background round
//! - `notifier`: listener and event bus fan-out
//! - `data_commit` / `ingestion`: training buffer writes

pub mod cancellable_task;
pub mod data_commit;
pub mod ingestion;
pub mod notifier;
pub mod orchestrator;
pub mod publisher;

pub use cancellable_task::CancellableTask;
pub use notifier::{
    ChannelDispatcher, DispatchQueue, Dispatcher, InlineDispatcher, Listener, ListenerId, Notifier,
};
pub use orchestrator::{OrchestratorBuilder, TrainingOrchestrator};
pub use publisher::SnapshotPublisher;
