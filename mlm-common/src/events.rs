//! Event types for the MLM event system
//!
//! Provides the shared event definitions and the EventBus used by the training
//! orchestrator and anything that hosts it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Why the training data changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataChangeReason {
    /// Rows were appended to the training buffer
    RowsAdded,
    /// The training buffer was merged into the primary data store
    Committed,
    /// The training buffer was emptied
    Cleared,
}

impl std::fmt::Display for DataChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataChangeReason::RowsAdded => write!(f, "RowsAdded"),
            DataChangeReason::Committed => write!(f, "Committed"),
            DataChangeReason::Cleared => write!(f, "Cleared"),
        }
    }
}

/// MLM event types
///
/// Events are delivered to registered listeners and broadcast via EventBus.
/// All events can be serialized for transmission to remote hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ModelEvent {
    /// A new evaluator snapshot was published
    ///
    /// Triggers:
    /// - Hosts: refresh anything derived from the live model
    ModelChanged {
        /// Generation of the snapshot that became current
        generation: u64,
        /// Whether the snapshot carries a trained model
        has_model: bool,
        /// Human readable evaluation of the published model, if any
        evaluation: Option<String>,
        /// When the snapshot was published
        timestamp: DateTime<Utc>,
    },

    /// Training data changed (buffer append, commit or clear)
    TrainingDataChanged {
        /// What happened to the data
        reason: DataChangeReason,
        /// Rows affected by the change
        rows: usize,
        /// When the change completed
        timestamp: DateTime<Utc>,
    },

    /// A training round started
    TrainingStarted {
        /// Round identifier
        round_id: Uuid,
        /// When the round started
        timestamp: DateTime<Utc>,
    },

    /// A training round ended, for whatever reason
    TrainingEnded {
        /// Round identifier
        round_id: Uuid,
        /// Training attempts made during the round
        attempts: u32,
        /// When the round ended
        timestamp: DateTime<Utc>,
    },
}

impl ModelEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            ModelEvent::ModelChanged { .. } => "ModelChanged",
            ModelEvent::TrainingDataChanged { .. } => "TrainingDataChanged",
            ModelEvent::TrainingStarted { .. } => "TrainingStarted",
            ModelEvent::TrainingEnded { .. } => "TrainingEnded",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use mlm_common::events::{EventBus, ModelEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(ModelEvent::TrainingStarted {
///     round_id: uuid::Uuid::new_v4(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// let received = rx.try_recv().unwrap();
/// assert_eq!(received.event_type(), "TrainingStarted");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ModelEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ModelEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ModelEvent,
    ) -> Result<usize, broadcast::error::SendError<ModelEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ModelEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
