//! Change notifications
//!
//! Every event goes two ways:
//! - **EventBus:** broadcast to async subscribers (lossy, never blocks)
//! - **Listeners:** synchronous callbacks delivered through a `Dispatcher`
//!
//! A listener that fails or panics is logged and skipped; it can never
//! corrupt orchestrator state or stop delivery to the other listeners.

use mlm_common::events::{EventBus, ModelEvent};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Deferred unit of work
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Where listener callbacks run
pub trait Dispatcher: Send + Sync {
    fn post(&self, callback: Callback);
}

/// Runs callbacks immediately on the raising task
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn post(&self, callback: Callback) {
        callback();
    }
}

/// Queues callbacks for a host-owned loop (e.g. a UI thread)
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<Callback>,
}

/// Receiving end of a `ChannelDispatcher`
pub struct DispatchQueue {
    rx: mpsc::UnboundedReceiver<Callback>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, DispatchQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, DispatchQueue { rx })
    }
}

impl Dispatcher for ChannelDispatcher {
    fn post(&self, callback: Callback) {
        if self.tx.send(callback).is_err() {
            debug!("Dispatch queue closed; dropping notification");
        }
    }
}

impl DispatchQueue {
    /// Run queued callbacks until every dispatcher is dropped
    pub async fn run(mut self) {
        while let Some(callback) = self.rx.recv().await {
            callback();
        }
        debug!("Dispatch queue stopped");
    }

    /// Run whatever is queued right now; returns how many ran
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(callback) = self.rx.try_recv() {
            callback();
            ran += 1;
        }
        ran
    }
}

/// Synchronous event listener
pub type Listener = Arc<dyn Fn(&ModelEvent) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by `Notifier::subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Fans events out to listeners and the event bus
pub struct Notifier {
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
    dispatcher: Arc<dyn Dispatcher>,
    bus: EventBus,
}

impl Notifier {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, bus: EventBus) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            dispatcher,
            bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        id
    }

    /// Remove a listener; false when it was not subscribed
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Raise `event`
    ///
    /// Must not be called while holding a lock a listener could need.
    pub fn raise(&self, event: ModelEvent) {
        self.bus.emit_lossy(event.clone());

        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        if listeners.is_empty() {
            return;
        }
        self.dispatcher
            .post(Box::new(move || deliver(&listeners, &event)));
    }
}

fn deliver(listeners: &[Listener], event: &ModelEvent) {
    for listener in listeners {
        match catch_unwind(AssertUnwindSafe(|| listener(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                event = event.event_type(),
                error = %e,
                "Event listener failed"
            ),
            Err(_) => warn!(event = event.event_type(), "Event listener panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    fn started() -> ModelEvent {
        ModelEvent::TrainingStarted {
            round_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        }
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Listener {
        let counter = Arc::clone(counter);
        Arc::new(move |_event: &ModelEvent| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_failing_and_panicking_listeners_do_not_stop_delivery() {
        let notifier = Notifier::new(Arc::new(InlineDispatcher), EventBus::new(8));
        let counter = Arc::new(AtomicUsize::new(0));

        notifier.subscribe(Arc::new(|_event: &ModelEvent| -> anyhow::Result<()> {
            anyhow::bail!("listener broke")
        }));
        notifier.subscribe(Arc::new(|_event: &ModelEvent| -> anyhow::Result<()> {
            panic!("listener exploded")
        }));
        notifier.subscribe(counting(&counter));

        notifier.raise(started());
        notifier.raise(started());

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let notifier = Notifier::new(Arc::new(InlineDispatcher), EventBus::new(8));
        let counter = Arc::new(AtomicUsize::new(0));
        let id = notifier.subscribe(counting(&counter));

        notifier.raise(started());
        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        notifier.raise(started());

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_channel_dispatcher_defers_until_pumped() {
        let (dispatcher, mut queue) = ChannelDispatcher::new();
        let notifier = Notifier::new(Arc::new(dispatcher), EventBus::new(8));
        let counter = Arc::new(AtomicUsize::new(0));
        notifier.subscribe(counting(&counter));

        notifier.raise(started());
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        assert_eq!(queue.run_pending(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_events_reach_bus_subscribers() {
        let notifier = Notifier::new(Arc::new(InlineDispatcher), EventBus::new(8));
        let mut rx = notifier.bus().subscribe();

        notifier.raise(started());

        assert_eq!(rx.try_recv().unwrap().event_type(), "TrainingStarted");
    }
}
