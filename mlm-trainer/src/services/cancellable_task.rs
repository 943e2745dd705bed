//! Background round handle
//!
//! Pairs a spawned training round with its own cancellation token (a child
//! of the token it was launched under). The outcome is shared: any number
//! of callers can await the same round and observe the same result.

use crate::error::{TrainerError, TrainerResult};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Clone)]
pub struct CancellableTask {
    id: Uuid,
    started_at: DateTime<Utc>,
    token: CancellationToken,
    outcome: Shared<BoxFuture<'static, TrainerResult<()>>>,
    handle: AbortHandle,
}

impl CancellableTask {
    /// Spawn `round` under a child of `parent`
    ///
    /// The closure receives the round id and the round's own token.
    pub fn spawn<F, Fut>(parent: &CancellationToken, round: F) -> Self
    where
        F: FnOnce(Uuid, CancellationToken) -> Fut,
        Fut: Future<Output = TrainerResult<()>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let token = parent.child_token();
        let join = tokio::spawn(round(id, token.clone()));
        let handle = join.abort_handle();

        let outcome = async move {
            match join.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(TrainerError::Cancelled),
                Err(e) => Err(TrainerError::Internal(format!(
                    "training round panicked: {}",
                    e
                ))),
            }
        }
        .boxed()
        .shared();

        Self {
            id,
            started_at: Utc::now(),
            token,
            outcome,
            handle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The round's own token
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once the spawned round has returned (or panicked)
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Await the round's outcome
    pub async fn wait(&self) -> TrainerResult<()> {
        self.outcome.clone().await
    }

    /// Cancel and await; cancellation is not an error here
    pub async fn stop(&self) -> TrainerResult<()> {
        self.cancel();
        match self.wait().await {
            Err(TrainerError::Cancelled) => Ok(()),
            other => other,
        }
    }
}

impl std::fmt::Debug for CancellableTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellableTask")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .field("cancelled", &self.token.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_every_waiter_sees_the_same_outcome() {
        let parent = CancellationToken::new();
        let task = CancellableTask::spawn(&parent, |_id, _token| async {
            Err::<(), _>(TrainerError::InvalidState("boom".to_string()))
        });

        let (a, b) = tokio::join!(task.wait(), task.wait());
        assert!(matches!(a, Err(TrainerError::InvalidState(_))));
        assert!(matches!(b, Err(TrainerError::InvalidState(_))));
        assert!(task.is_finished());
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_round() {
        let parent = CancellationToken::new();
        let task = CancellableTask::spawn(&parent, |_id, token| async move {
            token.cancelled().await;
            Err::<(), _>(TrainerError::Cancelled)
        });

        parent.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), task.wait())
            .await
            .unwrap();
        assert!(matches!(result, Err(TrainerError::Cancelled)));
    }

    #[tokio::test]
    async fn test_stop_swallows_cancellation_only() {
        let parent = CancellationToken::new();
        let task = CancellableTask::spawn(&parent, |_id, token| async move {
            token.cancelled().await;
            Err::<(), _>(TrainerError::Cancelled)
        });
        assert!(task.stop().await.is_ok());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_panicking_round_reports_internal_error() {
        let parent = CancellationToken::new();
        let task = CancellableTask::spawn(&parent, |_id, _token| async {
            if std::hint::black_box(true) {
                panic!("round exploded");
            }
            Ok::<(), TrainerError>(())
        });

        let result = task.wait().await;
        assert!(matches!(result, Err(TrainerError::Internal(_))));
        assert!(task.is_finished());
    }
}
