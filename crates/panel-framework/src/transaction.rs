//! # Transaction Runner
//!
//! Wraps a unit of work in an atomic transaction and hands it a freshly minted
//! [`BatchId`] so every side effect of the unit can be correlated.
//!
//! ## Contract
//!
//! 1. Begin a transaction on the injected [`TransactionalConnection`].
//! 2. Mint a batch id and pass it to `work`.
//! 3. On success, run `on_committed(batch_id)` (if any) while the transaction
//!    is still open, then commit and return `work`'s value unchanged.
//! 4. On any failure (from `work`, the hook, or the commit), roll back and
//!    return the original error unmodified.
//!
//! There is no retry. The runner guarantees atomicity, not resilience.

use crate::error::PanelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::future::{self, Future, Ready};
use tracing::{debug, error, info, warn};
use ulid::Ulid;
use uuid::Uuid;

/// Correlation id for one transactional action batch.
///
/// Time-ordered: the leading bits are a millisecond timestamp, so the
/// hyphenated string form sorts lexically by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::from(Ulid::new()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// The `begin/commit/rollback` primitive storage must provide.
#[async_trait]
pub trait TransactionalConnection: Send + Sync {
    async fn begin(&self) -> Result<(), PanelError>;
    async fn commit(&self) -> Result<(), PanelError>;
    async fn rollback(&self) -> Result<(), PanelError>;
}

type NoHook<E> = fn(BatchId) -> Ready<Result<(), E>>;

/// Runs units of work atomically against one connection.
#[derive(Clone)]
pub struct TransactionRunner<C: TransactionalConnection> {
    connection: C,
}

impl<C: TransactionalConnection> TransactionRunner<C> {
    pub fn new(connection: C) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Runs `work` inside a transaction with no post-work hook.
    pub async fn run<T, E, W, WF>(&self, work: W) -> Result<T, E>
    where
        W: FnOnce(BatchId) -> WF,
        WF: Future<Output = Result<T, E>>,
        E: From<PanelError> + Display,
    {
        self.run_with(work, None::<NoHook<E>>).await
    }

    /// Runs `work` inside a transaction; `on_committed` runs after the work
    /// succeeds and before the commit finalizes.
    pub async fn run_with<T, E, W, WF, F, FF>(&self, work: W, on_committed: Option<F>) -> Result<T, E>
    where
        W: FnOnce(BatchId) -> WF,
        WF: Future<Output = Result<T, E>>,
        F: FnOnce(BatchId) -> FF,
        FF: Future<Output = Result<(), E>>,
        E: From<PanelError> + Display,
    {
        // Nothing has been opened if begin fails, so there is nothing to roll back.
        self.connection.begin().await?;

        let batch_id = BatchId::new();
        debug!(%batch_id, "Transaction started");

        let outcome: Result<T, E> = async {
            let value = work(batch_id).await?;
            if let Some(finished) = on_committed {
                finished(batch_id).await?;
            }
            self.connection.commit().await?;
            Ok(value)
        }
        .await;

        match outcome {
            Ok(value) => {
                info!(%batch_id, "Transaction committed");
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_error) = self.connection.rollback().await {
                    error!(%batch_id, error = %rollback_error, "Rollback failed");
                }
                warn!(%batch_id, error = %e, "Transaction rolled back");
                Err(e)
            }
        }
    }
}

/// Convenience for hooks that never fail.
pub fn committed<E>() -> Ready<Result<(), E>> {
    future::ready(Ok(()))
}
