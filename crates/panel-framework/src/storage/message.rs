//! # Storage Messages
//!
//! The request types exchanged between [`StorageClient`](super::StorageClient)
//! and [`StorageActor`](super::StorageActor).

use super::row::{Attributes, Row};
use crate::error::PanelError;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

/// Type alias for the one-shot response channel used by the storage actor.
pub type Response<T> = oneshot::Sender<Result<T, PanelError>>;

/// Identifies the connection a request was issued on.
pub type SessionId = u64;

/// Operations the storage actor understands.
///
/// Soft delete, force delete and restore are distinct primitives. Each write
/// applies to the whole id list within a single message, so it is atomic with
/// respect to every other request.
#[derive(Debug)]
pub enum StorageRequest {
    Insert {
        table: String,
        attributes: Attributes,
        created_at: DateTime<Utc>,
        respond_to: Response<u64>,
    },
    Find {
        table: String,
        id: u64,
        respond_to: Response<Option<Row>>,
    },
    /// Every row of a table, trashed rows included, ordered by id.
    Scan {
        table: String,
        respond_to: Response<Vec<Row>>,
    },
    Update {
        table: String,
        id: u64,
        attributes: Attributes,
        respond_to: Response<Row>,
    },
    /// Responds with the ids that were trashed by this request.
    SoftDelete {
        table: String,
        ids: Vec<u64>,
        respond_to: Response<Vec<u64>>,
    },
    /// Responds with the ids that were removed.
    ForceDelete {
        table: String,
        ids: Vec<u64>,
        respond_to: Response<Vec<u64>>,
    },
    /// Responds with the ids that left the trash.
    Restore {
        table: String,
        ids: Vec<u64>,
        respond_to: Response<Vec<u64>>,
    },
    Begin {
        respond_to: Response<()>,
    },
    Commit {
        respond_to: Response<()>,
    },
    Rollback {
        respond_to: Response<()>,
    },
    /// Nesting depth of the session's open transaction (0 when none).
    TransactionLevel {
        respond_to: Response<usize>,
    },
    /// Sent when the last handle on a session is dropped; rolls back anything
    /// the session left open.
    Release,
}

/// A request tagged with the session that issued it.
#[derive(Debug)]
pub struct Envelope {
    pub session: SessionId,
    pub request: StorageRequest,
}
