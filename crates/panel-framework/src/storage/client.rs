//! # Storage Client
//!
//! A cloneable handle on one storage session. Clones share the session (and so
//! share its transaction); [`StorageClient::connect`] opens an independent one.

use super::message::{Envelope, SessionId, StorageRequest};
use super::row::{Attributes, Row};
use crate::error::PanelError;
use crate::transaction::TransactionalConnection;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Releases the session when the last client handle on it goes away.
struct Session {
    id: SessionId,
    sender: mpsc::Sender<Envelope>,
}

impl Drop for Session {
    fn drop(&mut self) {
        let release = Envelope {
            session: self.id,
            request: StorageRequest::Release,
        };
        // A closed channel means the actor, and any open transaction, is gone.
        // A full one still has to deliver the release once the actor catches up.
        let Err(TrySendError::Full(release)) = self.sender.try_send(release) else {
            return;
        };
        let sender = self.sender.clone();
        debug!(session = self.id, "Storage channel full, deferring release");
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = sender.send(release).await;
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    let _ = sender.blocking_send(release);
                });
            }
        }
    }
}

#[derive(Clone)]
pub struct StorageClient {
    sender: mpsc::Sender<Envelope>,
    session: Arc<Session>,
    sessions: Arc<AtomicU64>,
}

impl StorageClient {
    pub(crate) fn new(sender: mpsc::Sender<Envelope>) -> Self {
        let sessions = Arc::new(AtomicU64::new(1));
        Self::on_session(sender, sessions)
    }

    fn on_session(sender: mpsc::Sender<Envelope>, sessions: Arc<AtomicU64>) -> Self {
        let id = sessions.fetch_add(1, Ordering::SeqCst);
        Self {
            session: Arc::new(Session {
                id,
                sender: sender.clone(),
            }),
            sender,
            sessions,
        }
    }

    /// Opens a new, independent session on the same storage.
    pub fn connect(&self) -> StorageClient {
        Self::on_session(self.sender.clone(), self.sessions.clone())
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<Result<T, PanelError>>) -> StorageRequest,
    ) -> Result<T, PanelError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(Envelope {
                session: self.session.id,
                request: request(respond_to),
            })
            .await
            .map_err(|_| PanelError::StorageClosed)?;
        response.await.map_err(|_| PanelError::StorageDropped)?
    }

    pub async fn insert(&self, table: &str, attributes: Attributes) -> Result<u64, PanelError> {
        self.insert_at(table, attributes, Utc::now()).await
    }

    /// Inserts a row with an explicit creation time.
    pub async fn insert_at(
        &self,
        table: &str,
        attributes: Attributes,
        created_at: DateTime<Utc>,
    ) -> Result<u64, PanelError> {
        let table = table.to_string();
        self.call(|respond_to| StorageRequest::Insert {
            table,
            attributes,
            created_at,
            respond_to,
        })
        .await
    }

    pub async fn find(&self, table: &str, id: u64) -> Result<Option<Row>, PanelError> {
        let table = table.to_string();
        self.call(|respond_to| StorageRequest::Find { table, id, respond_to }).await
    }

    pub async fn scan(&self, table: &str) -> Result<Vec<Row>, PanelError> {
        let table = table.to_string();
        self.call(|respond_to| StorageRequest::Scan { table, respond_to }).await
    }

    pub async fn update(&self, table: &str, id: u64, attributes: Attributes) -> Result<Row, PanelError> {
        let table = table.to_string();
        self.call(|respond_to| StorageRequest::Update {
            table,
            id,
            attributes,
            respond_to,
        })
        .await
    }

    pub async fn soft_delete(&self, table: &str, ids: Vec<u64>) -> Result<Vec<u64>, PanelError> {
        let table = table.to_string();
        self.call(|respond_to| StorageRequest::SoftDelete { table, ids, respond_to })
            .await
    }

    pub async fn force_delete(&self, table: &str, ids: Vec<u64>) -> Result<Vec<u64>, PanelError> {
        let table = table.to_string();
        self.call(|respond_to| StorageRequest::ForceDelete { table, ids, respond_to })
            .await
    }

    pub async fn restore(&self, table: &str, ids: Vec<u64>) -> Result<Vec<u64>, PanelError> {
        let table = table.to_string();
        self.call(|respond_to| StorageRequest::Restore { table, ids, respond_to })
            .await
    }

    /// Nesting depth of this session's open transaction.
    pub async fn transaction_level(&self) -> Result<usize, PanelError> {
        self.call(|respond_to| StorageRequest::TransactionLevel { respond_to })
            .await
    }
}

#[async_trait]
impl TransactionalConnection for StorageClient {
    async fn begin(&self) -> Result<(), PanelError> {
        self.call(|respond_to| StorageRequest::Begin { respond_to }).await
    }

    async fn commit(&self) -> Result<(), PanelError> {
        self.call(|respond_to| StorageRequest::Commit { respond_to }).await
    }

    async fn rollback(&self) -> Result<(), PanelError> {
        self.call(|respond_to| StorageRequest::Rollback { respond_to }).await
    }
}
