//! # Storage Actor
//!
//! The server half of the storage engine. It owns every table and processes
//! requests sequentially, so table state needs no locks.
//!
//! ## Transactions
//!
//! A session's `Begin` snapshots all tables; nested begins stack snapshots.
//! `Rollback` restores the innermost snapshot and `Commit` discards it. While a
//! session holds an open transaction, requests from any other session are
//! deferred and replayed, in arrival order, once the transaction finishes.

use super::client::StorageClient;
use super::message::{Envelope, SessionId, StorageRequest};
use super::row::{Attributes, Row};
use crate::error::PanelError;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type Tables = HashMap<String, BTreeMap<u64, Row>>;

struct OpenTransaction {
    session: SessionId,
    snapshots: Vec<Tables>,
}

pub struct StorageActor {
    receiver: mpsc::Receiver<Envelope>,
    tables: Tables,
    next_ids: HashMap<String, u64>,
    transaction: Option<OpenTransaction>,
    deferred: VecDeque<Envelope>,
}

impl StorageActor {
    /// Creates the actor and a client on a fresh session.
    ///
    /// `buffer_size` is the channel capacity; when it is full, client calls wait.
    pub fn new(buffer_size: usize) -> (Self, StorageClient) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = Self {
            receiver,
            tables: HashMap::new(),
            next_ids: HashMap::new(),
            transaction: None,
            deferred: VecDeque::new(),
        };
        (actor, StorageClient::new(sender))
    }

    /// Processes requests until every client has been dropped.
    pub async fn run(mut self) {
        info!("Storage started");

        loop {
            let envelope = match self.next_deferred() {
                Some(envelope) => envelope,
                None => match self.receiver.recv().await {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            if !self.may_run(envelope.session) {
                debug!(session = envelope.session, "Deferred");
                self.deferred.push_back(envelope);
                continue;
            }
            self.handle(envelope);
        }

        info!(tables = self.tables.len(), "Shutdown");
    }

    fn may_run(&self, session: SessionId) -> bool {
        self.transaction.as_ref().map_or(true, |tx| tx.session == session)
    }

    fn next_deferred(&mut self) -> Option<Envelope> {
        let index = self.deferred.iter().position(|e| self.may_run(e.session))?;
        self.deferred.remove(index)
    }

    fn handle(&mut self, envelope: Envelope) {
        let session = envelope.session;
        match envelope.request {
            StorageRequest::Insert {
                table,
                attributes,
                created_at,
                respond_to,
            } => {
                let id = self.insert(&table, attributes, created_at);
                debug!(%table, id, "Inserted");
                let _ = respond_to.send(Ok(id));
            }
            StorageRequest::Find { table, id, respond_to } => {
                let row = self.tables.get(&table).and_then(|rows| rows.get(&id)).cloned();
                let _ = respond_to.send(Ok(row));
            }
            StorageRequest::Scan { table, respond_to } => {
                let rows = self
                    .tables
                    .get(&table)
                    .map(|rows| rows.values().cloned().collect())
                    .unwrap_or_default();
                let _ = respond_to.send(Ok(rows));
            }
            StorageRequest::Update {
                table,
                id,
                attributes,
                respond_to,
            } => {
                let result = match self.tables.get_mut(&table).and_then(|rows| rows.get_mut(&id)) {
                    Some(row) => {
                        row.attributes.extend(attributes);
                        Ok(row.clone())
                    }
                    None => {
                        warn!(%table, id, "Not found");
                        Err(PanelError::NotFound(format!("{table}#{id}")))
                    }
                };
                let _ = respond_to.send(result);
            }
            StorageRequest::SoftDelete { table, ids, respond_to } => {
                let now = Utc::now();
                let affected = self.apply(&table, &ids, |row| {
                    if row.is_trashed() {
                        return false;
                    }
                    row.deleted_at = Some(now);
                    true
                });
                info!(%table, count = affected.len(), "Soft deleted");
                let _ = respond_to.send(Ok(affected));
            }
            StorageRequest::Restore { table, ids, respond_to } => {
                let affected = self.apply(&table, &ids, |row| row.deleted_at.take().is_some());
                info!(%table, count = affected.len(), "Restored");
                let _ = respond_to.send(Ok(affected));
            }
            StorageRequest::ForceDelete { table, ids, respond_to } => {
                let rows = self.tables.entry(table.clone()).or_default();
                let affected: Vec<u64> = ids.iter().filter(|id| rows.remove(*id).is_some()).copied().collect();
                info!(%table, count = affected.len(), size = rows.len(), "Force deleted");
                let _ = respond_to.send(Ok(affected));
            }
            StorageRequest::Begin { respond_to } => {
                let snapshot = self.tables.clone();
                let tx = self.transaction.get_or_insert_with(|| OpenTransaction {
                    session,
                    snapshots: Vec::new(),
                });
                tx.snapshots.push(snapshot);
                debug!(session, level = tx.snapshots.len(), "Begin");
                let _ = respond_to.send(Ok(()));
            }
            StorageRequest::Commit { respond_to } => {
                let result = self.finish(session).map(|_| ());
                if result.is_ok() {
                    debug!(session, "Commit");
                }
                let _ = respond_to.send(result);
            }
            StorageRequest::Rollback { respond_to } => {
                let result = self.finish(session).map(|snapshot| {
                    self.tables = snapshot;
                    debug!(session, "Rollback");
                });
                let _ = respond_to.send(result);
            }
            StorageRequest::TransactionLevel { respond_to } => {
                let level = self
                    .transaction
                    .as_ref()
                    .filter(|tx| tx.session == session)
                    .map_or(0, |tx| tx.snapshots.len());
                let _ = respond_to.send(Ok(level));
            }
            StorageRequest::Release => {
                if let Some(tx) = self.transaction.take_if(|tx| tx.session == session) {
                    if let Some(outermost) = tx.snapshots.into_iter().next() {
                        warn!(session, "Session released with an open transaction; rolling back");
                        self.tables = outermost;
                    }
                }
            }
        }
    }

    /// Pops the innermost snapshot of `session`'s transaction.
    fn finish(&mut self, session: SessionId) -> Result<Tables, PanelError> {
        let tx = self
            .transaction
            .as_mut()
            .filter(|tx| tx.session == session)
            .ok_or_else(|| PanelError::TransactionFailure("no active transaction".into()))?;
        let snapshot = tx
            .snapshots
            .pop()
            .ok_or_else(|| PanelError::TransactionFailure("no active transaction".into()))?;
        if tx.snapshots.is_empty() {
            self.transaction = None;
        }
        Ok(snapshot)
    }

    fn insert(&mut self, table: &str, attributes: Attributes, created_at: DateTime<Utc>) -> u64 {
        let next = self.next_ids.entry(table.to_string()).or_insert(1);
        let id = *next;
        *next += 1;
        let row = Row {
            id,
            attributes,
            created_at,
            deleted_at: None,
        };
        self.tables.entry(table.to_string()).or_default().insert(id, row);
        id
    }

    /// Applies `change` to each existing row in `ids`, returning the ids it reported as changed.
    fn apply(&mut self, table: &str, ids: &[u64], mut change: impl FnMut(&mut Row) -> bool) -> Vec<u64> {
        let Some(rows) = self.tables.get_mut(table) else {
            return Vec::new();
        };
        ids.iter()
            .filter(|id| rows.get_mut(*id).is_some_and(&mut change))
            .copied()
            .collect()
    }
}
