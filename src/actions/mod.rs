//! # Transactional Actions
//!
//! Runs a multi-step action over the selected records as one action batch.
//!
//! Inside the transaction, one `action_events` row per record is written with
//! status `running`, the action handles the records, and the post-work hook
//! marks the batch `finished` before the commit. If anything fails, the whole
//! transaction (event rows included) is rolled back, the batch is recorded as
//! `failed` outside of it, and the original error is returned.

use crate::resource::{QueryContext, Selection};
use crate::server::{resolve_targets, Matched, SchemaRegistry, Targets};
use async_trait::async_trait;
use panel_framework::storage::{Attributes, Row};
use panel_framework::{BatchId, PanelError, StorageClient, TransactionRunner};
use serde_json::{json, Value};
use std::sync::OnceLock;
use tracing::{info, instrument, warn};

pub const ACTION_EVENTS_TABLE: &str = "action_events";

/// A multi-step operation over a set of records.
#[async_trait]
pub trait PanelAction: Send + Sync {
    fn name(&self) -> &str;

    /// Performs the action. Every write must go through `connection`, which
    /// carries the open transaction.
    async fn handle(&self, connection: &StorageClient, batch_id: BatchId, models: &[Row]) -> Result<(), PanelError>;
}

#[derive(Clone)]
pub struct ActionRunner {
    storage: StorageClient,
    registry: SchemaRegistry,
}

impl ActionRunner {
    pub fn new(storage: StorageClient, registry: SchemaRegistry) -> Self {
        Self { storage, registry }
    }

    /// Executes `action` over the selected records of `resource`, returning the batch id.
    #[instrument(skip_all, fields(action = action.name(), resource = %resource))]
    pub async fn execute(
        &self,
        action: &dyn PanelAction,
        resource: &str,
        selection: &Selection,
        context: &QueryContext,
    ) -> Result<BatchId, PanelError> {
        let schema = self.registry.get(resource)?;
        schema.authorize_view_any()?;

        let targets = match selection {
            Selection::AllMatching => Targets::AllMatching,
            Selection::Resources(resources) => Targets::Ids(
                resources
                    .iter()
                    .map(|r| r.id.value.as_u64())
                    .collect::<Option<Vec<u64>>>()
                    .ok_or_else(|| PanelError::ValidationFailure("action targets must be row ids".into()))?,
            ),
        };
        let mut models: Vec<Row> = resolve_targets(&self.storage, &self.registry, &schema, None, &targets, context)
            .await?
            .into_iter()
            .map(|Matched { row, .. }| row)
            .collect();
        // A row attached more than once still runs the action once.
        models.dedup_by_key(|row| row.id);

        let runner = TransactionRunner::new(self.storage.connect());
        let connection = runner.connection().clone();
        let hook_connection = connection.clone();
        let models_ref = &models;
        let minted = OnceLock::new();
        let minted_ref = &minted;

        let outcome = runner
            .run_with(
                |batch_id| async move {
                    let _ = minted_ref.set(batch_id);
                    for model in models_ref {
                        connection
                            .insert(ACTION_EVENTS_TABLE, event_row(batch_id, action.name(), resource, model.id, "running"))
                            .await?;
                    }
                    action.handle(&connection, batch_id, models_ref).await?;
                    Ok(batch_id)
                },
                Some(move |batch_id: BatchId| async move { mark_batch(&hook_connection, batch_id, "finished").await }),
            )
            .await;

        match outcome {
            Ok(batch_id) => {
                info!(%batch_id, count = models.len(), "Action finished");
                Ok(batch_id)
            }
            Err(e) => {
                // Nothing ran if the transaction never began.
                if let Some(&batch_id) = minted.get() {
                    for model in &models {
                        let row = event_row(batch_id, action.name(), resource, model.id, "failed");
                        if let Err(record_error) = self.storage.insert(ACTION_EVENTS_TABLE, row).await {
                            warn!(error = %record_error, "Could not record failed action");
                            break;
                        }
                    }
                    warn!(%batch_id, error = %e, "Action failed");
                }
                Err(e)
            }
        }
    }

    /// Event rows of one batch.
    pub async fn batch_events(&self, batch_id: BatchId) -> Result<Vec<Row>, PanelError> {
        let batch = batch_id.to_string();
        Ok(self
            .storage
            .scan(ACTION_EVENTS_TABLE)
            .await?
            .into_iter()
            .filter(|row| row.get_str("batch_id") == Some(batch.as_str()))
            .collect())
    }
}

fn event_row(batch_id: BatchId, name: &str, resource: &str, id: u64, status: &str) -> Attributes {
    let mut row = Attributes::new();
    row.insert("batch_id".into(), Value::String(batch_id.to_string()));
    row.insert("name".into(), json!(name));
    row.insert("actionable_type".into(), json!(resource));
    row.insert("actionable_id".into(), json!(id));
    row.insert("status".into(), json!(status));
    row
}

async fn mark_batch(connection: &StorageClient, batch_id: BatchId, status: &str) -> Result<(), PanelError> {
    let batch = batch_id.to_string();
    let events = connection.scan(ACTION_EVENTS_TABLE).await?;
    for event in events.iter().filter(|row| row.get_str("batch_id") == Some(batch.as_str())) {
        let mut update = Attributes::new();
        update.insert("status".into(), json!(status));
        connection.update(ACTION_EVENTS_TABLE, event.id, update).await?;
    }
    Ok(())
}
