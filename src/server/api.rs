use super::query::{matching_rows, resolve_targets, via_relationship, Targets};
use super::schema::{Lens, Relationship, ResourceSchema, SchemaRegistry};
use crate::metrics::MetricRequest;
use crate::resource::{QueryContext, Resource, ResourceId, ResourceKey};
use async_trait::async_trait;
use panel_framework::{
    HttpTransport, Method, PanelConfig, PanelError, Params, Request, Response, StorageClient, TransactionRunner,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

enum Route<'a> {
    Index,
    Destroy,
    ForceDestroy,
    Restore,
    Detach,
    Filters,
    Metrics {
        resource_id: Option<&'a str>,
        metric: Option<&'a str>,
    },
}

struct Routed<'a> {
    resource: &'a str,
    lens: Option<&'a str>,
    route: Route<'a>,
}

fn route<'a>(method: Method, segments: &[&'a str]) -> Option<Routed<'a>> {
    let (resource, rest) = segments.split_first()?;
    let (lens, rest) = match rest {
        ["lens", lens, rest @ ..] => (Some(*lens), rest),
        _ => (None, rest),
    };
    let route = match (method, rest) {
        (Method::Get, []) => Route::Index,
        (Method::Delete, []) => Route::Destroy,
        (Method::Delete, ["force"]) => Route::ForceDestroy,
        (Method::Put, ["restore"]) => Route::Restore,
        (Method::Delete, ["detach"]) if lens.is_none() => Route::Detach,
        (Method::Get, ["filters"]) => Route::Filters,
        (Method::Get, ["metrics"]) if lens.is_none() => Route::Metrics {
            resource_id: None,
            metric: None,
        },
        (Method::Get, ["metrics", metric]) if lens.is_none() => Route::Metrics {
            resource_id: None,
            metric: Some(*metric),
        },
        (Method::Get, [id, "metrics"]) if lens.is_none() => Route::Metrics {
            resource_id: Some(*id),
            metric: None,
        },
        (Method::Get, [id, "metrics", metric]) if lens.is_none() => Route::Metrics {
            resource_id: Some(*id),
            metric: Some(*metric),
        },
        _ => return None,
    };
    Some(Routed {
        resource: *resource,
        lens,
        route,
    })
}

/// Serves the panel's resource endpoints in process, against the storage engine.
///
/// Plain deletes and restores are single storage operations. Force deletes
/// also remove the pivot rows that point at the deleted records, so they run
/// inside a transaction.
#[derive(Clone)]
pub struct LocalApi {
    prefix: Arc<str>,
    storage: StorageClient,
    registry: SchemaRegistry,
}

impl LocalApi {
    pub fn new(config: &PanelConfig, storage: StorageClient, registry: SchemaRegistry) -> Self {
        Self {
            prefix: Arc::from(config.api_prefix.trim_end_matches('/')),
            storage,
            registry,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    async fn dispatch(&self, request: &Request) -> Result<Value, PanelError> {
        let not_found = || PanelError::NotFound(format!("{} {}", request.method, request.url));
        let path = request
            .url
            .strip_prefix(&*self.prefix)
            .and_then(|path| path.strip_prefix('/'))
            .ok_or_else(not_found)?;
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let routed = route(request.method, &segments).ok_or_else(not_found)?;

        let schema = self.registry.get(routed.resource)?;
        let lens = schema.find_lens(routed.lens)?;
        schema.authorize_view_any()?;

        match routed.route {
            Route::Index => self.index(&schema, lens, &request.params).await,
            Route::Destroy => self.destroy(&schema, lens, &request.params).await,
            Route::ForceDestroy => self.force_destroy(&schema, lens, &request.params).await,
            Route::Restore => self.restore(&schema, lens, &request.params).await,
            Route::Detach => self.detach(&schema, &request.params).await,
            Route::Filters => serde_json::to_value(&schema.filters).map_err(|e| PanelError::ValidationFailure(e.to_string())),
            Route::Metrics { resource_id, metric } => Self::metrics(&schema, resource_id, metric),
        }
    }

    async fn index(&self, schema: &ResourceSchema, lens: Option<&Lens>, params: &Params) -> Result<Value, PanelError> {
        let context = QueryContext::from_params(params);
        let resources: Vec<Resource> = matching_rows(&self.storage, &self.registry, schema, lens, &context)
            .await?
            .into_iter()
            .map(|matched| Resource {
                id: ResourceId {
                    value: ResourceKey::Int(matched.row.id),
                    pivot_value: matched.pivot_id.map(ResourceKey::Int),
                },
                attributes: matched.row.attributes,
            })
            .collect();
        Ok(json!({ "resources": resources }))
    }

    #[instrument(skip_all, fields(resource = %schema.uri_key))]
    async fn destroy(&self, schema: &ResourceSchema, lens: Option<&Lens>, params: &Params) -> Result<Value, PanelError> {
        if !schema.soft_deletes {
            return self.force_destroy(schema, lens, params).await;
        }
        let context = QueryContext::from_params(params);
        let targets = Targets::from_param(params.get("resources"))?;
        let mut ids: Vec<u64> = resolve_targets(&self.storage, &self.registry, schema, lens, &targets, &context)
            .await?
            .into_iter()
            .filter(|matched| schema.policy.delete(&matched.row))
            .map(|matched| matched.row.id)
            .collect();
        // Rows linked through several pivots appear once per pivot.
        ids.dedup();

        let deleted = self.storage.soft_delete(&schema.table, ids).await?;
        info!(count = deleted.len(), "Deleted");
        Ok(json!({ "deleted": deleted.len() }))
    }

    #[instrument(skip_all, fields(resource = %schema.uri_key))]
    async fn force_destroy(&self, schema: &ResourceSchema, lens: Option<&Lens>, params: &Params) -> Result<Value, PanelError> {
        let context = QueryContext::from_params(params);
        let targets = Targets::from_param(params.get("resources"))?;
        let mut ids: Vec<u64> = resolve_targets(&self.storage, &self.registry, schema, lens, &targets, &context)
            .await?
            .into_iter()
            .filter(|matched| schema.policy.force_delete(&matched.row))
            .map(|matched| matched.row.id)
            .collect();
        ids.dedup();

        let runner = TransactionRunner::new(self.storage.connect());
        let connection = runner.connection().clone();
        let table = schema.table.clone();
        let pivots = self.registry.pivot_references(&schema.uri_key);

        let deleted = runner
            .run(|batch_id| async move {
                let removed = connection.force_delete(&table, ids).await?;
                let removed_set: HashSet<u64> = removed.iter().copied().collect();
                for (pivot_table, column) in pivots {
                    let stale: Vec<u64> = connection
                        .scan(&pivot_table)
                        .await?
                        .into_iter()
                        .filter(|pivot| pivot.get_u64(&column).is_some_and(|id| removed_set.contains(&id)))
                        .map(|pivot| pivot.id)
                        .collect();
                    if !stale.is_empty() {
                        debug!(%batch_id, %pivot_table, count = stale.len(), "Removing pivot rows");
                        connection.force_delete(&pivot_table, stale).await?;
                    }
                }
                Ok::<_, PanelError>(removed.len())
            })
            .await?;

        info!(count = deleted, "Force deleted");
        Ok(json!({ "deleted": deleted }))
    }

    #[instrument(skip_all, fields(resource = %schema.uri_key))]
    async fn restore(&self, schema: &ResourceSchema, lens: Option<&Lens>, params: &Params) -> Result<Value, PanelError> {
        let context = QueryContext::from_params(params);
        let targets = Targets::from_param(params.get("resources"))?;
        let mut ids: Vec<u64> = resolve_targets(&self.storage, &self.registry, schema, lens, &targets, &context)
            .await?
            .into_iter()
            .filter(|matched| matched.row.is_trashed() && schema.policy.restore(&matched.row))
            .map(|matched| matched.row.id)
            .collect();
        ids.dedup();

        let restored = self.storage.restore(&schema.table, ids).await?;
        info!(count = restored.len(), "Restored");
        Ok(json!({ "restored": restored.len() }))
    }

    #[instrument(skip_all, fields(resource = %schema.uri_key))]
    async fn detach(&self, schema: &ResourceSchema, params: &Params) -> Result<Value, PanelError> {
        let context = QueryContext::from_params(params);
        let via = via_relationship(&self.registry, schema, &context)?
            .ok_or_else(|| PanelError::ValidationFailure("detach needs viaResource, viaResourceId and viaRelationship".into()))?;
        let Relationship::BelongsToMany {
            pivot_table,
            parent_key,
            related_key,
            ..
        } = &via.relationship
        else {
            return Err(PanelError::ValidationFailure(format!(
                "{} is not a many-to-many relationship",
                via.relationship.name()
            )));
        };

        let targets = Targets::from_param(params.get("resources"))?;
        let pivot_ids = Targets::from_param(params.get("pivots"))
            .ok()
            .and_then(|pivots| match pivots {
                Targets::Ids(ids) if !ids.is_empty() => Some(ids.into_iter().collect::<HashSet<u64>>()),
                _ => None,
            });
        let related: HashSet<u64> = match (&targets, &pivot_ids) {
            (Targets::Ids(_), Some(_)) => HashSet::new(),
            (Targets::Ids(ids), None) => ids.iter().copied().collect(),
            (Targets::AllMatching, _) => matching_rows(&self.storage, &self.registry, schema, None, &context)
                .await?
                .into_iter()
                .map(|matched| matched.row.id)
                .collect(),
        };

        let stale: Vec<u64> = self
            .storage
            .scan(pivot_table)
            .await?
            .into_iter()
            .filter(|pivot| pivot.get_u64(parent_key) == Some(via.parent_id))
            .filter(|pivot| match (&targets, &pivot_ids) {
                (Targets::Ids(_), Some(pivots)) => pivots.contains(&pivot.id),
                _ => pivot.get_u64(related_key).is_some_and(|id| related.contains(&id)),
            })
            .map(|pivot| pivot.id)
            .collect();

        let detached = self.storage.force_delete(pivot_table, stale).await?;
        info!(count = detached.len(), "Detached");
        Ok(json!({ "detached": detached.len() }))
    }

    fn metrics(schema: &ResourceSchema, resource_id: Option<&str>, metric: Option<&str>) -> Result<Value, PanelError> {
        let mut request = MetricRequest::new(schema);
        if let Some(id) = resource_id {
            request = request.resource_id(id);
        }
        if let Some(metric) = metric {
            request = request.for_metric(metric);
        }
        let body = match (resource_id, metric) {
            (None, None) => serde_json::to_value(request.available_metrics()?),
            (None, Some(_)) => serde_json::to_value(request.metric()?),
            (Some(_), None) => serde_json::to_value(request.available_metrics_for_detail()?),
            (Some(_), Some(_)) => serde_json::to_value(request.detail_metric()?),
        };
        body.map_err(|e| PanelError::ValidationFailure(e.to_string()))
    }
}

#[async_trait]
impl HttpTransport for LocalApi {
    async fn request(&self, request: Request) -> Result<Response, PanelError> {
        debug!(method = %request.method, url = %request.url, "Handling request");
        match self.dispatch(&request).await {
            Ok(body) => Ok(Response::ok(body)),
            Err(e) => {
                warn!(method = %request.method, url = %request.url, status = e.status(), error = %e, "Request failed");
                Err(e)
            }
        }
    }
}
