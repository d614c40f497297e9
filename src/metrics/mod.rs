//! # Metric Authorization Gateway
//!
//! Resolves which metrics a caller may see for a resource, in index or detail
//! context. Metrics that recompute when filters change get the resource's
//! available filters attached; every other metric is returned as declared.

use crate::filters::FilterDefinition;
use crate::resource::ResourceKey;
use panel_framework::PanelError;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub name: String,
    pub uri_key: String,
    pub refresh_when_filters_change: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_filters: Option<Vec<FilterDefinition>>,
}

impl Metric {
    pub fn new(name: impl Into<String>, uri_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri_key: uri_key.into(),
            refresh_when_filters_change: false,
            available_filters: None,
        }
    }

    pub fn refresh_when_filters_change(mut self) -> Self {
        self.refresh_when_filters_change = true;
        self
    }

    pub fn set_available_filters(mut self, filters: Vec<FilterDefinition>) -> Self {
        self.available_filters = Some(filters);
        self
    }
}

/// A card shown above a listing or on a detail page.
#[derive(Debug, Clone, PartialEq)]
pub enum Card {
    Metric(Metric),
    Custom { component: String },
}

/// Which kind of page a request comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Index,
    Detail,
}

/// What the gateway needs from a resource definition.
pub trait PanelResource: Send + Sync {
    fn uri_key(&self) -> &str;
    fn authorized_to_view_any(&self, request: &MetricRequest<'_>) -> bool;
    fn available_cards(&self, request: &MetricRequest<'_>) -> Vec<Card>;
    fn available_cards_for_detail(&self, request: &MetricRequest<'_>) -> Vec<Card>;
    fn available_filters(&self, kind: RequestKind) -> Vec<FilterDefinition>;
}

pub struct MetricRequest<'r> {
    resource: &'r dyn PanelResource,
    /// The requested metric's uri key.
    pub metric: Option<String>,
    /// Set when the request comes from a detail page.
    pub resource_id: Option<ResourceKey>,
}

impl<'r> MetricRequest<'r> {
    pub fn new(resource: &'r dyn PanelResource) -> Self {
        Self {
            resource,
            metric: None,
            resource_id: None,
        }
    }

    pub fn for_metric(mut self, uri_key: impl Into<String>) -> Self {
        self.metric = Some(uri_key.into());
        self
    }

    pub fn resource_id(mut self, id: impl Into<ResourceKey>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    pub fn available_metrics(&self) -> Result<Vec<Metric>, PanelError> {
        self.authorize()?;
        let kind = if self.resource_id.is_some() {
            RequestKind::Detail
        } else {
            RequestKind::Index
        };
        Ok(self.attach_filters(self.resource.available_cards(self), kind))
    }

    pub fn available_metrics_for_detail(&self) -> Result<Vec<Metric>, PanelError> {
        self.authorize()?;
        Ok(self.attach_filters(self.resource.available_cards_for_detail(self), RequestKind::Detail))
    }

    /// The requested metric among the index metrics.
    pub fn metric(&self) -> Result<Metric, PanelError> {
        self.find(self.available_metrics()?)
    }

    /// The requested metric among the detail metrics.
    pub fn detail_metric(&self) -> Result<Metric, PanelError> {
        self.find(self.available_metrics_for_detail()?)
    }

    fn authorize(&self) -> Result<(), PanelError> {
        if self.resource.authorized_to_view_any(self) {
            Ok(())
        } else {
            warn!(resource = self.resource.uri_key(), "Metrics unauthorized");
            Err(PanelError::AuthorizationDenied)
        }
    }

    fn attach_filters(&self, cards: Vec<Card>, kind: RequestKind) -> Vec<Metric> {
        cards
            .into_iter()
            .filter_map(|card| match card {
                Card::Metric(metric) => Some(metric),
                Card::Custom { .. } => None,
            })
            .map(|metric| {
                if metric.refresh_when_filters_change {
                    metric.set_available_filters(self.resource.available_filters(kind))
                } else {
                    metric
                }
            })
            .collect()
    }

    fn find(&self, metrics: Vec<Metric>) -> Result<Metric, PanelError> {
        let wanted = self.metric.as_deref().unwrap_or_default();
        debug!(resource = self.resource.uri_key(), metric = wanted, "Resolving metric");
        metrics
            .into_iter()
            .find(|metric| metric.uri_key == wanted)
            .ok_or_else(|| PanelError::NotFound(format!("metric {wanted}")))
    }
}
