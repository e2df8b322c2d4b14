//! Ingestion service
//!
//! Resolves the references of a normalized event, stores it exactly once per
//! `(source, source_ref)` and hands it to the job queue. A failed enqueue
//! leaves the event unprocessed for the reconciliation sweep to pick up.

use metrics::counter;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::adapters::AdapterRegistry;
use crate::error::PipelineError;
use crate::normalization::NormalizedEvent;
use crate::queue::QueueHandle;
use crate::repositories::{EventLinks, EventRepository, ProjectRepository};

/// Result of an ingestion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct IngestOutcome {
    pub accepted: bool,
    pub duplicate: bool,
    pub event_id: Option<Uuid>,
}

impl IngestOutcome {
    fn accepted(event_id: Uuid) -> Self {
        Self {
            accepted: true,
            duplicate: false,
            event_id: Some(event_id),
        }
    }

    fn duplicate(event_id: Option<Uuid>) -> Self {
        Self {
            accepted: false,
            duplicate: true,
            event_id,
        }
    }
}

#[derive(Clone)]
pub struct IngestionService {
    registry: AdapterRegistry,
    projects: ProjectRepository,
    events: EventRepository,
    queue: QueueHandle,
}

impl IngestionService {
    pub fn new(db: DatabaseConnection, registry: AdapterRegistry, queue: QueueHandle) -> Self {
        Self {
            registry,
            projects: ProjectRepository::new(db.clone()),
            events: EventRepository::new(db),
            queue,
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Normalize a raw upstream payload with the adapter registered for
    /// `source`, then ingest it.
    pub async fn ingest_raw(&self, source: &str, raw: &Value) -> Result<IngestOutcome, PipelineError> {
        let adapter = self.registry.get_adapter(source)?;
        let normalized = adapter.adapt(raw)?;
        self.ingest_event(normalized).await
    }

    #[instrument(
        skip(self, normalized),
        fields(
            source = %normalized.source,
            source_ref = %normalized.source_ref,
            event_type = %normalized.event_type
        )
    )]
    pub async fn ingest_event(
        &self,
        normalized: NormalizedEvent,
    ) -> Result<IngestOutcome, PipelineError> {
        let source = normalized.source.as_str();

        // Cheap pre-check; the unique index is what makes this atomic.
        if let Some(existing) = self
            .events
            .find_by_source_ref(source, &normalized.source_ref)
            .await?
        {
            counter!("events_duplicate_total", "source" => source).increment(1);
            return Ok(IngestOutcome::duplicate(Some(existing.id)));
        }

        let project = self.projects.get_or_create(&normalized.project_ref).await?;
        let order_id = match &normalized.order_ref {
            Some(order_ref) => Some(
                self.projects
                    .get_or_create_order(project.id, order_ref)
                    .await?
                    .id,
            ),
            None => None,
        };
        let installation_id = if normalized.event_type.is_installation_event() {
            Some(self.projects.get_or_create_installation(project.id).await?.id)
        } else {
            self.projects
                .find_installation(project.id)
                .await?
                .map(|installation| installation.id)
        };

        let links = EventLinks {
            project_id: project.id,
            order_id,
            installation_id,
        };
        let Some(stored) = self.events.insert(&normalized, links).await? else {
            counter!("events_duplicate_total", "source" => source).increment(1);
            let existing = self
                .events
                .find_by_source_ref(source, &normalized.source_ref)
                .await?;
            return Ok(IngestOutcome::duplicate(existing.map(|event| event.id)));
        };

        counter!("events_ingested_total", "source" => source).increment(1);
        info!(event_id = %stored.id, project_id = %project.id, "Event ingested");

        if let Err(err) = self.queue.enqueue(stored.id).await {
            warn!(
                event_id = %stored.id,
                error = %err,
                "Enqueue failed; event left for reconciliation"
            );
        }

        Ok(IngestOutcome::accepted(stored.id))
    }
}
