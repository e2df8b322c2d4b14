//! Source adapters
//!
//! Each upstream system gets one [`SourceAdapter`] that validates its raw
//! payload and produces a [`NormalizedEvent`]. Adapters are pure: the same
//! input always yields the same output and nothing is read from storage.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::normalization::{EventType, NormalizedEvent, Source, parse_event_type, parse_timestamp};

pub mod crm;
pub mod ecommerce;
pub mod erp;
pub mod manual;
pub mod oms;
pub mod registry;
pub mod tms;
pub mod wfm;

pub use crm::CrmAdapter;
pub use ecommerce::EcommerceAdapter;
pub use erp::ErpAdapter;
pub use manual::ManualAdapter;
pub use oms::OmsAdapter;
pub use registry::AdapterRegistry;
pub use tms::TmsAdapter;
pub use wfm::WfmAdapter;

/// Errors raised while selecting or running an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("invalid {system} payload ({} field error(s))", details.len())]
    InvalidPayload {
        system: String,
        /// Field path to human-readable problem
        details: BTreeMap<String, String>,
    },
    #[error("no adapter registered for source '{system}'")]
    UnregisteredSource { system: String },
}

impl AdapterError {
    pub fn details_json(&self) -> Value {
        match self {
            AdapterError::InvalidPayload { details, .. } => serde_json::to_value(details)
                .unwrap_or_else(|_| Value::Object(Map::new())),
            AdapterError::UnregisteredSource { system } => {
                serde_json::json!({ "source": system })
            }
        }
    }
}

/// Normalization strategy for one upstream system.
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    /// Closed vocabulary of event types this adapter accepts.
    fn event_types(&self) -> &'static [EventType];

    fn adapt(&self, raw: &Value) -> Result<NormalizedEvent, AdapterError>;
}

/// Collects per-field validation failures so callers see every problem at once.
#[derive(Debug, Default)]
pub struct FieldErrors {
    errors: BTreeMap<String, String>,
}

impl FieldErrors {
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(field.into()).or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn require_str(&mut self, data: &Map<String, Value>, field: &str) -> Option<String> {
        match data.get(field) {
            Some(Value::String(value)) if !value.trim().is_empty() => Some(value.trim().to_string()),
            Some(Value::String(_)) => {
                self.add(data_path(field), "must not be empty");
                None
            }
            Some(_) => {
                self.add(data_path(field), "must be a string");
                None
            }
            None => {
                self.add(data_path(field), "is required");
                None
            }
        }
    }

    pub fn require_timestamp(
        &mut self,
        data: &Map<String, Value>,
        field: &str,
    ) -> Option<DateTime<Utc>> {
        let raw = self.require_str(data, field)?;
        let parsed = parse_timestamp(&raw);
        if parsed.is_none() {
            self.add(data_path(field), "must be an RFC 3339 timestamp or YYYY-MM-DD date");
        }
        parsed
    }

    pub fn require_positive_number(&mut self, data: &Map<String, Value>, field: &str) -> Option<f64> {
        match data.get(field).and_then(Value::as_f64) {
            Some(value) if value > 0.0 => Some(value),
            Some(_) => {
                self.add(data_path(field), "must be greater than zero");
                None
            }
            None => {
                self.add(data_path(field), "must be a number");
                None
            }
        }
    }

    pub fn require_non_empty_array<'a>(
        &mut self,
        data: &'a Map<String, Value>,
        field: &str,
    ) -> Option<&'a Vec<Value>> {
        match data.get(field).and_then(Value::as_array) {
            Some(items) if !items.is_empty() => Some(items),
            Some(_) => {
                self.add(data_path(field), "must contain at least one entry");
                None
            }
            None => {
                self.add(data_path(field), "must be an array");
                None
            }
        }
    }

    fn into_error(self, source: Source) -> AdapterError {
        AdapterError::InvalidPayload {
            system: source.as_str().to_string(),
            details: self.errors,
        }
    }
}

fn data_path(field: &str) -> String {
    format!("data.{field}")
}

/// Shape shared by every upstream payload: a reference field, the event type,
/// project/order references, an occurrence timestamp and a `data` object.
pub(crate) struct EnvelopeSpec {
    pub source: Source,
    pub ref_field: &'static str,
    pub vocabulary: &'static [EventType],
}

impl EnvelopeSpec {
    /// Validate the envelope, run the adapter-specific `data` checks and build
    /// the normalized event. `check` may also rewrite `data` in place.
    pub(crate) fn read<F>(&self, raw: &Value, check: F) -> Result<NormalizedEvent, AdapterError>
    where
        F: FnOnce(EventType, &mut Map<String, Value>, &mut FieldErrors),
    {
        let mut errors = FieldErrors::default();
        let Some(body) = raw.as_object() else {
            errors.add("$", "expected a JSON object");
            return Err(errors.into_error(self.source));
        };

        let source_ref = top_level_str(body, self.ref_field, &mut errors);
        let project_ref = top_level_str(body, "project_ref", &mut errors);
        let order_ref = body
            .get("order_ref")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        let event_type = match top_level_str(body, "event_type", &mut errors) {
            Some(raw_type) => match parse_event_type(&raw_type.to_ascii_lowercase()) {
                Some(event_type) if self.vocabulary.contains(&event_type) => Some(event_type),
                _ => {
                    errors.add(
                        "event_type",
                        format!("'{raw_type}' is not a {} event type", self.source),
                    );
                    None
                }
            },
            None => None,
        };

        let occurred_at = top_level_str(body, "occurred_at", &mut errors).and_then(|value| {
            let parsed = DateTime::parse_from_rfc3339(&value)
                .ok()
                .map(|ts| ts.with_timezone(&Utc));
            if parsed.is_none() {
                errors.add("occurred_at", "must be an RFC 3339 timestamp");
            }
            parsed
        });

        let mut data = match body.get("data") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                errors.add("data", "must be an object");
                Map::new()
            }
        };

        if let Some(event_type) = event_type {
            if event_type.requires_order_ref() && order_ref.is_none() {
                errors.add("order_ref", format!("is required for {event_type}"));
            }
            check(event_type, &mut data, &mut errors);
        }

        match (source_ref, project_ref, event_type, occurred_at) {
            (Some(source_ref), Some(project_ref), Some(event_type), Some(occurred_at))
                if errors.is_empty() =>
            {
                Ok(NormalizedEvent {
                    source: self.source,
                    source_ref,
                    event_type,
                    project_ref,
                    order_ref,
                    occurred_at,
                    payload: data,
                })
            }
            _ => Err(errors.into_error(self.source)),
        }
    }
}

fn top_level_str(body: &Map<String, Value>, field: &str, errors: &mut FieldErrors) -> Option<String> {
    match body.get(field) {
        Some(Value::String(value)) if !value.trim().is_empty() => Some(value.trim().to_string()),
        // Numeric identifiers are common in ERP exports
        Some(Value::Number(number)) => Some(number.to_string()),
        Some(Value::String(_)) => {
            errors.add(field, "must not be empty");
            None
        }
        Some(_) => {
            errors.add(field, "must be a string");
            None
        }
        None => {
            errors.add(field, "is required");
            None
        }
    }
}
