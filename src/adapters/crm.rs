//! CRM adapter: project lifecycle and customer contact.

use serde_json::{Map, Value};

use super::{AdapterError, EnvelopeSpec, FieldErrors, SourceAdapter};
use crate::normalization::{EventType, NormalizedEvent, Source};

const CRM_EVENT_TYPES: &[EventType] = &[EventType::ProjectCreated, EventType::CustomerComplaint];

const ENVELOPE: EnvelopeSpec = EnvelopeSpec {
    source: Source::Crm,
    ref_field: "id",
    vocabulary: CRM_EVENT_TYPES,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct CrmAdapter;

impl SourceAdapter for CrmAdapter {
    fn source(&self) -> Source {
        Source::Crm
    }

    fn event_types(&self) -> &'static [EventType] {
        CRM_EVENT_TYPES
    }

    fn adapt(&self, raw: &Value) -> Result<NormalizedEvent, AdapterError> {
        ENVELOPE.read(raw, check_data)
    }
}

fn check_data(event_type: EventType, data: &mut Map<String, Value>, errors: &mut FieldErrors) {
    match event_type {
        EventType::ProjectCreated => {
            errors.require_str(data, "customer_name");
        }
        EventType::CustomerComplaint => {
            errors.require_str(data, "message");
        }
        _ => {}
    }
}
