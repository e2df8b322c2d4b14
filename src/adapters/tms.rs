//! Transport-management adapter: consolidation and last-mile delivery.
//!
//! TMS messages are keyed by `message_id`. Last-mile events always reference
//! the delivery run through `lastmile_id`.

use serde_json::{Map, Value};

use super::{AdapterError, EnvelopeSpec, FieldErrors, SourceAdapter};
use crate::normalization::{EventType, NormalizedEvent, Source};

const TMS_EVENT_TYPES: &[EventType] = &[
    EventType::ConsolidationComplete,
    EventType::ConsolidationPartialApproved,
    EventType::LastMileScheduled,
    EventType::LastMileDelivered,
];

const ENVELOPE: EnvelopeSpec = EnvelopeSpec {
    source: Source::Tms,
    ref_field: "message_id",
    vocabulary: TMS_EVENT_TYPES,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct TmsAdapter;

impl SourceAdapter for TmsAdapter {
    fn source(&self) -> Source {
        Source::Tms
    }

    fn event_types(&self) -> &'static [EventType] {
        TMS_EVENT_TYPES
    }

    fn adapt(&self, raw: &Value) -> Result<NormalizedEvent, AdapterError> {
        ENVELOPE.read(raw, check_data)
    }
}

fn check_data(event_type: EventType, data: &mut Map<String, Value>, errors: &mut FieldErrors) {
    match event_type {
        EventType::ConsolidationPartialApproved => {
            errors.require_str(data, "approved_by");
        }
        EventType::LastMileScheduled => {
            errors.require_str(data, "lastmile_id");
            errors.require_timestamp(data, "scheduled_date");
        }
        EventType::LastMileDelivered => {
            errors.require_str(data, "lastmile_id");
        }
        _ => {}
    }
}
