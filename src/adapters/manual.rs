//! Manual entry adapter for notes and issues typed in by operators.

use serde_json::{Map, Value};

use super::{AdapterError, EnvelopeSpec, FieldErrors, SourceAdapter};
use crate::normalization::{EventType, NormalizedEvent, Source};

const MANUAL_EVENT_TYPES: &[EventType] = &[EventType::NoteAdded, EventType::IssueReported];

const ENVELOPE: EnvelopeSpec = EnvelopeSpec {
    source: Source::Manual,
    ref_field: "entry_id",
    vocabulary: MANUAL_EVENT_TYPES,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct ManualAdapter;

impl SourceAdapter for ManualAdapter {
    fn source(&self) -> Source {
        Source::Manual
    }

    fn event_types(&self) -> &'static [EventType] {
        MANUAL_EVENT_TYPES
    }

    fn adapt(&self, raw: &Value) -> Result<NormalizedEvent, AdapterError> {
        ENVELOPE.read(raw, check_data)
    }
}

fn check_data(_event_type: EventType, data: &mut Map<String, Value>, errors: &mut FieldErrors) {
    errors.require_str(data, "text");
    errors.require_str(data, "author");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notes_need_text_and_author() {
        let err = ManualAdapter
            .adapt(&json!({
                "entry_id": "M-1",
                "event_type": "note.added",
                "project_ref": "P1",
                "occurred_at": "2026-02-10T09:00:00Z",
                "data": {"text": "Customer asked for a call"}
            }))
            .unwrap_err();
        assert_eq!(err.details_json()["data.author"], "is required");
    }
}
