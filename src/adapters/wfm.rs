//! Workforce-management adapter: installer crews on site.

use serde_json::{Map, Value};

use super::{AdapterError, EnvelopeSpec, FieldErrors, SourceAdapter};
use crate::normalization::{EventType, NormalizedEvent, Source};

const WFM_EVENT_TYPES: &[EventType] = &[
    EventType::InstallationScheduled,
    EventType::InstallationStarted,
    EventType::InstallationCompleted,
    EventType::InstallationIssue,
];

const ENVELOPE: EnvelopeSpec = EnvelopeSpec {
    source: Source::Wfm,
    ref_field: "id",
    vocabulary: WFM_EVENT_TYPES,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct WfmAdapter;

impl SourceAdapter for WfmAdapter {
    fn source(&self) -> Source {
        Source::Wfm
    }

    fn event_types(&self) -> &'static [EventType] {
        WFM_EVENT_TYPES
    }

    fn adapt(&self, raw: &Value) -> Result<NormalizedEvent, AdapterError> {
        ENVELOPE.read(raw, check_data)
    }
}

fn check_data(event_type: EventType, data: &mut Map<String, Value>, errors: &mut FieldErrors) {
    match event_type {
        EventType::InstallationScheduled => {
            errors.require_timestamp(data, "scheduled_at");
        }
        EventType::InstallationIssue => {
            errors.require_str(data, "reason");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scheduled_installation_is_normalized() {
        let event = WfmAdapter
            .adapt(&json!({
                "id": "WFM-1",
                "event_type": "installation.scheduled",
                "project_ref": "P1",
                "occurred_at": "2026-02-10T09:00:00Z",
                "data": {"scheduled_at": "2026-02-20T07:30:00Z", "crew": "north-2"}
            }))
            .unwrap();
        assert_eq!(event.event_type, EventType::InstallationScheduled);
        assert_eq!(event.payload["crew"], "north-2");
    }
}
