//! Order-management adapter: outbound shipment tracking.

use serde_json::{Map, Value};

use super::{AdapterError, EnvelopeSpec, FieldErrors, SourceAdapter};
use crate::normalization::{EventType, NormalizedEvent, Source};

const OMS_EVENT_TYPES: &[EventType] = &[
    EventType::ShipmentDispatched,
    EventType::ShipmentEtaUpdated,
    EventType::ShipmentArrivedStation,
];

const ENVELOPE: EnvelopeSpec = EnvelopeSpec {
    source: Source::Oms,
    ref_field: "id",
    vocabulary: OMS_EVENT_TYPES,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct OmsAdapter;

impl SourceAdapter for OmsAdapter {
    fn source(&self) -> Source {
        Source::Oms
    }

    fn event_types(&self) -> &'static [EventType] {
        OMS_EVENT_TYPES
    }

    fn adapt(&self, raw: &Value) -> Result<NormalizedEvent, AdapterError> {
        ENVELOPE.read(raw, check_data)
    }
}

fn check_data(event_type: EventType, data: &mut Map<String, Value>, errors: &mut FieldErrors) {
    match event_type {
        EventType::ShipmentDispatched => {
            errors.require_str(data, "carrier");
            // OMS calls it tracking_no; everything downstream reads tracking_ref
            if let Some(tracking) = data.remove("tracking_no") {
                data.entry("tracking_ref").or_insert(tracking);
            }
        }
        EventType::ShipmentEtaUpdated => {
            errors.require_timestamp(data, "eta");
        }
        EventType::ShipmentArrivedStation => {
            errors.require_str(data, "station");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dispatch_renames_tracking_number() {
        let event = OmsAdapter
            .adapt(&json!({
                "id": "SHP-77",
                "event_type": "shipment.dispatched",
                "project_ref": "P1",
                "order_ref": "O1",
                "occurred_at": "2026-02-03T12:00:00Z",
                "data": {"carrier": "DHL", "tracking_no": "JD0001"}
            }))
            .unwrap();

        assert_eq!(event.payload["tracking_ref"], "JD0001");
        assert!(!event.payload.contains_key("tracking_no"));
    }

    #[test]
    fn eta_must_be_a_timestamp() {
        let err = OmsAdapter
            .adapt(&json!({
                "id": "SHP-78",
                "event_type": "shipment.eta_updated",
                "project_ref": "P1",
                "order_ref": "O1",
                "occurred_at": "2026-02-03T12:00:00Z",
                "data": {"eta": "next tuesday"}
            }))
            .unwrap_err();
        assert!(err.details_json().get("data.eta").is_some());
    }

    #[test]
    fn foreign_event_type_is_rejected() {
        let err = OmsAdapter
            .adapt(&json!({
                "id": "SHP-79",
                "event_type": "order.confirmed",
                "project_ref": "P1",
                "order_ref": "O1",
                "occurred_at": "2026-02-03T12:00:00Z"
            }))
            .unwrap_err();
        assert!(err.details_json().get("event_type").is_some());
    }
}
