//! ERP adapter: order confirmations and stock availability.
//!
//! The ERP identifies records by `document_no`. Shortage lines are reduced to
//! `{sku, quantity}` pairs so downstream consumers see one shape.

use serde_json::{Map, Value, json};

use super::{AdapterError, EnvelopeSpec, FieldErrors, SourceAdapter};
use crate::normalization::{EventType, NormalizedEvent, Source};

const ERP_EVENT_TYPES: &[EventType] = &[
    EventType::OrderConfirmed,
    EventType::StockShortage,
    EventType::StockOk,
];

const ENVELOPE: EnvelopeSpec = EnvelopeSpec {
    source: Source::Erp,
    ref_field: "document_no",
    vocabulary: ERP_EVENT_TYPES,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct ErpAdapter;

impl SourceAdapter for ErpAdapter {
    fn source(&self) -> Source {
        Source::Erp
    }

    fn event_types(&self) -> &'static [EventType] {
        ERP_EVENT_TYPES
    }

    fn adapt(&self, raw: &Value) -> Result<NormalizedEvent, AdapterError> {
        ENVELOPE.read(raw, check_data)
    }
}

fn check_data(event_type: EventType, data: &mut Map<String, Value>, errors: &mut FieldErrors) {
    match event_type {
        EventType::OrderConfirmed => {
            errors.require_timestamp(data, "promised_delivery_date");
        }
        EventType::StockShortage => {
            let Some(items) = errors.require_non_empty_array(data, "items") else {
                return;
            };
            let mut lines = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let sku = item
                    .get("sku")
                    .and_then(Value::as_str)
                    .filter(|sku| !sku.is_empty());
                match sku {
                    Some(sku) => lines.push(json!({
                        "sku": sku,
                        "quantity": item.get("quantity").and_then(Value::as_i64).unwrap_or(1),
                    })),
                    None => errors.add(format!("data.items[{index}].sku"), "is required"),
                }
            }
            data.insert("items".to_string(), Value::Array(lines));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirms_order_with_promised_date() {
        let event = ErpAdapter
            .adapt(&json!({
                "document_no": "ERP-1001",
                "event_type": "ORDER.CONFIRMED",
                "project_ref": "P1",
                "order_ref": "O1",
                "occurred_at": "2026-02-01T08:00:00Z",
                "data": {"promised_delivery_date": "2026-02-14"}
            }))
            .unwrap();

        assert_eq!(event.source, Source::Erp);
        assert_eq!(event.source_ref, "ERP-1001");
        assert_eq!(event.event_type, EventType::OrderConfirmed);
        assert_eq!(event.order_ref.as_deref(), Some("O1"));
        assert_eq!(event.payload["promised_delivery_date"], "2026-02-14");
    }

    #[test]
    fn shortage_lines_are_normalized() {
        let event = ErpAdapter
            .adapt(&json!({
                "document_no": "ERP-1002",
                "event_type": "stock.shortage",
                "project_ref": "P1",
                "order_ref": "O1",
                "occurred_at": "2026-02-01T08:00:00Z",
                "data": {"items": [{"sku": "CAB-60", "quantity": 2, "warehouse": "W1"}, {"sku": "HNG-1"}]}
            }))
            .unwrap();

        assert_eq!(
            event.payload["items"],
            json!([{"sku": "CAB-60", "quantity": 2}, {"sku": "HNG-1", "quantity": 1}])
        );
    }

    #[test]
    fn order_events_need_order_ref_and_fields() {
        let err = ErpAdapter
            .adapt(&json!({
                "document_no": "ERP-1003",
                "event_type": "stock.shortage",
                "project_ref": "P1",
                "occurred_at": "2026-02-01T08:00:00Z",
                "data": {"items": [{"quantity": 3}]}
            }))
            .unwrap_err();

        let AdapterError::InvalidPayload { details, .. } = err else {
            panic!("expected invalid payload");
        };
        assert!(details.contains_key("order_ref"));
        assert!(details.contains_key("data.items[0].sku"));
    }
}
