//! E-commerce adapter: checkout and payment.

use serde_json::{Map, Value};

use super::{AdapterError, EnvelopeSpec, FieldErrors, SourceAdapter};
use crate::normalization::{EventType, NormalizedEvent, Source};

const ECOMMERCE_EVENT_TYPES: &[EventType] = &[EventType::OrderPlaced, EventType::PaymentReceived];

const ENVELOPE: EnvelopeSpec = EnvelopeSpec {
    source: Source::Ecommerce,
    ref_field: "id",
    vocabulary: ECOMMERCE_EVENT_TYPES,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct EcommerceAdapter;

impl SourceAdapter for EcommerceAdapter {
    fn source(&self) -> Source {
        Source::Ecommerce
    }

    fn event_types(&self) -> &'static [EventType] {
        ECOMMERCE_EVENT_TYPES
    }

    fn adapt(&self, raw: &Value) -> Result<NormalizedEvent, AdapterError> {
        ENVELOPE.read(raw, check_data)
    }
}

fn check_data(event_type: EventType, data: &mut Map<String, Value>, errors: &mut FieldErrors) {
    if event_type == EventType::PaymentReceived {
        errors.require_positive_number(data, "amount");
        if let Some(currency) = data.get("currency").and_then(Value::as_str) {
            let upper = currency.to_ascii_uppercase();
            data.insert("currency".to_string(), Value::String(upper));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payment_amount_must_be_positive() {
        let err = EcommerceAdapter
            .adapt(&json!({
                "id": "WEB-5",
                "event_type": "payment.received",
                "project_ref": "P1",
                "occurred_at": "2026-01-02T10:00:00Z",
                "data": {"amount": 0}
            }))
            .unwrap_err();
        assert_eq!(err.details_json()["data.amount"], "must be greater than zero");
    }

    #[test]
    fn currency_is_upper_cased() {
        let event = EcommerceAdapter
            .adapt(&json!({
                "id": "WEB-6",
                "event_type": "payment.received",
                "project_ref": "P1",
                "occurred_at": "2026-01-02T10:00:00Z",
                "data": {"amount": 1250.5, "currency": "eur"}
            }))
            .unwrap();
        assert_eq!(event.payload["currency"], "EUR");
    }
}
