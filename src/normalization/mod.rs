//! Canonical event vocabulary shared by every source adapter.
//!
//! Upstream systems speak their own dialects; adapters translate them into a
//! [`NormalizedEvent`] carrying one of the [`EventType`]s registered here.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upstream systems that feed the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Erp,
    Oms,
    Tms,
    Crm,
    Ecommerce,
    Wfm,
    Manual,
}

impl Source {
    pub const fn as_str(self) -> &'static str {
        match self {
            Source::Erp => "erp",
            Source::Oms => "oms",
            Source::Tms => "tms",
            Source::Crm => "crm",
            Source::Ecommerce => "ecommerce",
            Source::Wfm => "wfm",
            Source::Manual => "manual",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ALL_SOURCES
            .iter()
            .copied()
            .find(|source| source.as_str() == value)
            .ok_or_else(|| format!("unknown source '{value}'"))
    }
}

pub const ALL_SOURCES: &[Source] = &[
    Source::Erp,
    Source::Oms,
    Source::Tms,
    Source::Crm,
    Source::Ecommerce,
    Source::Wfm,
    Source::Manual,
];

/// Canonical registry of supported `event_type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    OrderConfirmed,
    StockShortage,
    StockOk,
    ShipmentDispatched,
    ShipmentEtaUpdated,
    ShipmentArrivedStation,
    ConsolidationComplete,
    ConsolidationPartialApproved,
    LastMileScheduled,
    LastMileDelivered,
    ProjectCreated,
    CustomerComplaint,
    OrderPlaced,
    PaymentReceived,
    InstallationScheduled,
    InstallationStarted,
    InstallationCompleted,
    InstallationIssue,
    NoteAdded,
    IssueReported,
}

impl EventType {
    /// Return the canonical string representation for this event type.
    pub const fn as_str(self) -> &'static str {
        match self {
            EventType::OrderConfirmed => "order.confirmed",
            EventType::StockShortage => "stock.shortage",
            EventType::StockOk => "stock.ok",
            EventType::ShipmentDispatched => "shipment.dispatched",
            EventType::ShipmentEtaUpdated => "shipment.eta_updated",
            EventType::ShipmentArrivedStation => "shipment.arrived_station",
            EventType::ConsolidationComplete => "consolidation.complete",
            EventType::ConsolidationPartialApproved => "consolidation.partial_approved",
            EventType::LastMileScheduled => "lastmile.scheduled",
            EventType::LastMileDelivered => "lastmile.delivered",
            EventType::ProjectCreated => "project.created",
            EventType::CustomerComplaint => "customer.complaint",
            EventType::OrderPlaced => "order.placed",
            EventType::PaymentReceived => "payment.received",
            EventType::InstallationScheduled => "installation.scheduled",
            EventType::InstallationStarted => "installation.started",
            EventType::InstallationCompleted => "installation.completed",
            EventType::InstallationIssue => "installation.issue",
            EventType::NoteAdded => "note.added",
            EventType::IssueReported => "issue.reported",
        }
    }

    /// The only source allowed to emit this event type.
    pub const fn source(self) -> Source {
        match self {
            EventType::OrderConfirmed | EventType::StockShortage | EventType::StockOk => {
                Source::Erp
            }
            EventType::ShipmentDispatched
            | EventType::ShipmentEtaUpdated
            | EventType::ShipmentArrivedStation => Source::Oms,
            EventType::ConsolidationComplete
            | EventType::ConsolidationPartialApproved
            | EventType::LastMileScheduled
            | EventType::LastMileDelivered => Source::Tms,
            EventType::ProjectCreated | EventType::CustomerComplaint => Source::Crm,
            EventType::OrderPlaced | EventType::PaymentReceived => Source::Ecommerce,
            EventType::InstallationScheduled
            | EventType::InstallationStarted
            | EventType::InstallationCompleted
            | EventType::InstallationIssue => Source::Wfm,
            EventType::NoteAdded | EventType::IssueReported => Source::Manual,
        }
    }

    /// Order-level events cannot be attributed without an `order_ref`.
    pub const fn requires_order_ref(self) -> bool {
        matches!(
            self,
            EventType::OrderConfirmed
                | EventType::StockShortage
                | EventType::StockOk
                | EventType::ShipmentDispatched
                | EventType::ShipmentEtaUpdated
                | EventType::ShipmentArrivedStation
        )
    }

    pub const fn is_installation_event(self) -> bool {
        matches!(
            self,
            EventType::InstallationScheduled
                | EventType::InstallationStarted
                | EventType::InstallationCompleted
                | EventType::InstallationIssue
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete registry of canonical event types.
pub const ALL_EVENT_TYPES: &[EventType] = &[
    EventType::OrderConfirmed,
    EventType::StockShortage,
    EventType::StockOk,
    EventType::ShipmentDispatched,
    EventType::ShipmentEtaUpdated,
    EventType::ShipmentArrivedStation,
    EventType::ConsolidationComplete,
    EventType::ConsolidationPartialApproved,
    EventType::LastMileScheduled,
    EventType::LastMileDelivered,
    EventType::ProjectCreated,
    EventType::CustomerComplaint,
    EventType::OrderPlaced,
    EventType::PaymentReceived,
    EventType::InstallationScheduled,
    EventType::InstallationStarted,
    EventType::InstallationCompleted,
    EventType::InstallationIssue,
    EventType::NoteAdded,
    EventType::IssueReported,
];

/// Return the canonical event type corresponding to the provided string, if any.
pub fn parse_event_type(value: &str) -> Option<EventType> {
    ALL_EVENT_TYPES
        .iter()
        .copied()
        .find(|event_type| event_type.as_str() == value)
}

/// Event types a given source may emit, in registry order.
pub fn event_types_for(source: Source) -> Vec<EventType> {
    ALL_EVENT_TYPES
        .iter()
        .copied()
        .filter(|event_type| event_type.source() == source)
        .collect()
}

/// Source-independent representation of one upstream event.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub source: Source,
    pub source_ref: String,
    pub event_type: EventType,
    pub project_ref: String,
    pub order_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub payload: Map<String, Value>,
}

/// Parse an RFC 3339 timestamp, or a bare `YYYY-MM-DD` date interpreted as
/// midnight UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Read a timestamp field from an event payload.
pub fn payload_timestamp(payload: &Value, field: &str) -> Option<DateTime<Utc>> {
    payload
        .get(field)
        .and_then(|value| value.as_str())
        .and_then(parse_timestamp)
}

/// Read a non-empty string field from an event payload.
pub fn payload_str<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload
        .get(field)
        .and_then(|value| value.as_str())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn registry_has_unique_entries() {
        let unique: HashSet<&str> = ALL_EVENT_TYPES.iter().map(|t| t.as_str()).collect();
        assert_eq!(unique.len(), ALL_EVENT_TYPES.len());
    }

    #[test]
    fn parse_round_trips() {
        for event_type in ALL_EVENT_TYPES {
            assert_eq!(parse_event_type(event_type.as_str()), Some(*event_type));
        }
        assert_eq!(parse_event_type("order.shipped"), None);
    }

    #[test]
    fn every_source_owns_at_least_two_event_types() {
        for source in ALL_SOURCES {
            assert!(event_types_for(*source).len() >= 2, "{source}");
        }
        assert_eq!(event_types_for(Source::Tms).len(), 4);
    }

    #[test]
    fn sources_parse_from_str() {
        assert_eq!("wfm".parse::<Source>(), Ok(Source::Wfm));
        assert!("sap".parse::<Source>().is_err());
    }

    #[test]
    fn timestamps_accept_dates_and_rfc3339() {
        let date = parse_timestamp("2026-03-01").unwrap();
        assert_eq!(date.to_rfc3339(), "2026-03-01T00:00:00+00:00");

        let ts = parse_timestamp("2026-03-01T10:30:00+02:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-03-01T08:30:00+00:00");

        assert!(parse_timestamp("yesterday").is_none());
    }
}
