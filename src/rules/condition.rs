//! Rule predicates
//!
//! Conditions are stored as tagged JSON (`{"type": "threshold", ...}`) and
//! evaluated against an [`EvaluationContext`]. A metric or field that cannot
//! be resolved never satisfies a comparison.

use serde::{Deserialize, Serialize};

use super::context::EvaluationContext;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Threshold { metric: Metric, op: Op, value: f64 },
    Equals { field: Field, value: String },
    OneOf { field: Field, values: Vec<String> },
    Missing { field: Field },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl Op {
    pub fn compare(self, left: f64, right: f64) -> bool {
        match self {
            Op::Gt => left > right,
            Op::Gte => left >= right,
            Op::Lt => left < right,
            Op::Lte => left <= right,
            Op::Eq => (left - right).abs() < f64::EPSILON,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    ElapsedHours,
    HoursSincePromisedDelivery,
    DelayHours,
    MissingOrders,
    StockShortageCount,
    HoursUntilInstallation,
    HoursSinceLastEvent,
    AnomalyStepCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    EventType,
    ProjectStatus,
    OrderStatus,
    ConsolidationStatus,
    LastMileStatus,
    InstallationStatus,
    StepStatus,
    OrderDispatchedAt,
    OrderEta,
    LastMileScheduledDate,
}

impl Condition {
    /// Evaluate against `ctx`. `step_type` is the rule's step, if any.
    pub fn evaluate(&self, ctx: &EvaluationContext, step_type: Option<&str>) -> bool {
        match self {
            Condition::Threshold { metric, op, value } => ctx
                .metric(*metric, step_type)
                .is_some_and(|measured| op.compare(measured, *value)),
            Condition::Equals { field, value } => ctx
                .field(*field, step_type)
                .is_some_and(|actual| actual == *value),
            Condition::OneOf { field, values } => ctx
                .field(*field, step_type)
                .is_some_and(|actual| values.iter().any(|candidate| *candidate == actual)),
            Condition::Missing { field } => ctx.field(*field, step_type).is_none(),
            Condition::All { conditions } => conditions
                .iter()
                .all(|condition| condition.evaluate(ctx, step_type)),
            Condition::Any { conditions } => conditions
                .iter()
                .any(|condition| condition.evaluate(ctx, step_type)),
            Condition::Not { condition } => !condition.evaluate(ctx, step_type),
            Condition::Always => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_nested_conditions() {
        let condition: Condition = serde_json::from_value(json!({
            "type": "all",
            "conditions": [
                {"type": "threshold", "metric": "elapsed_hours", "op": "gte", "value": 48},
                {"type": "not", "condition": {"type": "equals", "field": "order_status", "value": "at_station"}},
                {"type": "missing", "field": "order_eta"}
            ]
        }))
        .unwrap();

        let Condition::All { conditions } = condition else {
            panic!("expected all");
        };
        assert_eq!(conditions.len(), 3);
        assert_eq!(
            conditions[0],
            Condition::Threshold {
                metric: Metric::ElapsedHours,
                op: Op::Gte,
                value: 48.0
            }
        );
    }

    #[test]
    fn rejects_unknown_metric() {
        let parsed: Result<Condition, _> = serde_json::from_value(
            json!({"type": "threshold", "metric": "moon_phase", "op": "gt", "value": 1}),
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn gte_is_inclusive() {
        assert!(Op::Gte.compare(48.0, 48.0));
        assert!(!Op::Gte.compare(47.99, 48.0));
        assert!(!Op::Gt.compare(48.0, 48.0));
        assert!(Op::Eq.compare(2.0, 2.0));
    }
}
