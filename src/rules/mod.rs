//! Anomaly rule engine
//!
//! Rules are rows in `anomaly_rules`: a scope, an optional step type, a
//! severity, a [`Condition`] and a [`RuleAction`]. The same interpreter runs
//! right after an event is applied (`realtime` rules) and on the hourly and
//! daily timers (`hourly`/`daily` rules). Every rule whose condition holds
//! yields its own [`RuleResult`].

pub mod condition;
pub mod context;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use metrics::counter;
use regex::{Captures, Regex};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use condition::{Condition, Field, Metric, Op};
pub use context::{ContextBuilder, EvaluationContext};

use crate::error::PipelineError;
use crate::models::{anomaly_rule, event};
use crate::normalization::parse_event_type;
use crate::repositories::{ProjectRepository, RuleRepository};
use crate::steps::step_mapping;

#[derive(Debug, Error, PartialEq)]
pub enum RuleError {
    #[error("rule {rule_id} has an invalid {part}: {reason}")]
    InvalidDefinition {
        rule_id: Uuid,
        part: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Ok,
    Warning,
    Critical,
}

impl Severity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Severity::Ok => "ok",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ok" => Ok(Severity::Ok),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleScope {
    Project,
    Order,
}

impl RuleScope {
    pub const fn as_str(self) -> &'static str {
        match self {
            RuleScope::Project => "project",
            RuleScope::Order => "order",
        }
    }
}

impl FromStr for RuleScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "project" => Ok(RuleScope::Project),
            "order" => Ok(RuleScope::Order),
            other => Err(format!("unknown scope '{other}'")),
        }
    }
}

/// Which evaluation pass runs a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Realtime,
    Hourly,
    Daily,
}

impl Trigger {
    pub const fn as_str(self) -> &'static str {
        match self {
            Trigger::Realtime => "realtime",
            Trigger::Hourly => "hourly",
            Trigger::Daily => "daily",
        }
    }
}

/// Timer-driven evaluation modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum ScheduleMode {
    Hourly,
    Daily,
}

impl ScheduleMode {
    pub const fn trigger(self) -> Trigger {
        match self {
            ScheduleMode::Hourly => Trigger::Hourly,
            ScheduleMode::Daily => Trigger::Daily,
        }
    }
}

impl fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.trigger().as_str())
    }
}

/// Effect of a firing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub create_ticket: bool,
}

fn default_subject() -> String {
    "[{severity}] {rule_name}: project {project_ref}".to_string()
}

/// A rule row with its JSON columns parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDefinition {
    pub id: Uuid,
    pub name: String,
    pub scope: RuleScope,
    pub step_type: Option<String>,
    pub severity: Severity,
    pub condition: Condition,
    pub action: RuleAction,
}

impl TryFrom<&anomaly_rule::Model> for RuleDefinition {
    type Error = RuleError;

    fn try_from(model: &anomaly_rule::Model) -> Result<Self, Self::Error> {
        let invalid = |part: &'static str, reason: String| RuleError::InvalidDefinition {
            rule_id: model.id,
            part,
            reason,
        };

        Ok(Self {
            id: model.id,
            name: model.name.clone(),
            scope: model.scope.parse().map_err(|err| invalid("scope", err))?,
            step_type: model.step_type.clone(),
            severity: model.severity.parse().map_err(|err| invalid("severity", err))?,
            condition: serde_json::from_value(model.condition.clone())
                .map_err(|err| invalid("condition", err.to_string()))?,
            action: serde_json::from_value(model.action.clone())
                .map_err(|err| invalid("action", err.to_string()))?,
        })
    }
}

/// Output of one rule evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleResult {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub triggered: bool,
    pub severity: Severity,
    pub scope: RuleScope,
    pub recipients: Vec<String>,
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
    pub project_id: Uuid,
    pub order_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub create_ticket: bool,
}

fn placeholder_pattern() -> Option<&'static Regex> {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{([a-z_]+)\}").ok())
        .as_ref()
}

/// Replace `{name}` placeholders; unknown names are left as written.
pub fn interpolate(template: &str, values: &HashMap<&str, String>) -> String {
    let Some(pattern) = placeholder_pattern() else {
        return template.to_string();
    };
    pattern
        .replace_all(template, |caps: &Captures<'_>| {
            values
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Evaluate one rule against `ctx`. Pure; never touches storage.
pub fn evaluate_rule(
    rule: &RuleDefinition,
    ctx: &EvaluationContext,
    default_recipients: &[String],
) -> RuleResult {
    let triggered = rule.condition.evaluate(ctx, rule.step_type.as_deref());

    let values: HashMap<&str, String> = HashMap::from([
        ("rule_name", rule.name.clone()),
        ("severity", rule.severity.as_str().to_string()),
        ("project_ref", ctx.project.reference.clone()),
        (
            "order_ref",
            ctx.order
                .as_ref()
                .map(|order| order.reference.clone())
                .unwrap_or_default(),
        ),
        (
            "event_type",
            ctx.event
                .as_ref()
                .map(|event| event.event_type.clone())
                .unwrap_or_default(),
        ),
    ]);

    let subject = interpolate(&rule.action.subject, &values);
    let text = rule
        .action
        .body
        .as_deref()
        .map(|body| interpolate(body, &values))
        .unwrap_or_else(|| subject.clone());
    let html = format!("<p>{}</p>", escape_html(&text));

    let recipients = if rule.action.recipients.is_empty() {
        default_recipients.to_vec()
    } else {
        rule.action.recipients.clone()
    };

    RuleResult {
        rule_id: rule.id,
        rule_name: rule.name.clone(),
        triggered,
        severity: rule.severity,
        scope: rule.scope,
        recipients,
        subject,
        html: Some(html),
        text: Some(text),
        project_id: ctx.project.id,
        order_id: match rule.scope {
            RuleScope::Order => ctx.order.as_ref().map(|order| order.id),
            RuleScope::Project => None,
        },
        event_id: ctx.event.as_ref().map(|event| event.id),
        create_ticket: rule.action.create_ticket,
    }
}

#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: RuleRepository,
    projects: ProjectRepository,
    contexts: ContextBuilder,
    default_recipients: Vec<String>,
}

impl RuleEngine {
    pub fn new(db: DatabaseConnection, default_recipients: Vec<String>) -> Self {
        Self {
            rules: RuleRepository::new(db.clone()),
            projects: ProjectRepository::new(db.clone()),
            contexts: ContextBuilder::new(db),
            default_recipients,
        }
    }

    async fn load_rules(&self, trigger: Trigger) -> Result<Vec<RuleDefinition>, PipelineError> {
        let rows = self.rules.list_active(trigger.as_str()).await?;
        Ok(rows
            .iter()
            .filter_map(|row| match RuleDefinition::try_from(row) {
                Ok(rule) => Some(rule),
                Err(err) => {
                    warn!(error = %err, "Skipping malformed rule");
                    None
                }
            })
            .collect())
    }

    /// Evaluate `realtime` rules for the project (and order) an event touched.
    pub async fn evaluate_realtime(
        &self,
        event: &event::Model,
        now: DateTime<Utc>,
    ) -> Result<Vec<RuleResult>, PipelineError> {
        let rules = self.load_rules(Trigger::Realtime).await?;
        if rules.is_empty() {
            return Ok(Vec::new());
        }

        let Some(ctx) = self
            .contexts
            .build(event.project_id, event.order_id, Some(event.clone()), now)
            .await?
        else {
            return Ok(Vec::new());
        };

        let event_step = parse_event_type(&event.event_type)
            .and_then(step_mapping)
            .map(|mapping| mapping.step_type);

        let results: Vec<RuleResult> = rules
            .iter()
            .filter(|rule| rule.scope == RuleScope::Project || ctx.order.is_some())
            .filter(|rule| match rule.step_type.as_deref() {
                Some(step_type) => event_step == Some(step_type),
                None => true,
            })
            .map(|rule| evaluate_rule(rule, &ctx, &self.default_recipients))
            .filter(|result| result.triggered)
            .collect();

        record_triggered(&results, Trigger::Realtime);
        debug!(
            event_id = %event.id,
            rules = rules.len(),
            triggered = results.len(),
            "Realtime rules evaluated"
        );
        Ok(results)
    }

    /// Evaluate `hourly` or `daily` rules across every active project and,
    /// for order rules, each of its non-cancelled orders.
    pub async fn evaluate_scheduled(
        &self,
        mode: ScheduleMode,
        now: DateTime<Utc>,
    ) -> Result<Vec<RuleResult>, PipelineError> {
        let trigger = mode.trigger();
        let rules = self.load_rules(trigger).await?;
        if rules.is_empty() {
            return Ok(Vec::new());
        }

        let projects = self.projects.list_active().await?;
        let mut results = Vec::new();

        for project in &projects {
            let Some(ctx) = self.contexts.build(project.id, None, None, now).await? else {
                continue;
            };

            for rule in &rules {
                match rule.scope {
                    RuleScope::Project => {
                        results.push(evaluate_rule(rule, &ctx, &self.default_recipients));
                    }
                    RuleScope::Order => {
                        for order in ctx.orders.iter().filter(|order| order.status != "cancelled") {
                            let focused = ctx.with_order(Some(order.clone()));
                            results.push(evaluate_rule(rule, &focused, &self.default_recipients));
                        }
                    }
                }
            }
        }

        results.retain(|result| result.triggered);
        record_triggered(&results, trigger);
        info!(
            mode = %mode,
            projects = projects.len(),
            rules = rules.len(),
            triggered = results.len(),
            "Scheduled rules evaluated"
        );
        Ok(results)
    }
}

fn record_triggered(results: &[RuleResult], trigger: Trigger) {
    if !results.is_empty() {
        counter!("rule_results_triggered_total", "trigger" => trigger.as_str())
            .increment(results.len() as u64);
    }
}
