//! # Pipeline Scheduler
//!
//! Independent timers for the scheduled rule passes, the escalation sweep and
//! the reconciliation sweep. Each timer runs in its own task so a slow pass
//! never delays the others; all of them stop on the shared shutdown token.

use std::sync::Arc;
use std::time::Duration;

use metrics::histogram;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::ScheduleConfig;
use crate::error::PipelineError;
use crate::pipeline::Pipeline;
use crate::rules::ScheduleMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    HourlyRules,
    DailyRules,
    Escalation,
    Reconcile,
}

impl Timer {
    pub const ALL: [Timer; 4] = [
        Timer::HourlyRules,
        Timer::DailyRules,
        Timer::Escalation,
        Timer::Reconcile,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Timer::HourlyRules => "hourly_rules",
            Timer::DailyRules => "daily_rules",
            Timer::Escalation => "escalation",
            Timer::Reconcile => "reconcile",
        }
    }

    pub fn interval(self, schedule: &ScheduleConfig) -> Duration {
        match self {
            Timer::HourlyRules => schedule.hourly_interval(),
            Timer::DailyRules => schedule.daily_interval(),
            Timer::Escalation => schedule.escalation_interval(),
            Timer::Reconcile => schedule.reconcile_interval(),
        }
    }

    /// Run the pass this timer drives once.
    pub async fn fire(self, pipeline: &Pipeline) -> Result<(), PipelineError> {
        match self {
            Timer::HourlyRules => {
                pipeline
                    .evaluate_scheduled_rules(ScheduleMode::Hourly)
                    .await?;
            }
            Timer::DailyRules => {
                pipeline
                    .evaluate_scheduled_rules(ScheduleMode::Daily)
                    .await?;
            }
            Timer::Escalation => {
                pipeline.run_escalation_check().await?;
            }
            Timer::Reconcile => {
                pipeline.reconcile().await?;
            }
        }
        Ok(())
    }
}

/// Background scheduler service.
pub struct PipelineScheduler {
    pipeline: Arc<Pipeline>,
    schedule: ScheduleConfig,
}

impl PipelineScheduler {
    pub fn new(pipeline: Arc<Pipeline>, schedule: ScheduleConfig) -> Self {
        Self { pipeline, schedule }
    }

    /// Run every timer until the shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting pipeline scheduler");

        let tasks: Vec<_> = Timer::ALL
            .into_iter()
            .map(|timer| {
                let pipeline = Arc::clone(&self.pipeline);
                let interval = timer.interval(&self.schedule);
                let shutdown = shutdown.clone();
                tokio::spawn(run_timer(timer, interval, pipeline, shutdown))
            })
            .collect();

        for task in tasks {
            if let Err(err) = task.await {
                error!(error = %err, "Scheduler timer task terminated abnormally");
            }
        }

        info!("Pipeline scheduler stopped");
    }
}

async fn run_timer(
    timer: Timer,
    interval: Duration,
    pipeline: Arc<Pipeline>,
    shutdown: CancellationToken,
) {
    debug!(timer = timer.as_str(), interval_secs = interval.as_secs(), "Timer started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(timer = timer.as_str(), "Timer shutdown requested");
                break;
            }
            _ = sleep(interval) => {
                let started = Instant::now();
                if let Err(err) = timer.fire(&pipeline).await {
                    error!(timer = timer.as_str(), error = %err, "Scheduled run failed");
                }
                histogram!("scheduler_run_duration_ms", "timer" => timer.as_str())
                    .record(started.elapsed().as_secs_f64() * 1_000.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timers_use_their_own_intervals() {
        let schedule = ScheduleConfig::default();
        assert_eq!(
            Timer::HourlyRules.interval(&schedule),
            Duration::from_secs(3600)
        );
        assert_eq!(
            Timer::DailyRules.interval(&schedule),
            Duration::from_secs(86_400)
        );
        assert_eq!(
            Timer::Escalation.interval(&schedule),
            Duration::from_secs(1800)
        );
        assert_eq!(Timer::Reconcile.interval(&schedule), Duration::from_secs(300));
    }
}
