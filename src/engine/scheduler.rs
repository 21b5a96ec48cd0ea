use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use crate::engine::task::{run_task, TaskContext, TaskOutcome, TaskState};
use crate::rules::RulesRegistry;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    pub lookahead_days: u32,
    pub max_concurrent_tasks: usize,
    pub task_timeout_secs: u64,
    pub rules_path: String,
}

#[derive(Debug, Default)]
pub struct SchedulerSummary {
    pub cycles: u64,
    pub tasks_completed: u64,
    pub tasks_skipped: u64,
    pub decisions: u64,
    pub trades: u64,
}

/// Top-level continuous control loop.
///
/// Ticks on a fixed interval; every tick enumerates (active station ×
/// lookahead day) pairs as independent tasks, bounded by a semaphore sized
/// for external API rate limits. Failure isolation is per-task. The stop
/// signal is cooperative: checked between cycles, with per-task timeouts
/// bounding shutdown latency.
pub struct Scheduler {
    ctx: Arc<TaskContext>,
    config: SchedulerConfig,
    shutdown: watch::Receiver<bool>,
    semaphore: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(ctx: Arc<TaskContext>, config: SchedulerConfig, shutdown: watch::Receiver<bool>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));
        Self {
            ctx,
            config,
            shutdown,
            semaphore,
        }
    }

    pub async fn run(&mut self) -> Result<SchedulerSummary> {
        let mut rules = Arc::new(RulesRegistry::load(&self.config.rules_path)?);
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        let task_timeout = Duration::from_secs(self.config.task_timeout_secs);
        let mut summary = SchedulerSummary::default();

        info!(
            stations = rules.stations().len(),
            lookahead_days = self.config.lookahead_days,
            interval_secs = self.config.interval_secs,
            "scheduler started"
        );

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            // Rules hot-reload happens between cycles, never mid-cycle.
            match RulesRegistry::load(&self.config.rules_path) {
                Ok(reloaded) => rules = Arc::new(reloaded),
                Err(e) => warn!("rules reload failed, keeping previous: {}", e),
            }

            let cycle_ts = Utc::now();
            let mut handles = Vec::new();

            for station in rules.stations() {
                for offset in 0..self.config.lookahead_days {
                    let station = station.clone();
                    let event_day = station.local_date(cycle_ts)
                        + chrono::Duration::days(offset as i64);
                    let ctx = Arc::clone(&self.ctx);
                    let rules = Arc::clone(&rules);
                    let semaphore = Arc::clone(&self.semaphore);
                    let shutdown = self.shutdown.clone();

                    handles.push(tokio::spawn(async move {
                        let _permit = match semaphore.acquire_owned().await {
                            Ok(p) => p,
                            Err(_) => {
                                return TaskOutcome::skipped(
                                    &station,
                                    event_day,
                                    "scheduler shutting down".into(),
                                )
                            }
                        };
                        // Stop requests are honored between tasks: anything
                        // still queued behind the semaphore skips instead of
                        // starting.
                        if *shutdown.borrow() {
                            return TaskOutcome::skipped(
                                &station,
                                event_day,
                                "stop requested".into(),
                            );
                        }
                        match tokio::time::timeout(
                            task_timeout,
                            run_task(&ctx, &rules, &station, event_day, cycle_ts),
                        )
                        .await
                        {
                            Ok(outcome) => outcome,
                            Err(_) => {
                                warn!(station = %station.code, %event_day, "task timed out");
                                TaskOutcome::skipped(&station, event_day, "task timeout".into())
                            }
                        }
                    }));
                }
            }

            for joined in join_all(handles).await {
                match joined {
                    Ok(outcome) => {
                        if outcome.state == TaskState::Skipped {
                            summary.tasks_skipped += 1;
                        } else {
                            summary.tasks_completed += 1;
                        }
                        summary.decisions += outcome.decisions as u64;
                        summary.trades += outcome.trades as u64;
                    }
                    Err(e) => error!("task panicked: {}", e),
                }
            }

            summary.cycles += 1;
            info!(
                cycle = summary.cycles,
                completed = summary.tasks_completed,
                skipped = summary.tasks_skipped,
                trades = summary.trades,
                "cycle complete"
            );

            if *self.shutdown.borrow() {
                break;
            }
        }

        info!(
            cycles = summary.cycles,
            trades = summary.trades,
            "scheduler stopped"
        );
        Ok(summary)
    }
}
