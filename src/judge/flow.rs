//! Subtask scheduler
//!
//! Cases of every subtask go through one fair semaphore sized by the
//! configured parallelism, so they start in submission order. A subtask that
//! depends on an earlier one waits until that subtask has been aggregated,
//! which guarantees the failure flag is settled before any of its own cases
//! is considered.
//!
//! Each subtask has a single aggregating driver: case futures only read the
//! subtask state to decide whether to skip, the driver writes it as results
//! come in.
//!
//! Scores stay `f64` throughout; the total is rounded to two decimals when
//! the end event is built.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use super::{CaseResult, CaseRunner, JudgeContext, Strategy};
use crate::config::DetailLevel;
use crate::core::status::Status;
use crate::error::{JudgeError, Result};
use crate::jobs::report::{EndEvent, NextEvent, SubtaskInfo};
use crate::jobs::testdata::{Case, Subtask, SubtaskKind};

/// Round a score to two decimals
pub fn round_score(score: f64) -> f64 {
    (score * 100.0).round() / 100.0
}

fn combine(kind: SubtaskKind, current: f64, score: f64) -> f64 {
    match kind {
        SubtaskKind::Min => current.min(score),
        SubtaskKind::Max => current.max(score),
        SubtaskKind::Sum => current + score,
    }
}

#[derive(Debug)]
struct SubtaskState {
    score: f64,
    status: Status,
}

#[derive(Debug, Default)]
struct Totals {
    status: Status,
    time: f64,
    memory: f64,
    failed: HashSet<u32>,
}

struct Scheduler<'a> {
    ctx: &'a JudgeContext,
    runner: &'a dyn CaseRunner,
    permits: Semaphore,
    totals: Mutex<Totals>,
    progress: f64,
}

/// Judge one case, retrying a time limit verdict while the budget lasts
async fn judge_case(
    ctx: &JudgeContext,
    runner: &dyn CaseRunner,
    subtask: &Subtask,
    case: &Case,
) -> Result<CaseResult> {
    loop {
        match runner.judge_case(ctx, subtask, case).await {
            Ok(result) if result.status == Status::TimeLimitExceeded && ctx.take_rerun() => {
                info!("Rerunning case {} of {} after time limit", case.id, ctx.rid);
            }
            Ok(result) => return Ok(result),
            Err(e) if e.is_fatal() => {
                ctx.mark_errored();
                return Err(e);
            }
            Err(e) => {
                error!("Case {} of {} failed: {:#}", case.id, ctx.rid, e);
                return Ok(CaseResult::new(case, subtask, Status::SystemError)
                    .with_message("System error."));
            }
        }
    }
}

impl Scheduler<'_> {
    fn is_failed(&self, id: u32) -> bool {
        self.totals
            .lock()
            .map(|t| t.failed.contains(&id))
            .unwrap_or(true)
    }

    fn should_skip(&self, subtask: &Subtask, state: &Mutex<SubtaskState>) -> bool {
        if self.ctx.is_errored() {
            return true;
        }
        let settled = match state.lock() {
            Ok(state) => match subtask.kind {
                SubtaskKind::Min => state.score <= 0.0,
                SubtaskKind::Max => state.score >= subtask.score,
                SubtaskKind::Sum => false,
            },
            Err(_) => true,
        };
        settled || subtask.depends.iter().any(|d| self.is_failed(*d))
    }

    async fn run_case(
        &self,
        subtask: &Subtask,
        case: &Case,
        state: &Mutex<SubtaskState>,
    ) -> Result<CaseResult> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| JudgeError::system("Judge queue closed."))?;
        if self.should_skip(subtask, state) {
            debug!("Canceling case {} of subtask {}", case.id, subtask.id);
            return Ok(CaseResult::canceled(case, subtask));
        }
        judge_case(self.ctx, self.runner, subtask, case).await
    }

    async fn run_subtask(&self, subtask: &Subtask) -> Result<SubtaskInfo> {
        let state = Mutex::new(SubtaskState {
            score: match subtask.kind {
                SubtaskKind::Min => subtask.score,
                _ => 0.0,
            },
            status: Status::Waiting,
        });

        let mut pending: FuturesUnordered<_> = subtask
            .cases
            .iter()
            .map(|case| self.run_case(subtask, case, &state))
            .collect();

        let mut first_error = None;
        while let Some(result) = pending.next().await {
            let result = match result {
                Ok(result) => result,
                Err(e) => {
                    self.ctx.mark_errored();
                    first_error.get_or_insert(e);
                    continue;
                }
            };
            if result.status != Status::Canceled {
                if let Ok(mut state) = state.lock() {
                    state.score = combine(subtask.kind, state.score, result.score);
                    state.status = state.status.worst(result.status);
                }
                if let Ok(mut totals) = self.totals.lock() {
                    totals.time += result.time;
                    totals.memory = totals.memory.max(result.memory);
                }
            }
            if self.ctx.config.detail != DetailLevel::None {
                self.ctx
                    .next(NextEvent::case(result).with_add_progress(self.progress));
            }
        }
        drop(pending);

        if let Some(e) = first_error {
            return Err(e);
        }

        let state = state
            .into_inner()
            .map_err(|_| JudgeError::system("Subtask state poisoned."))?;
        let mut totals = self
            .totals
            .lock()
            .map_err(|_| JudgeError::system("Judge totals poisoned."))?;
        totals.status = totals.status.worst(state.status);
        let dependency_failed = subtask.depends.iter().any(|d| totals.failed.contains(d));
        if dependency_failed || (state.score <= 0.0 && state.status > Status::Accepted) {
            totals.failed.insert(subtask.id);
        }
        debug!(
            "Subtask {} of {} scored {} ({})",
            subtask.id, self.ctx.rid, state.score, state.status
        );
        Ok(SubtaskInfo {
            kind: subtask.kind,
            score: state.score,
            status: state.status,
        })
    }

    /// Wait for earlier prerequisites, judge, then signal dependents
    async fn drive(
        &self,
        subtask: &Subtask,
        prerequisites: Vec<watch::Receiver<bool>>,
        done: watch::Sender<bool>,
    ) -> Result<SubtaskInfo> {
        for mut rx in prerequisites {
            // A dropped sender has nothing more to say
            let _ = rx.wait_for(|finished| *finished).await;
        }
        let result = self.run_subtask(subtask).await;
        done.send_replace(true);
        result
    }
}

async fn judge_all(ctx: &JudgeContext, runner: &dyn CaseRunner) -> Result<()> {
    let subtasks = &ctx.config.subtasks;
    let scheduler = Scheduler {
        ctx,
        runner,
        permits: Semaphore::new(ctx.settings.parallelism.max(1)),
        totals: Mutex::new(Totals::default()),
        progress: 100.0 / ctx.config.count.max(1) as f64,
    };

    let (senders, receivers): (Vec<_>, Vec<_>) =
        subtasks.iter().map(|_| watch::channel(false)).unzip();
    let drivers = subtasks.iter().zip(senders).enumerate().map(|(index, (subtask, done))| {
        let prerequisites = subtask
            .depends
            .iter()
            .filter_map(|d| subtasks[..index].iter().position(|s| s.id == *d))
            .map(|i| receivers[i].clone())
            .collect();
        scheduler.drive(subtask, prerequisites, done)
    });
    let results = join_all(drivers).await;

    let mut infos = BTreeMap::new();
    let mut first_error = None;
    for (subtask, result) in subtasks.iter().zip(results) {
        match result {
            Ok(info) => {
                infos.insert(subtask.id, info);
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_error {
        ctx.mark_errored();
        return Err(e);
    }

    let mut totals = scheduler
        .totals
        .into_inner()
        .map_err(|_| JudgeError::system("Judge totals poisoned."))?;
    let mut score = 0.0;
    for subtask in subtasks {
        let effective = subtask.depends.iter().all(|d| !totals.failed.contains(d));
        if effective {
            score += infos.get(&subtask.id).map(|i| i.score).unwrap_or(0.0);
        } else {
            totals.failed.insert(subtask.id);
            infos.remove(&subtask.id);
        }
    }

    let mut end = EndEvent::new(totals.status, round_score(score)).with_usage(
        (totals.time * 1_000_000.0).floor() / 1_000_000.0,
        totals.memory,
    );
    end.subtasks = infos;
    ctx.end(end);
    Ok(())
}

/// Judge only the hacked case and report what the hack changes
async fn judge_hacked(ctx: &JudgeContext, runner: &dyn CaseRunner, suffix: &str) -> Result<()> {
    let (subtask, case) = ctx
        .config
        .subtasks
        .iter()
        .find_map(|s| {
            s.cases
                .iter()
                .find(|c| c.input.to_string_lossy().ends_with(suffix))
                .map(|c| (s, c))
        })
        .ok_or_else(|| JudgeError::format_with("Cannot find hacked case {0}.", vec![suffix.into()]))?;

    let result = judge_case(ctx, runner, subtask, case).await?;
    let accepted = result.status.is_accepted();
    ctx.next(NextEvent::case(result));
    if accepted {
        ctx.next(NextEvent::status(Status::Accepted));
        ctx.end(EndEvent::nop());
    } else {
        warn!("Submission {} is hacked by {}", ctx.rid, suffix);
        let total = ctx.config.total_score();
        ctx.end(EndEvent::new(Status::Hacked, round_score(total - subtask.score)));
    }
    Ok(())
}

/// Compile through `strategy`, then judge every case and send the end event
pub async fn run<S: Strategy + ?Sized>(ctx: &JudgeContext, strategy: &S) -> Result<()> {
    if ctx.config.subtasks.is_empty() {
        return Err(JudgeError::format("Problem data not found."));
    }
    ctx.next(NextEvent::status(Status::Compiling));
    let runner: Arc<dyn CaseRunner> = strategy.prepare(ctx).await?;
    ctx.next(NextEvent::progress(Status::Judging, 0.0));

    match &ctx.meta.hack_rejudge {
        Some(suffix) => judge_hacked(ctx, runner.as_ref(), suffix).await,
        None => judge_all(ctx, runner.as_ref()).await,
    }
}
