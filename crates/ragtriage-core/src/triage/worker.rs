//! Judge worker pool with a shared MPMC queue.
//!
//! Workers pop requests from an async_channel, call the judge with retries,
//! and send exactly one outcome per request back over mpsc. Cancellation is
//! observed before each dispatch and raced against in-flight calls and
//! backoff sleeps.

use crate::judge::{Judge, JudgeRequest, JudgeUsage, JudgeVerdict};
use crate::retry::RetryPolicy;
use async_channel::{Receiver, Sender};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// MESSAGES
// ============================================================================

#[derive(Debug, Clone)]
pub struct JudgeTask {
    /// Position of the case in the evaluation's failed case list.
    pub index: usize,
    pub request: JudgeRequest,
}

#[derive(Debug, Clone)]
pub enum JudgeOutcome {
    Judged { verdict: JudgeVerdict, attempts: u32 },
    Failed {
        error: String,
        attempts: u32,
        /// Billed usage of the final attempt, if any.
        usage: Option<JudgeUsage>,
    },
    Cancelled { attempts: u32 },
}

impl JudgeOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            JudgeOutcome::Judged { attempts, .. }
            | JudgeOutcome::Failed { attempts, .. }
            | JudgeOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JudgeResult {
    pub index: usize,
    pub case_id: String,
    pub failing_metric: String,
    pub outcome: JudgeOutcome,
}

// ============================================================================
// POOL
// ============================================================================

pub struct JudgePool {
    work_tx: Sender<JudgeTask>,
    result_rx: mpsc::UnboundedReceiver<JudgeResult>,
    workers: Vec<JoinHandle<()>>,
}

impl JudgePool {
    pub fn start(
        concurrency: usize,
        judge: Arc<dyn Judge>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        let (work_tx, work_rx) = async_channel::unbounded();
        let (result_tx, result_rx) = mpsc::unbounded_channel();

        let workers = (0..concurrency.max(1))
            .map(|id| {
                let ctx = WorkerContext {
                    id: id as u64,
                    judge: judge.clone(),
                    policy,
                    cancel: cancel.clone(),
                };
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                tokio::spawn(async move { worker_loop(ctx, work_rx, result_tx).await })
            })
            .collect();

        Self {
            work_tx,
            result_rx,
            workers,
        }
    }

    /// Queue all tasks and close the queue; workers exit once it drains.
    pub async fn push_batch(&self, tasks: Vec<JudgeTask>) {
        for task in tasks {
            // Unbounded channel - send only fails once closed
            let _ = self.work_tx.send(task).await;
        }
        self.work_tx.close();
    }

    /// Receive the next outcome, or None once every worker has exited.
    pub async fn recv(&mut self) -> Option<JudgeResult> {
        self.result_rx.recv().await
    }

    pub async fn shutdown(self) {
        self.work_tx.close();
        for handle in self.workers {
            let _ = handle.await;
        }
    }
}

// ============================================================================
// WORKER
// ============================================================================

struct WorkerContext {
    id: u64,
    judge: Arc<dyn Judge>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

async fn worker_loop(
    ctx: WorkerContext,
    work_rx: Receiver<JudgeTask>,
    result_tx: mpsc::UnboundedSender<JudgeResult>,
) {
    info!(worker_id = ctx.id, judge = ctx.judge.kind(), "Judge worker started");

    while let Ok(task) = work_rx.recv().await {
        let outcome = if ctx.cancel.is_cancelled() {
            JudgeOutcome::Cancelled { attempts: 0 }
        } else {
            debug!(worker_id = ctx.id, case_id = %task.request.case_id, "Judging case");
            judge_with_retry(&ctx, &task.request).await
        };

        let result = JudgeResult {
            index: task.index,
            case_id: task.request.case_id,
            failing_metric: task.request.failing_metric,
            outcome,
        };
        if result_tx.send(result).is_err() {
            break;
        }
    }

    debug!(worker_id = ctx.id, "Judge worker stopped");
}

async fn judge_with_retry(ctx: &WorkerContext, request: &JudgeRequest) -> JudgeOutcome {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = tokio::select! {
            biased;
            r = ctx.judge.judge(request) => r,
            _ = ctx.cancel.cancelled() => return JudgeOutcome::Cancelled { attempts },
        };

        let err = match result {
            Ok(verdict) => return JudgeOutcome::Judged { verdict, attempts },
            Err(e) => e,
        };

        if !err.is_retryable() || attempts >= ctx.policy.max_attempts() {
            warn!(
                worker_id = ctx.id,
                case_id = %request.case_id,
                attempts,
                error = %err,
                "Judge call failed"
            );
            return JudgeOutcome::Failed {
                error: err.to_string(),
                attempts,
                usage: err.usage().cloned(),
            };
        }

        let delay = ctx.policy.backoff_duration(attempts);
        warn!(
            worker_id = ctx.id,
            case_id = %request.case_id,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Judge call failed, retrying"
        );
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return JudgeOutcome::Cancelled { attempts },
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
