//! Extraction orchestrator: a bounded worker pool over the papers that
//! survived content filtering.
//!
//! Architecture: jobs go through an `async-channel` queue consumed by
//! `num_workers` worker tasks. Each worker owns the full per-paper
//! pipeline — cache check, budget claim, paced model call with bounded
//! backoff, validation, one repair re-prompt, atomic persist. Workers
//! share the call budget and a halt token: once model retries are
//! exhausted, no further model calls happen this run, while everything
//! already persisted stays valid for a resumed run.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::{ExcerptPolicy, ExtractionTargets, ModelBackend, ModelError, ModelRequest};
use crate::schema::ExtractionSchema;
use crate::store::RunStore;
use crate::taxonomy::Taxonomy;
use crate::{
    Config, ExtractionOutcome, ExtractionResult, ParsedPaper, ProgressEvent, RunStats,
};

/// Base backoff for unavailable-endpoint retries; doubles per attempt
/// with ±25% jitter.
const UNAVAILABLE_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Everything the workers need that is fixed for the run.
pub struct ExtractionContext {
    pub config: Config,
    pub store: RunStore,
    pub taxonomy: Arc<Taxonomy>,
    pub targets: ExtractionTargets,
    pub schema: ExtractionSchema,
    pub excerpt_policy: ExcerptPolicy,
}

/// One paper submitted to the pool.
pub struct PaperJob {
    pub paper: ParsedPaper,
    /// Clean abstract from the metadata snapshot, if known.
    pub abstract_text: Option<String>,
    pub result_tx: oneshot::Sender<JobOutcome>,
    pub index: usize,
    pub total: usize,
}

/// Terminal state of one job within this run.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// A model call happened and the result was persisted.
    Completed(ExtractionResult),
    /// A valid cached result existed; zero model calls.
    CacheHit(ExtractionResult),
    /// The budget ran out first; the paper stays eligible.
    SkippedBudget,
    /// The run halted (or was cancelled) before this paper.
    Unprocessed,
}

/// A pool of worker tasks that process paper extraction jobs.
///
/// Submit jobs via [`submit()`](ExtractionPool::submit), receive
/// results via the oneshot receiver paired with each job.
pub struct ExtractionPool {
    job_tx: async_channel::Sender<PaperJob>,
    pool_handle: JoinHandle<()>,
    model_calls: Arc<AtomicUsize>,
}

struct Shared {
    ctx: ExtractionContext,
    backend: Arc<dyn ModelBackend>,
    progress: Arc<dyn Fn(ProgressEvent) + Send + Sync>,
    client: reqwest::Client,
    /// Remaining call budget (usize::MAX when unlimited).
    budget: AtomicUsize,
    model_calls: AtomicUsize,
    /// External cancellation (Ctrl-C).
    cancel: CancellationToken,
    /// Set when model retries are exhausted; stops further calls.
    halted: CancellationToken,
}

impl ExtractionPool {
    pub fn new(
        ctx: ExtractionContext,
        backend: Arc<dyn ModelBackend>,
        progress: Arc<dyn Fn(ProgressEvent) + Send + Sync>,
        cancel: CancellationToken,
    ) -> Self {
        let (job_tx, job_rx) = async_channel::unbounded::<PaperJob>();
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let num_workers = ctx.config.num_workers.max(1);
        let budget = ctx.config.call_budget.unwrap_or(usize::MAX);

        let shared = Arc::new(Shared {
            ctx,
            backend,
            progress,
            client,
            budget: AtomicUsize::new(budget),
            model_calls: AtomicUsize::new(0),
            cancel,
            halted: CancellationToken::new(),
        });

        let model_calls = Arc::new(AtomicUsize::new(0));
        let model_calls_outer = Arc::clone(&model_calls);

        let pool_handle = tokio::spawn(async move {
            let mut handles = Vec::with_capacity(num_workers);
            for _ in 0..num_workers {
                handles.push(tokio::spawn(worker_loop(
                    job_rx.clone(),
                    Arc::clone(&shared),
                )));
            }
            drop(job_rx);
            for h in handles {
                let _ = h.await;
            }
            model_calls_outer.store(shared.model_calls.load(Ordering::SeqCst), Ordering::SeqCst);
        });

        Self {
            job_tx,
            pool_handle,
            model_calls,
        }
    }

    pub async fn submit(&self, job: PaperJob) {
        let _ = self.job_tx.send(job).await;
    }

    /// Close the queue and wait for workers to drain. Returns the
    /// number of model calls made.
    pub async fn shutdown(self) -> usize {
        self.job_tx.close();
        let _ = self.pool_handle.await;
        self.model_calls.load(Ordering::SeqCst)
    }
}

async fn worker_loop(job_rx: async_channel::Receiver<PaperJob>, shared: Arc<Shared>) {
    while let Ok(job) = job_rx.recv().await {
        let outcome = process_paper(&job, &shared).await;
        let _ = job.result_tx.send(outcome);
    }
}

async fn process_paper(job: &PaperJob, shared: &Shared) -> JobOutcome {
    let ctx = &shared.ctx;
    let id = job.paper.paper_id.clone();
    let version = ctx.schema.version;

    if shared.cancel.is_cancelled() || shared.halted.is_cancelled() {
        return JobOutcome::Unprocessed;
    }

    (shared.progress)(ProgressEvent::Extracting {
        index: job.index,
        total: job.total,
        paper_id: id.clone(),
    });

    // Idempotence: a cached result for the current schema version means
    // zero model calls. This is the primary cost control.
    if !ctx.config.force_refresh
        && let Some(existing) = ctx.store.load_extraction(&id, version)
    {
        tracing::debug!(paper_id = %id, version, "extraction cache hit");
        (shared.progress)(ProgressEvent::CacheHit {
            index: job.index,
            total: job.total,
            paper_id: id.clone(),
        });
        emit_result(shared, job, &existing);
        return JobOutcome::CacheHit(existing);
    }

    // Claim a budget slot before touching the model. A claimed slot
    // covers the paper's call and its single repair re-prompt.
    let claimed = shared
        .budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| b.checked_sub(1))
        .is_ok();
    if !claimed {
        tracing::info!(paper_id = %id, "call budget exhausted, leaving paper for a future run");
        (shared.progress)(ProgressEvent::BudgetExhausted {
            paper_id: id.clone(),
        });
        return JobOutcome::SkippedBudget;
    }

    let request = crate::model::build_request(
        &job.paper,
        job.abstract_text.as_deref(),
        &ctx.targets,
        &ctx.taxonomy,
        &ctx.schema,
        &ctx.excerpt_policy,
    );

    let outcome = match invoke_with_backoff(shared, &id, &request).await {
        CallResult::Text(raw) => match ctx.schema.validate(&raw, &ctx.taxonomy) {
            Ok(record) => ExtractionOutcome::Success(record),
            Err(first_error) => {
                // One bounded repair attempt: re-prompt with the
                // validation error appended.
                (shared.progress)(ProgressEvent::RepairRetry {
                    paper_id: id.clone(),
                    reason: first_error.to_string(),
                });
                let repaired = repair_request(&request, &raw, &first_error.to_string());
                match invoke_with_backoff(shared, &id, &repaired).await {
                    CallResult::Text(raw2) => match ctx.schema.validate(&raw2, &ctx.taxonomy) {
                        Ok(record) => ExtractionOutcome::Success(record),
                        Err(second_error) => ExtractionOutcome::ValidationFailure {
                            reason: second_error.to_string(),
                        },
                    },
                    CallResult::Refused => ExtractionOutcome::Refused,
                    CallResult::Invalid(reason) => {
                        ExtractionOutcome::ValidationFailure { reason }
                    }
                    // Endpoint went away mid-repair: keep the first
                    // error as this paper's terminal state.
                    CallResult::Halt => ExtractionOutcome::ValidationFailure {
                        reason: first_error.to_string(),
                    },
                }
            }
        },
        CallResult::Refused => ExtractionOutcome::Refused,
        CallResult::Invalid(reason) => ExtractionOutcome::ValidationFailure { reason },
        CallResult::Halt => return JobOutcome::Unprocessed,
    };

    let result = ExtractionResult {
        paper_id: id.clone(),
        schema_version: version,
        outcome,
    };
    if let Err(e) = ctx.store.write_extraction(&result) {
        tracing::error!(paper_id = %id, error = %e, "failed to persist extraction result");
    }
    emit_result(shared, job, &result);
    JobOutcome::Completed(result)
}

fn emit_result(shared: &Shared, job: &PaperJob, result: &ExtractionResult) {
    let status = match &result.outcome {
        ExtractionOutcome::Success(_) => "success",
        ExtractionOutcome::ValidationFailure { .. } => "validation_failure",
        ExtractionOutcome::Refused => "refused",
    };
    tracing::info!(paper_id = %result.paper_id, status, "extraction result");
    (shared.progress)(ProgressEvent::Result {
        index: job.index,
        total: job.total,
        result: Box::new(result.clone()),
    });
}

enum CallResult {
    Text(String),
    Refused,
    /// Provider reply the adapter could not read — treated as a
    /// validation failure, never as fatal.
    Invalid(String),
    /// Unavailable retries exhausted; the whole run stops calling.
    Halt,
}

/// Invoke the model with pacing and bounded retries on transient
/// failures. Sets the shared halt token when retries are exhausted.
async fn invoke_with_backoff(shared: &Shared, paper_id: &str, request: &ModelRequest) -> CallResult {
    let config = &shared.ctx.config;
    let timeout = Duration::from_secs(config.call_timeout_secs);
    let max_retries = config.max_unavailable_retries;

    let mut attempt: u32 = 0;
    loop {
        if shared.cancel.is_cancelled() || shared.halted.is_cancelled() {
            return CallResult::Halt;
        }

        config.limiter.acquire().await;
        shared.model_calls.fetch_add(1, Ordering::SeqCst);

        let error = match shared
            .backend
            .invoke(request, &shared.client, timeout)
            .await
        {
            Ok(text) => return CallResult::Text(text),
            Err(e) => e,
        };

        match error {
            ModelError::Refused(reason) => {
                tracing::info!(paper_id, reason = %reason, "model refused");
                return CallResult::Refused;
            }
            ModelError::Invalid(reason) => {
                tracing::warn!(paper_id, reason = %reason, "unreadable model reply");
                return CallResult::Invalid(reason);
            }
            ModelError::RateLimited { retry_after } => {
                config.limiter.on_rate_limited();
                if attempt >= max_retries {
                    halt_run(shared, "model rate limit retries exhausted");
                    return CallResult::Halt;
                }
                let wait = retry_after.unwrap_or_else(|| backoff_delay(attempt));
                (shared.progress)(ProgressEvent::ModelRetry {
                    paper_id: paper_id.to_string(),
                    attempt: attempt + 1,
                    backoff: wait,
                });
                tokio::time::sleep(wait).await;
            }
            ModelError::Unavailable { reason } => {
                if attempt >= max_retries {
                    halt_run(shared, &format!("model unavailable: {reason}"));
                    return CallResult::Halt;
                }
                let wait = backoff_delay(attempt);
                tracing::warn!(paper_id, reason = %reason, attempt, "model unavailable, backing off");
                (shared.progress)(ProgressEvent::ModelRetry {
                    paper_id: paper_id.to_string(),
                    attempt: attempt + 1,
                    backoff: wait,
                });
                tokio::time::sleep(wait).await;
            }
        }
        attempt += 1;
    }
}

fn halt_run(shared: &Shared, reason: &str) {
    if !shared.halted.is_cancelled() {
        tracing::error!(reason, "halting model calls for this run");
        (shared.progress)(ProgressEvent::Halted {
            reason: reason.to_string(),
        });
        shared.halted.cancel();
    }
}

/// Exponential backoff with ±25% jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let base = UNAVAILABLE_BACKOFF_BASE.as_millis() as u64;
    let scaled = base.saturating_mul(1u64 << attempt.min(6));
    let jitter = (scaled / 4).max(1);
    Duration::from_millis(scaled - jitter / 2 + fastrand::u64(0..jitter))
}

/// Append the validation error (and the offending reply) to the system
/// prompt for the repair attempt.
fn repair_request(request: &ModelRequest, raw: &str, error: &str) -> ModelRequest {
    let mut system_prompt = request.system_prompt.clone();
    system_prompt.push_str(&format!(
        "\n\n--- PREVIOUS ATTEMPT FAILED VALIDATION ---\n\
Your previous reply was rejected: {error}\n\
Previous reply (for reference):\n{raw}\n\
Return a corrected JSON object that satisfies the schema.\n"
    ));
    ModelRequest {
        system_prompt,
        document: request.document.clone(),
        response_schema: request.response_schema.clone(),
    }
}

/// Run extraction over all surviving papers and collect results.
///
/// Creates an internal [`ExtractionPool`], submits every paper, awaits
/// the oneshot results, and assembles [`RunStats`]. Cancellation leaves
/// already-persisted results intact.
pub async fn extract_candidates(
    papers: Vec<(ParsedPaper, Option<String>)>,
    ctx: ExtractionContext,
    backend: Arc<dyn ModelBackend>,
    progress: impl Fn(ProgressEvent) + Send + Sync + 'static,
    cancel: CancellationToken,
) -> (Vec<ExtractionResult>, RunStats) {
    let total = papers.len();
    let mut stats = RunStats {
        total,
        ..RunStats::default()
    };
    if total == 0 {
        return (vec![], stats);
    }

    let pool = ExtractionPool::new(ctx, backend, Arc::new(progress), cancel.clone());

    let mut receivers = Vec::with_capacity(total);
    for (index, (paper, abstract_text)) in papers.into_iter().enumerate() {
        let (result_tx, result_rx) = oneshot::channel();
        pool.submit(PaperJob {
            paper,
            abstract_text,
            result_tx,
            index,
            total,
        })
        .await;
        receivers.push(result_rx);
    }

    let mut results = Vec::new();
    for rx in receivers {
        let Ok(outcome) = rx.await else {
            stats.unprocessed += 1;
            continue;
        };
        match outcome {
            JobOutcome::Completed(result) => results.push(result),
            JobOutcome::CacheHit(result) => {
                stats.cache_hits += 1;
                results.push(result);
            }
            JobOutcome::SkippedBudget => stats.budget_skipped += 1,
            JobOutcome::Unprocessed => stats.unprocessed += 1,
        }
    }

    for result in &results {
        match &result.outcome {
            ExtractionOutcome::Success(_) => stats.succeeded += 1,
            ExtractionOutcome::ValidationFailure { .. } => stats.validation_failures += 1,
            ExtractionOutcome::Refused => stats.refusals += 1,
        }
    }

    stats.model_calls = pool.shutdown().await;
    (results, stats)
}
