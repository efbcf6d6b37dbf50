//! C7 — Job Scheduler: bounded-parallel execution of many episode jobs, with cancellation.

use std::path::Path;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::DownloadError;
use crate::http::HttpFetcher;
use crate::model::{EpisodeRef, JobOutcome, JobState, StateSink, StreamChoice};
use crate::orchestrator::{self, ProgressSink};
use crate::sanitize::sanitize_filename;

/// One unit of work submitted to the scheduler.
pub struct JobRequest {
    pub episode: EpisodeRef,
    pub choice: StreamChoice,
}

/// Run all `jobs` with up to `config.episode_concurrency` running at once.
///
/// A single job's failure does not cancel its siblings. `token` is a
/// process-wide cancellation flag; once cancelled, no new job is started,
/// but in-flight jobs are allowed to reach a safe stopping point.
#[allow(clippy::too_many_arguments)]
pub async fn run_batch(
    fetcher: &HttpFetcher,
    config: &EngineConfig,
    jobs: Vec<JobRequest>,
    output_root: &Path,
    progress: Option<ProgressSink>,
    on_state: Option<StateSink>,
    token: &CancellationToken,
) -> Vec<JobOutcome> {
    let total = jobs.len();
    info!(total, concurrency = config.episode_concurrency, "starting batch");

    if let Some(sink) = &on_state {
        for job in &jobs {
            sink(&job.episode, JobState::Queued);
        }
    }

    let concurrency = config.episode_concurrency.min(total).max(1);
    let mut outcomes = Vec::with_capacity(total);
    let mut in_flight = FuturesUnordered::new();
    let mut queue = jobs.into_iter();

    for _ in 0..concurrency {
        if let Some(job) = queue.next() {
            in_flight.push(run_one(fetcher, config, job, output_root, progress.clone(), on_state.clone(), token.clone()));
        }
    }

    while let Some(outcome) = in_flight.next().await {
        outcomes.push(outcome);
        if !token.is_cancelled()
            && let Some(job) = queue.next() {
                in_flight.push(run_one(
                    fetcher,
                    config,
                    job,
                    output_root,
                    progress.clone(),
                    on_state.clone(),
                    token.clone(),
                ));
            }
    }

    let failed = outcomes.iter().filter(|o| o.state == JobState::Failed).count();
    info!(total, failed, "batch complete");
    for outcome in &outcomes {
        if outcome.state == JobState::Failed
            && let Some(err) = &outcome.error {
                warn!(show = %outcome.episode.show.title, episode = outcome.episode.episode_number, error = %err, "job failed");
            }
    }

    outcomes
}

async fn run_one(
    fetcher: &HttpFetcher,
    config: &EngineConfig,
    job: JobRequest,
    output_root: &Path,
    progress: Option<ProgressSink>,
    on_state: Option<StateSink>,
    token: CancellationToken,
) -> JobOutcome {
    if token.is_cancelled() {
        if let Some(sink) = &on_state {
            sink(&job.episode, JobState::Cancelled);
        }
        return JobOutcome { episode: job.episode, state: JobState::Cancelled, error: None };
    }

    let sanitized_show = sanitize_filename(&job.episode.show.title);
    let result = orchestrator::run_episode(
        fetcher,
        config,
        &job.episode,
        &job.choice,
        output_root,
        &sanitized_show,
        progress,
        on_state.clone(),
        &token,
    )
    .await;

    let final_state = match &result {
        Ok(()) => JobState::Done,
        Err(DownloadError::Cancelled) => JobState::Cancelled,
        Err(_) => JobState::Failed,
    };
    if let Some(sink) = &on_state {
        sink(&job.episode, final_state);
    }

    match result {
        Ok(()) => JobOutcome { episode: job.episode, state: JobState::Done, error: None },
        Err(DownloadError::Cancelled) => JobOutcome { episode: job.episode, state: JobState::Cancelled, error: None },
        Err(err) => JobOutcome { episode: job.episode, state: JobState::Failed, error: Some(err) },
    }
}

/// Shared process-wide cancellation state, escalating to a forced exit on a
/// second signal, mirroring the upstream's signal handler.
pub struct ShutdownController {
    token: CancellationToken,
    signalled: Arc<std::sync::atomic::AtomicBool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self { token: CancellationToken::new(), signalled: Arc::new(std::sync::atomic::AtomicBool::new(false)) }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a task that cancels `token` on Ctrl-C, and forces the process to
    /// exit on a second Ctrl-C while a graceful shutdown is already underway.
    pub fn install_signal_handler(&self) {
        let token = self.token.clone();
        let signalled = self.signalled.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                if signalled.swap(true, std::sync::atomic::Ordering::SeqCst) {
                    std::process::exit(130);
                }
                token.cancel();
            }
        });
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
