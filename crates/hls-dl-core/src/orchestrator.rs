//! C6 — Episode Orchestrator: sequences resolve -> parse -> download -> mux for one episode.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::EngineConfig;
use crate::error::DownloadError;
use crate::http::HttpFetcher;
use crate::model::{EpisodeRef, EpisodeWorkspace, JobState, Progress, StateSink, StreamChoice};
use crate::{mux, pipeline, playlist, resolver::StreamResolver};

pub type ProgressSink = Arc<dyn Fn(Progress) + Send + Sync>;

/// Run one episode to completion (or a recoverable failure), honoring resume.
#[allow(clippy::too_many_arguments)]
#[instrument(skip(fetcher, config, progress, on_state, token), fields(show = %episode.show.title, episode = episode.episode_number))]
pub async fn run_episode(
    fetcher: &HttpFetcher,
    config: &EngineConfig,
    episode: &EpisodeRef,
    choice: &StreamChoice,
    output_root: &std::path::Path,
    sanitized_show: &str,
    progress: Option<ProgressSink>,
    on_state: Option<StateSink>,
    token: &CancellationToken,
) -> Result<(), DownloadError> {
    let output_path = output_root
        .join(sanitized_show)
        .join(format!("{sanitized_show} Episode {}.mp4", episode.episode_number));

    if tokio::fs::metadata(&output_path).await.is_ok() {
        info!("output already exists, skipping episode");
        return Ok(());
    }

    let workspace_root: PathBuf = output_root.join(sanitized_show).join(episode.episode_number.to_string());
    tokio::fs::create_dir_all(&workspace_root).await?;
    let workspace = EpisodeWorkspace::new(workspace_root);

    if let Some(sink) = &on_state {
        sink(episode, JobState::Resolving);
    }

    let playlist_path = workspace.playlist_path();
    let playlist_text = if tokio::fs::metadata(&playlist_path).await.is_ok() {
        tokio::fs::read_to_string(&playlist_path).await?
    } else {
        info!("resolving stream");
        let resolver = StreamResolver::new(fetcher, &config.http.base_url, config.script_eval_timeout);
        let playlist_url = resolver.resolve_playlist_url(episode, choice, token).await?;
        let body = fetcher.fetch(&playlist_url, token).await?;
        tokio::fs::write(&playlist_path, &body).await?;
        String::from_utf8_lossy(&body).into_owned()
    };

    let plan = playlist::parse(&playlist_text)?;

    if let Some(sink) = &on_state {
        sink(episode, JobState::Downloading);
    }
    info!(segments = plan.segments.len(), "downloading segments");
    pipeline::download_all(fetcher, &plan, &workspace, config.segment_concurrency, progress.clone(), token).await?;

    if let Some(sink) = &on_state {
        sink(episode, JobState::Muxing);
    }
    info!("muxing");
    mux::mux(&workspace, &plan, &output_path, config.muxer_binary.as_deref(), progress, token).await?;

    Ok(())
}
