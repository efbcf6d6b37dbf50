use std::path::PathBuf;
use std::process;

use clap::Parser;
use hls_dl_core::config::EngineConfig;
use hls_dl_core::model::{EpisodeRef, JobState, Progress, Quality, ShowRef, StreamChoice};
use hls_dl_core::{HttpFetcher, JobRequest, ShutdownController};
use tracing::error;

/// Batch-download HLS episodes: resolve, fetch, decrypt, mux.
#[derive(Parser, Debug)]
#[command(name = "hls-dl")]
struct Args {
    /// Catalog base URL (scheme + host, no trailing slash).
    #[arg(long)]
    base_url: String,

    /// Show session identifier, as used in the site's URLs.
    #[arg(long)]
    show_session: String,

    /// Show title, used for output file naming.
    #[arg(long)]
    show_title: String,

    /// Episode number(s) to download.
    #[arg(long, value_delimiter = ',')]
    episode: Vec<u32>,

    /// Episode session identifier(s), same order as --episode.
    #[arg(long, value_delimiter = ',')]
    episode_session: Vec<String>,

    /// Desired quality: "best" or a resolution height such as "1080".
    #[arg(long, default_value = "best")]
    quality: String,

    /// Desired audio track language tag.
    #[arg(long, default_value = "jpn")]
    audio: String,

    /// Output directory for finished episodes.
    #[arg(long, default_value = "./downloads")]
    output: PathBuf,

    /// Maximum episodes downloaded in parallel.
    #[arg(long, default_value_t = 2)]
    concurrent_episodes: usize,

    /// Maximum segments downloaded in parallel, per episode.
    #[arg(long, default_value_t = 50)]
    segment_concurrency: usize,

    #[arg(long)]
    verbose: bool,

    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    hls_dl_core::logging::init_logging(args.verbose, args.quiet);

    if args.episode.len() != args.episode_session.len() {
        error!("--episode and --episode-session must have the same number of entries");
        process::exit(1);
    }

    let quality = if args.quality.eq_ignore_ascii_case("best") {
        Quality::Best
    } else {
        match args.quality.parse::<u32>() {
            Ok(q) => Quality::Target(q),
            Err(_) => {
                error!("--quality must be \"best\" or an integer resolution");
                process::exit(1);
            }
        }
    };

    let mut config = EngineConfig::new(args.base_url.clone());
    config.segment_concurrency = args.segment_concurrency;
    config.episode_concurrency = args.concurrent_episodes;
    config.http.pool_max_idle_per_host = config.recommended_pool_size();

    let fetcher = match HttpFetcher::new(config.http.clone()) {
        Ok(f) => f,
        Err(e) => {
            error!("failed to build HTTP client: {e}");
            process::exit(1);
        }
    };

    let show = ShowRef { session: args.show_session, title: args.show_title };
    let choice = StreamChoice { quality, audio: args.audio };

    let jobs: Vec<JobRequest> = args
        .episode
        .iter()
        .zip(args.episode_session.iter())
        .map(|(&number, session)| JobRequest {
            episode: EpisodeRef { show: show.clone(), episode_number: number, session: session.clone() },
            choice: choice.clone(),
        })
        .collect();

    let shutdown = ShutdownController::new();
    shutdown.install_signal_handler();

    if let Err(e) = tokio::fs::create_dir_all(&args.output).await {
        error!("failed to create output directory: {e}");
        process::exit(1);
    }

    let progress_sink: hls_dl_core::orchestrator::ProgressSink = std::sync::Arc::new(|p: Progress| {
        eprintln!("{:>5.1}% {:.2} MB/s", p.percent(), p.mbps());
    });
    let state_sink: hls_dl_core::model::StateSink = std::sync::Arc::new(|episode: &EpisodeRef, state: JobState| {
        eprintln!("{} episode {}: {state:?}", episode.show.title, episode.episode_number);
    });

    let outcomes = hls_dl_core::scheduler::run_batch(
        &fetcher,
        &config,
        jobs,
        &args.output,
        Some(progress_sink),
        Some(state_sink),
        &shutdown.token(),
    )
    .await;

    let mut any_failed = false;
    for outcome in &outcomes {
        match outcome.state {
            JobState::Done => {}
            JobState::Failed => {
                any_failed = true;
                if let Some(err) = &outcome.error {
                    eprintln!(
                        "FAILED: {} episode {} — {err}",
                        outcome.episode.show.title, outcome.episode.episode_number
                    );
                }
            }
            JobState::Cancelled => {
                eprintln!("CANCELLED: {} episode {}", outcome.episode.show.title, outcome.episode.episode_number);
            }
            _ => {}
        }
    }

    let _ = any_failed;
    process::exit(0);
}
