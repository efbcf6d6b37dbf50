//! C2 — Stream Resolver: catalog play page -> candidate -> direct playlist URL.

use std::time::Duration;

use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::error::DownloadError;
use crate::http::HttpFetcher;
use crate::js_eval;
use crate::model::{EpisodeRef, Quality, StreamCandidate, StreamChoice};

pub struct StreamResolver<'a> {
    fetcher: &'a HttpFetcher,
    base_url: &'a str,
    script_eval_timeout: Duration,
}

impl<'a> StreamResolver<'a> {
    pub fn new(fetcher: &'a HttpFetcher, base_url: &'a str, script_eval_timeout: Duration) -> Self {
        Self { fetcher, base_url, script_eval_timeout }
    }

    /// Resolve an episode + choice down to a direct media playlist URL.
    #[instrument(skip(self, token), fields(show = %episode.show.session, episode = episode.episode_number))]
    pub async fn resolve_playlist_url(
        &self,
        episode: &EpisodeRef,
        choice: &StreamChoice,
        token: &CancellationToken,
    ) -> Result<String, DownloadError> {
        let candidates = self.list_candidates(episode, token).await?;
        let chosen = pick_candidate(&candidates, choice)?;
        self.extract_playlist_url(&chosen.url, token).await
    }

    /// Step A — scrape `data-src`/`data-resolution`/`data-audio`/`data-av1` buttons.
    async fn list_candidates(
        &self,
        episode: &EpisodeRef,
        token: &CancellationToken,
    ) -> Result<Vec<StreamCandidate>, DownloadError> {
        let url = format!(
            "{}/play/{}/{}",
            self.base_url, episode.show.session, episode.session
        );
        let body = self.fetcher.fetch(&url, token).await?;
        let html = String::from_utf8_lossy(&body);
        Ok(parse_candidates(&html))
    }

    /// Step C — fetch the candidate's page and evaluate its packer script.
    async fn extract_playlist_url(
        &self,
        candidate_url: &str,
        token: &CancellationToken,
    ) -> Result<String, DownloadError> {
        let body = self.fetcher.fetch(candidate_url, token).await?;
        let html = String::from_utf8_lossy(&body);
        let script = find_packer_script(&html)
            .ok_or_else(|| DownloadError::ScriptEval("no eval(...) script found on candidate page".into()))?;

        let timeout = self.script_eval_timeout;
        let source = tokio::task::spawn_blocking(move || js_eval::eval_packer(&script, timeout))
            .await
            .map_err(|e| DownloadError::ScriptEval(format!("eval task panicked: {e}")))??;

        js_eval::playlist_url_from_source(&source)
    }
}

fn parse_candidates(html: &str) -> Vec<StreamCandidate> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("button[data-src]").expect("static selector is valid");

    document
        .select(&selector)
        .filter_map(|el| {
            let av1 = el.value().attr("data-av1").unwrap_or("0");
            if av1 != "0" {
                return None;
            }
            let url = el.value().attr("data-src")?.to_string();
            let resolution = el
                .value()
                .attr("data-resolution")
                .and_then(|r| r.parse::<u32>().ok())
                .unwrap_or(0);
            let audio = el.value().attr("data-audio").unwrap_or_default().to_string();
            Some(StreamCandidate { resolution, audio, url, av1: false })
        })
        .collect()
}

/// Step B — sort, filter by audio, then pick by quality per §4.2.
fn pick_candidate<'c>(
    candidates: &'c [StreamCandidate],
    choice: &StreamChoice,
) -> Result<&'c StreamCandidate, DownloadError> {
    if candidates.is_empty() {
        return Err(DownloadError::NoStream("no stream candidates on play page".into()));
    }

    let mut sorted: Vec<&StreamCandidate> = candidates.iter().collect();
    sorted.sort_by_key(|c| std::cmp::Reverse(c.resolution));

    let audio_matched: Vec<&StreamCandidate> =
        sorted.iter().copied().filter(|c| c.audio == choice.audio).collect();

    let pool: &[&StreamCandidate] = if audio_matched.is_empty() {
        warn!(audio = %choice.audio, "no candidate matched requested audio track, downgrading");
        &sorted
    } else {
        &audio_matched
    };

    match choice.quality {
        Quality::Best => Ok(pool[0]),
        Quality::Target(target) => {
            if let Some(found) = pool.iter().find(|c| c.resolution <= target) {
                Ok(found)
            } else {
                warn!(target, "no candidate at or below target quality, downgrading to highest available");
                Ok(pool[0])
            }
        }
    }
}

fn find_packer_script(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("script").expect("static selector is valid");
    document
        .select(&selector)
        .find_map(|el| {
            let text: String = el.text().collect();
            if text.contains("eval(") { Some(text) } else { None }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(resolution: u32, audio: &str, url: &str) -> StreamCandidate {
        StreamCandidate { resolution, audio: audio.to_string(), url: url.to_string(), av1: false }
    }

    #[test]
    fn picks_best_of_matching_audio() {
        let candidates = vec![candidate(1080, "jpn", "a"), candidate(480, "jpn", "b"), candidate(720, "eng", "c")];
        let choice = StreamChoice { quality: Quality::Best, audio: "jpn".into() };
        let picked = pick_candidate(&candidates, &choice).unwrap();
        assert_eq!(picked.url, "a");
    }

    #[test]
    fn downgrades_to_available_resolution() {
        let candidates = vec![candidate(1080, "jpn", "a"), candidate(480, "jpn", "b"), candidate(720, "eng", "c")];
        let choice = StreamChoice { quality: Quality::Target(720), audio: "jpn".into() };
        let picked = pick_candidate(&candidates, &choice).unwrap();
        assert_eq!(picked.url, "b");
    }

    #[test]
    fn falls_back_across_audio_when_no_match() {
        let candidates = vec![candidate(1080, "eng", "a")];
        let choice = StreamChoice { quality: Quality::Best, audio: "jpn".into() };
        let picked = pick_candidate(&candidates, &choice).unwrap();
        assert_eq!(picked.url, "a");
    }

    #[test]
    fn empty_candidates_is_no_stream() {
        let choice = StreamChoice { quality: Quality::Best, audio: "jpn".into() };
        assert!(matches!(pick_candidate(&[], &choice), Err(DownloadError::NoStream(_))));
    }

    #[test]
    fn av1_candidates_are_excluded() {
        let html = r#"<button data-src="a" data-resolution="1080" data-audio="jpn" data-av1="1"></button>
                       <button data-src="b" data-resolution="720" data-audio="jpn" data-av1="0"></button>"#;
        let candidates = parse_candidates(html);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "b");
    }

    #[test]
    fn finds_packer_script_among_others() {
        let html = r#"<script>var x = 1;</script><script>eval("...")</script>"#;
        let found = find_packer_script(html).unwrap();
        assert!(found.contains("eval("));
    }
}
