//! C4 — Segment Pipeline: bounded parallel fetch + decrypt + idempotent write.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::crypto::decrypt_segment;
use crate::error::DownloadError;
use crate::http::HttpFetcher;
use crate::model::{EpisodeWorkspace, Progress, SegmentPlan};
use crate::sanitize::url_basename;

/// Callback invoked after every segment completes (successfully or not).
pub type ProgressSink = Arc<dyn Fn(Progress) + Send + Sync>;

struct PendingSegment {
    index: usize,
    url: String,
    out_path: PathBuf,
}

/// Download, decrypt, and persist every segment of `plan` into `workspace`.
#[instrument(skip(fetcher, plan, workspace, progress, token), fields(total = plan.segments.len()))]
pub async fn download_all(
    fetcher: &HttpFetcher,
    plan: &SegmentPlan,
    workspace: &EpisodeWorkspace,
    concurrency: usize,
    progress: Option<ProgressSink>,
    token: &CancellationToken,
) -> Result<(), DownloadError> {
    let total = plan.segments.len();
    let mut skipped = 0usize;
    let mut pending = Vec::new();
    for (index, url) in plan.segments.iter().enumerate() {
        let filename = url_basename(url);
        let out_path = workspace.segment_path(&filename);
        if segment_already_complete(&out_path).await {
            skipped += 1;
        } else {
            pending.push(PendingSegment { index, url: url.clone(), out_path });
        }
    }

    info!(total, skipped, pending = pending.len(), "starting segment pipeline");

    if pending.is_empty() {
        return Ok(());
    }

    // Only fetch the decryption key once we know there's work needing it.
    let key_bytes = fetcher.fetch(&plan.key_uri, token).await?;
    if key_bytes.len() != 16 {
        return Err(DownloadError::BadKey(key_bytes.len()));
    }
    let key: [u8; 16] = key_bytes[..].try_into().expect("length checked above");

    let concurrency = concurrency.min(pending.len()).max(1);
    let start = Instant::now();
    let mut done = skipped;
    let mut bytes_since_start = 0u64;
    let mut failures = Vec::new();

    let mut in_flight = FuturesUnordered::new();
    let mut queue = pending.into_iter();

    for _ in 0..concurrency {
        if let Some(job) = queue.next() {
            in_flight.push(fetch_and_write(fetcher, job, plan.iv_for_index(), key, token.clone()));
        }
    }

    while let Some(outcome) = in_flight.next().await {
        match outcome {
            Ok((url, bytes)) => {
                done += 1;
                bytes_since_start += bytes;
                let _ = url;
            }
            Err((url, err)) => {
                done += 1;
                warn!(url = %url, error = %err, "segment failed");
                failures.push(DownloadError::SegmentFailed { url, source: Box::new(err) });
            }
        }

        if let Some(sink) = &progress {
            sink(Progress { done, total, bytes_since_start, elapsed: start.elapsed() });
        }

        if !token.is_cancelled()
            && let Some(job) = queue.next() {
                in_flight.push(fetch_and_write(fetcher, job, plan.iv_for_index(), key, token.clone()));
            }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(DownloadError::PartialFailure { failed: failures.len(), total, failures })
    }
}

async fn segment_already_complete(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len() > 0,
        Err(_) => false,
    }
}

type FetchOutcome = Result<(String, u64), (String, DownloadError)>;

async fn fetch_and_write(
    fetcher: &HttpFetcher,
    job: PendingSegment,
    iv_fn: impl Fn(usize) -> [u8; 16],
    key: [u8; 16],
    token: CancellationToken,
) -> FetchOutcome {
    let result: Result<u64, DownloadError> = async {
        let iv = iv_fn(job.index);
        let ciphertext: bytes::Bytes = fetcher.fetch(&job.url, &token).await?;
        let plaintext = decrypt_segment(&key, &iv, &ciphertext)?;
        write_atomic(&job.out_path, &plaintext).await?;
        Ok(plaintext.len() as u64)
    }
    .await;

    match result {
        Ok(bytes) => Ok((job.url, bytes)),
        Err(err) => Err((job.url, err)),
    }
}

async fn write_atomic(out_path: &Path, data: &[u8]) -> Result<(), DownloadError> {
    let tmp_path = out_path.with_extension("part");
    {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.flush().await?;
    }
    tokio::fs::rename(&tmp_path, out_path).await?;
    Ok(())
}

impl SegmentPlan {
    /// A cloneable IV-computing closure bound to this plan's media sequence.
    fn iv_for_index(&self) -> impl Fn(usize) -> [u8; 16] + '_ {
        move |index| self.iv_for(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::HttpConfig;

    fn encrypted_segment(key: &[u8; 16], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
        use aes::Aes128;
        use cipher::block_padding::NoPadding;
        use cipher::{BlockModeEncrypt, KeyIvInit};
        type Enc = cbc::Encryptor<Aes128>;
        let mut buf = plaintext.to_vec();
        let padded_len = buf.len().div_ceil(16).max(1) * 16;
        buf.resize(padded_len, 0u8);
        let cipher = Enc::new_from_slices(key, iv).unwrap();
        cipher.encrypt_padded::<NoPadding>(&mut buf, padded_len).unwrap().to_vec()
    }

    #[tokio::test]
    async fn happy_path_downloads_and_decrypts_all_segments() {
        let server = MockServer::start().await;
        let key = [0x09u8; 16];
        let media_sequence = 42u64;

        Mock::given(method("GET"))
            .and(path_regex("/key"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(key.to_vec()))
            .mount(&server)
            .await;

        let plan = SegmentPlan {
            segments: (0..3).map(|i| format!("{}/seg/{i}.ts", server.uri())).collect(),
            media_sequence,
            key_uri: format!("{}/key", server.uri()),
            duration_seconds: 12.0,
        };

        for i in 0..3u64 {
            let iv = plan.iv_for(i as usize);
            let body = encrypted_segment(&key, &iv, b"AAAAAAAAAAAAAAAA");
            Mock::given(method("GET"))
                .and(path_regex(format!("/seg/{i}.ts$")))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
                .mount(&server)
                .await;
        }

        let dir = tempfile::tempdir().unwrap();
        let workspace = EpisodeWorkspace::new(dir.path().to_path_buf());
        let fetcher = HttpFetcher::new(HttpConfig::new(server.uri())).unwrap();
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let sink: ProgressSink = Arc::new(move |_p| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        download_all(&fetcher, &plan, &workspace, 2, Some(sink), &token).await.unwrap();

        for i in 0..3 {
            let content = tokio::fs::read(workspace.segment_path(&format!("{i}.ts"))).await.unwrap();
            assert_eq!(content, b"AAAAAAAAAAAAAAAA");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn resume_skips_already_complete_segments() {
        let server = MockServer::start().await;
        let key = [0x01u8; 16];
        let plan = SegmentPlan {
            segments: vec![format!("{}/seg/0.ts", server.uri())],
            media_sequence: 0,
            key_uri: format!("{}/key", server.uri()),
            duration_seconds: 4.0,
        };

        let dir = tempfile::tempdir().unwrap();
        let workspace = EpisodeWorkspace::new(dir.path().to_path_buf());
        tokio::fs::write(workspace.segment_path("0.ts"), b"already-here").await.unwrap();

        Mock::given(method("GET"))
            .and(path_regex("/key"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(key.to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(HttpConfig::new(server.uri())).unwrap();
        let token = CancellationToken::new();
        download_all(&fetcher, &plan, &workspace, 2, None, &token).await.unwrap();
    }

    #[tokio::test]
    async fn partial_failure_reports_failed_urls_and_keeps_successes() {
        let server = MockServer::start().await;
        let key = [0x02u8; 16];
        let plan = SegmentPlan {
            segments: vec![
                format!("{}/seg/0.ts", server.uri()),
                format!("{}/seg/1.ts", server.uri()),
            ],
            media_sequence: 0,
            key_uri: format!("{}/key", server.uri()),
            duration_seconds: 8.0,
        };

        Mock::given(method("GET"))
            .and(path_regex("/key"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(key.to_vec()))
            .mount(&server)
            .await;

        let iv0 = plan.iv_for(0);
        let body0 = encrypted_segment(&key, &iv0, b"AAAAAAAAAAAAAAAA");
        Mock::given(method("GET"))
            .and(path_regex("/seg/0.ts$"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body0))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("/seg/1.ts$"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let workspace = EpisodeWorkspace::new(dir.path().to_path_buf());
        let fetcher = HttpFetcher::new(HttpConfig::new(server.uri())).unwrap();
        let token = CancellationToken::new();

        let result = download_all(&fetcher, &plan, &workspace, 2, None, &token).await;
        assert!(matches!(result, Err(DownloadError::PartialFailure { failed: 1, total: 2, .. })));
        assert!(workspace.segment_path("0.ts").exists());
    }
}
