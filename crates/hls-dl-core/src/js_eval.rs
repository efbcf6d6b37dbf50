//! Sandboxed evaluation of the site's obfuscated "packer" script.
//!
//! Runs the script body inside an in-process QuickJS runtime (no filesystem or
//! network capability is exposed to the script) rather than shelling out to an
//! external JS runtime. A deadline is enforced via QuickJS's interrupt handler
//! so a pathological script cannot hang the calling thread indefinitely.
//!
//! Unlike a DOM-backed browser, the packer's `document.querySelector(...)`
//! calls have nothing to act on here, so the context is pre-populated with
//! inert stubs before the script runs. The packer's `eval(...)` call is left
//! untouched and genuinely executes, which is what defines the `source`
//! variable the playlist URL is read back from afterward.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::DownloadError;

const STUB_ENV: &str = r#"
    var document = { querySelector: function() { return null; }, cookie: '' };
    var window = { document: document };
"#;

/// Evaluate `script` in a stubbed sandbox and return the `source` variable
/// the packer is expected to define, subject to `timeout`.
pub fn eval_packer(script: &str, timeout: Duration) -> Result<String, DownloadError> {
    let script = script.to_string();
    let (tx, rx) = std::sync::mpsc::channel();
    let deadline_hit = Arc::new(AtomicBool::new(false));
    let deadline_hit_writer = deadline_hit.clone();
    let deadline = Instant::now() + timeout;

    let handle = std::thread::spawn(move || {
        let result = run_in_runtime(&script, deadline, deadline_hit_writer);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout + Duration::from_millis(250)) {
        Ok(result) => {
            let _ = handle.join();
            result
        }
        Err(_) => {
            deadline_hit.store(true, Ordering::SeqCst);
            Err(DownloadError::ScriptEval("packer evaluation timed out".into()))
        }
    }
}

fn run_in_runtime(
    script: &str,
    deadline: Instant,
    deadline_hit: Arc<AtomicBool>,
) -> Result<String, DownloadError> {
    let runtime = rquickjs::Runtime::new()
        .map_err(|e| DownloadError::ScriptEval(format!("failed to create JS runtime: {e}")))?;

    runtime.set_interrupt_handler(Some(Box::new(move || {
        Instant::now() >= deadline || deadline_hit.load(Ordering::SeqCst)
    })));

    let context = rquickjs::Context::full(&runtime)
        .map_err(|e| DownloadError::ScriptEval(format!("failed to create JS context: {e}")))?;

    // Sloppy mode: the packer's inner `eval(...)` call needs its `var`
    // declarations to leak into the shared global scope, which strict-mode
    // direct eval (rquickjs's default) does not allow.
    fn sloppy() -> rquickjs::context::EvalOptions {
        let mut opts = rquickjs::context::EvalOptions::default();
        opts.strict = false;
        opts
    }

    context.with(|ctx| {
        let _: () = ctx
            .eval_with_options(STUB_ENV, sloppy())
            .map_err(|e| DownloadError::ScriptEval(format!("failed to install DOM stubs: {e}")))?;
        let _: rquickjs::Value = ctx
            .eval_with_options(script, sloppy())
            .map_err(|e| DownloadError::ScriptEval(format!("packer script raised: {e}")))?;
        let source: String = ctx
            .eval("typeof source !== 'undefined' ? source : ''")
            .map_err(|e| DownloadError::ScriptEval(format!("failed to read source variable: {e}")))?;
        if source.is_empty() {
            return Err(DownloadError::ScriptEval("packer did not define `source`".into()));
        }
        Ok(source)
    })
}

/// Append the `.m3u8` suffix, matching the upstream's trailing-suffix convention.
pub fn playlist_url_from_source(source: &str) -> Result<String, DownloadError> {
    let re = regex::Regex::new(r"^(.*?)(\.m3u8)?$").unwrap();
    let caps = re
        .captures(source)
        .ok_or_else(|| DownloadError::ScriptEval("packer `source` was empty".into()))?;
    let base = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    if base.is_empty() {
        return Err(DownloadError::ScriptEval("packer `source` was empty".into()));
    }
    Ok(format!("{base}.m3u8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_playlist_url_with_suffix_appended() {
        assert_eq!(
            playlist_url_from_source("https://cdn.example/hls/abc").unwrap(),
            "https://cdn.example/hls/abc.m3u8"
        );
    }

    #[test]
    fn empty_source_is_an_error() {
        assert!(playlist_url_from_source("").is_err());
    }

    #[test]
    fn evaluates_packer_and_reads_back_source() {
        let script = "eval(\"var source = 'https://cdn.example/hls/xyz';\")";
        let source = eval_packer(script, Duration::from_secs(5)).unwrap();
        assert_eq!(playlist_url_from_source(&source).unwrap(), "https://cdn.example/hls/xyz.m3u8");
    }

    #[test]
    fn script_that_never_defines_source_is_an_error() {
        let script = "1 + 1";
        assert!(eval_packer(script, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn infinite_loop_is_interrupted_by_deadline() {
        let script = "while (true) {}";
        let out = eval_packer(script, Duration::from_millis(200));
        assert!(out.is_err());
    }
}
