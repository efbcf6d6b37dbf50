//! C3 — narrow media-playlist parser: recognizes exactly four directives.

use crate::error::DownloadError;
use crate::model::SegmentPlan;

/// Parse a media playlist's text into a [`SegmentPlan`].
///
/// This is deliberately not a general HLS/m3u8 parser: the site only ever
/// emits a static VOD media playlist using `#EXT-X-MEDIA-SEQUENCE`,
/// `#EXT-X-KEY` (URI attribute only), `#EXTINF`, and bare segment URLs.
/// Everything else is ignored.
pub fn parse(text: &str) -> Result<SegmentPlan, DownloadError> {
    let mut media_sequence: u64 = 0;
    let mut key_uri = String::new();
    let mut duration_seconds: f64 = 0.0;
    let mut segments = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            media_sequence = rest.trim().parse().unwrap_or(0);
        } else if key_uri.is_empty() && line.starts_with("#EXT-X-KEY") {
            if let Some(uri) = extract_uri_attr(line) {
                key_uri = uri;
            }
        } else if let Some(rest) = line.strip_prefix("#EXTINF:") {
            let seconds_str = rest.split(',').next().unwrap_or("0");
            if let Ok(seconds) = seconds_str.trim().parse::<f64>() {
                duration_seconds += seconds;
            }
        } else if line.starts_with("https") {
            segments.push(line.to_string());
        }
    }

    if key_uri.is_empty() {
        return Err(DownloadError::MalformedPlaylist("missing #EXT-X-KEY URI".into()));
    }
    if segments.is_empty() {
        return Err(DownloadError::MalformedPlaylist("no segment URLs found".into()));
    }

    Ok(SegmentPlan { segments, media_sequence, key_uri, duration_seconds })
}

fn extract_uri_attr(line: &str) -> Option<String> {
    let marker = "URI=\"";
    let start = line.find(marker)? + marker.len();
    let rest = &line[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"#EXTM3U
#EXT-X-VERSION:3
#EXT-X-MEDIA-SEQUENCE:42
#EXT-X-KEY:METHOD=AES-128,URI="https://cdn.example/key"
#EXTINF:4.004,
https://cdn.example/seg/042.ts
#EXTINF:4.004,
https://cdn.example/seg/043.ts
#EXT-X-ENDLIST
"#;

    #[test]
    fn parses_full_sample() {
        let plan = parse(SAMPLE).unwrap();
        assert_eq!(plan.media_sequence, 42);
        assert_eq!(plan.key_uri, "https://cdn.example/key");
        assert_eq!(plan.segments, vec!["https://cdn.example/seg/042.ts", "https://cdn.example/seg/043.ts"]);
        assert!((plan.duration_seconds - 8.008).abs() < 1e-9);
    }

    #[test]
    fn missing_key_is_malformed() {
        let text = "#EXT-X-MEDIA-SEQUENCE:0\nhttps://cdn.example/seg/0.ts\n";
        assert!(matches!(parse(text), Err(DownloadError::MalformedPlaylist(_))));
    }

    #[test]
    fn missing_segments_is_malformed() {
        let text = "#EXT-X-KEY:METHOD=AES-128,URI=\"https://cdn.example/key\"\n";
        assert!(matches!(parse(text), Err(DownloadError::MalformedPlaylist(_))));
    }

    #[test]
    fn first_key_uri_wins() {
        let text = "#EXT-X-KEY:URI=\"https://a\"\n#EXT-X-KEY:URI=\"https://b\"\nhttps://cdn.example/s.ts\n";
        let plan = parse(text).unwrap();
        assert_eq!(plan.key_uri, "https://a");
    }

    #[test]
    fn missing_media_sequence_defaults_to_zero() {
        let text = "#EXT-X-KEY:URI=\"https://a\"\nhttps://cdn.example/s.ts\n";
        let plan = parse(text).unwrap();
        assert_eq!(plan.media_sequence, 0);
    }

    #[test]
    fn iv_uses_original_index() {
        let plan = parse(SAMPLE).unwrap();
        let iv0 = plan.iv_for(0);
        let iv1 = plan.iv_for(1);
        assert_eq!(&iv0[8..16], &42u64.to_be_bytes());
        assert_eq!(&iv1[8..16], &43u64.to_be_bytes());
    }
}
