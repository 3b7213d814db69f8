use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::future::join_all;
use percent_encoding::percent_decode_str;
use tracing::Instrument;

use crate::decode::{decode_base64, looks_like_links, split_lines};
use crate::error::BuildError;
use crate::filter::ExclusionFilter;
use crate::subscription::{Fetcher, Scheme};

/// Re-export the input as a filtered, base64-wrapped share-link bundle.
///
/// Subscription endpoints are fetched and inlined; every other line is kept
/// verbatim. Links are filtered at link level, so nothing is parsed into a
/// record and unknown schemes survive unless a name pattern drops them.
pub async fn build_link_bundle(
    input: &str,
    filter: &ExclusionFilter,
    user_agent: &str,
    fetcher: &dyn Fetcher,
) -> Result<String, BuildError> {
    let lines: Vec<&str> = input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        return Err(BuildError::MissingInput("config"));
    }

    let expanded = join_all(
        lines
            .iter()
            .map(|line| expand_source(line, user_agent, fetcher)),
    )
    .await;

    let kept: Vec<String> = expanded
        .into_iter()
        .flatten()
        .filter(|link| filter.accepts_link(link))
        .collect();

    tracing::info!(sources = lines.len(), links = kept.len(), "built link bundle");
    if kept.is_empty() {
        return Err(BuildError::MissingInput("config"));
    }
    Ok(STANDARD.encode(kept.join("\n")))
}

async fn expand_source(line: &str, user_agent: &str, fetcher: &dyn Fetcher) -> Vec<String> {
    if Scheme::detect(line) != Some(Scheme::Subscription) {
        return vec![line.to_string()];
    }

    let span = tracing::info_span!("fetch_subscription", url = line);
    let body = match fetcher.fetch(line, user_agent).instrument(span).await {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!(url = line, error = %err, "subscription fetch failed");
            return Vec::new();
        }
    };

    let text = match decode_base64(body.trim()) {
        Some(decoded) if looks_like_links(&decoded) => decoded,
        _ => body,
    };
    let text = if text.contains('%') {
        percent_decode_str(&text).decode_utf8_lossy().into_owned()
    } else {
        text
    };
    split_lines(&text)
}
