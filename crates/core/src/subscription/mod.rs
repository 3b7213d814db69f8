use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::header::USER_AGENT;
use reqwest::Client;
use tracing::Instrument;

mod parser;
pub use parser::{parse_proxy_link, shadowsocks_method, Scheme};

use crate::decode::{decode_base64, expand_line, looks_like_links, split_lines};
use crate::proxy::ProxyRecord;

pub const DEFAULT_USER_AGENT: &str = "curl/7.74.0";

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Capability used to download subscription bodies.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, user_agent: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, user_agent: &str) -> anyhow::Result<String> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("failed to fetch subscription {}: {}", url, status));
        }

        Ok(response.text().await?)
    }
}

/// Result of parsing one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Proxy(ProxyRecord),
    /// The candidate was a subscription endpoint; these links need parsing in turn.
    Links(Vec<String>),
}

/// Parse one candidate link. Anything malformed, unsupported or unreachable
/// yields `None` so the rest of the batch carries on.
pub async fn parse_link(
    candidate: &str,
    user_agent: &str,
    fetcher: &dyn Fetcher,
) -> Option<ParseOutcome> {
    let candidate = candidate.trim();

    match Scheme::detect(candidate)? {
        Scheme::Subscription => {
            let span = tracing::info_span!("fetch_subscription", url = candidate);
            match fetcher.fetch(candidate, user_agent).instrument(span).await {
                Ok(body) => Some(ParseOutcome::Links(subscription_links(&body))),
                Err(err) => {
                    tracing::warn!(url = candidate, error = %err, "subscription fetch failed");
                    None
                }
            }
        }
        _ => match parse_proxy_link(candidate) {
            Ok(record) => Some(ParseOutcome::Proxy(record)),
            Err(err) => {
                tracing::debug!(error = %err, "skipping unparseable link");
                None
            }
        },
    }
}

/// Turn a fetched subscription body into its candidate links.
pub fn subscription_links(body: &str) -> Vec<String> {
    let body = body.trim();
    match decode_base64(body) {
        Some(decoded) if looks_like_links(&decoded) => split_lines(&decoded),
        _ => split_lines(body),
    }
}

/// Parse a candidate, expanding a subscription exactly one level deep.
async fn resolve_candidate(
    candidate: &str,
    user_agent: &str,
    fetcher: &dyn Fetcher,
) -> Vec<ProxyRecord> {
    match parse_link(candidate, user_agent, fetcher).await {
        Some(ParseOutcome::Proxy(record)) => vec![record],
        Some(ParseOutcome::Links(links)) => {
            let nested = links
                .iter()
                .map(|link| parse_link(link, user_agent, fetcher));
            join_all(nested)
                .await
                .into_iter()
                .filter_map(|outcome| match outcome {
                    Some(ParseOutcome::Proxy(record)) => Some(record),
                    Some(ParseOutcome::Links(_)) => {
                        tracing::debug!("ignoring nested subscription beyond one level");
                        None
                    }
                    None => None,
                })
                .collect()
        }
        None => Vec::new(),
    }
}

/// Parse a newline-delimited input batch into proxy records.
///
/// Candidates are resolved concurrently but the result keeps input order.
pub async fn collect_records(
    input: &str,
    user_agent: &str,
    fetcher: &dyn Fetcher,
) -> Vec<ProxyRecord> {
    let candidates: Vec<String> = input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .flat_map(expand_line)
        .collect();

    let resolved = join_all(
        candidates
            .iter()
            .map(|candidate| resolve_candidate(candidate, user_agent, fetcher)),
    )
    .await;

    let records: Vec<ProxyRecord> = resolved.into_iter().flatten().collect();
    tracing::info!(
        candidates = candidates.len(),
        records = records.len(),
        "parsed input batch"
    );
    records
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    use super::*;

    struct FakeFetcher {
        bodies: HashMap<String, String>,
        delays: HashMap<String, u64>,
    }

    impl FakeFetcher {
        fn new(bodies: &[(&str, &str)]) -> Self {
            Self {
                bodies: bodies
                    .iter()
                    .map(|(url, body)| (url.to_string(), body.to_string()))
                    .collect(),
                delays: HashMap::new(),
            }
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, url: &str, _user_agent: &str) -> anyhow::Result<String> {
            if let Some(ms) = self.delays.get(url) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            self.bodies
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow!("404 for {url}"))
        }
    }

    fn trojan(tag: &str) -> String {
        format!("trojan://secret@{tag}.example.com:443#{tag}")
    }

    #[tokio::test]
    async fn subscription_body_is_expanded_one_level() {
        let body = STANDARD.encode(format!(
            "{}\nhttps://nested.example.com/sub\n{}",
            trojan("a"),
            trojan("b")
        ));
        let fetcher = FakeFetcher::new(&[
            ("https://sub.example.com/x", body.as_str()),
            ("https://nested.example.com/sub", trojan("c").as_str()),
        ]);

        let records =
            collect_records("https://sub.example.com/x", DEFAULT_USER_AGENT, &fetcher).await;
        let tags: Vec<_> = records.iter().map(|r| r.tag.as_str()).collect();
        assert_eq!(tags, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn failed_fetch_contributes_nothing() {
        let fetcher = FakeFetcher::new(&[]);
        let input = format!("https://down.example.com/sub\n{}", trojan("ok"));

        let records = collect_records(&input, DEFAULT_USER_AGENT, &fetcher).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tag, "ok");
    }

    #[tokio::test]
    async fn order_follows_input_not_completion() {
        let mut fetcher = FakeFetcher::new(&[
            ("https://slow.example.com/", trojan("first").as_str()),
            ("https://fast.example.com/", trojan("third").as_str()),
        ]);
        fetcher.delays.insert("https://slow.example.com/".into(), 50);

        let input = format!(
            "https://slow.example.com/\n{}\nhttps://fast.example.com/",
            trojan("second")
        );
        let records = collect_records(&input, DEFAULT_USER_AGENT, &fetcher).await;
        let tags: Vec<_> = records.iter().map(|r| r.tag.as_str()).collect();
        assert_eq!(tags, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn garbage_lines_are_dropped() {
        let fetcher = FakeFetcher::new(&[]);
        let input = format!("\n   \nnot a link\n{}\nvless://broken", trojan("x"));

        let records = collect_records(&input, DEFAULT_USER_AGENT, &fetcher).await;
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn parse_link_reports_subscription_links() {
        let fetcher = FakeFetcher::new(&[("http://plain.example.com/", "ss://a\n\nvmess://b\n")]);
        let outcome = parse_link("http://plain.example.com/", DEFAULT_USER_AGENT, &fetcher).await;
        assert_eq!(
            outcome,
            Some(ParseOutcome::Links(vec!["ss://a".into(), "vmess://b".into()]))
        );
    }
}
