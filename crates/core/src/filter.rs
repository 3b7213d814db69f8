use std::collections::HashSet;

use percent_encoding::percent_decode_str;
use regex::{Regex, RegexBuilder};

use crate::proxy::{ProxyKind, ProxyRecord};
use crate::subscription::{shadowsocks_method, Scheme};

/// Exclusion predicates applied to parsed records. A record survives only
/// when none of them match.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    protocols: HashSet<ProxyKind>,
    ciphers: Vec<String>,
    name_patterns: Vec<Regex>,
}

impl ExclusionFilter {
    /// `ciphers` and `name_patterns` are comma-separated lists. Patterns that
    /// fail to compile are logged and never match.
    pub fn new(protocols: &[ProxyKind], ciphers: &str, name_patterns: &str) -> Self {
        Self {
            protocols: protocols.iter().copied().collect(),
            ciphers: split_csv(ciphers)
                .map(|cipher| cipher.to_lowercase())
                .collect(),
            name_patterns: split_csv(name_patterns).filter_map(compile_pattern).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty() && self.ciphers.is_empty() && self.name_patterns.is_empty()
    }

    pub fn excludes_protocol(&self, kind: ProxyKind) -> bool {
        self.protocols.contains(&kind)
    }

    pub fn excludes_cipher(&self, cipher: &str) -> bool {
        let cipher = cipher.to_lowercase();
        self.ciphers.iter().any(|excluded| *excluded == cipher)
    }

    pub fn excludes_name(&self, name: &str) -> bool {
        self.name_patterns.iter().any(|pattern| pattern.is_match(name))
    }

    pub fn accepts(&self, record: &ProxyRecord) -> bool {
        if self.excludes_protocol(record.kind()) {
            return false;
        }
        if record.cipher().is_some_and(|cipher| self.excludes_cipher(cipher)) {
            return false;
        }
        !self.excludes_name(&record.tag)
    }

    pub fn apply(&self, records: Vec<ProxyRecord>) -> Vec<ProxyRecord> {
        if self.is_empty() {
            return records;
        }

        let before = records.len();
        let kept: Vec<ProxyRecord> = records
            .into_iter()
            .filter(|record| self.accepts(record))
            .collect();
        tracing::debug!(before, after = kept.len(), "applied exclusion filter");
        kept
    }

    /// Link-level variant of [`accepts`](Self::accepts) for raw share links.
    ///
    /// Name patterns run against the whole percent-decoded line, and a
    /// Shadowsocks link whose cipher cannot be read is kept.
    pub fn accepts_link(&self, link: &str) -> bool {
        let link = link.trim();
        if link.is_empty() {
            return false;
        }

        if let Some(kind) = Scheme::detect(link).and_then(Scheme::proxy_kind) {
            if self.excludes_protocol(kind) {
                return false;
            }
            if kind == ProxyKind::Shadowsocks && !self.ciphers.is_empty() {
                match shadowsocks_method(link) {
                    Some(method) if self.excludes_cipher(&method) => return false,
                    Some(_) => {}
                    None => tracing::warn!("failed to read shadowsocks method for filtering"),
                }
            }
        }

        let decoded = percent_decode_str(link).decode_utf8_lossy();
        !self.excludes_name(&decoded)
    }
}

fn split_csv(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}

fn compile_pattern(pattern: &str) -> Option<Regex> {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(regex) => Some(regex),
        Err(err) => {
            tracing::warn!(pattern, error = %err, "invalid name filter pattern");
            None
        }
    }
}
