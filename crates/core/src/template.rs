use serde_json::{json, Value};

use crate::builder::Target;
use crate::error::BuildError;
use crate::model::ClashConfig;
use crate::rules::{DIRECT, NODE_SELECT, REJECT};

/// Starting document for one target: the built-in defaults, optionally
/// overlaid with a user base document.
#[derive(Debug, Clone)]
pub struct Template {
    document: Value,
}

impl Template {
    pub fn for_target(target: Target) -> Self {
        let document = match target {
            Target::SingBox => singbox_defaults(),
            Target::Clash => clash_defaults(),
            Target::Surge => surge_defaults(),
        };
        Self { document }
    }

    /// Template for `target` with `base` merged over it, when given.
    pub fn with_base(target: Target, base: Option<&Value>) -> Result<Self, BuildError> {
        let mut template = Self::for_target(target);
        if let Some(base) = base {
            template.apply_merge(base)?;
        }
        Ok(template)
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn into_document(self) -> Value {
        self.document
    }

    pub fn into_clash_config(self) -> Result<ClashConfig, BuildError> {
        Ok(serde_json::from_value(self.document)?)
    }

    /// Mappings merge key by key; any other value in `patch` replaces.
    pub fn apply_merge(&mut self, patch: &Value) -> Result<(), BuildError> {
        if !patch.is_object() {
            return Err(BuildError::invalid(
                "baseConfig",
                "base document must be a mapping",
            ));
        }
        deep_merge(&mut self.document, patch);
        Ok(())
    }
}

fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                let entry = target_map.entry(key.clone()).or_insert(Value::Null);
                deep_merge(entry, value);
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn singbox_defaults() -> Value {
    json!({
        "log": {
            "disabled": false,
            "level": "info",
            "timestamp": true
        },
        "dns": {
            "servers": [
                { "tag": "dns_proxy", "address": "tcp://1.1.1.1", "detour": NODE_SELECT },
                { "tag": "dns_direct", "address": "https://223.5.5.5/dns-query", "detour": DIRECT }
            ],
            "final": "dns_proxy",
            "strategy": "prefer_ipv4"
        },
        "inbounds": [
            {
                "type": "mixed",
                "tag": "mixed-in",
                "listen": "127.0.0.1",
                "listen_port": 2080
            }
        ],
        "outbounds": [
            { "type": "direct", "tag": DIRECT },
            { "type": "block", "tag": REJECT }
        ],
        "route": {
            "rules": [
                { "action": "sniff" },
                { "protocol": "dns", "action": "hijack-dns" }
            ],
            "auto_detect_interface": true
        },
        "experimental": {
            "cache_file": { "enabled": true }
        }
    })
}

fn clash_defaults() -> Value {
    json!({
        "mixed-port": 7890,
        "allow-lan": false,
        "mode": "rule",
        "log-level": "info",
        "dns": {
            "enable": true,
            "ipv6": false,
            "enhanced-mode": "fake-ip",
            "fake-ip-range": "198.18.0.1/16",
            "default-nameserver": ["223.5.5.5", "119.29.29.29"],
            "nameserver": ["https://223.5.5.5/dns-query", "https://doh.pub/dns-query"],
            "fallback": ["https://1.1.1.1/dns-query", "https://dns.google/dns-query"]
        }
    })
}

/// Sections of the Surge document other than the generated ones, keyed by
/// section name.
fn surge_defaults() -> Value {
    json!({
        "General": {
            "loglevel": "notify",
            "internet-test-url": "http://www.apple.com/library/test/success.html",
            "proxy-test-url": "http://www.gstatic.com/generate_204",
            "test-timeout": 5,
            "dns-server": "119.29.29.29, 223.5.5.5, system",
            "encrypted-dns-server": "https://223.5.5.5/dns-query",
            "skip-proxy": "127.0.0.1, 192.168.0.0/16, 10.0.0.0/8, 172.16.0.0/12, localhost, *.local",
            "ipv6": false
        }
    })
}
