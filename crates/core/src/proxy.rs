use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Protocol family of a parsed proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Shadowsocks,
    Vmess,
    Vless,
    Trojan,
    Hysteria2,
    Tuic,
}

impl ProxyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyKind::Shadowsocks => "shadowsocks",
            ProxyKind::Vmess => "vmess",
            ProxyKind::Vless => "vless",
            ProxyKind::Trojan => "trojan",
            ProxyKind::Hysteria2 => "hysteria2",
            ProxyKind::Tuic => "tuic",
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "shadowsocks" | "ss" => Ok(ProxyKind::Shadowsocks),
            "vmess" => Ok(ProxyKind::Vmess),
            "vless" => Ok(ProxyKind::Vless),
            "trojan" => Ok(ProxyKind::Trojan),
            "hysteria2" | "hy2" | "hysteria" => Ok(ProxyKind::Hysteria2),
            "tuic" => Ok(ProxyKind::Tuic),
            other => Err(format!("unknown protocol {other}")),
        }
    }
}

/// Uniform form of one proxy endpoint, independent of the link it came from.
///
/// Only built once every field its protocol needs has been found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRecord {
    pub tag: String,
    pub server: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl ProxyRecord {
    pub fn kind(&self) -> ProxyKind {
        match self.protocol {
            Protocol::Shadowsocks(_) => ProxyKind::Shadowsocks,
            Protocol::Vmess(_) => ProxyKind::Vmess,
            Protocol::Vless(_) => ProxyKind::Vless,
            Protocol::Trojan(_) => ProxyKind::Trojan,
            Protocol::Hysteria2(_) => ProxyKind::Hysteria2,
            Protocol::Tuic(_) => ProxyKind::Tuic,
        }
    }

    /// Shadowsocks cipher, if this is a Shadowsocks record.
    pub fn cipher(&self) -> Option<&str> {
        match &self.protocol {
            Protocol::Shadowsocks(ss) => Some(ss.method.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    Shadowsocks(Shadowsocks),
    Vmess(Vmess),
    Vless(Vless),
    Trojan(Trojan),
    Hysteria2(Hysteria2),
    Tuic(Tuic),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shadowsocks {
    pub method: String,
    pub password: String,
    pub plugin: Option<String>,
    pub plugin_opts: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vmess {
    pub uuid: String,
    pub alter_id: u32,
    pub security: String,
    pub tls: Option<Tls>,
    pub transport: Option<Transport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vless {
    pub uuid: String,
    pub flow: Option<String>,
    pub tls: Option<Tls>,
    pub transport: Option<Transport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trojan {
    pub password: String,
    pub tls: Tls,
    pub transport: Option<Transport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hysteria2 {
    pub password: String,
    pub tls: Tls,
    pub obfs: Option<String>,
    pub obfs_password: Option<String>,
    pub up_mbps: Option<u32>,
    pub down_mbps: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuic {
    pub uuid: String,
    pub password: String,
    pub tls: Tls,
    pub congestion_control: Option<String>,
    pub udp_relay_mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tls {
    pub server_name: Option<String>,
    pub insecure: bool,
    pub alpn: Vec<String>,
    pub fingerprint: Option<String>,
    pub reality: Option<Reality>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reality {
    pub public_key: String,
    pub short_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    WebSocket {
        path: Option<String>,
        host: Option<String>,
    },
    Grpc {
        service_name: Option<String>,
    },
    Http {
        path: Option<String>,
        host: Option<String>,
    },
}
