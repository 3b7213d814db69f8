use serde_json::Value as JsonValue;
use serde_yaml::{Mapping, Value};

use super::{
    category_members, custom_members, fallback_members, node_select_members, ConfigTarget,
    Document, Target, TEST_INTERVAL, TEST_URL,
};
use crate::error::BuildError;
use crate::merge::{entry_name, merge_proxy_groups, unique_name};
use crate::model::ClashConfig;
use crate::proxy::{Protocol, ProxyRecord, Tls, Transport};
use crate::rules::{Predicate, RuleCategory, RulePlan, AUTO_SELECT, FALL_BACK, NODE_SELECT};
use crate::template::Template;

/// Clash (mihomo) YAML document under construction.
#[derive(Debug, Clone)]
pub struct ClashTarget {
    config: ClashConfig,
    // Proxies as they arrived, before any renaming.
    seen: Vec<Value>,
    reserved: Vec<String>,
}

impl ClashTarget {
    pub fn new(base: Option<&JsonValue>) -> Result<Self, BuildError> {
        let config = Template::with_base(Target::Clash, base)?.into_clash_config()?;
        let seen = config.proxies.clone();
        Ok(Self {
            config,
            seen,
            reserved: Vec::new(),
        })
    }

    fn push_group(&mut self, group: Value) {
        let groups = std::mem::take(&mut self.config.proxy_groups);
        self.config.proxy_groups = merge_proxy_groups(groups, vec![group]);
    }

    fn selector(name: &str, members: Vec<String>) -> Value {
        let mut group = Mapping::new();
        put(&mut group, "name", name);
        put(&mut group, "type", "select");
        put(&mut group, "proxies", members);
        Value::Mapping(group)
    }
}

impl ConfigTarget for ClashTarget {
    type Proxy = Value;

    fn target_name(&self) -> &'static str {
        "clash"
    }

    fn proxies(&self) -> Result<&[Value], BuildError> {
        Ok(&self.config.proxies)
    }

    fn proxy_name<'a>(&self, proxy: &'a Value) -> Result<&'a str, BuildError> {
        entry_name(proxy).ok_or_else(|| BuildError::invalid("proxies", "proxy without a name"))
    }

    fn convert_proxy(&self, record: &ProxyRecord) -> Result<Option<Value>, BuildError> {
        Ok(Some(convert(record)))
    }

    fn reserve_group_names(&mut self, names: &[String]) -> Result<(), BuildError> {
        self.reserved.extend(names.iter().cloned());
        Ok(())
    }

    fn add_proxy_to_config(&mut self, mut proxy: Value) -> Result<(), BuildError> {
        if self.seen.contains(&proxy) {
            tracing::debug!(name = ?entry_name(&proxy), "dropping duplicate proxy");
            return Ok(());
        }
        self.seen.push(proxy.clone());

        let name = self.proxy_name(&proxy)?.to_string();
        let mut taken = self.config.proxy_names();
        taken.extend(self.config.proxy_group_names());
        taken.extend(self.reserved.iter().cloned());
        let unique = unique_name(&taken, &name);
        if unique != name {
            if let Some(map) = proxy.as_mapping_mut() {
                map.insert(Value::from("name"), Value::from(unique));
            }
        }
        self.config.proxies.push(proxy);
        Ok(())
    }

    fn add_auto_select_group(&mut self, proxies: &[String]) -> Result<(), BuildError> {
        let mut group = Mapping::new();
        put(&mut group, "name", AUTO_SELECT);
        put(&mut group, "type", "url-test");
        put(&mut group, "proxies", proxies.to_vec());
        put(&mut group, "url", TEST_URL);
        put(&mut group, "interval", TEST_INTERVAL);
        put(&mut group, "lazy", false);
        self.push_group(Value::Mapping(group));
        Ok(())
    }

    fn add_node_select_group(&mut self, proxies: &[String]) -> Result<(), BuildError> {
        self.push_group(Self::selector(NODE_SELECT, node_select_members(proxies)));
        Ok(())
    }

    fn add_outbound_groups(
        &mut self,
        categories: &[RuleCategory],
        proxies: &[String],
    ) -> Result<(), BuildError> {
        for category in categories {
            let group = Self::selector(&category.outbound, category_members(category, proxies));
            self.push_group(group);
        }
        Ok(())
    }

    fn add_custom_rule_groups(
        &mut self,
        custom: &[RuleCategory],
        proxies: &[String],
    ) -> Result<(), BuildError> {
        for rule in custom {
            self.push_group(Self::selector(&rule.outbound, custom_members(proxies)));
        }
        Ok(())
    }

    fn add_fallback_group(&mut self, proxies: &[String]) -> Result<(), BuildError> {
        self.push_group(Self::selector(FALL_BACK, fallback_members(proxies)));
        Ok(())
    }

    fn format_config(self, plan: &RulePlan) -> Result<Document, BuildError> {
        let mut config = self.config;

        // The generated catch-all is the only one.
        config.rules.retain(|rule| !rule.trim_start().starts_with("MATCH,"));
        config.rules.extend(
            plan.bindings()
                .filter_map(|binding| rule_line(binding.predicate, binding.outbound)),
        );
        config.rules.push(format!("MATCH,{}", plan.final_outbound()));

        Ok(Document::Clash(config))
    }
}

fn convert(record: &ProxyRecord) -> Value {
    let mut out = Mapping::new();
    put(&mut out, "name", record.tag.as_str());
    put(&mut out, "type", clash_type(&record.protocol));
    put(&mut out, "server", record.server.as_str());
    put(&mut out, "port", record.port);

    match &record.protocol {
        Protocol::Shadowsocks(ss) => {
            put(&mut out, "cipher", ss.method.as_str());
            put(&mut out, "password", ss.password.as_str());
            put(&mut out, "udp", true);
            if let Some(plugin) = ss.plugin.as_deref().filter(|p| !p.is_empty()) {
                put(&mut out, "plugin", plugin_name(plugin));
                if let Some(opts) = ss.plugin_opts.as_deref() {
                    put(&mut out, "plugin-opts", plugin_opts(opts));
                }
            }
        }
        Protocol::Vmess(vmess) => {
            put(&mut out, "uuid", vmess.uuid.as_str());
            put(&mut out, "alterId", vmess.alter_id);
            put(&mut out, "cipher", vmess.security.as_str());
            put(&mut out, "udp", true);
            put(&mut out, "tls", vmess.tls.is_some());
            if let Some(tls) = &vmess.tls {
                put_tls(&mut out, tls, "servername");
            }
            if let Some(transport) = &vmess.transport {
                put_transport(&mut out, transport);
            }
        }
        Protocol::Vless(vless) => {
            put(&mut out, "uuid", vless.uuid.as_str());
            put_opt(&mut out, "flow", vless.flow.as_deref());
            put(&mut out, "udp", true);
            put(&mut out, "tls", vless.tls.is_some());
            if let Some(tls) = &vless.tls {
                put_tls(&mut out, tls, "servername");
            }
            if let Some(transport) = &vless.transport {
                put_transport(&mut out, transport);
            }
        }
        Protocol::Trojan(trojan) => {
            put(&mut out, "password", trojan.password.as_str());
            put(&mut out, "udp", true);
            put_tls(&mut out, &trojan.tls, "sni");
            if let Some(transport) = &trojan.transport {
                put_transport(&mut out, transport);
            }
        }
        Protocol::Hysteria2(hy2) => {
            put(&mut out, "password", hy2.password.as_str());
            put_opt(&mut out, "obfs", hy2.obfs.as_deref());
            put_opt(&mut out, "obfs-password", hy2.obfs_password.as_deref());
            if let Some(up) = hy2.up_mbps {
                put(&mut out, "up", up);
            }
            if let Some(down) = hy2.down_mbps {
                put(&mut out, "down", down);
            }
            put_tls(&mut out, &hy2.tls, "sni");
        }
        Protocol::Tuic(tuic) => {
            put(&mut out, "uuid", tuic.uuid.as_str());
            put(&mut out, "password", tuic.password.as_str());
            put_opt(
                &mut out,
                "congestion-controller",
                tuic.congestion_control.as_deref(),
            );
            put_opt(&mut out, "udp-relay-mode", tuic.udp_relay_mode.as_deref());
            put_tls(&mut out, &tuic.tls, "sni");
        }
    }

    Value::Mapping(out)
}

fn clash_type(protocol: &Protocol) -> &'static str {
    match protocol {
        Protocol::Shadowsocks(_) => "ss",
        Protocol::Vmess(_) => "vmess",
        Protocol::Vless(_) => "vless",
        Protocol::Trojan(_) => "trojan",
        Protocol::Hysteria2(_) => "hysteria2",
        Protocol::Tuic(_) => "tuic",
    }
}

fn put_tls(out: &mut Mapping, tls: &Tls, server_name_key: &str) {
    put_opt(out, server_name_key, tls.server_name.as_deref());
    if tls.insecure {
        put(out, "skip-cert-verify", true);
    }
    if !tls.alpn.is_empty() {
        put(out, "alpn", tls.alpn.clone());
    }
    put_opt(out, "client-fingerprint", tls.fingerprint.as_deref());
    if let Some(reality) = &tls.reality {
        let mut opts = Mapping::new();
        put(&mut opts, "public-key", reality.public_key.as_str());
        put_opt(&mut opts, "short-id", reality.short_id.as_deref());
        put(out, "reality-opts", opts);
    }
}

fn put_transport(out: &mut Mapping, transport: &Transport) {
    match transport {
        Transport::WebSocket { path, host } => {
            put(out, "network", "ws");
            let mut opts = Mapping::new();
            put_opt(&mut opts, "path", path.as_deref());
            if let Some(host) = host {
                let mut headers = Mapping::new();
                put(&mut headers, "Host", host.as_str());
                put(&mut opts, "headers", headers);
            }
            put(out, "ws-opts", opts);
        }
        Transport::Grpc { service_name } => {
            put(out, "network", "grpc");
            let mut opts = Mapping::new();
            put_opt(&mut opts, "grpc-service-name", service_name.as_deref());
            put(out, "grpc-opts", opts);
        }
        Transport::Http { path, host } => {
            put(out, "network", "http");
            let mut opts = Mapping::new();
            if let Some(path) = path {
                put(&mut opts, "path", vec![path.clone()]);
            }
            if let Some(host) = host {
                let mut headers = Mapping::new();
                put(&mut headers, "Host", vec![host.clone()]);
                put(&mut opts, "headers", headers);
            }
            put(out, "http-opts", opts);
        }
    }
}

fn plugin_name(plugin: &str) -> &str {
    match plugin {
        "obfs-local" | "simple-obfs" => "obfs",
        other => other,
    }
}

/// `obfs=http;obfs-host=example.com` into the plugin-opts mapping.
fn plugin_opts(raw: &str) -> Mapping {
    let mut opts = Mapping::new();
    for part in raw.split(';').map(str::trim).filter(|part| !part.is_empty()) {
        match part.split_once('=') {
            Some((key, value)) => {
                let key = match key {
                    "obfs" => "mode",
                    "obfs-host" => "host",
                    other => other,
                };
                put(&mut opts, key, value);
            }
            None => put(&mut opts, part, true),
        }
    }
    opts
}

fn rule_line(predicate: &Predicate, outbound: &str) -> Option<String> {
    let line = match predicate {
        Predicate::GeoSite(name) => format!("GEOSITE,{name},{outbound}"),
        Predicate::GeoIp(name) => format!("GEOIP,{name},{outbound},no-resolve"),
        Predicate::DomainSuffix(value) => format!("DOMAIN-SUFFIX,{value},{outbound}"),
        Predicate::DomainKeyword(value) => format!("DOMAIN-KEYWORD,{value},{outbound}"),
        Predicate::IpCidr(value) if value.contains(':') => {
            format!("IP-CIDR6,{value},{outbound},no-resolve")
        }
        Predicate::IpCidr(value) => format!("IP-CIDR,{value},{outbound},no-resolve"),
        Predicate::ProcessName(value) => format!("PROCESS-NAME,{value},{outbound}"),
        Predicate::Final => return None,
    };
    Some(line)
}

fn put(map: &mut Mapping, key: &str, value: impl Into<Value>) {
    map.insert(Value::from(key), value.into());
}

fn put_opt(map: &mut Mapping, key: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        put(map, key, value);
    }
}
