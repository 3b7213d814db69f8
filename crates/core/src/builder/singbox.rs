use serde_json::{json, Map, Value};

use super::{
    category_members, custom_members, fallback_members, node_select_members, ConfigTarget,
    Document, Target, TEST_INTERVAL, TEST_URL,
};
use crate::error::BuildError;
use crate::merge::unique_name;
use crate::proxy::{Protocol, ProxyRecord, Tls, Transport};
use crate::rules::{
    Predicate, RuleCategory, RulePlan, AUTO_SELECT, DIRECT, FALL_BACK, NODE_SELECT, REJECT,
};
use crate::template::Template;

const RULE_SET_BASE: &str = "https://raw.githubusercontent.com/MetaCubeX/meta-rules-dat/sing/geo";

/// sing-box JSON document under construction.
///
/// Outbounds are kept in three buckets and written out as groups, then
/// proxies, then the built-in direct/block outbounds.
#[derive(Debug, Clone)]
pub struct SingBoxTarget {
    root: Map<String, Value>,
    groups: Vec<Value>,
    proxies: Vec<Value>,
    builtins: Vec<Value>,
    // Proxies as they arrived, before any renaming.
    seen: Vec<Value>,
    reserved: Vec<String>,
}

impl SingBoxTarget {
    pub fn new(base: Option<&Value>) -> Result<Self, BuildError> {
        let Value::Object(mut root) = Template::with_base(Target::SingBox, base)?.into_document()
        else {
            return Err(BuildError::invalid(
                "baseConfig",
                "base document must be a mapping",
            ));
        };

        let mut target = Self {
            groups: Vec::new(),
            proxies: Vec::new(),
            builtins: Vec::new(),
            seen: Vec::new(),
            reserved: Vec::new(),
            root: Map::new(),
        };

        for outbound in take_array(&mut root, "outbounds") {
            if outbound_tag(&outbound).is_none() {
                tracing::warn!("dropping base outbound without a tag");
                continue;
            }
            let bucket = match outbound_type(&outbound) {
                Some("selector" | "urltest") => &mut target.groups,
                Some("direct" | "block" | "dns") => &mut target.builtins,
                _ => &mut target.proxies,
            };
            bucket.push(outbound);
        }

        for (kind, tag) in [("direct", DIRECT), ("block", REJECT)] {
            if !target.builtins.iter().any(|o| outbound_tag(o) == Some(tag)) {
                target.builtins.push(json!({ "type": kind, "tag": tag }));
            }
        }

        target.seen = target.proxies.clone();
        target.root = root;
        Ok(target)
    }

    fn taken_tags(&self) -> Vec<&str> {
        self.groups
            .iter()
            .chain(self.proxies.iter())
            .chain(self.builtins.iter())
            .filter_map(outbound_tag)
            .chain(self.reserved.iter().map(String::as_str))
            .collect()
    }

    /// Add a group, or extend the existing group with the same tag.
    fn push_group(&mut self, group: Value) {
        let Some(tag) = outbound_tag(&group).map(str::to_string) else {
            return;
        };

        let Some(existing) = self
            .groups
            .iter_mut()
            .find(|candidate| outbound_tag(candidate) == Some(tag.as_str()))
        else {
            self.groups.push(group);
            return;
        };

        let incoming = group
            .get("outbounds")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if let Some(Value::Array(members)) = existing.get_mut("outbounds") {
            for member in incoming {
                if !members.contains(&member) {
                    members.push(member);
                }
            }
        } else if let Some(map) = existing.as_object_mut() {
            map.insert("outbounds".into(), Value::Array(incoming));
        }
    }

    fn selector(tag: &str, members: Vec<String>) -> Value {
        json!({
            "type": "selector",
            "tag": tag,
            "outbounds": members,
        })
    }
}

impl ConfigTarget for SingBoxTarget {
    type Proxy = Value;

    fn target_name(&self) -> &'static str {
        "singbox"
    }

    fn proxies(&self) -> Result<&[Value], BuildError> {
        Ok(&self.proxies)
    }

    fn proxy_name<'a>(&self, proxy: &'a Value) -> Result<&'a str, BuildError> {
        outbound_tag(proxy)
            .ok_or_else(|| BuildError::invalid("outbounds", "outbound without a tag"))
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
            tracing::debug!(tag = ?outbound_tag(&proxy), "dropping duplicate outbound");
            return Ok(());
        }
        self.seen.push(proxy.clone());

        let tag = self.proxy_name(&proxy)?.to_string();
        let unique = unique_name(&self.taken_tags(), &tag);
        if unique != tag {
            if let Some(map) = proxy.as_object_mut() {
                map.insert("tag".into(), Value::String(unique));
            }
        }
        self.proxies.push(proxy);
        Ok(())
    }

    fn add_auto_select_group(&mut self, proxies: &[String]) -> Result<(), BuildError> {
        self.push_group(json!({
            "type": "urltest",
            "tag": AUTO_SELECT,
            "outbounds": proxies,
            "url": TEST_URL,
            "interval": format!("{TEST_INTERVAL}s"),
            "tolerance": 50,
        }));
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
        let Self {
            mut root,
            groups,
            proxies,
            builtins,
            ..
        } = self;

        let outbounds: Vec<Value> = groups.into_iter().chain(proxies).chain(builtins).collect();
        root.insert("outbounds".into(), Value::Array(outbounds));

        let mut route = match root.remove("route") {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        let mut rule_sets = take_array(&mut route, "rule_set");
        let generated = plan
            .geosites()
            .into_iter()
            .map(|name| remote_rule_set("geosite", name))
            .chain(plan.geoips().into_iter().map(|name| remote_rule_set("geoip", name)));
        for rule_set in generated {
            if !rule_sets.iter().any(|existing| existing.get("tag") == rule_set.get("tag")) {
                rule_sets.push(rule_set);
            }
        }

        let mut rules = take_array(&mut route, "rules");
        rules.extend(
            plan.bindings()
                .filter_map(|binding| route_rule(binding.predicate, binding.outbound)),
        );

        route.insert("rule_set".into(), Value::Array(rule_sets));
        route.insert("rules".into(), Value::Array(rules));
        route.insert("final".into(), Value::String(plan.final_outbound().to_string()));
        root.insert("route".into(), Value::Object(route));

        Ok(Document::SingBox(Value::Object(root)))
    }
}

fn convert(record: &ProxyRecord) -> Value {
    let mut out = Map::new();
    let kind = record.kind().as_str();
    out.insert("type".into(), kind.into());
    out.insert("tag".into(), record.tag.clone().into());
    out.insert("server".into(), record.server.clone().into());
    out.insert("server_port".into(), record.port.into());

    match &record.protocol {
        Protocol::Shadowsocks(ss) => {
            out.insert("method".into(), ss.method.clone().into());
            out.insert("password".into(), ss.password.clone().into());
            insert_opt(&mut out, "plugin", ss.plugin.as_deref());
            insert_opt(&mut out, "plugin_opts", ss.plugin_opts.as_deref());
        }
        Protocol::Vmess(vmess) => {
            out.insert("uuid".into(), vmess.uuid.clone().into());
            out.insert("alter_id".into(), vmess.alter_id.into());
            out.insert("security".into(), vmess.security.clone().into());
            if let Some(tls) = &vmess.tls {
                out.insert("tls".into(), tls_value(tls, &record.server));
            }
            if let Some(transport) = &vmess.transport {
                out.insert("transport".into(), transport_value(transport));
            }
        }
        Protocol::Vless(vless) => {
            out.insert("uuid".into(), vless.uuid.clone().into());
            insert_opt(&mut out, "flow", vless.flow.as_deref());
            if let Some(tls) = &vless.tls {
                out.insert("tls".into(), tls_value(tls, &record.server));
            }
            if let Some(transport) = &vless.transport {
                out.insert("transport".into(), transport_value(transport));
            }
        }
        Protocol::Trojan(trojan) => {
            out.insert("password".into(), trojan.password.clone().into());
            out.insert("tls".into(), tls_value(&trojan.tls, &record.server));
            if let Some(transport) = &trojan.transport {
                out.insert("transport".into(), transport_value(transport));
            }
        }
        Protocol::Hysteria2(hy2) => {
            out.insert("password".into(), hy2.password.clone().into());
            if let Some(obfs) = &hy2.obfs {
                let password = hy2.obfs_password.clone().unwrap_or_default();
                out.insert("obfs".into(), json!({ "type": obfs, "password": password }));
            }
            if let Some(up) = hy2.up_mbps {
                out.insert("up_mbps".into(), up.into());
            }
            if let Some(down) = hy2.down_mbps {
                out.insert("down_mbps".into(), down.into());
            }
            out.insert("tls".into(), tls_value(&hy2.tls, &record.server));
        }
        Protocol::Tuic(tuic) => {
            out.insert("uuid".into(), tuic.uuid.clone().into());
            out.insert("password".into(), tuic.password.clone().into());
            insert_opt(&mut out, "congestion_control", tuic.congestion_control.as_deref());
            insert_opt(&mut out, "udp_relay_mode", tuic.udp_relay_mode.as_deref());
            out.insert("tls".into(), tls_value(&tuic.tls, &record.server));
        }
    }

    Value::Object(out)
}

fn tls_value(tls: &Tls, server: &str) -> Value {
    let mut out = Map::new();
    out.insert("enabled".into(), true.into());
    out.insert(
        "server_name".into(),
        tls.server_name.as_deref().unwrap_or(server).into(),
    );
    out.insert("insecure".into(), tls.insecure.into());
    if !tls.alpn.is_empty() {
        out.insert("alpn".into(), tls.alpn.clone().into());
    }
    if let Some(fingerprint) = &tls.fingerprint {
        out.insert(
            "utls".into(),
            json!({ "enabled": true, "fingerprint": fingerprint }),
        );
    }
    if let Some(reality) = &tls.reality {
        let mut map = Map::new();
        map.insert("enabled".into(), true.into());
        map.insert("public_key".into(), reality.public_key.clone().into());
        insert_opt(&mut map, "short_id", reality.short_id.as_deref());
        out.insert("reality".into(), Value::Object(map));
    }
    Value::Object(out)
}

fn transport_value(transport: &Transport) -> Value {
    let mut out = Map::new();
    match transport {
        Transport::WebSocket { path, host } => {
            out.insert("type".into(), "ws".into());
            insert_opt(&mut out, "path", path.as_deref());
            if let Some(host) = host {
                out.insert("headers".into(), json!({ "Host": host }));
            }
        }
        Transport::Grpc { service_name } => {
            out.insert("type".into(), "grpc".into());
            insert_opt(&mut out, "service_name", service_name.as_deref());
        }
        Transport::Http { path, host } => {
            out.insert("type".into(), "http".into());
            insert_opt(&mut out, "path", path.as_deref());
            if let Some(host) = host {
                out.insert("host".into(), json!([host]));
            }
        }
    }
    Value::Object(out)
}

fn remote_rule_set(kind: &str, name: &str) -> Value {
    json!({
        "tag": format!("{kind}-{name}"),
        "type": "remote",
        "format": "binary",
        "url": format!("{RULE_SET_BASE}/{kind}/{name}.srs"),
        "download_detour": DIRECT,
    })
}

fn route_rule(predicate: &Predicate, outbound: &str) -> Option<Value> {
    let (key, value) = match predicate {
        Predicate::GeoSite(name) => ("rule_set", format!("geosite-{name}")),
        Predicate::GeoIp(name) => ("rule_set", format!("geoip-{name}")),
        Predicate::DomainSuffix(value) => ("domain_suffix", value.clone()),
        Predicate::DomainKeyword(value) => ("domain_keyword", value.clone()),
        Predicate::IpCidr(value) => ("ip_cidr", value.clone()),
        Predicate::ProcessName(value) => ("process_name", value.clone()),
        Predicate::Final => return None,
    };
    let mut rule = Map::new();
    rule.insert(key.into(), json!([value]));
    rule.insert("outbound".into(), outbound.into());
    Some(Value::Object(rule))
}

fn insert_opt(map: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        map.insert(key.into(), value.into());
    }
}

fn take_array(map: &mut Map<String, Value>, key: &str) -> Vec<Value> {
    match map.remove(key) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

fn outbound_tag(outbound: &Value) -> Option<&str> {
    outbound.get("tag").and_then(Value::as_str)
}

fn outbound_type(outbound: &Value) -> Option<&str> {
    outbound.get("type").and_then(Value::as_str)
}
