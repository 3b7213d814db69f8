use serde_json::{Map, Value};

use super::{
    category_members, custom_members, fallback_members, node_select_members, ConfigTarget,
    Document, Target, TEST_INTERVAL, TEST_URL,
};
use crate::error::BuildError;
use crate::merge::unique_name;
use crate::proxy::{Protocol, ProxyRecord, Tls, Transport};
use crate::rules::{Predicate, RuleCategory, RulePlan, AUTO_SELECT, FALL_BACK, NODE_SELECT};
use crate::template::Template;

const RULE_SET_BASE: &str =
    "https://github.com/NSZA156/surge-geox-rules/raw/refs/heads/release/geo";
const MANAGED_INTERVAL: u32 = 43200;

const PROXY_SECTION: &str = "Proxy";
const GROUP_SECTION: &str = "Proxy Group";
const RULE_SECTION: &str = "Rule";

/// One `[Proxy]` line: `name = definition`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurgeProxy {
    pub name: String,
    pub definition: String,
}

impl SurgeProxy {
    pub fn line(&self) -> String {
        format!("{} = {}", self.name, self.definition)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SurgeGroup {
    name: String,
    kind: String,
    members: Vec<String>,
    options: Vec<String>,
}

impl SurgeGroup {
    fn select(name: &str, members: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            kind: "select".into(),
            members,
            options: Vec::new(),
        }
    }

    /// Parse the right-hand side of a `[Proxy Group]` line.
    fn parse(name: &str, definition: &str) -> Option<Self> {
        let mut parts = definition.split(',').map(str::trim).filter(|p| !p.is_empty());
        let kind = parts.next()?.to_string();
        let (options, members): (Vec<&str>, Vec<&str>) = parts.partition(|p| p.contains('='));
        Some(Self {
            name: name.to_string(),
            kind,
            members: members.into_iter().map(str::to_string).collect(),
            options: options.into_iter().map(str::to_string).collect(),
        })
    }

    fn line(&self) -> String {
        let mut line = format!("{} = {}", self.name, self.kind);
        for part in self.members.iter().chain(self.options.iter()) {
            line.push_str(", ");
            line.push_str(part);
        }
        line
    }
}

/// Surge text config under construction.
#[derive(Debug, Clone)]
pub struct SurgeTarget {
    sections: Vec<(String, Vec<(String, String)>)>,
    proxies: Vec<SurgeProxy>,
    seen: Vec<SurgeProxy>,
    reserved: Vec<String>,
    groups: Vec<SurgeGroup>,
    base_rules: Vec<String>,
    managed_url: Option<String>,
}

impl SurgeTarget {
    /// `base` maps section names to key/value mappings. `Proxy` and
    /// `Proxy Group` entries seed the generated sections and a `Rule` array
    /// is kept ahead of the generated rules.
    pub fn new(base: Option<&Value>, managed_url: Option<String>) -> Result<Self, BuildError> {
        let Value::Object(root) = Template::with_base(Target::Surge, base)?.into_document() else {
            return Err(BuildError::invalid(
                "baseConfig",
                "base document must be a mapping",
            ));
        };

        let mut target = Self {
            sections: Vec::new(),
            proxies: Vec::new(),
            seen: Vec::new(),
            reserved: Vec::new(),
            groups: Vec::new(),
            base_rules: Vec::new(),
            managed_url: managed_url.filter(|url| !url.trim().is_empty()),
        };

        // [General] leads.
        let mut entries: Vec<(String, Value)> = root.into_iter().collect();
        entries.sort_by_key(|(name, _)| name != "General");

        for (name, value) in entries {
            match value {
                Value::Object(map) if name == PROXY_SECTION => {
                    target.proxies = section_entries(&map)
                        .into_iter()
                        .map(|(name, definition)| SurgeProxy { name, definition })
                        .collect();
                }
                Value::Object(map) if name == GROUP_SECTION => {
                    target.groups = section_entries(&map)
                        .into_iter()
                        .filter_map(|(name, definition)| SurgeGroup::parse(&name, &definition))
                        .collect();
                }
                Value::Array(rules) if name == RULE_SECTION => {
                    target.base_rules = rules
                        .iter()
                        .filter_map(Value::as_str)
                        .filter(|rule| !rule.trim_start().starts_with("FINAL,"))
                        .map(str::to_string)
                        .collect();
                }
                Value::Object(map) => {
                    let entries = section_entries(&map);
                    target.sections.push((name, entries));
                }
                _ => {
                    tracing::warn!(section = %name, "ignoring surge section that is not a mapping")
                }
            }
        }

        target.seen = target.proxies.clone();
        Ok(target)
    }

    fn push_group(&mut self, group: SurgeGroup) {
        match self.groups.iter_mut().find(|g| g.name == group.name) {
            Some(existing) => {
                for member in group.members {
                    if !existing.members.contains(&member) {
                        existing.members.push(member);
                    }
                }
            }
            None => self.groups.push(group),
        }
    }
}

fn section_entries(map: &Map<String, Value>) -> Vec<(String, String)> {
    map.iter()
        .map(|(key, value)| (key.clone(), render_value(value)))
        .collect()
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl ConfigTarget for SurgeTarget {
    type Proxy = SurgeProxy;

    fn target_name(&self) -> &'static str {
        "surge"
    }

    fn proxies(&self) -> Result<&[SurgeProxy], BuildError> {
        Ok(&self.proxies)
    }

    fn proxy_name<'a>(&self, proxy: &'a SurgeProxy) -> Result<&'a str, BuildError> {
        Ok(proxy.name.as_str())
    }

    fn convert_proxy(&self, record: &ProxyRecord) -> Result<Option<SurgeProxy>, BuildError> {
        Ok(convert(record))
    }

    fn reserve_group_names(&mut self, names: &[String]) -> Result<(), BuildError> {
        self.reserved.extend(names.iter().cloned());
        Ok(())
    }

    fn add_proxy_to_config(&mut self, mut proxy: SurgeProxy) -> Result<(), BuildError> {
        if self.seen.contains(&proxy) {
            tracing::debug!(name = %proxy.name, "dropping duplicate proxy");
            return Ok(());
        }
        self.seen.push(proxy.clone());

        let taken: Vec<&str> = self
            .proxies
            .iter()
            .map(|p| p.name.as_str())
            .chain(self.groups.iter().map(|g| g.name.as_str()))
            .chain(self.reserved.iter().map(String::as_str))
            .collect();
        proxy.name = unique_name(&taken, &proxy.name);
        self.proxies.push(proxy);
        Ok(())
    }

    fn add_auto_select_group(&mut self, proxies: &[String]) -> Result<(), BuildError> {
        self.push_group(SurgeGroup {
            name: AUTO_SELECT.to_string(),
            kind: "url-test".into(),
            members: proxies.to_vec(),
            options: vec![
                format!("url={TEST_URL}"),
                format!("interval={TEST_INTERVAL}"),
            ],
        });
        Ok(())
    }

    fn add_node_select_group(&mut self, proxies: &[String]) -> Result<(), BuildError> {
        self.push_group(SurgeGroup::select(NODE_SELECT, node_select_members(proxies)));
        Ok(())
    }

    fn add_outbound_groups(
        &mut self,
        categories: &[RuleCategory],
        proxies: &[String],
    ) -> Result<(), BuildError> {
        for category in categories {
            self.push_group(SurgeGroup::select(
                &category.outbound,
                category_members(category, proxies),
            ));
        }
        Ok(())
    }

    fn add_custom_rule_groups(
        &mut self,
        custom: &[RuleCategory],
        proxies: &[String],
    ) -> Result<(), BuildError> {
        for rule in custom {
            self.push_group(SurgeGroup::select(&rule.outbound, custom_members(proxies)));
        }
        Ok(())
    }

    fn add_fallback_group(&mut self, proxies: &[String]) -> Result<(), BuildError> {
        self.push_group(SurgeGroup::select(FALL_BACK, fallback_members(proxies)));
        Ok(())
    }

    fn format_config(self, plan: &RulePlan) -> Result<Document, BuildError> {
        let mut lines: Vec<String> = Vec::new();

        if let Some(url) = &self.managed_url {
            lines.push(format!(
                "#!MANAGED-CONFIG {url} interval={MANAGED_INTERVAL} strict=false"
            ));
        }

        for (name, entries) in &self.sections {
            lines.push(format!("[{name}]"));
            lines.extend(entries.iter().map(|(key, value)| format!("{key} = {value}")));
            lines.push(String::new());
        }

        lines.push(format!("[{PROXY_SECTION}]"));
        lines.extend(self.proxies.iter().map(SurgeProxy::line));

        lines.push(String::new());
        lines.push(format!("[{GROUP_SECTION}]"));
        lines.extend(self.groups.iter().map(SurgeGroup::line));

        lines.push(String::new());
        lines.push(format!("[{RULE_SECTION}]"));
        lines.extend(self.base_rules.iter().cloned());
        lines.extend(
            plan.bindings()
                .filter_map(|binding| rule_line(binding.predicate, binding.outbound)),
        );
        lines.push(format!("FINAL,{}", plan.final_outbound()));

        let mut out = lines.join("\n");
        out.push('\n');
        Ok(Document::Surge(out))
    }
}

/// `None` for links Surge has no proxy type or transport for.
fn convert(record: &ProxyRecord) -> Option<SurgeProxy> {
    // Commas and '=' would split the line.
    let name = match record.tag.replace([',', '='], " ").trim() {
        "" => format!("{}:{}", record.server, record.port),
        cleaned => cleaned.to_string(),
    };
    let mut parts = vec![String::new(), record.server.clone(), record.port.to_string()];

    match &record.protocol {
        Protocol::Shadowsocks(ss) => {
            parts[0] = "ss".into();
            parts.push(format!("encrypt-method={}", ss.method));
            parts.push(format!("password={}", ss.password));
            if let Some(plugin) = ss.plugin.as_deref().filter(|p| !p.is_empty()) {
                if !matches!(plugin, "obfs-local" | "simple-obfs" | "obfs") {
                    return None;
                }
                for opt in ss.plugin_opts.as_deref().unwrap_or_default().split(';') {
                    match opt.trim().split_once('=') {
                        Some(("obfs", mode)) => parts.push(format!("obfs={mode}")),
                        Some(("obfs-host", host)) => parts.push(format!("obfs-host={host}")),
                        _ => {}
                    }
                }
            }
            parts.push("udp-relay=true".into());
        }
        Protocol::Vmess(vmess) => {
            parts[0] = "vmess".into();
            parts.push(format!("username={}", vmess.uuid));
            if vmess.alter_id == 0 {
                parts.push("vmess-aead=true".into());
            }
            if let Some(tls) = &vmess.tls {
                parts.push("tls=true".into());
                push_tls(&mut parts, tls);
            }
            push_transport(&mut parts, vmess.transport.as_ref())?;
        }
        Protocol::Vless(_) => return None,
        Protocol::Trojan(trojan) => {
            parts[0] = "trojan".into();
            parts.push(format!("password={}", trojan.password));
            push_tls(&mut parts, &trojan.tls);
            push_transport(&mut parts, trojan.transport.as_ref())?;
        }
        Protocol::Hysteria2(hy2) => {
            if hy2.obfs.is_some() {
                return None;
            }
            parts[0] = "hysteria2".into();
            parts.push(format!("password={}", hy2.password));
            push_tls(&mut parts, &hy2.tls);
            if let Some(down) = hy2.down_mbps {
                parts.push(format!("download-bandwidth={down}"));
            }
        }
        Protocol::Tuic(tuic) => {
            parts[0] = "tuic-v5".into();
            parts.push(format!("password={}", tuic.password));
            parts.push(format!("uuid={}", tuic.uuid));
            push_tls(&mut parts, &tuic.tls);
        }
    }

    Some(SurgeProxy {
        name,
        definition: parts.join(", "),
    })
}

fn push_tls(parts: &mut Vec<String>, tls: &Tls) {
    if let Some(sni) = &tls.server_name {
        parts.push(format!("sni={sni}"));
    }
    if tls.insecure {
        parts.push("skip-cert-verify=true".into());
    }
    if let Some(alpn) = tls.alpn.first() {
        parts.push(format!("alpn={alpn}"));
    }
}

fn push_transport(parts: &mut Vec<String>, transport: Option<&Transport>) -> Option<()> {
    match transport {
        None => Some(()),
        Some(Transport::WebSocket { path, host }) => {
            parts.push("ws=true".into());
            if let Some(path) = path {
                parts.push(format!("ws-path={path}"));
            }
            if let Some(host) = host {
                parts.push(format!("ws-headers=Host:\"{host}\""));
            }
            Some(())
        }
        Some(Transport::Grpc { .. } | Transport::Http { .. }) => None,
    }
}

fn rule_line(predicate: &Predicate, outbound: &str) -> Option<String> {
    let line = match predicate {
        Predicate::GeoSite(name) => {
            format!("RULE-SET,{RULE_SET_BASE}/geosite/{name}.list,{outbound}")
        }
        Predicate::GeoIp(name) => {
            format!("RULE-SET,{RULE_SET_BASE}/geoip/{name}.list,{outbound},no-resolve")
        }
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

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::builder::synthesize;
    use crate::proxy::{Shadowsocks, Trojan, Vless, Vmess};
    use crate::rules::{CustomRule, RuleSelection, DIRECT};

    fn ss(tag: &str) -> ProxyRecord {
        ProxyRecord {
            tag: tag.into(),
            server: "1.2.3.4".into(),
            port: 8388,
            protocol: Protocol::Shadowsocks(Shadowsocks {
                method: "aes-128-gcm".into(),
                password: "pw".into(),
                plugin: Some("obfs-local".into()),
                plugin_opts: Some("obfs=tls;obfs-host=bing.com".into()),
            }),
        }
    }

    fn vless(tag: &str) -> ProxyRecord {
        ProxyRecord {
            tag: tag.into(),
            server: "v.example.com".into(),
            port: 443,
            protocol: Protocol::Vless(Vless {
                uuid: "u".into(),
                flow: None,
                tls: None,
                transport: None,
            }),
        }
    }

    fn build(records: &[ProxyRecord], plan: &RulePlan, managed: Option<&str>) -> String {
        let target = SurgeTarget::new(None, managed.map(str::to_string)).unwrap();
        match synthesize(target, records, plan).unwrap() {
            Document::Surge(text) => text,
            other => panic!("unexpected document {other:?}"),
        }
    }

    fn section<'a>(text: &'a str, name: &str) -> Vec<&'a str> {
        let header = format!("[{name}]");
        text.lines()
            .skip_while(|line| *line != header)
            .skip(1)
            .take_while(|line| !line.starts_with('['))
            .filter(|line| !line.is_empty())
            .collect()
    }

    #[test]
    fn separator_only_names_fall_back_to_endpoint() {
        let proxy = convert(&ss(" ,=, ")).unwrap();
        assert_eq!(proxy.name, "1.2.3.4:8388");
        assert!(proxy.line().starts_with("1.2.3.4:8388 = ss, "));
    }

    #[test]
    fn proxy_lines() {
        let proxy = convert(&ss("HK, 01")).unwrap();
        assert_eq!(proxy.name, "HK  01");
        assert_eq!(
            proxy.definition,
            "ss, 1.2.3.4, 8388, encrypt-method=aes-128-gcm, password=pw, obfs=tls, obfs-host=bing.com, udp-relay=true"
        );

        let vmess = ProxyRecord {
            tag: "vm".into(),
            server: "vm.example.com".into(),
            port: 443,
            protocol: Protocol::Vmess(Vmess {
                uuid: "uuid-1".into(),
                alter_id: 0,
                security: "auto".into(),
                tls: Some(Tls {
                    server_name: Some("vm.example.com".into()),
                    ..Default::default()
                }),
                transport: Some(Transport::WebSocket {
                    path: Some("/ws".into()),
                    host: None,
                }),
            }),
        };
        assert_eq!(
            convert(&vmess).unwrap().line(),
            "vm = vmess, vm.example.com, 443, username=uuid-1, vmess-aead=true, tls=true, sni=vm.example.com, ws=true, ws-path=/ws"
        );
    }

    #[test]
    fn inexpressible_links_are_skipped() {
        assert!(convert(&vless("v")).is_none());

        let grpc = ProxyRecord {
            tag: "t".into(),
            server: "t.example.com".into(),
            port: 443,
            protocol: Protocol::Trojan(Trojan {
                password: "p".into(),
                tls: Tls::default(),
                transport: Some(Transport::Grpc { service_name: None }),
            }),
        };
        assert!(convert(&grpc).is_none());

        let plan = RulePlan::new(&RuleSelection::Default, &[]);
        let text = build(&[vless("v"), ss("A")], &plan, None);
        assert_eq!(section(&text, "Proxy").len(), 1);
        let auto =
            "⚡ Auto Select = url-test, A, url=http://www.gstatic.com/generate_204, interval=300";
        assert!(section(&text, "Proxy Group").contains(&auto));
    }

    #[test]
    fn document_layout() {
        let custom = CustomRule {
            name: "Work".into(),
            process_name: "Slack".into(),
            ..Default::default()
        };
        let plan = RulePlan::new(&RuleSelection::Default, &[custom]);
        let text = build(&[ss("A")], &plan, Some("https://sub.example.com/surge"));

        assert!(text.starts_with(
            "#!MANAGED-CONFIG https://sub.example.com/surge interval=43200 strict=false\n[General]\n"
        ));

        let groups = section(&text, "Proxy Group");
        assert_eq!(groups[1], "🚀 Node Select = select, ⚡ Auto Select, A");
        assert_eq!(groups[2], "🏠 Private = select, DIRECT, 🚀 Node Select, A");
        assert_eq!(groups[5], format!("Work = select, 🚀 Node Select, {DIRECT}, A"));
        assert_eq!(groups[6], "🐟 Fall Back = select, 🚀 Node Select, A");

        let rules = section(&text, "Rule");
        assert_eq!(rules[0], "PROCESS-NAME,Slack,Work");
        assert!(rules[1].starts_with("RULE-SET,https://"));
        assert!(rules[1].ends_with("/geoip/private.list,🏠 Private,no-resolve"));
        assert_eq!(rules.last(), Some(&"FINAL,🐟 Fall Back"));
        assert_eq!(rules.iter().filter(|r| r.starts_with("FINAL,")).count(), 1);
    }

    #[test]
    fn base_sections_are_merged() {
        let base = json!({
            "General": { "loglevel": "warning" },
            "MITM": { "hostname": ["a.example.com", "b.example.com"] },
            "Proxy": { "Home": "socks5, 10.0.0.1, 1080" },
            "Rule": ["DOMAIN,router.lan,DIRECT", "FINAL,DIRECT"]
        });
        let plan = RulePlan::new(&RuleSelection::Default, &[]);
        let target = SurgeTarget::new(Some(&base), None).unwrap();
        let Document::Surge(text) = synthesize(target, &[ss("A")], &plan).unwrap() else {
            panic!("expected surge document");
        };

        assert!(text.starts_with("[General]\n"));
        assert!(section(&text, "General").contains(&"loglevel = warning"));
        assert_eq!(
            section(&text, "MITM"),
            vec!["hostname = a.example.com, b.example.com"]
        );
        let generated = convert(&ss("A")).unwrap().line();
        assert_eq!(
            section(&text, "Proxy"),
            vec!["Home = socks5, 10.0.0.1, 1080", generated.as_str()]
        );
        let rules = section(&text, "Rule");
        assert_eq!(rules[0], "DOMAIN,router.lan,DIRECT");
        assert_eq!(rules.last(), Some(&"FINAL,🐟 Fall Back"));
    }
}
