use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use sublink_core::params::parse_excluded_protocols;
use sublink_core::rules::{AUTO_SELECT, FALL_BACK};
use sublink_core::{
    build_document, build_link_bundle, BuildError, BuildParams, Document, ExclusionFilter, Fetcher,
    Target,
};

#[derive(Default)]
struct FakeFetcher {
    bodies: HashMap<String, String>,
    delays: HashMap<String, u64>,
}

impl FakeFetcher {
    fn with(mut self, url: &str, body: &str, delay_ms: u64) -> Self {
        self.bodies.insert(url.to_string(), body.to_string());
        self.delays.insert(url.to_string(), delay_ms);
        self
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
            .ok_or_else(|| anyhow::anyhow!("unreachable {url}"))
    }
}

/// Serves one body for every URL and remembers the User-Agent of each call.
struct AgentRecorder {
    body: String,
    agents: Mutex<Vec<String>>,
}

impl AgentRecorder {
    fn new(body: &str) -> Self {
        Self {
            body: body.to_string(),
            agents: Mutex::new(Vec::new()),
        }
    }

    fn agents(&self) -> Vec<String> {
        self.agents.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for AgentRecorder {
    async fn fetch(&self, _url: &str, user_agent: &str) -> anyhow::Result<String> {
        self.agents.lock().unwrap().push(user_agent.to_string());
        Ok(self.body.clone())
    }
}

const GROUP_TYPES: &[&str] = &["selector", "urltest", "direct", "block", "dns"];

fn singbox(document: Document) -> Value {
    match document {
        Document::SingBox(value) => value,
        other => panic!("expected sing-box document, got {other:?}"),
    }
}

fn proxy_outbounds(doc: &Value) -> Vec<&Value> {
    doc["outbounds"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|o| !GROUP_TYPES.contains(&o["type"].as_str().unwrap_or_default()))
        .collect()
}

fn proxy_tags(doc: &Value) -> Vec<String> {
    proxy_outbounds(doc)
        .iter()
        .map(|o| o["tag"].as_str().unwrap().to_string())
        .collect()
}

fn group_members(doc: &Value, tag: &str) -> Vec<String> {
    doc["outbounds"]
        .as_array()
        .unwrap()
        .iter()
        .find(|o| o["tag"] == tag)
        .unwrap_or_else(|| panic!("missing group {tag}"))["outbounds"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m.as_str().unwrap().to_string())
        .collect()
}

fn vmess_link(name: &str) -> String {
    let body = serde_json::json!({
        "v": "2",
        "ps": name,
        "add": "vm.example.com",
        "port": "443",
        "id": "3b1f7c52-5c1a-4d4e-9a57-0d4f0e3c2b11",
        "aid": "0",
        "net": "tcp",
        "tls": ""
    });
    format!("vmess://{}", STANDARD.encode(body.to_string()))
}

#[tokio::test]
async fn shadowsocks_link_becomes_single_outbound() {
    let link = format!("ss://{}@1.2.3.4:8080#MyNode", STANDARD.encode("aes-256-gcm:secret"));

    let doc = singbox(
        build_document(
            Target::SingBox,
            &link,
            &BuildParams::default(),
            &FakeFetcher::default(),
        )
        .await
        .unwrap(),
    );

    let proxies = proxy_outbounds(&doc);
    assert_eq!(proxies.len(), 1);
    assert_eq!(proxies[0]["tag"], "MyNode");
    assert_eq!(proxies[0]["type"], "shadowsocks");
    assert_eq!(proxies[0]["server"], "1.2.3.4");
    assert_eq!(proxies[0]["server_port"], 8080);
    assert_eq!(proxies[0]["method"], "aes-256-gcm");
}

#[tokio::test]
async fn excluded_protocol_leaves_groups_with_survivor() {
    let input = format!("{}\ntrojan://pw@tr.example.com:443#TR", vmess_link("VM"));
    let params = BuildParams {
        excluded_protocols: parse_excluded_protocols(Some(r#"["trojan"]"#)).unwrap(),
        ..BuildParams::default()
    };

    let doc = singbox(
        build_document(Target::SingBox, &input, &params, &FakeFetcher::default())
            .await
            .unwrap(),
    );

    assert_eq!(proxy_tags(&doc), vec!["VM"]);
    assert_eq!(group_members(&doc, AUTO_SELECT), vec!["VM"]);
    assert!(group_members(&doc, FALL_BACK).contains(&"VM".to_string()));
    assert!(!group_members(&doc, FALL_BACK).contains(&"TR".to_string()));
}

#[tokio::test]
async fn base64_blob_expands_to_sibling_records() {
    let links = [
        "vless://3b1f7c52-5c1a-4d4e-9a57-0d4f0e3c2b11@a.example.com:443?security=tls#A",
        "vless://3b1f7c52-5c1a-4d4e-9a57-0d4f0e3c2b11@b.example.com:443?security=tls#B",
        "vless://3b1f7c52-5c1a-4d4e-9a57-0d4f0e3c2b11@c.example.com:443?security=tls#C",
    ];
    let blob = STANDARD.encode(links.join("\n"));

    let doc = singbox(
        build_document(
            Target::SingBox,
            &blob,
            &BuildParams::default(),
            &FakeFetcher::default(),
        )
        .await
        .unwrap(),
    );

    assert_eq!(proxy_tags(&doc), vec!["A", "B", "C"]);
    assert!(proxy_outbounds(&doc).iter().all(|o| o["type"] == "vless"));
}

#[tokio::test]
async fn default_rules_yield_one_fallback_per_target() {
    let input = "trojan://pw@tr.example.com:443#TR";

    for target in Target::ALL {
        let document =
            build_document(target, input, &BuildParams::default(), &FakeFetcher::default())
                .await
                .unwrap();
        let text = document.to_text().unwrap();

        match document {
            Document::SingBox(doc) => {
                let fallbacks = doc["outbounds"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .filter(|o| o["tag"] == FALL_BACK)
                    .count();
                assert_eq!(fallbacks, 1);
                assert_eq!(doc["route"]["final"], FALL_BACK);
            }
            Document::Clash(config) => {
                let names = config.proxy_group_names();
                assert_eq!(names.iter().filter(|n| n.as_str() == FALL_BACK).count(), 1);
                let last = config.rules.last().unwrap();
                assert_eq!(last, &format!("MATCH,{FALL_BACK}"));
                assert_eq!(text.matches("MATCH,").count(), 1);
            }
            Document::Surge(_) => {
                assert_eq!(text.matches(&format!("{FALL_BACK} = ")).count(), 1);
                assert_eq!(text.matches("\nFINAL,").count(), 1);
            }
        }
    }
}

#[tokio::test]
async fn repeated_builds_are_byte_identical() {
    let input = format!(
        "{}\ntrojan://pw@tr.example.com:443#TR\nhy2://pw@hy.example.com:8443?sni=hy.example.com#HY",
        vmess_link("VM")
    );
    let params = BuildParams {
        selection: sublink_core::params::parse_rule_selection(Some("balanced")).unwrap(),
        ..BuildParams::default()
    };

    for target in Target::ALL {
        let fetcher = FakeFetcher::default();
        let first = build_document(target, &input, &params, &fetcher)
            .await
            .unwrap()
            .to_text()
            .unwrap();
        let second = build_document(target, &input, &params, &fetcher)
            .await
            .unwrap()
            .to_text()
            .unwrap();
        assert_eq!(first, second, "{target} output drifted between runs");
    }
}

#[tokio::test]
async fn input_order_survives_uneven_fetch_latency() {
    let fetcher = FakeFetcher::default()
        .with("https://slow.example.com/", "trojan://pw@a.example.com:443#A", 60)
        .with("https://fast.example.com/", "trojan://pw@b.example.com:443#B", 0);
    let input = [
        "https://slow.example.com/",
        "https://fast.example.com/",
        "trojan://pw@c.example.com:443#C",
    ]
    .join("\n");

    let doc = singbox(
        build_document(Target::SingBox, &input, &BuildParams::default(), &fetcher)
            .await
            .unwrap(),
    );

    assert_eq!(proxy_tags(&doc), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn unreachable_subscription_contributes_nothing() {
    let input = "https://down.example.com/sub\ntrojan://pw@c.example.com:443#C";

    let doc = singbox(
        build_document(
            Target::SingBox,
            input,
            &BuildParams::default(),
            &FakeFetcher::default(),
        )
        .await
        .unwrap(),
    );

    assert_eq!(proxy_tags(&doc), vec!["C"]);
}

#[tokio::test]
async fn zero_surviving_proxies_still_build() {
    let input = "trojan://pw@tr.example.com:443#Expire 2030";
    let params = BuildParams {
        name_filter: "expire".into(),
        ..BuildParams::default()
    };

    let doc = singbox(
        build_document(Target::SingBox, input, &params, &FakeFetcher::default())
            .await
            .unwrap(),
    );

    assert!(proxy_tags(&doc).is_empty());
    assert!(group_members(&doc, AUTO_SELECT).is_empty());
    assert_eq!(doc["route"]["final"], FALL_BACK);
}

#[tokio::test]
async fn blank_input_is_missing() {
    let err = build_document(
        Target::Clash,
        "  \n",
        &BuildParams::default(),
        &FakeFetcher::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, BuildError::MissingInput("config")));
    assert!(err.is_client_error());
}

#[tokio::test]
async fn subscriptions_are_fetched_with_the_configured_user_agent() {
    let input = "https://sub.example.com/a\nhttps://sub.example.com/b";
    let params = BuildParams {
        user_agent: "clash-verge/v2.0.0".into(),
        ..BuildParams::default()
    };

    let fetcher = AgentRecorder::new("trojan://pw@a.example.com:443#A");
    let doc = singbox(
        build_document(Target::SingBox, input, &params, &fetcher)
            .await
            .unwrap(),
    );
    assert_eq!(proxy_tags(&doc), vec!["A"]);
    assert_eq!(fetcher.agents(), vec![params.user_agent.clone(); 2]);

    let fetcher = AgentRecorder::new("trojan://pw@a.example.com:443#A");
    build_link_bundle(input, &ExclusionFilter::default(), &params.user_agent, &fetcher)
        .await
        .unwrap();
    assert_eq!(fetcher.agents(), vec![params.user_agent.clone(); 2]);
}
