//! Config synthesis shared by every output format.
//!
//! [`synthesize`] drives a [`ConfigTarget`] through a fixed sequence of
//! steps. Targets fill in the steps; any step a target leaves out fails the
//! build with [`BuildError::Unsupported`].

use std::fmt;
use std::str::FromStr;

use serde_json::Value as JsonValue;

mod clash;
mod singbox;
mod surge;

pub use clash::ClashTarget;
pub use singbox::SingBoxTarget;
pub use surge::{SurgeProxy, SurgeTarget};

use crate::error::BuildError;
use crate::model::ClashConfig;
use crate::params::BuildParams;
use crate::proxy::ProxyRecord;
use crate::rules::{RuleCategory, RulePlan, AUTO_SELECT, DIRECT, NODE_SELECT};
use crate::subscription::{collect_records, Fetcher};

/// Group probe used by every latency-tested group.
pub const TEST_URL: &str = "http://www.gstatic.com/generate_204";
/// Seconds between latency probes.
pub const TEST_INTERVAL: u32 = 300;

/// Capabilities one output format provides to [`synthesize`].
///
/// Every step defaults to [`BuildError::Unsupported`] so that a target
/// missing a step cannot produce a half-built document.
pub trait ConfigTarget {
    /// Target-specific proxy block.
    type Proxy;

    fn target_name(&self) -> &'static str;

    /// Every proxy currently in the document, base proxies first.
    fn proxies(&self) -> Result<&[Self::Proxy], BuildError> {
        Err(BuildError::unsupported(self.target_name(), "proxies"))
    }

    fn proxy_name<'a>(&self, _proxy: &'a Self::Proxy) -> Result<&'a str, BuildError> {
        Err(BuildError::unsupported(self.target_name(), "proxy_name"))
    }

    /// `Ok(None)` when the format cannot express this record.
    fn convert_proxy(&self, _record: &ProxyRecord) -> Result<Option<Self::Proxy>, BuildError> {
        Err(BuildError::unsupported(self.target_name(), "convert_proxy"))
    }

    /// Names the group steps will create. Proxies added afterwards are
    /// renamed away from them.
    fn reserve_group_names(&mut self, _names: &[String]) -> Result<(), BuildError> {
        Err(BuildError::unsupported(self.target_name(), "reserve_group_names"))
    }

    fn add_proxy_to_config(&mut self, _proxy: Self::Proxy) -> Result<(), BuildError> {
        Err(BuildError::unsupported(self.target_name(), "add_proxy_to_config"))
    }

    fn add_auto_select_group(&mut self, _proxies: &[String]) -> Result<(), BuildError> {
        Err(BuildError::unsupported(self.target_name(), "add_auto_select_group"))
    }

    fn add_node_select_group(&mut self, _proxies: &[String]) -> Result<(), BuildError> {
        Err(BuildError::unsupported(self.target_name(), "add_node_select_group"))
    }

    fn add_outbound_groups(
        &mut self,
        _categories: &[RuleCategory],
        _proxies: &[String],
    ) -> Result<(), BuildError> {
        Err(BuildError::unsupported(self.target_name(), "add_outbound_groups"))
    }

    fn add_custom_rule_groups(
        &mut self,
        _custom: &[RuleCategory],
        _proxies: &[String],
    ) -> Result<(), BuildError> {
        Err(BuildError::unsupported(self.target_name(), "add_custom_rule_groups"))
    }

    fn add_fallback_group(&mut self, _proxies: &[String]) -> Result<(), BuildError> {
        Err(BuildError::unsupported(self.target_name(), "add_fallback_group"))
    }

    fn format_config(self, _plan: &RulePlan) -> Result<Document, BuildError>
    where
        Self: Sized,
    {
        Err(BuildError::unsupported(self.target_name(), "format_config"))
    }
}

/// Run the shared build steps over already filtered records.
pub fn synthesize<T: ConfigTarget>(
    mut target: T,
    records: &[ProxyRecord],
    plan: &RulePlan,
) -> Result<Document, BuildError> {
    target.reserve_group_names(&plan.group_names())?;

    for record in records {
        if record.tag.is_empty() {
            tracing::debug!(server = %record.server, "skipping proxy without a name");
            continue;
        }
        match target.convert_proxy(record)? {
            Some(proxy) => target.add_proxy_to_config(proxy)?,
            None => tracing::debug!(
                format = target.target_name(),
                kind = %record.kind(),
                tag = %record.tag,
                "proxy not expressible in target"
            ),
        }
    }

    let names = proxy_names(&target)?;

    target.add_auto_select_group(&names)?;
    target.add_node_select_group(&names)?;
    target.add_outbound_groups(&plan.categories, &names)?;
    target.add_custom_rule_groups(&plan.custom, &names)?;
    target.add_fallback_group(&names)?;

    tracing::info!(
        format = target.target_name(),
        proxies = names.len(),
        categories = plan.categories.len(),
        custom = plan.custom.len(),
        "synthesized config"
    );
    target.format_config(plan)
}

// Group membership shared by every target.

pub(crate) fn node_select_members(proxies: &[String]) -> Vec<String> {
    std::iter::once(AUTO_SELECT.to_string())
        .chain(proxies.iter().cloned())
        .collect()
}

pub(crate) fn category_members(category: &RuleCategory, proxies: &[String]) -> Vec<String> {
    category
        .policy
        .leading_members()
        .iter()
        .map(|member| member.to_string())
        .chain(std::iter::once(NODE_SELECT.to_string()))
        .chain(proxies.iter().cloned())
        .collect()
}

pub(crate) fn custom_members(proxies: &[String]) -> Vec<String> {
    [NODE_SELECT, DIRECT]
        .into_iter()
        .map(str::to_string)
        .chain(proxies.iter().cloned())
        .collect()
}

pub(crate) fn fallback_members(proxies: &[String]) -> Vec<String> {
    std::iter::once(NODE_SELECT.to_string())
        .chain(proxies.iter().cloned())
        .collect()
}

fn proxy_names<T: ConfigTarget>(target: &T) -> Result<Vec<String>, BuildError> {
    target
        .proxies()?
        .iter()
        .map(|proxy| target.proxy_name(proxy).map(str::to_string))
        .collect()
}

/// Full pipeline: parse the input, filter, then synthesize for `target`.
pub async fn build_document(
    target: Target,
    input: &str,
    params: &BuildParams,
    fetcher: &dyn Fetcher,
) -> Result<Document, BuildError> {
    if input.trim().is_empty() {
        return Err(BuildError::MissingInput("config"));
    }

    let records = collect_records(input, &params.user_agent, fetcher).await;
    let records = params.exclusion_filter().apply(records);
    let plan = params.rule_plan();
    let base = params.base_config.as_ref();

    match target {
        Target::SingBox => synthesize(SingBoxTarget::new(base)?, &records, &plan),
        Target::Clash => synthesize(ClashTarget::new(base)?, &records, &plan),
        Target::Surge => synthesize(
            SurgeTarget::new(base, params.managed_url.clone())?,
            &records,
            &plan,
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    SingBox,
    Clash,
    Surge,
}

impl Target {
    pub const ALL: [Target; 3] = [Target::SingBox, Target::Clash, Target::Surge];

    pub fn as_str(self) -> &'static str {
        match self {
            Target::SingBox => "singbox",
            Target::Clash => "clash",
            Target::Surge => "surge",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "singbox" | "sing-box" => Ok(Target::SingBox),
            "clash" | "mihomo" => Ok(Target::Clash),
            "surge" => Ok(Target::Surge),
            other => Err(format!("unknown target {other}")),
        }
    }
}

/// A finished config in its target's native form.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    SingBox(JsonValue),
    Clash(ClashConfig),
    Surge(String),
}

impl Document {
    pub fn to_text(&self) -> Result<String, BuildError> {
        match self {
            Document::SingBox(value) => Ok(serde_json::to_string_pretty(value)?),
            Document::Clash(config) => Ok(config.to_yaml_string()?),
            Document::Surge(text) => Ok(text.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{Protocol, Trojan, Tls};
    use crate::rules::RuleSelection;

    /// Converts proxies but never learned to build groups.
    struct HalfTarget {
        proxies: Vec<String>,
    }

    impl ConfigTarget for HalfTarget {
        type Proxy = String;

        fn target_name(&self) -> &'static str {
            "half"
        }

        fn proxies(&self) -> Result<&[String], BuildError> {
            Ok(&self.proxies)
        }

        fn proxy_name<'a>(&self, proxy: &'a String) -> Result<&'a str, BuildError> {
            Ok(proxy.as_str())
        }

        fn convert_proxy(&self, record: &ProxyRecord) -> Result<Option<String>, BuildError> {
            Ok(Some(record.tag.clone()))
        }

        fn reserve_group_names(&mut self, _names: &[String]) -> Result<(), BuildError> {
            Ok(())
        }

        fn add_proxy_to_config(&mut self, proxy: String) -> Result<(), BuildError> {
            self.proxies.push(proxy);
            Ok(())
        }

        fn add_auto_select_group(&mut self, _proxies: &[String]) -> Result<(), BuildError> {
            Ok(())
        }
    }

    fn trojan(tag: &str) -> ProxyRecord {
        ProxyRecord {
            tag: tag.into(),
            server: "t.example.com".into(),
            port: 443,
            protocol: Protocol::Trojan(Trojan {
                password: "pw".into(),
                tls: Tls::default(),
                transport: None,
            }),
        }
    }

    #[test]
    fn missing_step_fails_the_build() {
        let plan = RulePlan::new(&RuleSelection::Default, &[]);
        let err = synthesize(HalfTarget { proxies: vec![] }, &[trojan("a")], &plan).unwrap_err();
        match err {
            BuildError::Unsupported { target, operation } => {
                assert_eq!(target, "half");
                assert_eq!(operation, "add_node_select_group");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn target_names_parse() {
        assert_eq!("sing-box".parse::<Target>(), Ok(Target::SingBox));
        assert_eq!("Clash".parse::<Target>(), Ok(Target::Clash));
        assert_eq!("surge".parse::<Target>(), Ok(Target::Surge));
        assert!("quantumult".parse::<Target>().is_err());
        for target in Target::ALL {
            assert_eq!(target.as_str().parse::<Target>(), Ok(target));
        }
    }

    #[test]
    fn documents_render_as_text() {
        let doc = Document::Surge("[General]\n".into());
        assert_eq!(doc.to_text().unwrap(), "[General]\n");

        let json = Document::SingBox(serde_json::json!({ "a": 1 }));
        assert_eq!(json.to_text().unwrap(), "{\n  \"a\": 1\n}");
    }
}
