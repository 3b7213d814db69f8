use serde::{Deserialize, Serialize};

/// Selector that aggregates every proxy.
pub const NODE_SELECT: &str = "🚀 Node Select";
/// Latency-tested group over every proxy.
pub const AUTO_SELECT: &str = "⚡ Auto Select";
/// Catch-all group.
pub const FALL_BACK: &str = "🐟 Fall Back";
pub const DIRECT: &str = "DIRECT";
pub const REJECT: &str = "REJECT";

/// What a category's group offers before the node selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Proxy,
    Direct,
    Reject,
}

impl Policy {
    /// Built-in outbounds listed ahead of the node selector in a group.
    pub fn leading_members(self) -> &'static [&'static str] {
        match self {
            Policy::Proxy => &[],
            Policy::Direct => &[DIRECT],
            Policy::Reject => &[REJECT, DIRECT],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    GeoSite(String),
    GeoIp(String),
    DomainSuffix(String),
    DomainKeyword(String),
    IpCidr(String),
    ProcessName(String),
    Final,
}

impl Predicate {
    pub fn is_final(&self) -> bool {
        matches!(self, Predicate::Final)
    }
}

/// A routing bucket bound to the group named `outbound`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleCategory {
    pub name: String,
    pub outbound: String,
    pub predicates: Vec<Predicate>,
    pub policy: Policy,
}

impl RuleCategory {
    pub fn is_final(&self) -> bool {
        self.predicates.iter().any(Predicate::is_final)
    }
}

struct CatalogEntry {
    name: &'static str,
    label: &'static str,
    site_rules: &'static [&'static str],
    ip_rules: &'static [&'static str],
    policy: Policy,
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        name: "Ad Block",
        label: "🛑 Ad Block",
        site_rules: &["category-ads-all"],
        ip_rules: &[],
        policy: Policy::Reject,
    },
    CatalogEntry {
        name: "AI Services",
        label: "💬 AI Services",
        site_rules: &["category-ai-!cn"],
        ip_rules: &[],
        policy: Policy::Proxy,
    },
    CatalogEntry {
        name: "Bilibili",
        label: "📺 Bilibili",
        site_rules: &["bilibili"],
        ip_rules: &[],
        policy: Policy::Direct,
    },
    CatalogEntry {
        name: "Youtube",
        label: "📹 Youtube",
        site_rules: &["youtube"],
        ip_rules: &[],
        policy: Policy::Proxy,
    },
    CatalogEntry {
        name: "Google",
        label: "🔍 Google",
        site_rules: &["google"],
        ip_rules: &["google"],
        policy: Policy::Proxy,
    },
    CatalogEntry {
        name: "Private",
        label: "🏠 Private",
        site_rules: &[],
        ip_rules: &["private"],
        policy: Policy::Direct,
    },
    CatalogEntry {
        name: "Location:CN",
        label: "🔒 Location:CN",
        site_rules: &["geolocation-cn"],
        ip_rules: &["cn"],
        policy: Policy::Direct,
    },
    CatalogEntry {
        name: "Telegram",
        label: "📲 Telegram",
        site_rules: &[],
        ip_rules: &["telegram"],
        policy: Policy::Proxy,
    },
    CatalogEntry {
        name: "Github",
        label: "🐱 Github",
        site_rules: &["github", "gitlab"],
        ip_rules: &[],
        policy: Policy::Proxy,
    },
    CatalogEntry {
        name: "Microsoft",
        label: "Ⓜ️ Microsoft",
        site_rules: &["microsoft"],
        ip_rules: &[],
        policy: Policy::Proxy,
    },
    CatalogEntry {
        name: "Apple",
        label: "🍏 Apple",
        site_rules: &["apple"],
        ip_rules: &[],
        policy: Policy::Proxy,
    },
    CatalogEntry {
        name: "Social Media",
        label: "🌐 Social Media",
        site_rules: &["facebook", "instagram", "twitter", "tiktok", "linkedin"],
        ip_rules: &[],
        policy: Policy::Proxy,
    },
    CatalogEntry {
        name: "Streaming",
        label: "🎬 Streaming",
        site_rules: &["netflix", "hulu", "disney", "hbo", "amazon", "bahamut"],
        ip_rules: &[],
        policy: Policy::Proxy,
    },
    CatalogEntry {
        name: "Gaming",
        label: "🎮 Gaming",
        site_rules: &["steam", "epicgames", "ea", "ubisoft", "blizzard"],
        ip_rules: &[],
        policy: Policy::Proxy,
    },
    CatalogEntry {
        name: "Education",
        label: "📚 Education",
        site_rules: &["coursera", "edx", "udemy", "khanacademy", "category-scholar-!cn"],
        ip_rules: &[],
        policy: Policy::Proxy,
    },
    CatalogEntry {
        name: "Financial",
        label: "💰 Financial",
        site_rules: &["paypal", "visa", "mastercard", "stripe", "wise"],
        ip_rules: &[],
        policy: Policy::Proxy,
    },
    CatalogEntry {
        name: "Cloud Services",
        label: "☁️ Cloud Services",
        site_rules: &["aws", "azure", "digitalocean", "heroku", "dropbox"],
        ip_rules: &[],
        policy: Policy::Proxy,
    },
    CatalogEntry {
        name: "Non-China",
        label: "🌍 Non-China",
        site_rules: &["geolocation-!cn"],
        ip_rules: &[],
        policy: Policy::Proxy,
    },
];

const MINIMAL: &[&str] = &["Location:CN", "Private", "Non-China"];
const BALANCED: &[&str] = &[
    "Location:CN",
    "Private",
    "Non-China",
    "Github",
    "Google",
    "Youtube",
    "AI Services",
    "Telegram",
];

/// Names of the predefined rule sets.
pub const PRESETS: &[&str] = &["minimal", "balanced", "comprehensive"];

/// Category names of a predefined rule set.
pub fn preset(name: &str) -> Option<Vec<&'static str>> {
    match name {
        "minimal" => Some(MINIMAL.to_vec()),
        "balanced" => Some(BALANCED.to_vec()),
        "comprehensive" => Some(CATALOG.iter().map(|entry| entry.name).collect()),
        _ => None,
    }
}

/// Names of every category in the catalog, in catalog order.
pub fn catalog_names() -> impl Iterator<Item = &'static str> {
    CATALOG.iter().map(|entry| entry.name)
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RuleSelection {
    /// Falls back to the minimal preset.
    #[default]
    Default,
    Preset(String),
    Categories(Vec<String>),
}

/// Expand a selection into its categories, in catalog order.
pub fn resolve(selection: &RuleSelection) -> Vec<RuleCategory> {
    let names: Vec<String> = match selection {
        RuleSelection::Preset(name) => match preset(name) {
            Some(names) => names.into_iter().map(str::to_string).collect(),
            None => {
                tracing::warn!(preset = %name, "unknown rule preset, using minimal");
                minimal_names()
            }
        },
        RuleSelection::Categories(names) if !names.is_empty() => names.clone(),
        _ => minimal_names(),
    };

    for name in &names {
        if !CATALOG.iter().any(|entry| entry.name == name) {
            tracing::warn!(category = %name, "ignoring unknown rule category");
        }
    }

    CATALOG
        .iter()
        .filter(|entry| names.iter().any(|name| name == entry.name))
        .map(CatalogEntry::to_category)
        .collect()
}

fn minimal_names() -> Vec<String> {
    MINIMAL.iter().map(|name| name.to_string()).collect()
}

impl CatalogEntry {
    fn to_category(&self) -> RuleCategory {
        let predicates = self
            .site_rules
            .iter()
            .map(|site| Predicate::GeoSite(site.to_string()))
            .chain(self.ip_rules.iter().map(|ip| Predicate::GeoIp(ip.to_string())))
            .collect();

        RuleCategory {
            name: self.name.to_string(),
            outbound: self.label.to_string(),
            predicates,
            policy: self.policy,
        }
    }
}

/// User rule routed to its own group, ahead of every predefined category.
///
/// Every list field is comma-separated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomRule {
    #[serde(alias = "outbound")]
    pub name: String,
    pub site: String,
    pub ip: String,
    pub domain_suffix: String,
    pub domain_keyword: String,
    pub ip_cidr: String,
    pub process_name: String,
    #[serde(rename = "final")]
    pub is_final: bool,
}

impl CustomRule {
    pub fn to_category(&self) -> RuleCategory {
        let mut predicates = Vec::new();
        predicates.extend(split(&self.domain_suffix).map(Predicate::DomainSuffix));
        predicates.extend(split(&self.domain_keyword).map(Predicate::DomainKeyword));
        predicates.extend(split(&self.site).map(Predicate::GeoSite));
        predicates.extend(split(&self.process_name).map(Predicate::ProcessName));
        predicates.extend(split(&self.ip_cidr).map(Predicate::IpCidr));
        predicates.extend(split(&self.ip).map(Predicate::GeoIp));
        if self.is_final {
            predicates.push(Predicate::Final);
        }

        RuleCategory {
            name: self.name.clone(),
            outbound: self.name.clone(),
            predicates,
            policy: Policy::Proxy,
        }
    }
}

fn split(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
}

/// Ordered routing for one build: custom rules, then predefined categories,
/// then exactly one catch-all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulePlan {
    pub custom: Vec<RuleCategory>,
    pub categories: Vec<RuleCategory>,
}

/// One match predicate bound to a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleBinding<'a> {
    pub predicate: &'a Predicate,
    pub outbound: &'a str,
}

impl RulePlan {
    pub fn new(selection: &RuleSelection, custom_rules: &[CustomRule]) -> Self {
        let custom = custom_rules
            .iter()
            .filter(|rule| {
                let keep = !rule.name.trim().is_empty();
                if !keep {
                    tracing::warn!("ignoring custom rule without a name");
                }
                keep
            })
            .map(CustomRule::to_category)
            .collect();

        let mut plan = Self {
            custom,
            categories: resolve(selection),
        };
        plan.keep_single_final();
        plan
    }

    /// Only the highest-priority catch-all survives.
    fn keep_single_final(&mut self) {
        let mut seen = false;
        for category in self.custom.iter_mut().chain(self.categories.iter_mut()) {
            if category.is_final() {
                if seen {
                    tracing::warn!(category = %category.name, "dropping extra catch-all");
                    category.predicates.retain(|p| !p.is_final());
                }
                seen = true;
            }
        }
    }

    /// Group the catch-all routes to. Without an explicit one this is the
    /// fallback group, which defaults to the node selector.
    pub fn final_outbound(&self) -> &str {
        self.custom
            .iter()
            .chain(self.categories.iter())
            .find(|category| category.is_final())
            .map(|category| category.outbound.as_str())
            .unwrap_or(FALL_BACK)
    }

    /// Every group the synthesized document will define, plus the built-in
    /// policies. Proxy names must stay clear of these.
    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let fixed = [AUTO_SELECT, NODE_SELECT, FALL_BACK, DIRECT, REJECT].map(str::to_string);
        let planned = self
            .custom
            .iter()
            .chain(self.categories.iter())
            .map(|category| category.outbound.clone());
        for name in fixed.into_iter().chain(planned) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Every non-final predicate in priority order.
    pub fn bindings(&self) -> impl Iterator<Item = RuleBinding<'_>> {
        self.custom
            .iter()
            .chain(self.categories.iter())
            .flat_map(|category| {
                category
                    .predicates
                    .iter()
                    .filter(|predicate| !predicate.is_final())
                    .map(move |predicate| RuleBinding {
                        predicate,
                        outbound: category.outbound.as_str(),
                    })
            })
    }

    pub fn geosites(&self) -> Vec<&str> {
        self.unique(|predicate| match predicate {
            Predicate::GeoSite(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn geoips(&self) -> Vec<&str> {
        self.unique(|predicate| match predicate {
            Predicate::GeoIp(name) => Some(name.as_str()),
            _ => None,
        })
    }

    fn unique<'a>(&'a self, pick: impl Fn(&'a Predicate) -> Option<&'a str>) -> Vec<&'a str> {
        let mut names: Vec<&str> = Vec::new();
        for binding in self.bindings() {
            if let Some(name) = pick(binding.predicate) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }
}
