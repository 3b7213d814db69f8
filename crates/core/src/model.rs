use indexmap::IndexMap;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::merge::entry_name;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ClashConfig {
    // Flattened keys serialize ahead of the generated sections.
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(
        rename = "socks-port",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub socks_port: Option<u16>,

    #[serde(
        rename = "mixed-port",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub mixed_port: Option<u16>,

    #[serde(default)]
    pub proxies: Vec<Value>,

    #[serde(rename = "proxy-groups", default)]
    pub proxy_groups: Vec<Value>,

    #[serde(default)]
    pub rules: Vec<String>,
}

impl ClashConfig {
    pub fn from_yaml_str(input: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(input)
    }

    pub fn to_yaml_string(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn proxy_names(&self) -> Vec<String> {
        self.proxies
            .iter()
            .filter_map(entry_name)
            .map(str::to_string)
            .collect()
    }

    pub fn proxy_group_names(&self) -> Vec<String> {
        self.proxy_groups
            .iter()
            .filter_map(entry_name)
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let yaml = r#"
mixed-port: 7890
mode: rule
dns:
  enable: true
proxies:
  - { name: A, type: ss, server: a.example.com, port: 443 }
proxy-groups:
  - { name: G, type: select, proxies: [A] }
rules:
  - MATCH,G
"#;
        let config = ClashConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.mixed_port, Some(7890));
        assert_eq!(config.extra.get("mode"), Some(&Value::from("rule")));
        assert_eq!(config.proxy_names(), vec!["A".to_string()]);
        assert_eq!(config.proxy_group_names(), vec!["G".to_string()]);

        let again = ClashConfig::from_yaml_str(&config.to_yaml_string().unwrap()).unwrap();
        assert_eq!(again, config);
    }
}
