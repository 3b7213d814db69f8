use serde_json::Value as JsonValue;

use crate::error::BuildError;
use crate::filter::ExclusionFilter;
use crate::proxy::ProxyKind;
use crate::rules::{preset, CustomRule, RulePlan, RuleSelection, PRESETS};
use crate::subscription::DEFAULT_USER_AGENT;

/// Everything a build needs besides the input text.
#[derive(Debug, Clone)]
pub struct BuildParams {
    pub selection: RuleSelection,
    pub custom_rules: Vec<CustomRule>,
    pub excluded_protocols: Vec<ProxyKind>,
    /// Comma-separated, case-insensitive.
    pub excluded_ciphers: String,
    /// Comma-separated regular expressions, case-insensitive.
    pub name_filter: String,
    /// Mapping merged over the target's default document.
    pub base_config: Option<JsonValue>,
    pub user_agent: String,
    /// Subscription URL announced in the Surge managed-config header.
    pub managed_url: Option<String>,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            selection: RuleSelection::Default,
            custom_rules: Vec::new(),
            excluded_protocols: Vec::new(),
            excluded_ciphers: String::new(),
            name_filter: String::new(),
            base_config: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            managed_url: None,
        }
    }
}

impl BuildParams {
    pub fn exclusion_filter(&self) -> ExclusionFilter {
        ExclusionFilter::new(
            &self.excluded_protocols,
            &self.excluded_ciphers,
            &self.name_filter,
        )
    }

    pub fn rule_plan(&self) -> RulePlan {
        RulePlan::new(&self.selection, &self.custom_rules)
    }
}

/// Accepts a preset name, a JSON array of category names, or a JSON object
/// mapping category names to inclusion flags.
pub fn parse_rule_selection(raw: Option<&str>) -> Result<RuleSelection, BuildError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(RuleSelection::Default);
    };

    if preset(raw).is_some() {
        return Ok(RuleSelection::Preset(raw.to_string()));
    }

    let value: JsonValue = serde_json::from_str(raw).map_err(|err| {
        BuildError::invalid(
            "selectedRules",
            format!("expected one of {} or JSON: {err}", PRESETS.join(", ")),
        )
    })?;

    let names = match value {
        JsonValue::Array(items) => items
            .into_iter()
            .map(|item| match item {
                JsonValue::String(name) => Ok(name),
                other => Err(BuildError::invalid(
                    "selectedRules",
                    format!("category names must be strings, got {other}"),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?,
        JsonValue::Object(map) => map
            .into_iter()
            .filter(|(_, flag)| is_included(flag))
            .map(|(name, _)| name)
            .collect(),
        other => {
            return Err(BuildError::invalid(
                "selectedRules",
                format!("expected an array or object, got {other}"),
            ))
        }
    };

    Ok(RuleSelection::Categories(names))
}

fn is_included(flag: &JsonValue) -> bool {
    match flag {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        JsonValue::String(s) => !s.is_empty() && s != "false" && s != "0",
        _ => false,
    }
}

/// JSON array of custom rules; absent or empty means none.
pub fn parse_custom_rules(raw: Option<&str>) -> Result<Vec<CustomRule>, BuildError> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(Vec::new()),
        Some(raw) => {
            serde_json::from_str(raw).map_err(|err| BuildError::invalid("customRules", err))
        }
    }
}

/// JSON array of protocol names, or a plain comma-separated list.
pub fn parse_excluded_protocols(raw: Option<&str>) -> Result<Vec<ProxyKind>, BuildError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(Vec::new());
    };

    let names: Vec<String> = if raw.starts_with('[') {
        serde_json::from_str(raw).map_err(|err| BuildError::invalid("excludedProtocols", err))?
    } else {
        raw.split(',').map(|name| name.trim().to_string()).collect()
    };

    names
        .iter()
        .filter(|name| !name.trim().is_empty())
        .map(|name| {
            name.parse::<ProxyKind>()
                .map_err(|err| BuildError::invalid("excludedProtocols", err))
        })
        .collect()
}

/// Parse a user base document (JSON, or YAML for Clash-style input) into a
/// JSON mapping.
pub fn parse_base_config(raw: &str) -> Result<JsonValue, BuildError> {
    let value: JsonValue = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => {
            let yaml: serde_yaml::Value = serde_yaml::from_str(raw)?;
            serde_json::to_value(yaml)?
        }
    };

    if !value.is_object() {
        return Err(BuildError::invalid(
            "baseConfig",
            "base document must be a mapping",
        ));
    }
    Ok(value)
}
