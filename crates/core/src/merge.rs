use std::collections::HashSet;

use serde_yaml::Value;

/// Merge generated proxy groups into the base document's groups.
///
/// A group whose name already exists extends that group's member list with
/// the members it does not have yet; anything else is appended.
pub fn merge_proxy_groups(mut base: Vec<Value>, incoming: Vec<Value>) -> Vec<Value> {
    for group in incoming {
        let existing = entry_name(&group).and_then(|name| {
            base.iter()
                .position(|candidate| entry_name(candidate) == Some(name))
        });
        match existing {
            Some(index) => merge_proxy_group(&mut base[index], &group),
            None => base.push(group),
        }
    }
    base
}

fn merge_proxy_group(base: &mut Value, incoming: &Value) {
    let Some(base_map) = base.as_mapping_mut() else {
        return;
    };
    let additions = members(incoming);
    if additions.is_empty() {
        return;
    }

    let slot = base_map
        .entry(Value::from("proxies"))
        .or_insert_with(|| Value::Sequence(Vec::new()));
    if !slot.is_sequence() {
        *slot = Value::Sequence(Vec::new());
    }
    let Value::Sequence(list) = slot else {
        return;
    };

    let mut present: HashSet<String> = list
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    for member in additions {
        if present.insert(member.to_string()) {
            list.push(Value::from(member));
        }
    }
}

fn members(group: &Value) -> Vec<&str> {
    group
        .get("proxies")
        .and_then(Value::as_sequence)
        .map(|list| list.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// `name` field of a proxy or group mapping.
pub fn entry_name(value: &Value) -> Option<&str> {
    match value {
        Value::Mapping(map) => map.get("name").and_then(|value| value.as_str()),
        _ => None,
    }
}

/// First of `name`, `name 2`, `name 3`, ... that is not already taken.
pub fn unique_name<S: AsRef<str>>(taken: &[S], name: &str) -> String {
    let is_taken = |candidate: &str| taken.iter().any(|t| t.as_ref() == candidate);
    if !is_taken(name) {
        return name.to_string();
    }

    (2..)
        .map(|n| format!("{name} {n}"))
        .find(|candidate| !is_taken(candidate))
        .unwrap_or_else(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector_group(name: &str, proxies: &[&str]) -> Value {
        let proxies_yaml = proxies
            .iter()
            .map(|p| format!("- {}", p))
            .collect::<Vec<_>>()
            .join("\n");
        serde_yaml::from_str(&format!(
            "name: \"{name}\"\ntype: select\nproxies:\n{proxies}\n",
            proxies = proxies_yaml
        ))
        .unwrap()
    }

    #[test]
    fn same_name_groups_union_members() {
        let base = vec![selector_group("Streaming", &["Home", "A"])];
        let incoming = vec![
            selector_group("Streaming", &["A", "B"]),
            selector_group("Other", &["C"]),
        ];

        let merged = merge_proxy_groups(base, incoming);
        assert_eq!(merged.len(), 2);
        assert_eq!(members(&merged[0]), vec!["Home", "A", "B"]);
        assert_eq!(entry_name(&merged[1]), Some("Other"));
    }

    #[test]
    fn nameless_groups_are_appended() {
        let merged = merge_proxy_groups(vec![], vec![Value::from("odd"), Value::from("odd")]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn unique_name_appends_counter() {
        let taken = ["HK", "HK 2", "JP"];
        assert_eq!(unique_name(&taken, "US"), "US");
        assert_eq!(unique_name(&taken, "JP"), "JP 2");
        assert_eq!(unique_name(&taken, "HK"), "HK 3");
    }
}
