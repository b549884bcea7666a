//! Prefix-based routing table and resolver (§3, §4.3).

use serde::{Deserialize, Serialize};

/// A single entry in an agent's routing table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    pub prefix: String,
    pub target: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Reserved for an external health-check collaborator; unused by the
    /// core (§1: out of scope). Present only so the persisted agent
    /// config's `healthCheck`/`protected` fields round-trip untouched.
    #[serde(rename = "healthCheck", default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected: Option<bool>,
}

fn default_enabled() -> bool {
    true
}

/// Resolves `path` against `mappings` and `default_target` per §4.3.
///
/// Returns `(base_url, rewritten_path)`. Only `enabled` mappings are
/// considered; among those, the longest matching prefix wins.
pub fn resolve(path: &str, mappings: &[Mapping], default_target: &str) -> (String, String) {
    let stripped = path.strip_prefix('/').unwrap_or(path);

    let best = mappings
        .iter()
        .filter(|m| m.enabled && !m.prefix.is_empty())
        .filter(|m| segment_matches(stripped, &m.prefix))
        .max_by_key(|m| m.prefix.len());

    match best {
        Some(m) => {
            let rest = stripped
                .strip_prefix(m.prefix.as_str())
                .unwrap_or(stripped)
                .trim_start_matches('/');
            let rewritten = format!("/{rest}");
            (m.target.clone(), rewritten)
        }
        None => (default_target.to_string(), path.to_string()),
    }
}

fn segment_matches(path: &str, prefix: &str) -> bool {
    path == prefix || path.starts_with(&format!("{prefix}/")) || path.starts_with(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(prefix: &str, target: &str) -> Mapping {
        Mapping {
            prefix: prefix.to_string(),
            target: target.to_string(),
            description: String::new(),
            enabled: true,
            health_check: None,
            protected: None,
        }
    }

    #[test]
    fn falls_back_to_default_when_no_mappings() {
        let (base, path) = resolve("/api/test", &[], "http://default");
        assert_eq!(base, "http://default");
        assert_eq!(path, "/api/test");
    }

    #[test]
    fn prefix_with_trailing_segments_is_consumed() {
        let mappings = vec![mapping("api", "http://five-thousand")];
        let (base, path) = resolve("/api/v1/x", &mappings, "http://default");
        assert_eq!(base, "http://five-thousand");
        assert_eq!(path, "/v1/x");
    }

    #[test]
    fn bare_prefix_rewrites_to_root() {
        let mappings = vec![mapping("api", "http://five-thousand")];
        let (_, path) = resolve("/api", &mappings, "http://default");
        assert_eq!(path, "/");
    }

    #[test]
    fn longest_prefix_wins_on_overlap() {
        let mappings = vec![
            mapping("api", "http://short"),
            mapping("api/v1", "http://long"),
        ];
        let (base, path) = resolve("/api/v1/items", &mappings, "http://default");
        assert_eq!(base, "http://long");
        assert_eq!(path, "/items");
    }

    #[test]
    fn disabled_mappings_are_ignored() {
        let mut m = mapping("api", "http://disabled");
        m.enabled = false;
        let (base, path) = resolve("/api/x", &[m], "http://default");
        assert_eq!(base, "http://default");
        assert_eq!(path, "/api/x");
    }

    #[test]
    fn no_match_leaves_path_unchanged() {
        let mappings = vec![mapping("admin", "http://admin-target")];
        let (base, path) = resolve("/other/thing", &mappings, "http://default");
        assert_eq!(base, "http://default");
        assert_eq!(path, "/other/thing");
    }
}
