//! Redaction rule configuration
//!
//! Rules come from an optional JSON file plus environment lists:
//!
//! ```json
//! {
//!   "patterns": ["internal-[0-9]+"],
//!   "allowlist": ["test_.*"],
//!   "use_defaults": true,
//!   "pattern_groups": {"cloud": ["gcp-[a-z0-9]{32}"]},
//!   "allowlist_groups": {"fixtures": ["dummy_.*"]}
//! }
//! ```

use crate::policy::PolicyError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

pub const ENV_REDACT_CONFIG: &str = "TRACEHOOK_REDACT_CONFIG";
pub const ENV_REDACT_PATTERNS: &str = "TRACEHOOK_REDACT_PATTERNS";
pub const ENV_REDACT_ALLOWLIST: &str = "TRACEHOOK_REDACT_ALLOWLIST";
pub const ENV_REDACT_DISABLE_DEFAULTS: &str = "TRACEHOOK_REDACT_DISABLE_DEFAULTS";

/// Uncompiled redaction rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionConfig {
    #[serde(default)]
    pub patterns: Vec<String>,

    #[serde(default)]
    pub allowlist: Vec<String>,

    /// Include the built-in pattern set
    #[serde(default = "default_use_defaults")]
    pub use_defaults: bool,

    #[serde(default)]
    pub pattern_groups: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub allowlist_groups: BTreeMap<String, Vec<String>>,
}

fn default_use_defaults() -> bool {
    true
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            allowlist: Vec::new(),
            use_defaults: default_use_defaults(),
            pattern_groups: BTreeMap::new(),
            allowlist_groups: BTreeMap::new(),
        }
    }
}

impl RedactionConfig {
    /// Custom patterns with groups flattened in
    pub fn all_patterns(&self) -> Vec<String> {
        flatten(&self.patterns, &self.pattern_groups)
    }

    /// Allowlist patterns with groups flattened in
    pub fn all_allowlist(&self) -> Vec<String> {
        flatten(&self.allowlist, &self.allowlist_groups)
    }

    /// Build from loosely typed JSON.
    ///
    /// Non-list `patterns`/`allowlist` values and non-string entries are
    /// ignored. `use_defaults` accepts a bool or `"true"`/`"false"`.
    pub fn from_json_value(value: &Value) -> Self {
        let mut config = Self::default();
        let Some(obj) = value.as_object() else {
            return config;
        };

        config.patterns = string_list(obj.get("patterns"));
        config.allowlist = string_list(obj.get("allowlist"));

        match obj.get("use_defaults") {
            Some(Value::Bool(b)) => config.use_defaults = *b,
            Some(Value::String(s)) => {
                if let Some(b) = parse_flag(s) {
                    config.use_defaults = b;
                }
            }
            _ => {}
        }

        config.pattern_groups = string_groups(obj.get("pattern_groups"));
        config.allowlist_groups = string_groups(obj.get("allowlist_groups"));
        config
    }

    /// Read a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PolicyError::ConfigNotFound(path.to_path_buf())
            } else {
                PolicyError::MalformedConfig {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            }
        })?;

        let value: Value =
            serde_json::from_str(&content).map_err(|e| PolicyError::MalformedConfig {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if !value.is_object() {
            return Err(PolicyError::MalformedConfig {
                path: path.to_path_buf(),
                reason: "expected a JSON object".to_string(),
            });
        }

        Ok(Self::from_json_value(&value))
    }

    /// Load from the process environment
    pub fn from_env() -> (Self, Vec<PolicyError>) {
        Self::load(|key| std::env::var(key).ok())
    }

    /// Load rules through a variable lookup.
    ///
    /// File values come first, env lists are appended, and the disable flag
    /// forces `use_defaults` off. File problems fall back to defaults and are
    /// returned as warnings.
    pub fn load<F>(lookup: F) -> (Self, Vec<PolicyError>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        let mut config = match lookup(ENV_REDACT_CONFIG).filter(|p| !p.trim().is_empty()) {
            Some(path) => match Self::from_file(path.trim()) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Ignoring redaction config: {}", e);
                    warnings.push(e);
                    Self::default()
                }
            },
            None => Self::default(),
        };

        if let Some(list) = lookup(ENV_REDACT_PATTERNS) {
            config.patterns.extend(split_list(&list));
        }
        if let Some(list) = lookup(ENV_REDACT_ALLOWLIST) {
            config.allowlist.extend(split_list(&list));
        }
        if lookup(ENV_REDACT_DISABLE_DEFAULTS)
            .as_deref()
            .and_then(parse_flag)
            .unwrap_or(false)
        {
            config.use_defaults = false;
        }

        (config, warnings)
    }
}

fn flatten(base: &[String], groups: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    base.iter()
        .chain(groups.values().flatten())
        .filter(|p| !p.trim().is_empty())
        .cloned()
        .collect()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn string_groups(value: Option<&Value>) -> BTreeMap<String, Vec<String>> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(name, list)| (name.clone(), string_list(Some(list))))
            .filter(|(_, list)| !list.is_empty())
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parse a boolean-ish flag value
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
