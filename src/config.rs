use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::pipeline::ResolverKind;

/// Configuration file name, looked up at the analyzed root.
pub const CONFIG_FILE: &str = "arch-dsm.toml";

/// Configuration loaded from `arch-dsm.toml` at the project root.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DsmConfig {
    /// Path patterns treated as outside the project (beyond .gitignore and site-packages).
    pub exclude: Option<Vec<String>>,
    /// Only files under this root-relative prefix count as internal.
    pub focus: Option<String>,
    /// Resolver that produced the raw extraction. CLI `--resolver` wins.
    pub resolver: Option<ResolverKind>,
    /// Run the resolver-specific false-positive filter. Defaults to on.
    pub filter_false_positives: Option<bool>,
    /// Keep intra-file pairs in the file-level DSM.
    pub include_self_edges: Option<bool>,
}

impl DsmConfig {
    /// Load configuration from `arch-dsm.toml` in the given root directory.
    ///
    /// Returns a default (empty) configuration if the file does not exist or cannot be parsed.
    pub fn load(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);

        if !config_path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(config) => config,
                Err(err) => {
                    warn!("failed to parse {CONFIG_FILE}: {err}. Using defaults.");
                    Self::default()
                }
            },
            Err(err) => {
                warn!("failed to read {CONFIG_FILE}: {err}. Using defaults.");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = DsmConfig::load(dir.path());
        assert!(config.exclude.is_none());
        assert!(config.resolver.is_none());
    }

    #[test]
    fn test_load_config_values() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
exclude = ["tests/*"]
focus = "tts/"
resolver = "name-binding-only"
filter_false_positives = false
"#,
        )
        .unwrap();
        let config = DsmConfig::load(dir.path());
        assert_eq!(config.exclude, Some(vec!["tests/*".to_string()]));
        assert_eq!(config.focus.as_deref(), Some("tts/"));
        assert_eq!(config.resolver, Some(ResolverKind::NameBindingOnly));
        assert_eq!(config.filter_false_positives, Some(false));
    }

    #[test]
    fn test_invalid_config_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "exclude = 7").unwrap();
        let config = DsmConfig::load(dir.path());
        assert!(config.exclude.is_none());
    }
}
