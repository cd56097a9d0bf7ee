use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::types::Config;

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        debug!(path = %path.display(), "loading configuration");

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(yaml).context("failed to parse YAML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.sessions.is_empty() {
            anyhow::bail!("at least one session must be enrolled");
        }

        let mut session_names = HashSet::new();
        for session in &self.sessions {
            if session.name.is_empty() {
                anyhow::bail!("session name must not be empty");
            }
            if !session_names.insert(&session.name) {
                anyhow::bail!("duplicate session name: {}", session.name);
            }
        }

        if !self.sessions.iter().any(|s| s.enabled) {
            anyhow::bail!("at least one session must be enabled");
        }

        if self.forward.batch_size == 0 || self.forward.batch_size > 10 {
            anyhow::bail!(
                "forward batch_size must be in 1..=10, got {}",
                self.forward.batch_size
            );
        }

        if self.rate_limit.global_per_minute == 0 || self.rate_limit.session_per_minute == 0 {
            anyhow::bail!("rate limits must be nonzero");
        }

        info!("configuration validated successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config() {
        let yaml = r#"
sessions:
  - name: alpha
    auth_file: sessions/alpha.session
  - name: bravo
    auth_file: sessions/bravo.session
    enabled: false
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.sessions.len(), 2);
        assert!(config.sessions[0].enabled);
        assert!(!config.sessions[1].enabled);
        assert_eq!(config.rate_limit.global_per_minute, 30);
        assert!(config.forward.preserve_structure);
    }

    #[test]
    fn duration_fields_parse_humantime() {
        let yaml = r#"
sessions:
  - name: alpha
    auth_file: a.session
rate_limit:
  flood_wait_threshold: 15s
forward:
  batch_pacing: 500ms
timeouts:
  upload: 2m
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.rate_limit.flood_wait_threshold.as_secs(), 15);
        assert_eq!(config.forward.batch_pacing.as_millis(), 500);
        assert_eq!(config.timeouts.upload.as_secs(), 120);
    }

    #[test]
    fn duplicate_session_rejected() {
        let yaml = r#"
sessions:
  - name: alpha
    auth_file: a.session
  - name: alpha
    auth_file: b.session
"#;

        let result = Config::from_yaml(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("duplicate session name"));
    }

    #[test]
    fn no_sessions_rejected() {
        let result = Config::from_yaml("sessions: []");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("at least one session"));
    }

    #[test]
    fn all_disabled_rejected() {
        let yaml = r#"
sessions:
  - name: alpha
    auth_file: a.session
    enabled: false
"#;

        let result = Config::from_yaml(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("must be enabled"));
    }

    #[test]
    fn batch_size_bounds() {
        let yaml = r#"
sessions:
  - name: alpha
    auth_file: a.session
forward:
  batch_size: 11
"#;

        let result = Config::from_yaml(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("batch_size"));
    }
}
