use std::{fs, path};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
    #[error("Missing config value: {0}")]
    Missing(String),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

pub trait Configurable {
    fn config(&self) -> &serde_yaml::Value;

    // read configuration from yaml config
    fn load_config(
        config_file_path: impl AsRef<path::Path>,
    ) -> Result<serde_yaml::Value, ConfigError> {
        let content: String = fs::read_to_string(config_file_path)?;
        let config: serde_yaml::Value = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Extract Value from config using dot notation i.e. "cache.backend.kind"
    fn get_config_value(&self, key: &str) -> Option<&serde_yaml::Value> {
        let keys: Vec<&str> = key.split('.').collect();
        Self::get_value_recursive(self.config(), &keys)
    }

    fn get_value_recursive<'a>(
        config: &'a serde_yaml::Value,
        keys: &[&str],
    ) -> Option<&'a serde_yaml::Value> {
        let (key, remaining_keys) = keys.split_first()?;
        if key.is_empty() {
            return None;
        }

        match config {
            serde_yaml::Value::Mapping(map) => {
                let value = map.get(serde_yaml::Value::String(key.to_string()))?;
                if remaining_keys.is_empty() {
                    Some(value)
                } else {
                    Self::get_value_recursive(value, remaining_keys)
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    pub struct TestApp {
        config: serde_yaml::Value,
    }

    impl Configurable for TestApp {
        fn config(&self) -> &serde_yaml::Value {
            &self.config
        }
    }

    #[test]
    fn test_load_config_valid_yaml() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yml");
        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "cache:\n  mark_responses: true\n  timeout: 42").unwrap();

        let config = TestApp::load_config(&config_path);
        assert!(config.is_ok());
        let config = config.unwrap();
        assert_eq!(config["cache"]["mark_responses"].as_bool(), Some(true));
        assert_eq!(config["cache"]["timeout"].as_i64(), Some(42));
    }

    #[test]
    fn test_load_config_invalid_yaml() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yml");
        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "invalid: : yaml: content").unwrap();

        let config = TestApp::load_config(&config_path);
        assert!(matches!(config, Err(ConfigError::YamlParse(_))));
    }

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempdir().unwrap();
        let config = TestApp::load_config(dir.path().join("nope.yml"));
        assert!(matches!(config, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_get_config_value() {
        let yaml = r#"
        cache:
          backend:
            kind: fjall
            path: /tmp/cache
        "#;
        let config: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        let app = TestApp { config };

        assert_eq!(
            app.get_config_value("cache.backend.kind")
                .and_then(|v| v.as_str()),
            Some("fjall")
        );
        assert_eq!(app.get_config_value("cache.missing.value"), None);
        assert_eq!(app.get_config_value("missing"), None);
        assert_eq!(app.get_config_value(""), None);
    }
}
