//! Connection registry loading and validation.

pub mod endpoint;
mod types;
mod validation;

pub use endpoint::{redact_url, resolve, Endpoint};
pub use types::*;
pub use validation::validate_batch_size;

use std::path::Path;

use tracing::debug;

use crate::error::{CopyError, Result};

/// Named connections plus transfer defaults.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    connections: Vec<ConnectionSpec>,
    settings: TransferSettings,
}

impl ConnectionRegistry {
    /// Load a registry from a YAML file, or JSON when the extension is `.json`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let registry = if is_json {
            Self::from_json(&content)?
        } else {
            Self::from_yaml(&content)?
        };
        debug!(
            "Loaded {} connections from {}",
            registry.connections.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Parse a registry from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Err(CopyError::Config("configuration file is empty".into()));
        }
        let file: RegistryFile = serde_yaml::from_str(yaml)?;
        Self::from_file(file)
    }

    /// Parse a registry from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: RegistryFile = serde_json::from_str(json)?;
        Self::from_file(file)
    }

    /// Validate and wrap an already-parsed registry file.
    pub fn from_file(file: RegistryFile) -> Result<Self> {
        validation::validate(&file)?;
        Ok(Self {
            connections: file.connections,
            settings: file.transfer,
        })
    }

    /// Assemble `source` and `target` connections from `SOURCE_*` and
    /// `TARGET_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an injectable variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut connections = Vec::new();
        for (name, prefix) in [("source", "SOURCE"), ("target", "TARGET")] {
            let url = lookup(&format!("{}_URL", prefix)).ok_or_else(|| {
                CopyError::Config(format!(
                    "no configuration file given and {}_URL is not set",
                    prefix
                ))
            })?;
            connections.push(ConnectionSpec {
                name: name.to_string(),
                db_type: lookup(&format!("{}_DB_TYPE", prefix)),
                url,
                user_name: lookup(&format!("{}_USER", prefix)),
                password: lookup(&format!("{}_PASSWORD", prefix)),
                database_name: None,
                schema_name: lookup(&format!("{}_SCHEMA", prefix)),
            });
        }

        let batch_size = match lookup("BATCH_SIZE") {
            Some(raw) => Some(raw.trim().parse::<usize>().map_err(|_| {
                CopyError::Config(format!("BATCH_SIZE must be a positive integer, got '{}'", raw))
            })?),
            None => None,
        };

        Self::from_file(RegistryFile {
            connections,
            transfer: TransferSettings {
                batch_size,
                ..Default::default()
            },
        })
    }

    /// Look up a connection by logical name.
    pub fn get(&self, name: &str) -> Result<&ConnectionSpec> {
        self.connections
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| {
                CopyError::Config(format!(
                    "connection '{}' is not configured (available: {})",
                    name,
                    self.names().join(", ")
                ))
            })
    }

    /// Look up the source and target connections.
    pub fn require_pair(
        &self,
        source: &str,
        target: &str,
    ) -> Result<(&ConnectionSpec, &ConnectionSpec)> {
        Ok((self.get(source)?, self.get(target)?))
    }

    pub fn names(&self) -> Vec<&str> {
        self.connections.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn connections(&self) -> &[ConnectionSpec] {
        &self.connections
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;
    use crate::core::factory::ConnectionPolicy;

    const YAML: &str = r#"
connections:
  - name: source
    dbType: postgres
    url: jdbc:postgresql://db1:5432/shop?user=app&password=secret
    schemaName: public
  - name: target
    url: mysql://db2:3306/shop
    userName: loader
    password: pw
transfer:
  batchSize: 500
  maxConcurrency: 4
  connectionPolicy: auto
"#;

    #[test]
    fn test_from_yaml() {
        let registry = ConnectionRegistry::from_yaml(YAML).unwrap();
        assert_eq!(registry.names(), vec!["source", "target"]);

        let (source, target) = registry.require_pair("source", "target").unwrap();
        assert_eq!(source.db_type.as_deref(), Some("postgres"));
        assert_eq!(source.schema_name.as_deref(), Some("public"));
        assert_eq!(target.user_name.as_deref(), Some("loader"));

        let settings = registry.settings();
        assert_eq!(settings.get_batch_size(), 500);
        assert_eq!(settings.get_max_concurrency(), 4);
        assert_eq!(settings.get_connection_policy(), ConnectionPolicy::Auto);
    }

    #[test]
    fn test_defaults_when_transfer_section_missing() {
        let registry = ConnectionRegistry::from_yaml(
            "connections:\n  - name: a\n    url: postgres://h/db\n",
        )
        .unwrap();
        assert_eq!(registry.settings().get_batch_size(), DEFAULT_BATCH_SIZE);
        assert_eq!(
            registry.settings().get_connection_policy(),
            ConnectionPolicy::Dedicated
        );
    }

    #[test]
    fn test_empty_yaml_is_config_error() {
        let err = ConnectionRegistry::from_yaml("").unwrap_err();
        assert!(matches!(err, CopyError::Config(_)));
    }

    #[test]
    fn test_missing_connection_name() {
        let registry = ConnectionRegistry::from_yaml(YAML).unwrap();
        let err = registry.get("warehouse").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'warehouse'"));
        assert!(msg.contains("source, target"));
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"connections": [{{"name": "only", "url": "postgres://h/db"}}]}}"#
        )
        .unwrap();
        let registry = ConnectionRegistry::load(file.path()).unwrap();
        assert_eq!(registry.names(), vec!["only"]);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = ConnectionRegistry::load("/nonexistent/tablecopy.yaml").unwrap_err();
        assert!(matches!(err, CopyError::Io(_)));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("SOURCE_URL", "jdbc:postgresql://db1/shop"),
            ("SOURCE_USER", "app"),
            ("TARGET_URL", "jdbc:mysql://db2/shop"),
            ("TARGET_PASSWORD", "pw"),
            ("BATCH_SIZE", "250"),
        ]
        .into_iter()
        .collect();

        let registry =
            ConnectionRegistry::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        let (source, target) = registry.require_pair("source", "target").unwrap();
        assert_eq!(source.user_name.as_deref(), Some("app"));
        assert_eq!(target.password.as_deref(), Some("pw"));
        assert_eq!(registry.settings().get_batch_size(), 250);
    }

    #[test]
    fn test_from_lookup_requires_urls() {
        let result = ConnectionRegistry::from_lookup(|_| None);
        assert!(matches!(result, Err(CopyError::Config(_))));
    }

    #[test]
    fn test_from_lookup_rejects_zero_batch_size() {
        let result = ConnectionRegistry::from_lookup(|k| match k {
            "SOURCE_URL" | "TARGET_URL" => Some("postgres://h/db".to_string()),
            "BATCH_SIZE" => Some("0".to_string()),
            _ => None,
        });
        assert!(result.is_err());
    }
}
