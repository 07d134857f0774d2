//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::factory::ConnectionPolicy;

/// Default number of rows per flushed batch.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Default cap on concurrently copied tables.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Root of a connection registry file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryFile {
    #[serde(default)]
    pub connections: Vec<ConnectionSpec>,

    /// Optional transfer defaults.
    #[serde(default)]
    pub transfer: TransferSettings,
}

/// One named database endpoint.
///
/// Credentials may be given as fields or embedded in the URL; fields win.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSpec {
    /// Logical name, unique within a registry.
    pub name: String,

    /// Database type tag. Inferred from the URL scheme when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_type: Option<String>,

    /// Endpoint URL, optionally prefixed with `jdbc:`.
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Overrides the database named in the URL path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,

    /// Schema used for unqualified table names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
}

impl fmt::Debug for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSpec")
            .field("name", &self.name)
            .field("db_type", &self.db_type)
            .field("url", &super::endpoint::redact_url(&self.url))
            .field("user_name", &self.user_name)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("database_name", &self.database_name)
            .field("schema_name", &self.schema_name)
            .finish()
    }
}

/// Transfer defaults from the registry file; CLI flags override them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_policy: Option<ConnectionPolicy>,

    /// Directory of driver plugins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drivers_dir: Option<PathBuf>,
}

impl TransferSettings {
    pub fn get_batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    pub fn get_max_concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY)
    }

    pub fn get_connection_policy(&self) -> ConnectionPolicy {
        self.connection_policy.unwrap_or_default()
    }
}
