//! Driver registry.
//!
//! The [`DriverRegistry`] maps database type tags to drivers. It is built
//! explicitly (built-ins first, then an optional plugin directory) and then
//! passed to the coordinator, so resolution is deterministic and tests can
//! register in-memory drivers instead.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::plugin::{NativePluginLoader, PluginLoader};
use super::traits::Driver;
use crate::error::{CopyError, Result};

/// A plugin artifact that was found but could not be used.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedArtifact {
    pub path: PathBuf,
    pub reason: String,
}

impl SkippedArtifact {
    /// Whether the file name mentions `tag`, e.g. `libtablecopy_oracle.so`
    /// for `oracle`.
    fn names_tag(&self, tag: &str) -> bool {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_ascii_lowercase())
            .map(|stem| {
                stem.trim_start_matches("lib")
                    .split(|c: char| !c.is_ascii_alphanumeric())
                    .any(|part| part == tag)
            })
            .unwrap_or(false)
    }
}

/// Registry of database drivers keyed by type tag.
#[derive(Default)]
pub struct DriverRegistry {
    /// Every tag (canonical names and aliases) to its driver.
    drivers: HashMap<String, Arc<dyn Driver>>,

    /// Canonical names in registration order.
    names: Vec<String>,

    skipped: Vec<SkippedArtifact>,

    // Declared last: plugin code must stay mapped until every driver
    // above has been dropped.
    libraries: Vec<Library>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the statically linked drivers.
    ///
    /// PostgreSQL is always available; MySQL/MariaDB and SQL Server depend on
    /// the `mysql` and `mssql` features.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::drivers::PostgresDriver::new()));
        #[cfg(feature = "mysql")]
        registry.register(Arc::new(crate::drivers::MysqlDriver::new()));
        #[cfg(feature = "mssql")]
        registry.register(Arc::new(crate::drivers::MssqlDriver::new()));
        registry
    }

    /// Built-ins plus the plugins in `dir`, if given.
    pub fn discover(dir: Option<&Path>) -> Result<Self> {
        let mut registry = Self::with_builtins();
        if let Some(dir) = dir {
            registry.load_dir(dir, &NativePluginLoader)?;
        }
        Ok(registry)
    }

    /// Register `driver` under its name and aliases.
    ///
    /// The first registration for a tag wins; later ones are ignored with a
    /// warning. Returns whether the canonical name was newly registered.
    pub fn register(&mut self, driver: Arc<dyn Driver>) -> bool {
        let name = normalize(driver.name());
        if self.drivers.contains_key(&name) {
            warn!(
                "Driver '{}' is already registered, ignoring duplicate registration",
                name
            );
            return false;
        }

        self.drivers.insert(name.clone(), driver.clone());
        for alias in driver.aliases() {
            let alias = normalize(alias);
            if self.drivers.contains_key(&alias) {
                warn!(
                    "Alias '{}' of driver '{}' is already taken, ignoring it",
                    alias, name
                );
                continue;
            }
            self.drivers.insert(alias, driver.clone());
        }

        debug!("Registered driver '{}'", name);
        self.names.push(name);
        true
    }

    /// Load every plugin artifact in `dir`.
    ///
    /// Artifacts that fail to load are recorded in [`skipped`](Self::skipped)
    /// and do not stop the scan. Returns the number of drivers registered.
    pub fn load_dir(&mut self, dir: &Path, loader: &dyn PluginLoader) -> Result<usize> {
        if !dir.is_dir() {
            return Err(CopyError::Config(format!(
                "driver directory {} does not exist or is not a directory",
                dir.display()
            )));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && loader.accepts(p))
            .collect();
        paths.sort();

        if paths.is_empty() {
            warn!("No driver plugins found in {}", dir.display());
            return Ok(0);
        }

        let mut registered = 0;
        for path in paths {
            match loader.load(&path) {
                Ok(plugin) => {
                    for driver in plugin.drivers {
                        if self.register(driver) {
                            registered += 1;
                        }
                    }
                    if let Some(library) = plugin.library {
                        self.libraries.push(library);
                    }
                    info!("Loaded driver plugin {}", path.display());
                }
                Err(reason) => {
                    warn!("Skipping driver plugin {}: {}", path.display(), reason);
                    self.skipped.push(SkippedArtifact { path, reason });
                }
            }
        }
        Ok(registered)
    }

    /// Driver for a database type tag (case-insensitive).
    ///
    /// Repeated calls return the same driver instance.
    pub fn resolve(&self, tag: &str) -> Result<Arc<dyn Driver>> {
        let tag = normalize(tag);
        if let Some(driver) = self.drivers.get(&tag) {
            return Ok(driver.clone());
        }

        if let Some(artifact) = self.skipped.iter().find(|a| a.names_tag(&tag)) {
            return Err(CopyError::driver_load(
                artifact.path.display().to_string(),
                artifact.reason.clone(),
            ));
        }

        Err(CopyError::DriverNotFound {
            db_type: tag,
            available: if self.names.is_empty() {
                "none".to_string()
            } else {
                self.names.join(", ")
            },
        })
    }

    /// Canonical names of registered drivers.
    pub fn driver_names(&self) -> Vec<&str> {
        self.names.iter().map(String::as_str).collect()
    }

    /// Registered drivers in registration order.
    pub fn drivers(&self) -> impl Iterator<Item = &Arc<dyn Driver>> {
        self.names.iter().filter_map(|n| self.drivers.get(n))
    }

    /// Artifacts found in the plugin directory that could not be loaded.
    pub fn skipped(&self) -> &[SkippedArtifact] {
        &self.skipped
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names)
            .field("skipped", &self.skipped)
            .field("libraries", &self.libraries.len())
            .finish()
    }
}

fn normalize(tag: &str) -> String {
    tag.trim().to_ascii_lowercase()
}
