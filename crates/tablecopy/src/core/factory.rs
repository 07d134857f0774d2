//! Connection acquisition with explicit lifetimes.
//!
//! Every connection the engine opens is wrapped in a [`ConnectionHandle`]
//! that closes it exactly once: explicitly through [`ConnectionHandle::close`]
//! or [`ConnectionFactory::release`], or from `Drop` on paths that unwind
//! early. Whether one handle may serve several table workers is a factory
//! policy checked against the driver's declared capabilities.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::traits::{Connection, Driver};
use crate::config::ConnectionSpec;
use crate::error::{CopyError, Result};

/// How connections are distributed across concurrent table workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPolicy {
    /// One source and one target connection per table worker.
    #[default]
    Dedicated,
    /// One connection per endpoint and role, shared by all workers. Refused
    /// for drivers that do not support concurrent use of a handle.
    Shared,
    /// Share where the driver supports it, otherwise dedicate.
    Auto,
}

impl FromStr for ConnectionPolicy {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dedicated" => Ok(ConnectionPolicy::Dedicated),
            "shared" => Ok(ConnectionPolicy::Shared),
            "auto" => Ok(ConnectionPolicy::Auto),
            other => Err(CopyError::Config(format!(
                "Invalid connection policy '{}'. Valid values: dedicated, shared, auto",
                other
            ))),
        }
    }
}

impl fmt::Display for ConnectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionPolicy::Dedicated => "dedicated",
            ConnectionPolicy::Shared => "shared",
            ConnectionPolicy::Auto => "auto",
        })
    }
}

/// What a connection is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionRole {
    /// Read-only: catalog queries and cursors.
    Source,
    /// Write-only: insert statements and commits.
    Target,
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionRole::Source => "source",
            ConnectionRole::Target => "target",
        })
    }
}

/// An open connection with a guaranteed single close.
pub struct ConnectionHandle {
    name: String,
    role: ConnectionRole,
    shared: bool,
    conn: Arc<dyn Connection>,
    closed: AtomicBool,
}

impl ConnectionHandle {
    fn new(name: &str, role: ConnectionRole, shared: bool, conn: Box<dyn Connection>) -> Self {
        Self {
            name: name.to_string(),
            role,
            shared,
            conn: Arc::from(conn),
            closed: AtomicBool::new(false),
        }
    }

    /// Logical connection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    /// Whether several workers use this handle.
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn connection(&self) -> &dyn Connection {
        self.conn.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the underlying session. Later calls do nothing.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.conn.close().await;
            debug!("Closed {} connection '{}'", self.role, self.name);
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let conn = self.conn.clone();
        let name = self.name.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    conn.close().await;
                    debug!("Closed connection '{}' on drop", name);
                });
            }
            Err(_) => warn!(
                "Connection '{}' dropped outside a runtime; the session ends when the client is freed",
                name
            ),
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("shared", &self.shared)
            .field("db_type", &self.conn.db_type())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Opens connections and applies the sharing policy.
pub struct ConnectionFactory {
    policy: ConnectionPolicy,
    shared: Mutex<HashMap<(String, ConnectionRole), Arc<ConnectionHandle>>>,
}

impl ConnectionFactory {
    pub fn new(policy: ConnectionPolicy) -> Self {
        Self {
            policy,
            shared: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> ConnectionPolicy {
        self.policy
    }

    /// Decide whether `role` connections of `driver` are shared.
    ///
    /// An explicit `Shared` policy on a driver without the matching
    /// capability is a configuration error rather than a silent fallback.
    pub fn sharing_for(&self, driver: &dyn Driver, role: ConnectionRole) -> Result<bool> {
        let caps = driver.capabilities();
        let capable = match role {
            ConnectionRole::Source => caps.concurrent_reads,
            ConnectionRole::Target => caps.concurrent_writes,
        };
        match self.policy {
            ConnectionPolicy::Dedicated => Ok(false),
            ConnectionPolicy::Auto => Ok(capable),
            ConnectionPolicy::Shared if capable => Ok(true),
            ConnectionPolicy::Shared => Err(CopyError::Config(format!(
                "connection policy 'shared' requested but driver '{}' does not support concurrent {} use of one connection",
                driver.name(),
                match role {
                    ConnectionRole::Source => "read",
                    ConnectionRole::Target => "write",
                }
            ))),
        }
    }

    /// Open a new, unshared connection.
    pub async fn open(
        &self,
        driver: &dyn Driver,
        spec: &ConnectionSpec,
        role: ConnectionRole,
    ) -> Result<ConnectionHandle> {
        self.open_inner(driver, spec, role, false).await
    }

    /// Connection for one worker: a clone of the shared handle when the
    /// policy shares this driver and role, a fresh connection otherwise.
    pub async fn acquire(
        &self,
        driver: &dyn Driver,
        spec: &ConnectionSpec,
        role: ConnectionRole,
    ) -> Result<Arc<ConnectionHandle>> {
        if !self.sharing_for(driver, role)? {
            return Ok(Arc::new(self.open_inner(driver, spec, role, false).await?));
        }

        let mut shared = self.shared.lock().await;
        let key = (spec.name.clone(), role);
        if let Some(handle) = shared.get(&key) {
            return Ok(handle.clone());
        }
        let handle = Arc::new(self.open_inner(driver, spec, role, true).await?);
        shared.insert(key, handle.clone());
        Ok(handle)
    }

    /// Return a worker's connection. Dedicated handles are closed now;
    /// shared ones stay open until [`close_all`](Self::close_all).
    pub async fn release(&self, handle: Arc<ConnectionHandle>) {
        if !handle.is_shared() {
            handle.close().await;
        }
    }

    /// Close every shared handle.
    pub async fn close_all(&self) {
        let handles: Vec<_> = self.shared.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.close().await;
        }
    }

    async fn open_inner(
        &self,
        driver: &dyn Driver,
        spec: &ConnectionSpec,
        role: ConnectionRole,
        shared: bool,
    ) -> Result<ConnectionHandle> {
        let conn = driver
            .connect(spec)
            .await
            .map_err(|e| e.or_classify(|m| CopyError::connection(&spec.name, m)))?;
        info!(
            "Opened {} connection '{}' ({}{})",
            role,
            spec.name,
            driver.name(),
            if shared { ", shared" } else { "" }
        );
        Ok(ConnectionHandle::new(&spec.name, role, shared, conn))
    }
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        Self::new(ConnectionPolicy::default())
    }
}

impl fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("policy", &self.policy)
            .finish()
    }
}
