//! Session-bus screensaver interface.
//!
//! Delivers `ActiveChanged` lock notifications and answers `GetActive`
//! queries through a single lazily acquired, memoized `DBus` interface
//! handle.

use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;
use zbus::proxy::SignalStream;
use zbus::{Connection, Proxy};

use crate::config::Config;

/// Errors while establishing the bus connection or acquiring the interface.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("could not connect to the session bus: {0}")]
    Bus(String),

    #[error("could not get interface {interface} at {service}{path}: {message}")]
    Interface {
        service: String,
        path: String,
        interface: String,
        message: String,
    },
}

/// Errors from calls on the screensaver interface.
#[derive(Debug, Error)]
pub enum InterfaceError {
    #[error(transparent)]
    Acquire(#[from] ConnectionError),

    #[error("{method} failed: {message}")]
    Call {
        method: &'static str,
        message: String,
    },
}

/// Memoizes a fallible async acquisition.
///
/// Concurrent first-time callers share a single in-flight attempt; a success
/// is cached for every later caller. A failed attempt is not cached, so the
/// next caller starts a fresh one.
#[derive(Debug, Default)]
pub(crate) struct Memoized<T> {
    cell: OnceCell<T>,
}

impl<T> Memoized<T> {
    pub(crate) fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    pub(crate) async fn get_or_acquire<E, F, Fut>(&self, acquire: F) -> Result<&T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.cell.get_or_try_init(acquire).await
    }
}

/// Handle to the session screensaver `DBus` interface.
pub struct ScreenSaver {
    conn: Connection,
    service: String,
    path: String,
    interface: String,
    proxy: Memoized<Proxy<'static>>,
}

impl ScreenSaver {
    /// Connect to the session bus.
    ///
    /// Interface acquisition is deferred to the first caller that needs it.
    pub async fn connect(config: &Config) -> Result<Self, ConnectionError> {
        let conn = Connection::session()
            .await
            .map_err(|err| ConnectionError::Bus(err.to_string()))?;

        Ok(Self {
            conn,
            service: config.service.clone(),
            path: config.path.clone(),
            interface: config.interface.clone(),
            proxy: Memoized::new(),
        })
    }

    /// The memoized interface handle.
    async fn interface(&self) -> Result<&Proxy<'static>, ConnectionError> {
        self.proxy
            .get_or_acquire(|| async {
                debug!("acquiring interface {} at {}", self.interface, self.service);
                Proxy::new(
                    &self.conn,
                    self.service.clone(),
                    self.path.clone(),
                    self.interface.clone(),
                )
                .await
                .map_err(|err| ConnectionError::Interface {
                    service: self.service.clone(),
                    path: self.path.clone(),
                    interface: self.interface.clone(),
                    message: err.to_string(),
                })
            })
            .await
    }

    /// Subscribe to `ActiveChanged` lock notifications.
    pub async fn active_changed(&self) -> Result<SignalStream<'static>, InterfaceError> {
        let iface = self.interface().await?;
        iface
            .receive_signal("ActiveChanged")
            .await
            .map_err(|err| InterfaceError::Call {
                method: "ActiveChanged",
                message: err.to_string(),
            })
    }

    /// Query the current lock state via `GetActive`.
    pub async fn get_active(&self) -> Result<bool, InterfaceError> {
        let iface = self.interface().await?;
        let active: bool =
            iface
                .call("GetActive", &())
                .await
                .map_err(|err| InterfaceError::Call {
                    method: "GetActive",
                    message: err.to_string(),
                })?;
        Ok(active)
    }
}

/// Query seam for the current lock state, so the coordinator can be driven
/// by a test double.
#[async_trait]
pub trait LockQuery: Send + Sync {
    /// Whether the screen is currently locked.
    async fn is_locked(&self) -> Result<bool, InterfaceError>;
}

#[async_trait]
impl LockQuery for ScreenSaver {
    async fn is_locked(&self) -> Result<bool, InterfaceError> {
        self.get_active().await
    }
}
