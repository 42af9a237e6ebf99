//! JT/T 808 access server.
//!
//! Production runtime wrapping the sans-I/O state in [`roadlink_core`]
//! with real TCP I/O: an acceptor task, one pipeline task per terminal
//! connection, and an outgoing-command dispatcher with request/response
//! correlation.
//!
//! # Components
//!
//! - [`Server`]: listener lifecycle (bind, run, shutdown)
//! - [`Handle`]: embedding surface (send commands, read/write device
//!   configuration as JSON, install observer hooks)
//! - `connection`: the per-connection read/write state machine
//! - `handlers`: the per-message dispatch table
//!
//! # Embedding
//!
//! ```no_run
//! # async fn example() -> Result<(), roadlink_server::ServerError> {
//! use roadlink_server::{Server, ServerConfig};
//!
//! let server = Server::bind(ServerConfig::default()).await?;
//! let handle = server.handle();
//! handle.set_status_hook(Box::new(|phone, status| {
//!     println!("{phone} is now {status:?}");
//! }));
//! server.run().await
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod commands;
mod connection;
mod error;
mod handlers;
mod transport;

use std::sync::Arc;
use std::time::Duration;

pub use commands::{broadcast, send_command};
pub use error::ServerError;
pub use handlers::{Reply, dispatch};
pub use roadlink_core::{
    AlarmHook, AlarmMessage, Core, CoreConfig, Device, DeviceStatus, StatusHook,
};
use roadlink_proto::{AckResult, Body, ParameterSet};
use serde_json::{Value as Json, json};
use tokio::sync::watch;
pub use transport::TcpTransport;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (e.g. `0.0.0.0:1808`).
    pub bind_address: String,
    /// Maximum concurrent terminal connections.
    pub max_connections: usize,
    /// Default wait for terminal responses to server commands.
    pub response_timeout: Duration,
    /// Core-state tunables (fragment timeout, location ring capacity).
    pub core: CoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:1808".to_string(),
            max_connections: 10_000,
            response_timeout: Duration::from_secs(10),
            core: CoreConfig::default(),
        }
    }
}

/// The access server: TCP listener plus shared core state.
pub struct Server {
    core: Arc<Core>,
    transport: TcpTransport,
    shutdown: watch::Sender<bool>,
    config: ServerConfig,
}

impl Server {
    /// Create the core state and bind the listener.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let core = Arc::new(Core::new(config.core.clone()));
        let transport = TcpTransport::bind(&config.bind_address).await?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self { core, transport, shutdown, config })
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Embedding surface. Clonable; stays valid while the server runs.
    #[must_use]
    pub fn handle(&self) -> Handle {
        Handle {
            core: Arc::clone(&self.core),
            shutdown: self.shutdown.clone(),
            response_timeout: self.config.response_timeout,
        }
    }

    /// Accept connections until [`Handle::shutdown`] is called.
    ///
    /// Shutdown closes the acceptor and signals every connection task;
    /// their teardown marks devices offline and fails pending commands
    /// with `ConnectionClosed`.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("server running on {}", self.transport.local_addr()?);
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,

                accepted = self.transport.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            if self.core.sessions.len() >= self.config.max_connections {
                                tracing::warn!(%peer, "connection limit reached, rejecting");
                                continue;
                            }
                            tokio::spawn(connection::serve(
                                Arc::clone(&self.core),
                                stream,
                                peer.to_string(),
                                self.shutdown.subscribe(),
                            ));
                        }
                        Err(e) => tracing::error!(error = %e, "accept failed"),
                    }
                }
            }
        }

        tracing::info!("server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("bind_address", &self.config.bind_address)
            .field("sessions", &self.core.sessions.len())
            .finish()
    }
}

/// Clonable embedding surface over a running server.
#[derive(Clone)]
pub struct Handle {
    core: Arc<Core>,
    shutdown: watch::Sender<bool>,
    response_timeout: Duration,
}

impl Handle {
    /// Direct access to the shared core state.
    #[must_use]
    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    /// Stop the server: the acceptor exits and every live connection is
    /// closed.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send_replace(true);
    }

    /// Install the device status-change observer. Only the first call
    /// takes effect.
    pub fn set_status_hook(&self, hook: Box<StatusHook>) {
        self.core.devices.set_status_hook(hook);
    }

    /// Install the alarm observer. Only the first call takes effect.
    pub fn set_alarm_hook(&self, hook: Box<AlarmHook>) {
        self.core.alarms.set_alarm_hook(hook);
    }

    /// Send a command to one terminal and await its response.
    pub async fn send_to(
        &self,
        phone: &str,
        body: Body,
        timeout: Duration,
    ) -> Result<Body, ServerError> {
        commands::send_command(&self.core, phone, body, timeout).await
    }

    /// Query every registered device's parameters.
    ///
    /// Returns `{"devices": {<phone>: <parameter-set-json>}}`; a phone
    /// that failed to answer maps to `{"error": <message>}`.
    pub async fn get_device_config(&self, timeout: Option<Duration>) -> Result<Json, ServerError> {
        let timeout = timeout.unwrap_or(self.response_timeout);
        let outcomes = commands::broadcast(&self.core, &Body::QueryParams, timeout).await;

        let mut devices = serde_json::Map::new();
        for (phone, outcome) in outcomes {
            let entry = match outcome {
                Ok(Body::ParamsReply(reply)) => reply.params.to_json()?,
                Ok(other) => json!({ "error": format!("unexpected response {:#06x}", other.msg_id()) }),
                Err(e) => json!({ "error": e.to_string() }),
            };
            devices.insert(phone, entry);
        }
        Ok(json!({ "devices": devices }))
    }

    /// Push a parameter set to every registered device.
    ///
    /// The JSON shape is the one [`get_device_config`](Self::get_device_config)
    /// returns per device: `{"total": n, "settings": [{"id", "value"}]}`.
    /// Each terminal's cached parameter set is updated on a successful
    /// ack. Fails if any device rejects or misses the deadline.
    pub async fn set_device_config(
        &self,
        config: &Json,
        timeout: Option<Duration>,
    ) -> Result<(), ServerError> {
        let timeout = timeout.unwrap_or(self.response_timeout);
        let params = ParameterSet::from_json(config)?;

        let outcomes =
            commands::broadcast(&self.core, &Body::SetParams(params.clone()), timeout).await;

        let mut failures = Vec::new();
        for (phone, outcome) in outcomes {
            match outcome {
                Ok(Body::TerminalAck(ack)) if ack.result == AckResult::Success => {
                    let _ = self.core.devices.update(&phone, |d| d.params.update(&params));
                }
                Ok(Body::TerminalAck(ack)) => {
                    failures.push(format!("{phone}: result {}", ack.result.as_u8()));
                }
                Ok(other) => {
                    failures.push(format!("{phone}: unexpected response {:#06x}", other.msg_id()));
                }
                Err(e) => failures.push(format!("{phone}: {e}")),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ServerError::HandlerFailed(format!(
                "set config failed for {}",
                failures.join("; ")
            )))
        }
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle").field("sessions", &self.core.sessions.len()).finish()
    }
}
