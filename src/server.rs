//! TCP listener for chat connections.
//!
//! Accepts incoming connections and runs one session task per client.

use crate::config::Config;
use crate::protocol::{handle_connection, SessionSettings};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Server instance
pub struct Server {
    listener: TcpListener,
    settings: SessionSettings,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Bind the listening socket described by `config`.
    pub async fn bind(config: &Config) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr()).await?;
        info!(address = %listener.local_addr()?, "Server listening");

        Ok(Server {
            listener,
            settings: SessionSettings {
                idle_timeout: config.idle_timeout,
                read_timeout: config.read_timeout,
                write_timeout: config.write_timeout,
                log_dir: config.log_dir.clone(),
            },
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the process exits.
    pub async fn run(&self) -> std::io::Result<()> {
        loop {
            // Wait for a connection slot
            let permit = self
                .connection_limit
                .clone()
                .acquire_owned()
                .await
                .map_err(std::io::Error::other)?;

            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");

                    let settings = self.settings.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, addr.to_string(), settings).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}
