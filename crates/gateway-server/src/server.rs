//! HTTP server lifecycle.

use gateway_config::ServerSettings;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::{routes::create_router, shutdown::shutdown_signal, state::AppState};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind, `host:port`
    pub bind_address: String,
    /// Time allowed for in-flight requests to finish after a shutdown signal
    pub shutdown_timeout: Duration,
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            bind_address: settings.bind_address(),
            shutdown_timeout: Duration::from_millis(settings.shutdown_timeout_ms),
        }
    }
}

/// Gateway HTTP server
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Create a server for the state, configured from its server settings
    pub fn new(state: AppState) -> Self {
        Self {
            config: ServerConfig::from(&state.config.server),
            state,
        }
    }

    /// Override the server configuration
    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind and serve until a shutdown signal arrives
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        self.serve(listener, async {
            shutdown_signal().await;
        })
        .await
    }

    /// Serve on an existing listener until `shutdown` completes.
    ///
    /// Background tasks run for the lifetime of the server and are aborted
    /// when it stops.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        let tasks = self.state.spawn_background_tasks();
        let app = create_router(self.state);

        info!(
            address = %local_addr,
            version = env!("CARGO_PKG_VERSION"),
            "Gateway listening"
        );

        let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
        let graceful = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            let _ = signalled_tx.send(());
        })
        .into_future();

        let drain_deadline = async {
            if signalled_rx.await.is_ok() {
                tokio::time::sleep(self.config.shutdown_timeout).await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        let result = tokio::select! {
            result = graceful => result,
            () = drain_deadline => {
                warn!(
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    "Shutdown timeout elapsed with requests in flight"
                );
                Ok(())
            }
        };

        for task in tasks {
            task.abort();
        }
        info!("Gateway stopped");
        result
    }
}
