//! Web server implementation
//!
//! Provides the main server struct and configuration.

use axum::extract::DefaultBodyLimit;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::converter::{Converter, ConverterConfig};
use super::cors::CorsConfig;
use super::routes::{routes, AppState};
use super::shutdown::wait_for_shutdown_signal;
use super::workspace::{Layout, Workspace, WorkspaceError};
use super::{DEFAULT_BIND, DEFAULT_PORT, DEFAULT_UPLOAD_LIMIT, DEFAULT_WORK_DIR};

/// Server error type
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid listen address: {0}")]
    Addr(#[from] std::net::AddrParseError),
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Address to bind to
    pub bind: String,
    /// Number of runtime worker threads
    pub workers: usize,
    /// Maximum upload size in bytes
    pub upload_limit: usize,
    /// Directory for uploads and converter output
    pub work_dir: PathBuf,
    /// Working directory layout
    pub layout: Layout,
    /// External converter
    pub converter: ConverterConfig,
    /// CORS settings
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            workers: num_cpus::get(),
            upload_limit: DEFAULT_UPLOAD_LIMIT,
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            layout: Layout::default(),
            converter: ConverterConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    pub fn with_upload_limit(mut self, limit: usize) -> Self {
        self.upload_limit = limit;
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_converter(mut self, converter: ConverterConfig) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_cors(mut self, cors: CorsConfig) -> Self {
        self.cors = cors;
        self
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.bind, self.port).parse()
    }
}

/// Web server instance
pub struct WebServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a server, creating the working directory if needed
    pub fn with_config(config: ServerConfig) -> Result<Self, WorkspaceError> {
        let workspace = Workspace::open(&config.work_dir, config.layout)?;
        let converter = Converter::new(config.converter.clone());
        Ok(Self {
            config,
            state: Arc::new(AppState::new(workspace, converter)),
        })
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Shared handler state
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Build the router with all middleware applied
    pub fn router(&self) -> Router {
        routes()
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(RequestBodyLimitLayer::new(self.config.upload_limit))
                    .layer(self.config.cors.clone().into_layer())
                    .layer(DefaultBodyLimit::max(self.config.upload_limit)),
            )
            .with_state(self.state.clone())
    }

    /// Run until SIGINT or SIGTERM
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = self.config.socket_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        self.serve(listener, wait_for_shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(
        &self,
        listener: tokio::net::TcpListener,
        shutdown: F,
    ) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        let converter = self.state.converter.config();

        tracing::info!(
            address = %addr,
            work_dir = %self.state.workspace.root().display(),
            layout = %self.state.workspace.layout(),
            "starting server on http://{}",
            addr
        );
        tracing::info!(
            program = %converter.program,
            args = ?converter.args,
            timeout_secs = converter.timeout.as_secs(),
            verify_output = converter.verify_output,
            "converter configured"
        );
        if !self.state.converter.is_available() {
            tracing::warn!(
                program = %converter.program,
                "converter not found on PATH; uploads will fail until it is installed"
            );
        }

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("server stopped");
        Ok(())
    }
}
