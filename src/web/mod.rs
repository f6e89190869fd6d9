//! Web server module for xml2xlsx-server
//!
//! Accepts XML uploads, hands them to an external converter and serves the
//! resulting spreadsheets.
//!
//! # Routes
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | GET | `/` | Landing page with the upload form |
//! | POST | `/upload/` | Multipart `file` + `custom_name`, runs the converter |
//! | GET | `/files/{filename}` | Download an artifact |
//! | GET | `/files/{id}/{filename}` | Download an artifact in the isolated layout |
//! | GET | `/health` | Health check |
//!
//! # Usage
//!
//! ```bash
//! xml2xlsx-server serve --port 8000 --work-dir ./work --converter caex2xlsx
//! ```

mod assets;
mod converter;
mod cors;
mod routes;
mod server;
mod shutdown;
mod workspace;

pub use converter::{
    ConversionOutcome, ConvertError, Converter, ConverterConfig, CONVERTER_ERROR_PREFIX,
};
pub use cors::CorsConfig;
pub use routes::{AppError, AppState, UploadResponse, FILE_NOT_FOUND, UPLOAD_SUCCESS_MESSAGE};
pub use server::{ServerConfig, ServerError, WebServer};
pub use shutdown::{wait_for_shutdown_signal, ShutdownHandle};
pub use workspace::{
    classify_name, ConversionPaths, Layout, NameKind, PathLocks, Workspace, WorkspaceError,
};

/// Default server port
pub const DEFAULT_PORT: u16 = 8000;

/// Default bind address
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Default upload limit in bytes (50 MB)
pub const DEFAULT_UPLOAD_LIMIT: usize = 50 * 1024 * 1024;

/// Default converter timeout in seconds
pub const DEFAULT_CONVERTER_TIMEOUT: u64 = 300;

/// Default working directory
pub const DEFAULT_WORK_DIR: &str = "./work";

/// Default converter program
pub const DEFAULT_CONVERTER_PROGRAM: &str = "xml2xlsx";

/// Default converter argument template
pub const DEFAULT_CONVERTER_ARGS: &[&str] = &["{input}", "{output}"];
