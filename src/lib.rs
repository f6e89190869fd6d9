//! xml2xlsx-server - upload-and-convert endpoint for XML to spreadsheet conversion
//!
//! Accepts an XML upload and an output name over HTTP, runs an external
//! converter program on it and serves the produced `.xlsx` file for download.
//!
//! The conversion itself is delegated entirely to the converter; this crate
//! handles the HTTP surface, the working directory and the process contract.

pub mod cli;
pub mod config;
pub mod exit_codes;
pub mod logging;
pub mod web;

pub use cli::{Cli, Commands, ServeArgs};
pub use config::{CliOverrides, Config, ConfigError};
pub use web::{
    Converter, ConverterConfig, ConvertError, CorsConfig, Layout, ServerConfig, ServerError,
    WebServer, Workspace,
};
