//! External converter invocation
//!
//! The XML to spreadsheet conversion itself happens in a separate program.
//! This module launches it once per upload with an explicit contract:
//!
//! - Each argument may contain `{input}`, `{output}`, `{name}` and `{dir}`,
//!   replaced with the upload path, the expected output path, the custom name
//!   and the request directory.
//! - The same values are exported as `CONVERT_INPUT`, `CONVERT_OUTPUT`,
//!   `CONVERT_NAME` and `CONVERT_DIR`.
//! - The process runs with the request directory as its current directory.
//!
//! An argument list without placeholders leaves the converter to find its
//! input and name its output by its own conventions.
//!
//! The process is bounded by a timeout and is killed when the request that
//! started it is dropped.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use super::workspace::ConversionPaths;
use super::{DEFAULT_CONVERTER_ARGS, DEFAULT_CONVERTER_PROGRAM, DEFAULT_CONVERTER_TIMEOUT};

/// Prefix of every converter failure reported to clients
pub const CONVERTER_ERROR_PREFIX: &str = "Error running Go backend";

pub const ENV_INPUT: &str = "CONVERT_INPUT";
pub const ENV_OUTPUT: &str = "CONVERT_OUTPUT";
pub const ENV_NAME: &str = "CONVERT_NAME";
pub const ENV_DIR: &str = "CONVERT_DIR";

const PLACEHOLDERS: [&str; 4] = ["{input}", "{output}", "{name}", "{dir}"];

/// Converter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterConfig {
    /// Program name or path
    pub program: String,
    /// Argument template
    pub args: Vec<String>,
    /// Maximum run time
    pub timeout: Duration,
    /// Require a non-empty output file after exit 0
    pub verify_output: bool,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_CONVERTER_PROGRAM.to_string(),
            args: DEFAULT_CONVERTER_ARGS.iter().map(|a| a.to_string()).collect(),
            timeout: Duration::from_secs(DEFAULT_CONVERTER_TIMEOUT),
            verify_output: true,
        }
    }
}

impl ConverterConfig {
    /// Config for `program` with the given argument template
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_verify_output(mut self, verify: bool) -> Self {
        self.verify_output = verify;
        self
    }
}

/// Converter error type
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to collect converter output: {0}")]
    Wait(#[source] std::io::Error),
    #[error("{}", describe_failure(.code, .stderr))]
    Failed { code: Option<i32>, stderr: String },
    #[error("converter timed out after {} seconds", .0.as_secs())]
    TimedOut(Duration),
    #[error("converter exited successfully but produced no output at {}", .0.display())]
    MissingOutput(PathBuf),
}

/// Stderr verbatim, or the exit status when stderr is blank
fn describe_failure(code: &Option<i32>, stderr: &str) -> String {
    if !stderr.trim().is_empty() {
        return stderr.to_string();
    }
    match code {
        Some(code) => format!("converter exited with status {}", code),
        None => "converter was terminated by a signal".to_string(),
    }
}

impl ConvertError {
    /// Message placed in the `error` field of the HTTP response
    pub fn client_message(&self) -> String {
        match self {
            ConvertError::MissingOutput(path) => format!(
                "Converter produced no output: {}",
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string())
            ),
            other => format!("{}: {}", CONVERTER_ERROR_PREFIX, other),
        }
    }
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    /// Wall-clock time the converter ran
    pub elapsed: Duration,
    /// Size of the output file, when it was checked
    pub output_size: Option<u64>,
}

/// Launches the configured converter
#[derive(Debug, Clone)]
pub struct Converter {
    config: ConverterConfig,
}

impl Converter {
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Whether the program resolves on `PATH` (or as a path)
    pub fn is_available(&self) -> bool {
        which::which(&self.config.program).is_ok()
    }

    /// Whether any argument references the request paths
    pub fn uses_placeholders(&self) -> bool {
        self.config
            .args
            .iter()
            .any(|arg| PLACEHOLDERS.iter().any(|p| arg.contains(p)))
    }

    /// Argument list for one conversion
    pub fn expand_args(&self, paths: &ConversionPaths) -> Vec<String> {
        let input = paths.input.to_string_lossy();
        let output = paths.output.to_string_lossy();
        let dir = paths.dir.to_string_lossy();

        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{output}", &output)
                    .replace("{name}", &paths.custom_name)
                    .replace("{dir}", &dir)
            })
            .collect()
    }

    /// Run the converter for one upload and wait for it to finish
    pub async fn run(&self, paths: &ConversionPaths) -> Result<ConversionOutcome, ConvertError> {
        let args = self.expand_args(paths);

        let mut command = Command::new(&self.config.program);
        command
            .args(&args)
            .current_dir(&paths.dir)
            .env(ENV_INPUT, &paths.input)
            .env(ENV_OUTPUT, &paths.output)
            .env(ENV_NAME, &paths.custom_name)
            .env(ENV_DIR, &paths.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            request_id = %paths.request_id,
            program = %self.config.program,
            ?args,
            "launching converter"
        );

        let start = Instant::now();
        let child = command.spawn().map_err(|source| ConvertError::Launch {
            program: self.config.program.clone(),
            source,
        })?;

        // Dropping the wait future drops the child, which kills it
        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await
        {
            Ok(result) => result.map_err(ConvertError::Wait)?,
            Err(_) => {
                tracing::warn!(
                    request_id = %paths.request_id,
                    timeout_secs = self.config.timeout.as_secs(),
                    "converter timed out, killed"
                );
                return Err(ConvertError::TimedOut(self.config.timeout));
            }
        };
        let elapsed = start.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        tracing::info!(
            request_id = %paths.request_id,
            status = %output.status,
            elapsed_ms = elapsed.as_millis() as u64,
            "converter finished"
        );
        if !stdout.is_empty() {
            tracing::debug!(request_id = %paths.request_id, %stdout, "converter stdout");
        }
        if !stderr.is_empty() {
            tracing::debug!(request_id = %paths.request_id, %stderr, "converter stderr");
        }

        if !output.status.success() {
            return Err(ConvertError::Failed {
                code: output.status.code(),
                stderr,
            });
        }

        let output_size = if self.config.verify_output {
            match tokio::fs::metadata(&paths.output).await {
                Ok(meta) if meta.is_file() && meta.len() > 0 => Some(meta.len()),
                _ => return Err(ConvertError::MissingOutput(paths.output.clone())),
            }
        } else {
            None
        };

        Ok(ConversionOutcome {
            elapsed,
            output_size,
        })
    }
}
