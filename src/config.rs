// Session configuration
//
// Defaults are compiled in (the `binary-trace` feature picks the encoding);
// a TOML file and environment variables can override them per run.

use crate::error::{Result, TraceError};
use crate::format::Encoding;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Names a TOML file to load before applying the other overrides
pub const ENV_CONFIG: &str = "CHAINTRACE_CONFIG";
pub const ENV_OUTPUT: &str = "CHAINTRACE_OUTPUT";
pub const ENV_FORMAT: &str = "CHAINTRACE_FORMAT";
pub const ENV_VERBOSE: &str = "CHAINTRACE_VERBOSE";

/// Configuration for one traced session
///
/// # Example
/// ```
/// use chaintrace::config::TraceConfig;
/// use chaintrace::format::Encoding;
///
/// let config = TraceConfig::default()
///     .with_output("run.trc")
///     .with_encoding(Encoding::Text);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TraceConfig {
    /// Trace file, opened in append mode at session end
    pub output: PathBuf,

    /// Wire format of the trace file
    pub encoding: Encoding,

    /// Emit diagnostics on stderr through `tracing`
    pub verbose: bool,

    /// Slots added to a full child list; growth is linear, not doubling
    pub child_growth: usize,

    /// Install the crash-safety signal handlers at session start
    pub install_signal_handlers: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        let encoding = Encoding::default();
        Self {
            output: PathBuf::from(encoding.default_file_name()),
            encoding,
            verbose: false,
            child_growth: 4,
            install_signal_handlers: true,
        }
    }
}

impl TraceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = path.into();
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_child_growth(mut self, growth: usize) -> Self {
        self.child_growth = growth;
        self
    }

    pub fn with_signal_handlers(mut self, install: bool) -> Self {
        self.install_signal_handlers = install;
        self
    }

    /// Load a configuration file
    ///
    /// # Example TOML
    /// ```toml
    /// output = "/tmp/host.bchains"
    /// encoding = "binary"
    /// verbose = true
    /// child_growth = 8
    /// ```
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            TraceError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TraceConfig = toml::from_str(content)
            .map_err(|e| TraceError::Config(format!("Failed to parse TOML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then `CHAINTRACE_CONFIG`, then the per-field variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match lookup(ENV_CONFIG) {
            Some(path) if !path.is_empty() => Self::from_toml(path)?,
            _ => Self::default(),
        };

        let explicit_output = lookup(ENV_OUTPUT).filter(|v| !v.is_empty());
        if let Some(format) = lookup(ENV_FORMAT).filter(|v| !v.is_empty()) {
            let encoding: Encoding = format.parse().map_err(TraceError::Config)?;
            // Keep the file name in step with the encoding unless one was given
            if config.output == Path::new(config.encoding.default_file_name())
                && explicit_output.is_none()
            {
                config.output = PathBuf::from(encoding.default_file_name());
            }
            config.encoding = encoding;
        }
        if let Some(output) = explicit_output {
            config.output = PathBuf::from(output);
        }
        if let Some(verbose) = lookup(ENV_VERBOSE) {
            config.verbose = matches!(
                verbose.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.child_growth == 0 {
            return Err(TraceError::Config(
                "child_growth must be > 0".to_string(),
            ));
        }
        if self.output.as_os_str().is_empty() {
            return Err(TraceError::Config("output path is empty".to_string()));
        }
        Ok(())
    }
}
