use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImagenieError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV report error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Template error: {0}")]
    TemplateError(#[from] tera::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for '{field}': {reason} (got '{value}')")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid package specifier '{line}': {reason}")]
    InvalidSpecifier { line: String, reason: String },

    #[error("{tool} exited with {}", code.map(|c| format!("status {}", c)).unwrap_or_else(|| "a signal".to_string()))]
    ToolError {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Required tool not found on PATH: {tool}")]
    ToolNotFound { tool: String },

    #[error("{tool} did not finish within {seconds}s")]
    ToolTimeout { tool: String, seconds: u64 },

    #[error("Docker Hub request failed ({status}): {message}")]
    HubError { status: u16, message: String },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Processing error: {message}")]
    ProcessingError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Input,
    Network,
    Tooling,
    Storage,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// Process exit code used by the CLI for this severity.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

impl ImagenieError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ImagenieError::ConfigError { .. }
            | ImagenieError::InvalidConfigValueError { .. }
            | ImagenieError::MissingConfigError { .. }
            | ImagenieError::TemplateError(_) => ErrorCategory::Configuration,
            ImagenieError::InvalidSpecifier { .. } | ImagenieError::SerializationError(_) => {
                ErrorCategory::Input
            }
            ImagenieError::HttpError(_) | ImagenieError::HubError { .. } => ErrorCategory::Network,
            ImagenieError::ToolError { .. }
            | ImagenieError::ToolNotFound { .. }
            | ImagenieError::ToolTimeout { .. } => ErrorCategory::Tooling,
            ImagenieError::StorageError { .. } | ImagenieError::CsvError(_) => {
                ErrorCategory::Storage
            }
            ImagenieError::IoError(_) | ImagenieError::ProcessingError { .. } => {
                ErrorCategory::System
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ImagenieError::HttpError(_)
            | ImagenieError::HubError { .. }
            | ImagenieError::ToolTimeout { .. } => ErrorSeverity::Medium,
            ImagenieError::ToolError { .. }
            | ImagenieError::InvalidSpecifier { .. }
            | ImagenieError::SerializationError(_)
            | ImagenieError::ProcessingError { .. }
            | ImagenieError::StorageError { .. }
            | ImagenieError::CsvError(_) => ErrorSeverity::High,
            ImagenieError::ConfigError { .. }
            | ImagenieError::InvalidConfigValueError { .. }
            | ImagenieError::MissingConfigError { .. }
            | ImagenieError::TemplateError(_)
            | ImagenieError::ToolNotFound { .. }
            | ImagenieError::IoError(_) => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            ImagenieError::ToolError { tool, stderr, .. } => {
                let hits = crate::core::troubleshoot::diagnose(stderr);
                match hits.first() {
                    Some(symptom) => symptom.remedy.to_string(),
                    None => format!(
                        "Re-run the failing {} command by hand to see the full output",
                        tool
                    ),
                }
            }
            ImagenieError::ToolNotFound { tool } => {
                format!("Install '{}' or point the config at its binary", tool)
            }
            ImagenieError::ToolTimeout { .. } => {
                "Increase tool_timeout_seconds or check the daemon is responsive".to_string()
            }
            ImagenieError::HttpError(_) | ImagenieError::HubError { .. } => {
                "Check network connectivity and the organisation name, then retry".to_string()
            }
            ImagenieError::InvalidSpecifier { .. } => {
                "Fix the package list line; use 'name', 'name==1.0' or 'git+URL@ref'".to_string()
            }
            ImagenieError::ConfigError { .. }
            | ImagenieError::InvalidConfigValueError { .. }
            | ImagenieError::MissingConfigError { .. } => {
                "Review the configuration file and command line flags".to_string()
            }
            ImagenieError::TemplateError(_) => {
                "The Dockerfile template could not be rendered; check extra env and apt values"
                    .to_string()
            }
            ImagenieError::StorageError { .. } | ImagenieError::CsvError(_) => {
                "Check write permissions and credentials for the output location".to_string()
            }
            ImagenieError::IoError(_) => {
                "Check file paths and available disk space".to_string()
            }
            ImagenieError::SerializationError(_) | ImagenieError::ProcessingError { .. } => {
                "Re-run with --verbose for details".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            ImagenieError::ToolError { tool, stderr, .. } => {
                let tail = stderr.lines().last().unwrap_or("").trim();
                if tail.is_empty() {
                    format!("{} failed", tool)
                } else {
                    format!("{} failed: {}", tool, tail)
                }
            }
            ImagenieError::HubError { status, .. } => {
                format!("Docker Hub returned HTTP {}", status)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ImagenieError>;
