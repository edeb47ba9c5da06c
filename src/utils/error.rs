use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV export error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Node not found: {reference}")]
    NodeNotFound { reference: String },

    #[error("Node operation rejected: {message}")]
    NodeRejected { message: String },

    #[error("Could not resolve '{host}': {message}")]
    ResolutionError { host: String, message: String },

    #[error("Command '{command}' failed: {message}")]
    CommandError { command: String, message: String },

    #[error("Network interface error: {message}")]
    InterfaceError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Inventory,
    Network,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl MonitorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            MonitorError::ConfigError { .. }
            | MonitorError::ConfigValidationError { .. }
            | MonitorError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            MonitorError::NodeNotFound { .. }
            | MonitorError::NodeRejected { .. }
            | MonitorError::SerializationError(_)
            | MonitorError::CsvError(_) => ErrorCategory::Inventory,
            MonitorError::ResolutionError { .. } | MonitorError::InterfaceError { .. } => {
                ErrorCategory::Network
            }
            MonitorError::IoError(_) | MonitorError::CommandError { .. } => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MonitorError::ResolutionError { .. } | MonitorError::CommandError { .. } => {
                ErrorSeverity::Medium
            }
            MonitorError::IoError(_) | MonitorError::InterfaceError { .. } => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            MonitorError::IoError(_) => {
                "Check that the data directory exists and is writable".to_string()
            }
            MonitorError::SerializationError(_) => {
                "nodes.json looks corrupted; fix it by hand or move it away to start with default nodes"
                    .to_string()
            }
            MonitorError::CsvError(_) => "Check the export destination path".to_string(),
            MonitorError::ConfigError { .. } | MonitorError::ConfigValidationError { .. } => {
                "Review the TOML configuration file".to_string()
            }
            MonitorError::InvalidConfigValueError { field, .. } => {
                format!("Correct the value of '{}'", field)
            }
            MonitorError::NodeNotFound { .. } => {
                "Run `node-monitor nodes list` to see existing node ids and names".to_string()
            }
            MonitorError::NodeRejected { .. } => {
                "Choose a different display name or target node".to_string()
            }
            MonitorError::ResolutionError { .. } => {
                "Verify the hostname and your DNS settings".to_string()
            }
            MonitorError::CommandError { command, .. } => {
                format!("Make sure '{}' is installed and on PATH", command)
            }
            MonitorError::InterfaceError { .. } => {
                "Make sure at least one network interface with an IPv4 address is up".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Inventory => format!("Node inventory problem: {}", self),
            ErrorCategory::Network => format!("Network problem: {}", self),
            ErrorCategory::System => format!("System problem: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
