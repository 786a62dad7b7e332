use thiserror::Error;

/// Core error types for Firelet
#[derive(Debug, Error)]
pub enum Error {
    /// User-correctable configuration problem (bad rule, dangling name, loop, stale token)
    #[error("{0}")]
    Config(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV table could not be parsed or written
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Version control command failed or produced unexpected output
    #[error("Version control error: {message}")]
    Vcs {
        message: String,
        stderr: Option<String>,
    },

    /// Remote connector failure (fetch, delivery, apply)
    #[error("Remote error: {0}")]
    Remote(String),

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for [`Error::Config`]
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Returns true for errors the user can fix by editing the configuration
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Database of common failure patterns and their translations
pub struct ErrorPattern;

impl ErrorPattern {
    /// Matches an error message against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        if lower.contains("must be saved before") {
            return ErrorTranslation::new("There are uncommitted configuration changes")
                .with_suggestion("Commit them: firelet save -m \"<message>\"")
                .with_suggestion("Or discard them: firelet reset");
        }

        if lower.contains("loop") {
            return ErrorTranslation::new("Host group definitions contain a loop")
                .with_suggestion("A host group cannot contain itself, even through other groups")
                .with_suggestion("Inspect the hostgroups table: firelet list hostgroups");
        }

        if lower.contains("not defined") || lower.contains("unknown network") {
            return ErrorTranslation::new("A rule or host refers to an object that does not exist")
                .with_suggestion("Check the spelling of host (hostname:iface) and group names")
                .with_suggestion("List the known names: firelet list hosts, networks, hostgroups");
        }

        if lower.contains("protocol must be the same") {
            return ErrorTranslation::new("Source and destination services use different protocols")
                .with_suggestion("Use services with the same protocol, or '*' on one side");
        }

        if lower.contains("modified in the meantime") {
            return ErrorTranslation::new("The item was changed by someone else")
                .with_suggestion("Reload the configuration and apply your edit again");
        }

        if lower.contains("not available") || lower.contains("missing on host") {
            return ErrorTranslation::new("A managed firewall is unreachable or misconfigured")
                .with_suggestion("Verify SSH connectivity to the management addresses")
                .with_suggestion("Compare the hosts table with 'ip addr show' on the firewall");
        }

        if lower.contains("extra interfaces") {
            return ErrorTranslation::new("Firewalls have interfaces unknown to Firelet")
                .with_suggestion("Add the interfaces to the hosts table")
                .with_suggestion("Or disable stop_on_extra_interfaces in the configuration");
        }

        if lower.contains("not a git repository") || lower.contains("git") {
            return ErrorTranslation::new("Version control operation failed")
                .with_suggestion("Ensure git is installed and the repository is writable");
        }

        ErrorTranslation::new(format!("Firelet error: {msg}"))
            .with_suggestion("Check the detailed error message for more information")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
