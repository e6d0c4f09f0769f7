use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Auth: {0}")]
    Auth(String),
    #[error("Transport: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("Parse: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("ConfigFormat: {0}")]
    ConfigFormat(String),
    #[error("CreateEntry: highlight {highlight_id} could not be stored")]
    CreateEntry {
        highlight_id: i64,
        #[source]
        source: anyhow::Error,
    },
    #[error("Busy: a sync is already in progress")]
    Busy,
    #[error("Store: {0}")]
    Store(#[source] anyhow::Error),
}

impl SyncError {
    pub fn kind(&self) -> &'static str {
        use SyncError::*;
        match self {
            Auth(_) => "auth_error",
            Transport(_) => "transport_error",
            Parse(_) => "parse_error",
            ConfigFormat(_) => "config_format_error",
            CreateEntry { .. } => "create_entry_error",
            Busy => "busy",
            Store(_) => "store_error",
        }
    }

    /// Whether the next scheduled run may succeed without anyone touching the settings.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::Busy)
    }

    pub fn missing_token() -> Self {
        SyncError::Auth("Readwise access token needs to be set in settings".to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        SyncError::Transport(error)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::Parse(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(SyncError::missing_token().kind(), "auth_error");
        assert_eq!(SyncError::Busy.kind(), "busy");
        assert_eq!(SyncError::ConfigFormat("x".into()).kind(), "config_format_error");
    }

    #[test]
    fn parse_error_keeps_source() {
        let err: SyncError = serde_json::from_str::<serde_json::Value>("{nope")
            .unwrap_err()
            .into();
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_retryable());
    }
}
