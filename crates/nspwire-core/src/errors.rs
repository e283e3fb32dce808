use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::directive::Role;

/// Literal message carried by emit timeouts.
pub const EMIT_TIMEOUT: &str = "emitTimeout";

/// One failed emit, as surfaced in the per-namespace error lists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub evt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
    pub timestamp: String,
}

impl ErrorRecord {
    pub fn new(message: impl Into<String>, evt: impl Into<String>, msg: Option<Value>) -> Self {
        Self {
            message: message.into(),
            evt: evt.into(),
            msg,
            details: Map::new(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details = details;
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.message.clone())
    }
}

/// Rejections of an emit request. Never fatal to the engine.
#[derive(Clone, Debug, thiserror::Error)]
pub enum EmitError {
    #[error("emitTimeout")]
    Timeout { evt: String, after: Duration },

    /// Structured application error returned through the ack channel.
    #[error("{}", .record.to_json())]
    Ack { record: ErrorRecord },

    /// Plain application error returned through the ack channel.
    #[error("{}", .record.message)]
    Remote { record: ErrorRecord },

    #[error("connection closed before '{evt}' was acknowledged")]
    Disconnected { evt: String },

    #[error("socket instance required. Please provide a valid socket label or socket instance")]
    MissingConnection,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl EmitError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The record appended to the error list for this rejection.
    pub fn to_record(&self, evt: &str, msg: Option<&Value>) -> ErrorRecord {
        match self {
            Self::Ack { record } | Self::Remote { record } => record.clone(),
            Self::Timeout { .. } => ErrorRecord::new(EMIT_TIMEOUT, evt, msg.cloned()),
            other => ErrorRecord::new(other.to_string(), evt, msg.cloned()),
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Ack { .. } => "ack",
            Self::Remote { .. } => "remote",
            Self::Disconnected { .. } => "disconnected",
            Self::MissingConnection => "missing_connection",
            Self::Transport(_) => "transport",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection {connection} is not connected, cannot emit '{event}'")]
    NotConnected { connection: String, event: String },

    #[error("connect to {url} failed: {reason}")]
    ConnectFailed { url: String, reason: String },
}

/// Raised synchronously while wiring bindings.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error(
        "[nspwire]: Trying to register emitback {target} failed\nbecause it is not defined in {origin}.\nIs {origin} set up before wiring?"
    )]
    MissingEmitBackSource { target: String, origin: String },

    #[error("{role} '{action}' is already registered in scope {scope}")]
    Duplicate {
        scope: String,
        role: Role,
        action: String,
    },
}

/// Failure raised by a hook or handler. Hooks never abort the engine.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
}

impl From<String> for HandlerError {
    fn from(s: String) -> Self {
        Self::Failed(s)
    }
}

impl From<&str> for HandlerError {
    fn from(s: &str) -> Self {
        Self::Failed(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timeout_message_is_literal() {
        let err = EmitError::Timeout {
            evt: "noHandler".into(),
            after: Duration::from_millis(100),
        };
        assert_eq!(err.to_string(), "emitTimeout");
        assert!(err.is_timeout());
        let record = err.to_record("noHandler", None);
        assert_eq!(record.message, "emitTimeout");
        assert_eq!(record.evt, "noHandler");
    }

    #[test]
    fn ack_error_displays_json() {
        let mut details = Map::new();
        details.insert("code".into(), json!(400));
        let record = ErrorRecord::new("badRequest...Input does not match schema", "badRequest", None)
            .with_details(details);
        let err = EmitError::Ack { record };
        let parsed: Value = serde_json::from_str(&err.to_string()).unwrap();
        assert_eq!(parsed["message"], "badRequest...Input does not match schema");
        assert_eq!(parsed["details"]["code"], 400);
    }

    #[test]
    fn remote_error_displays_plain_message() {
        let err = EmitError::Remote {
            record: ErrorRecord::new("SomeError", "echoError", None),
        };
        assert_eq!(err.to_string(), "SomeError");
        assert_eq!(err.error_kind(), "remote");
    }

    #[test]
    fn missing_connection_message() {
        assert_eq!(
            EmitError::MissingConnection.to_string(),
            "socket instance required. Please provide a valid socket label or socket instance"
        );
    }

    #[test]
    fn missing_emit_back_names_target() {
        let err = BindingError::MissingEmitBackSource {
            target: "xyz".into(),
            origin: "the store".into(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("[nspwire]: Trying to register emitback xyz failed\n"));
        assert!(msg.contains("not defined in the store"));
    }

    #[test]
    fn record_serializes_without_empty_fields() {
        let record = ErrorRecord::new("boom", "evt", None);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("msg").is_none());
        assert!(json.get("details").is_none());
        assert_eq!(json["message"], "boom");
    }
}
