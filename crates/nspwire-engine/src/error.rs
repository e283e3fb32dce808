use nspwire_core::{BindingError, EmitError, HandlerError, TransportError};
use nspwire_settings::ConfigError;
use nspwire_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("no callable named '{0}'")]
    UnknownCallable(String),

    #[error("invalid API descriptor: {0}")]
    InvalidDescriptor(String),
}

impl EngineError {
    /// The emit rejection, when this error is one.
    pub fn as_emit(&self) -> Option<&EmitError> {
        match self {
            Self::Emit(e) => Some(e),
            _ => None,
        }
    }
}
