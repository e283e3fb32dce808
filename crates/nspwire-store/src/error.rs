#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown mutation: {0}")]
    UnknownMutation(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("action {name} failed: {message}")]
    Action { name: String, message: String },
}
