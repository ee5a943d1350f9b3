use memodb_store::StoreError;

/// Errors from evaluation and lazy value handling.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// `evaluate` was called for a function nobody registered.
    #[error("function not registered: {0}")]
    Unregistered(String),

    /// A registered function reported a failure. Failures are delivered
    /// to every current waiter but never cached as call results.
    #[error("function {func} failed: {message}")]
    Failed { func: String, message: String },

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EvalError {
    /// Convenience for function bodies reporting a domain failure.
    pub fn failure(func: impl Into<String>, message: impl Into<String>) -> Self {
        EvalError::Failed {
            func: func.into(),
            message: message.into(),
        }
    }
}

/// Result alias for evaluator operations.
pub type Result<T> = std::result::Result<T, EvalError>;
