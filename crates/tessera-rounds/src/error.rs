use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoundError {
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    TransactionNotValid(String),

    #[error("{0}")]
    TransactionTypeNotRecognized(String),

    #[error("{0}")]
    LateArrivingTransaction(String),

    #[error("signature not valid: {0}")]
    SignatureNotValid(String),

    #[error("{0}")]
    AddBlock(String),

    #[error("{0}")]
    BlockBuilder(String),

    #[error("{0}")]
    MajorityImpossible(String),

    #[error("State error: {0}")]
    State(#[from] tessera_state::StateError),

    #[error("Core error: {0}")]
    Core(#[from] tessera_core::CoreError),
}

impl RoundError {
    pub fn internal(message: impl Into<String>) -> Self {
        RoundError::Internal(message.into())
    }

    /// Short name of the error class, used in transaction responses
    pub fn kind(&self) -> &'static str {
        match self {
            RoundError::Internal(_) => "ABCIAppInternalError",
            RoundError::TransactionNotValid(_) => "TransactionNotValidError",
            RoundError::TransactionTypeNotRecognized(_) => "TransactionTypeNotRecognizedError",
            RoundError::LateArrivingTransaction(_) => "LateArrivingTransaction",
            RoundError::SignatureNotValid(_) => "SignatureNotValidError",
            RoundError::AddBlock(_) => "AddBlockError",
            RoundError::BlockBuilder(_) => "BlockBuilderError",
            RoundError::MajorityImpossible(_) => "ABCIAppException",
            RoundError::State(_) => "StateError",
            RoundError::Core(_) => "CoreError",
        }
    }
}
