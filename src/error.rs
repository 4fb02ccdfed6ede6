//! Structured error taxonomy for the return-computation core.
//!
//! The engine raises immediately on `InvalidTwrInput`/`InvalidBasisOperation`;
//! the replay driver annotates with transaction context and re-raises. No
//! partial state is ever visible to the caller for these two variants.
//!
//! `MissingPrice` is a recovered condition, not a hard failure: callers that
//! want to surface it may do so, but the driver itself carries the last
//! known mark forward. `DeterminismViolation` only fires behind
//! `debug_assertions`.

use chrono::NaiveDate;

pub type TwrResult<T> = Result<T, TwrError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TwrError {
    #[error("invalid TWR input{}: {message}", transaction_id.as_deref().map(|id| format!(" (transaction {id})")).unwrap_or_default())]
    InvalidTwrInput {
        transaction_id: Option<String>,
        message: String,
    },

    #[error("invalid basis operation on {ticker}: {message}")]
    InvalidBasisOperation { ticker: String, message: String },

    #[error("no price available for {ticker} on {date} and no prior mark exists")]
    MissingPrice { ticker: String, date: NaiveDate },

    #[error("determinism violation: {message}")]
    DeterminismViolation { message: String },
}

impl TwrError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidTwrInput {
            transaction_id: None,
            message: message.into(),
        }
    }

    pub fn invalid_input_for(transaction_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTwrInput {
            transaction_id: Some(transaction_id.into()),
            message: message.into(),
        }
    }

    pub fn invalid_basis(ticker: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidBasisOperation {
            ticker: ticker.into(),
            message: message.into(),
        }
    }
}
