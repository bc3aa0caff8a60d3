//! Shared error type for the economy service

use hyper::StatusCode;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, EconomyError>;

/// Every failure an engine or adapter can report.
///
/// Domain variants carry enough context for a useful client message.
/// Upstream, store and internal failures are logged server-side and
/// surfaced with a generic message (see [`EconomyError::public_message`]).
#[derive(Error, Debug)]
pub enum EconomyError {
    // Identity
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("You do not own this {0}")]
    NotOwner(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Input validation
    #[error("{0}")]
    Validation(String),

    // Balance shortfalls
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: i64, available: i64 },

    #[error("Insufficient coins: required {required}, available {available}")]
    InsufficientCoins { required: i64, available: i64 },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("Amount {amount} is below the {plan} plan minimum of {minimum}")]
    InsufficientAmount {
        plan: String,
        amount: i64,
        minimum: i64,
    },

    #[error("Insufficient credit: required {required}, available {available}")]
    InsufficientCredit {
        required: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    // Conflicts
    #[error("A {boost_type} boost is already active on server {server_id}")]
    BoostAlreadyActive { server_id: String, boost_type: String },

    #[error("Daily reward already claimed today")]
    AlreadyClaimed,

    #[error("Current streak protection ({current} days) already covers this level")]
    AlreadyProtected { current: u32 },

    #[error("You cannot claim your own referral code")]
    CannotClaimOwnCode,

    #[error("You have already claimed a referral code")]
    ReferralAlreadyClaimed,

    #[error("Referral code '{0}' is already taken")]
    CodeTaken(String),

    #[error("Checkout session {0} has already been processed")]
    SessionAlreadyProcessed(String),

    #[error("Stake {0} is not active")]
    StakeNotActive(String),

    #[error("Checkout session {0} has not been paid")]
    PaymentIncomplete(String),

    // Lookups
    #[error("Stake not found: {0}")]
    StakeNotFound(String),

    #[error("Boost not found: {0}")]
    BoostNotFound(String),

    #[error("Scheduled boost not found: {0}")]
    ScheduledBoostNotFound(String),

    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("Referral code not found: {0}")]
    ReferralCodeNotFound(String),

    // Infrastructure
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EconomyError {
    /// Stable machine-readable code returned alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::NotOwner(_) => "NOT_OWNER",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::InsufficientCoins { .. } => "INSUFFICIENT_COINS",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::InsufficientAmount { .. } => "INSUFFICIENT_AMOUNT",
            Self::InsufficientCredit { .. } => "INSUFFICIENT_CREDIT",
            Self::BoostAlreadyActive { .. } => "BOOST_ALREADY_ACTIVE",
            Self::AlreadyClaimed => "ALREADY_CLAIMED",
            Self::AlreadyProtected { .. } => "ALREADY_PROTECTED",
            Self::CannotClaimOwnCode => "CANNOT_CLAIM_OWN_CODE",
            Self::ReferralAlreadyClaimed => "REFERRAL_ALREADY_CLAIMED",
            Self::CodeTaken(_) => "CODE_TAKEN",
            Self::SessionAlreadyProcessed(_) => "SESSION_ALREADY_PROCESSED",
            Self::StakeNotActive(_) => "STAKE_NOT_ACTIVE",
            Self::PaymentIncomplete(_) => "PAYMENT_INCOMPLETE",
            Self::StakeNotFound(_) => "STAKE_NOT_FOUND",
            Self::BoostNotFound(_) => "BOOST_NOT_FOUND",
            Self::ScheduledBoostNotFound(_) => "SCHEDULED_BOOST_NOT_FOUND",
            Self::ServerNotFound(_) => "SERVER_NOT_FOUND",
            Self::ReferralCodeNotFound(_) => "REFERRAL_CODE_NOT_FOUND",
            Self::Upstream(_) => "UPSTREAM_FAILURE",
            Self::Timeout(_) => "UPSTREAM_TIMEOUT",
            Self::Store(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status this error maps to at the route boundary
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotOwner(_) | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Validation(_)
            | Self::InsufficientFunds { .. }
            | Self::InsufficientCoins { .. }
            | Self::InsufficientBalance { .. }
            | Self::InsufficientAmount { .. }
            | Self::InsufficientCredit { .. } => StatusCode::BAD_REQUEST,
            Self::BoostAlreadyActive { .. }
            | Self::AlreadyClaimed
            | Self::AlreadyProtected { .. }
            | Self::CannotClaimOwnCode
            | Self::ReferralAlreadyClaimed
            | Self::CodeTaken(_)
            | Self::SessionAlreadyProcessed(_)
            | Self::StakeNotActive(_) => StatusCode::CONFLICT,
            Self::PaymentIncomplete(_) => StatusCode::PAYMENT_REQUIRED,
            Self::StakeNotFound(_)
            | Self::BoostNotFound(_)
            | Self::ScheduledBoostNotFound(_)
            | Self::ServerNotFound(_)
            | Self::ReferralCodeNotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) | Self::Timeout(_) => StatusCode::BAD_GATEWAY,
            Self::Store(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error detail must stay server-side
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Upstream(_)
                | Self::Timeout(_)
                | Self::Store(_)
                | Self::Config(_)
                | Self::Io(_)
                | Self::Json(_)
                | Self::Internal(_)
        )
    }

    /// Message safe to hand to a client
    pub fn public_message(&self) -> String {
        match self {
            Self::Upstream(_) | Self::Timeout(_) => {
                "The hosting panel or payment provider could not be reached".to_string()
            }
            e if e.is_internal() => "Internal server error".to_string(),
            e => e.to_string(),
        }
    }
}

impl From<mongodb::error::Error> for EconomyError {
    fn from(e: mongodb::error::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<reqwest::Error> for EconomyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Upstream(e.to_string())
        }
    }
}
