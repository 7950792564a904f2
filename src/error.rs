//! Canonical error and result types for the crate.
//!
//! Every fallible operation on a [`GroupCore`](crate::GroupCore) reports one
//! of the [`CoreError`] kinds below. Membership churn (`NotConnected`,
//! `Restart`) and cancellation are ordinary operating conditions for group
//! communication, so they are coded errors rather than panics. Only invariant
//! violations inside the crate panic.

use thiserror::Error;

use crate::{action::ActionType, session::ConnectionState};

/// Top-level error type exposed by `groupframe`.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CoreError {
    /// Session resources could not be allocated or the configuration cannot
    /// be satisfied.
    #[error("failed to allocate session resources: {0}")]
    Resource(String),
    /// The backend could not establish the group connection.
    #[error("failed to connect to group: {0}")]
    Connect(String),
    /// `open` was called on a session that is already open.
    #[error("session is already open")]
    AlreadyOpen,
    /// The backend transiently refused a message; retry the same call.
    #[error("backend refused the message; retry")]
    Retry,
    /// Primary-component membership was lost.
    #[error("not connected to the primary component")]
    NotConnected,
    /// Delivery was interrupted by a view change; resend from the beginning.
    #[error("action delivery interrupted; resend required")]
    Restart,
    /// The session was closed while the operation was in progress.
    #[error("operation cancelled by close")]
    Cancelled,
    /// The operation is not valid in the current connection state.
    #[error("{operation} is not valid while the session is {state}")]
    InvalidState {
        /// Name of the rejected operation.
        operation: &'static str,
        /// State the session was in.
        state: ConnectionState,
    },
    /// The requested packet size cannot carry a single payload byte.
    #[error("packet size {requested} is below the minimum of {minimum}")]
    PacketSizeTooSmall {
        /// Packet size passed by the caller.
        requested: usize,
        /// Smallest packet size the fragment header allows.
        minimum: usize,
    },
    /// A message exceeds the size the session can carry.
    #[error("message of {size} bytes exceeds the limit of {limit}")]
    MessageTooLarge {
        /// Size of the rejected message.
        size: usize,
        /// Applicable limit.
        limit: usize,
    },
    /// The action type is reserved for messages generated by the core.
    #[error("action type {0:?} cannot be sent by the application")]
    ReservedActionType(ActionType),
    /// Encoding a wire message failed.
    #[error("failed to encode message: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    /// Decoding a wire message failed.
    #[error("failed to decode message: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

impl CoreError {
    /// Conventional negative error code for hosts bridging to a C ABI.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::Resource(_) => -12,                  // ENOMEM
            Self::Connect(_) => -111,                  // ECONNREFUSED
            Self::AlreadyOpen => -114,                 // EALREADY
            Self::Retry => -11,                        // EAGAIN
            Self::NotConnected => -107,                // ENOTCONN
            Self::Restart => -85,                      // ERESTART
            Self::Cancelled => -125,                   // ECANCELED
            Self::InvalidState { .. } => -77,          // EBADFD
            Self::PacketSizeTooSmall { .. } => -22,    // EINVAL
            Self::MessageTooLarge { .. } => -90,       // EMSGSIZE
            Self::ReservedActionType(_) => -22,        // EINVAL
            Self::Encode(_) | Self::Decode(_) => -71,  // EPROTO
        }
    }

    /// Returns true for conditions that are part of normal membership churn.
    #[must_use]
    pub fn is_membership_churn(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Restart)
    }
}

/// Canonical result alias used by `groupframe` public APIs.
pub type Result<T> = std::result::Result<T, CoreError>;
