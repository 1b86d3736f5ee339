use crate::link::UsedAction;
use crate::permit::PermitStatus;

/// Error taxonomy for the approval engine.
///
/// The first four variants are expected, user-facing outcomes of clicking a
/// decision link and are logged at info level. `Store` and `Codec` mean the
/// transaction rolled back with no partial state visible.
#[derive(thiserror::Error, Debug)]
pub enum ApprovalError {
    #[error("no approval link matches this token")]
    NotFound,
    #[error("this link has already been used ({0:?})")]
    AlreadyUsed(UsedAction),
    #[error("this link has expired")]
    Expired,
    #[error("the permit is no longer pending approval (current status: {0:?})")]
    InvalidState(PermitStatus),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("storage failure")]
    Store(#[from] sled::Error),
    #[error("codec failure: {0}")]
    Codec(String),
}

impl ApprovalError {
    /// Expected outcomes are surfaced to the recipient as a notice page;
    /// everything else is a system failure.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            ApprovalError::NotFound
                | ApprovalError::AlreadyUsed(_)
                | ApprovalError::Expired
                | ApprovalError::InvalidState(_)
        )
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for ApprovalError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        ApprovalError::Codec(value.to_string())
    }
}

impl From<minicbor::decode::Error> for ApprovalError {
    fn from(value: minicbor::decode::Error) -> Self {
        ApprovalError::Codec(value.to_string())
    }
}
