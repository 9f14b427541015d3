use std::fmt::{self, Display, Formatter};
use std::io::Error as IoError;

use log::error;
#[cfg(feature = "mongo")]
use mongodb::error::Error as DbError;
use rocket::{
    http::Status,
    response::{self, Responder},
    serde::json::Json,
    Request,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::redact_path;
use crate::model::ValidationError;
use crate::store::RecordKey;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The record does not exist.
    #[error("Not found: {0}")]
    NotFound(RecordKey),
    /// A vote has already been stored for this ticket. This is the expected
    /// outcome of a lost double-submit race.
    #[error("Vote already cast: {0}")]
    AlreadyExists(RecordKey),
    /// A freshly generated key collided with an existing record.
    #[error("Key collision: {0}")]
    Conflict(RecordKey),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The request body could not be read as a ballot. Never carries the body.
    #[error("Malformed ballot: {0}")]
    Malformed(String),
    #[error("Forbidden: {0}")]
    Forbidden(ForbiddenReason),
    /// The stored record could not be decoded.
    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: RecordKey, reason: String },
    #[error("Storage error: {0}")]
    Storage(#[from] IoError),
    #[cfg(feature = "mongo")]
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for failures of the deployment itself, as opposed to the expected
    /// outcomes of legitimate or malicious use.
    pub fn is_operational(&self) -> bool {
        match self {
            Self::NotFound(_)
            | Self::AlreadyExists(_)
            | Self::Validation(_)
            | Self::Malformed(_)
            | Self::Forbidden(_) => false,
            Self::Conflict(_) | Self::Corrupt { .. } | Self::Storage(_) | Self::Config(_) => true,
            #[cfg(feature = "mongo")]
            Self::Database(_) => true,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::NotFound(_) => Status::NotFound,
            Self::AlreadyExists(_) => Status::Conflict,
            Self::Validation(_) | Self::Malformed(_) => Status::BadRequest,
            Self::Forbidden(_) => Status::Forbidden,
            _ => Status::InternalServerError,
        }
    }
}

/// Why a ticket holder was turned away.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ForbiddenReason {
    /// The presented token does not belong to the ticket.
    TokenMismatch,
    /// The ticket has already been used to vote.
    AlreadyRedeemed,
}

impl Display for ForbiddenReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenMismatch => write!(f, "invalid ticket token"),
            Self::AlreadyRedeemed => write!(f, "ticket already used"),
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        let body = if self.is_operational() {
            // Details stay in the log.
            let path = redact_path(req.uri().path().as_str());
            error!("{} {path}: {self}", req.method());
            ErrorBody::new(status.reason_lossy())
        } else {
            ErrorBody::new(self.to_string())
        };
        (status, Json(body)).respond_to(req)
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{Id, ProposalId};

    use super::*;

    #[test]
    fn expected_outcomes_are_not_operational() {
        let key = RecordKey::vote(Id::new(), Id::new());

        assert!(!Error::AlreadyExists(key).is_operational());
        assert!(!Error::NotFound(key).is_operational());
        assert!(!Error::Forbidden(ForbiddenReason::TokenMismatch).is_operational());
        assert!(!Error::from(ValidationError::MissingVoteOption {
            proposal_id: ProposalId::new()
        })
        .is_operational());
        assert!(!Error::Malformed("expected `,`".to_string()).is_operational());

        assert!(Error::Conflict(key).is_operational());
        assert!(Error::Corrupt {
            key,
            reason: "EOF".to_string()
        }
        .is_operational());
        assert!(Error::from(IoError::from(std::io::ErrorKind::PermissionDenied)).is_operational());
    }

    #[test]
    fn status_codes() {
        let key = RecordKey::ticket(Id::new(), Id::new());

        assert_eq!(Error::NotFound(key).status(), Status::NotFound);
        assert_eq!(Error::AlreadyExists(key).status(), Status::Conflict);
        assert_eq!(
            Error::Forbidden(ForbiddenReason::AlreadyRedeemed).status(),
            Status::Forbidden
        );
        assert_eq!(
            Error::from(ValidationError::InvalidVoteOption {
                proposal_id: ProposalId::new(),
                value: "maybe".to_string()
            })
            .status(),
            Status::BadRequest
        );
        assert_eq!(
            Error::Malformed("expected `,`".to_string()).status(),
            Status::BadRequest
        );
        assert_eq!(Error::Conflict(key).status(), Status::InternalServerError);
    }

    #[test]
    fn messages_identify_the_offender() {
        let proposal_id: ProposalId = "P1".parse().unwrap();
        let message = Error::from(ValidationError::MissingVoteOption { proposal_id }).to_string();
        assert_eq!(message, "Missing vote option for proposal P1");

        let (assembly_id, ticket_id) = (Id::new(), Id::new());
        let message = Error::AlreadyExists(RecordKey::vote(assembly_id, ticket_id)).to_string();
        assert!(message.contains(&assembly_id.to_string()));
        assert!(message.contains(&ticket_id.to_string()));
    }
}
