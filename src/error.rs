use jsonwebtoken::errors::Error as JwtError;
use mongodb::error::Error as DbError;
use rocket::{
    http::{Status, StatusClass},
    response::{self, status::Custom, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid voter details: {0}")]
    InvalidProfile(String),
    #[error("This student has already voted")]
    AlreadyVoted,
    #[error("A voting session is already in progress for this student")]
    SessionInProgress,
    #[error("Voting session has expired, please verify again")]
    SessionExpired,
    #[error("Too many requests, please try again later")]
    RateLimited,
    #[error("Voting is currently disabled")]
    VotingDisabled,
    #[error("Please select at least one candidate")]
    NoSelection,
    #[error("This vote is already being processed")]
    SubmissionInProgress,
    #[error("Failed to record vote: {0}")]
    CommitFailed(String),
    #[error("Administrator authentication required")]
    Unauthorized,
    #[error("{1}")]
    Status(Status, String),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
}

impl Error {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::Status(Status::BadRequest, msg.into())
    }

    /// The HTTP status this error is reported with.
    pub fn status(&self) -> Status {
        match self {
            Self::InvalidProfile(_) | Self::NoSelection => Status::BadRequest,
            Self::SessionExpired | Self::Unauthorized | Self::Jwt(_) => Status::Unauthorized,
            Self::VotingDisabled => Status::Forbidden,
            Self::AlreadyVoted | Self::SessionInProgress | Self::SubmissionInProgress => {
                Status::Conflict
            }
            Self::RateLimited => Status::TooManyRequests,
            Self::CommitFailed(_) => Status::ServiceUnavailable,
            Self::Status(status, _) => *status,
            Self::Db(_) => Status::InternalServerError,
        }
    }

    /// Machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidProfile(_) => "InvalidProfile",
            Self::AlreadyVoted => "AlreadyVoted",
            Self::SessionInProgress => "SessionInProgress",
            Self::SessionExpired => "SessionExpired",
            Self::RateLimited => "RateLimited",
            Self::VotingDisabled => "VotingDisabled",
            Self::NoSelection => "NoSelection",
            Self::SubmissionInProgress => "SubmissionInProgress",
            Self::CommitFailed(_) => "CommitFailed",
            Self::Unauthorized | Self::Jwt(_) => "Unauthorized",
            Self::Status(status, _) if status.class() == StatusClass::ServerError => "Internal",
            Self::Status(_, _) => "BadRequest",
            Self::Db(_) => "Internal",
        }
    }
}

/// Body of every failed response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_voted: Option<bool>,
    pub error: &'static str,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        let message = match err {
            // Don't leak driver internals to clients.
            Error::Db(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        Self {
            success: false,
            has_voted: matches!(err, Error::AlreadyVoted).then_some(true),
            error: err.kind(),
            message,
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        if status.class() == StatusClass::ServerError {
            error!("{self}");
        } else {
            debug!("Request refused: {self}");
        }
        Custom(status, Json(ErrorBody::from(&self))).respond_to(req)
    }
}
