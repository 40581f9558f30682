/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use dropshot::HttpError;
use hyper::StatusCode;

/**
 * Gateway failures, classified by the HTTP status they map to at the
 * mediation layer.  Backends produce the most specific kind they can and
 * the conversion below is the single place status codes are assigned.
 */
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    AuthToken(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    TimeoutLimitExceeded(String),

    #[error("{0}")]
    OutputLimitExceeded(String),

    #[error("{0}")]
    SshConnection(String),

    #[error("{0}")]
    Scheduler(String),

    #[error("{0}")]
    NotImplemented(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::AuthToken(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::TimeoutLimitExceeded(_)
            | Error::OutputLimitExceeded(_)
            | Error::SshConnection(_)
            | Error::Scheduler(_) => StatusCode::BAD_GATEWAY,
            Error::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Error::Config(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<Error> for HttpError {
    fn from(e: Error) -> HttpError {
        let status_code = e.status_code();
        let msg = e.to_string();
        HttpError {
            status_code,
            error_code: None,
            external_message: msg.clone(),
            internal_message: msg,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Error {
        Error::Internal(format!("{:?}", e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
pub type DSResult<T> = std::result::Result<T, HttpError>;

/**
 * Conversions from fallible internal results to dropshot responses.
 */
pub trait OrHttpError<T> {
    fn or_http(self) -> DSResult<T>;
}

impl<T> OrHttpError<T> for Result<T> {
    fn or_http(self) -> DSResult<T> {
        self.map_err(|e| e.into())
    }
}

impl<T> OrHttpError<T> for std::result::Result<T, anyhow::Error> {
    fn or_http(self) -> DSResult<T> {
        self.map_err(|e| {
            HttpError::for_internal_error(format!("internal error: {:?}", e))
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = vec![
            (Error::AuthToken("t".into()), 401),
            (Error::Forbidden("t".into()), 403),
            (Error::BadRequest("t".into()), 400),
            (Error::NotFound("t".into()), 404),
            (Error::PayloadTooLarge("t".into()), 413),
            (Error::ServiceUnavailable("t".into()), 503),
            (Error::TimeoutLimitExceeded("t".into()), 502),
            (Error::OutputLimitExceeded("t".into()), 502),
            (Error::SshConnection("t".into()), 502),
            (Error::Scheduler("t".into()), 502),
            (Error::NotImplemented("t".into()), 501),
            (Error::Internal("t".into()), 500),
        ];

        for (e, want) in cases {
            assert_eq!(e.status_code().as_u16(), want, "{:?}", e);
        }
    }

    #[test]
    fn http_error_carries_message() {
        let he: HttpError =
            Error::ServiceUnavailable("scheduler probe failed".into()).into();
        assert_eq!(he.status_code.as_u16(), 503);
        assert_eq!(he.external_message, "scheduler probe failed");
    }
}
