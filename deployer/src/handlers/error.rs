use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use whaleray_common::models::error::ApiError;
use whaleray_provisioner::Error as DatabaseError;

use crate::dal::DalError;
use crate::github::GithubError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Service not found")]
    ServiceNotFound,
    #[error(transparent)]
    Pipeline(#[from] crate::error::Error),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Dal(#[from] DalError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::ServiceNotFound => StatusCode::NOT_FOUND,
            Error::Pipeline(crate::error::Error::MalformedRepositoryName) => {
                StatusCode::BAD_REQUEST
            }
            Error::Pipeline(crate::error::Error::InstallationNotFound) => StatusCode::NOT_FOUND,
            Error::Pipeline(crate::error::Error::Github(GithubError::InstallationGone)) => {
                StatusCode::NOT_FOUND
            }
            Error::Pipeline(crate::error::Error::Github(_)) => StatusCode::BAD_GATEWAY,
            Error::Database(DatabaseError::AlreadyExists) => StatusCode::CONFLICT,
            Error::Database(DatabaseError::NotFound) => StatusCode::NOT_FOUND,
            Error::Database(DatabaseError::NotImplemented) => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let code = self.status_code();
        let body = if code.is_server_error() {
            ApiError::with_message("Internal server error", self.to_string())
        } else {
            ApiError::new(self.to_string())
        };

        (
            code,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )],
            Json(body),
        )
            .into_response()
    }
}
