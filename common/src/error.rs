use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("node {0} does not exist")]
    NodeNotFound(String),
    #[error("backend {0} does not exist")]
    BackendNotFound(String),
    #[error("found no FS '{0}'")]
    FsNotFound(String),
    #[error("group {0} is not found")]
    GroupNotFound(u64),
    #[error("couple {0} is not found")]
    CoupleNotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("stats document rejected: {0}")]
    StatsRejected(String),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = match self {
            ApiError::NodeNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BackendNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::FsNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::GroupNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::CoupleNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ApiError::StatsRejected(_) => StatusCode::BAD_REQUEST,
            ApiError::Any(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status_code, self.to_string()).into_response()
    }
}
