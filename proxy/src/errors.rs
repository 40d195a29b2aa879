use crate::target::TargetError;
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use shared::http::{make_boxed_error_response, make_text_response};
use std::io;

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid target: {0}")]
    Target(#[from] TargetError),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
    #[error("upstream request error: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("upstream did not respond within the configured timeout")]
    UpstreamTimeout,
    #[error("replica resolver error: {0}")]
    Resolver(#[from] replica_resolver::ResolveError),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Target(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Io(_) | ProxyError::InvalidHeader(_) | ProxyError::Resolver(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Client errors carry their message, everything else only the status reason.
    pub fn into_response(self) -> Response<BoxBody<Bytes, ProxyError>> {
        match self {
            ProxyError::Target(err) => make_text_response(StatusCode::BAD_REQUEST, err.to_string()),
            other => make_boxed_error_response(other.status_code()),
        }
    }
}
