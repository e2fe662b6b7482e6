//! HTTP clients for the services agents collaborate with
//!
//! Thin typed wrappers: each call maps to one HTTP request, failures are
//! logged and returned as [`ClientError`] to the caller.

pub mod log_agent;
pub mod vtex;

pub use log_agent::{A2aRelayMessage, AgentRegistration, LogAgentClient};
pub use vtex::{CustomerProfile, VtexClient};

use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Collaborator client failures
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{service} request failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} returned an invalid body: {message}")]
    InvalidBody {
        service: &'static str,
        message: String,
    },

    #[error("Invalid {service} URL: {message}")]
    InvalidUrl {
        service: &'static str,
        message: String,
    },
}

impl ClientError {
    /// HTTP status of the failed call, when the service answered
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            ClientError::Http { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub(crate) fn parse_base_url(service: &'static str, base_url: &str) -> Result<Url, ClientError> {
    let url = Url::parse(base_url).map_err(|e| ClientError::InvalidUrl {
        service,
        message: format!("{base_url}: {e}"),
    })?;

    if url.cannot_be_a_base() {
        return Err(ClientError::InvalidUrl {
            service,
            message: format!("{base_url}: not a base URL"),
        });
    }
    Ok(url)
}

/// Append percent-encoded path segments to `base`, keeping any base path prefix
pub(crate) fn endpoint(
    service: &'static str,
    base: &Url,
    segments: &[&str],
) -> Result<Url, ClientError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ClientError::InvalidUrl {
            service,
            message: base.to_string(),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Read a JSON body, turning non-2xx answers into [`ClientError::Status`].
/// An empty 2xx body reads as `null`.
pub(crate) async fn read_json(
    service: &'static str,
    response: reqwest::Response,
) -> Result<Value, ClientError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| ClientError::Http { service, source })?;

    if !status.is_success() {
        return Err(ClientError::Status {
            service,
            status: status.as_u16(),
            body,
        });
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&body).map_err(|e| ClientError::InvalidBody {
        service,
        message: e.to_string(),
    })
}
