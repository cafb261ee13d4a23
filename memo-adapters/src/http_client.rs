//! HTTPS client plumbing shared by the HTTP-backed gateways.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hyper::client::HttpConnector;
use hyper::body::to_bytes;
use hyper::header::HeaderMap;
use hyper::{Body, Client, Request, StatusCode, Uri};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use tokio::time::timeout;
use webpki_roots::TLS_SERVER_ROOTS;

use crate::traits::{AdapterError, AdapterResult};

/// Pooled hyper client speaking both plain HTTP and HTTPS.
pub type HyperClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Builds a pooled client trusting the webpki root certificates.
///
/// # Errors
///
/// Currently infallible; the result type leaves room for custom root stores.
#[allow(clippy::unnecessary_wraps)]
pub fn build_https_client() -> AdapterResult<HyperClient> {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let mut http = HttpConnector::new();
    http.enforce_http(false);

    let connector = HttpsConnector::from((http, Arc::new(config)));

    Ok(Client::builder().build::<_, Body>(connector))
}

/// Fully buffered HTTP response.
#[derive(Debug)]
pub struct BufferedResponse {
    /// Response status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl BufferedResponse {
    /// Returns the body as lossy UTF-8, for error messages.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends a request bounded by `deadline` and buffers the response body.
///
/// `service` names the remote side in error messages.
///
/// # Errors
///
/// Returns [`AdapterError::Transport`] when the request times out, fails at
/// the connection level, or the body cannot be read.
pub async fn send(
    client: &HyperClient,
    request: Request<Body>,
    deadline: Duration,
    service: &str,
) -> AdapterResult<BufferedResponse> {
    let response = timeout(deadline, client.request(request))
        .await
        .map_err(|_| AdapterError::transport(format!("{service} request timed out")))?
        .map_err(|err| AdapterError::transport(format!("{service} request failed: {err}")))?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body()).await.map_err(|err| {
        AdapterError::transport(format!("failed to read {service} response: {err}"))
    })?;

    Ok(BufferedResponse {
        status,
        headers,
        body,
    })
}

/// Normalises a base URL: requires an http(s) scheme and a trailing slash.
///
/// # Errors
///
/// Returns [`AdapterError::Configuration`] if the URL is malformed.
pub fn sanitize_base_url(input: &str, service: &str) -> AdapterResult<String> {
    let mut base = input.trim().to_owned();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(AdapterError::configuration(format!(
            "{service} base URL must start with http:// or https://"
        )));
    }
    if !base.ends_with('/') {
        base.push('/');
    }
    base.parse::<Uri>().map_err(|err| {
        AdapterError::configuration(format!("invalid {service} base URL: {err}"))
    })?;
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_requires_scheme() {
        let err = sanitize_base_url("localhost:6333", "Qdrant").expect_err("missing scheme");
        assert!(matches!(err, AdapterError::Configuration { .. }));
    }

    #[test]
    fn base_url_gains_trailing_slash() {
        let base = sanitize_base_url(" http://localhost:6333 ", "Qdrant").unwrap();
        assert_eq!(base, "http://localhost:6333/");
    }
}
