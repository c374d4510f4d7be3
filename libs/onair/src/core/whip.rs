// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// WHIP (WebRTC-HTTP Ingestion Protocol) signaling client
//
// HTTP side only: POST the offer, follow redirects, DELETE the resource.
// The peer connection is driven by the session negotiator.

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::header::{self, HeaderMap};
use hyper::{Method, Request, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::{PublishError, Result};

/// Redirect hops followed for a single POST.
const MAX_REDIRECTS: usize = 3;

type HttpClient = hyper_util::client::legacy::Client<
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
    BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>,
>;

// ============================================================================
// WHIP CONFIGURATION
// ============================================================================

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhipConfig {
    pub endpoint_url: String,
    /// Optional Bearer token supplied by the caller.
    pub auth_token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for WhipConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            auth_token: None,
            timeout_ms: 10000,
        }
    }
}

impl std::fmt::Debug for WhipConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhipConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Successful POST outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhipAnswer {
    pub sdp: String,
    /// Absolute URL of the created WHIP resource (from `Location`).
    pub resource_url: Option<String>,
}

// ============================================================================
// WHIP CLIENT
// ============================================================================

pub struct WhipClient {
    config: WhipConfig,
    http_client: HttpClient,
}

impl WhipClient {
    pub fn new(config: WhipConfig) -> Result<Self> {
        // Install rustls crypto provider if needed
        if rustls::crypto::CryptoProvider::get_default().is_none() {
            // Another thread may win the race; that is fine.
            let _ = rustls::crypto::ring::default_provider().install_default();
        }

        let builder = match hyper_rustls::HttpsConnectorBuilder::new().with_native_roots() {
            Ok(builder) => builder,
            Err(e) => {
                tracing::warn!(
                    "[WhipClient] Failed to load native CA roots ({}), using bundled webpki roots",
                    e
                );
                hyper_rustls::HttpsConnectorBuilder::new().with_webpki_roots()
            }
        };
        let https = builder.https_or_http().enable_http1().enable_http2().build();

        let http_client =
            hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
                .pool_idle_timeout(Duration::from_secs(30))
                .build(https);

        tracing::debug!(
            "[WhipClient] Created client for endpoint: {}",
            config.endpoint_url
        );

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn endpoint_url(&self) -> &str {
        &self.config.endpoint_url
    }

    /// POST an SDP offer. Any 2xx is success; 307/308 are followed.
    pub async fn post_offer(&self, sdp_offer: &str) -> Result<WhipAnswer> {
        let mut url = self.config.endpoint_url.clone();

        for hop in 0..=MAX_REDIRECTS {
            tracing::debug!("[WhipClient] POST to {}", url);
            let (status, headers, body) = self
                .send(Method::POST, &url, Some(sdp_offer.to_owned()))
                .await?;

            if status == StatusCode::TEMPORARY_REDIRECT || status == StatusCode::PERMANENT_REDIRECT
            {
                let location = header_str(&headers, header::LOCATION).ok_or_else(|| {
                    PublishError::Negotiation(format!("HTTP {} without Location header", status))
                })?;
                let next = resolve_location(&url, location);
                tracing::info!(
                    "[WhipClient] Redirect {}/{} to: {}",
                    hop + 1,
                    MAX_REDIRECTS,
                    next
                );
                url = next;
                continue;
            }

            if !status.is_success() {
                tracing::warn!(
                    "[WhipClient] POST rejected ({}): {}",
                    status,
                    String::from_utf8_lossy(&body)
                );
                return Err(PublishError::Rejected(status.as_u16()));
            }

            let sdp = String::from_utf8(body.to_vec()).map_err(|e| {
                PublishError::Negotiation(format!("Invalid UTF-8 in SDP answer: {}", e))
            })?;
            if sdp.trim().is_empty() {
                return Err(PublishError::Negotiation(format!(
                    "HTTP {} with empty SDP answer",
                    status
                )));
            }

            let resource_url =
                header_str(&headers, header::LOCATION).map(|loc| resolve_location(&url, loc));
            match &resource_url {
                Some(resource) => tracing::info!("[WhipClient] Session created: {}", resource),
                None => tracing::warn!("[WhipClient] HTTP {} without Location header", status),
            }

            return Ok(WhipAnswer {
                sdp,
                resource_url,
            });
        }

        Err(PublishError::Network(format!(
            "Too many redirects (more than {})",
            MAX_REDIRECTS
        )))
    }

    /// DELETE the WHIP resource to end the ingest session.
    pub async fn delete_resource(&self, resource_url: &str) -> Result<()> {
        tracing::debug!("[WhipClient] DELETE {}", resource_url);
        let (status, _, _) = self.send(Method::DELETE, resource_url, None).await?;

        if status.is_success() || status == StatusCode::NOT_FOUND {
            tracing::info!("[WhipClient] Session terminated ({})", status);
            Ok(())
        } else {
            Err(PublishError::Rejected(status.as_u16()))
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        sdp: Option<String>,
    ) -> Result<(StatusCode, HeaderMap, Bytes)> {
        let body = Full::new(sdp.clone().map(Bytes::from).unwrap_or_default());
        let boxed_body = body.map_err(|never| match never {}).boxed();

        let mut req_builder = Request::builder().method(method.clone()).uri(url);
        if sdp.is_some() {
            req_builder = req_builder.header(header::CONTENT_TYPE, "application/sdp");
        }
        if let Some(token) = &self.config.auth_token {
            req_builder = req_builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let req = req_builder.body(boxed_body).map_err(|e| {
            PublishError::Configuration(format!("Invalid WHIP request to '{}': {}", url, e))
        })?;

        let response = tokio::time::timeout(
            Duration::from_millis(self.config.timeout_ms),
            self.http_client.request(req),
        )
        .await
        .map_err(|_| {
            PublishError::Network(format!(
                "WHIP {} timed out after {}ms",
                method, self.config.timeout_ms
            ))
        })?
        .map_err(|e| PublishError::Network(format!("WHIP {} failed: {}", method, e)))?;

        let status = response.status();
        let headers = response.headers().clone();

        let body_bytes = BodyExt::collect(response.into_body())
            .await
            .map_err(|e| PublishError::Network(format!("Failed to read response: {}", e)))?
            .to_bytes();

        Ok((status, headers, body_bytes))
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Resolve a `Location` value against the URL of the request that returned it.
pub(crate) fn resolve_location(request_url: &str, location: &str) -> String {
    if location.contains("://") {
        return location.to_owned();
    }
    if location.starts_with('/') {
        let origin = request_url.split('/').take(3).collect::<Vec<_>>().join("/");
        return format!("{}{}", origin, location);
    }
    match request_url.rfind('/') {
        Some(i) if i > request_url.find("://").map(|s| s + 2).unwrap_or(0) => {
            format!("{}/{}", &request_url[..i], location)
        }
        _ => format!("{}/{}", request_url.trim_end_matches('/'), location),
    }
}
