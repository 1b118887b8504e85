use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{ACCEPT, HeaderName};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use url::Url;

use crate::models::{ItemsResponse, SupportedVersions};
use crate::version::{self, SUPPORTED_VERSIONS};
use crate::{AuthError, RequestError};

const USER_AGENT: &str = concat!("storebench/", env!("CARGO_PKG_VERSION"));

const API_TOKEN: HeaderName = HeaderName::from_static("api-token");
const AUTH_TOKEN: HeaderName = HeaderName::from_static("x-auth-token");

/// Timeout of the unauthenticated version discovery call.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct SessionBuilderInner {
    base_url: Url,
    api_token: SecretString,
    supported_versions: &'static [&'static str],
    reqwest_builder: reqwest::ClientBuilder,
}

/// Builder to create a [`ManagementSession`].
#[must_use]
#[derive(Debug)]
pub struct SessionBuilder(Result<SessionBuilderInner, AuthError>);

impl SessionBuilder {
    /// Creates a new [`SessionBuilder`] for the given management endpoint.
    ///
    /// A bare host name (with optional port) is addressed via HTTPS. An endpoint that already
    /// carries a scheme is used as given.
    pub fn new(endpoint: &str) -> Self {
        let base_url = match parse_endpoint(endpoint) {
            Ok(url) => url,
            Err(source) => {
                return Self(Err(AuthError::InvalidEndpoint {
                    endpoint: endpoint.to_owned(),
                    source,
                }));
            }
        };

        let reqwest_builder = reqwest::Client::builder()
            // Management interfaces ship with self-signed certificates more often than not.
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT);

        Self(Ok(SessionBuilderInner {
            base_url,
            api_token: SecretString::from(String::new()),
            supported_versions: SUPPORTED_VERSIONS,
            reqwest_builder,
        }))
    }

    /// Sets the static API token that is exchanged for a session token on login.
    pub fn api_token(mut self, api_token: impl Into<String>) -> Self {
        if let Ok(ref mut inner) = self.0 {
            inner.api_token = SecretString::from(api_token.into());
        }
        self
    }

    /// Whether to verify the TLS certificate of the management endpoint. Defaults to `false`.
    pub fn verify_certificates(self, verify: bool) -> Self {
        self.configure_reqwest(|builder| builder.danger_accept_invalid_certs(!verify))
    }

    /// Sets the total timeout of every management request.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.configure_reqwest(|builder| builder.timeout(timeout))
    }

    /// Restricts the API versions this session may negotiate, in ascending order of precedence.
    pub fn supported_versions(mut self, versions: &'static [&'static str]) -> Self {
        if let Ok(ref mut inner) = self.0 {
            inner.supported_versions = versions;
        }
        self
    }

    /// Calls the closure with the underlying [`reqwest::ClientBuilder`].
    pub fn configure_reqwest<F>(self, closure: F) -> Self
    where
        F: FnOnce(reqwest::ClientBuilder) -> reqwest::ClientBuilder,
    {
        let Ok(inner) = self.0 else { return self };
        Self(Ok(SessionBuilderInner {
            reqwest_builder: closure(inner.reqwest_builder),
            ..inner
        }))
    }

    /// Negotiates the API version and logs in, returning an authenticated session.
    ///
    /// # Errors
    ///
    /// This method fails if:
    /// - the endpoint is invalid or the [`reqwest::Client`] fails to build
    /// - the target does not answer the version discovery call
    /// - the target supports none of the client's versions
    /// - the login returns a non-success status or no session token
    pub async fn connect(self) -> Result<ManagementSession, AuthError> {
        let inner = self.0?;
        let client = inner.reqwest_builder.build()?;
        let target = inner.base_url.as_str().trim_end_matches('/').to_owned();

        let offered = discover_versions(&client, &inner.base_url)
            .await
            .map_err(|source| AuthError::VersionDiscovery {
                target: target.clone(),
                source,
            })?;
        let version = version::negotiate(inner.supported_versions, &offered.versions)
            .ok_or_else(|| AuthError::NoCommonVersion {
                target: target.clone(),
                offered: offered.versions.clone(),
            })?;
        tracing::debug!(endpoint = %target, version, "negotiated REST API version");

        let mut session = ManagementSession {
            client,
            base_url: inner.base_url,
            target,
            version,
            token: None,
        };
        session.login(&inner.api_token).await?;

        Ok(session)
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, url::ParseError> {
    let mut url = if endpoint.contains("://") {
        Url::parse(endpoint)?
    } else {
        Url::parse(&format!("https://{endpoint}"))?
    };
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

async fn discover_versions(
    client: &reqwest::Client,
    base_url: &Url,
) -> Result<SupportedVersions, reqwest::Error> {
    let url = base_url.join("api/api_version").unwrap_or_else(|_| base_url.clone());
    client
        .get(url)
        .timeout(DISCOVERY_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
}

/// An authenticated session with the management API of a storage array.
///
/// Use [`ManagementSession::builder`] to configure and establish a session. The session token is
/// obtained on connect, attached to every request, and invalidated by [`close`](Self::close).
///
/// All calls take `&self`: the token is read-only after login, so provisioning calls need no
/// locking as long as they are issued by a single coordinator.
#[derive(Debug)]
pub struct ManagementSession {
    client: reqwest::Client,
    base_url: Url,
    target: String,
    version: &'static str,
    token: Option<String>,
}

impl ManagementSession {
    /// Convenience function to create a [`SessionBuilder`].
    pub fn builder(endpoint: &str) -> SessionBuilder {
        SessionBuilder::new(endpoint)
    }

    /// Connects to `endpoint` with default settings and logs in with `api_token`.
    pub async fn connect(endpoint: &str, api_token: &str) -> Result<Self, AuthError> {
        Self::builder(endpoint).api_token(api_token).connect().await
    }

    /// The management endpoint this session talks to.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The negotiated REST API version.
    pub fn version(&self) -> &str {
        self.version
    }

    /// Returns `true` while the session holds a session token.
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    async fn login(&mut self, api_token: &SecretString) -> Result<(), AuthError> {
        let url = self
            .base_url
            .join("api/login")
            .map_err(|source| AuthError::InvalidEndpoint {
                endpoint: self.target.clone(),
                source,
            })?;

        let response = self
            .client
            .post(url)
            .header(API_TOKEN, api_token.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected {
                target: self.target.clone(),
                status,
            });
        }

        let token = response
            .headers()
            .get(AUTH_TOKEN)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AuthError::MissingToken {
                target: self.target.clone(),
            })?;

        self.token = Some(token.to_owned());
        tracing::info!(
            endpoint = %self.target,
            version = self.version,
            "logged in to management API"
        );
        Ok(())
    }

    /// Logs out and forgets the session token.
    ///
    /// This is best-effort: errors are logged and otherwise ignored, as a failed logout must not
    /// abort the caller. Subsequent requests fail with [`RequestError::NotConnected`].
    pub async fn close(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let Ok(url) = self.base_url.join("api/logout") else {
            return;
        };

        match self.client.post(url).header(AUTH_TOKEN, token).send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(status = %response.status(), "logout was not acknowledged");
            }
            Ok(_) => tracing::debug!(endpoint = %self.target, "logged out of management API"),
            Err(error) => {
                tracing::warn!(error = &error as &dyn std::error::Error, "failed to log out");
            }
        }
    }

    /// Issues an authenticated request against `/api/<version>/<path>` and returns the raw body.
    ///
    /// # Errors
    ///
    /// Fails if the session is not authenticated, the transport fails, or the response status is
    /// outside of the `2xx` range.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<Bytes, RequestError> {
        let Some(token) = self.token.as_deref() else {
            return Err(RequestError::NotConnected {
                target: self.target.clone(),
            });
        };

        let url = self
            .base_url
            .join(&format!("api/{}/{path}", self.version))
            .map_err(|source| RequestError::InvalidPath {
                path: path.to_owned(),
                source,
            })?;

        let mut builder = self
            .client
            .request(method.clone(), url)
            .header(AUTH_TOKEN, token)
            .header(ACCEPT, "application/json");
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        tracing::trace!(%method, path, ?query, "sending management request");
        let transport = |source| RequestError::Transport {
            method: method.clone(),
            path: path.to_owned(),
            source,
        };
        let response = builder.send().await.map_err(transport)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(transport)?;

        if !status.is_success() {
            return Err(RequestError::Status {
                method,
                path: path.to_owned(),
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        Ok(bytes)
    }

    /// Issues an authenticated request and decodes the JSON response body.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<T, RequestError> {
        let bytes = self.request(method, path, query, body).await?;
        serde_json::from_slice(&bytes).map_err(|source| RequestError::Decode {
            path: path.to_owned(),
            source,
        })
    }

    /// Lists all items of a collection, following continuation tokens until exhausted.
    pub async fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, RequestError> {
        let mut items = Vec::new();
        let mut continuation = None::<String>;

        loop {
            let mut params = query.to_vec();
            if let Some(token) = continuation.as_deref() {
                params.push(("continuation_token", token));
            }

            let page: ItemsResponse<T> = self
                .request_json(Method::GET, path, &params, None)
                .await?;
            let next = page.continuation_token().map(str::to_owned);
            items.extend(page.items);

            match next {
                Some(token) if continuation.as_deref() != Some(token.as_str()) => {
                    continuation = Some(token)
                }
                _ => break,
            }
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_hosts_use_https() {
        let url = parse_endpoint("10.0.0.1").unwrap();
        assert_eq!(url.as_str(), "https://10.0.0.1/");
        assert_eq!(
            url.join("api/1.3/buckets").unwrap().as_str(),
            "https://10.0.0.1/api/1.3/buckets"
        );
    }

    #[test]
    fn explicit_schemes_are_kept() {
        let url = parse_endpoint("http://localhost:8080").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/");

        let url = parse_endpoint("http://localhost:8080/prefix").unwrap();
        assert_eq!(
            url.join("api/login").unwrap().as_str(),
            "http://localhost:8080/prefix/api/login"
        );
    }

    #[test]
    fn invalid_endpoints_fail_on_connect() {
        let builder = SessionBuilder::new("http://");
        assert!(matches!(builder.0, Err(AuthError::InvalidEndpoint { .. })));
    }
}
