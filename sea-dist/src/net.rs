//! Centralized logic for initializing http clients to
//! ensure uniform configuration.

use axoasset::reqwest::{
    self,
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT},
};

use crate::errors::{DistError, DistResult};

/// Settings for http clients
///
/// Any settings that should apply to all http requests should
/// be stored here, to avoid different configurations.
#[derive(Clone, Default)]
pub struct ClientSettings {
    /// Bearer token for the release host, if we have one
    pub token: Option<String>,
}

// manual debug impl to prevent anyone adding derive(Debug) and leaking SECRETS
impl std::fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSettings")
            .field("token", &self.token.as_ref().map(|_| "<hidden>"))
            .finish()
    }
}

impl ClientSettings {
    /// Create new ClientSettings using all necessary values
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

/// Create the client used for release-host API calls
///
/// Credentials are attached to every request when present. Without them
/// we proceed anonymously, at a lower rate limit.
pub fn create_api_client(settings: &ClientSettings) -> DistResult<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
    if let Some(token) = &settings.token {
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| DistError::InvalidToken)?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
    }
    create_reqwest_client(headers)
}

/// Create an AxoClient for plain asset downloads
///
/// Downloads are anonymous: release assets redirect to other hosts, and the
/// token must not follow them there.
///
/// Ideally this should be called only once and reused!
pub fn create_axoasset_client() -> DistResult<axoasset::AxoClient> {
    let client = create_reqwest_client(HeaderMap::new())?;
    Ok(axoasset::AxoClient::with_reqwest(client))
}

fn create_reqwest_client(mut headers: HeaderMap) -> DistResult<reqwest::Client> {
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("sea-dist/", env!("CARGO_PKG_VERSION"))),
    );
    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .map_err(|details| DistError::Network {
            url: "<client setup>".to_owned(),
            details,
        })
}
