// Cloud V3 REST client
//
// Bearer-token session against the app API. The session (access + refresh
// token pair) is owned here and rotated in place; `refresh()` is serialised
// so concurrent workers that hit 401 with the same stale token refresh once.

use std::sync::{PoisonError, RwLock};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::cloud::models::{LoginResponse, TokenPair};
use crate::error::Error;
use crate::transport::TransportConfig;

pub const DEFAULT_BASE_URL: &str = "https://app-prod.kumocloud.com";
pub const APP_VERSION: &str = "3.2.4";

/// Access/refresh token pair. Never logged.
#[derive(Clone)]
struct CloudSession {
    access: SecretString,
    refresh: SecretString,
}

/// Async client for the cloud V3 REST API.
pub struct CloudClient {
    http: reqwest::Client,
    base_url: Url,
    session: RwLock<Option<CloudSession>>,
    refresh_lock: Mutex<()>,
}

impl CloudClient {
    /// Build a client for `base_url` (normally [`DEFAULT_BASE_URL`]).
    ///
    /// Injects the `x-app-version` header on every request.
    pub fn new(base_url: &str, transport: &TransportConfig) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert("x-app-version", HeaderValue::from_static(APP_VERSION));
        let http = transport.build_client_with_headers(headers)?;
        Self::with_client(http, base_url)
    }

    /// Wrap an existing `reqwest::Client` (caller manages default headers).
    pub fn with_client(http: reqwest::Client, base_url: &str) -> Result<Self, Error> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http,
            base_url,
            session: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The underlying HTTP client (shared with the realtime session).
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    // ── Session state ────────────────────────────────────────────────

    pub fn is_logged_in(&self) -> bool {
        self.read_session().is_some()
    }

    /// Current access token, if logged in.
    pub fn access_token(&self) -> Option<SecretString> {
        self.read_session().map(|s| s.access)
    }

    /// Install a token pair obtained elsewhere (e.g. a cached session).
    pub fn set_session(&self, access: SecretString, refresh: SecretString) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) =
            Some(CloudSession { access, refresh });
    }

    fn read_session(&self) -> Option<CloudSession> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn current_access(&self) -> Option<String> {
        self.read_session()
            .map(|s| s.access.expose_secret().to_owned())
    }

    /// Account user id from the access token's JWT payload.
    pub fn user_id(&self) -> Option<String> {
        decode_user_id(self.access_token()?.expose_secret())
    }

    // ── Authentication ───────────────────────────────────────────────

    /// `POST v3/login` with `{username, password, appVersion}`.
    ///
    /// Fails on transport errors, non-success statuses, and replies without
    /// an access token.
    pub async fn login(&self, username: &str, password: &SecretString) -> Result<(), Error> {
        let url = self.url("v3/login")?;
        debug!("logging in at {url}");

        let body = json!({
            "username": username,
            "password": password.expose_secret(),
            "appVersion": APP_VERSION,
        });

        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Authentication {
                message: format!("login failed (HTTP {status}): {body}"),
            });
        }

        let text = resp.text().await.map_err(Error::Transport)?;
        let parsed: LoginResponse =
            serde_json::from_str(&text).map_err(|e| Error::deserialization(&e, text))?;
        self.store_tokens(parsed.token, "login")?;

        info!(username, "logged in to cloud");
        Ok(())
    }

    /// Rotate the token pair using the refresh token.
    ///
    /// `POST v3/refresh` authorised by the refresh token itself, body
    /// `{"refresh": <token>}`; both tokens are replaced on success.
    pub async fn refresh(&self) -> Result<(), Error> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// Refresh only if the access token is still `observed`.
    ///
    /// A worker that saw a 401 (or stream rejection) with `observed` waits
    /// for any in-flight refresh; if another worker already rotated the
    /// token there is nothing to do.
    pub async fn refresh_if_current(&self, observed: &str) -> Result<(), Error> {
        let _guard = self.refresh_lock.lock().await;
        if self.current_access().as_deref() != Some(observed) {
            debug!("access token already rotated; skipping refresh");
            return Ok(());
        }
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<(), Error> {
        let session = self.read_session().ok_or(Error::NotLoggedIn)?;
        let url = self.url("v3/refresh")?;
        debug!("refreshing cloud session");

        let resp = self
            .http
            .post(url)
            .bearer_auth(session.refresh.expose_secret())
            .json(&json!({ "refresh": session.refresh.expose_secret() }))
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            warn!(%status, "token refresh refused");
            return Err(Error::Authentication {
                message: format!("refresh failed (HTTP {status})"),
            });
        }

        let text = resp.text().await.map_err(Error::Transport)?;
        let pair: TokenPair =
            serde_json::from_str(&text).map_err(|e| Error::deserialization(&e, text))?;
        self.store_tokens(pair, "refresh")?;
        info!("cloud session refreshed");
        Ok(())
    }

    fn store_tokens(&self, pair: TokenPair, context: &str) -> Result<(), Error> {
        let access = pair
            .access
            .filter(|a| !a.is_empty())
            .ok_or_else(|| Error::Authentication {
                message: format!("{context} response carried no access token"),
            })?;
        let mut guard = self.session.write().unwrap_or_else(PoisonError::into_inner);
        // A refresh reply without a new refresh token keeps the old one.
        let refresh = match (pair.refresh.filter(|r| !r.is_empty()), guard.as_ref()) {
            (Some(r), _) => SecretString::from(r),
            (None, Some(old)) => old.refresh.clone(),
            (None, None) => SecretString::from(String::new()),
        };
        *guard = Some(CloudSession {
            access: SecretString::from(access),
            refresh,
        });
        Ok(())
    }

    // ── Authenticated requests ───────────────────────────────────────

    /// Authenticated GET returning the parsed JSON body.
    ///
    /// On 401 the session is refreshed once and the request retried once;
    /// a second 401 is [`Error::SessionExpired`].
    pub async fn get_json(&self, path: &str) -> Result<Value, Error> {
        let url = self.url(path)?;
        let token = self.current_access().ok_or(Error::NotLoggedIn)?;
        debug!("GET {url}");

        let resp = self.send_get(&url, &token).await?;
        let resp = if resp.status() == StatusCode::UNAUTHORIZED {
            debug!("GET {url} unauthorized; refreshing once");
            self.refresh_if_current(&token).await?;
            let token = self.current_access().ok_or(Error::NotLoggedIn)?;
            let retry = self.send_get(&url, &token).await?;
            if retry.status() == StatusCode::UNAUTHORIZED {
                return Err(Error::SessionExpired);
            }
            retry
        } else {
            resp
        };

        let status = resp.status();
        let text = resp.text().await.map_err(Error::Transport)?;
        if !status.is_success() {
            return Err(Error::CloudApi {
                status: status.as_u16(),
                message: text.chars().take(200).collect(),
            });
        }
        serde_json::from_str(&text).map_err(|e| Error::deserialization(&e, text))
    }

    async fn send_get(&self, url: &Url, token: &str) -> Result<reqwest::Response, Error> {
        self.http
            .get(url.clone())
            .bearer_auth(token)
            .send()
            .await
            .map_err(Error::Transport)
    }
}

/// Decode the `id` claim from a JWT access token without verifying it.
///
/// Returns `None` on any malformed input; never fails loudly.
pub fn decode_user_id(token: &str) -> Option<String> {
    let mut payload = token.split('.').nth(1)?.to_owned();
    while payload.len() % 4 != 0 {
        payload.push('=');
    }
    let bytes = URL_SAFE.decode(payload).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    match claims.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
