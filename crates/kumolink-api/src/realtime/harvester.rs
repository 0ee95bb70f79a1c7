// Adapter password harvesting over the cloud realtime channel.
//
// V3 never returns adapter passwords over REST. They only appear inside
// `adapter_update` events on the Socket.IO stream, and the server only emits
// those after an account-level subscribe, per-device subscribes and explicit
// "force adapter request" packets. This module drives that exchange over the
// long-polling transport and collects whatever passwords arrive before the
// deadline.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use secrecy::ExposeSecret;
use strum::Display;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::cloud::{CloudClient, decode_user_id};
use crate::error::Error;
use crate::realtime::codec::{self, Frame};

pub const DEFAULT_SOCKET_URL: &str = "https://socket-prod.kumocloud.com";

const SOCKET_PATH: &str = "socket.io/";
const POST_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

// ── Configuration ────────────────────────────────────────────────────

/// Timing and endpoint settings for one harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestConfig {
    pub socket_url: String,
    /// Overall budget for the harvest, retries included.
    pub deadline: Duration,
    /// Upper bound on a single long-poll GET.
    pub max_poll: Duration,
    pub handshake_timeout: Duration,
    /// Timeout for POSTs and the short polls during setup.
    pub request_timeout: Duration,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            socket_url: DEFAULT_SOCKET_URL.to_owned(),
            deadline: Duration::from_secs(60),
            max_poll: Duration::from_secs(25),
            handshake_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(10),
        }
    }
}

// ── Outcome ──────────────────────────────────────────────────────────

/// Session progress. The last four variants (plus `Collected`) are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum HarvestState {
    Disconnected,
    Handshaking,
    NamespaceConnecting,
    SubscribingAccount,
    SubscribingDevices,
    ForcingUpdates,
    Polling,
    Collected,
    TimedOut,
    Rejected,
    Cancelled,
    Failed,
}

impl HarvestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Collected | Self::TimedOut | Self::Rejected | Self::Cancelled | Self::Failed
        )
    }
}

/// Result of a harvest: serial → password (as sent by the cloud, base64).
///
/// Partial results are normal; absent serials are unresolved, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Harvest {
    pub passwords: BTreeMap<String, String>,
    pub state: HarvestState,
    pub polls: usize,
}

impl Harvest {
    fn empty(state: HarvestState) -> Self {
        Self {
            passwords: BTreeMap::new(),
            state,
            polls: 0,
        }
    }
}

// ── Harvester ────────────────────────────────────────────────────────

/// Collects adapter passwords for a set of serials.
pub struct CredentialHarvester<'a> {
    cloud: &'a CloudClient,
    config: HarvestConfig,
    cancel: CancellationToken,
}

enum SessionEnd {
    /// Namespace connect answered with a connect-error packet.
    Rejected,
    Finished(HarvestState),
}

impl<'a> CredentialHarvester<'a> {
    pub fn new(cloud: &'a CloudClient, config: HarvestConfig) -> Self {
        Self {
            cloud,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the polling loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Run a session (plus at most one retry after a stream rejection) and
    /// return whatever passwords arrived.
    ///
    /// Never fails: transport and protocol problems end the session with
    /// state `Failed` and the passwords collected so far.
    pub async fn harvest<S: AsRef<str>>(&self, serials: &[S]) -> Harvest {
        let wanted: BTreeSet<String> = serials
            .iter()
            .map(|s| s.as_ref().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
        if wanted.is_empty() {
            return Harvest::empty(HarvestState::Collected);
        }

        let deadline = Instant::now() + self.config.deadline;
        let mut harvest = Harvest::empty(HarvestState::Disconnected);

        for attempt in 0..2 {
            let Some(token) = self.cloud.access_token() else {
                warn!("not logged in; cannot open realtime session");
                return Harvest::empty(HarvestState::Failed);
            };
            let token = token.expose_secret().to_owned();

            match self.run_session(&token, &wanted, deadline, &mut harvest).await {
                Ok(SessionEnd::Finished(state)) => {
                    harvest.state = state;
                    break;
                }
                Ok(SessionEnd::Rejected) if attempt == 0 => {
                    info!("realtime namespace rejected; refreshing token");
                    if let Err(e) = self.cloud.refresh_if_current(&token).await {
                        warn!(error = %e, "token refresh failed after stream rejection");
                        return Harvest::empty(HarvestState::Rejected);
                    }
                }
                Ok(SessionEnd::Rejected) => {
                    warn!("realtime namespace rejected twice; giving up");
                    return Harvest::empty(HarvestState::Rejected);
                }
                Err(e) => {
                    warn!(error = %e, "realtime session failed");
                    harvest.state = HarvestState::Failed;
                    break;
                }
            }
        }

        info!(
            found = harvest.passwords.len(),
            wanted = wanted.len(),
            polls = harvest.polls,
            state = %harvest.state,
            "realtime harvest finished"
        );
        harvest
    }

    async fn run_session(
        &self,
        token: &str,
        wanted: &BTreeSet<String>,
        deadline: Instant,
        harvest: &mut Harvest,
    ) -> Result<SessionEnd, Error> {
        if self.cancel.is_cancelled() {
            return Ok(SessionEnd::Finished(HarvestState::Cancelled));
        }

        enter(HarvestState::Handshaking);
        let mut session = PollingSession::new(self.cloud.http().clone(), &self.config, token)?;
        session.handshake().await?;

        enter(HarvestState::NamespaceConnecting);
        session.post(codec::CONNECT).await?;
        let body = self.setup_poll(&session, deadline).await?;
        let frames = codec::decode(&body);
        if frames.iter().any(|f| matches!(f, Frame::ConnectError)) {
            return Ok(SessionEnd::Rejected);
        }
        self.absorb(&session, &frames, wanted, harvest).await;

        enter(HarvestState::SubscribingAccount);
        match decode_user_id(token) {
            Some(user_id) => {
                session
                    .post(&codec::encode_event("subscribe", &["", user_id.as_str()]))
                    .await?;
                let body = self.setup_poll(&session, deadline).await?;
                self.absorb(&session, &codec::decode(&body), wanted, harvest)
                    .await;
            }
            None => warn!("no user id in access token; adapter updates may not arrive"),
        }

        enter(HarvestState::SubscribingDevices);
        let pending = pending(wanted, harvest);
        if pending.is_empty() {
            return Ok(SessionEnd::Finished(HarvestState::Collected));
        }
        session
            .post(&codec::encode_batch(
                pending
                    .iter()
                    .map(|s| codec::encode_event("subscribe", &[s.as_str()])),
            ))
            .await?;
        let body = self.setup_poll(&session, deadline).await?;
        self.absorb(&session, &codec::decode(&body), wanted, harvest)
            .await;

        enter(HarvestState::ForcingUpdates);
        let pending = self::pending(wanted, harvest);
        if pending.is_empty() {
            return Ok(SessionEnd::Finished(HarvestState::Collected));
        }
        session
            .post(&codec::encode_batch(pending.iter().map(|s| {
                codec::encode_event("force_adapter_request", &[s.as_str(), "adapterStatus"])
            })))
            .await?;
        let status_requests = std::iter::once(codec::encode_event("device_status_v2", &[""]))
            .chain(
                pending
                    .iter()
                    .map(|s| codec::encode_event("device_status_v2", &[s.as_str()])),
            );
        session.post(&codec::encode_batch(status_requests)).await?;

        enter(HarvestState::Polling);
        Ok(SessionEnd::Finished(
            self.poll_loop(&session, wanted, deadline, harvest).await,
        ))
    }

    async fn poll_loop(
        &self,
        session: &PollingSession,
        wanted: &BTreeSet<String>,
        deadline: Instant,
        harvest: &mut Harvest,
    ) -> HarvestState {
        loop {
            if harvest.passwords.len() >= wanted.len() {
                return HarvestState::Collected;
            }
            if self.cancel.is_cancelled() {
                return HarvestState::Cancelled;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return HarvestState::TimedOut;
            }

            harvest.polls += 1;
            let timeout = remaining.min(self.config.max_poll);
            let polled = session.poll(timeout).await;
            if self.cancel.is_cancelled() {
                return HarvestState::Cancelled;
            }
            match polled {
                Ok(body) => {
                    self.absorb(session, &codec::decode(&body), wanted, harvest)
                        .await;
                }
                Err(e) if e.is_timeout() => {
                    trace!("long poll timed out");
                }
                Err(e) => {
                    warn!(error = %e, "long poll failed");
                    return HarvestState::Failed;
                }
            }
        }
    }

    /// Short poll during setup. An idle server holds the GET open, so a
    /// timeout reads as an empty payload; only the overall deadline ends
    /// the session.
    async fn setup_poll(
        &self,
        session: &PollingSession,
        deadline: Instant,
    ) -> Result<String, Error> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(String::new());
        }
        match session.poll(remaining.min(self.config.request_timeout)).await {
            Err(e) if e.is_timeout() => {
                trace!("setup poll timed out");
                Ok(String::new())
            }
            other => other,
        }
    }

    /// Record passwords from `frames` and answer any ping.
    async fn absorb(
        &self,
        session: &PollingSession,
        frames: &[Frame],
        wanted: &BTreeSet<String>,
        harvest: &mut Harvest,
    ) {
        for frame in frames {
            match frame {
                Frame::Ping => {
                    if let Err(e) = session.post(codec::PONG).await {
                        debug!(error = %e, "failed to answer ping");
                    }
                }
                Frame::Close => debug!("server sent close packet"),
                _ => {
                    let Some(update) = frame.adapter_update() else {
                        continue;
                    };
                    if !wanted.contains(&update.serial)
                        || harvest.passwords.contains_key(&update.serial)
                    {
                        trace!(serial = %update.serial, "ignoring adapter update");
                        continue;
                    }
                    info!(serial = %update.serial, "received adapter password");
                    harvest.passwords.insert(update.serial, update.password);
                }
            }
        }
    }
}

fn enter(state: HarvestState) {
    debug!(%state, "realtime session state");
}

fn pending(wanted: &BTreeSet<String>, harvest: &Harvest) -> Vec<String> {
    wanted
        .iter()
        .filter(|s| !harvest.passwords.contains_key(*s))
        .cloned()
        .collect()
}

// ── Polling transport ────────────────────────────────────────────────

/// One Engine.IO long-polling session (bearer auth, `sid` after handshake).
struct PollingSession {
    http: reqwest::Client,
    url: Url,
    token: String,
    sid: Option<String>,
    handshake_timeout: Duration,
    request_timeout: Duration,
}

impl PollingSession {
    fn new(http: reqwest::Client, config: &HarvestConfig, token: &str) -> Result<Self, Error> {
        let mut base = Url::parse(&config.socket_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http,
            url: base.join(SOCKET_PATH)?,
            token: token.to_owned(),
            sid: None,
            handshake_timeout: config.handshake_timeout,
            request_timeout: config.request_timeout,
        })
    }

    fn endpoint(&self) -> Url {
        let mut url = self.url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("EIO", "4").append_pair("transport", "polling");
            if let Some(sid) = &self.sid {
                query.append_pair("sid", sid);
            }
        }
        url
    }

    async fn handshake(&mut self) -> Result<(), Error> {
        let body = self.get(self.handshake_timeout).await?;
        let Some(Frame::Open(handshake)) = codec::split(&body).next().map(codec::decode_packet)
        else {
            let preview: String = body.chars().take(200).collect();
            return Err(Error::Handshake(format!("unexpected reply: {preview:?}")));
        };
        debug!(sid = %handshake.sid, "realtime session opened");
        self.sid = Some(handshake.sid);
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<String, Error> {
        self.get(timeout).await
    }

    async fn get(&self, timeout: Duration) -> Result<String, Error> {
        let resp = self
            .http
            .get(self.endpoint())
            .bearer_auth(&self.token)
            .header(ACCEPT, "*/*")
            .timeout(timeout)
            .send()
            .await
            .map_err(Error::Transport)?;
        let body = read_ok(resp).await?;
        trace!(body = %body, "poll payload");
        Ok(body)
    }

    async fn post(&self, body: &str) -> Result<(), Error> {
        trace!(body = %body, "post payload");
        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.token)
            .header(ACCEPT, "*/*")
            .header(CONTENT_TYPE, POST_CONTENT_TYPE)
            .body(body.to_owned())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(Error::Transport)?;
        read_ok(resp).await.map(drop)
    }
}

async fn read_ok(resp: reqwest::Response) -> Result<String, Error> {
    let status = resp.status();
    let text = resp.text().await.map_err(Error::Transport)?;
    if status == StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication {
            message: "realtime endpoint refused the access token".into(),
        });
    }
    if !status.is_success() {
        return Err(Error::CloudApi {
            status: status.as_u16(),
            message: text.chars().take(200).collect(),
        });
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn terminal_states() {
        assert!(HarvestState::Collected.is_terminal());
        assert!(HarvestState::Cancelled.is_terminal());
        assert!(!HarvestState::Polling.is_terminal());
        assert_eq!(HarvestState::TimedOut.to_string(), "timed_out");
    }

    #[test]
    fn endpoint_carries_sid_after_handshake() {
        let config = HarvestConfig {
            socket_url: "https://socket.example.com".into(),
            ..HarvestConfig::default()
        };
        let mut session = PollingSession::new(reqwest::Client::new(), &config, "t").unwrap();
        assert_eq!(
            session.endpoint().as_str(),
            "https://socket.example.com/socket.io/?EIO=4&transport=polling"
        );
        session.sid = Some("abc".into());
        assert_eq!(
            session.endpoint().as_str(),
            "https://socket.example.com/socket.io/?EIO=4&transport=polling&sid=abc"
        );
    }

    #[tokio::test]
    async fn empty_request_is_collected_immediately() {
        let cloud = CloudClient::new(
            crate::cloud::client::DEFAULT_BASE_URL,
            &crate::TransportConfig::cloud(),
        )
        .unwrap();
        let harvester = CredentialHarvester::new(&cloud, HarvestConfig::default());
        let harvest = harvester.harvest::<&str>(&[]).await;
        assert_eq!(harvest.state, HarvestState::Collected);
        assert!(harvest.passwords.is_empty());
    }
}
