//! Plugin session: the live connection state of an admitted plugin
//!
//! A [`Session`] is created once per plugin process. It owns the token the
//! plugin reported during the handshake, the heartbeat timestamp that every
//! successful call refreshes, and a `tracing` span used as the session's
//! logger.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::error::PluginError;
use crate::security::{SessionVerifier, generate_token, tokens_match};
use crate::types::PluginMeta;

/// How long a plugin may go without a call before its watchdog stops it
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-plugin session state
#[derive(Debug)]
pub struct Session {
    token: String,
    /// Unix milliseconds of the last successful call
    last_heartbeat: AtomicI64,
    logger: Span,
    verifier: Option<SessionVerifier>,
    shutdown: CancellationToken,
}

impl Session {
    /// Create a session with a freshly generated token
    pub fn new(meta: &PluginMeta, verifier: Option<SessionVerifier>) -> Self {
        Self::with_token(meta, generate_token(), verifier)
    }

    /// Create a session with a known token
    pub fn with_token(
        meta: &PluginMeta,
        token: impl Into<String>,
        verifier: Option<SessionVerifier>,
    ) -> Self {
        let logger = tracing::info_span!(
            "plugin_session",
            plugin = %meta.name,
            version = meta.version
        );
        Self {
            token: token.into(),
            last_heartbeat: AtomicI64::new(Utc::now().timestamp_millis()),
            logger,
            verifier,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Session-scoped logger
    pub fn logger(&self) -> &Span {
        &self.logger
    }

    /// Whether calls must carry a control plane signature
    pub fn requires_signature(&self) -> bool {
        self.verifier.is_some()
    }

    /// Record that the control plane is still talking to us
    pub fn reset_heartbeat(&self) {
        self.last_heartbeat
            .store(Utc::now().timestamp_millis(), Ordering::Release);
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        let millis = self.last_heartbeat.load(Ordering::Acquire);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Time since the last heartbeat
    pub fn idle_for(&self) -> Duration {
        let millis = self.last_heartbeat.load(Ordering::Acquire);
        let elapsed = Utc::now().timestamp_millis().saturating_sub(millis);
        Duration::from_millis(u64::try_from(elapsed).unwrap_or(0))
    }

    /// Check the credentials presented with a call
    pub fn authenticate(&self, token: &str, signature: Option<&str>) -> Result<(), PluginError> {
        if !tokens_match(&self.token, token) {
            return Err(PluginError::Unauthorized);
        }
        if let Some(verifier) = &self.verifier {
            verifier.verify(token, signature)?;
        }
        Ok(())
    }

    /// Ask the plugin to stop serving
    pub fn kill(&self, reason: &str) {
        tracing::info!(parent: &self.logger, reason, "Plugin session killed");
        self.shutdown.cancel();
    }

    pub fn is_killed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token that is cancelled when the session ends
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop the session once it has been idle for longer than `timeout`
    pub fn spawn_watchdog(self: &Arc<Self>, timeout: Duration) -> JoinHandle<()> {
        let session = Arc::clone(self);
        let check_every = (timeout / 4).max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_every);
            loop {
                tokio::select! {
                    _ = session.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if session.idle_for() > timeout {
                            tracing::warn!(
                                parent: &session.logger,
                                idle_ms = session.idle_for().as_millis() as u64,
                                "Heartbeat timeout"
                            );
                            session.kill("heartbeat timeout");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::SigningKey;
    use p256::elliptic_curve::rand_core::OsRng;

    use crate::security::{encode_public_key, sign_token};

    fn meta() -> PluginMeta {
        PluginMeta::new("session-test", 1)
    }

    #[test]
    fn new_session_has_generated_token() {
        let session = Session::new(&meta(), None);
        assert!(!session.token().is_empty());
        assert!(!session.requires_signature());
    }

    #[test]
    fn reset_heartbeat_moves_forward() {
        let session = Session::with_token(&meta(), "t", None);
        let before = session.last_heartbeat();
        std::thread::sleep(Duration::from_millis(5));
        session.reset_heartbeat();
        assert!(session.last_heartbeat() > before);
        assert!(session.idle_for() < Duration::from_secs(1));
    }

    #[test]
    fn authenticate_checks_token() {
        let session = Session::with_token(&meta(), "secret", None);
        assert!(session.authenticate("secret", None).is_ok());
        assert!(matches!(
            session.authenticate("guess", None),
            Err(PluginError::Unauthorized)
        ));
    }

    #[test]
    fn authenticate_checks_signature_when_verifier_present() {
        let key = SigningKey::random(&mut OsRng);
        let verifier =
            SessionVerifier::from_public_key(&encode_public_key(key.verifying_key())).unwrap();
        let session = Session::with_token(&meta(), "secret", Some(verifier));

        assert!(session.requires_signature());
        assert!(session.authenticate("secret", None).is_err());

        let signature = sign_token(&key, "secret");
        assert!(session.authenticate("secret", Some(&signature)).is_ok());
    }

    #[test]
    fn kill_cancels_shutdown_token() {
        let session = Session::new(&meta(), None);
        let token = session.shutdown_token();
        assert!(!session.is_killed());

        session.kill("test");
        assert!(session.is_killed());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn watchdog_kills_idle_session() {
        let session = Arc::new(Session::new(&meta(), None));
        let handle = session.spawn_watchdog(Duration::from_millis(50));

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("watchdog should fire")
            .unwrap();
        assert!(session.is_killed());
    }

    #[tokio::test]
    async fn watchdog_spares_session_with_heartbeats() {
        let session = Arc::new(Session::new(&meta(), None));
        let handle = session.spawn_watchdog(Duration::from_millis(200));

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            session.reset_heartbeat();
        }
        assert!(!session.is_killed());

        session.kill("done");
        handle.await.unwrap();
    }
}
