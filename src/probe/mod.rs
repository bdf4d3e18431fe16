//! Drives restricted SSH authentication attempts against a target server.
//!
//! An attempt offers one public key for one username and stops at the
//! server's verdict: because the key is offered without any signing
//! capability, the exchange can never complete, and the server's request
//! for a signature is itself the answer we are after.

mod session;

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::keys::CandidateKey;
use session::{AuthReply, ProbeSession};

/// Why an attempt never produced a verdict from the server.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("connect failed: {0}")]
    Connect(#[from] std::io::Error),
    #[error("ssh handshake failed: {0}")]
    Handshake(#[from] russh::Error),
    #[error("connection lost during the authentication exchange")]
    Lost,
}

/// The result of one (username, key) probe.
#[derive(Debug)]
pub enum ProbeOutcome {
    /// The server indicated it would accept the key and asked for a
    /// signature.
    WouldAccept,
    /// The server declined the key for this username.
    Rejected,
    /// The attempt failed before the server gave a verdict.
    ConnectFailed(ConnectionError),
}

pub struct ProbeConfig {
    /// Bounds the connection phase and each authentication exchange.
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            timeout: Duration::from_secs(1),
        }
    }
}

/// Runs a single probe attempt over a fresh connection.
///
/// Connections are never reused across attempts. Failures are returned as
/// an outcome rather than an error: one unreachable or unhappy server
/// must not end a scan.
pub async fn probe_one(
    addr: SocketAddr,
    user: &str,
    key: &CandidateKey,
    config: &ProbeConfig,
) -> ProbeOutcome {
    let mut session = match ProbeSession::new(addr, config.timeout).connect().await {
        Ok(session) => session,
        Err(err) => return ProbeOutcome::ConnectFailed(err),
    };
    debug!(%addr, user, "transport established, offering key");

    let reply = session.try_publickey(user, key.public_key()).await;
    session.silent_disconnect().await;

    match reply {
        Ok(AuthReply::WouldAccept) => ProbeOutcome::WouldAccept,
        Ok(AuthReply::Rejected) => ProbeOutcome::Rejected,
        Err(err) => ProbeOutcome::ConnectFailed(err),
    }
}
