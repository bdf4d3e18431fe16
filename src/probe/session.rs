use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{self, Ready};
use russh::client;
use russh::{CryptoVec, Disconnect, Signer};
use russh_keys::key;
use thiserror::Error;

use super::ConnectionError;

/// Host key policy for probing: accept whatever the server presents.
///
/// The probe has no trust relationship with the target and never sends
/// anything secret, so the server's identity does not matter.
struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        self,
        _server_public_key: &key::PublicKey,
    ) -> Result<(Self, bool), Self::Error> {
        Ok((self, true))
    }
}

/// The error a [`PublicKeyOnly`] signer can produce.
#[derive(Debug, Error)]
pub(crate) enum SignerError {
    /// No private key is held; a signature request cannot be served.
    #[error("signing not supported, no private key is held")]
    SigningNotSupported,
    #[error(transparent)]
    Send(#[from] russh::SendError),
}

/// A "publickey" authentication method that can offer a key but can never
/// sign the server's challenge.
///
/// The server only requests a signature after it has decided it would
/// accept the offered key, so [`SignerError::SigningNotSupported`] coming
/// out of the exchange is the acceptance signal.
pub(crate) struct PublicKeyOnly;

impl Signer for PublicKeyOnly {
    type Error = SignerError;
    type Future = Ready<(Self, Result<CryptoVec, Self::Error>)>;

    fn auth_publickey_sign(self, _key: &key::PublicKey, _to_sign: CryptoVec) -> Self::Future {
        future::ready((self, Err(SignerError::SigningNotSupported)))
    }
}

/// How the server answered a single key offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthReply {
    WouldAccept,
    Rejected,
}

mod private {
    pub trait SessionState {}
    impl SessionState for super::Setup {}
    impl SessionState for super::Connected {}
}
use private::SessionState;

pub(crate) struct Setup {
    addr: SocketAddr,
    timeout: Duration,
}

pub(crate) struct Connected {
    handle: client::Handle<AcceptAnyHostKey>,
    timeout: Duration,
}

/// A ProbeSession is one connection used for exactly one restricted
/// authentication attempt.
///
/// It starts in `Setup`, moves to `Connected` once the transport handshake
/// is done, and is consumed by `silent_disconnect`. There is no channel
/// state: the exchange never progresses past authentication.
pub(crate) struct ProbeSession<S: SessionState> {
    state: S,
}

impl ProbeSession<Setup> {
    pub(crate) fn new(addr: SocketAddr, timeout: Duration) -> ProbeSession<Setup> {
        ProbeSession {
            state: Setup { addr, timeout },
        }
    }

    /// Dials the target and runs the SSH transport handshake, the whole
    /// phase bounded by the configured timeout.
    ///
    /// The engine also gets the timeout as its connection lifetime so that
    /// a session task whose handshake we abandon gets collected instead of
    /// holding the socket open.
    pub(crate) async fn connect(self) -> Result<ProbeSession<Connected>, ConnectionError> {
        let Setup { addr, timeout } = self.state;
        let config = Arc::new(client::Config {
            connection_timeout: Some(timeout),
            ..Default::default()
        });
        let handle = tokio::time::timeout(timeout, async move {
            let stream = tokio::net::TcpStream::connect(addr).await?;
            client::connect_stream(config, stream, AcceptAnyHostKey)
                .await
                .map_err(ConnectionError::Handshake)
        })
        .await
        .map_err(|_| ConnectionError::Timeout(timeout))??;

        Ok(ProbeSession {
            state: Connected { handle, timeout },
        })
    }
}

impl ProbeSession<Connected> {
    /// Offers `key` for `user` and reports the server's verdict.
    ///
    /// The signer cannot produce a signature, so the exchange stops at the
    /// verdict no matter how the server answers.
    pub(crate) async fn try_publickey(
        &mut self,
        user: &str,
        key: &key::PublicKey,
    ) -> Result<AuthReply, ConnectionError> {
        let timeout = self.state.timeout;
        let attempt = self
            .state
            .handle
            .authenticate_future(user, key.clone(), PublicKeyOnly);
        let (_signer, verdict) = tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| ConnectionError::Timeout(timeout))?;

        match verdict {
            // A server answering success to an unsigned offer is unusual,
            // but it certainly accepts the key.
            Ok(true) => Ok(AuthReply::WouldAccept),
            Ok(false) => Ok(AuthReply::Rejected),
            Err(SignerError::SigningNotSupported) => Ok(AuthReply::WouldAccept),
            Err(SignerError::Send(_)) => Err(ConnectionError::Lost),
        }
    }

    /// Tells the server we are leaving and drops the connection without
    /// waiting for an answer.
    pub(crate) async fn silent_disconnect(self) {
        let _ = self
            .state
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> key::PublicKey {
        key::KeyPair::generate_ed25519()
            .unwrap()
            .clone_public_key()
            .unwrap()
    }

    #[tokio::test]
    async fn signer_always_refuses_to_sign() {
        let key = test_key();
        let (_signer, res) = PublicKeyOnly
            .auth_publickey_sign(&key, CryptoVec::new())
            .await;
        assert!(matches!(res, Err(SignerError::SigningNotSupported)));
    }

    #[tokio::test]
    async fn refusing_to_sign_is_not_a_panic() {
        // The refusal must surface as a value even when polled repeatedly.
        for _ in 0..3 {
            let key = test_key();
            let (_signer, res) = PublicKeyOnly
                .auth_publickey_sign(&key, CryptoVec::from_slice(b"challenge"))
                .await;
            assert!(res.is_err());
        }
    }
}
