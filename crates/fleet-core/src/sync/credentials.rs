//! Shared credential cache
//!
//! Every fetch and update of a run borrows its token from one
//! [`SharedCredentials`]. Each refresh bumps a generation counter; a caller
//! that saw generation `n` fail only triggers a provider call if nobody has
//! refreshed past `n` yet, so concurrent workers hitting the same expiry
//! share a single refresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::events::{Event, EventSink};
use crate::source::{CredentialProvider, Token};

/// A token together with the generation it was issued in.
#[derive(Debug, Clone)]
pub struct Lease {
    pub token: Token,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct State {
    token: Option<Token>,
    generation: u64,
}

pub struct SharedCredentials {
    source_name: String,
    provider: Arc<dyn CredentialProvider>,
    skew: chrono::Duration,
    state: Mutex<State>,
    refreshes: AtomicU64,
}

impl SharedCredentials {
    pub fn new(
        source_name: impl Into<String>,
        provider: Arc<dyn CredentialProvider>,
        skew: chrono::Duration,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            provider,
            skew,
            state: Mutex::new(State::default()),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Start from an already issued token.
    pub fn with_token(self, token: Token) -> Self {
        Self {
            state: Mutex::new(State {
                token: Some(token),
                generation: 0,
            }),
            ..self
        }
    }

    /// Total provider calls made so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// The current token, refreshed first if absent or about to expire.
    pub async fn current(&self, sink: &dyn EventSink) -> Result<Lease> {
        let mut state = self.state.lock().await;
        let stale = match &state.token {
            None => true,
            Some(token) => token.expires_within(self.skew, Utc::now()),
        };
        if stale {
            if state.token.is_some() {
                tracing::debug!(source = %self.source_name, "Token near expiry; refreshing early");
            }
            self.refresh_locked(&mut state, sink).await?;
        }
        self.lease(&state)
    }

    /// Refresh after a call made with generation `seen` was rejected.
    ///
    /// If another caller already refreshed past `seen`, the newer token is
    /// returned without contacting the provider.
    pub async fn refresh_after(&self, seen: u64, sink: &dyn EventSink) -> Result<Lease> {
        let mut state = self.state.lock().await;
        if state.generation == seen || state.token.is_none() {
            self.refresh_locked(&mut state, sink).await?;
        }
        self.lease(&state)
    }

    fn lease(&self, state: &State) -> Result<Lease> {
        let token = state.token.clone().ok_or_else(|| Error::CredentialRefresh {
            source_name: self.source_name.clone(),
            message: "no token available".to_string(),
        })?;
        Ok(Lease {
            token,
            generation: state.generation,
        })
    }

    async fn refresh_locked(&self, state: &mut State, sink: &dyn EventSink) -> Result<()> {
        let token = self
            .provider
            .refresh()
            .await
            .map_err(|message| Error::CredentialRefresh {
                source_name: self.source_name.clone(),
                message,
            })?;
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        state.token = Some(token);
        state.generation += 1;
        sink.emit(Event::CredentialsRefreshed {
            source: self.source_name.clone(),
            generation: state.generation,
        });
        Ok(())
    }
}

impl std::fmt::Debug for SharedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCredentials")
            .field("source_name", &self.source_name)
            .field("refreshes", &self.refresh_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct Counting {
        calls: AtomicU32,
        lifetime: Option<chrono::Duration>,
    }

    #[async_trait]
    impl CredentialProvider for Counting {
        async fn refresh(&self) -> std::result::Result<Token, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let token = Token::new(format!("token-{n}"));
            Ok(match self.lifetime {
                Some(lifetime) => token.with_expiry(Utc::now() + lifetime),
                None => token,
            })
        }
    }

    struct Broken;

    #[async_trait]
    impl CredentialProvider for Broken {
        async fn refresh(&self) -> std::result::Result<Token, String> {
            Err("401 invalid_client".to_string())
        }
    }

    fn counting(lifetime: Option<chrono::Duration>) -> Arc<Counting> {
        Arc::new(Counting {
            calls: AtomicU32::new(0),
            lifetime,
        })
    }

    #[tokio::test]
    async fn first_use_fetches_once() {
        let provider = counting(None);
        let creds = SharedCredentials::new("source-b", provider.clone(), chrono::Duration::zero());
        let sink = RecordingSink::new();

        let a = creds.current(&sink).await.unwrap();
        let b = creds.current(&sink).await.unwrap();
        assert_eq!(a.token.value(), "token-1");
        assert_eq!(a.generation, b.generation);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_generation_reuses_newer_token() {
        let provider = counting(None);
        let creds = SharedCredentials::new("source-b", provider.clone(), chrono::Duration::zero())
            .with_token(Token::new("initial"));
        let sink = RecordingSink::new();

        let seen = creds.current(&sink).await.unwrap().generation;
        let first = creds.refresh_after(seen, &sink).await.unwrap();
        let second = creds.refresh_after(seen, &sink).await.unwrap();

        assert_eq!(first.token.value(), "token-1");
        assert_eq!(second.token.value(), "token-1");
        assert_eq!(creds.refresh_count(), 1);
    }

    #[tokio::test]
    async fn near_expiry_refreshes_proactively() {
        let provider = counting(Some(chrono::Duration::seconds(30)));
        let creds = SharedCredentials::new("source-a", provider.clone(), chrono::Duration::minutes(2));
        let sink = RecordingSink::new();

        creds.current(&sink).await.unwrap();
        let lease = creds.current(&sink).await.unwrap();
        assert_eq!(lease.token.value(), "token-2");
        assert_eq!(lease.generation, 2);
    }

    #[tokio::test]
    async fn provider_failure_is_credential_error() {
        let creds = SharedCredentials::new("source-a", Arc::new(Broken), chrono::Duration::zero());
        let err = creds.current(&RecordingSink::new()).await.unwrap_err();
        assert!(matches!(err, Error::CredentialRefresh { ref source_name, .. } if source_name == "source-a"));
    }
}
