//! In-memory collaborators.
//!
//! Every fake records what it was asked to do so tests can assert on call
//! counts and order. Scripted outcomes are consumed front to back; once a
//! script runs dry the fake succeeds.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use fleet_core::{
    CancelFlag, CredentialProvider, CursorFetcher, Field, FieldValue, OffsetFetcher, RawRecord,
    RemoteError, Token, UpdateApplier,
};

/// One call made to [`ScriptedApplier`].
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedCall {
    pub key: String,
    pub target_id: String,
    pub fields: Vec<(Field, FieldValue)>,
    pub token: String,
}

/// Update applier with per-key scripted failures.
#[derive(Debug, Default)]
pub struct ScriptedApplier {
    scripts: Mutex<HashMap<String, VecDeque<RemoteError>>>,
    calls: Mutex<Vec<AppliedCall>>,
    applied: Mutex<Vec<String>>,
    required_token: Mutex<Option<String>>,
    cancel_after: Mutex<Option<(usize, CancelFlag)>>,
    successes: AtomicUsize,
}

impl ScriptedApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next calls for `key` with `errors`, in order.
    pub fn script(self, key: &str, errors: impl IntoIterator<Item = RemoteError>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .extend(errors);
        self
    }

    /// Reject every call whose token value differs from `token`.
    pub fn require_token(self, token: &str) -> Self {
        *self.required_token.lock().unwrap() = Some(token.to_string());
        self
    }

    /// Trip `flag` once `successes` updates have been applied.
    pub fn cancel_after(self, successes: usize, flag: CancelFlag) -> Self {
        *self.cancel_after.lock().unwrap() = Some((successes, flag));
        self
    }

    pub fn calls(&self) -> Vec<AppliedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Calls made for `key`.
    pub fn calls_for(&self, key: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.key == key)
            .count()
    }

    /// Keys of successful calls, in completion order.
    pub fn applied_keys(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpdateApplier for ScriptedApplier {
    async fn apply(
        &self,
        key: &str,
        target_id: &str,
        fields: &[(Field, FieldValue)],
        token: &Token,
    ) -> Result<(), RemoteError> {
        self.calls.lock().unwrap().push(AppliedCall {
            key: key.to_string(),
            target_id: target_id.to_string(),
            fields: fields.to_vec(),
            token: token.value().to_string(),
        });

        if let Some(required) = self.required_token.lock().unwrap().as_deref() {
            if token.value() != required {
                return Err(RemoteError::AuthExpired);
            }
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(VecDeque::pop_front);
        if let Some(error) = scripted {
            return Err(error);
        }

        self.applied.lock().unwrap().push(key.to_string());
        let done = self.successes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, flag)) = self.cancel_after.lock().unwrap().as_ref() {
            if done >= *limit {
                flag.cancel();
            }
        }
        Ok(())
    }
}

/// Credential provider issuing `token-1`, `token-2`, ...
#[derive(Debug, Default)]
pub struct CountingCredentials {
    issued: AtomicU32,
    lifetime: Option<chrono::Duration>,
    failure: Option<String>,
}

impl CountingCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokens expire `lifetime` after issue.
    pub fn with_lifetime(mut self, lifetime: chrono::Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Every refresh fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Refresh calls so far, failed ones included.
    pub fn refreshes(&self) -> u32 {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for CountingCredentials {
    async fn refresh(&self) -> Result<Token, String> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(message) = &self.failure {
            return Err(message.clone());
        }
        let token = Token::new(format!("token-{n}"));
        Ok(match self.lifetime {
            Some(lifetime) => token.with_expiry(chrono::Utc::now() + lifetime),
            None => token,
        })
    }
}

/// Cursor fetcher over fixed pages. Cursors are page indexes.
#[derive(Debug, Default)]
pub struct VecCursorFetcher {
    pages: Vec<Vec<RawRecord>>,
    errors: Mutex<VecDeque<RemoteError>>,
    calls: AtomicUsize,
}

impl VecCursorFetcher {
    pub fn new(pages: Vec<Vec<RawRecord>>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    /// Split `records` into pages of `page_size`.
    pub fn paged(records: Vec<RawRecord>, page_size: usize) -> Self {
        Self::new(records.chunks(page_size.max(1)).map(<[_]>::to_vec).collect())
    }

    /// Fail the next calls with `errors` before serving pages.
    pub fn failing_first(self, errors: impl IntoIterator<Item = RemoteError>) -> Self {
        self.errors.lock().unwrap().extend(errors);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CursorFetcher for VecCursorFetcher {
    async fn fetch(
        &self,
        cursor: Option<String>,
        _token: &Token,
    ) -> Result<(Vec<RawRecord>, Option<String>), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.errors.lock().unwrap().pop_front() {
            return Err(error);
        }

        let page: usize = cursor.as_deref().map_or(0, |c| c.parse().unwrap_or(0));
        let records = self.pages.get(page).cloned().unwrap_or_default();
        let next = (page + 1 < self.pages.len()).then(|| (page + 1).to_string());
        Ok((records, next))
    }
}

/// Page-number fetcher over a fixed population.
#[derive(Debug, Default)]
pub struct VecOffsetFetcher {
    records: Vec<RawRecord>,
    page_size: usize,
    reported_total: Option<usize>,
    errors: Mutex<VecDeque<RemoteError>>,
    calls: AtomicUsize,
}

impl VecOffsetFetcher {
    pub fn new(records: Vec<RawRecord>, page_size: usize) -> Self {
        Self {
            records,
            page_size: page_size.max(1),
            ..Self::default()
        }
    }

    /// Report `total` instead of the real population size.
    pub fn with_reported_total(mut self, total: usize) -> Self {
        self.reported_total = Some(total);
        self
    }

    pub fn failing_first(self, errors: impl IntoIterator<Item = RemoteError>) -> Self {
        self.errors.lock().unwrap().extend(errors);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OffsetFetcher for VecOffsetFetcher {
    async fn fetch(&self, page: u32, _token: &Token) -> Result<(Vec<RawRecord>, usize), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.errors.lock().unwrap().pop_front() {
            return Err(error);
        }

        let start = (page as usize).saturating_mul(self.page_size);
        let records = self
            .records
            .iter()
            .skip(start)
            .take(self.page_size)
            .cloned()
            .collect();
        let total = self.reported_total.unwrap_or(self.records.len());
        Ok((records, total))
    }
}
