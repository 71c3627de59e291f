//! Bearer credential lookup.
//!
//! Credentials are passed in explicitly instead of being read from a
//! global store, so every request path can be exercised without one.
//! The token is read once per request (once per stream open for the
//! progress stream); refreshing it is the session holder's job.

use std::sync::{Arc, RwLock};

/// Supplies the bearer token attached to outgoing requests.
pub trait CredentialProvider: Send + Sync {
    /// Current access token, or `None` to send no `Authorization` header.
    fn bearer_token(&self) -> Option<String>;
}

/// No credentials at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct Anonymous;

impl CredentialProvider for Anonymous {
    fn bearer_token(&self) -> Option<String> {
        None
    }
}

/// A token held in memory that the session holder may rotate.
///
/// Rotation only affects requests and streams opened afterwards.
#[derive(Debug, Default, Clone)]
pub struct SharedToken {
    token: Arc<RwLock<Option<String>>>,
}

impl SharedToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(token)),
        }
    }

    pub fn set(&self, token: Option<String>) {
        match self.token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }
}

impl CredentialProvider for SharedToken {
    fn bearer_token(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Format an `Authorization` header value.
pub(crate) fn bearer_header(token: &str) -> String {
    format!("Bearer {token}")
}
