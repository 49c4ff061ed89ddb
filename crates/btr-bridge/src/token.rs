//! Anti-forgery (XSRF) token cache.
//!
//! Holds at most one trusted token plus every token the server has rejected.
//! Rejected tokens are never trusted again; the set is never pruned.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct TokenState {
    current: Option<String>,
    invalid: HashSet<String>,
}

/// Process-wide token state, shared through `Arc`.
#[derive(Debug, Default)]
pub struct TokenCache {
    state: Mutex<TokenState>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TokenState> {
        // Every critical section is a single field update, so poisoning is ignored.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The currently trusted token, if any.
    pub fn current(&self) -> Option<String> {
        self.lock().current.clone()
    }

    pub fn is_invalid(&self, token: &str) -> bool {
        self.lock().invalid.contains(token)
    }

    /// Passively learn a token seen elsewhere.
    ///
    /// The candidate is adopted only when nothing usable is trusted (no token,
    /// or the trusted one was rejected) and the candidate itself was never
    /// rejected. Returns whether it was adopted.
    pub fn observe_token(&self, candidate: &str) -> bool {
        let mut state = self.lock();

        let current_usable = state
            .current
            .as_ref()
            .is_some_and(|token| !state.invalid.contains(token));

        if current_usable || state.invalid.contains(candidate) {
            return false;
        }

        debug!("Adopting observed XSRF token");
        state.current = Some(candidate.to_string());
        true
    }

    /// Permanently mark a token as rejected.
    pub fn invalidate(&self, token: &str) {
        self.lock().invalid.insert(token.to_string());
    }

    /// Replace a rejected token with the fresh one the server handed out.
    ///
    /// `fresh` is adopted unconditionally: it comes straight from the server.
    pub fn rotate(&self, previous: Option<&str>, fresh: &str) {
        let mut state = self.lock();
        if let Some(previous) = previous {
            state.invalid.insert(previous.to_string());
        }
        state.current = Some(fresh.to_string());
    }

    pub fn invalid_count(&self) -> usize {
        self.lock().invalid.len()
    }
}
