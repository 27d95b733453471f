use std::sync::{Arc, RwLock};

use crate::config::ConsistencyLevel;
use crate::lsn::Lsn;

/// Per-request causal requirement.
///
/// Created by the HTTP transport when an inbound cookie is present, updated
/// by the router after every successful write, consumed on each read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CausalToken {
    pub required_lsn: Lsn,
    pub level: ConsistencyLevel,
    pub force_primary: bool,
}

impl CausalToken {
    pub fn new(required_lsn: Lsn, level: ConsistencyLevel) -> Self {
        Self {
            required_lsn,
            level,
            force_primary: false,
        }
    }

    pub fn force_primary(mut self) -> Self {
        self.force_primary = true;
        self
    }
}

#[derive(Debug, Default)]
struct ContextState {
    token: Option<CausalToken>,
    write_occurred: bool,
}

/// Request-scoped carrier for the causal token.
///
/// Clones share state: the handle the middleware stores in request
/// extensions and the one a handler passes to the façade observe the same
/// token. A post-write token update completes before the updating call
/// returns, so any later read through the same context sees the new
/// requirement. An absent token is legal and means "no causal requirement".
#[derive(Debug, Clone, Default)]
pub struct CausalContext {
    state: Arc<RwLock<ContextState>>,
}

impl CausalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context pre-loaded with a token, the transport's inbound path.
    pub fn with_token(token: CausalToken) -> Self {
        let ctx = Self::new();
        ctx.set_token(token);
        ctx
    }

    pub fn token(&self) -> Option<CausalToken> {
        self.state.read().expect("context lock poisoned").token
    }

    pub fn set_token(&self, token: CausalToken) {
        self.state.write().expect("context lock poisoned").token = Some(token);
    }

    pub fn clear(&self) {
        self.state.write().expect("context lock poisoned").token = None;
    }

    /// Raises the context's LSN requirement after a write, creating the
    /// token at `level` when none exists yet.
    pub fn update_required_lsn(&self, lsn: Lsn, level: ConsistencyLevel) {
        let mut state = self.state.write().expect("context lock poisoned");
        match state.token.as_mut() {
            Some(token) => token.required_lsn = lsn,
            None => state.token = Some(CausalToken::new(lsn, level)),
        }
        state.write_occurred = true;
    }

    /// Records that this request performed a write, without touching the
    /// token. Used by transactions that defer LSN capture to commit.
    pub fn mark_write(&self) {
        self.state.write().expect("context lock poisoned").write_occurred = true;
    }

    pub fn write_occurred(&self) -> bool {
        self.state.read().expect("context lock poisoned").write_occurred
    }
}
