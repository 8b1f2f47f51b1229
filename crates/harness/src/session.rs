//! Execution contexts: one live browser session owned by one worker

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use testgrid_common::{ContextKind, WorkerId};
use tracing::{debug, warn};

use crate::error::HarnessResult;

/// Operations a provisioned browser session supports
pub trait Session: Send {
    fn kind(&self) -> ContextKind;

    fn id(&self) -> &str;

    fn is_alive(&self) -> bool;

    /// Load a URL in the session's current window
    fn navigate(&mut self, url: &str) -> HarnessResult<()>;

    /// Whether an element matching the CSS selector exists and is displayed.
    /// A missing element is `Ok(false)`, not an error.
    fn is_displayed(&mut self, css: &str) -> HarnessResult<bool>;

    /// PNG snapshot of the current viewport
    fn screenshot(&mut self) -> HarnessResult<Vec<u8>>;

    /// End the session and release its resources. Calling it on a closed
    /// session is a no-op.
    fn quit(&mut self) -> HarnessResult<()>;
}

/// A provisioned session plus its ownership metadata
pub struct ExecutionContext {
    owner: WorkerId,
    created_at: DateTime<Utc>,
    session: Box<dyn Session>,
}

/// Handle to a pooled context. Only the owning worker uses it.
pub type SharedContext = Arc<Mutex<ExecutionContext>>;

impl ExecutionContext {
    pub fn new(owner: WorkerId, session: Box<dyn Session>) -> Self {
        Self {
            owner,
            created_at: Utc::now(),
            session,
        }
    }

    pub fn kind(&self) -> ContextKind {
        self.session.kind()
    }

    pub fn owner(&self) -> WorkerId {
        self.owner
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_alive(&self) -> bool {
        self.session.is_alive()
    }

    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    pub fn session_mut(&mut self) -> &mut dyn Session {
        self.session.as_mut()
    }

    /// Quit the session if it is still alive. Returns whether anything was
    /// released.
    pub fn release(&mut self) -> bool {
        if !self.session.is_alive() {
            debug!("Context {} for {} already released", self.session.id(), self.owner);
            return false;
        }
        if let Err(e) = self.session.quit() {
            warn!("Error quitting session {}: {}", self.session.id(), e);
        }
        true
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("kind", &self.kind())
            .field("owner", &self.owner)
            .field("session", &self.session.id())
            .field("alive", &self.is_alive())
            .field("created_at", &self.created_at)
            .finish()
    }
}
