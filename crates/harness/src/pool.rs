//! Execution context pool
//!
//! Holds at most one live context per worker. Only the worker itself touches
//! its slot; the table is a concurrent map so workers can add and remove
//! slots without coordinating.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use testgrid_common::{ContextKind, WorkerId};
use tracing::{debug, info};

use crate::error::HarnessResult;
use crate::registry::FactoryRegistry;
use crate::session::{ExecutionContext, SharedContext};

pub struct ExecutionContextPool {
    registry: Arc<FactoryRegistry>,
    contexts: DashMap<WorkerId, SharedContext>,
    skip_provisioning: bool,
}

impl ExecutionContextPool {
    pub fn new(registry: Arc<FactoryRegistry>) -> Self {
        let skip_provisioning = registry.config().skip_provisioning;
        if skip_provisioning {
            info!("Browser provisioning is disabled; contexts will not be created");
        }
        Self {
            registry,
            contexts: DashMap::new(),
            skip_provisioning,
        }
    }

    pub fn registry(&self) -> &Arc<FactoryRegistry> {
        &self.registry
    }

    pub fn skips_provisioning(&self) -> bool {
        self.skip_provisioning
    }

    /// Return the worker's live context, provisioning one with the configured
    /// browser if needed. `Ok(None)` means provisioning is skipped.
    pub fn get_or_create(&self, worker: WorkerId) -> HarnessResult<Option<SharedContext>> {
        let browser = self.registry.config().browser.clone();
        self.get_or_create_kind(worker, &browser)
    }

    /// Like [`get_or_create`](Self::get_or_create) with an explicit browser.
    /// A live context of a different kind is disposed first.
    pub fn get_or_create_kind(
        &self,
        worker: WorkerId,
        browser: &str,
    ) -> HarnessResult<Option<SharedContext>> {
        if self.skip_provisioning {
            return Ok(None);
        }

        let kind = self.registry.resolve_kind(browser)?;

        if let Some(existing) = self.current(worker) {
            let reusable = {
                let ctx = existing.lock();
                ctx.is_alive() && ctx.kind() == kind
            };
            if reusable {
                return Ok(Some(existing));
            }
            self.dispose(worker);
        }

        // Provision outside the map so other workers are never blocked on it
        let session = self.registry.provision(kind.as_str())?;
        let context: SharedContext = Arc::new(Mutex::new(ExecutionContext::new(worker, session)));

        match self.contexts.entry(worker) {
            Entry::Occupied(mut slot) => {
                if slot.get().lock().is_alive() {
                    debug!("{} already holds a live context; releasing the new one", worker);
                    context.lock().release();
                    return Ok(Some(Arc::clone(slot.get())));
                }
                slot.insert(Arc::clone(&context));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&context));
            }
        }

        info!("{} context created for {}", kind, worker);
        Ok(Some(context))
    }

    /// The worker's context, if any, without provisioning
    pub fn current(&self, worker: WorkerId) -> Option<SharedContext> {
        self.contexts.get(&worker).map(|slot| Arc::clone(slot.value()))
    }

    /// Release the worker's context. Safe to call when none exists. Returns
    /// whether a live resource was released.
    pub fn dispose(&self, worker: WorkerId) -> bool {
        match self.contexts.remove(&worker) {
            Some((_, context)) => {
                let released = context.lock().release();
                if released {
                    info!("Context for {} disposed", worker);
                }
                released
            }
            None => false,
        }
    }

    /// Release every context in the pool, returning how many were live
    pub fn dispose_all(&self) -> usize {
        let workers: Vec<WorkerId> = self.contexts.iter().map(|slot| *slot.key()).collect();
        workers
            .into_iter()
            .filter(|worker| self.dispose(*worker))
            .count()
    }

    pub fn live_count(&self) -> usize {
        self.contexts
            .iter()
            .filter(|slot| slot.value().lock().is_alive())
            .count()
    }

    /// Kinds of the live contexts, for diagnostics
    pub fn live_kinds(&self) -> Vec<(WorkerId, ContextKind)> {
        let mut kinds: Vec<_> = self
            .contexts
            .iter()
            .filter_map(|slot| {
                let ctx = slot.value().lock();
                ctx.is_alive().then(|| (*slot.key(), ctx.kind()))
            })
            .collect();
        kinds.sort_by_key(|(worker, _)| *worker);
        kinds
    }

    /// Scope guard that disposes the worker's context when dropped, on every
    /// exit path including unwinding
    pub fn lease(&self, worker: WorkerId) -> ContextLease<'_> {
        ContextLease { pool: self, worker }
    }
}

impl Drop for ExecutionContextPool {
    fn drop(&mut self) {
        let released = self.dispose_all();
        if released > 0 {
            debug!("Released {} context(s) on pool shutdown", released);
        }
    }
}

pub struct ContextLease<'a> {
    pool: &'a ExecutionContextPool,
    worker: WorkerId,
}

impl ContextLease<'_> {
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn context(&self) -> HarnessResult<Option<SharedContext>> {
        self.pool.get_or_create(self.worker)
    }

    pub fn context_kind(&self, browser: &str) -> HarnessResult<Option<SharedContext>> {
        self.pool.get_or_create_kind(self.worker, browser)
    }
}

impl Drop for ContextLease<'_> {
    fn drop(&mut self) {
        self.pool.dispose(self.worker);
    }
}
