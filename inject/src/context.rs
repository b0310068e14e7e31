//! The provisioning context: per-thread state of one top-level provisioning call.
//!
//! A context is created when a thread makes its first request to an injector
//! and is reused by every nested request that thread makes until the outermost
//! one returns. It is only mutated by its own thread; other threads read its
//! dependency chain through the [`ContextRegistry`] when describing a cycle.

use crate::binding::Source;
use crate::config::InjectorOptions;
use crate::error::{ErrorKind, ProvisionError};
use crate::factory::Instance;
use crate::key::{Dependency, Key};
use crate::ledger::{CircularFactoryId, LedgerTable};
use crate::proxy::{DelegateSlot, ProxyRegistry};
use crate::registry::ContextRegistry;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, trace};

thread_local! {
  // Contexts active on this thread, keyed by injector id.
  static ACTIVE_CONTEXTS: RefCell<HashMap<u64, Arc<ProvisionContext>>> = RefCell::new(HashMap::new());
}

#[derive(Default)]
struct DependencyState {
  dependency: Option<Dependency>,
  chain: Vec<(Dependency, Source)>,
}

/// State of one top-level provisioning call on one thread.
pub struct ProvisionContext {
  thread: ThreadId,
  thread_name: Option<String>,
  options: InjectorOptions,
  proxies: Arc<ProxyRegistry>,
  ledgers: Mutex<LedgerTable>,
  state: Mutex<DependencyState>,
}

impl ProvisionContext {
  pub(crate) fn new(options: InjectorOptions, proxies: Arc<ProxyRegistry>) -> Self {
    let current = thread::current();
    Self {
      thread: current.id(),
      thread_name: current.name().map(str::to_owned),
      options,
      proxies,
      ledgers: Mutex::new(LedgerTable::default()),
      state: Mutex::new(DependencyState::default()),
    }
  }

  pub fn thread(&self) -> ThreadId {
    self.thread
  }

  pub fn thread_name(&self) -> Option<&str> {
    self.thread_name.as_deref()
  }

  pub fn options(&self) -> &InjectorOptions {
    &self.options
  }

  /// The dependency currently being satisfied.
  pub fn dependency(&self) -> Option<Dependency> {
    self.state.lock().dependency.clone()
  }

  /// Keys being provisioned, outermost first.
  pub fn dependency_chain(&self) -> Vec<Key> {
    self
      .state
      .lock()
      .chain
      .iter()
      .map(|(dependency, _)| dependency.key().clone())
      .collect()
  }

  /// Makes `dependency` the active one until the guard drops.
  pub(crate) fn push_dependency(&self, dependency: Dependency, source: Source) -> DependencyGuard<'_> {
    let mut state = self.state.lock();
    state.chain.push((dependency.clone(), source));
    let previous = state.dependency.replace(dependency);
    DependencyGuard {
      context: self,
      previous,
    }
  }

  fn pop_state_and_set_dependency(&self, previous: Option<Dependency>) {
    let mut state = self.state.lock();
    state.chain.pop();
    state.dependency = previous;
  }

  /// Starts construction for factory `id`.
  ///
  /// Returns `None` if the caller should construct. If `id` is already being
  /// constructed on this context, returns a proxy for the dependency's type
  /// instead; if construction returned and members are being injected,
  /// returns that same instance.
  pub(crate) fn try_start_construction(
    &self,
    id: CircularFactoryId,
    dependency: &Dependency,
  ) -> Result<Option<Instance>, ProvisionError> {
    let reference = {
      let mut ledgers = self.ledgers.lock();
      if ledgers.start(id) {
        trace!(key = %dependency.key(), "construction started");
        return Ok(None);
      }
      ledgers.get(id).and_then(|ledger| ledger.current_reference().cloned())
    };

    if let Some(reference) = reference {
      if self.options.disable_circular_proxies {
        return Err(
          ErrorKind::CircularProxiesDisabled {
            key: dependency.key().clone(),
          }
          .into(),
        );
      }
      return Ok(Some(reference.under_construction()));
    }

    let (proxy, slot) = self.create_proxy(dependency.key())?;
    if let Some(ledger) = self.ledgers.lock().get_mut(id) {
      ledger.park_proxy(slot);
    }
    debug!(key = %dependency.key(), "circular dependency satisfied with a proxy");
    Ok(Some(proxy))
  }

  /// Guards the construction started by `try_start_construction`; the ledger
  /// is cleared if the guard drops before construction finishes.
  pub(crate) fn construction(&self, id: CircularFactoryId) -> ConstructionGuard<'_> {
    ConstructionGuard {
      context: self,
      id,
      armed: true,
    }
  }

  pub(crate) fn finish_construction(&self, id: CircularFactoryId, result: &Instance) {
    self.ledgers.lock().finish(id, result);
  }

  pub(crate) fn finish_construction_and_set_reference(&self, id: CircularFactoryId, result: &Instance) {
    self.ledgers.lock().finish_and_set_reference(id, result);
  }

  pub(crate) fn clear_current_reference(&self, id: CircularFactoryId) {
    self.ledgers.lock().remove(id);
  }

  /// Creates a proxy for `key`'s type, if the injector allows and supports it.
  pub(crate) fn create_proxy(&self, key: &Key) -> Result<(Instance, Arc<dyn DelegateSlot>), ErrorKind> {
    if self.options.disable_circular_proxies {
      return Err(ErrorKind::CircularProxiesDisabled { key: key.clone() });
    }
    self
      .proxies
      .create(key)
      .ok_or_else(|| ErrorKind::CannotProxy { key: key.clone() })
  }
}

impl fmt::Debug for ProvisionContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ProvisionContext")
      .field("thread", &self.thread)
      .field("thread_name", &self.thread_name)
      .field("dependency_chain", &self.dependency_chain())
      .finish_non_exhaustive()
  }
}

/// Restores the previous active dependency on drop.
pub(crate) struct DependencyGuard<'a> {
  context: &'a ProvisionContext,
  previous: Option<Dependency>,
}

impl Drop for DependencyGuard<'_> {
  fn drop(&mut self) {
    self.context.pop_state_and_set_dependency(self.previous.take());
  }
}

#[must_use]
pub(crate) struct ConstructionGuard<'a> {
  context: &'a ProvisionContext,
  id: CircularFactoryId,
  armed: bool,
}

impl<'a> ConstructionGuard<'a> {
  pub(crate) fn finish(mut self, result: &Instance) {
    self.armed = false;
    self.context.finish_construction(self.id, result);
  }

  /// Keeps `result` visible to re-entrant requests until the returned guard drops.
  pub(crate) fn finish_and_set_reference(mut self, result: &Instance) -> ReferenceGuard<'a> {
    self.armed = false;
    self.context.finish_construction_and_set_reference(self.id, result);
    ReferenceGuard {
      context: self.context,
      id: self.id,
    }
  }
}

impl Drop for ConstructionGuard<'_> {
  fn drop(&mut self) {
    if self.armed {
      trace!(id = self.id.0, "construction abandoned");
      self.context.clear_current_reference(self.id);
    }
  }
}

pub(crate) struct ReferenceGuard<'a> {
  context: &'a ProvisionContext,
  id: CircularFactoryId,
}

impl Drop for ReferenceGuard<'_> {
  fn drop(&mut self) {
    self.context.clear_current_reference(self.id);
  }
}

/// Keeps a context active; the outermost guard on a thread releases it.
pub(crate) struct ContextGuard {
  context: Arc<ProvisionContext>,
  top_level: Option<(u64, Arc<dyn ContextRegistry>)>,
}

impl Deref for ContextGuard {
  type Target = ProvisionContext;

  fn deref(&self) -> &ProvisionContext {
    &self.context
  }
}

impl Drop for ContextGuard {
  fn drop(&mut self) {
    if let Some((injector_id, registry)) = self.top_level.take() {
      let _ = ACTIVE_CONTEXTS.try_with(|active| active.borrow_mut().remove(&injector_id));
      registry.unregister(self.context.thread(), &self.context);
      trace!(injector = injector_id, "provisioning context released");
    }
  }
}

/// Returns this thread's active context for `injector_id`, creating and
/// registering one if there is none.
pub(crate) fn enter(
  injector_id: u64,
  registry: &Arc<dyn ContextRegistry>,
  create: impl FnOnce() -> ProvisionContext,
) -> ContextGuard {
  let active = ACTIVE_CONTEXTS.with(|active| active.borrow().get(&injector_id).cloned());
  if let Some(context) = active {
    return ContextGuard {
      context,
      top_level: None,
    };
  }

  let context = Arc::new(create());
  ACTIVE_CONTEXTS.with(|active| active.borrow_mut().insert(injector_id, context.clone()));
  registry.register(context.thread(), context.clone());
  trace!(injector = injector_id, "provisioning context entered");
  ContextGuard {
    context,
    top_level: Some((injector_id, registry.clone())),
  }
}
