//! Scopes: lifecycle policies wrapped around a binding's factory.

use crate::config::Stage;
use crate::context::ProvisionContext;
use crate::error::{CycleParticipant, ErrorKind, ProvisionError, ThreadCycleReport};
use crate::factory::{Factory, Instance};
use crate::injector::Injector;
use crate::key::{Dependency, Key};
use crate::lock::{CycleDetectingLock, CycleDetectingLockFactory, LocksCycle};
use crate::proxy::DelegateSlot;
use crate::registry::ContextRegistry;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A lifecycle policy: decides when the wrapped creator runs and which
/// instance callers receive.
pub trait Scope: Send + Sync {
  fn scope(&self, key: &Key, creator: Arc<dyn Factory>) -> Arc<dyn Factory>;
}

/// The scope a binding is declared in.
#[derive(Clone, Default)]
pub enum Scoping {
  /// A new instance per request.
  #[default]
  Unscoped,
  /// One instance per injector, created on first use.
  Singleton,
  /// One instance per injector, created while the injector is built.
  EagerSingleton,
  Custom(Arc<dyn Scope>),
}

impl Scoping {
  pub fn is_singleton(&self) -> bool {
    matches!(self, Scoping::Singleton | Scoping::EagerSingleton)
  }

  pub(crate) fn is_eager_in(&self, stage: Stage) -> bool {
    match self {
      Scoping::EagerSingleton => true,
      Scoping::Singleton => stage == Stage::Production,
      _ => false,
    }
  }
}

impl fmt::Debug for Scoping {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Scoping::Unscoped => f.write_str("Unscoped"),
      Scoping::Singleton => f.write_str("Singleton"),
      Scoping::EagerSingleton => f.write_str("EagerSingleton"),
      Scoping::Custom(_) => f.write_str("Custom(..)"),
    }
  }
}

/// At most one instance per key, across all threads, without deadlocking on
/// cyclic singleton graphs.
pub struct SingletonScope {
  locks: Arc<CycleDetectingLockFactory<Key>>,
  registry: Arc<dyn ContextRegistry>,
}

impl SingletonScope {
  pub fn new(locks: Arc<CycleDetectingLockFactory<Key>>, registry: Arc<dyn ContextRegistry>) -> Self {
    Self { locks, registry }
  }
}

impl Scope for SingletonScope {
  fn scope(&self, key: &Key, creator: Arc<dyn Factory>) -> Arc<dyn Factory> {
    Arc::new(SingletonFactory {
      key: key.clone(),
      creator,
      lock: self.locks.create(key.clone()),
      instance: OnceCell::new(),
      pending_proxies: Mutex::new(Vec::new()),
      registry: self.registry.clone(),
    })
  }
}

impl fmt::Debug for SingletonScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("SingletonScope")
  }
}

struct SingletonFactory {
  key: Key,
  creator: Arc<dyn Factory>,
  lock: CycleDetectingLock<Key>,
  // Published once; a null value is `Some(Instance::null())`.
  instance: OnceCell<Instance>,
  // Delegate slots of proxies handed to threads that hit a creation cycle.
  pending_proxies: Mutex<Vec<Arc<dyn DelegateSlot>>>,
  registry: Arc<dyn ContextRegistry>,
}

impl SingletonFactory {
  fn create(
    &self,
    injector: &Injector,
    context: &ProvisionContext,
    dependency: &Dependency,
  ) -> Result<Instance, ProvisionError> {
    // Another thread may have published while we waited for the lock.
    if let Some(instance) = self.instance.get() {
      return Ok(instance.clone());
    }

    let provided = self.creator.get(injector, context, dependency)?;

    // The creator may have re-entered this scope and published already.
    if let Some(instance) = self.instance.get() {
      if !provided.is_incomplete() && !instance.same_as(&provided) {
        warn!(key = %self.key, "singleton was called recursively returning different results");
      }
      return Ok(instance.clone());
    }
    // A proxy or a partially injected instance belongs to a construction still
    // running further up this thread's stack; only that call may publish.
    if provided.is_incomplete() {
      return Ok(provided);
    }

    self.publish(&provided);
    Ok(provided)
  }

  fn publish(&self, instance: &Instance) {
    let mut pending = self.pending_proxies.lock();
    if self.instance.set(instance.clone()).is_err() {
      return;
    }
    for slot in pending.drain(..) {
      if let Err(err) = slot.register_delegate(instance) {
        warn!(key = %self.key, error = %err, "could not register delegate for cross-thread proxy");
      }
    }
    debug!(key = %self.key, null = instance.is_null(), "singleton created");
  }

  /// Called instead of blocking when waiting for the lock would deadlock.
  fn proxy_for_cycle(&self, context: &ProvisionContext, cycle: LocksCycle<Key>) -> Result<Instance, ProvisionError> {
    let mut pending = self.pending_proxies.lock();
    if let Some(instance) = self.instance.get() {
      return Ok(instance.clone());
    }

    let expected = context
      .dependency()
      .map(|dependency| dependency.key().clone())
      .unwrap_or_else(|| self.key.clone());
    match context.create_proxy(&expected) {
      Ok((proxy, slot)) => {
        pending.push(slot);
        debug!(key = %self.key, threads = cycle.len(), "singleton creation cycle broken with a proxy");
        Ok(proxy)
      }
      Err(proxy_error) => {
        drop(pending);
        let report = self.describe(&cycle);
        warn!(key = %self.key, "singleton creation cycle cannot be broken with a proxy");
        Err(
          ErrorKind::ThreadCycle {
            report,
            proxy_error: Box::new(proxy_error),
          }
          .into(),
        )
      }
    }
  }

  fn describe(&self, cycle: &LocksCycle<Key>) -> ThreadCycleReport {
    let participants = cycle
      .iter()
      .map(|(thread, holding)| {
        let context = self.registry.context_for(thread);
        CycleParticipant {
          thread,
          thread_name: context
            .as_ref()
            .and_then(|c| c.thread_name().map(str::to_owned)),
          holding: holding.to_vec(),
          dependency_chain: context.map(|c| c.dependency_chain()).unwrap_or_default(),
        }
      })
      .collect();
    ThreadCycleReport { participants }
  }
}

impl Factory for SingletonFactory {
  fn get(
    &self,
    injector: &Injector,
    context: &ProvisionContext,
    dependency: &Dependency,
  ) -> Result<Instance, ProvisionError> {
    if let Some(instance) = self.instance.get() {
      return Ok(instance.clone());
    }
    match self.lock.lock_or_detect_cycle() {
      Ok(_guard) => self.create(injector, context, dependency),
      Err(cycle) => self.proxy_for_cycle(context, cycle),
    }
  }
}
