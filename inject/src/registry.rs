//! Lookup of other threads' active provisioning contexts.

use crate::context::ProvisionContext;
use dashmap::DashMap;
use std::sync::Arc;
use std::thread::ThreadId;

/// Maps threads to the provisioning contexts they are currently running.
///
/// A context is registered when its thread starts a top-level provisioning
/// call and unregistered when that call returns. The singleton scope reads it
/// to describe what the other threads of a creation cycle are doing. A
/// registry may be shared by several injectors; a thread nested in calls to
/// more than one of them has one context per injector, and lookups see the
/// innermost.
pub trait ContextRegistry: Send + Sync {
  fn register(&self, thread: ThreadId, context: Arc<ProvisionContext>);
  /// Removes `context`, leaving other contexts of `thread` in place.
  fn unregister(&self, thread: ThreadId, context: &Arc<ProvisionContext>);
  fn context_for(&self, thread: ThreadId) -> Option<Arc<ProvisionContext>>;
}

/// The default registry.
#[derive(Default)]
pub struct ThreadContextRegistry {
  // Innermost context last.
  contexts: DashMap<ThreadId, Vec<Arc<ProvisionContext>>>,
}

impl ThreadContextRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of threads with an active top-level provisioning call.
  pub fn len(&self) -> usize {
    self.contexts.len()
  }

  pub fn is_empty(&self) -> bool {
    self.contexts.is_empty()
  }
}

impl ContextRegistry for ThreadContextRegistry {
  fn register(&self, thread: ThreadId, context: Arc<ProvisionContext>) {
    self.contexts.entry(thread).or_default().push(context);
  }

  fn unregister(&self, thread: ThreadId, context: &Arc<ProvisionContext>) {
    if let Some(mut stack) = self.contexts.get_mut(&thread) {
      stack.retain(|active| !Arc::ptr_eq(active, context));
    }
    self.contexts.remove_if(&thread, |_, stack| stack.is_empty());
  }

  fn context_for(&self, thread: ThreadId) -> Option<Arc<ProvisionContext>> {
    self
      .contexts
      .get(&thread)
      .and_then(|stack| stack.last().cloned())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::InjectorOptions;
  use crate::proxy::ProxyRegistry;

  fn context() -> Arc<ProvisionContext> {
    Arc::new(ProvisionContext::new(
      InjectorOptions::default(),
      Arc::new(ProxyRegistry::default()),
    ))
  }

  #[test]
  fn nested_contexts_unregister_independently() {
    let registry = ThreadContextRegistry::new();
    let thread = std::thread::current().id();
    let (outer, inner) = (context(), context());

    registry.register(thread, outer.clone());
    registry.register(thread, inner.clone());
    assert!(Arc::ptr_eq(&registry.context_for(thread).unwrap(), &inner));

    registry.unregister(thread, &inner);
    assert!(Arc::ptr_eq(&registry.context_for(thread).unwrap(), &outer));
    assert_eq!(registry.len(), 1);

    registry.unregister(thread, &outer);
    assert!(registry.context_for(thread).is_none());
    assert!(registry.is_empty());
  }
}
