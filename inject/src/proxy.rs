//! Stand-in objects that satisfy a circular dependency until the real
//! instance exists.
//!
//! The engine only ever calls [`ProxyFactory::create_proxy`] and
//! [`DelegateSlot::register_delegate`]. The shipped mechanism is [`Proxy`]: a
//! late-bound delegate that a trait implementation forwards to.
//!
//! ```
//! use fibre_inject::{Injector, Proxy};
//! use std::sync::Arc;
//!
//! trait Clock: Send + Sync {
//!   fn now(&self) -> u64;
//! }
//!
//! impl Clock for Proxy<dyn Clock> {
//!   fn now(&self) -> u64 {
//!     self.get().now()
//!   }
//! }
//!
//! let mut builder = Injector::builder();
//! builder.proxy::<dyn Clock>(|proxy| proxy);
//! ```

use crate::factory::Instance;
use crate::key::Key;
use once_cell::sync::OnceCell;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by a circular proxy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
  #[error("circular proxy for {type_name} was used before its delegate was constructed")]
  NotReady { type_name: &'static str },

  #[error("circular proxy for {type_name} already has a delegate")]
  AlreadySet { type_name: &'static str },

  #[error("delegate registered for circular proxy of {type_name} has a different type")]
  WrongType { type_name: &'static str },

  #[error("delegate registered for circular proxy of {type_name} is null")]
  NullDelegate { type_name: &'static str },
}

/// The receiving end of a proxy: accepts the real instance once it exists.
pub trait DelegateSlot: Send + Sync {
  fn register_delegate(&self, delegate: &Instance) -> Result<(), ProxyError>;
}

/// Creates proxies for one expected type.
pub trait ProxyFactory: Send + Sync {
  /// Returns the proxy, already shaped as the expected type, and the slot its
  /// delegate will be registered through.
  fn create_proxy(&self) -> (Instance, Arc<dyn DelegateSlot>);
}

/// A late-bound stand-in for an `I`, usually a trait object.
///
/// Implement the trait for `Proxy<dyn Trait>` by forwarding every method to
/// [`Proxy::get`].
pub struct Proxy<I: ?Sized> {
  delegate: OnceCell<Arc<I>>,
}

impl<I: ?Sized + Send + Sync + 'static> Proxy<I> {
  pub fn new() -> Self {
    Self {
      delegate: OnceCell::new(),
    }
  }

  /// The real instance, if construction has finished.
  pub fn try_get(&self) -> Result<&Arc<I>, ProxyError> {
    self.delegate.get().ok_or(ProxyError::NotReady {
      type_name: std::any::type_name::<I>(),
    })
  }

  /// The real instance.
  ///
  /// # Panics
  ///
  /// Panics if called before the delegate was registered, which happens when
  /// a constructor uses a circular dependency before construction finishes.
  pub fn get(&self) -> &Arc<I> {
    match self.try_get() {
      Ok(delegate) => delegate,
      Err(err) => panic!("{}", err),
    }
  }

  pub fn is_ready(&self) -> bool {
    self.delegate.get().is_some()
  }
}

impl<I: ?Sized + Send + Sync + 'static> Default for Proxy<I> {
  fn default() -> Self {
    Self::new()
  }
}

impl<I: ?Sized + Send + Sync + 'static> DelegateSlot for Proxy<I> {
  fn register_delegate(&self, delegate: &Instance) -> Result<(), ProxyError> {
    let type_name = std::any::type_name::<I>();
    if delegate.is_null() {
      return Err(ProxyError::NullDelegate { type_name });
    }
    let real = delegate
      .downcast::<I>()
      .ok_or(ProxyError::WrongType { type_name })?;
    self
      .delegate
      .set(real)
      .map_err(|_| ProxyError::AlreadySet { type_name })
  }
}

impl<I: ?Sized> fmt::Debug for Proxy<I> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Proxy")
      .field("type", &std::any::type_name::<I>())
      .field("ready", &self.delegate.get().is_some())
      .finish()
  }
}

/// Builds a `Proxy<I>` and shapes it as `I` with the user's coercion.
pub(crate) struct TypedProxyFactory<I: ?Sized> {
  wrap: Box<dyn Fn(Arc<Proxy<I>>) -> Arc<I> + Send + Sync>,
}

impl<I: ?Sized + Send + Sync + 'static> TypedProxyFactory<I> {
  pub(crate) fn new(wrap: impl Fn(Arc<Proxy<I>>) -> Arc<I> + Send + Sync + 'static) -> Self {
    Self {
      wrap: Box::new(wrap),
    }
  }
}

impl<I: ?Sized + Send + Sync + 'static> ProxyFactory for TypedProxyFactory<I> {
  fn create_proxy(&self) -> (Instance, Arc<dyn DelegateSlot>) {
    let proxy = Arc::new(Proxy::<I>::new());
    let shaped = (self.wrap)(proxy.clone());
    (Instance::circular_proxy(shaped), proxy)
  }
}

/// Proxy capabilities known to one injector, by expected type.
#[derive(Default)]
pub(crate) struct ProxyRegistry {
  factories: HashMap<TypeId, Arc<dyn ProxyFactory>>,
}

impl ProxyRegistry {
  pub(crate) fn insert<I: ?Sized + Any>(&mut self, factory: Arc<dyn ProxyFactory>) {
    self.factories.insert(TypeId::of::<I>(), factory);
  }

  pub(crate) fn create(&self, key: &Key) -> Option<(Instance, Arc<dyn DelegateSlot>)> {
    self
      .factories
      .get(&key.type_id())
      .map(|factory| factory.create_proxy())
  }

  pub(crate) fn len(&self) -> usize {
    self.factories.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  trait Greeter: Send + Sync {
    fn greet(&self) -> String;
  }

  struct English;
  impl Greeter for English {
    fn greet(&self) -> String {
      "hello".into()
    }
  }

  impl Greeter for Proxy<dyn Greeter> {
    fn greet(&self) -> String {
      self.get().greet()
    }
  }

  #[test]
  fn unready_proxy_fails_predictably() {
    let proxy = Proxy::<dyn Greeter>::new();
    assert!(matches!(proxy.try_get(), Err(ProxyError::NotReady { .. })));
  }

  #[test]
  #[should_panic(expected = "used before its delegate was constructed")]
  fn calling_through_unready_proxy_panics() {
    let proxy = Proxy::<dyn Greeter>::new();
    proxy.greet();
  }

  #[test]
  fn registered_delegate_is_forwarded_to() {
    let factory = TypedProxyFactory::<dyn Greeter>::new(|proxy| proxy);
    let (shaped, slot) = factory.create_proxy();
    assert!(shaped.is_circular_proxy());
    let greeter = shaped.downcast::<dyn Greeter>().unwrap();

    let real: Arc<dyn Greeter> = Arc::new(English);
    slot.register_delegate(&Instance::new(real.clone())).unwrap();
    assert_eq!(greeter.greet(), "hello");

    let again = slot.register_delegate(&Instance::new(real));
    assert!(matches!(again, Err(ProxyError::AlreadySet { .. })));
  }

  #[test]
  fn delegate_of_wrong_type_or_null_is_rejected() {
    let proxy = Proxy::<dyn Greeter>::new();
    let wrong = proxy.register_delegate(&Instance::new(Arc::new(5_u32)));
    assert!(matches!(wrong, Err(ProxyError::WrongType { .. })));
    let null = proxy.register_delegate(&Instance::null());
    assert!(matches!(null, Err(ProxyError::NullDelegate { .. })));
    assert!(!proxy.is_ready());
  }
}
