//! The `Injector`: an immutable set of bindings and the entry point for
//! provisioning values.

use crate::binding::Binding;
use crate::builder::InjectorBuilder;
use crate::config::InjectorOptions;
use crate::context::{self, ContextGuard, ProvisionContext};
use crate::error::{ErrorKind, ProvisionError};
use crate::factory::Instance;
use crate::key::{Dependency, Key};
use crate::proxy::ProxyRegistry;
use crate::registry::ContextRegistry;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_INJECTOR_ID: AtomicU64 = AtomicU64::new(0);

pub(crate) struct InjectorInner {
  id: u64,
  bindings: HashMap<Key, Arc<Binding>>,
  options: InjectorOptions,
  proxies: Arc<ProxyRegistry>,
  registry: Arc<dyn ContextRegistry>,
}

/// Provisions values from a fixed set of bindings.
///
/// Cloning is cheap and every clone shares the same singletons. An injector is
/// created with [`Injector::builder`].
#[derive(Clone)]
pub struct Injector {
  inner: Arc<InjectorInner>,
}

impl Injector {
  pub fn builder() -> InjectorBuilder {
    InjectorBuilder::new()
  }

  pub(crate) fn new(
    bindings: HashMap<Key, Arc<Binding>>,
    options: InjectorOptions,
    proxies: ProxyRegistry,
    registry: Arc<dyn ContextRegistry>,
  ) -> Self {
    Self {
      inner: Arc::new(InjectorInner {
        id: NEXT_INJECTOR_ID.fetch_add(1, Ordering::Relaxed),
        bindings,
        options,
        proxies: Arc::new(proxies),
        registry,
      }),
    }
  }

  pub fn options(&self) -> &InjectorOptions {
    &self.inner.options
  }

  pub fn binding(&self, key: &Key) -> Option<&Binding> {
    self.inner.bindings.get(key).map(|binding| &**binding)
  }

  pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
    self.inner.bindings.values().map(|binding| &**binding)
  }

  // --- Resolution ---

  /// Resolves the unnamed binding for `T`.
  pub fn get<T: ?Sized + Any + Send + Sync>(&self) -> Result<Arc<T>, ProvisionError> {
    self.get_required(Key::of::<T>())
  }

  pub fn get_named<T: ?Sized + Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, ProvisionError> {
    self.get_required(Key::named::<T>(name))
  }

  /// Resolves `T`, accepting a null value from a nullable factory.
  pub fn get_nullable<T: ?Sized + Any + Send + Sync>(&self) -> Result<Option<Arc<T>>, ProvisionError> {
    self.get_optional(Key::of::<T>())
  }

  pub fn get_nullable_named<T: ?Sized + Any + Send + Sync>(
    &self,
    name: &str,
  ) -> Result<Option<Arc<T>>, ProvisionError> {
    self.get_optional(Key::named::<T>(name))
  }

  /// Provisions the type-erased value for `dependency`.
  ///
  /// The first call on a thread enters a provisioning context that every nested
  /// call made by factories on that thread shares. Errors carry one frame per
  /// binding on the path to the failure.
  pub fn get_instance(&self, dependency: &Dependency) -> Result<Instance, ProvisionError> {
    let key = dependency.key();
    let binding = self
      .inner
      .bindings
      .get(key)
      .ok_or_else(|| ErrorKind::MissingBinding { key: key.clone() })?;

    let instance = match binding.factory().fast_path() {
      Some(instance) => instance,
      None => {
        let context = self.enter_context();
        let _dependency = context.push_dependency(dependency.clone(), binding.source());
        binding
          .factory()
          .get(self, &context, dependency)
          .map_err(|err| err.with_frame(key.clone(), binding.source()))?
      }
    };

    if instance.is_null() && !dependency.is_nullable() {
      return Err(
        ProvisionError::new(ErrorKind::NullInjected {
          key: key.clone(),
          bound_at: binding.source(),
        })
        .with_frame(key.clone(), binding.source()),
      );
    }
    Ok(instance)
  }

  /// A handle that resolves `T` on each call instead of now.
  ///
  /// Holding a provider does not keep the injector alive.
  pub fn provider<T: ?Sized + Any + Send + Sync>(&self) -> Provider<T> {
    Provider::new(Arc::downgrade(&self.inner), Key::of::<T>())
  }

  pub fn provider_named<T: ?Sized + Any + Send + Sync>(&self, name: &str) -> Provider<T> {
    Provider::new(Arc::downgrade(&self.inner), Key::named::<T>(name))
  }

  // --- PRIVATE HELPERS ---

  pub(crate) fn enter_context(&self) -> ContextGuard {
    let inner = &self.inner;
    context::enter(inner.id, &inner.registry, || {
      ProvisionContext::new(inner.options.clone(), inner.proxies.clone())
    })
  }

  fn get_required<T: ?Sized + Any + Send + Sync>(&self, key: Key) -> Result<Arc<T>, ProvisionError> {
    let instance = self.get_instance(&Dependency::new(key.clone()))?;
    downcast(key, &instance)
  }

  fn get_optional<T: ?Sized + Any + Send + Sync>(&self, key: Key) -> Result<Option<Arc<T>>, ProvisionError> {
    let instance = self.get_instance(&Dependency::nullable(key.clone()))?;
    if instance.is_null() {
      return Ok(None);
    }
    downcast(key, &instance).map(Some)
  }
}

fn downcast<T: ?Sized + Any + Send + Sync>(key: Key, instance: &Instance) -> Result<Arc<T>, ProvisionError> {
  instance.downcast::<T>().ok_or_else(|| {
    ErrorKind::TypeMismatch {
      key,
      expected: type_name::<T>(),
    }
    .into()
  })
}

impl fmt::Debug for Injector {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Injector")
      .field("id", &self.inner.id)
      .field("bindings", &self.inner.bindings.len())
      .field("proxies", &self.inner.proxies.len())
      .field("options", &self.inner.options)
      .finish()
  }
}

/// Deferred lookup of one key.
pub struct Provider<T: ?Sized> {
  injector: Weak<InjectorInner>,
  key: Key,
  _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + Any + Send + Sync> Provider<T> {
  fn new(injector: Weak<InjectorInner>, key: Key) -> Self {
    Self {
      injector,
      key,
      _marker: PhantomData,
    }
  }

  pub fn key(&self) -> &Key {
    &self.key
  }

  pub fn get(&self) -> Result<Arc<T>, ProvisionError> {
    self.injector()?.get_required(self.key.clone())
  }

  pub fn get_nullable(&self) -> Result<Option<Arc<T>>, ProvisionError> {
    self.injector()?.get_optional(self.key.clone())
  }

  fn injector(&self) -> Result<Injector, ProvisionError> {
    self
      .injector
      .upgrade()
      .map(|inner| Injector { inner })
      .ok_or_else(|| ErrorKind::InjectorDropped { key: self.key.clone() }.into())
  }
}

impl<T: ?Sized> Clone for Provider<T> {
  fn clone(&self) -> Self {
    Self {
      injector: self.injector.clone(),
      key: self.key.clone(),
      _marker: PhantomData,
    }
  }
}

impl<T: ?Sized> fmt::Debug for Provider<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("Provider").field(&self.key).finish()
  }
}
