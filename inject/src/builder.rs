//! Declares bindings and assembles them into an [`Injector`].

use crate::binding::{Binding, Source};
use crate::config::{InjectorOptions, Stage};
use crate::error::{BoxError, BuildError, ProvisionError};
use crate::factory::{Construct, ConstantFactory, ConstructorFactory, Factory, InjectMembers, Instance};
use crate::injector::Injector;
use crate::key::{Dependency, Key};
use crate::ledger::CircularFactoryId;
use crate::lock::CycleDetectingLockFactory;
use crate::proxy::{Proxy, ProxyFactory, ProxyRegistry, TypedProxyFactory};
use crate::registry::{ContextRegistry, ThreadContextRegistry};
use crate::scope::{Scope, Scoping, SingletonScope};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;
use tracing::debug;

enum Target {
  Instance(Instance),
  Constructor {
    construct: Construct,
    members: Option<InjectMembers>,
  },
  Custom(Arc<dyn Factory>),
}

struct PendingBinding {
  key: Key,
  scoping: Scoping,
  source: Source,
  target: Target,
}

/// Collects bindings, proxy capabilities and options for a new [`Injector`].
pub struct InjectorBuilder {
  bindings: Vec<PendingBinding>,
  options: InjectorOptions,
  proxies: ProxyRegistry,
  registry: Option<Arc<dyn ContextRegistry>>,
  locks: Option<Arc<CycleDetectingLockFactory<Key>>>,
}

// Manual Debug implementation, the closures inside bindings are opaque.
impl fmt::Debug for InjectorBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("InjectorBuilder")
      .field("bindings", &self.bindings.len())
      .field("options", &self.options)
      .field("proxies", &self.proxies.len())
      .field("registry", &self.registry.is_some())
      .field("locks", &self.locks.is_some())
      .finish()
  }
}

impl Default for InjectorBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl InjectorBuilder {
  pub fn new() -> Self {
    Self {
      bindings: Vec::new(),
      options: InjectorOptions::default(),
      proxies: ProxyRegistry::default(),
      registry: None,
      locks: None,
    }
  }

  // --- PRIVATE HELPERS ---

  fn push(&mut self, key: Key, scoping: Scoping, source: Source, target: Target) -> &mut Self {
    self.bindings.push(PendingBinding {
      key,
      scoping,
      source,
      target,
    });
    self
  }

  fn push_constructor<T: ?Sized + Any + Send + Sync>(
    &mut self,
    name: Option<&str>,
    scoping: Scoping,
    source: Source,
    factory: impl Fn(&Injector) -> Result<Arc<T>, ProvisionError> + Send + Sync + 'static,
  ) -> &mut Self {
    let construct: Construct = Box::new(move |injector: &Injector| factory(injector).map(Instance::new));
    self.push(
      Key::with_name::<T>(name),
      scoping,
      source,
      Target::Constructor {
        construct,
        members: None,
      },
    )
  }

  // --- PUBLIC API ---

  /// Starts a binding for `T`. The binding is recorded once a `to_*` target
  /// is chosen.
  #[track_caller]
  pub fn bind<T: ?Sized + Any + Send + Sync>(&mut self) -> BindingBuilder<'_, T> {
    BindingBuilder {
      builder: self,
      name: None,
      scoping: Scoping::Unscoped,
      source: Location::caller(),
      _marker: std::marker::PhantomData,
    }
  }

  // --- Instance Registration ---
  #[track_caller]
  pub fn add_instance<T: Any + Send + Sync>(&mut self, instance: T) -> &mut Self {
    let source = Location::caller();
    self.push(
      Key::of::<T>(),
      Scoping::Unscoped,
      source,
      Target::Instance(Instance::new(Arc::new(instance))),
    )
  }
  #[track_caller]
  pub fn add_instance_with_name<T: Any + Send + Sync>(&mut self, name: &str, instance: T) -> &mut Self {
    let source = Location::caller();
    self.push(
      Key::named::<T>(name),
      Scoping::Unscoped,
      source,
      Target::Instance(Instance::new(Arc::new(instance))),
    )
  }

  // --- Singleton Registration ---
  #[track_caller]
  pub fn add_singleton<T: Any + Send + Sync>(
    &mut self,
    factory: impl Fn(&Injector) -> Result<T, ProvisionError> + Send + Sync + 'static,
  ) -> &mut Self {
    let source = Location::caller();
    self.push_constructor(None, Scoping::Singleton, source, move |i| factory(i).map(Arc::new))
  }
  #[track_caller]
  pub fn add_singleton_with_name<T: Any + Send + Sync>(
    &mut self,
    name: &str,
    factory: impl Fn(&Injector) -> Result<T, ProvisionError> + Send + Sync + 'static,
  ) -> &mut Self {
    let source = Location::caller();
    self.push_constructor(Some(name), Scoping::Singleton, source, move |i| {
      factory(i).map(Arc::new)
    })
  }

  /// Like `add_singleton`, but created while the injector is built.
  #[track_caller]
  pub fn add_eager_singleton<T: Any + Send + Sync>(
    &mut self,
    factory: impl Fn(&Injector) -> Result<T, ProvisionError> + Send + Sync + 'static,
  ) -> &mut Self {
    let source = Location::caller();
    self.push_constructor(None, Scoping::EagerSingleton, source, move |i| {
      factory(i).map(Arc::new)
    })
  }
  #[track_caller]
  pub fn add_eager_singleton_with_name<T: Any + Send + Sync>(
    &mut self,
    name: &str,
    factory: impl Fn(&Injector) -> Result<T, ProvisionError> + Send + Sync + 'static,
  ) -> &mut Self {
    let source = Location::caller();
    self.push_constructor(Some(name), Scoping::EagerSingleton, source, move |i| {
      factory(i).map(Arc::new)
    })
  }

  // --- Transient Registration ---
  #[track_caller]
  pub fn add_transient<T: Any + Send + Sync>(
    &mut self,
    factory: impl Fn(&Injector) -> Result<T, ProvisionError> + Send + Sync + 'static,
  ) -> &mut Self {
    let source = Location::caller();
    self.push_constructor(None, Scoping::Unscoped, source, move |i| factory(i).map(Arc::new))
  }
  #[track_caller]
  pub fn add_transient_with_name<T: Any + Send + Sync>(
    &mut self,
    name: &str,
    factory: impl Fn(&Injector) -> Result<T, ProvisionError> + Send + Sync + 'static,
  ) -> &mut Self {
    let source = Location::caller();
    self.push_constructor(Some(name), Scoping::Unscoped, source, move |i| {
      factory(i).map(Arc::new)
    })
  }

  // --- Trait Registration ---
  #[track_caller]
  pub fn add_singleton_trait<I: ?Sized + Any + Send + Sync>(
    &mut self,
    factory: impl Fn(&Injector) -> Result<Arc<I>, ProvisionError> + Send + Sync + 'static,
  ) -> &mut Self {
    let source = Location::caller();
    self.push_constructor(None, Scoping::Singleton, source, factory)
  }
  #[track_caller]
  pub fn add_singleton_trait_with_name<I: ?Sized + Any + Send + Sync>(
    &mut self,
    name: &str,
    factory: impl Fn(&Injector) -> Result<Arc<I>, ProvisionError> + Send + Sync + 'static,
  ) -> &mut Self {
    let source = Location::caller();
    self.push_constructor(Some(name), Scoping::Singleton, source, factory)
  }
  #[track_caller]
  pub fn add_transient_trait<I: ?Sized + Any + Send + Sync>(
    &mut self,
    factory: impl Fn(&Injector) -> Result<Arc<I>, ProvisionError> + Send + Sync + 'static,
  ) -> &mut Self {
    let source = Location::caller();
    self.push_constructor(None, Scoping::Unscoped, source, factory)
  }
  #[track_caller]
  pub fn add_transient_trait_with_name<I: ?Sized + Any + Send + Sync>(
    &mut self,
    name: &str,
    factory: impl Fn(&Injector) -> Result<Arc<I>, ProvisionError> + Send + Sync + 'static,
  ) -> &mut Self {
    let source = Location::caller();
    self.push_constructor(Some(name), Scoping::Unscoped, source, factory)
  }

  // --- Proxies ---

  /// Lets circular dependencies on `I` be satisfied with a [`Proxy`].
  ///
  /// `wrap` upcasts the proxy to `Arc<I>`, which requires `Proxy<I>: I`;
  /// usually this is just `|proxy| proxy`.
  pub fn proxy<I: ?Sized + Any + Send + Sync>(
    &mut self,
    wrap: impl Fn(Arc<Proxy<I>>) -> Arc<I> + Send + Sync + 'static,
  ) -> &mut Self {
    self
      .proxies
      .insert::<I>(Arc::new(TypedProxyFactory::<I>::new(wrap)));
    self
  }

  /// Registers a custom proxy capability for `I`.
  pub fn proxy_factory<I: ?Sized + Any>(&mut self, factory: impl ProxyFactory + 'static) -> &mut Self {
    self.proxies.insert::<I>(Arc::new(factory));
    self
  }

  // --- Configuration ---

  pub fn options(&mut self, options: InjectorOptions) -> &mut Self {
    self.options = options;
    self
  }

  pub fn disable_circular_proxies(&mut self, disable: bool) -> &mut Self {
    self.options.disable_circular_proxies = disable;
    self
  }

  pub fn stage(&mut self, stage: Stage) -> &mut Self {
    self.options.stage = stage;
    self
  }

  /// Replaces the default [`ThreadContextRegistry`].
  pub fn context_registry(&mut self, registry: Arc<dyn ContextRegistry>) -> &mut Self {
    self.registry = Some(registry);
    self
  }

  /// Uses `locks` for singleton creation locks instead of a private factory.
  pub fn lock_factory(&mut self, locks: Arc<CycleDetectingLockFactory<Key>>) -> &mut Self {
    self.locks = Some(locks);
    self
  }

  /// Validates the bindings, wraps them in their scopes and creates eager
  /// singletons.
  pub fn build(self) -> Result<Injector, BuildError> {
    let Self {
      bindings: pending,
      options,
      proxies,
      registry,
      locks,
    } = self;

    let registry = registry.unwrap_or_else(|| Arc::new(ThreadContextRegistry::new()));
    let singletons = SingletonScope::new(locks.unwrap_or_default(), registry.clone());

    let mut bindings: HashMap<Key, Arc<Binding>> = HashMap::with_capacity(pending.len());
    let mut eager = Vec::new();
    for (index, binding) in pending.into_iter().enumerate() {
      let PendingBinding {
        key,
        scoping,
        source,
        target,
      } = binding;
      if let Some(first) = bindings.get(&key) {
        return Err(BuildError::DuplicateBinding {
          key,
          first: first.source(),
          second: source,
        });
      }

      let factory: Arc<dyn Factory> = match target {
        Target::Instance(instance) => Arc::new(ConstantFactory::new(instance)),
        Target::Constructor { construct, members } => {
          let raw = ConstructorFactory::new(CircularFactoryId(index), key.clone(), construct, members);
          apply_scope(&singletons, &key, &scoping, Arc::new(raw))
        }
        Target::Custom(factory) => apply_scope(&singletons, &key, &scoping, factory),
      };
      if scoping.is_eager_in(options.stage) && factory.fast_path().is_none() {
        eager.push(key.clone());
      }
      bindings.insert(key.clone(), Arc::new(Binding::new(key, scoping, source, factory)));
    }

    let injector = Injector::new(bindings, options, proxies, registry);
    for key in eager {
      debug!(key = %key, "creating eager singleton");
      injector.get_instance(&Dependency::nullable(key))?;
    }
    Ok(injector)
  }
}

fn apply_scope(
  singletons: &SingletonScope,
  key: &Key,
  scoping: &Scoping,
  factory: Arc<dyn Factory>,
) -> Arc<dyn Factory> {
  match scoping {
    Scoping::Unscoped => factory,
    Scoping::Singleton | Scoping::EagerSingleton => singletons.scope(key, factory),
    Scoping::Custom(scope) => scope.scope(key, factory),
  }
}

/// Fluent declaration of a single binding, started by
/// [`InjectorBuilder::bind`].
#[must_use = "a binding is only recorded once a `to_*` target is chosen"]
pub struct BindingBuilder<'a, T: ?Sized> {
  builder: &'a mut InjectorBuilder,
  name: Option<String>,
  scoping: Scoping,
  source: Source,
  _marker: std::marker::PhantomData<fn() -> Arc<T>>,
}

impl<'a, T: ?Sized + Any + Send + Sync> BindingBuilder<'a, T> {
  pub fn named(mut self, name: &str) -> Self {
    self.name = Some(name.to_owned());
    self
  }

  pub fn in_scope(mut self, scoping: Scoping) -> Self {
    self.scoping = scoping;
    self
  }

  fn key(&self) -> Key {
    Key::with_name::<T>(self.name.as_deref())
  }

  fn finish(self, target: Target) -> &'a mut InjectorBuilder {
    let key = self.key();
    self.builder.push(key, self.scoping, self.source, target)
  }

  pub fn to_instance(self, instance: Arc<T>) -> &'a mut InjectorBuilder {
    self.finish(Target::Instance(Instance::new(instance)))
  }

  pub fn to_factory(
    self,
    factory: impl Fn(&Injector) -> Result<Arc<T>, ProvisionError> + Send + Sync + 'static,
  ) -> &'a mut InjectorBuilder {
    let construct: Construct = Box::new(move |injector: &Injector| factory(injector).map(Instance::new));
    self.finish(Target::Constructor {
      construct,
      members: None,
    })
  }

  /// A factory whose errors are not [`ProvisionError`]s. Failures are wrapped
  /// as [`ErrorKind::ConstructionFailed`](crate::ErrorKind::ConstructionFailed)
  /// for this binding's key, with the original error as the source.
  pub fn to_fallible_factory<E>(
    self,
    factory: impl Fn(&Injector) -> Result<Arc<T>, E> + Send + Sync + 'static,
  ) -> &'a mut InjectorBuilder
  where
    E: Into<BoxError>,
  {
    let key = self.key();
    let construct: Construct = Box::new(move |injector: &Injector| {
      factory(injector)
        .map(Instance::new)
        .map_err(|cause| ProvisionError::construction(key.clone(), cause))
    });
    self.finish(Target::Constructor {
      construct,
      members: None,
    })
  }

  /// A factory that may produce null; only nullable requests accept it.
  pub fn to_nullable_factory(
    self,
    factory: impl Fn(&Injector) -> Result<Option<Arc<T>>, ProvisionError> + Send + Sync + 'static,
  ) -> &'a mut InjectorBuilder {
    let construct: Construct = Box::new(move |injector: &Injector| {
      factory(injector).map(|value| value.map_or_else(Instance::null, Instance::new))
    });
    self.finish(Target::Constructor {
      construct,
      members: None,
    })
  }

  /// Constructs with `factory`, then injects members with `members`.
  ///
  /// Requests for this binding made while `members` runs on the same thread
  /// receive the instance under construction.
  pub fn to_factory_with_members(
    self,
    factory: impl Fn(&Injector) -> Result<Arc<T>, ProvisionError> + Send + Sync + 'static,
    members: impl Fn(&Injector, &Arc<T>) -> Result<(), ProvisionError> + Send + Sync + 'static,
  ) -> &'a mut InjectorBuilder {
    let construct: Construct = Box::new(move |injector: &Injector| factory(injector).map(Instance::new));
    let inject_members: InjectMembers = Box::new(move |injector: &Injector, instance: &Instance| match instance.downcast::<T>() {
      Some(value) => members(injector, &value),
      None => Ok(()),
    });
    self.finish(Target::Constructor {
      construct,
      members: Some(inject_members),
    })
  }

  /// Binds to a caller-supplied factory. The binding's scope still applies.
  pub fn to_custom(self, factory: Arc<dyn Factory>) -> &'a mut InjectorBuilder {
    self.finish(Target::Custom(factory))
  }
}
