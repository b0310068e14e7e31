//! Construction strategies and the type-erased values they produce.

use crate::context::ProvisionContext;
use crate::error::ProvisionError;
use crate::injector::Injector;
use crate::key::{Dependency, Key};
use crate::ledger::CircularFactoryId;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

type AnyArc = Arc<dyn Any + Send + Sync>;

/// A value produced by a factory: null, or a shared `Arc<T>` behind `Any`.
#[derive(Clone)]
pub struct Instance {
  value: Option<AnyArc>,
  circular_proxy: bool,
  under_construction: bool,
}

impl Instance {
  pub fn new<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Self {
    Self {
      value: Some(Arc::new(value)),
      circular_proxy: false,
      under_construction: false,
    }
  }

  pub fn null() -> Self {
    Self {
      value: None,
      circular_proxy: false,
      under_construction: false,
    }
  }

  pub(crate) fn circular_proxy<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Self {
    Self {
      value: Some(Arc::new(value)),
      circular_proxy: true,
      under_construction: false,
    }
  }

  /// The same value, marked as handed out while its members are injected.
  pub(crate) fn under_construction(&self) -> Self {
    Self {
      value: self.value.clone(),
      circular_proxy: self.circular_proxy,
      under_construction: true,
    }
  }

  pub fn is_null(&self) -> bool {
    self.value.is_none()
  }

  /// True if this is a proxy standing in for an instance still under construction.
  pub fn is_circular_proxy(&self) -> bool {
    self.circular_proxy
  }

  /// True if the value is not complete yet: a circular proxy, or an instance
  /// whose members are still being injected. Scopes must not cache it.
  pub fn is_incomplete(&self) -> bool {
    self.circular_proxy || self.under_construction
  }

  /// The value as an `Arc<T>`, or `None` if null or of another type.
  pub fn downcast<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
    self
      .value
      .as_ref()
      .and_then(|any| any.downcast_ref::<Arc<T>>())
      .cloned()
  }

  /// Identity comparison: both null, or both the same allocation.
  pub fn same_as(&self, other: &Instance) -> bool {
    match (&self.value, &other.value) {
      (None, None) => true,
      (Some(a), Some(b)) => Arc::ptr_eq(a, b),
      _ => false,
    }
  }
}

impl fmt::Debug for Instance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.value {
      None => f.write_str("Instance(null)"),
      Some(any) if self.circular_proxy => write!(f, "Instance(proxy {:p})", Arc::as_ptr(any)),
      Some(any) if self.under_construction => write!(f, "Instance(partial {:p})", Arc::as_ptr(any)),
      Some(any) => write!(f, "Instance({:p})", Arc::as_ptr(any)),
    }
  }
}

/// A construction strategy: given a provisioning context, produce a value.
///
/// Scopes wrap factories in other factories, so the same trait describes both
/// a raw constructor and a scoped binding.
pub trait Factory: Send + Sync {
  fn get(
    &self,
    injector: &Injector,
    context: &ProvisionContext,
    dependency: &Dependency,
  ) -> Result<Instance, ProvisionError>;

  /// A precomputed value that can be returned without entering a
  /// provisioning context.
  fn fast_path(&self) -> Option<Instance> {
    None
  }
}

/// Always yields the same instance.
pub(crate) struct ConstantFactory {
  instance: Instance,
}

impl ConstantFactory {
  pub(crate) fn new(instance: Instance) -> Self {
    Self { instance }
  }
}

impl Factory for ConstantFactory {
  fn get(&self, _: &Injector, _: &ProvisionContext, _: &Dependency) -> Result<Instance, ProvisionError> {
    Ok(self.instance.clone())
  }

  fn fast_path(&self) -> Option<Instance> {
    Some(self.instance.clone())
  }
}

pub(crate) type Construct = Box<dyn Fn(&Injector) -> Result<Instance, ProvisionError> + Send + Sync>;
pub(crate) type InjectMembers =
  Box<dyn Fn(&Injector, &Instance) -> Result<(), ProvisionError> + Send + Sync>;

/// Runs user construction code, detecting same-thread cycles through the
/// context's construction ledger.
pub(crate) struct ConstructorFactory {
  id: CircularFactoryId,
  key: Key,
  construct: Construct,
  members: Option<InjectMembers>,
}

impl ConstructorFactory {
  pub(crate) fn new(
    id: CircularFactoryId,
    key: Key,
    construct: Construct,
    members: Option<InjectMembers>,
  ) -> Self {
    Self {
      id,
      key,
      construct,
      members,
    }
  }
}

impl Factory for ConstructorFactory {
  fn get(
    &self,
    injector: &Injector,
    context: &ProvisionContext,
    dependency: &Dependency,
  ) -> Result<Instance, ProvisionError> {
    if let Some(early) = context.try_start_construction(self.id, dependency)? {
      return Ok(early);
    }
    let construction = context.construction(self.id);
    let instance = (self.construct)(injector)?;

    match &self.members {
      None => construction.finish(&instance),
      Some(inject_members) => {
        let _reference = construction.finish_and_set_reference(&instance);
        inject_members(injector, &instance)?;
      }
    }
    tracing::trace!(key = %self.key, "constructed");
    Ok(instance)
  }
}
