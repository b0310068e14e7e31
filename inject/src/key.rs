//! Identity of injectable values: `Key`, its `Qualifier`, and the `Dependency`
//! a consumer asks for.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// An immutable name distinguishing several bindings of the same type.
///
/// Qualifiers never change once created, so a `Key` holding one can sit in a
/// hash map for its whole life without being rehashed.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Qualifier(Arc<str>);

impl Qualifier {
  pub fn new(name: &str) -> Self {
    Self(Arc::from(name))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&str> for Qualifier {
  fn from(name: &str) -> Self {
    Self::new(name)
  }
}

impl From<String> for Qualifier {
  fn from(name: String) -> Self {
    Self(Arc::from(name))
  }
}

impl fmt::Debug for Qualifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:?}", &*self.0)
  }
}

impl fmt::Display for Qualifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// The identity of a requested value: a type plus an optional qualifier.
///
/// The type name is carried for diagnostics only; equality and hashing use the
/// `TypeId` and the qualifier.
#[derive(Clone)]
pub struct Key {
  type_id: TypeId,
  type_name: &'static str,
  qualifier: Option<Qualifier>,
}

impl Key {
  /// The unqualified key for `T`. `T` may be a trait object such as
  /// `dyn Greeter`.
  pub fn of<T: ?Sized + Any>() -> Self {
    Self {
      type_id: TypeId::of::<T>(),
      type_name: std::any::type_name::<T>(),
      qualifier: None,
    }
  }

  /// The key for `T` qualified by `name`.
  pub fn named<T: ?Sized + Any>(name: impl Into<Qualifier>) -> Self {
    Self {
      qualifier: Some(name.into()),
      ..Self::of::<T>()
    }
  }

  pub(crate) fn with_name<T: ?Sized + Any>(name: Option<&str>) -> Self {
    match name {
      Some(n) => Self::named::<T>(n),
      None => Self::of::<T>(),
    }
  }

  pub fn type_id(&self) -> TypeId {
    self.type_id
  }

  pub fn type_name(&self) -> &'static str {
    self.type_name
  }

  pub fn qualifier(&self) -> Option<&Qualifier> {
    self.qualifier.as_ref()
  }
}

impl PartialEq for Key {
  fn eq(&self, other: &Self) -> bool {
    self.type_id == other.type_id && self.qualifier == other.qualifier
  }
}

impl Eq for Key {}

impl Hash for Key {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.type_id.hash(state);
    self.qualifier.hash(state);
  }
}

impl fmt::Debug for Key {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.qualifier {
      Some(name) => write!(f, "Key({}, Name({}))", self.type_name, name),
      None => write!(f, "Key({})", self.type_name),
    }
  }
}

impl fmt::Display for Key {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.qualifier {
      Some(name) => write!(f, "{} named \"{}\"", self.type_name, name),
      None => f.write_str(self.type_name),
    }
  }
}

/// A request for the value bound to a key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
  key: Key,
  nullable: bool,
}

impl Dependency {
  /// A dependency that must not be satisfied with null.
  pub fn new(key: Key) -> Self {
    Self {
      key,
      nullable: false,
    }
  }

  /// A dependency that accepts a null value.
  pub fn nullable(key: Key) -> Self {
    Self {
      key,
      nullable: true,
    }
  }

  pub fn key(&self) -> &Key {
    &self.key
  }

  pub fn is_nullable(&self) -> bool {
    self.nullable
  }
}

impl fmt::Debug for Dependency {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Dependency")
      .field("key", &self.key)
      .field("nullable", &self.nullable)
      .finish()
  }
}

impl fmt::Display for Dependency {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.nullable {
      write!(f, "nullable {}", self.key)
    } else {
      fmt::Display::fmt(&self.key, f)
    }
  }
}
