use crate::factory::Factory;
use crate::key::Key;
use crate::scope::Scoping;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Where a binding was declared.
pub type Source = &'static Location<'static>;

/// A key bound to its (already scoped) factory.
pub struct Binding {
  key: Key,
  scoping: Scoping,
  source: Source,
  factory: Arc<dyn Factory>,
}

impl Binding {
  pub(crate) fn new(key: Key, scoping: Scoping, source: Source, factory: Arc<dyn Factory>) -> Self {
    Self {
      key,
      scoping,
      source,
      factory,
    }
  }

  pub fn key(&self) -> &Key {
    &self.key
  }

  pub fn scoping(&self) -> &Scoping {
    &self.scoping
  }

  pub fn source(&self) -> Source {
    self.source
  }

  pub(crate) fn factory(&self) -> &Arc<dyn Factory> {
    &self.factory
  }
}

impl fmt::Debug for Binding {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Binding")
      .field("key", &self.key)
      .field("scoping", &self.scoping)
      .field("source", &format_args!("{}", self.source))
      .finish_non_exhaustive()
  }
}
