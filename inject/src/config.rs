//! Injector configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// When singletons are created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Stage {
  /// Singletons are created on first use; only eager singletons are created
  /// while building the injector.
  #[default]
  Development,
  /// Every singleton is created while building the injector, so construction
  /// errors surface at startup.
  Production,
}

/// Options shared by every provisioning call of one injector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct InjectorOptions {
  /// Fail on circular dependencies instead of satisfying them with proxies.
  pub disable_circular_proxies: bool,
  pub stage: Stage,
}
