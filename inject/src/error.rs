//! Error types raised while building an injector or provisioning a value.

use crate::binding::Source;
use crate::key::Key;
use std::error::Error as StdError;
use std::fmt;
use std::thread::ThreadId;
use thiserror::Error;

/// A boxed error produced by user construction code.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// What went wrong while provisioning a value.
#[derive(Debug, Error)]
pub enum ErrorKind {
  #[error("no binding found for {key}")]
  MissingBinding { key: Key },

  #[error(
    "tried proxying {key} to support a circular dependency, but it has no registered proxy (only trait objects can be proxied)"
  )]
  CannotProxy { key: Key },

  #[error("found a circular dependency involving {key}, and circular proxies are disabled")]
  CircularProxiesDisabled { key: Key },

  #[error("{report}\nno proxy could break the cycle: {proxy_error}")]
  ThreadCycle {
    report: ThreadCycleReport,
    #[source]
    proxy_error: Box<ErrorKind>,
  },

  #[error("construction of {key} failed")]
  ConstructionFailed {
    key: Key,
    #[source]
    cause: BoxError,
  },

  #[error("null returned by binding at {bound_at} but {key} is not nullable")]
  NullInjected { key: Key, bound_at: Source },

  #[error("value provided for {key} is not a {expected}")]
  TypeMismatch { key: Key, expected: &'static str },

  #[error("provider for {key} outlived its injector")]
  InjectorDropped { key: Key },
}

/// One level of the provisioning path: the key being located and where it was bound.
#[derive(Debug, Clone)]
pub struct Frame {
  pub key: Key,
  pub source: Source,
}

/// An error raised while provisioning, with the dependency path that led to it.
///
/// Frames are ordered from the outermost request to the innermost failure.
pub struct ProvisionError {
  kind: Box<ErrorKind>,
  frames: Vec<Frame>,
}

impl ProvisionError {
  pub fn new(kind: ErrorKind) -> Self {
    Self {
      kind: Box::new(kind),
      frames: Vec::new(),
    }
  }

  /// Wraps a failure raised by user construction code for `key`.
  pub fn construction(key: Key, cause: impl Into<BoxError>) -> Self {
    Self::new(ErrorKind::ConstructionFailed {
      key,
      cause: cause.into(),
    })
  }

  pub fn kind(&self) -> &ErrorKind {
    &self.kind
  }

  pub fn into_kind(self) -> ErrorKind {
    *self.kind
  }

  pub fn frames(&self) -> &[Frame] {
    &self.frames
  }

  /// Records that the failure happened while locating `key`, bound at `source`.
  pub(crate) fn with_frame(mut self, key: Key, source: Source) -> Self {
    self.frames.insert(0, Frame { key, source });
    self
  }
}

impl From<ErrorKind> for ProvisionError {
  fn from(kind: ErrorKind) -> Self {
    Self::new(kind)
  }
}

impl fmt::Debug for ProvisionError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ProvisionError")
      .field("kind", &self.kind)
      .field("frames", &self.frames)
      .finish()
  }
}

impl fmt::Display for ProvisionError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.kind)?;
    for frame in &self.frames {
      write!(f, "\n  while locating {} (bound at {})", frame.key, frame.source)?;
    }
    Ok(())
  }
}

impl StdError for ProvisionError {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    self.kind.source()
  }
}

/// A thread taking part in a cross-thread singleton cycle.
#[derive(Debug, Clone)]
pub struct CycleParticipant {
  pub thread: ThreadId,
  pub thread_name: Option<String>,
  /// Singletons whose creation locks this thread holds inside the cycle.
  pub holding: Vec<Key>,
  /// The keys this thread was provisioning, outermost first.
  pub dependency_chain: Vec<Key>,
}

/// Describes a cycle of singleton creations spanning several threads.
#[derive(Debug, Clone, Default)]
pub struct ThreadCycleReport {
  pub participants: Vec<CycleParticipant>,
}

impl fmt::Display for ThreadCycleReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("encountered circular dependency spanning several threads")?;
    for p in &self.participants {
      write!(f, "\n  {:?}", p.thread)?;
      if let Some(name) = &p.thread_name {
        write!(f, " \"{}\"", name)?;
      }
      f.write_str(" holds creation locks for [")?;
      write_keys(f, &p.holding, ", ")?;
      f.write_str("]")?;
      if !p.dependency_chain.is_empty() {
        f.write_str(" while provisioning ")?;
        write_keys(f, &p.dependency_chain, " -> ")?;
      }
    }
    Ok(())
  }
}

fn write_keys(f: &mut fmt::Formatter<'_>, keys: &[Key], sep: &str) -> fmt::Result {
  for (i, key) in keys.iter().enumerate() {
    if i > 0 {
      f.write_str(sep)?;
    }
    write!(f, "{}", key)?;
  }
  Ok(())
}

/// Errors that can occur when building an injector.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error("{key} is already bound at {first}; duplicate binding at {second}")]
  DuplicateBinding {
    key: Key,
    first: Source,
    second: Source,
  },

  #[error("failed to create eager singleton: {0}")]
  EagerSingleton(#[from] ProvisionError),
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use std::panic::Location;

  #[test]
  fn frames_render_from_root_to_failure() {
    let here = Location::caller();
    let err = ProvisionError::new(ErrorKind::MissingBinding {
      key: Key::of::<u8>(),
    })
    .with_frame(Key::of::<u16>(), here)
    .with_frame(Key::of::<u32>(), here);

    assert_eq!(err.frames()[0].key, Key::of::<u32>());
    assert_eq!(
      err.to_string(),
      format!(
        "no binding found for u8\n  while locating u32 (bound at {here})\n  while locating u16 (bound at {here})"
      )
    );
  }

  #[test]
  fn construction_failure_exposes_cause() {
    let err = ProvisionError::construction(Key::of::<u8>(), "disk on fire");
    let cause = err.source().map(|e| e.to_string());
    assert_eq!(cause.as_deref(), Some("disk on fire"));
  }

  #[test]
  fn thread_cycle_report_lists_participants() {
    let report = ThreadCycleReport {
      participants: vec![CycleParticipant {
        thread: std::thread::current().id(),
        thread_name: Some("worker".into()),
        holding: vec![Key::of::<u8>(), Key::of::<u16>()],
        dependency_chain: vec![Key::of::<u8>(), Key::of::<u32>()],
      }],
    };
    let text = report.to_string();
    assert!(text.contains("\"worker\" holds creation locks for [u8, u16]"));
    assert!(text.contains("while provisioning u8 -> u32"));
  }
}
