//! # Fibre Inject
//!
//! A thread-safe dependency injection runtime for Rust.
//!
//! Bindings are declared on an [`InjectorBuilder`] and frozen into an
//! [`Injector`]. Factories receive the injector and resolve their own
//! dependencies from it, so whole object graphs are built on demand.
//!
//! ## Core Concepts
//!
//! - **Injector**: an immutable set of bindings. Cloning is cheap; clones share singletons.
//! - **Scopes**: a binding is unscoped (new value per request), a singleton, an
//!   eager singleton, or wrapped in a custom [`Scope`].
//! - **Singletons**: created at most once per injector, even when several
//!   threads ask at the same time. Creation locks come from a
//!   [`CycleDetectingLockFactory`], so threads whose singletons depend on each
//!   other never deadlock.
//! - **Circular dependencies**: when a factory (indirectly) asks for the value it
//!   is constructing, the request is answered with a [`Proxy`] that forwards to
//!   the real value once construction finishes. Only types with a registered
//!   proxy (trait objects) can be proxied.
//!
//! ## Quick Start
//!
//! ```
//! use fibre_inject::{resolve, Injector};
//! use std::sync::Arc;
//!
//! // Define a trait and a concrete implementation.
//! trait Greeter: Send + Sync {
//!   fn greet(&self) -> String;
//! }
//!
//! struct EnglishGreeter {
//!   message: Arc<String>,
//! }
//!
//! impl Greeter for EnglishGreeter {
//!   fn greet(&self) -> String {
//!     self.message.to_string()
//!   }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   let mut builder = Injector::builder();
//!   builder.add_instance_with_name("greeting_message", String::from("Hello, World!"));
//!
//!   // The factory can itself resolve other dependencies.
//!   builder.add_singleton_trait::<dyn Greeter>(|injector| {
//!     let message = resolve!(injector, String, "greeting_message")?;
//!     Ok(Arc::new(EnglishGreeter { message }))
//!   });
//!
//!   let injector = builder.build()?;
//!   let greeter = resolve!(injector, trait Greeter)?;
//!
//!   assert_eq!(greeter.greet(), "Hello, World!");
//!   Ok(())
//! }
//! ```

mod binding;
mod builder;
mod config;
mod context;
mod error;
mod factory;
mod injector;
mod key;
mod ledger;
mod lock;
mod macros;
mod proxy;
mod registry;
mod scope;

pub use binding::{Binding, Source};
pub use builder::{BindingBuilder, InjectorBuilder};
pub use config::{InjectorOptions, Stage};
pub use context::ProvisionContext;
pub use error::{
  BoxError, BuildError, CycleParticipant, ErrorKind, Frame, ProvisionError, ThreadCycleReport,
};
pub use factory::{Factory, Instance};
pub use injector::{Injector, Provider};
pub use key::{Dependency, Key, Qualifier};
pub use ledger::CircularFactoryId;
pub use lock::{CycleDetectingLock, CycleDetectingLockFactory, CycleLockGuard, LocksCycle};
pub use proxy::{DelegateSlot, Proxy, ProxyError, ProxyFactory};
pub use registry::{ContextRegistry, ThreadContextRegistry};
pub use scope::{Scope, Scoping, SingletonScope};
