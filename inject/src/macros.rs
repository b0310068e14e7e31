//! Public macros for ergonomic service resolution.

/// Resolves a service from an injector.
///
/// Expands to the matching `Injector` getter and evaluates to
/// `Result<Arc<T>, ProvisionError>`, so it composes with `?` inside factories.
///
/// # Examples
///
/// ```
/// use fibre_inject::{resolve, Injector};
///
/// let mut builder = Injector::builder();
/// builder.add_instance_with_name("greeting", String::from("hello"));
/// builder.add_singleton(|injector| {
///   let greeting = resolve!(injector, String, "greeting")?;
///   Ok(greeting.len())
/// });
/// let injector = builder.build().unwrap();
///
/// assert_eq!(*resolve!(injector, usize).unwrap(), 5);
/// ```
///
/// ```
/// use fibre_inject::{resolve, Injector};
/// use std::sync::Arc;
///
/// trait Greeter: Send + Sync { fn greet(&self) -> String; }
/// struct EnglishGreeter;
/// impl Greeter for EnglishGreeter { fn greet(&self) -> String { "Hello!".to_string() } }
///
/// let mut builder = Injector::builder();
/// builder.add_singleton_trait::<dyn Greeter>(|_| Ok(Arc::new(EnglishGreeter)));
/// let injector = builder.build().unwrap();
///
/// let greeter = resolve!(injector, trait Greeter).unwrap();
/// assert_eq!(greeter.greet(), "Hello!");
/// ```
#[macro_export]
macro_rules! resolve {
  // Trait arms come first: `trait Foo` would otherwise not parse as a type.
  ($injector:expr, trait $trait_ident:ident) => {
    $injector.get::<dyn $trait_ident>()
  };

  ($injector:expr, trait $trait_ident:ident, $name:expr) => {
    $injector.get_named::<dyn $trait_ident>($name)
  };

  ($injector:expr, $type:ty) => {
    $injector.get::<$type>()
  };

  ($injector:expr, $type:ty, $name:expr) => {
    $injector.get_named::<$type>($name)
  };
}
