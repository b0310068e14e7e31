use fibre_inject::{resolve, ErrorKind, Injector, ProvisionError};
use std::sync::Arc;

trait Logger: Send + Sync {
  fn log(&self, message: &str) -> String;
}

struct ConsoleLogger;
impl Logger for ConsoleLogger {
  fn log(&self, message: &str) -> String {
    format!("[console] {message}")
  }
}

struct FileLogger;
impl Logger for FileLogger {
  fn log(&self, message: &str) -> String {
    format!("[file] {message}")
  }
}

struct Reporter {
  logger: Arc<dyn Logger>,
  title: Arc<String>,
}

fn injector() -> Injector {
  let mut builder = Injector::builder();
  builder.add_instance_with_name("title", String::from("weekly"));
  builder.add_singleton_trait::<dyn Logger>(|_| Ok(Arc::new(ConsoleLogger)));
  builder.add_singleton_trait_with_name::<dyn Logger>("file", |_| Ok(Arc::new(FileLogger)));
  builder.add_transient(|injector| -> Result<Reporter, ProvisionError> {
    Ok(Reporter {
      logger: resolve!(injector, trait Logger, "file")?,
      title: resolve!(injector, String, "title")?,
    })
  });
  builder.build().unwrap()
}

#[test]
fn test_resolve_concrete_and_named() {
  let injector = injector();
  let title = resolve!(injector, String, "title").unwrap();
  assert_eq!(*title, "weekly");

  let reporter = resolve!(injector, Reporter).ok().unwrap();
  assert_eq!(reporter.logger.log(&reporter.title), "[file] weekly");
}

#[test]
fn test_resolve_trait_objects() {
  let injector = injector();
  let console = resolve!(injector, trait Logger).ok().unwrap();
  let file = resolve!(injector, trait Logger, "file").ok().unwrap();
  assert_eq!(console.log("hi"), "[console] hi");
  assert_eq!(file.log("hi"), "[file] hi");
}

#[test]
fn test_resolve_missing_returns_error() {
  let injector = injector();
  let err = resolve!(injector, u64).unwrap_err();
  assert!(matches!(err.kind(), ErrorKind::MissingBinding { .. }));
  assert!(resolve!(injector, trait Logger, "missing").is_err());
}
