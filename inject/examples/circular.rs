use fibre_inject::{Injector, Proxy};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// Two services that need each other.
trait Clock: Send + Sync {
  fn now(&self) -> u64;
}

trait Scheduler: Send + Sync {
  fn next_run(&self) -> u64;
}

struct SystemClock {
  _scheduler: Arc<dyn Scheduler>,
}

impl Clock for SystemClock {
  fn now(&self) -> u64 {
    1_000
  }
}

struct FixedScheduler {
  clock: Arc<dyn Clock>,
}

impl Scheduler for FixedScheduler {
  fn next_run(&self) -> u64 {
    self.clock.now() + 60
  }
}

// The proxy forwards to the real clock once it has been constructed.
impl Clock for Proxy<dyn Clock> {
  fn now(&self) -> u64 {
    self.get().now()
  }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  // RUST_LOG=fibre_inject=debug shows where the proxy is handed out.
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let mut builder = Injector::builder();
  builder.proxy::<dyn Clock>(|proxy| proxy);

  builder.add_singleton_trait::<dyn Clock>(|injector| {
    Ok(Arc::new(SystemClock {
      _scheduler: injector.get::<dyn Scheduler>()?,
    }))
  });
  builder.add_singleton_trait::<dyn Scheduler>(|injector| {
    // Receives a proxy: the clock is still being constructed.
    Ok(Arc::new(FixedScheduler {
      clock: injector.get::<dyn Clock>()?,
    }))
  });

  let injector = builder.build()?;
  let clock = injector.get::<dyn Clock>()?;
  let scheduler = injector.get::<dyn Scheduler>()?;

  println!("now = {}, next run = {}", clock.now(), scheduler.next_run());
  assert_eq!(scheduler.next_run(), 1_060);

  // Without a proxy for the cycle, the same graph is rejected.
  let mut strict = Injector::builder();
  strict.disable_circular_proxies(true);
  strict.add_singleton_trait::<dyn Clock>(|injector| {
    Ok(Arc::new(SystemClock {
      _scheduler: injector.get::<dyn Scheduler>()?,
    }))
  });
  strict.add_singleton_trait::<dyn Scheduler>(|injector| {
    Ok(Arc::new(FixedScheduler {
      clock: injector.get::<dyn Clock>()?,
    }))
  });
  match strict.build()?.get::<dyn Clock>() {
    Ok(_) => unreachable!("cycle should have been rejected"),
    Err(err) => println!("strict injector: {err}"),
  }
  Ok(())
}
