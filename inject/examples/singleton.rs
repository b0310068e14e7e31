use fibre_inject::{resolve, Injector};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::thread;

// A simple service that gets a unique ID upon creation.
struct RequestTracker {
  id: usize,
}

static ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn main() -> Result<(), Box<dyn std::error::Error>> {
  let mut builder = Injector::builder();

  // --- Singleton Registration ---
  // This factory runs ONCE, however many threads ask at the same time.
  builder.add_singleton_with_name("singleton_tracker", |_| {
    println!("Creating SINGLETON RequestTracker...");
    Ok(RequestTracker {
      id: ID_COUNTER.fetch_add(1, Ordering::SeqCst),
    })
  });

  // --- Transient Registration ---
  // This factory runs EVERY time the service is resolved.
  builder.add_transient_with_name("transient_tracker", |_| {
    println!("Creating TRANSIENT RequestTracker...");
    Ok(RequestTracker {
      id: ID_COUNTER.fetch_add(1, Ordering::SeqCst),
    })
  });

  let injector = builder.build()?;

  println!("--- Resolving Singletons from 8 threads ---");
  let singletons: Vec<Arc<RequestTracker>> = thread::scope(|s| {
    let handles: Vec<_> = (0..8)
      .map(|_| s.spawn(|| resolve!(injector, RequestTracker, "singleton_tracker")))
      .collect();
    handles
      .into_iter()
      .map(|h| h.join().expect("resolver thread panicked"))
      .collect::<Result<_, _>>()
  })?;
  assert!(singletons.iter().all(|s| s.id == 0 && Arc::ptr_eq(s, &singletons[0])));
  println!("All threads received singleton ID 0, the same pointer.\n");

  println!("--- Resolving Transients ---");
  let t1 = resolve!(injector, RequestTracker, "transient_tracker")?;
  let t2 = resolve!(injector, RequestTracker, "transient_tracker")?;
  println!("Transient 1 ID: {}, Transient 2 ID: {}", t1.id, t2.id);
  assert!(!Arc::ptr_eq(&t1, &t2), "Transient instances should be different");
  Ok(())
}
