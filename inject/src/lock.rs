//! Reentrant locks that refuse to deadlock each other.
//!
//! Every lock created by one [`CycleDetectingLockFactory`] shares the factory's
//! wait/owner tables. Before a thread blocks on a lock it walks those tables:
//! the lock's owner, the lock that owner is waiting for, that lock's owner, and
//! so on. If the walk comes back to the current thread, blocking would
//! deadlock, so the lock is not taken and the cycle is reported instead.
//!
//! All bookkeeping happens under one factory-wide mutex that is held only for
//! the walk and the table updates, never while a caller runs its own code.

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct LockId(u64);

#[derive(Debug)]
struct Ownership {
  thread: ThreadId,
  reentrance: usize,
}

struct LockGraph<ID> {
  next_id: u64,
  user_ids: HashMap<LockId, ID>,
  owners: HashMap<LockId, Ownership>,
  // Which lock each blocked thread is waiting to acquire.
  waiting: HashMap<ThreadId, LockId>,
  // Locks each thread owns, in acquisition order.
  owned: HashMap<ThreadId, Vec<LockId>>,
}

impl<ID> LockGraph<ID> {
  fn new() -> Self {
    Self {
      next_id: 0,
      user_ids: HashMap::new(),
      owners: HashMap::new(),
      waiting: HashMap::new(),
      owned: HashMap::new(),
    }
  }

  fn check_invariants(&self, lock: LockId, me: ThreadId) {
    debug_assert!(
      !self.waiting.contains_key(&me),
      "thread should not be waiting on a lock now"
    );
    match self.owners.get(&lock) {
      Some(ownership) => debug_assert!(
        self
          .owned
          .get(&ownership.thread)
          .is_some_and(|locks| locks.contains(&lock)),
        "lock owner does not list the lock as owned"
      ),
      None => debug_assert!(
        !self.owned.values().any(|locks| locks.contains(&lock)),
        "unowned lock is listed as owned by some thread"
      ),
    }
  }

  fn is_owned_by(&self, lock: LockId, thread: ThreadId) -> bool {
    self
      .owners
      .get(&lock)
      .is_some_and(|ownership| ownership.thread == thread)
  }

  fn acquired(&mut self, lock: LockId, me: ThreadId) {
    self.waiting.remove(&me);
    let ownership = self.owners.entry(lock).or_insert(Ownership {
      thread: me,
      reentrance: 0,
    });
    debug_assert_eq!(ownership.thread, me, "lock acquired while owned by another thread");
    if ownership.reentrance == 0 {
      self.owned.entry(me).or_default().push(lock);
    }
    ownership.reentrance += 1;
  }

  fn released(&mut self, lock: LockId, me: ThreadId) {
    let Some(ownership) = self.owners.get_mut(&lock) else {
      debug_assert!(false, "thread is unlocking a lock that is not locked");
      return;
    };
    debug_assert_eq!(ownership.thread, me, "thread is unlocking a lock owned by another thread");
    ownership.reentrance -= 1;
    if ownership.reentrance > 0 {
      return;
    }
    self.owners.remove(&lock);
    if let Some(locks) = self.owned.get_mut(&me) {
      locks.retain(|&id| id != lock);
      if locks.is_empty() {
        self.owned.remove(&me);
      }
    }
  }
}

impl<ID: Clone> LockGraph<ID> {
  /// Follows owner → awaited lock → owner from `lock`. Returns the cycle if
  /// the walk reaches `me`.
  fn detect_cycle(&self, lock: LockId, me: ThreadId) -> Option<LocksCycle<ID>> {
    let mut members: Vec<(ThreadId, Vec<ID>)> = Vec::new();
    let mut next = Some(lock);

    while let Some(current) = next {
      let owner = self.owners.get(&current)?.thread;
      if members.is_empty() && owner == me {
        return None;
      }
      // The owner's locks from the one the previous thread waits on onward
      // are the ones inside the cycle.
      let locks = self
        .owned
        .get(&owner)
        .map(|owned| {
          owned
            .iter()
            .skip_while(|&&id| id != current)
            .filter_map(|id| self.user_ids.get(id).cloned())
            .collect()
        })
        .unwrap_or_default();
      members.push((owner, locks));

      if owner == me {
        return Some(LocksCycle { members });
      }
      if members.len() > self.owned.len() {
        return None;
      }
      next = self.waiting.get(&owner).copied();
    }
    None
  }
}

/// Hands out locks that detect cross-thread cycles instead of deadlocking.
pub struct CycleDetectingLockFactory<ID> {
  graph: Arc<Mutex<LockGraph<ID>>>,
}

impl<ID: Clone + fmt::Debug + Send + 'static> CycleDetectingLockFactory<ID> {
  pub fn new() -> Self {
    Self {
      graph: Arc::new(Mutex::new(LockGraph::new())),
    }
  }

  /// Creates a lock identified by `id` in cycle reports.
  pub fn create(&self, id: ID) -> CycleDetectingLock<ID> {
    let lock_id = {
      let mut graph = self.graph.lock();
      let lock_id = LockId(graph.next_id);
      graph.next_id += 1;
      graph.user_ids.insert(lock_id, id.clone());
      lock_id
    };
    CycleDetectingLock {
      lock_id,
      user_id: id,
      mutex: ReentrantMutex::new(()),
      graph: self.graph.clone(),
    }
  }
}

impl<ID: Clone + fmt::Debug + Send + 'static> Default for CycleDetectingLockFactory<ID> {
  fn default() -> Self {
    Self::new()
  }
}

impl<ID> fmt::Debug for CycleDetectingLockFactory<ID> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CycleDetectingLockFactory").finish_non_exhaustive()
  }
}

/// A reentrant lock created by a [`CycleDetectingLockFactory`].
pub struct CycleDetectingLock<ID> {
  lock_id: LockId,
  user_id: ID,
  mutex: ReentrantMutex<()>,
  graph: Arc<Mutex<LockGraph<ID>>>,
}

impl<ID: Clone + fmt::Debug + Send + 'static> CycleDetectingLock<ID> {
  pub fn id(&self) -> &ID {
    &self.user_id
  }

  /// Acquires the lock, unless doing so could deadlock.
  ///
  /// Blocks while another thread holds the lock, but only after proving that
  /// the holder does not (transitively) wait for a lock this thread owns. If
  /// it does, returns the cycle, keyed by thread, without taking the lock.
  pub fn lock_or_detect_cycle(&self) -> Result<CycleLockGuard<'_, ID>, LocksCycle<ID>> {
    let me = thread::current().id();
    {
      let mut graph = self.graph.lock();
      graph.check_invariants(self.lock_id, me);
      if !graph.is_owned_by(self.lock_id, me) {
        graph.waiting.insert(me, self.lock_id);
        if let Some(cycle) = graph.detect_cycle(self.lock_id, me) {
          graph.waiting.remove(&me);
          debug!(lock = ?self.user_id, threads = cycle.len(), "lock cycle detected");
          return Err(cycle);
        }
      }
    }

    // No cycle existed when checked; any new one has to pass through the
    // graph mutex on another thread, which will see this thread waiting.
    let held = self.mutex.lock();

    self.graph.lock().acquired(self.lock_id, me);
    Ok(CycleLockGuard {
      lock: self,
      held: Some(held),
    })
  }

  pub fn is_held_by_current_thread(&self) -> bool {
    self.graph.lock().is_owned_by(self.lock_id, thread::current().id())
  }
}

impl<ID> Drop for CycleDetectingLock<ID> {
  fn drop(&mut self) {
    self.graph.lock().user_ids.remove(&self.lock_id);
  }
}

impl<ID: fmt::Debug> fmt::Debug for CycleDetectingLock<ID> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CycleDetectingLock")
      .field("id", &self.user_id)
      .finish_non_exhaustive()
  }
}

/// Releases a [`CycleDetectingLock`] on drop. Not `Send`: a lock is always
/// released by the thread that took it.
#[must_use]
pub struct CycleLockGuard<'a, ID> {
  lock: &'a CycleDetectingLock<ID>,
  held: Option<ReentrantMutexGuard<'a, ()>>,
}

impl<ID> Drop for CycleLockGuard<'_, ID> {
  fn drop(&mut self) {
    let me = thread::current().id();
    let mut graph = self.lock.graph.lock();
    drop(self.held.take());
    graph.released(self.lock.lock_id, me);
  }
}

/// The threads and locks forming a would-be deadlock.
///
/// Each entry is a thread and the locks it owns inside the cycle, in
/// acquisition order. The last entry is the thread that detected the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocksCycle<ID> {
  members: Vec<(ThreadId, Vec<ID>)>,
}

impl<ID> LocksCycle<ID> {
  pub fn len(&self) -> usize {
    self.members.len()
  }

  pub fn is_empty(&self) -> bool {
    self.members.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (ThreadId, &[ID])> {
    self
      .members
      .iter()
      .map(|(thread, locks)| (*thread, locks.as_slice()))
  }

  pub fn locks_held_by(&self, thread: ThreadId) -> Option<&[ID]> {
    self
      .members
      .iter()
      .find(|(t, _)| *t == thread)
      .map(|(_, locks)| locks.as_slice())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::{mpsc, Barrier};
  use std::time::Duration;

  #[test]
  fn reentrant_locking_counts_and_releases() {
    let factory = CycleDetectingLockFactory::new();
    let lock = factory.create("a");
    {
      let _outer = lock.lock_or_detect_cycle().unwrap();
      let _inner = lock.lock_or_detect_cycle().unwrap();
      assert!(lock.is_held_by_current_thread());
    }
    assert!(!lock.is_held_by_current_thread());

    thread::scope(|s| {
      s.spawn(|| {
        let _guard = lock.lock_or_detect_cycle().unwrap();
        assert!(lock.is_held_by_current_thread());
      });
    });
  }

  #[test]
  fn contention_without_cycle_blocks_until_released() {
    let factory = CycleDetectingLockFactory::new();
    let lock = factory.create(1_u32);
    let (tx, rx) = mpsc::channel();

    let guard = lock.lock_or_detect_cycle().unwrap();
    thread::scope(|s| {
      s.spawn(|| {
        let _guard = lock.lock_or_detect_cycle().expect("no cycle exists");
        tx.send(()).unwrap();
      });
      assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
      drop(guard);
      rx.recv().unwrap();
    });
  }

  #[test]
  fn crossed_locks_report_exactly_one_cycle() {
    let factory = CycleDetectingLockFactory::new();
    let a = factory.create("a");
    let b = factory.create("b");
    let barrier = Barrier::new(2);
    let cycles = AtomicUsize::new(0);

    thread::scope(|s| {
      for (first, second) in [(&a, &b), (&b, &a)] {
        let barrier = &barrier;
        let cycles = &cycles;
        s.spawn(move || {
          let _held = first.lock_or_detect_cycle().unwrap();
          barrier.wait();
          match second.lock_or_detect_cycle() {
            Ok(_both) => {}
            Err(cycle) => {
              cycles.fetch_add(1, Ordering::SeqCst);
              let me = thread::current().id();
              assert_eq!(cycle.len(), 2);
              assert_eq!(cycle.locks_held_by(me), Some(&[*first.id()][..]));
              assert!(cycle.iter().any(|(t, locks)| t != me && locks == [*second.id()]));
            }
          }
        });
      }
    });

    assert_eq!(cycles.load(Ordering::SeqCst), 1);
    assert!(!a.is_held_by_current_thread());
  }
}
