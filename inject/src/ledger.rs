//! Per-context bookkeeping of factories that are currently constructing.

use crate::factory::Instance;
use crate::proxy::DelegateSlot;
use std::sync::Arc;
use tracing::warn;

/// Identifies a factory that can take part in a construction cycle.
///
/// Ids are small and dense: the builder hands them out sequentially, and each
/// provisioning context indexes its ledgers by them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CircularFactoryId(pub(crate) usize);

enum LedgerState {
  Constructing,
  /// Construction returned; members are being injected into this instance.
  Reference(Instance),
}

/// What one context knows about one factory's in-flight construction.
pub(crate) struct ConstructionLedger {
  state: LedgerState,
  proxies: Vec<Arc<dyn DelegateSlot>>,
}

impl ConstructionLedger {
  fn constructing() -> Self {
    Self {
      state: LedgerState::Constructing,
      proxies: Vec::new(),
    }
  }

  pub(crate) fn current_reference(&self) -> Option<&Instance> {
    match &self.state {
      LedgerState::Constructing => None,
      LedgerState::Reference(instance) => Some(instance),
    }
  }

  pub(crate) fn park_proxy(&mut self, slot: Arc<dyn DelegateSlot>) {
    self.proxies.push(slot);
  }

  fn set_reference(&mut self, instance: &Instance) {
    self.state = LedgerState::Reference(instance.clone());
  }

  /// Hands `instance` to every proxy created while it was being built.
  fn backfill(&mut self, instance: &Instance) {
    for slot in self.proxies.drain(..) {
      if let Err(err) = slot.register_delegate(instance) {
        warn!(error = %err, "could not register delegate for circular proxy");
      }
    }
  }
}

/// Ledgers of one provisioning context, indexed by `CircularFactoryId`.
#[derive(Default)]
pub(crate) struct LedgerTable {
  slots: Vec<Option<ConstructionLedger>>,
}

impl LedgerTable {
  pub(crate) fn get(&self, id: CircularFactoryId) -> Option<&ConstructionLedger> {
    self.slots.get(id.0).and_then(Option::as_ref)
  }

  pub(crate) fn get_mut(&mut self, id: CircularFactoryId) -> Option<&mut ConstructionLedger> {
    self.slots.get_mut(id.0).and_then(Option::as_mut)
  }

  /// Marks `id` as constructing. Returns `false` if a ledger already exists.
  pub(crate) fn start(&mut self, id: CircularFactoryId) -> bool {
    if self.slots.len() <= id.0 {
      self.slots.resize_with(id.0 + 1, || None);
    }
    let slot = &mut self.slots[id.0];
    if slot.is_some() {
      return false;
    }
    *slot = Some(ConstructionLedger::constructing());
    true
  }

  /// Ends construction of `id`, backfilling pending proxies with `result`.
  pub(crate) fn finish(&mut self, id: CircularFactoryId, result: &Instance) {
    if let Some(mut ledger) = self.remove(id) {
      ledger.backfill(result);
    }
  }

  /// Keeps `result` as the current reference of `id` and backfills proxies.
  pub(crate) fn finish_and_set_reference(&mut self, id: CircularFactoryId, result: &Instance) {
    if let Some(ledger) = self.get_mut(id) {
      ledger.backfill(result);
      ledger.set_reference(result);
    }
  }

  pub(crate) fn remove(&mut self, id: CircularFactoryId) -> Option<ConstructionLedger> {
    self.slots.get_mut(id.0).and_then(Option::take)
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.slots.iter().all(Option::is_none)
  }
}
