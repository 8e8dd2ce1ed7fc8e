//! Audit
//!
//! TigerStyle: report, never repair.
//!
//! The registry trusts each engine's usage counter as its only liveness
//! signal. [`audit`] recounts from the compartment table and reports every
//! place where the two disagree, plus every compartment whose engine handle
//! no longer names the engine it was bound to. Under serialized,
//! single-threaded use the report is empty.

use serde::Serialize;

use crate::registry::Registry;
use crate::slot::{RecordId, SlotHandle};

// =============================================================================
// Snapshot
// =============================================================================

/// One occupied engine slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineView {
    /// Slot index
    pub slot: usize,
    /// Engine identifier
    pub id: RecordId,
    /// Usage counter
    pub usage: u8,
    /// Name up to the first NUL
    pub name: String,
}

/// One occupied compartment slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompartmentView {
    /// Slot index
    pub slot: usize,
    /// Compartment identifier
    pub id: RecordId,
    /// Handle to the engine it was bound to
    pub engine: SlotHandle,
    /// Description up to the first NUL
    pub desc: String,
}

/// Serialisable view of the whole registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    /// Occupied engine slots, in slot order
    pub engines: Vec<EngineView>,
    /// Occupied compartment slots, in slot order
    pub compartments: Vec<CompartmentView>,
}

/// Capture the registry's current contents.
#[must_use]
pub fn snapshot(registry: &Registry) -> RegistrySnapshot {
    let engines = registry
        .engines()
        .iter()
        .map(|(slot, e)| EngineView {
            slot,
            id: e.id,
            usage: e.usage,
            name: e.name_text(),
        })
        .collect();

    let compartments = registry
        .compartments()
        .iter()
        .map(|(slot, c)| CompartmentView {
            slot,
            id: c.id,
            engine: c.engine,
            desc: c.desc_text(),
        })
        .collect();

    RegistrySnapshot {
        engines,
        compartments,
    }
}

// =============================================================================
// Divergences
// =============================================================================

/// A disagreement between bookkeeping and reality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Divergence {
    /// Usage counter differs from the number of compartments bound to it.
    UsageMismatch {
        /// Engine identifier
        engine_id: RecordId,
        /// Slot index
        slot: usize,
        /// Counter value
        usage: u8,
        /// Live compartments whose handle names this engine
        bound: usize,
    },
    /// A live compartment's engine was freed; the slot is empty or reused.
    DanglingCompartment {
        /// Compartment identifier
        compartment_id: RecordId,
        /// Handle the compartment still holds
        engine: SlotHandle,
        /// Engine now in that slot, if any
        aliased_engine_id: Option<RecordId>,
    },
}

/// List every divergence in slot order: engines first, then compartments.
#[must_use]
pub fn audit(registry: &Registry) -> Vec<Divergence> {
    let engines = registry.engines();
    let compartments = registry.compartments();
    let mut found = Vec::new();

    for (slot, engine) in engines.iter() {
        let handle = engines.handle(slot);
        let bound = compartments
            .iter()
            .filter(|(_, c)| c.engine == handle)
            .count();
        if bound != usize::from(engine.usage) {
            found.push(Divergence::UsageMismatch {
                engine_id: engine.id,
                slot,
                usage: engine.usage,
                bound,
            });
        }
    }

    for (_, compartment) in compartments.iter() {
        if engines.is_current(compartment.engine) {
            continue;
        }
        found.push(Divergence::DanglingCompartment {
            compartment_id: compartment.id,
            engine: compartment.engine,
            aliased_engine_id: engines.get(compartment.engine.index).map(|e| e.id),
        });
    }

    if !found.is_empty() {
        tracing::warn!(count = found.len(), "Registry audit found divergences");
    }
    found
}
