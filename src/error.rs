//! Registry Errors
//!
//! Every kind here is internal. The control interface collapses all of them
//! to a single failure value.

use crate::record::RecordKind;
use crate::slot::{RecordId, SlotHandle};
use crate::user::CopyFault;

/// Registry operation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No occupied slot carries the identifier
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Table searched
        kind: RecordKind,
        /// Identifier looked up
        id: RecordId,
    },

    /// Every slot of the table is occupied
    #[error("no free {kind} slot (capacity {capacity})")]
    NoCapacity {
        /// Table searched
        kind: RecordKind,
        /// Slot count
        capacity: usize,
    },

    /// The engine's usage counter cannot count another compartment
    #[error("engine {engine_id} usage counter is full")]
    CapacityExceeded {
        /// Engine refused
        engine_id: RecordId,
    },

    /// A transfer to or from caller memory failed
    #[error(transparent)]
    CopyFault(#[from] CopyFault),

    /// A compartment's engine handle no longer names a live engine
    #[error("engine handle {handle} no longer resolves")]
    StaleEngine {
        /// Handle held by the compartment
        handle: SlotHandle,
    },
}

/// Result alias for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;
