//! Records
//!
//! TigerStyle: fixed-size fields, sizes from constants, no hidden allocation
//! beyond the engine log.

use serde::{Deserialize, Serialize};

use crate::constants::{COMPARTMENT_DESC_BYTES, ENGINE_LOG_BYTES, ENGINE_NAME_BYTES};
use crate::slot::{Record, RecordId, SlotHandle};

/// Which slot table a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Engine table
    Engine,
    /// Compartment table
    Compartment,
}

impl RecordKind {
    /// Get string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Engine => "engine",
            Self::Compartment => "compartment",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Render a fixed-size text field up to its first NUL.
fn field_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

// =============================================================================
// Engine
// =============================================================================

/// A managed steam engine.
#[derive(Debug)]
pub struct Engine {
    /// Random identifier
    pub id: RecordId,
    /// Compartments currently bound to this engine
    pub usage: u8,
    /// Name bytes as copied from the caller
    pub name: [u8; ENGINE_NAME_BYTES],
    /// Maintenance log, owned by the engine
    pub logs: Box<[u8; ENGINE_LOG_BYTES]>,
}

impl Engine {
    /// Create an unnamed engine with a zeroed log and no users.
    #[must_use]
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            usage: 0,
            name: [0; ENGINE_NAME_BYTES],
            logs: Box::new([0; ENGINE_LOG_BYTES]),
        }
    }

    /// Name up to the first NUL, lossily decoded.
    #[must_use]
    pub fn name_text(&self) -> String {
        field_text(&self.name)
    }

    /// True if no compartment counts against this engine.
    #[must_use]
    pub fn is_orphaned(&self) -> bool {
        self.usage == 0
    }
}

impl Record for Engine {
    fn id(&self) -> RecordId {
        self.id
    }
}

// =============================================================================
// Compartment
// =============================================================================

/// A compartment bound to one engine.
#[derive(Debug)]
pub struct Compartment {
    /// Random identifier
    pub id: RecordId,
    /// Description bytes as copied from the caller
    pub desc: [u8; COMPARTMENT_DESC_BYTES],
    /// Engine this compartment was bound to; never revalidated
    pub engine: SlotHandle,
}

impl Compartment {
    /// Create a compartment with an empty description.
    #[must_use]
    pub fn new(id: RecordId, engine: SlotHandle) -> Self {
        Self {
            id,
            desc: [0; COMPARTMENT_DESC_BYTES],
            engine,
        }
    }

    /// Description up to the first NUL, lossily decoded.
    #[must_use]
    pub fn desc_text(&self) -> String {
        field_text(&self.desc)
    }
}

impl Record for Compartment {
    fn id(&self) -> RecordId {
        self.id
    }
}
