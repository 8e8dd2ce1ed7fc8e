//! Slot Table
//!
//! TigerStyle: fixed capacity, linear scans, explicit handles.
//!
//! A slot table is a fixed-length array of optional owned records. Lookups
//! are O(N) scans; the first match wins, so records sharing an identifier are
//! indistinguishable and the lowest occupied slot is always returned.
//!
//! Every slot carries a generation that advances whenever its occupant is
//! removed or overwritten. A [`SlotHandle`] names one occupant; whether a
//! handle outlives its occupant is decided by the [`HandlePolicy`] used to
//! resolve it.

use serde::{Deserialize, Serialize};

/// Record identifier (random, not guaranteed unique)
pub type RecordId = i32;

/// A record that can live in a slot table.
pub trait Record {
    /// Leading identifier compared by [`SlotTable::find_by_id`].
    fn id(&self) -> RecordId;
}

// =============================================================================
// Handles
// =============================================================================

/// Position plus generation of one slot occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotHandle {
    /// Slot index
    pub index: usize,
    /// Slot generation when the handle was taken
    pub generation: u32,
}

impl std::fmt::Display for SlotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot {}@{}", self.index, self.generation)
    }
}

/// How a handle is matched against the slot it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlePolicy {
    /// Index only. A stale handle resolves to whatever occupies the slot now.
    #[default]
    Aliasing,
    /// Index and generation. A stale handle resolves to nothing.
    Checked,
}

impl HandlePolicy {
    /// Get string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aliasing => "aliasing",
            Self::Checked => "checked",
        }
    }
}

impl std::str::FromStr for HandlePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aliasing" => Ok(Self::Aliasing),
            "checked" => Ok(Self::Checked),
            other => Err(format!("unknown handle policy: {other}")),
        }
    }
}

// =============================================================================
// Slot Table
// =============================================================================

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    record: Option<T>,
}

/// Fixed-capacity table of optional owned records.
#[derive(Debug)]
pub struct SlotTable<T> {
    slots: Vec<Slot<T>>,
}

impl<T: Record> SlotTable<T> {
    /// Create a table with `capacity` empty slots.
    ///
    /// # Panics
    /// Panics if capacity is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "slot table capacity must be positive");

        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                record: None,
            })
            .collect();
        Self { slots }
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.record.is_some()).count()
    }

    /// True if no slot is occupied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.record.is_none())
    }

    /// First empty slot.
    #[must_use]
    pub fn find_empty(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.record.is_none())
    }

    /// First occupied slot whose record carries `id`.
    #[must_use]
    pub fn find_by_id(&self, id: RecordId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.record.as_ref().is_some_and(|r| r.id() == id))
    }

    /// Record at `index`, if occupied.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(|s| s.record.as_ref())
    }

    /// Mutable record at `index`, if occupied.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index).and_then(|s| s.record.as_mut())
    }

    /// Handle naming the current occupant of `index`.
    ///
    /// # Panics
    /// Panics if index is out of range.
    #[must_use]
    pub fn handle(&self, index: usize) -> SlotHandle {
        assert!(
            index < self.slots.len(),
            "slot index {} out of range ({})",
            index,
            self.slots.len()
        );

        SlotHandle {
            index,
            generation: self.slots[index].generation,
        }
    }

    /// Put `record` into `index`, returning its handle and any record that was
    /// already there. A displaced record counts as removed.
    ///
    /// # Panics
    /// Panics if index is out of range.
    pub fn place(&mut self, index: usize, record: T) -> (SlotHandle, Option<T>) {
        assert!(
            index < self.slots.len(),
            "slot index {} out of range ({})",
            index,
            self.slots.len()
        );

        let slot = &mut self.slots[index];
        let displaced = slot.record.replace(record);
        if displaced.is_some() {
            slot.generation = slot.generation.wrapping_add(1);
        }

        // Postcondition
        assert!(slot.record.is_some(), "placed slot must be occupied");

        (
            SlotHandle {
                index,
                generation: slot.generation,
            },
            displaced,
        )
    }

    /// Remove and return the occupant of `index`. Empty or out-of-range slots
    /// yield `None` and leave the generation alone.
    pub fn take(&mut self, index: usize) -> Option<T> {
        let slot = self.slots.get_mut(index)?;
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        Some(record)
    }

    /// True if `handle` still names the occupant it was taken for.
    #[must_use]
    pub fn is_current(&self, handle: SlotHandle) -> bool {
        self.slots
            .get(handle.index)
            .is_some_and(|s| s.record.is_some() && s.generation == handle.generation)
    }

    /// Resolve a handle under `policy`.
    #[must_use]
    pub fn resolve(&self, handle: SlotHandle, policy: HandlePolicy) -> Option<&T> {
        match policy {
            HandlePolicy::Aliasing => self.get(handle.index),
            HandlePolicy::Checked if self.is_current(handle) => self.get(handle.index),
            HandlePolicy::Checked => None,
        }
    }

    /// Resolve a handle mutably under `policy`.
    pub fn resolve_mut(&mut self, handle: SlotHandle, policy: HandlePolicy) -> Option<&mut T> {
        match policy {
            HandlePolicy::Aliasing => self.get_mut(handle.index),
            HandlePolicy::Checked if self.is_current(handle) => self.get_mut(handle.index),
            HandlePolicy::Checked => None,
        }
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.record.as_ref().map(|r| (i, r)))
    }
}
