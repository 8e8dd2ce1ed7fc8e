//! Caller Memory
//!
//! TigerStyle: every transfer between a caller and the registry goes through
//! one injectable interface, so copy faults are testable.
//!
//! The registry never dereferences caller addresses itself. It asks a
//! [`UserMemory`] to move an exact number of bytes, and the transfer either
//! completes or fails with a [`CopyFault`]. [`SimUserMemory`] is a simulated
//! caller address space made of aligned regions; unmapped addresses and
//! writes to read-only regions fault.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{USER_REGION_ALIGN_BYTES, USER_REGION_BASE_ADDRESS, USER_REGION_BYTES_MAX};

// =============================================================================
// Addresses
// =============================================================================

/// An address in caller memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserPtr(pub u64);

impl UserPtr {
    /// The null address; never mapped.
    pub const NULL: UserPtr = UserPtr(0);

    /// Raw address value.
    #[must_use]
    pub fn addr(self) -> u64 {
        self.0
    }

    /// Address `bytes` past this one.
    #[must_use]
    pub fn offset(self, bytes: u64) -> UserPtr {
        UserPtr(self.0.wrapping_add(bytes))
    }
}

impl std::fmt::Display for UserPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Direction of a failed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    /// Caller memory into the registry
    FromUser,
    /// Registry into caller memory
    ToUser,
}

/// A transfer between caller memory and the registry failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("copy fault {direction:?} at {addr} ({len} bytes)")]
pub struct CopyFault {
    /// Caller address of the transfer
    pub addr: UserPtr,
    /// Requested length in bytes
    pub len: usize,
    /// Which way the bytes were moving
    pub direction: CopyDirection,
}

// =============================================================================
// Transfer Interface
// =============================================================================

/// Bulk transfer primitive between caller buffers and registry buffers.
///
/// Transfers are all-or-nothing: on error the destination is untouched.
pub trait UserMemory {
    /// Fill `dst` from caller memory at `src`.
    fn copy_from_user(&self, src: UserPtr, dst: &mut [u8]) -> Result<(), CopyFault>;

    /// Write `src` into caller memory at `dst`.
    fn copy_to_user(&mut self, dst: UserPtr, src: &[u8]) -> Result<(), CopyFault>;
}

// =============================================================================
// Simulated Caller Memory
// =============================================================================

#[derive(Debug, Clone)]
struct Region {
    data: Vec<u8>,
    writable: bool,
}

/// Simulated caller address space.
///
/// Regions are placed at aligned addresses with an unmapped gap after each,
/// so running off the end of a region faults instead of spilling into the
/// next one.
#[derive(Debug, Clone)]
pub struct SimUserMemory {
    regions: BTreeMap<u64, Region>,
    next_base: u64,
}

impl SimUserMemory {
    /// Create an empty address space.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regions: BTreeMap::new(),
            next_base: USER_REGION_BASE_ADDRESS,
        }
    }

    /// Map a writable region holding `bytes`.
    pub fn map(&mut self, bytes: &[u8]) -> UserPtr {
        self.insert(bytes.to_vec(), true)
    }

    /// Map a writable zero-filled region of `len` bytes.
    pub fn map_zeroed(&mut self, len: usize) -> UserPtr {
        self.insert(vec![0; len], true)
    }

    /// Map a read-only region holding `bytes`.
    pub fn map_readonly(&mut self, bytes: &[u8]) -> UserPtr {
        self.insert(bytes.to_vec(), false)
    }

    /// Map `text` padded with zeros (or truncated) to exactly `len` bytes.
    pub fn map_fixed(&mut self, text: &[u8], len: usize) -> UserPtr {
        let mut data = vec![0; len];
        let n = text.len().min(len);
        data[..n].copy_from_slice(&text[..n]);
        self.insert(data, true)
    }

    /// Unmap the region starting at `ptr`. Returns false if nothing was there.
    pub fn unmap(&mut self, ptr: UserPtr) -> bool {
        self.regions.remove(&ptr.0).is_some()
    }

    /// Read back `len` bytes at `ptr`, if they are mapped.
    #[must_use]
    pub fn peek(&self, ptr: UserPtr, len: usize) -> Option<&[u8]> {
        let (base, region) = self.locate(ptr, len)?;
        let start = usize::try_from(ptr.0 - base).ok()?;
        region.data.get(start..start + len)
    }

    fn insert(&mut self, data: Vec<u8>, writable: bool) -> UserPtr {
        // Precondition
        assert!(
            data.len() <= USER_REGION_BYTES_MAX,
            "region {} bytes exceeds max {}",
            data.len(),
            USER_REGION_BYTES_MAX
        );

        let base = self.next_base;
        let len = data.len() as u64;
        // One alignment unit of guard after every region
        let span = len.div_ceil(USER_REGION_ALIGN_BYTES).max(1) + 1;
        self.next_base = base + span * USER_REGION_ALIGN_BYTES;
        self.regions.insert(base, Region { data, writable });

        UserPtr(base)
    }

    fn locate(&self, ptr: UserPtr, len: usize) -> Option<(u64, &Region)> {
        let (&base, region) = self.regions.range(..=ptr.0).next_back()?;
        let start = ptr.0 - base;
        let end = start.checked_add(len as u64)?;
        (end <= region.data.len() as u64).then_some((base, region))
    }
}

impl Default for SimUserMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl UserMemory for SimUserMemory {
    fn copy_from_user(&self, src: UserPtr, dst: &mut [u8]) -> Result<(), CopyFault> {
        let fault = CopyFault {
            addr: src,
            len: dst.len(),
            direction: CopyDirection::FromUser,
        };
        let bytes = self.peek(src, dst.len()).ok_or(fault)?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    fn copy_to_user(&mut self, dst: UserPtr, src: &[u8]) -> Result<(), CopyFault> {
        let fault = CopyFault {
            addr: dst,
            len: src.len(),
            direction: CopyDirection::ToUser,
        };
        let (base, region) = self.locate(dst, src.len()).ok_or(fault)?;
        if !region.writable {
            return Err(fault);
        }

        let start = usize::try_from(dst.0 - base).map_err(|_| fault)?;
        let region = self.regions.get_mut(&base).ok_or(fault)?;
        region.data[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }
}
