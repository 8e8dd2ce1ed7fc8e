//! Constants
//!
//! TigerStyle: every limit has a name, and every name carries its unit.

// =============================================================================
// Slot Capacities
// =============================================================================

/// Number of engine slots
pub const ENGINES_COUNT_MAX: usize = 0x100;

/// Number of compartment slots
pub const COMPARTMENTS_COUNT_MAX: usize = 0x200;

/// Largest value an engine usage counter can hold
pub const ENGINE_USAGE_MAX: u8 = u8::MAX;

// =============================================================================
// Record Buffers
// =============================================================================

/// Engine name field size in bytes (copied verbatim, not NUL-terminated)
pub const ENGINE_NAME_BYTES: usize = 0x28;

/// Compartment description field size in bytes
pub const COMPARTMENT_DESC_BYTES: usize = 0x70;

/// Engine maintenance log size in bytes
pub const ENGINE_LOG_BYTES: usize = 0x100;

// =============================================================================
// Control Interface
// =============================================================================

/// Device name announced at registration
pub const DEVICE_NAME: &str = "steam";

/// Control code: create an engine
pub const CMD_CREATE_ENGINE: u32 = 0xc000_10ff;

/// Control code: create a compartment bound to an engine
pub const CMD_CREATE_COMPARTMENT: u32 = 0x1337_beef;

/// Control code: delete a compartment
pub const CMD_DELETE_COMPARTMENT: u32 = 0xdead_beef;

/// Control code: copy an engine log out to the caller
pub const CMD_SHOW_LOG: u32 = 0xcafe_beef;

/// Control code: copy a caller buffer into an engine log
pub const CMD_UPDATE_LOG: u32 = 0xbaad_beef;

/// Size of the request record in bytes
pub const REQUEST_BYTES: usize = 32;

/// Value returned to the caller for any failure
pub const CONTROL_FAILURE: i64 = -1;

// =============================================================================
// Simulated Caller Memory
// =============================================================================

/// Alignment of simulated caller regions in bytes
pub const USER_REGION_ALIGN_BYTES: u64 = 0x1000;

/// First address handed out by the simulated caller memory
pub const USER_REGION_BASE_ADDRESS: u64 = 0x1_0000;

/// Largest single simulated caller region in bytes
pub const USER_REGION_BYTES_MAX: usize = 1 << 20;

// =============================================================================
// Environment
// =============================================================================

/// Seed override for identifier generation
pub const ENV_SEED: &str = "STEAM_SEED";

/// Handle policy override (`aliasing` | `checked`)
pub const ENV_HANDLE_POLICY: &str = "STEAM_HANDLE_POLICY";

/// Concurrency mode override (`racy` | `serialized`)
pub const ENV_CONCURRENCY: &str = "STEAM_CONCURRENCY";
