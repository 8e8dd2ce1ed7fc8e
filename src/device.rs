//! Control Device
//!
//! TigerStyle: one entry point, one request layout, one failure value.
//!
//! ```text
//! caller ── ioctl(cmd, arg) ──► copy 32-byte request from arg
//!                               │
//!                               ├─ CREATE_ENGINE       name
//!                               ├─ CREATE_COMPARTMENT  desc, id (engine)
//!                               ├─ DELETE_COMPARTMENT  id
//!                               ├─ SHOW_LOG            id, logs (out)
//!                               └─ UPDATE_LOG          id, logs (in)
//!                                         │
//!                                         ▼
//!                               created id | 0 | -1
//! ```
//!
//! The request is copied in full whatever the command uses. Every failure,
//! whatever its cause, comes back as `-1`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::config::RegistryConfig;
use crate::constants::{
    CMD_CREATE_COMPARTMENT, CMD_CREATE_ENGINE, CMD_DELETE_COMPARTMENT, CMD_SHOW_LOG,
    CMD_UPDATE_LOG, CONTROL_FAILURE, DEVICE_NAME, REQUEST_BYTES,
};
use crate::error::RegistryResult;
use crate::shared::SharedRegistry;
use crate::slot::RecordId;
use crate::user::{UserMemory, UserPtr};

// =============================================================================
// Commands
// =============================================================================

/// Operation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Create an engine
    CreateEngine,
    /// Create a compartment bound to an engine
    CreateCompartment,
    /// Delete a compartment
    DeleteCompartment,
    /// Copy an engine log to the caller
    ShowLog,
    /// Copy a caller buffer into an engine log
    UpdateLog,
}

impl Command {
    /// Control code for this command.
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            Self::CreateEngine => CMD_CREATE_ENGINE,
            Self::CreateCompartment => CMD_CREATE_COMPARTMENT,
            Self::DeleteCompartment => CMD_DELETE_COMPARTMENT,
            Self::ShowLog => CMD_SHOW_LOG,
            Self::UpdateLog => CMD_UPDATE_LOG,
        }
    }

    /// Parse a control code.
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            CMD_CREATE_ENGINE => Some(Self::CreateEngine),
            CMD_CREATE_COMPARTMENT => Some(Self::CreateCompartment),
            CMD_DELETE_COMPARTMENT => Some(Self::DeleteCompartment),
            CMD_SHOW_LOG => Some(Self::ShowLog),
            CMD_UPDATE_LOG => Some(Self::UpdateLog),
            _ => None,
        }
    }
}

// =============================================================================
// Request Record
// =============================================================================

/// Fixed-layout request record.
///
/// ```text
/// 0        4        8                16               24               32
/// ┌────────┬────────┬────────────────┬────────────────┬────────────────┐
/// │ id i32 │  pad   │ name  u64      │ desc  u64      │ logs  u64      │
/// └────────┴────────┴────────────────┴────────────────┴────────────────┘
/// ```
/// Little-endian throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Request {
    /// Target engine (create compartment) or compartment (others)
    pub id: RecordId,
    /// Engine name buffer
    pub name: UserPtr,
    /// Compartment description buffer
    pub desc: UserPtr,
    /// Log buffer, source or destination
    pub logs: UserPtr,
}

impl Request {
    /// Encode into the wire layout.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(REQUEST_BYTES);
        buf.put_i32_le(self.id);
        buf.put_u32_le(0);
        buf.put_u64_le(self.name.addr());
        buf.put_u64_le(self.desc.addr());
        buf.put_u64_le(self.logs.addr());

        // Postcondition
        assert_eq!(buf.len(), REQUEST_BYTES, "request encoding size");
        buf.freeze()
    }

    /// Decode from the wire layout. Padding is ignored.
    #[must_use]
    pub fn decode(raw: &[u8; REQUEST_BYTES]) -> Self {
        let mut buf = &raw[..];
        let id = buf.get_i32_le();
        buf.advance(4);
        let name = UserPtr(buf.get_u64_le());
        let desc = UserPtr(buf.get_u64_le());
        let logs = UserPtr(buf.get_u64_le());
        Self {
            id,
            name,
            desc,
            logs,
        }
    }
}

// =============================================================================
// Device
// =============================================================================

/// The registry behind its control interface.
#[derive(Debug, Clone)]
pub struct ControlDevice {
    registry: SharedRegistry,
}

impl ControlDevice {
    /// Register the device over a fresh registry.
    #[must_use]
    pub fn register(config: &RegistryConfig) -> Self {
        let device = Self::with_registry(SharedRegistry::new(config));
        tracing::info!(
            device = DEVICE_NAME,
            engines = config.engine_slots,
            compartments = config.compartment_slots,
            policy = config.handle_policy.as_str(),
            concurrency = config.concurrency.as_str(),
            "Steam driver initialized"
        );
        device
    }

    /// Register the device over an existing shared registry.
    #[must_use]
    pub fn with_registry(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    /// Registry behind the device, for inspection.
    #[must_use]
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Tear the device down. Records are released with the registry.
    pub fn deregister(self) {
        tracing::info!(device = DEVICE_NAME, "Shutting down steam system");
    }

    /// Single multiplexed entry point.
    ///
    /// Returns the new identifier for create commands, `0` for the others,
    /// and `-1` on any failure.
    pub async fn ioctl<M>(&self, mem: &mut M, cmd: u32, arg: UserPtr) -> i64
    where
        M: UserMemory + ?Sized,
    {
        let mut raw = [0u8; REQUEST_BYTES];
        if let Err(fault) = mem.copy_from_user(arg, &mut raw) {
            tracing::debug!(%fault, "Request copy failed");
            return CONTROL_FAILURE;
        }
        let request = Request::decode(&raw);

        let Some(command) = Command::from_code(cmd) else {
            tracing::debug!(cmd = %format!("{cmd:#x}"), "Unknown control code");
            return CONTROL_FAILURE;
        };

        match self.dispatch(mem, command, request).await {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(?command, error = %e, "Control request failed");
                CONTROL_FAILURE
            }
        }
    }

    async fn dispatch<M>(&self, mem: &mut M, command: Command, req: Request) -> RegistryResult<i64>
    where
        M: UserMemory + ?Sized,
    {
        let registry = &self.registry;
        match command {
            Command::CreateEngine => registry.create_engine(&*mem, req.name).await.map(i64::from),
            Command::CreateCompartment => registry
                .create_compartment(&*mem, req.desc, req.id)
                .await
                .map(i64::from),
            Command::DeleteCompartment => registry.delete_compartment(req.id).await.map(|()| 0),
            Command::ShowLog => registry.show_log(mem, req.id, req.logs).await.map(|()| 0),
            Command::UpdateLog => registry
                .update_log(&*mem, req.id, req.logs)
                .await
                .map(|()| 0),
        }
    }
}

// =============================================================================
// Caller Helpers
// =============================================================================

/// Map a request record into `mem` and issue it.
pub async fn call<M>(device: &ControlDevice, mem: &mut M, command: Command, request: Request) -> i64
where
    M: UserMemory + RequestArena,
{
    let arg = mem.stage_request(&request);
    device.ioctl(mem, command.code(), arg).await
}

/// Caller memory that can stage a request record.
pub trait RequestArena {
    /// Place an encoded request and return its address.
    fn stage_request(&mut self, request: &Request) -> UserPtr;
}

impl RequestArena for crate::user::SimUserMemory {
    fn stage_request(&mut self, request: &Request) -> UserPtr {
        self.map(&request.encode())
    }
}
