//! Steam Registry - Engine/Compartment Slot Registry
//!
//! TigerStyle: fixed capacities, explicit handles, injectable I/O.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │  ControlDevice      ioctl(cmd, request) → id|0|-1   │
//! ├─────────────────────────────────────────────────────┤
//! │  SharedRegistry     racy | serialized               │
//! ├─────────────────────────────────────────────────────┤
//! │  Registry           create / link / unlink / logs   │
//! │    ├─ SlotTable<Engine>       256 slots             │
//! │    ├─ SlotTable<Compartment>  512 slots             │
//! │    └─ reclaim_orphans         usage == 0 → freed    │
//! ├─────────────────────────────────────────────────────┤
//! │  UserMemory (copy faults)   IdSource (seeded)       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Engines are freed by a sweep that trusts each engine's usage counter and
//! never consults the compartment table. Compartments hold a handle to their
//! engine that nothing revalidates, so any path that zeroes a counter while a
//! compartment is live leaves a dangling handle. The registry reproduces that
//! hazard on purpose; [`audit::audit`] reports it.
//!
//! # Usage
//!
//! ```rust
//! use steam_registry::{Registry, RegistryConfig, SimUserMemory};
//! use steam_registry::constants::{COMPARTMENT_DESC_BYTES, ENGINE_NAME_BYTES};
//!
//! let mut registry = Registry::new(&RegistryConfig::with_seed(42));
//! let mut mem = SimUserMemory::new();
//! let name = mem.map_fixed(b"Rocket", ENGINE_NAME_BYTES);
//! let desc = mem.map_fixed(b"first class", COMPARTMENT_DESC_BYTES);
//!
//! let engine = registry.create_engine(&mem, name).unwrap();
//! let compartment = registry.create_compartment(&mem, desc, engine).unwrap();
//! assert_eq!(registry.engine_by_id(engine).unwrap().usage, 1);
//!
//! registry.delete_compartment(compartment).unwrap();
//! registry.create_engine(&mem, name).unwrap();
//! assert!(registry.engine_by_id(engine).is_none());
//! ```
//!
//! Replay identifier assignment with an explicit seed:
//! ```bash
//! STEAM_SEED=12345 steam demo
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod audit;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod ids;
pub mod race;
pub mod record;
pub mod registry;
pub mod scenario;
pub mod shared;
pub mod slot;
pub mod user;

// Re-export common types
pub use audit::{audit, snapshot, Divergence, RegistrySnapshot};
pub use config::{ConcurrencyMode, ConfigError, RegistryConfig};
pub use device::{Command, ControlDevice, Request};
pub use error::{RegistryError, RegistryResult};
pub use ids::{FixedIds, IdSource, SeededIds};
pub use record::{Compartment, Engine, RecordKind};
pub use registry::Registry;
pub use scenario::{Scenario, ScenarioError, ScenarioReport, ScenarioRunner};
pub use shared::SharedRegistry;
pub use slot::{HandlePolicy, RecordId, SlotHandle, SlotTable};
pub use user::{CopyFault, SimUserMemory, UserMemory, UserPtr};
