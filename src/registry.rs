//! Registry
//!
//! TigerStyle: two fixed slot tables, one identifier source, no ambient state.
//!
//! # Operations
//!
//! ```text
//! create_engine       sweep → reserve engine slot → install engine
//! create_compartment  locate link target → reserve compartment slot
//!                       → install compartment (link, usage++, sweep)
//! delete_compartment  locate compartment → unlink (usage--, free slot)
//! show_log            locate compartment → copy engine log to caller
//! update_log          locate compartment → copy caller buffer to engine log
//! ```
//!
//! Each operation is a composition of the public steps below. Run back to
//! back they give the single-threaded behaviour; [`crate::SharedRegistry`]
//! can interleave other callers between them.
//!
//! # Usage as liveness
//!
//! The sweep frees every engine whose usage counter is zero and never looks
//! at the compartment table. A compartment whose engine was freed keeps its
//! handle. Under [`HandlePolicy::Aliasing`] that handle resolves to whatever
//! engine occupies the slot next; under [`HandlePolicy::Checked`] it resolves
//! to [`RegistryError::StaleEngine`].

use crate::config::RegistryConfig;
use crate::constants::ENGINE_USAGE_MAX;
use crate::error::{RegistryError, RegistryResult};
use crate::ids::{IdSource, SeededIds};
use crate::record::{Compartment, Engine, RecordKind};
use crate::slot::{HandlePolicy, RecordId, SlotHandle, SlotTable};
use crate::user::{UserMemory, UserPtr};

/// Engine and compartment slot tables plus the identifier source.
pub struct Registry {
    engines: SlotTable<Engine>,
    compartments: SlotTable<Compartment>,
    ids: Box<dyn IdSource>,
    policy: HandlePolicy,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("engines", &self.engines.len())
            .field("compartments", &self.compartments.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Create an empty registry. Identifiers come from the configured seed,
    /// or from a logged entropy seed.
    ///
    /// # Panics
    /// Panics if `config` fails [`RegistryConfig::validate`].
    #[must_use]
    pub fn new(config: &RegistryConfig) -> Self {
        let ids = match config.seed {
            Some(seed) => SeededIds::with_seed(seed),
            None => SeededIds::from_entropy(),
        };
        Self::with_ids(config, Box::new(ids))
    }

    /// Create an empty registry drawing identifiers from `ids`.
    ///
    /// # Panics
    /// Panics if `config` fails [`RegistryConfig::validate`].
    #[must_use]
    pub fn with_ids(config: &RegistryConfig, ids: Box<dyn IdSource>) -> Self {
        if let Err(err) = config.validate() {
            panic!("invalid registry config: {err}");
        }

        Self {
            engines: SlotTable::new(config.engine_slots),
            compartments: SlotTable::new(config.compartment_slots),
            ids,
            policy: config.handle_policy,
        }
    }

    /// Handle policy in force.
    #[must_use]
    pub fn policy(&self) -> HandlePolicy {
        self.policy
    }

    /// Engine slot table.
    #[must_use]
    pub fn engines(&self) -> &SlotTable<Engine> {
        &self.engines
    }

    /// Compartment slot table.
    #[must_use]
    pub fn compartments(&self) -> &SlotTable<Compartment> {
        &self.compartments
    }

    /// First engine carrying `id`.
    #[must_use]
    pub fn engine_by_id(&self, id: RecordId) -> Option<&Engine> {
        self.engines.find_by_id(id).and_then(|i| self.engines.get(i))
    }

    /// First compartment carrying `id`.
    #[must_use]
    pub fn compartment_by_id(&self, id: RecordId) -> Option<&Compartment> {
        self.compartments
            .find_by_id(id)
            .and_then(|i| self.compartments.get(i))
    }

    /// Engine that compartment `id` currently resolves to under the policy.
    #[must_use]
    pub fn engine_of(&self, compartment_id: RecordId) -> Option<&Engine> {
        let compartment = self.compartment_by_id(compartment_id)?;
        self.engines.resolve(compartment.engine, self.policy)
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Create an engine named by 40 bytes of caller memory at `name`.
    pub fn create_engine<M>(&mut self, mem: &M, name: UserPtr) -> RegistryResult<RecordId>
    where
        M: UserMemory + ?Sized,
    {
        self.reclaim_orphans();
        let index = self.reserve_engine_slot()?;
        self.install_engine(index, mem, name)
    }

    /// Create a compartment described by 112 bytes at `desc`, bound to the
    /// first engine carrying `engine_id`.
    pub fn create_compartment<M>(
        &mut self,
        mem: &M,
        desc: UserPtr,
        engine_id: RecordId,
    ) -> RegistryResult<RecordId>
    where
        M: UserMemory + ?Sized,
    {
        let target = self.locate_link_target(engine_id)?;
        let index = self.reserve_compartment_slot()?;
        self.install_compartment(index, target, mem, desc)
    }

    /// Delete the first compartment carrying `id`.
    pub fn delete_compartment(&mut self, id: RecordId) -> RegistryResult<()> {
        let (index, engine) = self.locate_compartment(id)?;
        self.unlink_compartment(index, engine);
        Ok(())
    }

    /// Copy the log of compartment `id`'s engine to caller memory at `out`.
    pub fn show_log<M>(&self, mem: &mut M, id: RecordId, out: UserPtr) -> RegistryResult<()>
    where
        M: UserMemory + ?Sized,
    {
        let (_, engine) = self.locate_compartment(id)?;
        self.read_engine_log(engine, mem, out)
    }

    /// Overwrite the log of compartment `id`'s engine from caller memory at
    /// `src`.
    pub fn update_log<M>(&mut self, mem: &M, id: RecordId, src: UserPtr) -> RegistryResult<()>
    where
        M: UserMemory + ?Sized,
    {
        let (_, engine) = self.locate_compartment(id)?;
        self.write_engine_log(engine, mem, src)
    }

    // =========================================================================
    // Steps
    // =========================================================================

    /// Free every engine whose usage counter is zero. Returns how many.
    pub fn reclaim_orphans(&mut self) -> usize {
        let mut reclaimed = 0;
        for index in 0..self.engines.capacity() {
            if !self.engines.get(index).is_some_and(Engine::is_orphaned) {
                continue;
            }
            if let Some(engine) = self.engines.take(index) {
                tracing::debug!(engine_id = engine.id, slot = index, "Engine reclaimed");
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            tracing::info!(count = reclaimed, "Automated engine shutdown");
        }
        reclaimed
    }

    /// First empty engine slot.
    pub fn reserve_engine_slot(&self) -> RegistryResult<usize> {
        self.engines.find_empty().ok_or(RegistryError::NoCapacity {
            kind: RecordKind::Engine,
            capacity: self.engines.capacity(),
        })
    }

    /// Build an engine from caller memory and put it in slot `index`.
    ///
    /// A copy fault drops the half-built engine; the slot is left as it was.
    /// If another caller filled the slot in the meantime, that engine is
    /// displaced and leaked.
    pub fn install_engine<M>(
        &mut self,
        index: usize,
        mem: &M,
        name: UserPtr,
    ) -> RegistryResult<RecordId>
    where
        M: UserMemory + ?Sized,
    {
        let mut engine = Engine::new(0);
        mem.copy_from_user(name, &mut engine.name)?;
        engine.id = self.ids.next_id();

        let id = engine.id;
        let (handle, displaced) = self.engines.place(index, engine);
        if let Some(lost) = displaced {
            tracing::warn!(
                engine_id = lost.id,
                usage = lost.usage,
                slot = index,
                "Engine slot overwritten; previous engine leaked"
            );
        }

        tracing::info!(engine_id = id, %handle, "Engine added");
        Ok(id)
    }

    /// Engine handle for `engine_id`, provided its usage counter has room.
    pub fn locate_link_target(&self, engine_id: RecordId) -> RegistryResult<SlotHandle> {
        let index = self
            .engines
            .find_by_id(engine_id)
            .ok_or(RegistryError::NotFound {
                kind: RecordKind::Engine,
                id: engine_id,
            })?;

        let full = self
            .engines
            .get(index)
            .is_some_and(|e| e.usage == ENGINE_USAGE_MAX);
        if full {
            return Err(RegistryError::CapacityExceeded { engine_id });
        }

        Ok(self.engines.handle(index))
    }

    /// First empty compartment slot.
    pub fn reserve_compartment_slot(&self) -> RegistryResult<usize> {
        self.compartments
            .find_empty()
            .ok_or(RegistryError::NoCapacity {
                kind: RecordKind::Compartment,
                capacity: self.compartments.capacity(),
            })
    }

    /// Build a compartment from caller memory, put it in slot `index`, bind
    /// it to `target`, bump the engine's usage and run the sweep.
    ///
    /// The identifier is drawn before the description is copied. A copy fault
    /// drops the half-built compartment. Under the checked policy a target
    /// that no longer resolves fails with `StaleEngine`; under aliasing the
    /// compartment is bound regardless and the usage increment lands on
    /// whatever occupies the slot, or nowhere.
    pub fn install_compartment<M>(
        &mut self,
        index: usize,
        target: SlotHandle,
        mem: &M,
        desc: UserPtr,
    ) -> RegistryResult<RecordId>
    where
        M: UserMemory + ?Sized,
    {
        let id = self.ids.next_id();
        let mut compartment = Compartment::new(id, target);
        mem.copy_from_user(desc, &mut compartment.desc)?;

        if self.policy == HandlePolicy::Checked && !self.engines.is_current(target) {
            return Err(RegistryError::StaleEngine { handle: target });
        }

        let (_, displaced) = self.compartments.place(index, compartment);
        if let Some(lost) = displaced {
            tracing::warn!(
                compartment_id = lost.id,
                slot = index,
                "Compartment slot overwritten; previous compartment leaked"
            );
        }

        match self.engines.resolve_mut(target, self.policy) {
            Some(engine) => engine.usage = engine.usage.wrapping_add(1),
            None => tracing::warn!(
                compartment_id = id,
                engine = %target,
                "Linked to an empty engine slot; usage increment lost"
            ),
        }

        self.reclaim_orphans();
        tracing::info!(compartment_id = id, engine = %target, "New compartment connected to engine");
        Ok(id)
    }

    /// Slot index and engine handle of the first compartment carrying `id`.
    pub fn locate_compartment(&self, id: RecordId) -> RegistryResult<(usize, SlotHandle)> {
        let not_found = RegistryError::NotFound {
            kind: RecordKind::Compartment,
            id,
        };
        let index = self.compartments.find_by_id(id).ok_or(not_found.clone())?;
        let compartment = self.compartments.get(index).ok_or(not_found)?;
        Ok((index, compartment.engine))
    }

    /// Decrement `engine`'s usage (wrapping) and free compartment slot
    /// `index`. No sweep runs.
    pub fn unlink_compartment(&mut self, index: usize, engine: SlotHandle) {
        match self.engines.resolve_mut(engine, self.policy) {
            Some(target) => target.usage = target.usage.wrapping_sub(1),
            None => tracing::warn!(engine = %engine, "Engine gone; usage decrement lost"),
        }

        match self.compartments.take(index) {
            Some(compartment) => tracing::info!(
                compartment_id = compartment.id,
                slot = index,
                "Compartment unlinked from engine"
            ),
            None => tracing::warn!(slot = index, "Compartment slot already empty"),
        }
    }

    /// Copy `engine`'s whole log to caller memory at `out`.
    pub fn read_engine_log<M>(
        &self,
        engine: SlotHandle,
        mem: &mut M,
        out: UserPtr,
    ) -> RegistryResult<()>
    where
        M: UserMemory + ?Sized,
    {
        let target = self
            .engines
            .resolve(engine, self.policy)
            .ok_or(RegistryError::StaleEngine { handle: engine })?;

        mem.copy_to_user(out, &target.logs[..])?;
        tracing::info!(engine_id = target.id, "Maintenance logs read");
        Ok(())
    }

    /// Overwrite `engine`'s whole log from caller memory at `src`.
    pub fn write_engine_log<M>(
        &mut self,
        engine: SlotHandle,
        mem: &M,
        src: UserPtr,
    ) -> RegistryResult<()>
    where
        M: UserMemory + ?Sized,
    {
        let target = self
            .engines
            .resolve_mut(engine, self.policy)
            .ok_or(RegistryError::StaleEngine { handle: engine })?;

        mem.copy_from_user(src, &mut target.logs[..])?;
        tracing::info!(engine_id = target.id, "Maintenance logs updated");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{
        COMPARTMENTS_COUNT_MAX, COMPARTMENT_DESC_BYTES, ENGINES_COUNT_MAX, ENGINE_LOG_BYTES,
        ENGINE_NAME_BYTES,
    };
    use crate::ids::FixedIds;
    use crate::user::SimUserMemory;

    fn registry(policy: HandlePolicy) -> Registry {
        Registry::new(&RegistryConfig::with_seed(42).handle_policy(policy))
    }

    fn name(mem: &mut SimUserMemory, text: &str) -> UserPtr {
        mem.map_fixed(text.as_bytes(), ENGINE_NAME_BYTES)
    }

    fn desc(mem: &mut SimUserMemory, text: &str) -> UserPtr {
        mem.map_fixed(text.as_bytes(), COMPARTMENT_DESC_BYTES)
    }

    fn usage(reg: &Registry, engine_id: RecordId) -> u8 {
        reg.engine_by_id(engine_id).unwrap().usage
    }

    #[test]
    fn test_create_engine_copies_name() {
        let mut reg = registry(HandlePolicy::Aliasing);
        let mut mem = SimUserMemory::new();
        let ptr = name(&mut mem, "Puffing Billy");

        let id = reg.create_engine(&mem, ptr).unwrap();

        let engine = reg.engine_by_id(id).unwrap();
        assert_eq!(engine.name_text(), "Puffing Billy");
        assert_eq!(engine.usage, 0);
        assert!(engine.logs.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_link_sets_usage_to_one() {
        let mut reg = registry(HandlePolicy::Aliasing);
        let mut mem = SimUserMemory::new();
        let n = name(&mut mem, "Rocket");
        let d = desc(&mut mem, "first class");

        let engine = reg.create_engine(&mem, n).unwrap();
        let compartment = reg.create_compartment(&mem, d, engine).unwrap();

        assert_eq!(usage(&reg, engine), 1);
        assert_eq!(reg.engine_of(compartment).unwrap().id, engine);
        assert_eq!(
            reg.compartment_by_id(compartment).unwrap().desc_text(),
            "first class"
        );
    }

    #[test]
    fn test_fresh_engine_survives_only_until_next_sweep() {
        let mut reg = registry(HandlePolicy::Aliasing);
        let mut mem = SimUserMemory::new();
        let n = name(&mut mem, "Lonely");

        let first = reg.create_engine(&mem, n).unwrap();
        assert!(reg.engine_by_id(first).is_some());

        // The next create sweeps the unlinked engine first
        let second = reg.create_engine(&mem, n).unwrap();
        assert!(reg.engine_by_id(first).is_none());
        assert!(reg.engine_by_id(second).is_some());
        assert_eq!(reg.engines().len(), 1);
    }

    #[test]
    fn test_delete_then_sweep_reclaims_engine() {
        let mut reg = registry(HandlePolicy::Aliasing);
        let mut mem = SimUserMemory::new();
        let n = name(&mut mem, "Mallard");
        let d = desc(&mut mem, "dining car");

        let engine = reg.create_engine(&mem, n).unwrap();
        let compartment = reg.create_compartment(&mem, d, engine).unwrap();

        reg.delete_compartment(compartment).unwrap();
        // No sweep on delete
        assert_eq!(usage(&reg, engine), 0);

        reg.create_engine(&mem, n).unwrap();
        assert!(reg.engine_by_id(engine).is_none());
        assert!(matches!(
            reg.create_compartment(&mem, d, engine),
            Err(RegistryError::NotFound {
                kind: RecordKind::Engine,
                ..
            })
        ));
    }

    #[test]
    fn test_create_compartment_sweeps_other_orphans() {
        let mut reg = registry(HandlePolicy::Aliasing);
        let mut mem = SimUserMemory::new();
        let n = name(&mut mem, "Flyer");
        let d = desc(&mut mem, "sleeper");

        let engine = reg.create_engine(&mem, n).unwrap();
        let c1 = reg.create_compartment(&mem, d, engine).unwrap();
        reg.delete_compartment(c1).unwrap();
        assert_eq!(reg.engines().len(), 1);

        // A second engine is linked; its creation sweeps the first
        let other = reg.create_engine(&mem, n).unwrap();
        assert!(reg.engine_by_id(engine).is_none());
        reg.create_compartment(&mem, d, other).unwrap();
        assert_eq!(reg.engines().len(), 1);
        assert_eq!(usage(&reg, other), 1);
    }

    #[test]
    fn test_log_roundtrip_exact_bytes() {
        let mut reg = registry(HandlePolicy::Aliasing);
        let mut mem = SimUserMemory::new();
        let n = name(&mut mem, "Coronation");
        let d = desc(&mut mem, "mail");
        let engine = reg.create_engine(&mem, n).unwrap();
        let compartment = reg.create_compartment(&mem, d, engine).unwrap();

        let pattern: Vec<u8> = (0..ENGINE_LOG_BYTES).map(|i| (i * 7) as u8).collect();
        let src = mem.map(&pattern);
        reg.update_log(&mem, compartment, src).unwrap();

        let out = mem.map_zeroed(ENGINE_LOG_BYTES);
        reg.show_log(&mut mem, compartment, out).unwrap();
        assert_eq!(mem.peek(out, ENGINE_LOG_BYTES), Some(&pattern[..]));
    }

    #[test]
    fn test_logs_shared_between_compartments_of_one_engine() {
        let mut reg = registry(HandlePolicy::Aliasing);
        let mut mem = SimUserMemory::new();
        let n = name(&mut mem, "Tornado");
        let d = desc(&mut mem, "coach");
        let engine = reg.create_engine(&mem, n).unwrap();
        let a = reg.create_compartment(&mem, d, engine).unwrap();
        let b = reg.create_compartment(&mem, d, engine).unwrap();

        let src = mem.map(&[0x5A; ENGINE_LOG_BYTES]);
        reg.update_log(&mem, a, src).unwrap();

        let out = mem.map_zeroed(ENGINE_LOG_BYTES);
        reg.show_log(&mut mem, b, out).unwrap();
        assert_eq!(mem.peek(out, ENGINE_LOG_BYTES), Some(&[0x5A; ENGINE_LOG_BYTES][..]));
        assert_eq!(usage(&reg, engine), 2);
    }

    #[test]
    fn test_name_copy_fault_leaves_no_engine() {
        let mut reg = registry(HandlePolicy::Aliasing);
        let mut mem = SimUserMemory::new();
        let short = mem.map(b"too short");

        let result = reg.create_engine(&mem, short);

        assert!(matches!(result, Err(RegistryError::CopyFault(_))));
        assert!(reg.engines().is_empty());
    }

    #[test]
    fn test_desc_copy_fault_leaves_usage_alone() {
        let mut reg = registry(HandlePolicy::Aliasing);
        let mut mem = SimUserMemory::new();
        let n = name(&mut mem, "Sir Nigel");
        let d = desc(&mut mem, "guard van");
        let engine = reg.create_engine(&mem, n).unwrap();
        reg.create_compartment(&mem, d, engine).unwrap();

        let result = reg.create_compartment(&mem, UserPtr::NULL, engine);

        assert!(matches!(result, Err(RegistryError::CopyFault(_))));
        assert_eq!(reg.compartments().len(), 1);
        assert_eq!(usage(&reg, engine), 1);
    }

    #[test]
    fn test_log_copy_faults() {
        let mut reg = registry(HandlePolicy::Aliasing);
        let mut mem = SimUserMemory::new();
        let n = name(&mut mem, "Evening Star");
        let d = desc(&mut mem, "parlour");
        let engine = reg.create_engine(&mem, n).unwrap();
        let compartment = reg.create_compartment(&mem, d, engine).unwrap();

        let readonly = mem.map_readonly(&[0; ENGINE_LOG_BYTES]);
        assert!(matches!(
            reg.show_log(&mut mem, compartment, readonly),
            Err(RegistryError::CopyFault(_))
        ));

        let short = mem.map(&[1; ENGINE_LOG_BYTES - 1]);
        assert!(matches!(
            reg.update_log(&mem, compartment, short),
            Err(RegistryError::CopyFault(_))
        ));
        assert!(reg.engine_by_id(engine).unwrap().logs.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unknown_ids_are_not_found() {
        let mut reg = registry(HandlePolicy::Aliasing);
        let mut mem = SimUserMemory::new();
        let n = name(&mut mem, "Duchess");
        let d = desc(&mut mem, "buffet");
        let engine = reg.create_engine(&mem, n).unwrap();
        let compartment = reg.create_compartment(&mem, d, engine).unwrap();
        let missing = compartment.wrapping_add(1);
        let out = mem.map_zeroed(ENGINE_LOG_BYTES);

        assert!(matches!(
            reg.create_compartment(&mem, d, engine.wrapping_add(1)),
            Err(RegistryError::NotFound { kind: RecordKind::Engine, .. })
        ));
        assert!(matches!(
            reg.delete_compartment(missing),
            Err(RegistryError::NotFound { kind: RecordKind::Compartment, .. })
        ));
        assert!(matches!(
            reg.show_log(&mut mem, missing, out),
            Err(RegistryError::NotFound { kind: RecordKind::Compartment, .. })
        ));
        assert!(matches!(
            reg.update_log(&mem, missing, out),
            Err(RegistryError::NotFound { kind: RecordKind::Compartment, .. })
        ));

        assert_eq!(reg.engines().len(), 1);
        assert_eq!(reg.compartments().len(), 1);
        assert_eq!(usage(&reg, engine), 1);
    }

    #[test]
    fn test_engine_capacity() {
        let mut reg = registry(HandlePolicy::Aliasing);
        let mut mem = SimUserMemory::new();
        let n = name(&mut mem, "Shunter");
        let d = desc(&mut mem, "hopper");

        // Each engine needs a compartment or the next create sweeps it
        for _ in 0..ENGINES_COUNT_MAX {
            let engine = reg.create_engine(&mem, n).unwrap();
            reg.create_compartment(&mem, d, engine).unwrap();
        }
        assert_eq!(reg.engines().len(), ENGINES_COUNT_MAX);

        let result = reg.create_engine(&mem, n);
        assert!(matches!(
            result,
            Err(RegistryError::NoCapacity { kind: RecordKind::Engine, capacity: ENGINES_COUNT_MAX })
        ));
        assert_eq!(reg.engines().len(), ENGINES_COUNT_MAX);
        assert!(reg.engines().iter().all(|(_, e)| e.usage == 1));
    }

    #[test]
    fn test_compartment_capacity() {
        let mut reg = registry(HandlePolicy::Aliasing);
        let mut mem = SimUserMemory::new();
        let n = name(&mut mem, "Workhorse");
        let d = desc(&mut mem, "wagon");

        let mut engines = Vec::new();
        for _ in 0..3 {
            let engine = reg.create_engine(&mem, n).unwrap();
            reg.create_compartment(&mem, d, engine).unwrap();
            engines.push(engine);
        }
        let mut created = 3;
        for &engine in engines.iter().cycle() {
            if created == COMPARTMENTS_COUNT_MAX {
                break;
            }
            reg.create_compartment(&mem, d, engine).unwrap();
            created += 1;
        }
        assert_eq!(reg.compartments().len(), COMPARTMENTS_COUNT_MAX);

        let before: Vec<u8> = engines.iter().map(|&e| usage(&reg, e)).collect();
        let result = reg.create_compartment(&mem, d, engines[0]);
        assert!(matches!(
            result,
            Err(RegistryError::NoCapacity { kind: RecordKind::Compartment, .. })
        ));
        let after: Vec<u8> = engines.iter().map(|&e| usage(&reg, e)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_usage_counter_refuses_at_max() {
        let mut reg = registry(HandlePolicy::Aliasing);
        let mut mem = SimUserMemory::new();
        let n = name(&mut mem, "Big Boy");
        let d = desc(&mut mem, "boxcar");
        let engine = reg.create_engine(&mem, n).unwrap();

        for _ in 0..ENGINE_USAGE_MAX {
            reg.create_compartment(&mem, d, engine).unwrap();
        }
        assert_eq!(usage(&reg, engine), ENGINE_USAGE_MAX);

        let result = reg.create_compartment(&mem, d, engine);
        assert_eq!(result, Err(RegistryError::CapacityExceeded { engine_id: engine }));
        assert_eq!(reg.compartments().len(), usize::from(ENGINE_USAGE_MAX));
    }

    #[test]
    fn test_duplicate_ids_first_match_wins() {
        let config = RegistryConfig::default();
        let mut reg = Registry::with_ids(&config, Box::new(FixedIds::new(vec![7])));
        let mut mem = SimUserMemory::new();
        let n = name(&mut mem, "Twin");
        let d = desc(&mut mem, "seat");

        // Engine 7, then compartments 7 in slots 0 and 1
        let engine = reg.create_engine(&mem, n).unwrap();
        assert_eq!(engine, 7);
        let c0 = reg.create_compartment(&mem, d, 7).unwrap();
        let c1 = reg.create_compartment(&mem, d, 7).unwrap();
        assert_eq!((c0, c1), (7, 7));
        assert_eq!(usage(&reg, 7), 2);

        // Deletes always hit the lowest slot first
        reg.delete_compartment(7).unwrap();
        assert!(reg.compartments().get(0).is_none());
        assert!(reg.compartments().get(1).is_some());
    }

    #[test]
    fn test_ids_not_reused_while_live() {
        let mut reg = registry(HandlePolicy::Aliasing);
        let mut mem = SimUserMemory::new();
        let n = name(&mut mem, "Union");
        let d = desc(&mut mem, "pullman");

        let mut seen = std::collections::HashSet::new();
        for _ in 0..32 {
            let engine = reg.create_engine(&mem, n).unwrap();
            let compartment = reg.create_compartment(&mem, d, engine).unwrap();
            assert!(seen.insert(engine));
            assert!(seen.insert(compartment));
        }
    }

    // -------------------------------------------------------------------------
    // Step interleavings
    // -------------------------------------------------------------------------

    /// Compartment creation stalls between lookup and install while another
    /// caller creates an engine: the sweep frees the target, the new engine
    /// lands in its slot, and the compartment is bound to it.
    fn stalled_link(reg: &mut Registry, mem: &mut SimUserMemory) -> (RecordId, RegistryResult<RecordId>) {
        let n = name(mem, "Victim");
        let d = desc(mem, "stalled");

        let target_id = reg.create_engine(&*mem, n).unwrap();
        let target = reg.locate_link_target(target_id).unwrap();
        let slot = reg.reserve_compartment_slot().unwrap();

        let newcomer = reg.create_engine(&*mem, n).unwrap();
        assert!(reg.engine_by_id(target_id).is_none());
        assert_eq!(reg.engines().find_by_id(newcomer), Some(target.index));

        (newcomer, reg.install_compartment(slot, target, &*mem, d))
    }

    #[test]
    fn test_stale_handle_aliases_reused_slot() {
        let mut reg = registry(HandlePolicy::Aliasing);
        let mut mem = SimUserMemory::new();

        let (newcomer, result) = stalled_link(&mut reg, &mut mem);
        let compartment = result.unwrap();

        // The compartment now reads and writes the newcomer's log
        assert_eq!(reg.engine_of(compartment).unwrap().id, newcomer);
        let src = mem.map(&[0xEE; ENGINE_LOG_BYTES]);
        reg.update_log(&mem, compartment, src).unwrap();
        assert!(reg.engine_by_id(newcomer).unwrap().logs.iter().all(|&b| b == 0xEE));
        assert_eq!(usage(&reg, newcomer), 1);
    }

    #[test]
    fn test_stale_handle_rejected_when_checked() {
        let mut reg = registry(HandlePolicy::Checked);
        let mut mem = SimUserMemory::new();

        let (newcomer, result) = stalled_link(&mut reg, &mut mem);

        assert!(matches!(result, Err(RegistryError::StaleEngine { .. })));
        assert!(reg.compartments().is_empty());
        assert_eq!(usage(&reg, newcomer), 0);
    }

    #[test]
    fn test_double_unlink_wraps_usage() {
        let mut reg = registry(HandlePolicy::Aliasing);
        let mut mem = SimUserMemory::new();
        let n = name(&mut mem, "Wrap");
        let d = desc(&mut mem, "twice");
        let engine = reg.create_engine(&mem, n).unwrap();
        let compartment = reg.create_compartment(&mem, d, engine).unwrap();

        // Two callers both looked the compartment up before either unlinked
        let (index, handle) = reg.locate_compartment(compartment).unwrap();
        let (again, _) = reg.locate_compartment(compartment).unwrap();
        reg.unlink_compartment(index, handle);
        reg.unlink_compartment(again, handle);

        assert_eq!(usage(&reg, engine), u8::MAX);
        assert!(reg.compartments().is_empty());
        // With usage at 255 the engine now outlives any sweep
        reg.create_engine(&mem, n).unwrap();
        assert!(reg.engine_by_id(engine).is_some());
    }

    /// Two compartments share an engine; one is unlinked twice, so the next
    /// create sweeps the engine while its sibling is still live. Returns the
    /// newcomer's id and the sibling's.
    fn sibling_left_dangling(reg: &mut Registry, mem: &mut SimUserMemory) -> (RecordId, RecordId) {
        let n = name(mem, "Doomed");
        let d = desc(mem, "sibling");
        let engine = reg.create_engine(&*mem, n).unwrap();
        let x = reg.create_compartment(&*mem, d, engine).unwrap();
        let y = reg.create_compartment(&*mem, d, engine).unwrap();
        assert_eq!(usage(reg, engine), 2);

        let old_log = mem.map(&[0xAA; ENGINE_LOG_BYTES]);
        reg.update_log(&*mem, y, old_log).unwrap();

        let (index, handle) = reg.locate_compartment(x).unwrap();
        let (again, _) = reg.locate_compartment(x).unwrap();
        reg.unlink_compartment(index, handle);
        reg.unlink_compartment(again, handle);
        assert_eq!(usage(reg, engine), 0);

        let newcomer = reg.create_engine(&*mem, n).unwrap();
        assert!(reg.engine_by_id(engine).is_none());
        assert!(reg.compartment_by_id(y).is_some());
        (newcomer, y)
    }

    #[test]
    fn test_swept_sibling_aliases_newcomer() {
        let mut reg = registry(HandlePolicy::Aliasing);
        let mut mem = SimUserMemory::new();
        let (newcomer, y) = sibling_left_dangling(&mut reg, &mut mem);

        // The sibling now reads the newcomer's fresh log, not the old one
        let out = mem.map_zeroed(ENGINE_LOG_BYTES);
        reg.show_log(&mut mem, y, out).unwrap();
        assert!(mem.peek(out, ENGINE_LOG_BYTES).unwrap().iter().all(|&b| b == 0));

        // Deleting it decrements the newcomer, which was never linked
        reg.delete_compartment(y).unwrap();
        assert!(reg.compartments().is_empty());
        assert_eq!(usage(&reg, newcomer), u8::MAX);
    }

    #[test]
    fn test_swept_sibling_stale_when_checked() {
        let mut reg = registry(HandlePolicy::Checked);
        let mut mem = SimUserMemory::new();
        let (newcomer, y) = sibling_left_dangling(&mut reg, &mut mem);

        let out = mem.map_zeroed(ENGINE_LOG_BYTES);
        assert!(matches!(
            reg.show_log(&mut mem, y, out),
            Err(RegistryError::StaleEngine { .. })
        ));

        // Delete still removes the compartment; the decrement is dropped
        reg.delete_compartment(y).unwrap();
        assert!(reg.compartments().is_empty());
        assert_eq!(usage(&reg, newcomer), 0);
    }

    #[test]
    #[should_panic(expected = "invalid registry config")]
    fn test_zero_capacity_config_rejected() {
        let _ = Registry::new(&RegistryConfig::with_seed(1).capacities(0, 4));
    }
}
