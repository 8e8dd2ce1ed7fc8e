//! Race Harness
//!
//! TigerStyle: make the unsynchronized design's failure modes reproducible.
//!
//! Each round builds a fresh device, sets up one engine, then lets several
//! callers hit it at once through the control interface. Every caller has its
//! own memory. Callers run as futures on one task, so an interleaving depends
//! only on the concurrency mode and the seed.

use futures::future::join_all;
use serde::Serialize;

use crate::config::RegistryConfig;
use crate::constants::{COMPARTMENT_DESC_BYTES, CONTROL_FAILURE, ENGINE_NAME_BYTES};
use crate::device::{call, Command, ControlDevice, Request};
use crate::slot::RecordId;
use crate::user::SimUserMemory;

/// Maximum callers per round
pub const RACE_CONTENDERS_COUNT_MAX: usize = 64;

/// Race shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceKind {
    /// Every caller deletes the same compartment
    DoubleDelete,
    /// One caller links to a fresh engine while the others create engines
    SweepOutrunsLink,
}

/// Result of one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RaceRound {
    /// Round number
    pub round: usize,
    /// Race shape
    pub kind: RaceKind,
    /// Control results, one per caller
    pub results: Vec<i64>,
    /// Number of divergences the audit found afterwards
    pub divergences: usize,
}

/// Summary over all rounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RaceReport {
    /// Every round, in order
    pub rounds: Vec<RaceRound>,
    /// Rounds whose audit was not clean
    pub diverged: usize,
}

/// Run `rounds` rounds of each race shape with `contenders` callers.
///
/// Round `n` seeds its registry with `seed + n` when a seed is configured.
///
/// # Panics
/// Panics if contenders is not in `2..=RACE_CONTENDERS_COUNT_MAX`.
pub async fn run(config: &RegistryConfig, rounds: usize, contenders: usize) -> RaceReport {
    assert!(
        (2..=RACE_CONTENDERS_COUNT_MAX).contains(&contenders),
        "contenders {} not in 2..={}",
        contenders,
        RACE_CONTENDERS_COUNT_MAX
    );

    let mut report = RaceReport {
        rounds: Vec::with_capacity(rounds * 2),
        diverged: 0,
    };

    for round in 0..rounds {
        let mut round_config = config.clone();
        round_config.seed = config.seed.map(|s| s.wrapping_add(round as u64));

        for kind in [RaceKind::DoubleDelete, RaceKind::SweepOutrunsLink] {
            let device = ControlDevice::register(&round_config);
            let results = match kind {
                RaceKind::DoubleDelete => double_delete(&device, contenders).await,
                RaceKind::SweepOutrunsLink => sweep_outruns_link(&device, contenders).await,
            };
            let divergences = device.registry().audit().await.len();
            if divergences > 0 {
                report.diverged += 1;
            }
            tracing::debug!(round = round, ?kind, divergences = divergences, "Race round");
            report.rounds.push(RaceRound {
                round,
                kind,
                results,
                divergences,
            });
        }
    }

    tracing::info!(
        rounds = report.rounds.len(),
        diverged = report.diverged,
        concurrency = config.concurrency.as_str(),
        "Race harness finished"
    );
    report
}

/// Set up one engine with one compartment; return both ids.
async fn linked_pair(device: &ControlDevice, mem: &mut SimUserMemory) -> Option<(RecordId, RecordId)> {
    let name = mem.map_fixed(b"Contested", ENGINE_NAME_BYTES);
    let desc = mem.map_fixed(b"contested", COMPARTMENT_DESC_BYTES);

    let engine = call(device, mem, Command::CreateEngine, Request { name, ..Request::default() }).await;
    if engine == CONTROL_FAILURE {
        return None;
    }
    let request = Request {
        id: engine as RecordId,
        desc,
        ..Request::default()
    };
    let compartment = call(device, mem, Command::CreateCompartment, request).await;
    (compartment != CONTROL_FAILURE).then_some((engine as RecordId, compartment as RecordId))
}

async fn double_delete(device: &ControlDevice, contenders: usize) -> Vec<i64> {
    let mut setup = SimUserMemory::new();
    let Some((_, compartment)) = linked_pair(device, &mut setup).await else {
        return Vec::new();
    };

    let mut mems: Vec<SimUserMemory> = (0..contenders).map(|_| SimUserMemory::new()).collect();
    let request = Request {
        id: compartment,
        ..Request::default()
    };
    join_all(
        mems.iter_mut()
            .map(|mem| call(device, mem, Command::DeleteCompartment, request)),
    )
    .await
}

async fn sweep_outruns_link(device: &ControlDevice, contenders: usize) -> Vec<i64> {
    let mut setup = SimUserMemory::new();
    let name = setup.map_fixed(b"Fresh", ENGINE_NAME_BYTES);
    let engine = call(device, &mut setup, Command::CreateEngine, Request { name, ..Request::default() }).await;
    if engine == CONTROL_FAILURE {
        return Vec::new();
    }

    let mut mems: Vec<SimUserMemory> = (0..contenders).map(|_| SimUserMemory::new()).collect();
    let calls = mems.iter_mut().enumerate().map(|(i, mem)| {
        let (command, request) = if i == 0 {
            let desc = mem.map_fixed(b"stalled", COMPARTMENT_DESC_BYTES);
            let request = Request {
                id: engine as RecordId,
                desc,
                ..Request::default()
            };
            (Command::CreateCompartment, request)
        } else {
            let name = mem.map_fixed(b"Newcomer", ENGINE_NAME_BYTES);
            (Command::CreateEngine, Request { name, ..Request::default() })
        };
        call(device, mem, command, request)
    });
    join_all(calls).await
}
