//! Storage seam for wheel changes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use gex_data::{ActivityRecord, WheelChange, WheelCycle, WheelLeg, WheelRepository};
use parking_lot::RwLock;
use uuid::Uuid;

/// Persists wheel changes. `apply` must write the whole change or nothing.
#[async_trait]
pub trait WheelStore: Send + Sync {
    async fn apply(&self, change: &WheelChange) -> Result<()>;

    async fn load_cycle(&self, id: Uuid) -> Result<Option<WheelCycle>>;

    /// Legs of a cycle in opening order.
    async fn legs(&self, cycle_id: Uuid) -> Result<Vec<WheelLeg>>;

    async fn activity(&self, cycle_id: Uuid) -> Result<Vec<ActivityRecord>>;

    async fn open_cycles(&self, symbol: Option<&str>) -> Result<Vec<WheelCycle>>;
}

#[async_trait]
impl WheelStore for WheelRepository {
    async fn apply(&self, change: &WheelChange) -> Result<()> {
        WheelRepository::apply(self, change).await
    }

    async fn load_cycle(&self, id: Uuid) -> Result<Option<WheelCycle>> {
        WheelRepository::load_cycle(self, id).await
    }

    async fn legs(&self, cycle_id: Uuid) -> Result<Vec<WheelLeg>> {
        WheelRepository::legs(self, cycle_id).await
    }

    async fn activity(&self, cycle_id: Uuid) -> Result<Vec<ActivityRecord>> {
        WheelRepository::activity(self, cycle_id).await
    }

    async fn open_cycles(&self, symbol: Option<&str>) -> Result<Vec<WheelCycle>> {
        WheelRepository::open_cycles(self, symbol).await
    }
}

#[derive(Debug, Default)]
struct Tables {
    cycles: HashMap<Uuid, WheelCycle>,
    legs: HashMap<Uuid, Vec<WheelLeg>>,
    activity: HashMap<Uuid, Vec<ActivityRecord>>,
}

/// Process-local store for tests and backtests.
#[derive(Debug, Default)]
pub struct InMemoryWheelStore {
    tables: RwLock<Tables>,
    fail_next: AtomicBool,
}

impl InMemoryWheelStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `apply` fail without writing anything.
    pub fn fail_next_apply(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn cycle_count(&self) -> usize {
        self.tables.read().cycles.len()
    }
}

#[async_trait]
impl WheelStore for InMemoryWheelStore {
    async fn apply(&self, change: &WheelChange) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            bail!("injected failure applying change to cycle {}", change.cycle.id);
        }

        let mut tables = self.tables.write();
        let cycle_id = change.cycle.id;
        check_writable(&tables, change)?;
        tables.cycles.insert(cycle_id, change.cycle.clone());

        let legs = tables.legs.entry(cycle_id).or_default();
        for leg in &change.legs {
            match legs.iter().position(|l| l.id == leg.id) {
                Some(idx) => legs[idx] = leg.clone(),
                None => legs.push(leg.clone()),
            }
        }

        tables
            .activity
            .entry(cycle_id)
            .or_default()
            .push(change.activity.clone());
        Ok(())
    }

    async fn load_cycle(&self, id: Uuid) -> Result<Option<WheelCycle>> {
        Ok(self.tables.read().cycles.get(&id).cloned())
    }

    async fn legs(&self, cycle_id: Uuid) -> Result<Vec<WheelLeg>> {
        Ok(self.tables.read().legs.get(&cycle_id).cloned().unwrap_or_default())
    }

    async fn activity(&self, cycle_id: Uuid) -> Result<Vec<ActivityRecord>> {
        Ok(self
            .tables
            .read()
            .activity
            .get(&cycle_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn open_cycles(&self, symbol: Option<&str>) -> Result<Vec<WheelCycle>> {
        let tables = self.tables.read();
        let mut cycles: Vec<_> = tables
            .cycles
            .values()
            .filter(|c| !c.is_terminal())
            .filter(|c| symbol.map_or(true, |s| c.symbol == s))
            .cloned()
            .collect();
        cycles.sort_by_key(|c| c.start_date);
        Ok(cycles)
    }
}

/// Same acceptance rules as the Postgres repository: the stored cycle must
/// be at the predecessor revision and closed legs cannot close again.
fn check_writable(tables: &Tables, change: &WheelChange) -> Result<()> {
    let cycle = &change.cycle;
    let stored = tables.cycles.get(&cycle.id).map(|c| c.revision);
    let expected = cycle.revision.checked_sub(1);
    if stored != expected {
        bail!(
            "wheel cycle {} is at revision {stored:?}, change expects {expected:?}",
            cycle.id
        );
    }

    let legs = tables.legs.get(&cycle.id).map(Vec::as_slice).unwrap_or_default();
    for leg in &change.legs {
        if legs.iter().any(|l| l.id == leg.id && !l.is_open()) {
            bail!("wheel leg {} is already closed", leg.id);
        }
    }
    Ok(())
}
