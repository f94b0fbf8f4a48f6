//! FEFO allocation planner
//!
//! Eligible stock: `InStock`, matching vaccine, not tombstoned, expiry date
//! after today, bound to a `Normal` channel holding stock. Eligible rows are
//! ordered by `(expiry_date, id)` and taken greedily; a row holding `n` units
//! can supply up to `n` plan entries.
//!
//! Planning is read-only. Races with concurrent orders are resolved at
//! dispatch time by re-validation under the machine lock.

use chrono::NaiveDate;
use shared::models::{Channel, InventoryUnit};
use std::collections::{HashMap, HashSet};

use crate::common::{EngineError, EngineResult};
use crate::storage::RackStorage;

/// One unit to dispense
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub inventory_id: u64,
    pub channel_id: u64,
    pub expiry_date: NaiveDate,
}

/// Ordered allocation, earliest-expiring first
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationPlan {
    pub vaccine_id: u64,
    pub entries: Vec<PlanEntry>,
}

impl AllocationPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Units of a plan that must not be handed out again as substitutes
#[derive(Debug, Default, Clone)]
pub struct Reservations {
    /// Plan entries still pending per inventory row
    pub pending: HashMap<u64, u32>,
    /// Rows that failed re-validation in this order
    pub excluded: HashSet<u64>,
}

impl Reservations {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a PlanEntry>) -> Self {
        let mut pending = HashMap::new();
        for entry in entries {
            *pending.entry(entry.inventory_id).or_insert(0) += 1;
        }
        Self {
            pending,
            excluded: HashSet::new(),
        }
    }

    /// One pending entry of this row has been consumed (dispatched or dropped)
    pub fn consume(&mut self, inventory_id: u64) {
        if let Some(count) = self.pending.get_mut(&inventory_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pending.remove(&inventory_id);
            }
        }
    }
}

/// Eligibility rule shared by planning and dispatch-time re-validation
pub fn is_eligible(unit: &InventoryUnit, channel: Option<&Channel>, today: NaiveDate) -> bool {
    unit.is_in_stock()
        && !unit.is_expired(today)
        && channel.is_some_and(|c| {
            Some(c.id) == unit.channel_id
                && c.is_dispensable()
                && c.vaccine_id == Some(unit.vaccine_id)
        })
}

/// Eligible rows sorted FEFO
fn eligible_sorted<'a>(
    units: &'a [InventoryUnit],
    channels: &HashMap<u64, &Channel>,
    today: NaiveDate,
) -> Vec<&'a InventoryUnit> {
    let mut eligible: Vec<&InventoryUnit> = units
        .iter()
        .filter(|u| {
            let channel = u.channel_id.and_then(|id| channels.get(&id).copied());
            is_eligible(u, channel, today)
        })
        .collect();
    eligible.sort_by_key(|u| (u.expiry_date, u.id));
    eligible
}

/// Pure FEFO selection over a snapshot
pub fn select_fefo(
    units: &[InventoryUnit],
    channels: &[Channel],
    quantity: u32,
    today: NaiveDate,
) -> EngineResult<Vec<PlanEntry>> {
    let by_id: HashMap<u64, &Channel> = channels.iter().map(|c| (c.id, c)).collect();
    let eligible = eligible_sorted(units, &by_id, today);

    let available: u32 = eligible
        .iter()
        .map(|u| {
            // a row can never supply more than its channel holds
            let channel_qty = u
                .channel_id
                .and_then(|id| by_id.get(&id))
                .map_or(0, |c| c.quantity);
            u.quantity.min(channel_qty)
        })
        .sum();
    if available < quantity {
        return Err(EngineError::InsufficientStock {
            requested: quantity,
            available,
        });
    }

    let mut entries = Vec::with_capacity(quantity as usize);
    for unit in eligible {
        let Some(channel_id) = unit.channel_id else {
            continue;
        };
        let remaining = quantity - entries.len() as u32;
        if remaining == 0 {
            break;
        }
        for _ in 0..unit.quantity.min(remaining) {
            entries.push(PlanEntry {
                inventory_id: unit.id,
                channel_id,
                expiry_date: unit.expiry_date,
            });
        }
    }
    Ok(entries)
}

/// Allocation planner
#[derive(Clone)]
pub struct AllocationPlanner {
    storage: RackStorage,
}

impl AllocationPlanner {
    pub fn new(storage: RackStorage) -> Self {
        Self { storage }
    }

    /// Plan `quantity` units of a vaccine from a consistent snapshot
    pub fn plan(
        &self,
        vaccine_id: u64,
        quantity: u32,
        today: NaiveDate,
    ) -> EngineResult<AllocationPlan> {
        if quantity == 0 {
            return Err(EngineError::validation("quantity must be positive"));
        }
        let (units, channels) = self.storage.planning_snapshot(vaccine_id)?;
        let entries = select_fefo(&units, &channels, quantity, today)?;
        tracing::debug!(vaccine_id, quantity, rows = entries.len(), "Allocation planned");
        Ok(AllocationPlan {
            vaccine_id,
            entries,
        })
    }

    /// Next FEFO unit not reserved by the rest of the plan nor excluded
    pub fn plan_substitute(
        &self,
        vaccine_id: u64,
        reservations: &Reservations,
        today: NaiveDate,
    ) -> EngineResult<Option<PlanEntry>> {
        let (units, channels) = self.storage.planning_snapshot(vaccine_id)?;
        let by_id: HashMap<u64, &Channel> = channels.iter().map(|c| (c.id, c)).collect();

        Ok(eligible_sorted(&units, &by_id, today)
            .into_iter()
            .filter(|u| !reservations.excluded.contains(&u.id))
            .find(|u| u.quantity > reservations.pending.get(&u.id).copied().unwrap_or(0))
            .and_then(|u| {
                u.channel_id.map(|channel_id| PlanEntry {
                    inventory_id: u.id,
                    channel_id,
                    expiry_date: u.expiry_date,
                })
            }))
    }
}
