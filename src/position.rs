// 3.0: position ledger. one record per owner, status machine, stakes, redistribution snapshots.
// 3.1 pending rewards: stake * (L - snapshot). applied lazily the next time a position is touched.
// 3.2 redistribution writes L_coll / L_debt with error feedback so rounding dust is never lost.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::custody::{Custody, CustodyError};
use crate::math::{self, compute_cr, compute_nominal_cr, div_rem_wide, mul_div, widen, MathError};
use crate::sorted::NominalRatio;
use crate::types::{Amount, OwnerId, Price, DECIMAL_PRECISION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PositionStatus {
    #[default]
    NonExistent,
    Active,
    ClosedByOwner,
    ClosedByLiquidation,
    ClosedByRedemption,
}

impl PositionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, PositionStatus::Active)
    }

    pub fn is_closed(&self) -> bool {
        match self {
            PositionStatus::ClosedByOwner
            | PositionStatus::ClosedByLiquidation
            | PositionStatus::ClosedByRedemption => true,
            PositionStatus::NonExistent | PositionStatus::Active => false,
        }
    }
}

// L_coll / L_debt as seen at the last touch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSnapshot {
    pub coll: Amount,
    pub debt: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub owner: OwnerId,
    pub status: PositionStatus,
    pub coll: Amount,
    pub debt: Amount,
    pub stake: Amount,
    pub snapshot: RewardSnapshot,
    pub array_index: usize,
}

impl Position {
    fn empty(owner: OwnerId) -> Self {
        Self {
            owner,
            status: PositionStatus::NonExistent,
            coll: 0,
            debt: 0,
            stake: 0,
            snapshot: RewardSnapshot::default(),
            array_index: 0,
        }
    }
}

/// Recorded amounts plus pending rewards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntireDebtAndColl {
    pub debt: Amount,
    pub coll: Amount,
    pub pending_debt: Amount,
    pub pending_coll: Amount,
}

/// New accumulator values for a redistribution, computed before anything is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedistributionPlan {
    pub coll: Amount,
    pub debt: Amount,
    pub l_coll: Amount,
    pub l_debt: Amount,
    pub coll_error: Amount,
    pub debt_error: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("{0} does not exist or is closed")]
    PositionNotActive(OwnerId),

    #[error("{0} already has an active position")]
    PositionAlreadyActive(OwnerId),

    #[error("only one position in the system")]
    OnlyOnePositionInSystem,

    #[error("{status:?} is not a closing status")]
    InvalidCloseStatus { status: PositionStatus },

    #[error("{owner} has {available} collateral, {requested} requested")]
    InsufficientCollateral {
        owner: OwnerId,
        available: Amount,
        requested: Amount,
    },

    #[error("{owner} has {available} debt, {requested} requested")]
    InsufficientDebt {
        owner: OwnerId,
        available: Amount,
        requested: Amount,
    },

    #[error("no stakes to redistribute over")]
    NoStakes,

    #[error("math error: {0}")]
    Math(#[from] MathError),

    #[error("custody error: {0}")]
    Custody(#[from] CustodyError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionLedger {
    positions: HashMap<OwnerId, Position>,
    owners: Vec<OwnerId>,
    total_stakes: Amount,
    total_stakes_snapshot: Amount,
    total_collateral_snapshot: Amount,
    l_coll: Amount,
    l_debt: Amount,
    last_coll_error: Amount,
    last_debt_error: Amount,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, owner: OwnerId) -> Option<&Position> {
        self.positions.get(&owner)
    }

    pub fn status(&self, owner: OwnerId) -> PositionStatus {
        self.positions
            .get(&owner)
            .map(|p| p.status)
            .unwrap_or(PositionStatus::NonExistent)
    }

    pub fn is_active(&self, owner: OwnerId) -> bool {
        self.status(owner).is_active()
    }

    pub fn owners(&self) -> &[OwnerId] {
        &self.owners
    }

    pub fn owner_at(&self, index: usize) -> Option<OwnerId> {
        self.owners.get(index).copied()
    }

    pub fn owners_count(&self) -> usize {
        self.owners.len()
    }

    pub fn total_stakes(&self) -> Amount {
        self.total_stakes
    }

    pub fn total_stakes_snapshot(&self) -> Amount {
        self.total_stakes_snapshot
    }

    pub fn total_collateral_snapshot(&self) -> Amount {
        self.total_collateral_snapshot
    }

    pub fn l_coll(&self) -> Amount {
        self.l_coll
    }

    pub fn l_debt(&self) -> Amount {
        self.l_debt
    }

    pub fn redistribution_errors(&self) -> (Amount, Amount) {
        (self.last_coll_error, self.last_debt_error)
    }

    fn active(&self, owner: OwnerId) -> Result<&Position, LedgerError> {
        match self.positions.get(&owner) {
            Some(p) if p.status.is_active() => Ok(p),
            _ => Err(LedgerError::PositionNotActive(owner)),
        }
    }

    fn active_mut(&mut self, owner: OwnerId) -> Result<&mut Position, LedgerError> {
        match self.positions.get_mut(&owner) {
            Some(p) if p.status.is_active() => Ok(p),
            _ => Err(LedgerError::PositionNotActive(owner)),
        }
    }

    // 3.0.1: create or reopen. snapshots are current, so nothing is pending. returns the stake.
    pub(crate) fn open(&mut self, owner: OwnerId, coll: Amount, debt: Amount) -> Result<Amount, LedgerError> {
        if self.is_active(owner) {
            return Err(LedgerError::PositionAlreadyActive(owner));
        }
        let stake = self.compute_new_stake(coll)?;
        let total_stakes = math::checked_add(self.total_stakes, stake, "total stakes")?;

        let array_index = self.owners.len();
        let position = self.positions.entry(owner).or_insert_with(|| Position::empty(owner));
        position.status = PositionStatus::Active;
        position.coll = coll;
        position.debt = debt;
        position.stake = stake;
        position.array_index = array_index;

        self.owners.push(owner);
        self.total_stakes = total_stakes;
        // earlier redistributions are not owed to a fresh position
        self.update_reward_snapshots(owner)?;
        Ok(stake)
    }

    pub(crate) fn increase_coll(&mut self, owner: OwnerId, amount: Amount) -> Result<Amount, LedgerError> {
        let position = self.active_mut(owner)?;
        position.coll = math::checked_add(position.coll, amount, "position collateral")?;
        Ok(position.coll)
    }

    pub(crate) fn decrease_coll(&mut self, owner: OwnerId, amount: Amount) -> Result<Amount, LedgerError> {
        let position = self.active_mut(owner)?;
        if position.coll < amount {
            return Err(LedgerError::InsufficientCollateral {
                owner,
                available: position.coll,
                requested: amount,
            });
        }
        position.coll -= amount;
        Ok(position.coll)
    }

    pub(crate) fn increase_debt(&mut self, owner: OwnerId, amount: Amount) -> Result<Amount, LedgerError> {
        let position = self.active_mut(owner)?;
        position.debt = math::checked_add(position.debt, amount, "position debt")?;
        Ok(position.debt)
    }

    pub(crate) fn decrease_debt(&mut self, owner: OwnerId, amount: Amount) -> Result<Amount, LedgerError> {
        let position = self.active_mut(owner)?;
        if position.debt < amount {
            return Err(LedgerError::InsufficientDebt {
                owner,
                available: position.debt,
                requested: amount,
            });
        }
        position.debt -= amount;
        Ok(position.debt)
    }

    // 3.1: pending rewards
    pub fn has_pending_rewards(&self, owner: OwnerId) -> bool {
        match self.positions.get(&owner) {
            Some(p) if p.status.is_active() => p.snapshot.coll < self.l_coll,
            _ => false,
        }
    }

    pub fn pending_coll_reward(&self, owner: OwnerId) -> Result<Amount, LedgerError> {
        let position = self.active(owner)?;
        let delta = self.l_coll.saturating_sub(position.snapshot.coll);
        if delta == 0 {
            return Ok(0);
        }
        Ok(mul_div(position.stake, delta, DECIMAL_PRECISION)?)
    }

    pub fn pending_debt_reward(&self, owner: OwnerId) -> Result<Amount, LedgerError> {
        let position = self.active(owner)?;
        let delta = self.l_debt.saturating_sub(position.snapshot.debt);
        if delta == 0 {
            return Ok(0);
        }
        Ok(mul_div(position.stake, delta, DECIMAL_PRECISION)?)
    }

    pub fn entire_debt_and_coll(&self, owner: OwnerId) -> Result<EntireDebtAndColl, LedgerError> {
        let position = self.active(owner)?;
        let pending_coll = self.pending_coll_reward(owner)?;
        let pending_debt = self.pending_debt_reward(owner)?;
        Ok(EntireDebtAndColl {
            debt: math::checked_add(position.debt, pending_debt, "entire debt")?,
            coll: math::checked_add(position.coll, pending_coll, "entire coll")?,
            pending_debt,
            pending_coll,
        })
    }

    pub fn current_icr(&self, owner: OwnerId, price: Price) -> Result<Amount, LedgerError> {
        let entire = self.entire_debt_and_coll(owner)?;
        Ok(compute_cr(entire.coll, entire.debt, price)?)
    }

    // moves pending amounts out of the default pool first, the record changes only once that worked
    pub(crate) fn apply_pending_rewards(
        &mut self,
        owner: OwnerId,
        custody: &mut Custody,
    ) -> Result<(Amount, Amount), LedgerError> {
        if !self.has_pending_rewards(owner) {
            self.active(owner)?;
            return Ok((0, 0));
        }
        let pending_coll = self.pending_coll_reward(owner)?;
        let pending_debt = self.pending_debt_reward(owner)?;

        let position = self.active(owner)?;
        let new_coll = math::checked_add(position.coll, pending_coll, "apply rewards")?;
        let new_debt = math::checked_add(position.debt, pending_debt, "apply rewards")?;

        custody.move_pending_to_active(pending_coll, pending_debt)?;

        let position = self.active_mut(owner)?;
        position.coll = new_coll;
        position.debt = new_debt;
        self.update_reward_snapshots(owner)?;
        Ok((pending_coll, pending_debt))
    }

    pub(crate) fn update_reward_snapshots(&mut self, owner: OwnerId) -> Result<(), LedgerError> {
        let snapshot = RewardSnapshot {
            coll: self.l_coll,
            debt: self.l_debt,
        };
        self.active_mut(owner)?.snapshot = snapshot;
        Ok(())
    }

    // stakes are scaled by the last post-redistribution baseline
    pub fn compute_new_stake(&self, coll: Amount) -> Result<Amount, LedgerError> {
        if self.total_collateral_snapshot == 0 {
            return Ok(coll);
        }
        Ok(mul_div(coll, self.total_stakes_snapshot, self.total_collateral_snapshot)?)
    }

    pub(crate) fn update_stake_and_total_stakes(&mut self, owner: OwnerId) -> Result<Amount, LedgerError> {
        let position = self.active(owner)?;
        let new_stake = self.compute_new_stake(position.coll)?;
        let old_stake = position.stake;
        let total = math::checked_add(
            math::checked_sub(self.total_stakes, old_stake, "total stakes")?,
            new_stake,
            "total stakes",
        )?;

        self.active_mut(owner)?.stake = new_stake;
        self.total_stakes = total;
        Ok(new_stake)
    }

    pub(crate) fn remove_stake(&mut self, owner: OwnerId) -> Result<(), LedgerError> {
        let stake = self.active(owner)?.stake;
        let total = math::checked_sub(self.total_stakes, stake, "total stakes")?;
        self.active_mut(owner)?.stake = 0;
        self.total_stakes = total;
        Ok(())
    }

    // 3.0.2: status transition and O(1) removal from the owners array.
    // closing the only remaining position is refused unless the owner closes it.
    pub(crate) fn close(&mut self, owner: OwnerId, status: PositionStatus) -> Result<(), LedgerError> {
        if !status.is_closed() {
            return Err(LedgerError::InvalidCloseStatus { status });
        }
        let index = self.active(owner)?.array_index;
        if status != PositionStatus::ClosedByOwner && self.owners.len() <= 1 {
            return Err(LedgerError::OnlyOnePositionInSystem);
        }
        self.remove_stake(owner)?;

        self.owners.swap_remove(index);
        if let Some(moved) = self.owners.get(index).copied() {
            if let Some(p) = self.positions.get_mut(&moved) {
                p.array_index = index;
            }
        }

        if let Some(position) = self.positions.get_mut(&owner) {
            position.status = status;
            position.coll = 0;
            position.debt = 0;
            position.snapshot = RewardSnapshot::default();
            position.array_index = 0;
        }
        Ok(())
    }

    // 3.2: plan a redistribution over every stake except `excluded_stake`
    pub fn compute_redistribution(
        &self,
        coll: Amount,
        debt: Amount,
        excluded_stake: Amount,
    ) -> Result<RedistributionPlan, LedgerError> {
        let mut plan = RedistributionPlan {
            coll,
            debt,
            l_coll: self.l_coll,
            l_debt: self.l_debt,
            coll_error: self.last_coll_error,
            debt_error: self.last_debt_error,
        };
        if coll == 0 && debt == 0 {
            return Ok(plan);
        }

        let stakes = math::checked_sub(self.total_stakes, excluded_stake, "redistribution stakes")?;
        if stakes == 0 {
            return Err(LedgerError::NoStakes);
        }

        let coll_numerator = widen(coll) * widen(DECIMAL_PRECISION) + widen(self.last_coll_error);
        let debt_numerator = widen(debt) * widen(DECIMAL_PRECISION) + widen(self.last_debt_error);
        let (coll_per_stake, coll_error) = div_rem_wide(&coll_numerator, stakes, "redistribute coll")?;
        let (debt_per_stake, debt_error) = div_rem_wide(&debt_numerator, stakes, "redistribute debt")?;

        plan.l_coll = math::checked_add(self.l_coll, coll_per_stake, "L_coll")?;
        plan.l_debt = math::checked_add(self.l_debt, debt_per_stake, "L_debt")?;
        plan.coll_error = coll_error;
        plan.debt_error = debt_error;
        Ok(plan)
    }

    pub(crate) fn apply_redistribution(&mut self, plan: &RedistributionPlan) {
        self.l_coll = plan.l_coll;
        self.l_debt = plan.l_debt;
        self.last_coll_error = plan.coll_error;
        self.last_debt_error = plan.debt_error;
    }

    // new baselines for stakes after a liquidation. total_coll excludes gas compensation.
    pub(crate) fn update_system_snapshots(&mut self, total_coll: Amount) {
        self.total_stakes_snapshot = self.total_stakes;
        self.total_collateral_snapshot = total_coll;
    }
}

impl NominalRatio for PositionLedger {
    // includes pending rewards so the sorted index sees what a touch would produce
    fn nominal_icr(&self, owner: OwnerId) -> Result<Amount, MathError> {
        let Some(position) = self.positions.get(&owner).filter(|p| p.status.is_active()) else {
            return Ok(0);
        };
        let coll_delta = self.l_coll.saturating_sub(position.snapshot.coll);
        let debt_delta = self.l_debt.saturating_sub(position.snapshot.debt);
        let coll = math::checked_add(
            position.coll,
            mul_div(position.stake, coll_delta, DECIMAL_PRECISION)?,
            "nominal icr",
        )?;
        let debt = math::checked_add(
            position.debt,
            mul_div(position.stake, debt_delta, DECIMAL_PRECISION)?,
            "nominal icr",
        )?;
        compute_nominal_cr(coll, debt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::CollateralVault;
    use crate::types::units;

    fn ledger_with(positions: &[(u64, u64, u64)]) -> PositionLedger {
        let mut ledger = PositionLedger::new();
        for (id, coll, debt) in positions {
            ledger.open(OwnerId(*id), units(*coll), units(*debt)).unwrap();
        }
        ledger
    }

    // mirror what the engine does after a liquidation, without custody
    fn redistribute(ledger: &mut PositionLedger, coll: Amount, debt: Amount, remaining_coll: Amount) {
        let plan = ledger.compute_redistribution(coll, debt, 0).unwrap();
        ledger.apply_redistribution(&plan);
        ledger.update_system_snapshots(remaining_coll);
    }

    #[test]
    fn open_sets_stake_and_owner_index() {
        let ledger = ledger_with(&[(1, 10, 1000), (2, 20, 1000)]);
        assert_eq!(ledger.total_stakes(), units(30));
        assert_eq!(ledger.position(OwnerId(2)).unwrap().array_index, 1);
        assert_eq!(ledger.owners_count(), 2);
        assert!(!ledger.has_pending_rewards(OwnerId(1)));
    }

    #[test]
    fn reopen_existing_active_fails() {
        let mut ledger = ledger_with(&[(1, 10, 1000)]);
        assert_eq!(
            ledger.open(OwnerId(1), units(1), units(1)),
            Err(LedgerError::PositionAlreadyActive(OwnerId(1)))
        );
    }

    #[test]
    fn closed_position_rejects_mutation() {
        let mut ledger = ledger_with(&[(1, 10, 1000), (2, 10, 1000)]);
        ledger.close(OwnerId(1), PositionStatus::ClosedByLiquidation).unwrap();
        assert_eq!(
            ledger.increase_coll(OwnerId(1), 1),
            Err(LedgerError::PositionNotActive(OwnerId(1)))
        );
        assert_eq!(
            ledger.decrease_debt(OwnerId(9), 1),
            Err(LedgerError::PositionNotActive(OwnerId(9)))
        );
        assert_eq!(ledger.status(OwnerId(1)), PositionStatus::ClosedByLiquidation);
    }

    #[test]
    fn redistribution_splits_by_stake() {
        let mut ledger = ledger_with(&[(1, 10, 1000), (2, 30, 1000)]);
        redistribute(&mut ledger, units(4), units(800), units(44));

        assert!(ledger.has_pending_rewards(OwnerId(1)));
        assert_eq!(ledger.pending_coll_reward(OwnerId(1)).unwrap(), units(1));
        assert_eq!(ledger.pending_coll_reward(OwnerId(2)).unwrap(), units(3));
        assert_eq!(ledger.pending_debt_reward(OwnerId(1)).unwrap(), units(200));
        assert_eq!(ledger.pending_debt_reward(OwnerId(2)).unwrap(), units(600));

        let entire = ledger.entire_debt_and_coll(OwnerId(2)).unwrap();
        assert_eq!(entire.coll, units(33));
        assert_eq!(entire.debt, units(1600));
    }

    #[test]
    fn rounding_error_is_carried_forward() {
        let mut ledger = ledger_with(&[(1, 1, 100), (2, 1, 100), (3, 1, 100)]);
        // 1 wei over 3e18 stake units leaves a remainder
        redistribute(&mut ledger, 1, 0, units(3));
        let (coll_error, _) = ledger.redistribution_errors();
        assert_eq!(coll_error, DECIMAL_PRECISION % units(3));
        assert_eq!(ledger.l_coll(), DECIMAL_PRECISION / units(3));

        redistribute(&mut ledger, 2, 0, units(3));
        // the carried remainder makes this one a whole wei per stake unit
        assert_eq!(ledger.l_coll(), 3 * DECIMAL_PRECISION / units(3));
        assert_eq!(ledger.redistribution_errors().0, 0);
    }

    #[test]
    fn stake_uses_snapshot_ratio_after_redistribution() {
        let mut ledger = ledger_with(&[(1, 10, 1000), (2, 10, 1000)]);
        // 5 coll redistributed: 20 stakes now back 25 coll
        redistribute(&mut ledger, units(5), units(500), units(25));
        assert_eq!(ledger.compute_new_stake(units(25)).unwrap(), units(20));

        ledger.open(OwnerId(3), units(5), units(100)).unwrap();
        assert_eq!(ledger.position(OwnerId(3)).unwrap().stake, units(4));
        assert_eq!(ledger.total_stakes(), units(24));
    }

    #[test]
    fn position_opened_after_redistribution_owes_nothing() {
        let mut ledger = ledger_with(&[(1, 10, 1000), (2, 10, 1000)]);
        redistribute(&mut ledger, units(2), units(100), units(20));
        assert!(ledger.has_pending_rewards(OwnerId(1)));

        ledger.open(OwnerId(3), units(10), units(1000)).unwrap();
        assert!(!ledger.has_pending_rewards(OwnerId(3)));
        let snapshot = ledger.position(OwnerId(3)).unwrap().snapshot;
        assert_eq!((snapshot.coll, snapshot.debt), (ledger.l_coll(), ledger.l_debt()));
    }

    #[test]
    fn apply_pending_rewards_is_idempotent() {
        let mut ledger = ledger_with(&[(1, 10, 1000), (2, 10, 1000)]);
        let mut custody = Custody::new();
        custody.deposit_to_active(units(20)).unwrap();
        custody.active.increase_debt(units(2000)).unwrap();
        custody.move_to_default(units(2), units(100)).unwrap();
        redistribute(&mut ledger, units(2), units(100), units(20));

        let applied = ledger.apply_pending_rewards(OwnerId(1), &mut custody).unwrap();
        assert_eq!(applied, (units(1), units(50)));
        assert_eq!(ledger.position(OwnerId(1)).unwrap().coll, units(11));
        assert_eq!(custody.default_pool().collateral(), units(1));

        let again = ledger.apply_pending_rewards(OwnerId(1), &mut custody).unwrap();
        assert_eq!(again, (0, 0));
        assert_eq!(ledger.position(OwnerId(1)).unwrap().coll, units(11));
    }

    #[test]
    fn close_swaps_last_owner_into_gap() {
        let mut ledger = ledger_with(&[(1, 10, 1000), (2, 10, 1000), (3, 10, 1000)]);
        ledger.close(OwnerId(1), PositionStatus::ClosedByOwner).unwrap();

        assert_eq!(ledger.owners(), &[OwnerId(3), OwnerId(2)]);
        assert_eq!(ledger.position(OwnerId(3)).unwrap().array_index, 0);
        assert_eq!(ledger.total_stakes(), units(20));

        // reopen reuses the record
        ledger.open(OwnerId(1), units(4), units(100)).unwrap();
        assert_eq!(ledger.status(OwnerId(1)), PositionStatus::Active);
        assert_eq!(ledger.position(OwnerId(1)).unwrap().array_index, 2);
    }

    #[test]
    fn last_position_cannot_be_liquidated_or_redeemed_away() {
        let mut ledger = ledger_with(&[(1, 10, 1000)]);
        assert_eq!(
            ledger.close(OwnerId(1), PositionStatus::ClosedByRedemption),
            Err(LedgerError::OnlyOnePositionInSystem)
        );
        assert_eq!(
            ledger.close(OwnerId(1), PositionStatus::Active),
            Err(LedgerError::InvalidCloseStatus {
                status: PositionStatus::Active
            })
        );
        ledger.close(OwnerId(1), PositionStatus::ClosedByOwner).unwrap();
        assert_eq!(ledger.owners_count(), 0);
    }

    #[test]
    fn nominal_ratio_includes_pending() {
        let mut ledger = ledger_with(&[(1, 10, 1000), (2, 10, 1000)]);
        let before = ledger.nominal_icr(OwnerId(1)).unwrap();
        assert_eq!(before, compute_nominal_cr(units(10), units(1000)).unwrap());

        redistribute(&mut ledger, units(2), units(1000), units(22));
        let after = ledger.nominal_icr(OwnerId(1)).unwrap();
        assert_eq!(after, compute_nominal_cr(units(11), units(1500)).unwrap());
        assert_eq!(ledger.nominal_icr(OwnerId(5)).unwrap(), 0);
    }
}
