//! Liquidation detection and execution.
//!
//! Debt is offset against the stability pool first; whatever the pool cannot absorb is
//! redistributed over the remaining stakes. In recovery mode a position between MCR and TCR
//! can still be liquidated when the pool covers it, with collateral capped at MCR worth.

use super::core::Engine;
use super::results::{EngineError, LiquidationResult, LiquidationTotals};
use crate::custody::CollateralVault;
use crate::events::{EventPayload, LiquidationEvent, RedistributionEvent, StabilityOffsetEvent};
use crate::math::mul_div;
use crate::position::{EntireDebtAndColl, PositionStatus, RedistributionPlan};
use crate::stability_pool::OffsetPlan;
use crate::types::{Amount, Holder, OwnerId, Price};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LiquidationMode {
    // all collateral goes to gas compensation, the pool and redistribution
    Full,
    // recovery mode, MCR <= ICR < TCR: only debt * MCR / price worth of collateral is taken
    Capped,
}

/** 8.4: everything a liquidation writes, computed from a read-only view */
#[derive(Debug, Clone, Copy)]
struct LiquidationPlan {
    owner: OwnerId,
    entire: EntireDebtAndColl,
    coll_gas_compensation: Amount,
    debt_gas_compensation: Amount,
    coll_surplus: Amount,
    offset: OffsetPlan,
    redistribution: RedistributionPlan,
    recovery_mode: bool,
}

impl Engine {
    /// Liquidate one position. Fails with `NothingToLiquidate` when it is not eligible.
    pub fn liquidate(&mut self, liquidator: OwnerId, owner: OwnerId) -> Result<LiquidationResult, EngineError> {
        let price = self.fetch_price()?;
        let recovery_mode = self.check_recovery_mode(price)?;
        let mode = self
            .liquidation_mode(owner, price, recovery_mode)?
            .ok_or(EngineError::NothingToLiquidate)?;

        let plan = self.plan_liquidation(owner, mode, price, recovery_mode)?;
        self.commit_liquidation(Holder::User(liquidator), plan)
    }

    /// Liquidate up to `n` positions starting from the riskiest.
    pub fn liquidate_positions(&mut self, liquidator: OwnerId, n: usize) -> Result<LiquidationTotals, EngineError> {
        let price = self.fetch_price()?;
        let started_in_recovery = self.check_recovery_mode(price)?;
        let mut totals = LiquidationTotals::default();

        while totals.count() < n {
            let Some(owner) = self.sorted.last() else {
                break;
            };
            if self.ledger.owners_count() <= 1 {
                break;
            }
            let recovery_mode = self.check_recovery_mode(price)?;
            if started_in_recovery && !recovery_mode {
                break;
            }
            if self.ledger.current_icr(owner, price)? >= self.params.mcr {
                break;
            }
            if !self.liquidate_in_sequence(liquidator, owner, price, recovery_mode, &mut totals)? {
                break;
            }
        }

        if totals.count() == 0 {
            return Err(EngineError::NothingToLiquidate);
        }
        self.log_totals(&totals);
        Ok(totals)
    }

    /// Liquidate the given positions, skipping any that are not eligible.
    pub fn batch_liquidate(&mut self, liquidator: OwnerId, owners: &[OwnerId]) -> Result<LiquidationTotals, EngineError> {
        if owners.is_empty() {
            return Err(EngineError::EmptyLiquidationList);
        }
        let price = self.fetch_price()?;
        let started_in_recovery = self.check_recovery_mode(price)?;
        let mut totals = LiquidationTotals::default();

        for &owner in owners {
            if self.ledger.owners_count() <= 1 {
                break;
            }
            let recovery_mode = self.check_recovery_mode(price)?;
            if started_in_recovery && !recovery_mode {
                break;
            }
            if !self.ledger.is_active(owner) || self.ledger.current_icr(owner, price)? >= self.params.mcr {
                continue;
            }
            if !self.liquidate_in_sequence(liquidator, owner, price, recovery_mode, &mut totals)? {
                break;
            }
        }

        if totals.count() == 0 {
            return Err(EngineError::NothingToLiquidate);
        }
        self.log_totals(&totals);
        Ok(totals)
    }

    // earlier liquidations in a sequence are already committed. a later plan that fails ends
    // the sequence instead of failing the call.
    fn liquidate_in_sequence(
        &mut self,
        liquidator: OwnerId,
        owner: OwnerId,
        price: Price,
        recovery_mode: bool,
        totals: &mut LiquidationTotals,
    ) -> Result<bool, EngineError> {
        let plan = match self.plan_liquidation(owner, LiquidationMode::Full, price, recovery_mode) {
            Ok(plan) => plan,
            Err(err) if totals.count() > 0 => {
                tracing::warn!(%owner, error = %err, "liquidation sequence stopped early");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        totals.add(self.commit_liquidation(Holder::User(liquidator), plan)?);
        Ok(true)
    }

    fn liquidation_mode(
        &self,
        owner: OwnerId,
        price: Price,
        recovery_mode: bool,
    ) -> Result<Option<LiquidationMode>, EngineError> {
        if !self.ledger.is_active(owner) || self.ledger.owners_count() <= 1 {
            return Ok(None);
        }
        let icr = self.ledger.current_icr(owner, price)?;
        if icr < self.params.mcr {
            return Ok(Some(LiquidationMode::Full));
        }
        if recovery_mode {
            let debt = self.ledger.entire_debt_and_coll(owner)?.debt;
            if icr < self.tcr(price)? && debt <= self.pool.total_deposits() {
                return Ok(Some(LiquidationMode::Capped));
            }
        }
        Ok(None)
    }

    fn plan_liquidation(
        &self,
        owner: OwnerId,
        mode: LiquidationMode,
        price: Price,
        recovery_mode: bool,
    ) -> Result<LiquidationPlan, EngineError> {
        let entire = self.ledger.entire_debt_and_coll(owner)?;
        let stake = self.ledger.position(owner).map(|p| p.stake).unwrap_or(0);

        let (coll_liquidated, coll_surplus) = match mode {
            LiquidationMode::Full => (entire.coll, 0),
            LiquidationMode::Capped => {
                let cap = mul_div(entire.debt, self.params.mcr, price.value())?.min(entire.coll);
                (cap, entire.coll - cap)
            }
        };
        let coll_gas_compensation = self.params.coll_gas_compensation(coll_liquidated);
        let coll_net = coll_liquidated - coll_gas_compensation;

        let debt_offset = entire.debt.min(self.pool.total_deposits());
        let coll_to_pool = if debt_offset == 0 {
            0
        } else {
            mul_div(coll_net, debt_offset, entire.debt)?
        };
        let offset = self.pool.compute_offset(debt_offset, coll_to_pool)?;
        let redistribution =
            self.ledger
                .compute_redistribution(coll_net - coll_to_pool, entire.debt - debt_offset, stake)?;

        let debt_gas_compensation = self.params.gas_compensation.min(entire.debt);
        self.token.require_balance(Holder::GasPool, debt_gas_compensation)?;

        Ok(LiquidationPlan {
            owner,
            entire,
            coll_gas_compensation,
            debt_gas_compensation,
            coll_surplus,
            offset,
            redistribution,
            recovery_mode,
        })
    }

    fn commit_liquidation(&mut self, liquidator: Holder, plan: LiquidationPlan) -> Result<LiquidationResult, EngineError> {
        let owner = plan.owner;
        self.ledger.apply_pending_rewards(owner, &mut self.custody)?;
        self.sorted.remove(owner)?;
        self.ledger.close(owner, PositionStatus::ClosedByLiquidation)?;

        let offset = plan.offset;
        if offset.debt > 0 {
            self.pool.apply_offset(&offset);
            self.token.burn(Holder::StabilityPool, offset.debt)?;
            self.custody.active.decrease_debt(offset.debt)?;
            self.custody.active.send_collateral(offset.coll)?;
            self.emit_event(EventPayload::StabilityOffset(StabilityOffsetEvent {
                debt: offset.debt,
                coll: offset.coll,
                p: self.pool.p(),
                scale: self.pool.current_scale(),
                epoch: self.pool.current_epoch(),
            }));
        }

        let redistribution = plan.redistribution;
        if redistribution.coll > 0 || redistribution.debt > 0 {
            self.ledger.apply_redistribution(&redistribution);
            self.custody.move_to_default(redistribution.coll, redistribution.debt)?;
            self.emit_event(EventPayload::Redistribution(RedistributionEvent {
                coll: redistribution.coll,
                debt: redistribution.debt,
                l_coll: redistribution.l_coll,
                l_debt: redistribution.l_debt,
            }));
        }

        if plan.coll_surplus > 0 {
            self.custody.move_to_surplus(owner, plan.coll_surplus)?;
        }

        self.custody.pay_from_active(liquidator, plan.coll_gas_compensation)?;
        self.token
            .transfer(Holder::GasPool, liquidator, plan.debt_gas_compensation)?;

        self.ledger.update_system_snapshots(self.entire_system_coll());

        tracing::info!(
            %owner,
            coll = plan.entire.coll,
            debt = plan.entire.debt,
            offset = offset.debt,
            redistributed = redistribution.debt,
            recovery_mode = plan.recovery_mode,
            "position liquidated"
        );
        self.emit_event(EventPayload::Liquidation(LiquidationEvent {
            owner,
            liquidator,
            coll: plan.entire.coll,
            debt: plan.entire.debt,
            coll_gas_compensation: plan.coll_gas_compensation,
            debt_gas_compensation: plan.debt_gas_compensation,
            coll_surplus: plan.coll_surplus,
            recovery_mode: plan.recovery_mode,
        }));

        Ok(LiquidationResult {
            owner,
            coll: plan.entire.coll,
            debt: plan.entire.debt,
            coll_gas_compensation: plan.coll_gas_compensation,
            debt_gas_compensation: plan.debt_gas_compensation,
            debt_offset: offset.debt,
            coll_to_pool: offset.coll,
            debt_redistributed: redistribution.debt,
            coll_redistributed: redistribution.coll,
            coll_surplus: plan.coll_surplus,
            recovery_mode: plan.recovery_mode,
        })
    }

    fn log_totals(&self, totals: &LiquidationTotals) {
        tracing::info!(
            count = totals.count(),
            debt = totals.total_debt,
            offset = totals.total_debt_offset,
            redistributed = totals.total_debt_redistributed,
            "liquidation sequence finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;
    use crate::engine::{EngineConfig, Hints};
    use crate::math::abs_diff;
    use crate::types::{units, DECIMAL_PRECISION};

    const MAX_FEE: Amount = DECIMAL_PRECISION / 20;
    const KEEPER: OwnerId = OwnerId(99);

    fn engine() -> Engine {
        let mut engine = Engine::new(EngineConfig::with_protocol(ProtocolConfig::testnet())).unwrap();
        engine.set_price(Price::from_units(200)).unwrap();
        engine
    }

    fn open(engine: &mut Engine, owner: u64, coll: u64, debt: u64) {
        engine
            .open_position(OwnerId(owner), units(coll), units(debt), MAX_FEE, Hints::default())
            .unwrap();
    }

    #[test]
    fn test_healthy_and_last_positions_are_not_liquidated() {
        let mut engine = engine();
        open(&mut engine, 1, 40, 1800);
        engine.set_price(Price::from_units(50)).unwrap();
        // alone in the system
        assert_eq!(engine.liquidate(KEEPER, OwnerId(1)).unwrap_err(), EngineError::NothingToLiquidate);

        engine.set_price(Price::from_units(200)).unwrap();
        open(&mut engine, 2, 40, 1800);
        assert_eq!(engine.liquidate(KEEPER, OwnerId(2)).unwrap_err(), EngineError::NothingToLiquidate);
        assert_eq!(engine.liquidate(KEEPER, OwnerId(7)).unwrap_err(), EngineError::NothingToLiquidate);
    }

    #[test]
    fn test_redistribution_goes_to_remaining_stakes() {
        let mut engine = engine();
        let (a, b) = (OwnerId(1), OwnerId(2));
        open(&mut engine, 1, 40, 1800);
        open(&mut engine, 2, 21, 1800);

        engine.set_price(Price::from_units(100)).unwrap();
        let result = engine.liquidate(KEEPER, b).unwrap();

        assert_eq!(result.debt_offset, 0);
        assert_eq!(result.debt_redistributed, units(2000));
        assert_eq!(result.coll_gas_compensation, units(21) / 200);
        // 21 - 21/200
        assert_eq!(engine.ledger.pending_coll_reward(a).unwrap(), 20_895_000_000_000_000_000);
        assert_eq!(engine.ledger.pending_debt_reward(a).unwrap(), units(2000));
        assert_eq!(engine.ledger.status(b), PositionStatus::ClosedByLiquidation);

        assert_eq!(engine.custody.wallets().balance_of(Holder::User(KEEPER)), units(21) / 200);
        assert_eq!(engine.token.balance_of(Holder::User(KEEPER)), units(200));
        assert_eq!(engine.entire_system_debt(), units(4000));
        assert_eq!(engine.ledger.total_stakes(), units(40));
    }

    #[test]
    fn test_pool_absorbs_what_it_can() {
        let mut engine = engine();
        let (a, b) = (OwnerId(1), OwnerId(2));
        open(&mut engine, 1, 40, 1800);
        open(&mut engine, 2, 21, 1800);
        engine.provide_to_stability_pool(a, units(1800)).unwrap();

        engine.set_price(Price::from_units(100)).unwrap();
        let result = engine.liquidate(KEEPER, b).unwrap();

        assert_eq!(result.debt_offset, units(1800));
        assert_eq!(result.debt_redistributed, units(200));
        let coll_net = units(21) - units(21) / 200;
        let to_pool = coll_net * 9 / 10;
        assert_eq!(result.coll_to_pool, to_pool);
        assert_eq!(result.coll_redistributed, coll_net - to_pool);

        // the pool emptied, so a new epoch started
        assert_eq!(engine.pool.total_deposits(), 0);
        assert_eq!(engine.pool.current_epoch(), 1);
        assert_eq!(engine.pool.compounded_deposit(a).unwrap(), 0);
        assert!(abs_diff(engine.pool.collateral_gain(a).unwrap(), to_pool) < 1_000_000);
        assert_eq!(engine.token.balance_of(Holder::StabilityPool), 0);
    }

    #[test]
    fn test_capped_liquidation_in_recovery_mode() {
        let mut engine = engine();
        let (b, c) = (OwnerId(2), OwnerId(3));
        open(&mut engine, 1, 30, 1800);
        open(&mut engine, 2, 16, 1800);
        open(&mut engine, 3, 20, 2800);
        engine.provide_to_stability_pool(c, units(2500)).unwrap();

        // TCR 66 * 150 / 7000 ~ 141%, B sits at 120%
        let price = Price::from_units(150);
        engine.set_price(price).unwrap();
        assert!(engine.check_recovery_mode(price).unwrap());

        let result = engine.liquidate(KEEPER, b).unwrap();
        let cap = mul_div(units(2000), engine.params.mcr, price.value()).unwrap();
        assert!(result.recovery_mode);
        assert_eq!(result.debt_offset, units(2000));
        assert_eq!(result.debt_redistributed, 0);
        assert_eq!(result.coll_gas_compensation, cap / 200);
        assert_eq!(result.coll_surplus, units(16) - cap);

        assert_eq!(engine.custody.surplus().claimable(b), units(16) - cap);
        assert_eq!(engine.claim_collateral(b).unwrap(), units(16) - cap);
        assert!(engine.claim_collateral(b).is_err());
    }

    #[test]
    fn test_sequence_stops_at_healthy_positions() {
        let mut engine = engine();
        open(&mut engine, 1, 100, 1800);
        open(&mut engine, 2, 21, 1800);
        open(&mut engine, 3, 22, 1800);
        open(&mut engine, 4, 60, 1800);

        // 2 and 3 drop below MCR, 1 and 4 stay healthy
        engine.set_price(Price::from_units(100)).unwrap();
        let totals = engine.liquidate_positions(KEEPER, 10).unwrap();
        assert_eq!(totals.count(), 2);
        assert_eq!(totals.liquidated[0].owner, OwnerId(2));
        assert_eq!(totals.liquidated[0].debt, units(2000));
        // 3 had already picked up its stake share of 2's debt
        let share = mul_div(units(2000), units(22), units(182)).unwrap();
        assert!(abs_diff(totals.liquidated[1].debt, units(2000) + share) < 1_000_000_000);
        assert_eq!(totals.total_debt, totals.total_debt_redistributed);
        // redistribution moves debt around, it never removes it
        assert_eq!(engine.entire_system_debt(), units(8000));
        assert_eq!(engine.ledger.owners_count(), 2);

        assert_eq!(
            engine.liquidate_positions(KEEPER, 10).unwrap_err(),
            EngineError::NothingToLiquidate
        );
    }

    #[test]
    fn test_batch_skips_ineligible() {
        let mut engine = engine();
        open(&mut engine, 1, 100, 1800);
        open(&mut engine, 2, 21, 1800);
        open(&mut engine, 3, 60, 1800);

        assert_eq!(engine.batch_liquidate(KEEPER, &[]).unwrap_err(), EngineError::EmptyLiquidationList);

        engine.set_price(Price::from_units(100)).unwrap();
        let totals = engine
            .batch_liquidate(KEEPER, &[OwnerId(1), OwnerId(2), OwnerId(2), OwnerId(8)])
            .unwrap();
        assert_eq!(totals.count(), 1);
        assert_eq!(totals.liquidated[0].owner, OwnerId(2));
    }
}
