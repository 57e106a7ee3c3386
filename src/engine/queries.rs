// 8.6 engine/queries.rs: read-only views for callers, hint helpers and the simulator.

use serde::{Deserialize, Serialize};

use super::config::EngineConfig;
use super::core::Engine;
use super::results::EngineError;
use crate::config::ProtocolParams;
use crate::custody::{CollateralVault, Custody};
use crate::fees::{self, FeeState};
use crate::hints::{approx_hint, redemption_hints, ApproxHint, RedemptionHints};
use crate::position::{EntireDebtAndColl, Position, PositionLedger};
use crate::sorted::{InsertPosition, NominalRatio, SortedPositions};
use crate::stability_pool::StabilityPool;
use crate::token::DebtToken;
use crate::types::{Amount, Holder, OwnerId, Price};

/// System-wide numbers at one price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSummary {
    pub price: Price,
    pub total_coll: Amount,
    pub total_debt: Amount,
    pub tcr: Amount,
    pub recovery_mode: bool,
    pub positions: usize,
    pub stability_deposits: Amount,
    pub stability_coll: Amount,
    pub unclaimed_surplus: Amount,
    pub base_rate: Amount,
}

impl Engine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn sorted_positions(&self) -> &SortedPositions {
        &self.sorted
    }

    pub fn stability_pool(&self) -> &StabilityPool {
        &self.pool
    }

    pub fn custody(&self) -> &Custody {
        &self.custody
    }

    pub fn token(&self) -> &DebtToken {
        &self.token
    }

    pub fn fee_state(&self) -> &FeeState {
        &self.fees
    }

    pub fn position(&self, owner: OwnerId) -> Option<&Position> {
        self.ledger.position(owner)
    }

    pub fn entire_debt_and_coll(&self, owner: OwnerId) -> Result<EntireDebtAndColl, EngineError> {
        Ok(self.ledger.entire_debt_and_coll(owner)?)
    }

    pub fn current_icr(&self, owner: OwnerId, price: Price) -> Result<Amount, EngineError> {
        Ok(self.ledger.current_icr(owner, price)?)
    }

    pub fn nominal_icr(&self, owner: OwnerId) -> Result<Amount, EngineError> {
        Ok(self.ledger.nominal_icr(owner)?)
    }

    pub fn debt_balance(&self, holder: Holder) -> Amount {
        self.token.balance_of(holder)
    }

    pub fn collateral_balance(&self, holder: Holder) -> Amount {
        self.custody.wallets().balance_of(holder)
    }

    // 8.6.1: fee rates as they would apply right now
    pub fn decayed_base_rate(&self) -> Result<Amount, EngineError> {
        Ok(self.fees.decayed_base_rate(&self.params, self.current_time)?)
    }

    pub fn borrowing_rate(&self) -> Result<Amount, EngineError> {
        Ok(fees::borrowing_rate(&self.params, self.decayed_base_rate()?))
    }

    pub fn redemption_rate(&self) -> Result<Amount, EngineError> {
        Ok(fees::redemption_rate(&self.params, self.decayed_base_rate()?))
    }

    pub fn borrowing_fee(&self, debt: Amount) -> Result<Amount, EngineError> {
        Ok(fees::borrowing_fee(&self.params, self.decayed_base_rate()?, debt)?)
    }

    // 8.6.2: hints
    pub fn get_approx_hint(&self, target_nicr: Amount, num_trials: usize, seed: u64) -> Result<ApproxHint, EngineError> {
        Ok(approx_hint(&self.ledger, &self.sorted, target_nicr, num_trials, seed)?)
    }

    pub fn get_redemption_hints(
        &self,
        amount: Amount,
        price: Price,
        max_iterations: usize,
    ) -> Result<RedemptionHints, EngineError> {
        Ok(redemption_hints(
            &self.ledger,
            &self.sorted,
            &self.params,
            amount,
            price,
            max_iterations,
        )?)
    }

    pub fn find_insert_position(
        &self,
        nicr: Amount,
        prev_hint: Option<OwnerId>,
        next_hint: Option<OwnerId>,
    ) -> Result<InsertPosition, EngineError> {
        Ok(self.sorted.find_insert_position(&self.ledger, nicr, prev_hint, next_hint)?)
    }

    pub fn summary(&self, price: Price) -> Result<SystemSummary, EngineError> {
        Ok(SystemSummary {
            price,
            total_coll: self.entire_system_coll(),
            total_debt: self.entire_system_debt(),
            tcr: self.tcr(price)?,
            recovery_mode: self.check_recovery_mode(price)?,
            positions: self.ledger.owners_count(),
            stability_deposits: self.pool.total_deposits(),
            stability_coll: self.pool.collateral_balance(),
            unclaimed_surplus: self.custody.surplus().collateral(),
            base_rate: self.fees.base_rate(),
        })
    }
}
