//! Position operations: open, adjust, close and surplus claims.
//!
//! Every entrypoint validates against a read-only view first. State is only written once
//! all checks passed, so a rejected call leaves the engine exactly as it was.

use super::core::{Change, Engine};
use super::results::{AdjustResult, CloseResult, EngineError, OpenResult};
use crate::custody::CollateralVault;
use crate::events::{
    BaseRateUpdatedEvent, EventPayload, PositionAdjustedEvent, PositionClosedEvent, PositionOpenedEvent,
    SurplusClaimedEvent,
};
use crate::fees::{borrowing_fee, fee_fraction};
use crate::math::{self, compute_cr, compute_nominal_cr};
use crate::position::{LedgerError, PositionStatus};
use crate::sorted::{NominalRatio, SortedListError};
use crate::types::{Amount, Holder, OwnerId, Price, DECIMAL_PRECISION};

/// Neighbours the caller expects around the new slot. `upper` has the higher ratio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hints {
    pub upper: Option<OwnerId>,
    pub lower: Option<OwnerId>,
}

impl Hints {
    pub fn new(upper: Option<OwnerId>, lower: Option<OwnerId>) -> Self {
        Self { upper, lower }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionAdjustment {
    pub coll_deposit: Amount,
    pub coll_withdrawal: Amount,
    pub debt_change: Amount,
    pub debt_increase: bool,
    /// Only read for debt increases.
    pub max_fee_percentage: Amount,
    pub hints: Hints,
}

impl PositionAdjustment {
    pub fn add_coll(amount: Amount) -> Self {
        Self {
            coll_deposit: amount,
            ..Self::default()
        }
    }

    pub fn withdraw_coll(amount: Amount) -> Self {
        Self {
            coll_withdrawal: amount,
            ..Self::default()
        }
    }

    pub fn withdraw_debt(amount: Amount, max_fee_percentage: Amount) -> Self {
        Self {
            debt_change: amount,
            debt_increase: true,
            max_fee_percentage,
            ..Self::default()
        }
    }

    pub fn repay_debt(amount: Amount) -> Self {
        Self {
            debt_change: amount,
            ..Self::default()
        }
    }

    pub fn with_hints(mut self, hints: Hints) -> Self {
        self.hints = hints;
        self
    }
}

// where deposited collateral comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CollSource {
    Owner,
    StabilityPoolGain,
}

/** 8.3: a validated adjustment, ready to commit */
#[derive(Debug, Clone, Copy)]
pub(super) struct AdjustmentPlan {
    owner: OwnerId,
    coll_change: Option<Change>,
    // fee included for increases
    debt_change: Option<Change>,
    // what the owner receives or pays in debt tokens
    owner_debt_change: Amount,
    borrowing_fee: Amount,
    new_base_rate: Option<Amount>,
    hints: Hints,
}

impl Engine {
    // 8.3.1: open
    pub fn open_position(
        &mut self,
        owner: OwnerId,
        coll: Amount,
        debt_amount: Amount,
        max_fee_percentage: Amount,
        hints: Hints,
    ) -> Result<OpenResult, EngineError> {
        let price = self.fetch_price()?;
        let recovery_mode = self.check_recovery_mode(price)?;
        self.require_valid_max_fee(max_fee_percentage, recovery_mode)?;

        if self.ledger.is_active(owner) {
            return Err(LedgerError::PositionAlreadyActive(owner).into());
        }
        if self.sorted.is_full() {
            return Err(SortedListError::ListFull(self.sorted.max_size()).into());
        }

        let (fee, new_base_rate) = if recovery_mode {
            (0, None)
        } else {
            let (fee, rate) = self.borrowing_fee_for(debt_amount, max_fee_percentage)?;
            (fee, Some(rate))
        };

        let net_debt = math::checked_add(debt_amount, fee, "net debt")?;
        if net_debt < self.params.min_net_debt {
            return Err(EngineError::NetDebtBelowMinimum {
                net_debt,
                minimum: self.params.min_net_debt,
            });
        }
        let composite_debt = math::checked_add(net_debt, self.params.gas_compensation, "composite debt")?;

        let icr = compute_cr(coll, composite_debt, price)?;
        let nicr = compute_nominal_cr(coll, composite_debt)?;
        if recovery_mode {
            self.require_icr_above_ccr(icr)?;
        } else {
            self.require_icr_above_mcr(icr)?;
            let new_tcr = self.new_tcr(Change::Increase(coll), Change::Increase(composite_debt), price)?;
            self.require_tcr_above_ccr(new_tcr)?;
        }

        let stake = self.ledger.open(owner, coll, composite_debt)?;
        self.sorted.insert(&self.ledger, owner, nicr, hints.upper, hints.lower)?;

        self.custody.deposit_to_active(coll)?;
        self.custody.active.increase_debt(composite_debt)?;
        self.token.mint(Holder::User(owner), debt_amount)?;
        if fee > 0 {
            self.token.mint(Holder::Treasury, fee)?;
        }
        self.token.mint(Holder::GasPool, self.params.gas_compensation)?;

        if let Some(rate) = new_base_rate {
            self.commit_base_rate(rate);
        }

        tracing::debug!(%owner, coll, debt = composite_debt, fee, "position opened");
        self.emit_event(EventPayload::PositionOpened(PositionOpenedEvent {
            owner,
            coll,
            debt: composite_debt,
            stake,
            borrowing_fee: fee,
        }));

        Ok(OpenResult {
            owner,
            coll,
            debt: composite_debt,
            borrowing_fee: fee,
            stake,
            icr,
            nicr,
        })
    }

    pub fn add_collateral(&mut self, owner: OwnerId, amount: Amount, hints: Hints) -> Result<AdjustResult, EngineError> {
        self.adjust_position(owner, PositionAdjustment::add_coll(amount).with_hints(hints))
    }

    pub fn withdraw_collateral(
        &mut self,
        owner: OwnerId,
        amount: Amount,
        hints: Hints,
    ) -> Result<AdjustResult, EngineError> {
        self.adjust_position(owner, PositionAdjustment::withdraw_coll(amount).with_hints(hints))
    }

    pub fn withdraw_debt(
        &mut self,
        owner: OwnerId,
        amount: Amount,
        max_fee_percentage: Amount,
        hints: Hints,
    ) -> Result<AdjustResult, EngineError> {
        self.adjust_position(
            owner,
            PositionAdjustment::withdraw_debt(amount, max_fee_percentage).with_hints(hints),
        )
    }

    pub fn repay_debt(&mut self, owner: OwnerId, amount: Amount, hints: Hints) -> Result<AdjustResult, EngineError> {
        self.adjust_position(owner, PositionAdjustment::repay_debt(amount).with_hints(hints))
    }

    // 8.3.2: adjust
    pub fn adjust_position(
        &mut self,
        owner: OwnerId,
        adjustment: PositionAdjustment,
    ) -> Result<AdjustResult, EngineError> {
        let price = self.fetch_price()?;
        let plan = self.plan_adjustment(owner, &adjustment, price)?;
        self.commit_adjustment(plan, CollSource::Owner, price)
    }

    pub(super) fn plan_adjustment(
        &self,
        owner: OwnerId,
        adjustment: &PositionAdjustment,
        price: Price,
    ) -> Result<AdjustmentPlan, EngineError> {
        let recovery_mode = self.check_recovery_mode(price)?;

        if adjustment.debt_increase {
            self.require_valid_max_fee(adjustment.max_fee_percentage, recovery_mode)?;
            if adjustment.debt_change == 0 {
                return Err(EngineError::ZeroDebtChange);
            }
        }
        if adjustment.coll_deposit > 0 && adjustment.coll_withdrawal > 0 {
            return Err(EngineError::BothCollDepositAndWithdrawal);
        }
        if adjustment.coll_deposit == 0 && adjustment.coll_withdrawal == 0 && adjustment.debt_change == 0 {
            return Err(EngineError::ZeroAdjustment);
        }

        let entire = self.ledger.entire_debt_and_coll(owner)?;

        let coll_change = if adjustment.coll_deposit > 0 {
            Some(Change::Increase(adjustment.coll_deposit))
        } else if adjustment.coll_withdrawal > 0 {
            if adjustment.coll_withdrawal > entire.coll {
                return Err(LedgerError::InsufficientCollateral {
                    owner,
                    available: entire.coll,
                    requested: adjustment.coll_withdrawal,
                }
                .into());
            }
            Some(Change::Decrease(adjustment.coll_withdrawal))
        } else {
            None
        };

        let (fee, new_base_rate) = if adjustment.debt_increase && !recovery_mode {
            let (fee, rate) = self.borrowing_fee_for(adjustment.debt_change, adjustment.max_fee_percentage)?;
            (fee, Some(rate))
        } else {
            (0, None)
        };

        let debt_change = if adjustment.debt_change == 0 {
            None
        } else if adjustment.debt_increase {
            Some(Change::Increase(math::checked_add(adjustment.debt_change, fee, "debt change")?))
        } else {
            let repayable = entire.debt.saturating_sub(self.params.gas_compensation);
            if adjustment.debt_change > repayable {
                return Err(EngineError::RepaymentExceedsDebt {
                    requested: adjustment.debt_change,
                    repayable,
                });
            }
            Some(Change::Decrease(adjustment.debt_change))
        };

        let no_change = Change::Increase(0);
        let new_coll = coll_change.unwrap_or(no_change).apply(entire.coll, "new coll")?;
        let new_debt = debt_change.unwrap_or(no_change).apply(entire.debt, "new debt")?;
        let old_icr = compute_cr(entire.coll, entire.debt, price)?;
        let new_icr = compute_cr(new_coll, new_debt, price)?;

        if recovery_mode {
            if adjustment.coll_withdrawal > 0 {
                return Err(EngineError::CollWithdrawalInRecoveryMode);
            }
            if adjustment.debt_increase {
                self.require_icr_above_ccr(new_icr)?;
                if new_icr < old_icr {
                    return Err(EngineError::IcrDecreasedInRecoveryMode {
                        old: old_icr,
                        new: new_icr,
                    });
                }
                let old_tcr = self.tcr(price)?;
                let new_tcr = self.new_tcr(coll_change.unwrap_or(no_change), debt_change.unwrap_or(no_change), price)?;
                if new_tcr < old_tcr {
                    return Err(EngineError::TcrDecreasedInRecoveryMode {
                        old: old_tcr,
                        new: new_tcr,
                    });
                }
            }
        } else {
            self.require_icr_above_mcr(new_icr)?;
            let new_tcr = self.new_tcr(coll_change.unwrap_or(no_change), debt_change.unwrap_or(no_change), price)?;
            self.require_tcr_above_ccr(new_tcr)?;
        }

        if let Some(Change::Decrease(repay)) = debt_change {
            let net_debt = self.params.net_debt(entire.debt) - repay;
            if net_debt < self.params.min_net_debt {
                return Err(EngineError::NetDebtBelowMinimum {
                    net_debt,
                    minimum: self.params.min_net_debt,
                });
            }
            self.token.require_balance(Holder::User(owner), repay)?;
        }

        Ok(AdjustmentPlan {
            owner,
            coll_change,
            debt_change,
            owner_debt_change: adjustment.debt_change,
            borrowing_fee: fee,
            new_base_rate,
            hints: adjustment.hints,
        })
    }

    pub(super) fn commit_adjustment(
        &mut self,
        plan: AdjustmentPlan,
        source: CollSource,
        price: Price,
    ) -> Result<AdjustResult, EngineError> {
        let owner = plan.owner;
        self.ledger.apply_pending_rewards(owner, &mut self.custody)?;

        match plan.coll_change {
            Some(Change::Increase(amount)) => {
                self.ledger.increase_coll(owner, amount)?;
                match source {
                    CollSource::Owner => self.custody.deposit_to_active(amount)?,
                    CollSource::StabilityPoolGain => self.custody.active.receive_collateral(amount)?,
                }
            }
            Some(Change::Decrease(amount)) => {
                self.ledger.decrease_coll(owner, amount)?;
                self.custody.pay_from_active(Holder::User(owner), amount)?;
            }
            None => {}
        }

        match plan.debt_change {
            Some(Change::Increase(amount)) => {
                self.ledger.increase_debt(owner, amount)?;
                self.custody.active.increase_debt(amount)?;
                self.token.mint(Holder::User(owner), plan.owner_debt_change)?;
                if plan.borrowing_fee > 0 {
                    self.token.mint(Holder::Treasury, plan.borrowing_fee)?;
                }
            }
            Some(Change::Decrease(amount)) => {
                self.ledger.decrease_debt(owner, amount)?;
                self.custody.active.decrease_debt(amount)?;
                self.token.burn(Holder::User(owner), amount)?;
            }
            None => {}
        }

        let stake = self.ledger.update_stake_and_total_stakes(owner)?;
        let nicr = self.ledger.nominal_icr(owner)?;
        self.sorted
            .reinsert(&self.ledger, owner, nicr, plan.hints.upper, plan.hints.lower)?;

        if let Some(rate) = plan.new_base_rate {
            self.commit_base_rate(rate);
        }

        let entire = self.ledger.entire_debt_and_coll(owner)?;
        self.emit_event(EventPayload::PositionAdjusted(PositionAdjustedEvent {
            owner,
            coll: entire.coll,
            debt: entire.debt,
            stake,
            borrowing_fee: plan.borrowing_fee,
        }));

        Ok(AdjustResult {
            owner,
            coll: entire.coll,
            debt: entire.debt,
            stake,
            borrowing_fee: plan.borrowing_fee,
            icr: compute_cr(entire.coll, entire.debt, price)?,
        })
    }

    // 8.3.3: close. the owner repays everything but the gas reserve, which the gas pool burns.
    pub fn close_position(&mut self, owner: OwnerId) -> Result<CloseResult, EngineError> {
        let price = self.fetch_price()?;
        let entire = self.ledger.entire_debt_and_coll(owner)?;
        let is_last = self.ledger.owners_count() == 1;

        if !is_last {
            if self.check_recovery_mode(price)? {
                return Err(EngineError::NotPermittedInRecoveryMode);
            }
            let new_tcr = self.new_tcr(Change::Decrease(entire.coll), Change::Decrease(entire.debt), price)?;
            self.require_tcr_above_ccr(new_tcr)?;
        }

        let gas = self.params.gas_compensation.min(entire.debt);
        let repay = entire.debt - gas;
        self.token.require_balance(Holder::User(owner), repay)?;
        self.token.require_balance(Holder::GasPool, gas)?;

        self.ledger.apply_pending_rewards(owner, &mut self.custody)?;
        self.sorted.remove(owner)?;
        self.ledger.close(owner, PositionStatus::ClosedByOwner)?;

        self.token.burn(Holder::User(owner), repay)?;
        self.token.burn(Holder::GasPool, gas)?;
        self.custody.active.decrease_debt(entire.debt)?;
        self.custody.pay_from_active(Holder::User(owner), entire.coll)?;

        tracing::debug!(%owner, coll = entire.coll, debt = entire.debt, "position closed");
        self.emit_event(EventPayload::PositionClosed(PositionClosedEvent {
            owner,
            status: PositionStatus::ClosedByOwner,
            coll_returned: entire.coll,
            debt_repaid: repay,
        }));

        Ok(CloseResult {
            owner,
            coll_returned: entire.coll,
            debt_repaid: repay,
        })
    }

    // 8.3.4: collateral left over from a capped liquidation or a redemption that closed the position
    pub fn claim_collateral(&mut self, owner: OwnerId) -> Result<Amount, EngineError> {
        let coll = self.custody.claim_surplus(owner)?;
        self.emit_event(EventPayload::SurplusClaimed(SurplusClaimedEvent { owner, coll }));
        Ok(coll)
    }

    // 8.3.5: shared checks
    pub(super) fn require_valid_max_fee(&self, max_fee: Amount, recovery_mode: bool) -> Result<(), EngineError> {
        let floor = if recovery_mode { 0 } else { self.params.borrowing_fee_floor };
        if max_fee < floor || max_fee > DECIMAL_PRECISION {
            return Err(EngineError::InvalidMaxFeePercentage { max_fee });
        }
        Ok(())
    }

    // fee on `amount` at the decayed base rate, checked against the caller's limit
    fn borrowing_fee_for(&self, amount: Amount, max_fee: Amount) -> Result<(Amount, Amount), EngineError> {
        let base_rate = self.fees.decayed_base_rate(&self.params, self.current_time)?;
        let fee = borrowing_fee(&self.params, base_rate, amount)?;
        if amount > 0 {
            let fraction = fee_fraction(fee, amount)?;
            if fraction > max_fee {
                return Err(EngineError::FeeExceedsMaximum {
                    fee_fraction: fraction,
                    max_fee,
                });
            }
        }
        Ok((fee, base_rate))
    }

    pub(super) fn commit_base_rate(&mut self, base_rate: Amount) {
        self.fees.set_base_rate(base_rate, self.current_time);
        self.emit_event(EventPayload::BaseRateUpdated(BaseRateUpdatedEvent { base_rate }));
    }

    fn require_icr_above_mcr(&self, icr: Amount) -> Result<(), EngineError> {
        if icr < self.params.mcr {
            return Err(EngineError::IcrBelowMcr {
                icr,
                mcr: self.params.mcr,
            });
        }
        Ok(())
    }

    fn require_icr_above_ccr(&self, icr: Amount) -> Result<(), EngineError> {
        if icr < self.params.ccr {
            return Err(EngineError::IcrBelowCcr {
                icr,
                ccr: self.params.ccr,
            });
        }
        Ok(())
    }

    fn require_tcr_above_ccr(&self, tcr: Amount) -> Result<(), EngineError> {
        if tcr < self.params.ccr {
            return Err(EngineError::TcrBelowCcr {
                tcr,
                ccr: self.params.ccr,
            });
        }
        Ok(())
    }
}
