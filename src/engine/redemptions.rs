//! Redemptions: debt tokens swapped for collateral at face value, riskiest eligible positions first.
//!
//! The walk is planned against a read-only view. Nothing is written unless the whole plan,
//! fee limit included, passes.

use super::core::Engine;
use super::results::{EngineError, RedemptionResult};
use crate::events::{
    EventPayload, PartialRedemptionCancelledEvent, PositionAdjustedEvent, PositionClosedEvent, RedemptionEvent,
};
use crate::fees::{fee_fraction, redemption_fee};
use crate::hints::RedemptionHints;
use crate::math::{self, compute_nominal_cr, mul_div};
use crate::position::{LedgerError, PositionStatus};
use crate::types::{Amount, Holder, OwnerId, Price, DECIMAL_PRECISION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedemptionRequest {
    pub amount: Amount,
    pub first_hint: Option<OwnerId>,
    pub upper_partial_hint: Option<OwnerId>,
    pub lower_partial_hint: Option<OwnerId>,
    /// Expected ratio of the partially redeemed position. zero cancels any partial.
    pub partial_nicr: Amount,
    /// 0 means unbounded.
    pub max_iterations: usize,
    pub max_fee_percentage: Amount,
}

impl RedemptionRequest {
    pub fn new(amount: Amount, max_fee_percentage: Amount) -> Self {
        Self {
            amount,
            first_hint: None,
            upper_partial_hint: None,
            lower_partial_hint: None,
            partial_nicr: 0,
            max_iterations: 0,
            max_fee_percentage,
        }
    }

    pub fn with_hints(mut self, hints: &RedemptionHints) -> Self {
        self.first_hint = hints.first_hint;
        self.partial_nicr = hints.partial_nicr;
        self
    }

    pub fn with_partial_hints(mut self, upper: Option<OwnerId>, lower: Option<OwnerId>) -> Self {
        self.upper_partial_hint = upper;
        self.lower_partial_hint = lower;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum StepOutcome {
    // debt falls to the gas reserve. whatever collateral is left becomes a surplus claim.
    Close { surplus: Amount },
    Partial { new_nicr: Amount },
}

#[derive(Debug, Clone, Copy)]
struct RedemptionStep {
    owner: OwnerId,
    lot: Amount,
    coll_lot: Amount,
    outcome: StepOutcome,
}

#[derive(Debug, Clone, Copy)]
struct CancelledPartial {
    owner: OwnerId,
    fresh_nicr: Amount,
}

#[derive(Debug, Clone, Default)]
struct RedemptionPlan {
    steps: Vec<RedemptionStep>,
    cancelled: Option<CancelledPartial>,
    redeemed: Amount,
    coll_drawn: Amount,
}

impl Engine {
    pub fn redeem_collateral(
        &mut self,
        redeemer: OwnerId,
        request: RedemptionRequest,
    ) -> Result<RedemptionResult, EngineError> {
        let max_fee = request.max_fee_percentage;
        if max_fee < self.params.redemption_fee_floor || max_fee > DECIMAL_PRECISION {
            return Err(EngineError::InvalidMaxFeePercentage { max_fee });
        }
        if request.amount == 0 {
            return Err(EngineError::ZeroAmount);
        }

        let price = self.fetch_price()?;
        let tcr = self.tcr(price)?;
        if tcr < self.params.mcr {
            return Err(EngineError::TcrBelowMcr {
                tcr,
                mcr: self.params.mcr,
            });
        }
        self.token.require_balance(Holder::User(redeemer), request.amount)?;
        let total_supply = self.token.total_supply();

        let plan = self.plan_redemption(&request, price)?;
        if plan.coll_drawn == 0 {
            return Err(EngineError::UnableToRedeem);
        }

        let base_rate =
            self.fees
                .redemption_base_rate(&self.params, self.current_time, plan.coll_drawn, price, total_supply)?;
        let fee = redemption_fee(&self.params, base_rate, plan.coll_drawn)?;
        if fee >= plan.coll_drawn {
            return Err(EngineError::FeeEatsAllCollateral);
        }
        let fraction = fee_fraction(fee, plan.coll_drawn)?;
        if fraction > max_fee {
            return Err(EngineError::FeeExceedsMaximum {
                fee_fraction: fraction,
                max_fee,
            });
        }

        self.commit_redemption(redeemer, &request, &plan)?;
        self.commit_base_rate(base_rate);

        let coll_sent = plan.coll_drawn - fee;
        self.custody.pay_from_active(Holder::Treasury, fee)?;
        self.custody.pay_from_active(Holder::User(redeemer), coll_sent)?;
        self.token.burn(Holder::User(redeemer), plan.redeemed)?;
        self.custody.active.decrease_debt(plan.redeemed)?;

        if let Some(cancelled) = plan.cancelled {
            tracing::warn!(
                owner = %cancelled.owner,
                hint_nicr = request.partial_nicr,
                fresh_nicr = cancelled.fresh_nicr,
                "partial redemption cancelled"
            );
            self.emit_event(EventPayload::PartialRedemptionCancelled(PartialRedemptionCancelledEvent {
                owner: cancelled.owner,
                hint_nicr: request.partial_nicr,
                fresh_nicr: cancelled.fresh_nicr,
            }));
        }
        self.emit_event(EventPayload::Redemption(RedemptionEvent {
            redeemer,
            attempted: request.amount,
            redeemed: plan.redeemed,
            coll_sent,
            fee,
            price,
        }));

        let closed = plan
            .steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Close { .. }))
            .map(|s| s.owner)
            .collect();
        let partially_redeemed = plan
            .steps
            .iter()
            .find(|s| matches!(s.outcome, StepOutcome::Partial { .. }))
            .map(|s| s.owner);

        Ok(RedemptionResult {
            attempted: request.amount,
            redeemed: plan.redeemed,
            coll_drawn: plan.coll_drawn,
            fee,
            coll_sent,
            base_rate,
            closed,
            partially_redeemed,
            cancelled_partial: plan.cancelled.map(|c| c.owner),
        })
    }

    // in the list, at or above MCR, and the next riskier position is below MCR or absent
    fn is_valid_first_redemption_hint(&self, hint: Option<OwnerId>, price: Price) -> Result<bool, EngineError> {
        let Some(hint) = hint else {
            return Ok(false);
        };
        if !self.sorted.contains(hint) || self.ledger.current_icr(hint, price)? < self.params.mcr {
            return Ok(false);
        }
        match self.sorted.next(hint) {
            None => Ok(true),
            Some(next) => Ok(self.ledger.current_icr(next, price)? < self.params.mcr),
        }
    }

    fn plan_redemption(&self, request: &RedemptionRequest, price: Price) -> Result<RedemptionPlan, EngineError> {
        let gas = self.params.gas_compensation;
        let mut plan = RedemptionPlan::default();

        let mut current = if self.is_valid_first_redemption_hint(request.first_hint, price)? {
            request.first_hint
        } else {
            let mut candidate = self.sorted.last();
            while let Some(id) = candidate {
                if self.ledger.current_icr(id, price)? >= self.params.mcr {
                    break;
                }
                candidate = self.sorted.prev(id);
            }
            candidate
        };

        let mut remaining = request.amount;
        let mut iterations = if request.max_iterations == 0 {
            usize::MAX
        } else {
            request.max_iterations
        };
        let mut closing = 0usize;

        while let Some(owner) = current {
            if remaining == 0 || iterations == 0 {
                break;
            }
            iterations -= 1;
            let next = self.sorted.prev(owner);

            let entire = self.ledger.entire_debt_and_coll(owner)?;
            let lot = remaining.min(entire.debt.saturating_sub(gas));
            let coll_lot = mul_div(lot, DECIMAL_PRECISION, price.value())?;
            let new_debt = entire.debt - lot;
            let new_coll = math::checked_sub(entire.coll, coll_lot, "redeemed collateral")?;

            let outcome = if new_debt == gas {
                if self.ledger.owners_count() - closing <= 1 {
                    return Err(LedgerError::OnlyOnePositionInSystem.into());
                }
                closing += 1;
                StepOutcome::Close { surplus: new_coll }
            } else {
                let fresh_nicr = compute_nominal_cr(new_coll, new_debt)?;
                if request.partial_nicr < fresh_nicr || self.params.net_debt(new_debt) < self.params.min_net_debt {
                    plan.cancelled = Some(CancelledPartial { owner, fresh_nicr });
                    break;
                }
                StepOutcome::Partial { new_nicr: fresh_nicr }
            };

            plan.steps.push(RedemptionStep {
                owner,
                lot,
                coll_lot,
                outcome,
            });
            plan.redeemed += lot;
            plan.coll_drawn += coll_lot;
            remaining -= lot;
            current = next;
        }
        Ok(plan)
    }

    fn commit_redemption(
        &mut self,
        redeemer: OwnerId,
        request: &RedemptionRequest,
        plan: &RedemptionPlan,
    ) -> Result<(), EngineError> {
        let gas = self.params.gas_compensation;
        for step in &plan.steps {
            let owner = step.owner;
            self.ledger.apply_pending_rewards(owner, &mut self.custody)?;

            match step.outcome {
                StepOutcome::Close { surplus } => {
                    self.sorted.remove(owner)?;
                    self.ledger.close(owner, PositionStatus::ClosedByRedemption)?;
                    self.token.burn(Holder::GasPool, gas)?;
                    self.custody.active.decrease_debt(gas)?;
                    if surplus > 0 {
                        self.custody.move_to_surplus(owner, surplus)?;
                    }
                    self.emit_event(EventPayload::PositionClosed(PositionClosedEvent {
                        owner,
                        status: PositionStatus::ClosedByRedemption,
                        coll_returned: 0,
                        debt_repaid: step.lot,
                    }));
                }
                StepOutcome::Partial { new_nicr } => {
                    let debt = self.ledger.decrease_debt(owner, step.lot)?;
                    let coll = self.ledger.decrease_coll(owner, step.coll_lot)?;
                    let stake = self.ledger.update_stake_and_total_stakes(owner)?;
                    self.sorted.reinsert(
                        &self.ledger,
                        owner,
                        new_nicr,
                        request.upper_partial_hint,
                        request.lower_partial_hint,
                    )?;
                    self.emit_event(EventPayload::PositionAdjusted(PositionAdjustedEvent {
                        owner,
                        coll,
                        debt,
                        stake,
                        borrowing_fee: 0,
                    }));
                }
            }
            tracing::debug!(%owner, %redeemer, lot = step.lot, coll = step.coll_lot, "position redeemed");
        }
        Ok(())
    }
}
