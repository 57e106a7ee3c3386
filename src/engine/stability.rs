//! Stability pool deposits, withdrawals and collateral gain payouts.

use super::borrowing::{CollSource, Hints, PositionAdjustment};
use super::core::Engine;
use super::results::{AdjustResult, DepositResult, EngineError, WithdrawResult};
use crate::events::{CollateralGainPaidEvent, DepositChangedEvent, EventPayload};
use crate::stability_pool::{DepositUpdate, StabilityPoolError};
use crate::types::{Amount, Holder, OwnerId};

impl Engine {
    // 8.5.1: any accrued gain is paid out before the deposit is re-based
    pub fn provide_to_stability_pool(&mut self, depositor: OwnerId, amount: Amount) -> Result<DepositResult, EngineError> {
        if amount == 0 {
            return Err(StabilityPoolError::ZeroAmount.into());
        }
        self.token.require_balance(Holder::User(depositor), amount)?;

        let update = self.pool.provide(depositor, amount)?;
        self.token
            .transfer(Holder::User(depositor), Holder::StabilityPool, amount)?;
        self.pay_collateral_gain(depositor, &update)?;

        Ok(DepositResult {
            depositor,
            deposit: update.new_deposit,
            collateral_gain: update.collateral_gain,
            debt_loss: update.debt_loss,
        })
    }

    // 8.5.2: clamps to the compounded deposit. a zero amount only claims the gain.
    pub fn withdraw_from_stability_pool(
        &mut self,
        depositor: OwnerId,
        amount: Amount,
    ) -> Result<WithdrawResult, EngineError> {
        if self.pool.deposit(depositor).is_none() {
            return Err(StabilityPoolError::NoDeposit(depositor).into());
        }
        if amount > 0 {
            self.require_no_undercollateralized_positions()?;
        }

        let update = self.pool.withdraw(depositor, amount)?;
        self.token
            .transfer(Holder::StabilityPool, Holder::User(depositor), update.withdrawn)?;
        self.pay_collateral_gain(depositor, &update)?;

        Ok(WithdrawResult {
            depositor,
            withdrawn: update.withdrawn,
            remaining: update.new_deposit,
            collateral_gain: update.collateral_gain,
            debt_loss: update.debt_loss,
        })
    }

    // 8.5.3: the gain goes into the depositor's own position instead of their wallet
    pub fn withdraw_collateral_gain_to_position(
        &mut self,
        depositor: OwnerId,
        hints: Hints,
    ) -> Result<AdjustResult, EngineError> {
        if self.pool.deposit(depositor).is_none() {
            return Err(StabilityPoolError::NoDeposit(depositor).into());
        }
        let price = self.fetch_price()?;
        let gain = self.pool.collateral_gain(depositor)?;
        if gain == 0 {
            return Err(StabilityPoolError::NoCollateralGain(depositor).into());
        }

        let adjustment = PositionAdjustment::add_coll(gain).with_hints(hints);
        let plan = self.plan_adjustment(depositor, &adjustment, price)?;

        let update = self.pool.take_collateral_gain(depositor)?;
        self.emit_event(EventPayload::DepositChanged(DepositChangedEvent {
            depositor,
            new_deposit: update.new_deposit,
            debt_loss: update.debt_loss,
        }));
        self.emit_event(EventPayload::CollateralGainPaid(CollateralGainPaidEvent {
            depositor,
            coll: update.collateral_gain,
            to_position: true,
        }));

        self.commit_adjustment(plan, CollSource::StabilityPoolGain, price)
    }

    fn require_no_undercollateralized_positions(&mut self) -> Result<(), EngineError> {
        let Some(riskiest) = self.sorted.last() else {
            return Ok(());
        };
        let price = self.fetch_price()?;
        if self.ledger.current_icr(riskiest, price)? < self.params.mcr {
            return Err(EngineError::UndercollateralizedPositionExists);
        }
        Ok(())
    }

    fn pay_collateral_gain(&mut self, depositor: OwnerId, update: &DepositUpdate) -> Result<(), EngineError> {
        if update.collateral_gain > 0 {
            self.custody
                .wallets
                .pay(Holder::User(depositor), update.collateral_gain)?;
        }

        self.emit_event(EventPayload::DepositChanged(DepositChangedEvent {
            depositor,
            new_deposit: update.new_deposit,
            debt_loss: update.debt_loss,
        }));
        if update.collateral_gain > 0 {
            tracing::debug!(%depositor, coll = update.collateral_gain, "collateral gain paid");
            self.emit_event(EventPayload::CollateralGainPaid(CollateralGainPaidEvent {
                depositor,
                coll: update.collateral_gain,
                to_position: false,
            }));
        }
        Ok(())
    }
}
