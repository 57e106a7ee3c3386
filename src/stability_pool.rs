// 5.0 stability_pool.rs: pooled debt tokens that absorb liquidated debt in exchange for collateral.
// no depositor is ever iterated. a running product P tracks how much of every deposit survives,
// and sums S[epoch][scale] track collateral gained per unit deposited.
// 5.1 a full wipe starts a new epoch. P falling under SCALE_FACTOR bumps the scale instead,
// as many times as it takes to bring P back to at least SCALE_FACTOR.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::custody::{CollateralVault, CustodyError};
use crate::math::{self, div_rem_wide, mul_div, widen, MathError};
use crate::types::{Amount, OwnerId, DECIMAL_PRECISION};

pub const SCALE_FACTOR: Amount = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StabilityPoolError {
    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("{0} has no deposit")]
    NoDeposit(OwnerId),

    #[error("{0} has no collateral gain")]
    NoCollateralGain(OwnerId),

    #[error("offset of {requested} exceeds deposits of {available}")]
    OffsetExceedsDeposits { requested: Amount, available: Amount },

    #[error("math error: {0}")]
    Math(#[from] MathError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositSnapshot {
    pub p: Amount,
    pub s: Amount,
    pub scale: u64,
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub initial: Amount,
    pub snapshot: DepositSnapshot,
}

/// Outcome of a provide or withdraw, already applied to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositUpdate {
    pub compounded_before: Amount,
    pub new_deposit: Amount,
    /// Tokens leaving the pool. zero for a provide.
    pub withdrawn: Amount,
    pub collateral_gain: Amount,
    /// Deposit value lost to offsets since the last snapshot.
    pub debt_loss: Amount,
}

/// State after an offset, computed before anything is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetPlan {
    pub debt: Amount,
    pub coll: Amount,
    sum_key: (u64, u64),
    new_sum: Amount,
    new_p: Amount,
    new_scale: u64,
    new_epoch: u64,
    coll_error: Amount,
    debt_loss_error: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityPool {
    deposits: HashMap<OwnerId, Deposit>,
    p: Amount,
    current_scale: u64,
    current_epoch: u64,
    sums: BTreeMap<(u64, u64), Amount>,
    total_deposits: Amount,
    coll: Amount,
    last_coll_error: Amount,
    last_debt_loss_error: Amount,
}

impl Default for StabilityPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StabilityPool {
    pub fn new() -> Self {
        Self {
            deposits: HashMap::new(),
            p: DECIMAL_PRECISION,
            current_scale: 0,
            current_epoch: 0,
            sums: BTreeMap::new(),
            total_deposits: 0,
            coll: 0,
            last_coll_error: 0,
            last_debt_loss_error: 0,
        }
    }

    pub fn p(&self) -> Amount {
        self.p
    }

    pub fn current_scale(&self) -> u64 {
        self.current_scale
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch
    }

    pub fn sum(&self, epoch: u64, scale: u64) -> Amount {
        self.sums.get(&(epoch, scale)).copied().unwrap_or(0)
    }

    pub fn total_deposits(&self) -> Amount {
        self.total_deposits
    }

    pub fn collateral_balance(&self) -> Amount {
        self.coll
    }

    pub fn deposit(&self, depositor: OwnerId) -> Option<&Deposit> {
        self.deposits.get(&depositor)
    }

    pub fn depositors_count(&self) -> usize {
        self.deposits.len()
    }

    // 5.2: initial * P / P_snapshot, corrected for scale changes since the snapshot
    pub fn compounded_deposit(&self, depositor: OwnerId) -> Result<Amount, StabilityPoolError> {
        let Some(deposit) = self.deposits.get(&depositor) else {
            return Ok(0);
        };
        let snapshot = deposit.snapshot;
        if snapshot.epoch < self.current_epoch {
            return Ok(0);
        }

        let compounded = match self.current_scale - snapshot.scale {
            0 => mul_div(deposit.initial, self.p, snapshot.p)?,
            1 => mul_div(deposit.initial, self.p, snapshot.p)? / SCALE_FACTOR,
            _ => 0,
        };

        // anything under a billionth of the original is rounding noise
        if compounded < deposit.initial / 1_000_000_000 {
            return Ok(0);
        }
        Ok(compounded)
    }

    // 5.3: gains accrued in the snapshot scale plus the next one, which is worth 1/SCALE_FACTOR
    pub fn collateral_gain(&self, depositor: OwnerId) -> Result<Amount, StabilityPoolError> {
        let Some(deposit) = self.deposits.get(&depositor) else {
            return Ok(0);
        };
        let snapshot = deposit.snapshot;

        let first = self
            .sum(snapshot.epoch, snapshot.scale)
            .saturating_sub(snapshot.s);
        let second = self.sum(snapshot.epoch, snapshot.scale + 1) / SCALE_FACTOR;
        let portions = math::checked_add(first, second, "collateral gain")?;
        if portions == 0 {
            return Ok(0);
        }

        let numerator = widen(deposit.initial) * widen(portions);
        let (per_p, _) = div_rem_wide(&numerator, snapshot.p, "collateral gain")?;
        Ok(per_p / DECIMAL_PRECISION)
    }

    fn current_snapshot(&self) -> DepositSnapshot {
        DepositSnapshot {
            p: self.p,
            s: self.sum(self.current_epoch, self.current_scale),
            scale: self.current_scale,
            epoch: self.current_epoch,
        }
    }

    fn settle(&self, depositor: OwnerId) -> Result<(Amount, Amount, Amount), StabilityPoolError> {
        let initial = self.deposits.get(&depositor).map(|d| d.initial).unwrap_or(0);
        let compounded = self.compounded_deposit(depositor)?;
        // per-depositor flooring can leave a gain a wei above what the pool holds
        let gain = self.collateral_gain(depositor)?.min(self.coll);
        Ok((initial, compounded, gain))
    }

    fn write_deposit(&mut self, depositor: OwnerId, value: Amount) {
        if value == 0 {
            self.deposits.remove(&depositor);
            return;
        }
        let snapshot = self.current_snapshot();
        self.deposits.insert(
            depositor,
            Deposit {
                initial: value,
                snapshot,
            },
        );
    }

    // 5.4: pays out the gain and re-bases the deposit at compounded + amount.
    // the caller moves the debt tokens and credits the gain to the depositor.
    pub(crate) fn provide(&mut self, depositor: OwnerId, amount: Amount) -> Result<DepositUpdate, StabilityPoolError> {
        if amount == 0 {
            return Err(StabilityPoolError::ZeroAmount);
        }
        let (initial, compounded, gain) = self.settle(depositor)?;
        let new_deposit = math::checked_add(compounded, amount, "deposit")?;
        let total = math::checked_add(self.total_deposits, amount, "total deposits")?;

        self.total_deposits = total;
        self.coll -= gain;
        self.write_deposit(depositor, new_deposit);

        Ok(DepositUpdate {
            compounded_before: compounded,
            new_deposit,
            withdrawn: 0,
            collateral_gain: gain,
            debt_loss: initial.saturating_sub(compounded),
        })
    }

    // clamps to the compounded deposit. a zero amount only claims the gain.
    pub(crate) fn withdraw(&mut self, depositor: OwnerId, amount: Amount) -> Result<DepositUpdate, StabilityPoolError> {
        if !self.deposits.contains_key(&depositor) {
            return Err(StabilityPoolError::NoDeposit(depositor));
        }
        let (initial, compounded, gain) = self.settle(depositor)?;
        let withdrawn = amount.min(compounded);
        let new_deposit = compounded - withdrawn;

        self.total_deposits = self.total_deposits.saturating_sub(withdrawn);
        self.coll -= gain;
        self.write_deposit(depositor, new_deposit);

        Ok(DepositUpdate {
            compounded_before: compounded,
            new_deposit,
            withdrawn,
            collateral_gain: gain,
            debt_loss: initial.saturating_sub(compounded),
        })
    }

    // same as a zero withdraw, but refuses when there is nothing to take
    pub(crate) fn take_collateral_gain(&mut self, depositor: OwnerId) -> Result<DepositUpdate, StabilityPoolError> {
        if !self.deposits.contains_key(&depositor) {
            return Err(StabilityPoolError::NoDeposit(depositor));
        }
        if self.collateral_gain(depositor)? == 0 {
            return Err(StabilityPoolError::NoCollateralGain(depositor));
        }
        self.withdraw(depositor, 0)
    }

    // 5.5: offset planning. error feedback keeps rounding in favour of the pool.
    pub fn compute_offset(&self, debt: Amount, coll: Amount) -> Result<OffsetPlan, StabilityPoolError> {
        let mut plan = OffsetPlan {
            debt,
            coll,
            sum_key: (self.current_epoch, self.current_scale),
            new_sum: self.sum(self.current_epoch, self.current_scale),
            new_p: self.p,
            new_scale: self.current_scale,
            new_epoch: self.current_epoch,
            coll_error: self.last_coll_error,
            debt_loss_error: self.last_debt_loss_error,
        };
        if debt == 0 || self.total_deposits == 0 {
            return Ok(plan);
        }
        if debt > self.total_deposits {
            return Err(StabilityPoolError::OffsetExceedsDeposits {
                requested: debt,
                available: self.total_deposits,
            });
        }
        let total = self.total_deposits;

        let coll_numerator = widen(coll) * widen(DECIMAL_PRECISION) + widen(self.last_coll_error);
        let (coll_gain_per_unit, coll_error) = div_rem_wide(&coll_numerator, total, "offset coll")?;

        let (debt_loss_per_unit, debt_loss_error) = if debt == total {
            (DECIMAL_PRECISION, 0)
        } else {
            let numerator = widen(debt) * widen(DECIMAL_PRECISION);
            let error = widen(self.last_debt_loss_error);
            let numerator = if numerator > error { numerator - error } else { widen(0) };
            let (quotient, _) = div_rem_wide(&numerator, total, "offset debt")?;
            let per_unit = quotient + 1;
            let error = widen(per_unit) * widen(total) - numerator;
            (per_unit, math::narrow(&error, "offset debt")?)
        };

        let marginal_gain = coll_gain_per_unit
            .checked_mul(self.p)
            .ok_or(MathError::Overflow("offset sum"))?;
        plan.new_sum = math::checked_add(plan.new_sum, marginal_gain, "offset sum")?;
        plan.coll_error = coll_error;
        plan.debt_loss_error = debt_loss_error;

        let factor = DECIMAL_PRECISION.saturating_sub(debt_loss_per_unit);
        if factor == 0 {
            // remainders belong to the wiped epoch. the pool keeps them as dust
            plan.new_epoch = self.current_epoch + 1;
            plan.new_scale = 0;
            plan.new_p = DECIMAL_PRECISION;
            plan.coll_error = 0;
            plan.debt_loss_error = 0;
        } else {
            // P >= SCALE_FACTOR and factor >= 1, so at most two rescales bring P back up
            let mut product = mul_div(self.p, factor, 1)?;
            let mut scale = self.current_scale;
            while product / DECIMAL_PRECISION < SCALE_FACTOR {
                product = product
                    .checked_mul(SCALE_FACTOR)
                    .ok_or(MathError::Overflow("offset rescale"))?;
                scale += 1;
            }
            plan.new_scale = scale;
            plan.new_p = product / DECIMAL_PRECISION;
        }
        Ok(plan)
    }

    pub(crate) fn apply_offset(&mut self, plan: &OffsetPlan) {
        if plan.debt == 0 || self.total_deposits == 0 {
            return;
        }
        self.sums.insert(plan.sum_key, plan.new_sum);
        self.p = plan.new_p;
        self.current_scale = plan.new_scale;
        self.current_epoch = plan.new_epoch;
        self.last_coll_error = plan.coll_error;
        self.last_debt_loss_error = plan.debt_loss_error;
        self.total_deposits -= plan.debt;
        self.coll += plan.coll;
    }
}

impl CollateralVault for StabilityPool {
    fn name(&self) -> &'static str {
        "stability-pool"
    }

    fn collateral(&self) -> Amount {
        self.coll
    }

    fn receive_collateral(&mut self, amount: Amount) -> Result<(), CustodyError> {
        self.coll = self
            .coll
            .checked_add(amount)
            .ok_or(CustodyError::Overflow("stability-pool"))?;
        Ok(())
    }

    fn send_collateral(&mut self, amount: Amount) -> Result<(), CustodyError> {
        if self.coll < amount {
            return Err(CustodyError::InsufficientCollateral {
                vault: "stability-pool",
                available: self.coll,
                requested: amount,
            });
        }
        self.coll -= amount;
        Ok(())
    }
}
