// 4.5 hints.rs: read-only helpers that let callers hand the sorted list a good starting point.
// approx_hint samples random owners, so k * sqrt(n) trials land close to the target slot.
// the random step is a pure function of the seed. replaying a seed replays the search.

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::ProtocolParams;
use crate::math::{abs_diff, compute_nominal_cr, mul_div};
use crate::position::{LedgerError, PositionLedger};
use crate::sorted::{NominalRatio, SortedPositions};
use crate::types::{Amount, OwnerId, Price, DECIMAL_PRECISION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproxHint {
    pub hint: Option<OwnerId>,
    pub diff: Amount,
    pub next_seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionHints {
    pub first_hint: Option<OwnerId>,
    /// Zero when no position is left partially redeemed.
    pub partial_nicr: Amount,
    pub truncated_amount: Amount,
}

/// One sampling step: a uniform index below `len` and the seed for the next draw.
pub fn next_candidate(seed: u64, len: usize) -> (usize, u64) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let index = if len == 0 { 0 } else { rng.gen_range(0..len) };
    (index, rng.next_u64())
}

// 4.5.1: closest nominal ratio at or below the target among the tail and `num_trials` samples.
// when nothing sampled sits at or below the target the tail is returned.
pub fn approx_hint(
    ledger: &PositionLedger,
    sorted: &SortedPositions,
    target_nicr: Amount,
    num_trials: usize,
    seed: u64,
) -> Result<ApproxHint, LedgerError> {
    let Some(tail) = sorted.last() else {
        return Ok(ApproxHint {
            hint: None,
            diff: 0,
            next_seed: seed,
        });
    };

    let tail_nicr = ledger.nominal_icr(tail)?;
    let mut best = tail;
    let mut best_diff = abs_diff(tail_nicr, target_nicr);
    let mut best_within = tail_nicr <= target_nicr;

    let len = ledger.owners_count();
    let mut seed = seed;
    for _ in 0..num_trials {
        let (index, next_seed) = next_candidate(seed, len);
        seed = next_seed;

        let Some(candidate) = ledger.owner_at(index) else {
            continue;
        };
        let nicr = ledger.nominal_icr(candidate)?;
        if nicr > target_nicr {
            continue;
        }
        let diff = target_nicr - nicr;
        if !best_within || diff < best_diff {
            best = candidate;
            best_diff = diff;
            best_within = true;
        }
    }

    Ok(ApproxHint {
        hint: Some(best),
        diff: best_diff,
        next_seed: seed,
    })
}

// 4.5.2: where a redemption of `amount` would start, and the ratio the last touched
// position would end at. positions below MCR are skipped, they are for liquidation.
pub fn redemption_hints(
    ledger: &PositionLedger,
    sorted: &SortedPositions,
    params: &ProtocolParams,
    amount: Amount,
    price: Price,
    max_iterations: usize,
) -> Result<RedemptionHints, LedgerError> {
    let mut remaining = amount;

    let mut current = sorted.last();
    while let Some(id) = current {
        if ledger.current_icr(id, price)? >= params.mcr {
            break;
        }
        current = sorted.prev(id);
    }
    let first_hint = current;

    let mut partial_nicr = 0;
    let mut iterations = if max_iterations == 0 { usize::MAX } else { max_iterations };

    while let Some(id) = current {
        if remaining == 0 || iterations == 0 {
            break;
        }
        iterations -= 1;

        let entire = ledger.entire_debt_and_coll(id)?;
        let net_debt = entire.debt.saturating_sub(params.gas_compensation);

        if net_debt > remaining {
            if net_debt > params.min_net_debt {
                let max_redeemable = remaining.min(net_debt - params.min_net_debt);
                let coll_drawn = mul_div(max_redeemable, DECIMAL_PRECISION, price.value())?;
                let new_coll = entire.coll.saturating_sub(coll_drawn);
                let new_debt = net_debt - max_redeemable + params.gas_compensation;

                partial_nicr = compute_nominal_cr(new_coll, new_debt)?;
                remaining -= max_redeemable;
            }
            break;
        }

        remaining -= net_debt;
        current = sorted.prev(id);
    }

    Ok(RedemptionHints {
        first_hint,
        partial_nicr,
        truncated_amount: amount - remaining,
    })
}
