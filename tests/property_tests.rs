//! Property-based tests for the ratio math, the sorted index, hints and redemptions.
//!
//! These tests verify invariants hold under random inputs.

use std::collections::HashMap;

use cdp_core::math::{abs_diff, compute_cr, compute_nominal_cr, mul_div};
use cdp_core::*;
use proptest::prelude::*;

const MAX_FEE: Amount = DECIMAL_PRECISION / 20;

// Strategies for generating test data
fn nicr_strategy() -> impl Strategy<Value = Amount> {
    (1u64..1_000_000u64).prop_map(|x| Amount::from(x) * 1_000_000_000_000)
}

fn hint_strategy() -> impl Strategy<Value = Option<OwnerId>> {
    prop::option::of((0u64..60u64).prop_map(OwnerId))
}

#[derive(Debug, Clone)]
enum ListOp {
    Insert(u64, Amount, Option<OwnerId>, Option<OwnerId>),
    Remove(u64),
    Reinsert(u64, Amount, Option<OwnerId>, Option<OwnerId>),
}

fn list_op() -> impl Strategy<Value = ListOp> {
    prop_oneof![
        3 => (0u64..50, nicr_strategy(), hint_strategy(), hint_strategy())
            .prop_map(|(id, nicr, p, n)| ListOp::Insert(id, nicr, p, n)),
        1 => (0u64..50).prop_map(ListOp::Remove),
        2 => (0u64..50, nicr_strategy(), hint_strategy(), hint_strategy())
            .prop_map(|(id, nicr, p, n)| ListOp::Reinsert(id, nicr, p, n)),
    ]
}

fn assert_sorted(list: &SortedPositions, ratios: &HashMap<OwnerId, Amount>) -> Result<(), TestCaseError> {
    let ids: Vec<OwnerId> = list.iter().collect();
    prop_assert_eq!(ids.len(), list.len());
    for pair in ids.windows(2) {
        prop_assert!(ratios[&pair[0]] >= ratios[&pair[1]], "{:?} out of order", pair);
        prop_assert_eq!(list.next(pair[0]), Some(pair[1]));
        prop_assert_eq!(list.prev(pair[1]), Some(pair[0]));
    }
    prop_assert_eq!(list.first(), ids.first().copied());
    prop_assert_eq!(list.last(), ids.last().copied());
    Ok(())
}

#[test]
fn nominal_ratio_reference_value() {
    assert_eq!(compute_nominal_cr(3, 200).unwrap(), 1_500_000_000_000_000_000);
    assert_eq!(compute_nominal_cr(units(3), 0).unwrap(), Amount::MAX);
}

proptest! {
    /// CR scales linearly with price and NICR ignores it.
    #[test]
    fn ratio_math_is_consistent(
        coll in 1u64..10_000,
        debt in 1u64..1_000_000,
        price in 1u64..100_000,
    ) {
        let (coll, debt) = (units(coll), units(debt));
        let cr = compute_cr(coll, debt, Price::from_units(price)).unwrap();
        let nicr = compute_nominal_cr(coll, debt).unwrap();
        prop_assert_eq!(cr, mul_div(coll, units(price), debt).unwrap());
        // NICR is CR at a price of 100 units, before truncation
        let cr_at_100 = compute_cr(coll, debt, Price::from_units(100)).unwrap();
        prop_assert_eq!(nicr, cr_at_100);
    }

    /// Ordering holds after every mutation, whatever the hints say.
    #[test]
    fn sorted_index_stays_ordered(ops in proptest::collection::vec(list_op(), 1..120)) {
        let mut list = SortedPositions::new(1_000);
        let mut ratios: HashMap<OwnerId, Amount> = HashMap::new();

        for op in ops {
            match op {
                ListOp::Insert(id, nicr, prev, next) => {
                    let id = OwnerId(id);
                    let inserted = list.insert(&ratios, id, nicr, prev, next);
                    prop_assert_eq!(inserted.is_ok(), !ratios.contains_key(&id));
                    if inserted.is_ok() {
                        ratios.insert(id, nicr);
                    }
                }
                ListOp::Remove(id) => {
                    let id = OwnerId(id);
                    let removed = list.remove(id);
                    prop_assert_eq!(removed.is_ok(), ratios.remove(&id).is_some());
                }
                ListOp::Reinsert(id, nicr, prev, next) => {
                    let id = OwnerId(id);
                    if !ratios.contains_key(&id) {
                        prop_assert!(list.reinsert(&ratios, id, nicr, prev, next).is_err());
                        continue;
                    }
                    ratios.insert(id, nicr);
                    list.reinsert(&ratios, id, nicr, prev, next).unwrap();
                }
            }
            assert_sorted(&list, &ratios)?;
        }
    }

    /// A found slot is always a valid one.
    #[test]
    fn find_insert_position_is_valid(
        values in proptest::collection::vec(nicr_strategy(), 1..40),
        target in nicr_strategy(),
        prev in hint_strategy(),
        next in hint_strategy(),
    ) {
        let mut list = SortedPositions::new(100);
        let mut ratios = HashMap::new();
        for (i, nicr) in values.into_iter().enumerate() {
            let id = OwnerId(i as u64);
            list.insert(&ratios, id, nicr, None, None).unwrap();
            ratios.insert(id, nicr);
        }

        let (p, n) = list.find_insert_position(&ratios, target, prev, next).unwrap();
        prop_assert!(list.valid_insert_position(&ratios, target, p, n).unwrap());
    }

    /// Hint chaining is a pure function of the seed.
    #[test]
    fn next_candidate_is_deterministic(seed in any::<u64>(), len in 1usize..10_000) {
        let (a, next_a) = hints::next_candidate(seed, len);
        let (b, next_b) = hints::next_candidate(seed, len);
        prop_assert_eq!((a, next_a), (b, next_b));
        prop_assert!(a < len);
    }
}

/// Approximate hints land close to the true slot.
mod approx_hints {
    use super::*;

    const N: u64 = 400;

    fn engine_with_spread() -> Engine {
        let mut engine = Engine::new(EngineConfig::with_protocol(ProtocolConfig::stress())).unwrap();
        engine.set_price(Price::from_units(100)).unwrap();
        // safest first so every open passes the system ratio check
        for i in (1..=N).rev() {
            let coll = units(2) + units(8) * Amount::from(i) / Amount::from(N);
            engine
                .open_position(OwnerId(i), coll, units(100), MAX_FEE, Hints::default())
                .unwrap();
        }
        engine
    }

    // list positions between the hint and where `target` would be inserted
    fn distance_to_slot(engine: &Engine, hint: OwnerId, target: Amount) -> usize {
        let ids: Vec<OwnerId> = engine.sorted_positions().iter().collect();
        let slot = ids
            .iter()
            .position(|&id| engine.nominal_icr(id).unwrap() <= target)
            .unwrap_or(ids.len());
        let at = ids.iter().position(|&id| id == hint).unwrap();
        at.abs_diff(slot)
    }

    #[test]
    fn hint_within_sqrt_n_positions() {
        let engine = engine_with_spread();
        let trials = 15 * 20; // 15 * sqrt(400)
        let lowest = engine.nominal_icr(engine.sorted_positions().last().unwrap()).unwrap();
        let highest = engine.nominal_icr(engine.sorted_positions().first().unwrap()).unwrap();

        let mut seed = 1;
        for step in 1..50u128 {
            let target = lowest + (highest - lowest) * step / 50;
            let hint = engine.get_approx_hint(target, trials, seed).unwrap();
            seed = hint.next_seed;

            let id = hint.hint.unwrap();
            assert!(engine.nominal_icr(id).unwrap() <= target);
            assert!(
                distance_to_slot(&engine, id, target) <= 20,
                "target {} hint {} is {} positions away",
                target,
                id,
                distance_to_slot(&engine, id, target)
            );
        }
    }

    #[test]
    fn hint_then_exact_slot_matches_unhinted_search() {
        let engine = engine_with_spread();
        let nicr = engine.nominal_icr(OwnerId(123)).unwrap() + 1;
        let hint = engine.get_approx_hint(nicr, 300, 99).unwrap();
        let hinted = engine.find_insert_position(nicr, hint.hint, hint.hint).unwrap();
        let unhinted = engine.find_insert_position(nicr, None, None).unwrap();
        assert_eq!(hinted, unhinted);
    }

    #[test]
    fn same_seed_same_hint() {
        let engine = engine_with_spread();
        let target = engine.nominal_icr(OwnerId(200)).unwrap();
        let a = engine.get_approx_hint(target, 40, 5).unwrap();
        let b = engine.get_approx_hint(target, 40, 5).unwrap();
        assert_eq!(a, b);
        let c = engine.get_approx_hint(target, 40, a.next_seed).unwrap();
        assert_ne!(c.next_seed, a.next_seed);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// System debt falls by exactly what was burned, the redeemer receives the collateral
    /// at face value minus the fee, and positions outside the walk are untouched.
    #[test]
    fn redemption_moves_exact_amounts(
        positions in proptest::collection::vec((40u64..200, 1_800u64..3_000), 3..8),
        amount in 1u64..6_000,
        price in 150u64..400,
    ) {
        let mut engine = Engine::new(EngineConfig::with_protocol(ProtocolConfig::testnet())).unwrap();
        let price = Price::from_units(price);
        engine.set_price(price).unwrap();

        let mut owners = Vec::new();
        for (i, (coll, debt)) in positions.iter().enumerate() {
            let owner = OwnerId(i as u64 + 1);
            // distinct ratios, every one above CCR
            let coll = units(*coll) + Amount::from(i as u64);
            if engine.open_position(owner, coll, units(*debt), MAX_FEE, Hints::default()).is_ok() {
                owners.push(owner);
            }
        }
        prop_assume!(owners.len() >= 2);

        let redeemer = OwnerId(100);
        let wanted = units(amount);
        let mut funded = 0;
        for &owner in &owners {
            if funded >= wanted {
                break;
            }
            let balance = engine.debt_balance(Holder::User(owner));
            let take = balance.min(wanted - funded);
            engine.transfer_debt(owner, redeemer, take).unwrap();
            funded += take;
        }

        // redeem what the hints say can actually be taken
        let hints = engine.get_redemption_hints(funded, price, 0).unwrap();
        prop_assume!(hints.truncated_amount > 0);
        let before: Vec<_> = owners.iter().map(|&o| (o, engine.position(o).unwrap().clone())).collect();
        let debt_before = engine.entire_system_debt();

        let request = RedemptionRequest::new(hints.truncated_amount, DECIMAL_PRECISION).with_hints(&hints);
        let result = match engine.redeem_collateral(redeemer, request) {
            Ok(result) => result,
            Err(EngineError::Ledger(LedgerError::OnlyOnePositionInSystem)) => return Ok(()),
            Err(err) => return Err(TestCaseError::fail(format!("{:?}", err))),
        };

        prop_assert_eq!(result.redeemed, hints.truncated_amount);
        prop_assert_eq!(result.cancelled_partial, None);
        let gas_burned = engine.params().gas_compensation * result.closed.len() as Amount;
        prop_assert_eq!(engine.entire_system_debt(), debt_before - result.redeemed - gas_burned);

        let drawn = mul_div(result.redeemed, DECIMAL_PRECISION, price.value()).unwrap();
        prop_assert!(abs_diff(result.coll_drawn, drawn) <= owners.len() as Amount);
        prop_assert_eq!(result.coll_sent + result.fee, result.coll_drawn);
        prop_assert_eq!(engine.collateral_balance(Holder::User(redeemer)), result.coll_sent);
        prop_assert_eq!(engine.debt_balance(Holder::User(redeemer)), funded - result.redeemed);

        for (owner, position) in before {
            let touched = result.closed.contains(&owner) || result.partially_redeemed == Some(owner);
            if !touched {
                let now = engine.position(owner).unwrap();
                prop_assert_eq!(now.coll, position.coll);
                prop_assert_eq!(now.debt, position.debt);
            }
        }
    }
}
