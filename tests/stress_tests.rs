//! Stress tests
//!
//! These tests run many positions through crashes, liquidation sweeps and redemption
//! waves to verify the engine stays solvent and ordered under load.

use cdp_core::math::abs_diff;
use cdp_core::*;

const MAX_FEE: Amount = DECIMAL_PRECISION / 20;
const KEEPER: OwnerId = OwnerId(1_000_000);

fn stress_engine(price: u64) -> Engine {
    let mut engine = Engine::new(EngineConfig::with_protocol(ProtocolConfig::stress())).unwrap();
    engine.set_price(Price::from_units(price)).unwrap();
    engine
}

// n positions with ratios spread evenly from `low` to `high` percent at $100, safest first
fn open_spread(engine: &mut Engine, n: u64, low: u64, high: u64) {
    for i in (1..=n).rev() {
        let pct = Amount::from(low) + Amount::from(high - low) * Amount::from(i) / Amount::from(n);
        // debt 100 + 10 reserve, so coll = pct% * 110 / 100
        let coll = units(110) * pct / 100 / 100;
        engine
            .open_position(OwnerId(i), coll, units(100), MAX_FEE, Hints::default())
            .unwrap();
    }
}

fn assert_conserved(engine: &Engine) {
    let custody = engine.custody();
    assert_eq!(
        custody.total_received(),
        custody.held_collateral()
            + engine.stability_pool().collateral_balance()
            + custody.wallets().total_paid_out()
    );
    assert_eq!(engine.token().total_supply(), engine.entire_system_debt());
    let stakes: Amount = engine
        .ledger()
        .owners()
        .iter()
        .map(|&o| engine.position(o).unwrap().stake)
        .sum();
    assert_eq!(stakes, engine.ledger().total_stakes());
}

/// Price crashes and liquidation sweeps.
mod cascade_tests {
    use super::*;

    #[test]
    fn crash_sweep_with_pool_and_redistribution() {
        let mut engine = stress_engine(100);
        open_spread(&mut engine, 1_000, 125, 400);
        for i in (1..=1_000).step_by(4) {
            engine.provide_to_stability_pool(OwnerId(i), units(90)).unwrap();
        }
        let deposits = engine.stability_pool().total_deposits();
        assert_eq!(deposits, units(90) * 250);

        // anything under 137.5% at $100 falls below MCR at $80
        let price = Price::from_units(80);
        engine.set_price(price).unwrap();
        assert!(!engine.check_recovery_mode(price).unwrap());

        let totals = engine.liquidate_positions(KEEPER, 1_000).unwrap();
        assert!(totals.count() > 0);
        assert_eq!(totals.total_debt, totals.total_debt_offset + totals.total_debt_redistributed);
        assert!(totals.total_debt_offset <= deposits);
        assert_eq!(
            engine.debt_balance(Holder::User(KEEPER)),
            totals.total_debt_gas_compensation
        );

        // everything left is healthy
        let tail = engine.sorted_positions().last().unwrap();
        assert!(engine.current_icr(tail, price).unwrap() >= engine.params().mcr);
        assert_conserved(&engine);
    }

    #[test]
    fn recovery_mode_sequence_stops_when_system_recovers() {
        let mut engine = stress_engine(100);
        open_spread(&mut engine, 200, 160, 260);
        for i in 1..=200 {
            engine.provide_to_stability_pool(OwnerId(i), units(60)).unwrap();
        }

        // TCR ~ 210% * 0.7 = 147%, the tail is at 112%
        let price = Price::from_units(70);
        engine.set_price(price).unwrap();
        assert!(engine.check_recovery_mode(price).unwrap());

        let result = engine.liquidate_positions(KEEPER, 200);
        match result {
            Ok(totals) => {
                // a sequence that started in recovery mode ends once it is left, or when
                // the tail is back above MCR
                let tail = engine.sorted_positions().last().unwrap();
                assert!(
                    !engine.check_recovery_mode(price).unwrap()
                        || engine.current_icr(tail, price).unwrap() >= engine.params().mcr
                );
                assert!(totals.count() > 0);
            }
            Err(err) => assert_eq!(err, EngineError::NothingToLiquidate),
        }
        assert_conserved(&engine);
    }

    #[test]
    fn repeated_crashes_wipe_pool_epochs() {
        let mut engine = stress_engine(100);
        open_spread(&mut engine, 300, 120, 600);
        let depositor = OwnerId(300);
        engine.provide_to_stability_pool(depositor, units(50)).unwrap();

        let mut epochs_seen = 0;
        for price in [90, 80, 70] {
            let price = Price::from_units(price);
            engine.set_price(price).unwrap();
            if engine.liquidate_positions(KEEPER, 50).is_ok() {
                epochs_seen = engine.stability_pool().current_epoch();
            }
            assert_conserved(&engine);
        }
        // 50 deposited, one liquidation absorbs 110
        assert!(epochs_seen >= 1);
        assert_eq!(engine.stability_pool().compounded_deposit(depositor).unwrap(), 0);
        assert!(engine.stability_pool().collateral_gain(depositor).unwrap() > 0);
    }
}

/// Redemption waves over a large index.
mod redemption_tests {
    use super::*;

    #[test]
    fn redemption_wave_walks_from_the_tail() {
        let mut engine = stress_engine(100);
        open_spread(&mut engine, 500, 150, 500);
        let redeemer = OwnerId(9_999);
        for i in 1..=100 {
            engine.transfer_debt(OwnerId(i), redeemer, units(100)).unwrap();
        }

        let price = engine.fetch_price().unwrap();
        let supply_before = engine.token().total_supply();
        let mut redeemed_total = 0;
        for _ in 0..10 {
            let hints = engine.get_redemption_hints(units(950), price, 0).unwrap();
            let target = engine.get_approx_hint(hints.partial_nicr.max(1), 60, 7).unwrap();
            let (upper, lower) = engine
                .find_insert_position(hints.partial_nicr.max(1), target.hint, target.hint)
                .unwrap();
            let request = RedemptionRequest::new(hints.truncated_amount, DECIMAL_PRECISION)
                .with_hints(&hints)
                .with_partial_hints(upper, lower);
            let result = engine.redeem_collateral(redeemer, request).unwrap();
            redeemed_total += result.redeemed;
            engine.advance_time(60 * 60_000);
        }

        assert_eq!(engine.debt_balance(Holder::User(redeemer)), units(10_000) - redeemed_total);
        // each closed position also burned its 10 reserve
        let closed = 500 - engine.ledger().owners_count() as Amount;
        assert_eq!(
            engine.token().total_supply(),
            supply_before - redeemed_total - closed * units(10)
        );
        assert!(engine.fee_state().base_rate() > 0);
        assert_conserved(&engine);
    }

    #[test]
    fn base_rate_decays_between_redemptions() {
        let mut engine = stress_engine(100);
        open_spread(&mut engine, 50, 150, 300);
        let redeemer = OwnerId(777);
        engine.transfer_debt(OwnerId(50), redeemer, units(100)).unwrap();
        engine.transfer_debt(OwnerId(49), redeemer, units(100)).unwrap();

        let price = engine.fetch_price().unwrap();
        let hints = engine.get_redemption_hints(units(200), price, 0).unwrap();
        let request = RedemptionRequest::new(hints.truncated_amount, DECIMAL_PRECISION).with_hints(&hints);
        engine.redeem_collateral(redeemer, request).unwrap();
        let rate = engine.fee_state().base_rate();
        assert!(rate > 0);

        // 12 hours is one half-life
        engine.advance_time(12 * 60 * 60_000);
        let decayed = engine.decayed_base_rate().unwrap();
        assert!(abs_diff(decayed, rate / 2) < rate / 1_000, "{} vs {}", decayed, rate / 2);
    }
}

/// Many small adjustments keep the index and the books consistent.
mod churn_tests {
    use super::*;

    #[test]
    fn adjustments_keep_index_ordered() {
        let mut engine = stress_engine(100);
        open_spread(&mut engine, 300, 150, 450);

        for i in 1..=300u64 {
            let owner = OwnerId(i);
            let result = match i % 3 {
                0 => engine.add_collateral(owner, units(i % 7 + 1) / 10, Hints::default()),
                1 => engine.withdraw_debt(owner, units(i % 5 + 1), MAX_FEE, Hints::default()),
                _ => engine.repay_debt(owner, units(i % 4 + 1), Hints::default()),
            };
            assert!(result.is_ok(), "{}: {:?}", owner, result);
        }

        let ratios: Vec<Amount> = engine
            .sorted_positions()
            .iter()
            .map(|o| engine.nominal_icr(o).unwrap())
            .collect();
        assert_eq!(ratios.len(), 300);
        assert!(ratios.windows(2).all(|w| w[0] >= w[1]));
        assert_conserved(&engine);
    }

    #[test]
    fn open_and_close_churn() {
        let mut engine = stress_engine(100);
        open_spread(&mut engine, 100, 200, 400);
        let donor = OwnerId(500);
        engine
            .open_position(donor, units(40), units(1_000), MAX_FEE, Hints::default())
            .unwrap();

        for round in 0..5u64 {
            for i in (1..=100u64).filter(|i| i % 5 == round) {
                let owner = OwnerId(i);
                let debt = engine.entire_debt_and_coll(owner).unwrap().debt;
                let shortfall = (debt - units(10)).saturating_sub(engine.debt_balance(Holder::User(owner)));
                if shortfall > 0 {
                    engine.transfer_debt(donor, owner, shortfall).unwrap();
                }
                engine.close_position(owner).unwrap();
                engine
                    .open_position(owner, units(3), units(100), MAX_FEE, Hints::default())
                    .unwrap();
            }
            assert_conserved(&engine);
        }
        assert_eq!(engine.ledger().owners_count(), 101);
        assert_eq!(engine.sorted_positions().len(), 101);
    }
}
