//! End-to-end scenarios exercising the market, matching, pricing, and
//! storage modules together.

use chrono::Utc;
use gridtokenx_blockchain::{
    select_matcher, AlternativePricingScheme, FeePolicy, Market, MatchingAlgorithmKind,
    RateLimit, RateUpdater, StorageState, StorageStrategy, StorageStrategyConfig,
};

fn storage_config(final_buying_rate: f64) -> StorageStrategyConfig {
    StorageStrategyConfig {
        initial_selling_rate: 30.0,
        final_selling_rate: 25.0,
        initial_buying_rate: 0.0,
        final_buying_rate,
        fit_to_limit: true,
        energy_rate_change_per_update: 0.0,
        cap_price_strategy: false,
        sell_on_most_expensive_market: false,
        alternative_pricing_scheme: AlternativePricingScheme::Disabled,
        market_maker_rate: 30.0,
        slot_length_seconds: 3600,
        update_interval_seconds: 900,
    }
}

/// S1: a PV with min selling rate 20 should never sell to a storage device
/// whose buying ceiling sits below that floor, and every trade that does
/// clear against the higher-ceiling storage device must respect the floor.
/// Bids are posted directly at each device's final buying rate (the ceiling
/// its updater ramps to by the end of the slot) rather than driven through
/// the full per-tick schedule, isolating the matching behavior under test.
#[test]
fn s1_pv_to_storage_respects_the_sell_floor() {
    let mut market = Market::new("s1", Utc::now(), true, FeePolicy::none());
    let pv_energy = 4.0;
    market.offer(20.0 * pv_energy, pv_energy, "pv-1", false).unwrap();
    market.bid(25.0 * 2.0, 2.0, "storage-1", false).unwrap();
    market.bid(15.0 * 2.0, 2.0, "storage-2", false).unwrap();

    let matcher = select_matcher(MatchingAlgorithmKind::PayAsBid).unwrap();
    let bids: Vec<_> = market.bids().cloned().collect();
    let offers: Vec<_> = market.offers().cloned().collect();
    let recs = matcher.calculate_match_recommendation(&bids, &offers);
    let results = market.match_recommendation(recs);

    let mut any_storage1_trade = false;
    for result in results.into_iter().flatten() {
        let (_, bid_trade) = result;
        if bid_trade.buyer == "storage-1" {
            any_storage1_trade = true;
            assert!(bid_trade.trade_bid_offer_info.trade_rate >= 20.0 - 1e-8);
        }
        assert_ne!(bid_trade.buyer, "storage-2", "storage-2's ceiling is below the pv floor");
    }
    assert!(any_storage1_trade, "storage-1's ceiling is above the pv floor and should clear");
}

/// S2: a one-sided PV offer decreasing linearly should hit exactly the
/// expected rate at each of the slot's interior updates.
#[test]
fn s2_pv_rate_decreases_on_schedule() {
    let mut updater = RateUpdater::new(RateLimit::Min, 3600, 900, false, 4.0).unwrap();
    updater.populate_profiles(30.0, 18.0);

    let expected = [30.0, 26.0, 22.0, 18.0];
    for (tick, expected_rate) in expected.iter().enumerate() {
        let elapsed = tick as u64 * 900;
        assert!((updater.get_updated_rate(elapsed) - expected_rate).abs() < 1e-8);
    }
}

/// S5: partially accepting a bid/offer pair splits the offer and fully
/// consumes the bid, with two trades recorded and a proportional residual.
#[test]
fn s5_partial_accept_splits_both_sides() {
    let mut market = Market::new("s5", Utc::now(), true, FeePolicy::none());
    let offer = market.offer(10.0, 2.0, "seller", false).unwrap();
    let bid = market.bid(12.0, 1.0, "buyer", false).unwrap();

    let (offer_trade, bid_trade) = market
        .accept_bid_offer_pair(&bid.id, &offer.id, 11.0, 1.0, None)
        .unwrap();

    assert_eq!(market.trades.len(), 2);
    let residual = offer_trade.residual_offer.expect("offer must split");
    assert!((residual.energy - 1.0).abs() < 1e-8);
    assert!((residual.price + offer_trade.offer.price - offer.price).abs() < 1e-8);
    assert!(bid_trade.residual_bid.is_none());
}

/// S6: applying a recommendation list where the first pairing only
/// partially consumes the offer must still let the second pairing trade
/// against the automatically-substituted residual.
#[test]
fn s6_match_recommendation_chases_residuals() {
    let mut market = Market::new("s6", Utc::now(), true, FeePolicy::none());
    let offer = market.offer(30.0, 3.0, "seller", false).unwrap();
    let bid1 = market.bid(11.0, 1.0, "buyer-1", false).unwrap();
    let bid2 = market.bid(11.0, 1.0, "buyer-2", false).unwrap();

    let recs = vec![
        (bid1.id.clone(), offer.id.clone(), 1.0, 10.0),
        (bid2.id.clone(), offer.id.clone(), 1.0, 10.0),
    ];
    let results = market.match_recommendation(recs);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(market.trades.len(), 4);
}

/// P7: re-applying a recommendation that already fully consumed its bid
/// must fail the second time around rather than silently double-trading.
#[test]
fn p7_matching_is_not_idempotent_on_a_fully_consumed_pair() {
    let mut market = Market::new("p7", Utc::now(), true, FeePolicy::none());
    let offer = market.offer(10.0, 2.0, "seller", false).unwrap();
    let bid = market.bid(10.0, 2.0, "buyer", false).unwrap();

    let rec = vec![(bid.id.clone(), offer.id.clone(), 2.0, 10.0)];
    let first = market.match_recommendation(rec.clone());
    assert!(first[0].is_ok());

    let second = market.match_recommendation(rec);
    assert!(second[0].is_err());

    // Applying an empty list is always a no-op.
    let trades_before = market.trades.len();
    let empty_result = market.match_recommendation(Vec::new());
    assert!(empty_result.is_empty());
    assert_eq!(market.trades.len(), trades_before);
}

/// P3: the market's accumulated fee always equals the sum of per-trade fees.
#[test]
fn p3_accumulated_fee_matches_sum_of_trade_fees() {
    use gridtokenx_blockchain::FeeType;

    let policy = FeePolicy { fee_type: FeeType::Constant, constant_fee_per_kwh: 0.75, percentage_fee: 0.0 };
    let mut market = Market::new("fees", Utc::now(), true, policy);
    let offer1 = market.offer(10.0, 2.0, "seller-1", false).unwrap();
    let offer2 = market.offer(20.0, 3.0, "seller-2", false).unwrap();
    market.accept_offer(&offer1.id, "buyer-1", None, None, None, false).unwrap();
    market.accept_offer(&offer2.id, "buyer-2", Some(1.0), None, None, false).unwrap();

    let total_fee: f64 = market.trades.iter().map(|t| t.fee_price).sum();
    assert!((total_fee - market.accumulated_fee()).abs() < 1e-8);
}

/// P4/P5: storage FIFO lot accounting stays consistent with `used_storage`
/// through a buy followed by a sell, and never drops below the SoC floor.
#[test]
fn p4_p5_storage_lots_track_used_storage_through_buy_and_sell() {
    let mut market = Market::new("storage-lots", Utc::now(), true, FeePolicy::none());
    let state = StorageState::new(10.0, 5.0, 0.1, 0.0);
    let mut storage = StorageStrategy::new("storage-1", storage_config(24.9), state).unwrap();

    let offer = market.offer(5.0 * 2.0, 2.0, "market-maker", false).unwrap();
    let trade = market.accept_offer(&offer.id, "storage-1", None, None, None, false).unwrap();
    storage.event_bid_traded(&trade, "area-root");

    let lot_sum: f64 = storage.state.lots().map(|(_, kwh)| kwh).sum();
    assert!((lot_sum - storage.state.used_storage_kwh).abs() < 1e-6);
    assert!(storage.state.used_storage_kwh >= 0.1 * storage.state.capacity_kwh - 1e-6);

    let sell_offer = market.offer(8.0 * 1.0, 1.0, "storage-1", false).unwrap();
    let sell_trade = market.accept_offer(&sell_offer.id, "buyer-x", None, None, None, false).unwrap();
    storage.event_trade(&sell_trade).unwrap();

    let lot_sum_after: f64 = storage.state.lots().map(|(_, kwh)| kwh).sum();
    assert!((lot_sum_after - storage.state.used_storage_kwh).abs() < 1e-6);
}
