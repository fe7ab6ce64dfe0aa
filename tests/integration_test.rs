// ========================================
// INTEGRATION TESTS FOR O PEG
// ========================================
//
// Test Scenarios:
// 1. Gaussian Outlier Rejection (OUSD)
// 2. Invite Economics (sent / completed)
// 3. Exchange-Rate Significance Gate
// 4. Stability State Machine & Issuance Debounce
// 5. Deterministic Recipient Selection Across Nodes
// 6. Database Persistence & Recovery
// 7. Configuration Round Trip
//
// Usage:
//   cargo test --test integration_test -- --test-threads=1 --nocapture
//
// ========================================

use std::sync::Arc;

use opeg_core::{
    BlockContext, Hash256, MeasurementSource, MeasurementType, PegConfig, StaticDirectory,
    UserDirectory, MICRO_PER_UNIT,
};
use opeg_engine::PegEngine;
use opeg_measurement::{
    ContainerVolume, ExchangeRateSubmission, MeasurementInvite, MeasurementSystem, RejectReason,
    WaterPriceSubmission,
};
use opeg_stabilization::{StabilityStatus, StabilizationMining};
use opeg_store::{KvStore, MemoryStore, SledStore};

const NOW: u64 = 1_750_000_000;

fn directory() -> Arc<dyn UserDirectory> {
    Arc::new(
        StaticDirectory::new()
            .with_population("OUSD", 40)
            .with_population("OEUR", 400)
            .with_population("OJPY", 400),
    )
}

fn invite<S: KvStore>(system: &MeasurementSystem<S>, kind: MeasurementType, currency: &str) -> MeasurementInvite {
    system
        .create_invites(1, kind, Some(currency), NOW, 1)
        .expect("invite issued")
        .remove(0)
}

fn water(invite: &MeasurementInvite, price_micro: u64) -> WaterPriceSubmission {
    WaterPriceSubmission {
        submitter: invite.invited_user.clone(),
        currency: invite.currency.clone().unwrap_or_default(),
        price_micro,
        volume: ContainerVolume::liter(),
        proof: "https://grocer.example/water-1l".to_string(),
        source: MeasurementSource::UserOnline,
        timestamp: NOW,
        block_height: 1,
        invite_id: invite.id,
    }
}

fn exchange(invite: &MeasurementInvite, to: &str, rate_micro: u64) -> ExchangeRateSubmission {
    ExchangeRateSubmission {
        submitter: invite.invited_user.clone(),
        from_currency: invite.currency.clone().unwrap_or_default(),
        to_currency: to.to_string(),
        rate_micro,
        proof: "https://fx.example/o-rates".to_string(),
        source: MeasurementSource::BotOnline,
        timestamp: NOW,
        block_height: 1,
        invite_id: invite.id,
    }
}

/// Five water prices and five exchange rates for `currency`
fn seed_currency<S: KvStore>(system: &MeasurementSystem<S>, currency: &str, fiat: &str, water_micro: u64) {
    for _ in 0..5 {
        let w = invite(system, MeasurementType::WaterPrice, currency);
        system.submit_water_price(water(&w, water_micro), NOW).expect("water accepted");
        let x = invite(system, MeasurementType::ExchangeRate, currency);
        system
            .submit_exchange_rate(exchange(&x, fiat, MICRO_PER_UNIT), NOW)
            .expect("rate accepted");
    }
}

// ========================================
// TEST 1: GAUSSIAN OUTLIER REJECTION
// ========================================
#[test]
fn test_ousd_outlier_rejected() {
    println!("\n🧪 TEST 1: Gaussian Outlier Rejection");
    println!("================================================\n");

    let system = MeasurementSystem::open(MemoryStore::new(), directory(), &PegConfig::default()).unwrap();
    let prices = [1_000_000, 1_010_000, 990_000, 1_000_000, 1_020_000];
    for price in prices {
        let inv = invite(&system, MeasurementType::WaterPrice, "OUSD");
        system.submit_water_price(water(&inv, price), NOW).unwrap();
        println!("✅ Accepted {:.2}", price as f64 / 1e6);
    }

    let spam = invite(&system, MeasurementType::WaterPrice, "OUSD");
    let err = system.submit_water_price(water(&spam, 5_000_000), NOW).unwrap_err();
    println!("🛡️ Rejected 5.00: {}", err);
    assert!(matches!(err.reject_reason(), Some(RejectReason::OutOfRange { .. })));
    assert!(system.is_invite_valid(&spam.id, NOW), "A rejected submission keeps its invite");

    let avg = system.average_water_price("OUSD", 7, NOW).unwrap();
    println!("📊 Average: {}", avg);
    assert_eq!(avg, 1_004_000, "Average must stay near 1.00");
}

// ========================================
// TEST 2: INVITE ECONOMICS
// ========================================
#[test]
fn test_one_invite_one_completion() {
    println!("\n🧪 TEST 2: Invite Economics");
    println!("================================================\n");

    let system = MeasurementSystem::open(MemoryStore::new(), directory(), &PegConfig::default()).unwrap();
    let inv = invite(&system, MeasurementType::WaterPrice, "OEUR");
    system.submit_water_price(water(&inv, 1_100_000), NOW).unwrap();

    let rate = system.conversion_rate(Some("OEUR"), MeasurementType::WaterPrice);
    println!("📨 sent {} / completed {} -> {} ppm", rate.invites_sent, rate.measurements_completed, rate.rate_ppm);
    assert_eq!(rate.invites_sent, 1);
    assert_eq!(rate.measurements_completed, 1);
    assert_eq!(rate.rate_ppm, 1_000_000);

    let reuse = system.submit_water_price(water(&inv, 1_100_000), NOW + 1).unwrap_err();
    assert_eq!(reuse.reject_reason(), Some(&RejectReason::InviteUsed), "Invite is single-use");
}

// ========================================
// TEST 3: EXCHANGE-RATE SIGNIFICANCE GATE
// ========================================
#[test]
fn test_exchange_rate_needs_five_samples() {
    println!("\n🧪 TEST 3: Exchange-Rate Significance Gate");
    println!("================================================\n");

    let system = MeasurementSystem::open(MemoryStore::new(), directory(), &PegConfig::default()).unwrap();
    for n in 1..=5 {
        let inv = invite(&system, MeasurementType::ExchangeRate, "OJPY");
        system.submit_exchange_rate(exchange(&inv, "JPY", 150_000_000), NOW).unwrap();
        let avg = system.average_exchange_rate("OJPY", "JPY", 7, NOW);
        println!("📈 {} samples -> {:?}", n, avg);
        if n < 5 {
            assert_eq!(avg, None, "No data below significance, never zero");
        } else {
            assert_eq!(avg, Some(150_000_000));
        }
    }
}

// ========================================
// TEST 4: STABILITY STATE MACHINE
// ========================================
#[test]
fn test_stability_and_issuance_debounce() {
    println!("\n🧪 TEST 4: Stability State Machine & Issuance Debounce");
    println!("================================================\n");

    let engine = PegEngine::open(MemoryStore::new(), directory(), PegConfig::default()).unwrap();
    seed_currency(engine.measurement(), "OUSD", "USD", 1_400_000);
    seed_currency(engine.measurement(), "OEUR", "EUR", 1_000_000);
    seed_currency(engine.measurement(), "OJPY", "JPY", 1_000_000);

    let block = |height: u64| {
        BlockContext::new(height, NOW + height, Hash256([(height % 251) as u8; 32])).with_volume("OUSD", 2_000_000)
    };

    engine.process_block(&block(1)).unwrap();
    let info = engine.stability_status("OUSD").unwrap();
    println!("📉 OUSD ratio {} ppm -> {}", info.stability_ratio_ppm, info.status);
    assert_eq!(info.status, StabilityStatus::Unstable);
    assert_eq!(info.unstable_since_height, Some(1));
    assert_eq!(engine.stability_status("OEUR").unwrap().stability_ratio_ppm, 0);

    for height in 2..145 {
        let report = engine.process_block(&block(height)).unwrap();
        assert!(report.transactions.is_empty(), "Debounced at height {}", height);
    }
    let report = engine.process_block(&block(145)).unwrap();
    assert_eq!(report.transactions.len(), 1);
    let tx = &report.transactions[0];
    // 2,000,000 * |1 - 0.4| * 0.10 = 120,000 -> wants 1,200 recipients
    assert_eq!(tx.coins_created, 120_000);
    assert_eq!(tx.outputs.len(), 800, "Capped by the 800-user stable pool");
    assert_eq!(tx.outputs[0].amount, 150);
    println!("🏦 tx {} issued {} coins", hex::encode(tx.tx_id.as_bytes()), tx.coins_created);

    let json = serde_json::to_string(tx).unwrap();
    assert!(json.contains("\"currency\":\"OUSD\""));
}

// ========================================
// TEST 5: DETERMINISTIC RECIPIENTS
// ========================================
#[test]
fn test_nodes_agree_on_recipients() {
    println!("\n🧪 TEST 5: Deterministic Recipient Selection Across Nodes");
    println!("================================================\n");

    let node = || {
        let mut m = StabilizationMining::new(PegConfig::default().stabilization, directory());
        m.update_stability_status("OEUR", MICRO_PER_UNIT, MICRO_PER_UNIT, MICRO_PER_UNIT, 1);
        m.update_stability_status("OJPY", MICRO_PER_UNIT, MICRO_PER_UNIT, MICRO_PER_UNIT, 1);
        m.update_stability_status("OUSD", MICRO_PER_UNIT, 700_000, MICRO_PER_UNIT, 1);
        m
    };
    let (a, b) = (node(), node());
    let block = BlockContext::new(200, NOW, Hash256([42u8; 32])).with_volume("OUSD", 5_000_000);

    let plan_a = a.plan_stabilization_transactions(&block).unwrap();
    let plan_b = b.plan_stabilization_transactions(&block).unwrap();
    assert_eq!(plan_a, plan_b, "Every validator computes the same plan");
    b.validate_stabilization_transactions(&block, &plan_a).unwrap();
    println!("✅ {} recipients agreed", plan_a[0].outputs.len());

    assert_eq!(a.calculate_optimal_recipient_count(100_000), 1_000);
    assert_eq!(a.calculate_optimal_recipient_count(1), 10);
    assert_eq!(a.calculate_optimal_recipient_count(u128::MAX), 50_000);
}

// ========================================
// TEST 6: DATABASE PERSISTENCE
// ========================================
#[test]
fn test_database_persistence() {
    println!("\n🧪 TEST 6: Database Persistence & Recovery");
    println!("================================================\n");

    let dir = tempfile::tempdir().unwrap();
    let spare = {
        let store = SledStore::open(dir.path()).unwrap();
        let system = MeasurementSystem::open(store, directory(), &PegConfig::default()).unwrap();
        seed_currency(&system, "OEUR", "EUR", 1_000_000);
        let spare = invite(&system, MeasurementType::WaterPrice, "OEUR");
        system.store().flush().unwrap();
        println!("💾 Wrote 10 observations and 11 invites");
        spare
    };

    let store = SledStore::open(dir.path()).unwrap();
    let system = MeasurementSystem::open(store, directory(), &PegConfig::default()).unwrap();
    assert_eq!(system.average_water_price("OEUR", 30, NOW), Some(1_000_000));
    assert_eq!(system.average_exchange_rate("OEUR", "EUR", 7, NOW), Some(1_000_000));
    assert!(system.is_invite_valid(&spare.id, NOW), "Unused invite survives restart");
    let rate = system.conversion_rate(Some("OEUR"), MeasurementType::WaterPrice);
    assert_eq!((rate.invites_sent, rate.measurements_completed), (6, 5));
    println!("✅ State recovered");
}

// ========================================
// TEST 7: CONFIGURATION ROUND TRIP
// ========================================
#[test]
fn test_config_round_trip() {
    println!("\n🧪 TEST 7: Configuration Round Trip");
    println!("================================================\n");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("opeg.toml");
    let mut config = PegConfig::default();
    config.stabilization.unstable_time_range = 288;
    config.save_to_file(&path).unwrap();

    let loaded = PegConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
    let engine = PegEngine::open(MemoryStore::new(), directory(), loaded).unwrap();
    assert_eq!(engine.config().stabilization.unstable_time_range, 288);
}
