//! GridTokenX market core - demo driver
//!
//! A small CLI around the market-and-matching core: it can emit a default
//! `MarketConfig` and run a short single-slot simulation exercising a PV-like
//! offer, a storage device, and the matching engine, to sanity-check a
//! configuration end to end.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use gridtokenx_blockchain::{
    select_matcher, FeePolicy, FeeType, Market, MarketConfig, StorageState, StorageStrategy,
    StorageStrategyConfig,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "gridtokenx-market")]
#[command(about = "GridTokenX market core - matching and pricing demo driver")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file (or load and validate an existing one).
    InitConfig {
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Run a short single-slot demo: a PV-like offer, a storage device, and
    /// the configured matching algorithm.
    Run {
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::InitConfig { config }) => init_config(&config),
        Some(Commands::Run { config }) => run_demo(&config),
        None => run_demo("config.toml"),
    }
}

fn init_config(path: &str) -> Result<()> {
    let config = MarketConfig::load(path)?;
    info!(path, "configuration ready");
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// A minimal one-slot demonstration: a PV posts a decreasing offer, a
/// storage device posts a buy bid and a sell offer, the configured matcher
/// clears the book, and the resulting trades are printed.
fn run_demo(config_path: &str) -> Result<()> {
    let config = MarketConfig::load(config_path)?;
    config.validate()?;

    let fee_policy = match config.grid_fees.fee_type {
        FeeType::Constant => FeePolicy {
            fee_type: FeeType::Constant,
            constant_fee_per_kwh: config.grid_fees.constant_fee_per_kwh,
            percentage_fee: 0.0,
        },
        FeeType::Percentage => FeePolicy {
            fee_type: FeeType::Percentage,
            constant_fee_per_kwh: 0.0,
            percentage_fee: config.grid_fees.percentage_fee,
        },
    };

    let mut market = Market::new("demo-slot", Utc::now(), true, fee_policy);

    let pv_energy = 5.0;
    let pv_rate = config.market_maker_rate;
    market.offer(pv_rate * pv_energy, pv_energy, "pv-1", true)?;
    info!(rate = pv_rate, energy = pv_energy, "pv offer posted");

    let s = &config.storage;
    let state = StorageState::new(s.battery_capacity_kwh, s.max_abs_battery_power_kw, s.min_allowed_soc, s.initial_soc);
    let strategy_config = StorageStrategyConfig {
        initial_selling_rate: s.initial_selling_rate,
        final_selling_rate: s.final_selling_rate,
        initial_buying_rate: s.initial_buying_rate,
        final_buying_rate: s.final_buying_rate,
        fit_to_limit: s.fit_to_limit,
        energy_rate_change_per_update: s.energy_rate_change_per_update,
        cap_price_strategy: s.cap_price_strategy,
        sell_on_most_expensive_market: s.sell_on_most_expensive_market,
        alternative_pricing_scheme: config.alternative_pricing_scheme,
        market_maker_rate: config.market_maker_rate,
        slot_length_seconds: config.slot_length_seconds,
        update_interval_seconds: config.update_interval_seconds,
    };
    let mut storage = StorageStrategy::new("storage-1", strategy_config, state)?;
    {
        let mut markets: Vec<&mut Market> = vec![&mut market];
        storage.event_market_cycle(&mut markets, 1.0)?;
    }

    let matcher = select_matcher(config.matching_algorithm)?;
    let bids: Vec<_> = market.bids().cloned().collect();
    let offers: Vec<_> = market.offers().cloned().collect();
    let recommendations = matcher.calculate_match_recommendation(&bids, &offers);
    info!(count = recommendations.len(), "recommendations computed");
    let results = market.match_recommendation(recommendations);

    let traded: usize = results.iter().filter(|r| r.is_ok()).count();
    println!("matching algorithm: {:?}", config.matching_algorithm);
    println!("pairs settled: {traded}/{}", results.len());
    println!("trades recorded: {}", market.trades.len());
    println!("accumulated fee: {:.4}", market.accumulated_fee());

    Ok(())
}
