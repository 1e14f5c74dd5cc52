use anyhow::{Context, Result};
use log::{info, warn};

use pow_ledger::blockchain::{Amount, Ledger, Transaction, Wallet};
use pow_ledger::LedgerConfig;

// Load the config file given as the first argument, or defaults
fn load_config() -> Result<LedgerConfig> {
    match std::env::args().nth(1) {
        Some(path) => LedgerConfig::load(&path).with_context(|| format!("loading config from {}", path)),
        None => LedgerConfig::from_env().context("reading config from environment"),
    }
}

fn main() -> Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = load_config()?;
    info!(
        "Starting ledger with difficulty {:?} and reward {}",
        config.difficulty, config.mining_reward
    );

    let miner = Wallet::new();
    let recipient = Wallet::new();
    info!("Miner address: {}", miner.address());
    info!("Recipient address: {}", recipient.address());

    let ledger = Ledger::from_config(miner.address().clone(), &config)?;
    info!("Miner balance after genesis: {}", ledger.get_balance(miner.address())?);

    let mut transfer = Transaction::new(
        miner.address().clone(),
        recipient.address().clone(),
        Amount::from_coins(0.5),
    )?;
    transfer.sign(&miner)?;
    ledger.submit_transaction(transfer)?;
    info!("Pending transactions: {}", ledger.get_pending_transactions()?.len());

    let block = ledger.mine_block()?;
    info!("Mined block {} with {} transactions", block.number, block.transactions.len());

    info!("Miner balance: {}", ledger.get_balance(miner.address())?);
    info!("Recipient balance: {}", ledger.get_balance(recipient.address())?);

    match ledger.validate_chain() {
        Ok(_) => info!("Chain of {} blocks is valid", ledger.len()?),
        Err(err) => warn!("Chain is invalid: {}", err),
    }

    println!("{}", serde_json::to_string_pretty(&ledger.get_chain()?)?);
    Ok(())
}
