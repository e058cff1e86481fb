use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use log::debug;

use crate::blockchain::config::{self, DEFAULT_DATA_DIR, DEFAULT_SUBSIDY};
use crate::blockchain::pow::DEFAULT_DIFFICULTY;
use crate::blockchain::{Address, Blockchain, Config, Wallets};

#[derive(Parser, Debug)]
#[command(name = "linkchain")]
#[command(about = "Single-node UTXO blockchain")]
pub struct Cli {
    /// Directory holding the chain store and the wallet file
    #[arg(long, global = true, env = "LINKCHAIN_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Leading zero bits required of every block hash, fixed when the chain is created
    #[arg(long, global = true, env = "LINKCHAIN_DIFFICULTY", default_value_t = DEFAULT_DIFFICULTY)]
    difficulty: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a blockchain and send the genesis reward to ADDRESS
    #[command(name = "createblockchain")]
    CreateBlockchain {
        #[arg(long)]
        address: String,
    },

    /// Generate a new key pair and store it in the wallet file
    #[command(name = "createwallet")]
    CreateWallet,

    /// List the addresses in the wallet file
    #[command(name = "listaddresses")]
    ListAddresses,

    /// Print every block from the tip back to genesis
    #[command(name = "printchain")]
    PrintChain,

    /// Get the balance of ADDRESS
    #[command(name = "getbalance")]
    GetBalance {
        #[arg(long)]
        address: String,
    },

    /// Send AMOUNT coins from FROM to TO
    #[command(name = "send")]
    Send {
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        #[arg(long, allow_negative_numbers = true)]
        amount: i64,
    },
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let config = Config {
            data_dir: self.data_dir.clone(),
            difficulty: self.difficulty,
            subsidy: DEFAULT_SUBSIDY,
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_address(input: &str) -> Result<Address> {
    input
        .parse()
        .with_context(|| format!("'{}' is not a valid address", input))
}

/// Runs one command against the store described by the arguments
pub fn run(cli: Cli) -> Result<()> {
    let config = cli.config()?;
    debug!("Using {:?}", config);

    match &cli.command {
        Command::CreateBlockchain { address } => create_blockchain(&config, address),
        Command::CreateWallet => create_wallet(&config),
        Command::ListAddresses => list_addresses(&config),
        Command::PrintChain => print_chain(&config),
        Command::GetBalance { address } => get_balance(&config, address),
        Command::Send { from, to, amount } => send(&config, from, to, *amount),
    }
}

fn create_blockchain(config: &Config, address: &str) -> Result<()> {
    let address = parse_address(address)?;
    Blockchain::open(config, &address).context("failed to create blockchain")?;

    println!("Done!");
    Ok(())
}

fn create_wallet(config: &Config) -> Result<()> {
    let mut wallets = Wallets::load(config.wallet_path())?;
    let address = wallets.create_wallet();
    wallets.save()?;

    println!("Your new address: {}", address);
    Ok(())
}

fn list_addresses(config: &Config) -> Result<()> {
    let wallets = Wallets::load(config.wallet_path())?;
    for address in wallets.addresses() {
        println!("{}", address);
    }
    Ok(())
}

fn print_chain(config: &Config) -> Result<()> {
    let chain = Blockchain::open_existing(config)?;

    for block in chain.iter() {
        let block = block?;
        let mined_at = Utc
            .timestamp_opt(block.timestamp, 0)
            .single()
            .map(|time| time.to_rfc3339())
            .unwrap_or_else(|| block.timestamp.to_string());

        println!("============ Block {} ============", hex::encode(block.hash));
        println!("Timestamp: {}", mined_at);
        match &block.prev_hash {
            Some(prev_hash) => println!("Prev. hash: {}", hex::encode(prev_hash)),
            None => println!("Prev. hash: (genesis)"),
        }
        println!("Nonce: {}", block.nonce);
        println!(
            "PoW: {} (difficulty {})",
            chain.validate_block(&block)?,
            chain.difficulty()
        );
        for tx in &block.transactions {
            print!("{}", tx);
        }
        println!();
    }

    Ok(())
}

fn get_balance(config: &Config, address: &str) -> Result<()> {
    let address = parse_address(address)?;
    let chain = Blockchain::open_existing(config)?;
    let balance = chain.get_balance(&address)?;

    println!("Balance of '{}': {}", address, balance);
    Ok(())
}

fn send(config: &Config, from: &str, to: &str, amount: i64) -> Result<()> {
    let amount = config::parse_amount(amount)?;
    let from = parse_address(from)?;
    let to = parse_address(to)?;

    let wallets = Wallets::load(config.wallet_path())?;
    let wallet = wallets.get(&from)?;

    let mut chain = Blockchain::open_existing(config)?;
    chain
        .send(wallet, &to, amount)
        .with_context(|| format!("failed to send {} from {} to {}", amount, from, to))?;

    println!("Success!");
    Ok(())
}
