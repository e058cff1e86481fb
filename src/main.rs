use clap::Parser;
use log::error;

mod blockchain;
mod cli;

fn main() {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args = cli::Cli::parse();

    if let Err(err) = cli::run(args) {
        error!("{:#}", err);
        std::process::exit(1);
    }
}
