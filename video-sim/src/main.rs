//! Command-line entry point: `video-sim [config.json]`
//!
//! Prints the run statistics as JSON on stdout.

use log::{error, LevelFilter};
use video_sim::{init_logging, run, SimConfig, SimError};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logging(LevelFilter::Info);

    if let Err(err) = simulate().await {
        error!("{}", err);
        std::process::exit(1);
    }
}

async fn simulate() -> Result<(), SimError> {
    let config = match std::env::args().nth(1) {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };

    let stats = run(&config).await?;
    println!("{}", stats.to_json()?);
    Ok(())
}
