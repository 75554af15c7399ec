//! Toggle every general-purpose output of a reader in turn

use clap::Parser;
use colored::Colorize;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;

use rfid_gw::cli::{self, Gateway, ReaderArgs};
use rfid_gw::settings;
use rfid_gw::Error;

/// Pulse each GPO high for 1.5 s, one after the other
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    reader: ReaderArgs,

    /// How long each output stays high, in milliseconds
    #[arg(long, default_value = "1500")]
    hold_ms: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    if let Err(e) = cli::init_logging(&args.reader.log_level, args.reader.log_json) {
        eprintln!("{}: {:#}", "logging".red().bold(), e);
        return ExitCode::FAILURE;
    }

    let gateway = match Gateway::connect(&args.reader).await {
        Ok(gateway) => gateway,
        Err(e) => return cli::report_fatal(&e),
    };

    let result = run(&gateway, Duration::from_millis(args.hold_ms)).await;
    gateway.shutdown().await;
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => cli::report_fatal(&e),
    }
}

async fn run(gateway: &Gateway, hold: Duration) -> Result<(), Error> {
    let session = &gateway.session;

    let defaults = settings::query_default(session).await?;
    let gpo_count = defaults.gpos.len() as u16;
    settings::apply(session, &defaults).await?;

    println!("Setting general purpose outputs...");
    for port in 1..=gpo_count {
        settings::set_gpo(session, port, true).await?;
        info!("💡 GPO {} high", port);
        tokio::time::sleep(hold).await;
        settings::set_gpo(session, port, false).await?;
    }

    cli::wait_for_enter("Press enter to exit.").await;
    Ok(())
}
