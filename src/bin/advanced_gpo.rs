//! Configure GPO modes, then pulse output 3 while inventorying

use clap::Parser;
use colored::Colorize;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;

use rfid_gw::cli::{self, Gateway, ReaderArgs};
use rfid_gw::settings::{self, GpoMode};
use rfid_gw::Error;

const PULSE_PORT: u16 = 3;
const PULSE_DURATION_MS: u32 = 1000;
const PULSES: usize = 5;
const PULSE_INTERVAL: Duration = Duration::from_secs(3);

/// Status-driven GPOs plus a pulsed output
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    reader: ReaderArgs,
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

    let result = run(&gateway).await;
    gateway.shutdown().await;
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => cli::report_fatal(&e),
    }
}

async fn run(gateway: &Gateway) -> Result<(), Error> {
    let session = &gateway.session;

    println!("Configuring general purpose outputs.");
    let mut settings = settings::query_default(session).await?;
    let gpo_count = settings.gpos.len();

    settings
        .set_gpo_mode(1, GpoMode::ReaderInventoryTagsStatus)
        .set_gpo_mode(2, GpoMode::LlrpConnectionStatus)
        .set_gpo_mode(
            PULSE_PORT,
            GpoMode::Pulsed {
                pulse_duration_ms: PULSE_DURATION_MS,
            },
        );
    // R700 has only three outputs
    if gpo_count == 4 {
        settings.set_gpo_mode(4, GpoMode::Normal);
    }

    settings::apply(session, &settings).await?;
    gateway.manager.start(session).await?;

    for pulse in 1..=PULSES {
        settings::set_gpo(session, PULSE_PORT, true).await?;
        info!("💡 GPO {} pulse {}/{}", PULSE_PORT, pulse, PULSES);
        tokio::time::sleep(PULSE_INTERVAL).await;
    }

    cli::wait_for_enter("Press enter to exit.").await;
    Ok(())
}
