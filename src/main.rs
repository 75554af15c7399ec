//! RFID GW - interactive console for one fixed reader
//!
//! Connects to a reader, prints tags as they are reported and accepts
//! commands to start/stop inventory, configure antenna 1, drive GPOs and save
//! the active settings.

use clap::Parser;
use colored::Colorize;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

use rfid_gw::cli::{self, Gateway, LineReader, ReaderArgs};
use rfid_gw::settings::{self, RxSensitivity, Settings, TxPower};
use rfid_gw::tags::TagRead;
use rfid_gw::{Error, EventKind, ReaderEvent, ReaderSession};

/// RFID GW - connect to an Impinj reader and inventory tags
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    reader: ReaderArgs,
}

/// Tags seen since the last `clear`, keyed by EPC
#[derive(Default)]
struct TagLog {
    seen: BTreeMap<String, TagSighting>,
}

struct TagSighting {
    count: u64,
    last: TagRead,
}

impl TagLog {
    fn record(&mut self, read: &TagRead) {
        self.seen
            .entry(read.epc.to_hex())
            .and_modify(|s| {
                s.count += 1;
                s.last = read.clone();
            })
            .or_insert_with(|| TagSighting {
                count: 1,
                last: read.clone(),
            });
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if let Err(e) = cli::init_logging(&args.reader.log_level, args.reader.log_json) {
        eprintln!("{}: {:#}", "logging".red().bold(), e);
        return ExitCode::FAILURE;
    }

    info!("Starting RFID GW...");
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
    let tag_log = Arc::new(Mutex::new(TagLog::default()));

    // Append only; printing happens on the console task below
    let log = Arc::clone(&tag_log);
    session.subscribe(EventKind::TagReported, move |event| {
        if let ReaderEvent::TagsReported(report) = event {
            let mut log = log.lock();
            for read in &report.tags {
                log.record(read);
            }
        }
        Ok(())
    })?;
    for kind in [EventKind::ReaderStarted, EventKind::ReaderStopped] {
        session.subscribe(kind, |event| {
            match event {
                ReaderEvent::ReaderStarted { at } => info!("▶️  Reader started at {}", at),
                ReaderEvent::ReaderStopped { at } => info!("⏹️  Reader stopped at {}", at),
                _ => {},
            }
            Ok(())
        })?;
    }

    let (_printer, mut reports) = session.subscribe_channel(EventKind::TagReported)?;
    tokio::spawn(async move {
        while let Some(ReaderEvent::TagsReported(report)) = reports.recv().await {
            for read in &report.tags {
                println!("{}", format_read(read));
            }
        }
    });

    apply_saved_settings(gateway).await;

    println!(
        "{} {} - type {} for commands",
        "Connected to".green(),
        session.address().bold(),
        "help".cyan()
    );

    let mut lines = LineReader::spawn("rfid> ").map_err(Error::Config)?;
    while let Some(line) = lines.next_line().await {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, rest)) = words.split_first() else {
            continue;
        };

        match command {
            "quit" | "exit" => break,
            "help" => print_help(),
            "start" => report(gateway.manager.start(session).await.map_err(Error::from)),
            "stop" => report(gateway.manager.stop(session).await.map_err(Error::from)),
            "status" => print_status(session, &tag_log),
            "cfg" => report(configure_antenna(gateway).await),
            "save" => report(save_settings(gateway).await),
            "gpo" => report(drive_gpo(session, rest).await),
            "tags" => print_tags(&tag_log),
            "clear" => {
                tag_log.lock().seen.clear();
                println!("Tag log cleared");
            },
            other => println!("Unknown command '{}', type {}", other, "help".cyan()),
        }
    }

    Ok(())
}

/// Mid-session failures are printed; the session carries on
fn report(result: Result<(), Error>) {
    if let Err(e) = result {
        println!("{}: {}", e.kind().red(), e);
    }
}

async fn apply_saved_settings(gateway: &Gateway) {
    let path = Path::new(&gateway.config.reader.settings_file);
    if !gateway.config.reader.apply_saved_settings || !path.exists() {
        return;
    }

    let result = async {
        let saved = settings::load(path).await?;
        settings::apply(&gateway.session, &saved).await?;
        Ok::<_, Error>(())
    }
    .await;

    match result {
        Ok(()) => info!("Applied saved settings from {}", path.display()),
        Err(e) => warn!("Saved settings in {} not applied: {}", path.display(), e),
    }
}

/// Settings to edit: the active snapshot, or whatever the reader runs now
async fn working_settings(session: &ReaderSession) -> Result<Settings, Error> {
    match session.active_settings() {
        Some(settings) => Ok(settings),
        None => Ok(settings::query_current(session).await?),
    }
}

/// Antenna 1 at 30.5 dBm / -80 dBm, then persist
async fn configure_antenna(gateway: &Gateway) -> Result<(), Error> {
    let mut settings = working_settings(&gateway.session).await?;
    if let Some(antenna) = settings.antenna_mut(1) {
        antenna.is_enabled = true;
        antenna.tx_power = TxPower::Dbm(30.5);
        antenna.rx_sensitivity = RxSensitivity::Dbm(-80.0);
    }

    settings::apply(&gateway.session, &settings).await?;
    settings::persist(&settings, &gateway.config.reader.settings_file).await?;
    println!(
        "Antenna 1 set to 30.5 dBm / -80 dBm, saved to {}",
        gateway.config.reader.settings_file
    );
    Ok(())
}

async fn save_settings(gateway: &Gateway) -> Result<(), Error> {
    let settings = working_settings(&gateway.session).await?;
    settings::persist(&settings, &gateway.config.reader.settings_file).await?;
    println!("Settings saved to {}", gateway.config.reader.settings_file);
    Ok(())
}

async fn drive_gpo(session: &ReaderSession, args: &[&str]) -> Result<(), Error> {
    let parsed = match args {
        [port, state] => port.parse::<u16>().ok().zip(match *state {
            "on" | "high" | "1" => Some(true),
            "off" | "low" | "0" => Some(false),
            _ => None,
        }),
        _ => None,
    };
    let Some((port, state)) = parsed else {
        println!("usage: gpo <port> <on|off>");
        return Ok(());
    };

    settings::set_gpo(session, port, state).await?;
    println!("GPO {} {}", port, if state { "on".green() } else { "off".yellow() });
    Ok(())
}

fn format_read(read: &TagRead) -> String {
    let mut line = format!("EPC : {}", read.epc.to_hex_words().cyan());
    if let Some(antenna) = read.antenna_port {
        line.push_str(&format!("  ant {}", antenna));
    }
    if let Some(rssi) = read.peak_rssi_dbm {
        line.push_str(&format!("  {:.1} dBm", rssi));
    }
    line
}

fn print_status(session: &ReaderSession, tag_log: &Mutex<TagLog>) {
    let unique = tag_log.lock().seen.len();
    let stats = session.events().stats();

    println!("{}", "=== Reader Status ===".bold().cyan());
    println!("  Address:   {}", session.address());
    println!("  State:     {}", session.state().to_string().green());
    println!("  Connected: {}", session.connected_at().format("%Y-%m-%d %H:%M:%S UTC"));
    match session.capabilities() {
        Some(caps) => println!(
            "  Model:     {} ({} antennas, {} GPOs, {} GPIs)",
            caps.model, caps.antenna_count, caps.gpo_count, caps.gpi_count
        ),
        None => println!("  Model:     (not queried yet)"),
    }
    if let Some(settings) = session.active_settings() {
        let enabled: Vec<String> = settings
            .enabled_antennas()
            .map(|a| a.port.to_string())
            .collect();
        println!("  Antennas:  {}", enabled.join(", "));
    }
    println!("  Tags seen: {}", unique);
    println!(
        "  Events:    {} delivered, {} handler failures",
        stats.delivered, stats.handler_failures
    );
}

fn print_tags(tag_log: &Mutex<TagLog>) {
    // Copy out so printing does not hold the lock
    let rows: Vec<(String, u64)> = tag_log
        .lock()
        .seen
        .values()
        .map(|s| (format_read(&s.last), s.count))
        .collect();

    if rows.is_empty() {
        println!("No tags seen");
        return;
    }
    for (line, count) in rows {
        println!("{}  x{}", line, count);
    }
}

fn print_help() {
    println!("{}", "Commands:".bold());
    println!("  start              begin inventory");
    println!("  stop               end inventory");
    println!("  status             session and delivery summary");
    println!("  cfg                antenna 1 to 30.5 dBm / -80 dBm, apply and save");
    println!("  save               write the active settings to the settings file");
    println!("  gpo <port> <on|off>");
    println!("  tags               tags seen since the last clear");
    println!("  clear              forget seen tags");
    println!("  quit               stop, disconnect and exit");
}
