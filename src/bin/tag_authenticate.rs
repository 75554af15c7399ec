//! Ask tags to encrypt a challenge with the Impinj Authenticate command

use clap::Parser;
use colored::Colorize;
use std::process::ExitCode;
use tokio::sync::mpsc::UnboundedReceiver;

use rfid_gw::cli::{self, Gateway, ReaderArgs};
use rfid_gw::ops::{self, OpOutcome, TagOp, TagOpResult, TagOpSequence, TargetTag};
use rfid_gw::settings;
use rfid_gw::tags::TagData;
use rfid_gw::{Error, EventKind, ReaderEvent};

/// 48-bit message the tag encrypts; the content is arbitrary
const CHALLENGE: &str = "A1B1C1D1E1F1";

/// Run Impinj Authenticate against every tag in the field (R700 only)
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    reader: ReaderArgs,

    /// Only authenticate tags whose EPC starts with this hex prefix
    #[arg(long)]
    target_epc: Option<TagData>,
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

    let result = run(&gateway, args.target_epc).await;
    gateway.shutdown().await;
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => cli::report_fatal(&e),
    }
}

async fn run(gateway: &Gateway, target_epc: Option<TagData>) -> Result<(), Error> {
    let session = &gateway.session;

    let model = settings::query_default(session).await?.model;
    if !model.supports_authenticate() {
        gateway.manager.disconnect(session).await;
        println!(
            "Apologies; your {} does not support Impinj Authenticate. Expected: an R7xx Impinj reader.",
            model
        );
        return Ok(());
    }

    let (_reads, reads) = session.subscribe_channel(EventKind::TagReported)?;
    let (_results, results) = session.subscribe_channel(EventKind::TagOpComplete)?;
    tokio::spawn(print_events(reads, results));

    settings::apply_default(session).await?;

    let challenge = TagData::from_hex(CHALLENGE).map_err(|e| Error::Config(e.into()))?;
    let mut sequence = TagOpSequence::new().with_op(TagOp::Authenticate {
        challenge: Some(challenge),
        include_tid_in_reply: true,
    });
    if let Some(epc) = target_epc {
        sequence = sequence.with_target(TargetTag::epc(epc));
    }
    ops::submit(session, sequence).await?;

    gateway.manager.start(session).await?;
    cli::wait_for_enter("Press enter to exit.").await;
    Ok(())
}

/// One task prints both streams so their lines never interleave
async fn print_events(
    mut reads: UnboundedReceiver<ReaderEvent>,
    mut results: UnboundedReceiver<ReaderEvent>,
) {
    loop {
        let event = tokio::select! {
            Some(event) = reads.recv() => event,
            Some(event) = results.recv() => event,
            else => break,
        };
        match event {
            ReaderEvent::TagsReported(report) => {
                for read in &report.tags {
                    println!("{}", read.epc);
                }
            },
            ReaderEvent::TagOpComplete(report) => {
                for result in &report.results {
                    print_authenticate(result);
                }
            },
            _ => {},
        }
    }
}

fn print_authenticate(result: &TagOpResult) {
    let OpOutcome::Authenticate {
        result: status,
        challenge,
        response_cipher,
        response_tid,
    } = &result.outcome
    else {
        return;
    };

    println!("{}", "!".repeat(57).yellow());
    println!("                    OpId => {}", result.op_id);
    println!("                    Epc  => {}", result.epc);
    println!("                  Result => {:?}", status);
    if status.is_success() {
        println!(
            "                 Tag Tid => {}",
            response_tid.as_ref().map(TagData::to_hex).unwrap_or_default()
        );
        println!(" Original Challenge Message => {}", challenge.to_hex_words());
        println!("   Result of Tag Encryption => {}", response_cipher.to_hex().green());
    }
}
