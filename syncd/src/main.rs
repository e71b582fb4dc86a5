use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sync_core::protocol::{StateId, Timestamp};
use syncd::config::DaemonConfig;
use syncd::runtime::{self, DaemonError, StoreSummary};
use tracing::error;

/// Keeps a bridge-attached device in step with the state store.
#[derive(Debug, Parser)]
#[command(name = "syncd", version)]
struct Cli {
    /// Config file; falls back to `SYNCD_CONFIG`, then `syncd.toml`.
    #[arg(long, short, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Copy, Debug, Subcommand)]
enum Command {
    /// Run the supervisor loop (default).
    Run,
    /// Create the state store and telemetry archive, then exit.
    Init,
    /// Print the current state and pending requests.
    Status,
    /// Queue a state change for the device.
    ///
    /// Timestamps have one-second resolution. Applying a request also drops
    /// every request posted at or before it, so requests queued within the
    /// same second collapse into whichever one is applied. Pass distinct
    /// `--posted-at` values when queueing a burst.
    Request {
        #[arg(allow_negative_numbers = true)]
        state_id: StateId,
        /// Posting time in Unix seconds; defaults to now.
        #[arg(long, value_name = "TS")]
        posted_at: Option<Timestamp>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match DaemonConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("syncd: {err}");
            return ExitCode::from(2);
        }
    };
    if let Err(err) = syncd::logging::init(&config.logging) {
        eprintln!("syncd: {err}");
        return ExitCode::from(2);
    }

    let span = tracing::info_span!("syncd", pid = std::process::id());
    let _entered = span.enter();

    match dispatch(cli.command.unwrap_or(Command::Run), &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(command: Command, config: &DaemonConfig) -> Result<(), DaemonError> {
    match command {
        Command::Run => match runtime::run(config)? {},
        Command::Init => runtime::init(config),
        Command::Status => {
            let summary = runtime::status(config)?;
            // Broken pipes on stdout are not worth a failure exit.
            let _ = print_summary(&mut io::stdout().lock(), &summary);
            Ok(())
        }
        Command::Request {
            state_id,
            posted_at,
        } => {
            let request = runtime::request(config, state_id, posted_at)?;
            let _ = writeln!(
                io::stdout().lock(),
                "queued state {} posted at {}",
                request.state_id,
                request.posted_at
            );
            Ok(())
        }
    }
}

fn print_summary(writer: &mut impl Write, summary: &StoreSummary) -> io::Result<()> {
    if let Some(current) = summary.current {
        writeln!(
            writer,
            "current state {} posted at {}",
            current.state_id, current.posted_at
        )?;
    } else {
        writeln!(writer, "current state unknown")?;
    }
    writeln!(writer, "pending requests: {}", summary.pending.len())?;
    for pending in &summary.pending {
        writeln!(writer, "  {} posted at {}", pending.state_id, pending.posted_at)?;
    }
    Ok(())
}
