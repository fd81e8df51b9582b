//! dcd command-line front-end.
//!
//! With no positional arguments the process runs the daemon (optionally
//! re-execing itself into the background with `-d`); otherwise it is a
//! thin client talking to a running daemon over the Unix socket.

mod client;
mod daemon;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// dcd - distributed configuration-delivery daemon
#[derive(Parser, Debug)]
#[command(name = "dcd")]
#[command(version, about, long_about = None)]
#[command(override_usage = "dcd [flags] [get|edit|commit|update <file>]")]
struct Args {
    /// Run the daemon in the background
    #[arg(short = 'd')]
    daemon: bool,

    /// Verbose output
    #[arg(short = 'v')]
    verbose: bool,

    /// Database endpoint
    #[arg(long = "db", default_value = "/var/lib/dcd/files.db")]
    db: String,

    /// Communication socket
    #[arg(short = 'a', default_value = "/run/dcd.socket")]
    socket: PathBuf,

    /// Repo configuration: -f /file.tgz:/workspace:/cache,...
    #[arg(short = 'f', default_value = "")]
    repos: String,

    /// Overwrite repo contents
    #[arg(short = 'o')]
    force: bool,

    /// Database consistency level (r/w)
    #[arg(short = 'c', default_value = "quorum")]
    consistency: dcd_core::config::Consistency,

    /// Report operation progress
    #[arg(short = 'p')]
    progress: bool,

    /// Command to run: get | edit | commit | update
    command: Option<String>,

    /// Repository key the command addresses
    file: Option<String>,
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "error" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.command.is_none() && args.daemon && !daemon::is_reborn() {
        match daemon::reborn() {
            Ok(()) => tracing::info!("daemon started"),
            Err(e) => {
                eprintln!("cannot start child process: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    std::process::exit(runtime.block_on(async_main(args)));
}

async fn async_main(args: Args) -> i32 {
    let socket_cleanup = args.command.is_none().then(|| args.socket.clone());
    spawn_signal_watcher(socket_cleanup);

    match &args.command {
        None => match daemon::run(&args.db, args.consistency, &args.repos, &args.socket).await {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("{e:#}");
                1
            }
        },
        Some(command) => {
            let Some(file) = args.file.clone() else {
                eprintln!("usage: dcd [flags] (get|edit|commit|update) <file>");
                return 2;
            };
            let client = client::Client::new(args.socket.clone(), file, args.progress);
            let result = match command.as_str() {
                "get" => client.get(&mut tokio::io::stdout()).await,
                "edit" => client.edit(args.force).await,
                "commit" => client.commit(args.force).await,
                "update" => client.update(args.force).await,
                other => {
                    eprintln!("unknown command: {other}");
                    return 2;
                }
            };
            match result {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("{e:#}");
                    1
                }
            }
        }
    }
}

/// Exit with `128 + signo` on any terminating signal. The window-size
/// signal is deliberately not registered.
fn spawn_signal_watcher(socket: Option<PathBuf>) {
    use tokio::signal::unix::{SignalKind, signal};

    let kinds = [
        SignalKind::hangup(),
        SignalKind::interrupt(),
        SignalKind::quit(),
        SignalKind::terminate(),
    ];
    for kind in kinds {
        let socket = socket.clone();
        let mut stream = match signal(kind) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "cannot install signal handler");
                continue;
            }
        };
        tokio::spawn(async move {
            stream.recv().await;
            tracing::error!(signal = kind.as_raw_value(), "signal received");
            if let Some(socket) = socket {
                let _ = std::fs::remove_file(socket);
            }
            std::process::exit(128 + kind.as_raw_value());
        });
    }
}
