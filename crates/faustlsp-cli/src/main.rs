//! The `faustlsp` binary.
//!
//! Runs the language server over stdio by default; `--listen` serves a
//! single client over TCP instead. Logging goes to stderr (stdout belongs
//! to the protocol) and is controlled with `RUST_LOG`.

use std::process::ExitCode;

use clap::Parser;

/// Language server for the Faust audio DSL.
#[derive(Parser, Debug)]
#[command(name = "faustlsp")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Language server for the Faust audio signal-processing language")]
struct Cli {
    /// Serve one client over TCP instead of stdio
    #[arg(long)]
    listen: bool,

    /// Port used with --listen
    #[arg(long, value_name = "PORT", default_value_t = 5007)]
    port: u16,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    let clean_exit = if cli.listen {
        match faustlsp_server::run_socket(cli.port).await {
            Ok(clean_exit) => clean_exit,
            Err(err) => {
                log::error!("{err:#}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        faustlsp_server::run_stdio().await
    };

    if clean_exit {
        ExitCode::SUCCESS
    } else {
        // The stream ended without a shutdown handshake.
        ExitCode::FAILURE
    }
}
