use clap::{Parser, Subcommand};

use common::telemetry::init_telemetry;

use collector::command::check::{CheckArgs, check};
use collector::command::serve::{ServeArgs, serve};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
enum Cmd {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Parse a monitor-stats file and print the model view
    Check(CheckArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry("collector");

    let args = Args::parse();

    match args.cmd {
        Cmd::Serve(serve_args) => {
            serve(serve_args).await?;
        }
        Cmd::Check(check_args) => {
            check(check_args).await?;
        }
    }

    Ok(())
}
