use clap::Parser;
use std::path::PathBuf;

use crate::core::config::Config;
use crate::model::node::Node;
use crate::model::parser::parse_monitor_stats;
use crate::model::storage::Storage;

#[derive(Parser, Debug, Clone)]
pub struct CheckArgs {
    /// Monitor-stats JSON file to parse
    #[arg(long)]
    file: PathBuf,

    /// Node key the document belongs to
    #[arg(long, default_value = "localhost:1025:2")]
    node: String,

    /// Include internal fields in the projection
    #[arg(long, default_value_t = false)]
    show_internals: bool,
}

/// Parses one stats document offline and prints the resulting model view.
pub async fn check(check_args: CheckArgs) -> anyhow::Result<()> {
    let (host, port, family) = Node::parse_key(&check_args.node)
        .ok_or_else(|| anyhow::anyhow!("invalid node key '{}'", check_args.node))?;

    let data = tokio::fs::read(&check_args.file).await?;
    let parsed = parse_monitor_stats(&data)?;

    println!(
        "parsed 1 node stat, {} backend stats, {} rofs error records",
        parsed.backends.len(),
        parsed.rofs_errors.len()
    );

    let storage = Storage::new(Config::default());
    storage.ingest(&host, port, family, parsed);

    println!("{}", storage.summary());
    println!(
        "{}",
        serde_json::to_string_pretty(&storage.snapshot_json(check_args.show_internals))?
    );

    Ok(())
}
