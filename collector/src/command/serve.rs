use axum_server::Server;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use crate::core::config::Config;
use crate::core::routes::router;
use crate::core::state::CollectorState;
use crate::inventory::db::CacheDb;
use crate::inventory::{HttpDcSource, Inventory, refresh_loop};
use crate::model::storage::Storage;

#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Inventory cache database directory (disabled when not set)
    #[arg(long)]
    inventory_db: Option<PathBuf>,

    /// Base URL of the inventory worker (disabled when not set)
    #[arg(long)]
    inventory_url: Option<String>,

    /// Bytes withheld from effective space on every backend
    #[arg(long, default_value_t = 0)]
    reserved_space: u64,

    /// Free share of effective space required before a backend is full
    #[arg(long, default_value_t = 0.0)]
    reserved_space_share: f64,

    /// Seconds before a silent backend counts as stalled
    #[arg(long, default_value_t = 120)]
    stat_stale_timeout: u64,

    /// Treat groups spanning several backends as broken
    #[arg(long, default_value_t = false)]
    forbidden_dht_groups: bool,

    /// Treat couples with unequal group total space as broken
    #[arg(long, default_value_t = false)]
    forbidden_unmatched_group_total_space: bool,

    /// Seconds between inventory cache refresh passes
    #[arg(long, default_value_t = 150)]
    dc_cache_update_period: u64,

    /// Seconds a cached host record stays valid
    #[arg(long, default_value_t = 604800)]
    dc_cache_valid_time: u64,

    /// Seconds to wait on the inventory worker per request
    #[arg(long, default_value_t = 5)]
    inventory_worker_timeout: u64,
}

impl ServeArgs {
    fn config(&self) -> Config {
        Config {
            reserved_space: self.reserved_space,
            reserved_space_share: self.reserved_space_share,
            node_backend_stat_stale_timeout: self.stat_stale_timeout,
            forbidden_dht_groups: self.forbidden_dht_groups,
            forbidden_unmatched_group_total_space: self.forbidden_unmatched_group_total_space,
            dc_cache_update_period: self.dc_cache_update_period,
            dc_cache_valid_time: self.dc_cache_valid_time,
            inventory_worker_timeout: self.inventory_worker_timeout,
        }
    }
}

pub async fn serve(serve_args: ServeArgs) -> anyhow::Result<()> {
    let config = serve_args.config();

    let cache_db = match &serve_args.inventory_db {
        Some(path) => Some(CacheDb::open(path)?),
        None => {
            info!("inventory cache database is not configured");
            None
        }
    };

    let inventory = Arc::new(Inventory::new(
        HttpDcSource::new(serve_args.inventory_url.clone()),
        cache_db,
        Duration::from_secs(config.inventory_worker_timeout),
        config.dc_cache_valid_time,
    ));

    let state = CollectorState {
        storage: Arc::new(Storage::new(config.clone())),
        inventory: inventory.clone(),
    };

    // Spawn the inventory refresh loop
    let (shutdown_tx, shutdown_rx) = watch::channel::<bool>(false);
    let refresh_handle = tokio::spawn(refresh_loop(
        inventory,
        Duration::from_secs(config.dc_cache_update_period),
        shutdown_rx,
    ));

    let app = router(state);

    let socket_addr = serve_args.listen.parse()?;
    let server = Server::bind(socket_addr).serve(app.into_make_service());

    info!("listening on {}", serve_args.listen);

    // Graceful shutdown: ctrl+c
    tokio::select! {
        res = server => { res?; }
        _ = tokio::signal::ctrl_c() => {}
    }

    // Stop the refresh loop
    let _ = shutdown_tx.send(true);
    let _ = refresh_handle.await;

    Ok(())
}
