use anyhow::Result;
use clap::Parser;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use strata_cluster::NodePool;
use strata_core::{bootstrap::load_config, logging};

/// Discover a cluster from its seeds and watch node health
#[derive(Debug, Parser)]
#[command(name = "strata", version)]
struct Args {
    /// Config file path (overrides STRATA_CONFIG_PATH and the default locations)
    #[arg(short, long)]
    config: Option<String>,

    /// Seed address, may be repeated; added to the configured seeds
    #[arg(short, long = "seed", value_name = "ADDR")]
    seeds: Vec<String>,

    /// Bootstrap, print the active and inactive nodes as JSON, and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let mut config = load_config(args.config.as_deref())?;
    for seed in args.seeds {
        if let Err(e) = strata_core::config::parse_seed(&seed) {
            return Err(anyhow::anyhow!("Invalid --seed '{seed}': {e}"));
        }
        if !config.cluster.seeds.contains(&seed) {
            config.cluster.seeds.push(seed);
        }
    }
    if config.cluster.seeds.is_empty() {
        return Err(anyhow::anyhow!(
            "No seeds configured; pass --seed or set cluster.seeds / STRATA_CLUSTER__SEEDS"
        ));
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!(seeds = ?config.cluster.seeds, "Strata starting");

    // 3. Bootstrap the node pool
    let pool = NodePool::connect(&config.cluster).await.map_err(|e| {
        error!(error = %e, "Failed to bootstrap node pool");
        anyhow::anyhow!("Bootstrap failed: {e}")
    })?;

    if args.once {
        let (active, inactive) = pool.registry().partition();
        let out = serde_json::json!({ "active": active, "inactive": inactive });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    // 4. Start the health watch
    let cancel_token = CancellationToken::new();
    let watch_handle = if config.cluster.watch {
        Some(pool.start_watch(cancel_token.clone()))
    } else {
        warn!("Health watch disabled, node status will only change on reported failures");
        None
    };

    // 5. Report membership until Ctrl-C
    let period = pool.watch().interval();
    let mut report = interval_at(Instant::now() + period, period);
    report.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                break;
            }
            _ = report.tick() => {
                let (active, inactive) = pool.registry().partition();
                info!(
                    active = active.len(),
                    inactive = inactive.len(),
                    "Cluster membership"
                );
                if active.is_empty() {
                    warn!("No active nodes");
                }
            }
        }
    }

    // 6. Shut down
    info!("Shutting down...");
    cancel_token.cancel();
    if let Some(handle) = watch_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Health watch task failed");
        }
    }
    info!("Strata stopped");

    Ok(())
}
