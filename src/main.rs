use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use utxochat::admission::AdmissionValidator;
use utxochat::bitcoin::rpc::BitcoinRpcClient;
use utxochat::bitcoin::{BlockSource, UtxoLookup};
use utxochat::block_watcher::BlockWatcher;
use utxochat::config::{self, Config};
use utxochat::network::NetworkManager;
use utxochat::shutdown::ShutdownManager;
use utxochat::storage::open_store;

#[derive(Parser, Debug)]
#[command(name = "utxochatd")]
#[command(about = "UTXO-gated chat relay daemon", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "utxochat.toml")]
    config: String,

    #[arg(long)]
    listen_addr: Option<String>,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.generate_config {
        match Config::default().save_to_file(&args.config) {
            Ok(()) => {
                println!("✅ Generated default config at: {}", args.config);
                return;
            }
            Err(e) => {
                eprintln!("❌ Failed to generate config: {}", e);
                std::process::exit(1);
            }
        }
    }

    let mut config = match Config::load_or_create(&args.config) {
        Ok(cfg) => {
            println!("✓ Loaded configuration from {}", args.config);
            cfg
        }
        Err(e) => {
            eprintln!("❌ Failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(addr) = args.listen_addr {
        config.network.listen_address = addr;
    }
    if let Err(e) = config.validate() {
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }

    setup_logging(&config.logging, args.verbose);

    let version = env!("CARGO_PKG_VERSION");
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    let build_date = option_env!("BUILD_DATE").unwrap_or("unknown");
    info!("🚀 utxochatd v{} ({}), built {}", version, git_hash, build_date);
    info!("  └─ Node: {}", config.node.name);
    info!("  └─ Data Dir: {}", config.node.data_dir);

    if let Err(e) = run(config).await {
        error!("❌ {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), utxochat::AppError> {
    std::fs::create_dir_all(&config.node.data_dir)?;

    let mut storage_config = config.storage.clone();
    storage_config.path = config.storage_path().to_string_lossy().to_string();
    let store = open_store(&storage_config)?;
    info!("✓ Outpoint store ready ({} recorded)", store.len().await?);

    let rpc = Arc::new(BitcoinRpcClient::new(&config.bitcoin)?);
    match rpc.get_blockchain_info().await {
        Ok(chain) => info!(
            "✓ Bitcoin node reachable: chain={} height={} tip={}",
            chain.chain, chain.blocks, chain.best_block_hash
        ),
        Err(e) => warn!(
            "⚠️ Bitcoin node at {} not reachable yet: {}",
            config.bitcoin.rpc_url, e
        ),
    }

    let mut shutdown_manager =
        ShutdownManager::new(Duration::from_secs(config.network.shutdown_grace_secs));
    let shutdown_token = shutdown_manager.token();

    let lookup: Arc<dyn UtxoLookup> = rpc.clone();
    let blocks: Arc<dyn BlockSource> = rpc;
    let validator = Arc::new(AdmissionValidator::new(store.clone(), lookup.clone()));

    let network = NetworkManager::new(config.network.clone(), validator, &shutdown_token);
    let bound = network.start().await?;
    info!("✓ Gossip network listening on {}", bound);

    let watcher = BlockWatcher::new(store, blocks, lookup, config.blockchain.clone());
    shutdown_manager.register_task(tokio::spawn(watcher.run(shutdown_token.child_token())));

    shutdown_manager.wait_for_signal().await;
    network.stop().await;
    shutdown_manager.shutdown().await;
    Ok(())
}

fn setup_logging(config: &config::LoggingConfig, verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // journald already stamps time and host
    let is_systemd =
        std::env::var("JOURNAL_STREAM").is_ok() || std::env::var("INVOCATION_ID").is_ok();

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let short_hostname = hostname.split('.').next().unwrap_or(&hostname).to_string();

    match config.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_thread_ids(false)
                .init();
        }
        _ if is_systemd => {
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .without_time()
                .compact()
                .init();
        }
        _ => {
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_timer(CustomTimer {
                    hostname: short_hostname,
                })
                .compact()
                .init();
        }
    }
}

/// UTC time plus short hostname, e.g. "2026-03-02 18:09:43.150 [relay1]".
struct CustomTimer {
    hostname: String,
}

impl tracing_subscriber::fmt::time::FormatTime for CustomTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(
            w,
            "{}.{:03} [{}]",
            now.format("%Y-%m-%d %H:%M:%S"),
            now.timestamp_subsec_millis(),
            self.hostname
        )
    }
}
