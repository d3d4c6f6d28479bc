use std::sync::Arc;

use clap::Parser;
use tracing::info;

use timed::coinjoin::interfaces::test_doubles::{FakeChainView, FakeNetwork, FakeRegistry, FakeWallet};
use timed::coinjoin::interfaces::{Balance, CoordinatorInfo, TallyItem};
use timed::coinjoin::manager::Manager;
use timed::config::{Config, LoggingConfig};
use timed::shutdown::ShutdownManager;
use timed::types::{OutPoint, UTXO};

#[derive(Parser, Debug)]
#[command(name = "timed")]
#[command(about = "CoinJoin mixing engine demo host", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "coinjoin.toml")]
    config: String,

    #[arg(short, long)]
    verbose: bool,

    /// Seed an in-memory demo wallet with a spendable balance and a known
    /// coordinator, then enable mixing, so the maintenance loop has work to
    /// do on its first tick.
    #[arg(long)]
    demo: bool,

    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.generate_config {
        let config = Config::default();
        match config.save_to_file(&args.config) {
            Ok(()) => {
                println!("wrote default configuration to {}", args.config);
                return;
            }
            Err(e) => {
                eprintln!("failed to generate config: {e}");
                std::process::exit(1);
            }
        }
    }

    let config = match Config::load_or_create(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load {}: {e}", args.config);
            std::process::exit(1);
        }
    };

    setup_logging(&config.logging, args.verbose);

    info!(config_path = %args.config, demo = args.demo, "starting coinjoin demo host");

    let registry = Arc::new(FakeRegistry::new());
    let chain = Arc::new(FakeChainView::new());
    let network = Arc::new(FakeNetwork::new());
    let wallet = Arc::new(FakeWallet::new());

    let mut coinjoin_config = config.coinjoin;
    if args.demo {
        seed_demo_wallet(&wallet, &registry, &network).await;
        coinjoin_config.enabled = true;
    }

    let mut shutdown_manager = ShutdownManager::new();
    let shutdown_token = shutdown_manager.token();

    let manager = Arc::new(Manager::new(registry, chain, network, coinjoin_config, shutdown_token));
    let _progress = manager.register_wallet("demo-wallet".to_string(), wallet);

    let manager_handle = tokio::spawn(manager.run());
    shutdown_manager.register_task(manager_handle);

    info!("press ctrl+c to stop");
    shutdown_manager.wait_for_shutdown().await;
}

/// Hands the in-memory wallet one non-denominated UTXO and a connected
/// coordinator so `do_automatic_denominating` has real planning work to do
/// instead of immediately reporting `BalanceTooSmall`.
async fn seed_demo_wallet(wallet: &Arc<FakeWallet>, registry: &Arc<FakeRegistry>, network: &Arc<FakeNetwork>) {
    let coordinator_address = "127.0.0.1:9999";
    registry.add(CoordinatorInfo {
        address: coordinator_address.to_string(),
        outpoint: OutPoint { txid: [0x42; 32], vout: 0 },
        operator_public_key: [0u8; 32],
    });
    let _ = network.connect(coordinator_address).await;

    let funding_amount = timed::constants::coinjoin::DENOM_1 * 5;
    wallet.set_balance(Balance {
        anonymized: 0,
        anonymizable: funding_amount,
        denominated_confirmed: 0,
        denominated_unconfirmed: 0,
        non_denom_anonymizable: funding_amount,
    });
    wallet.set_tally_items(vec![TallyItem {
        destination: "demo-address".to_string(),
        total_amount: funding_amount,
        inputs: vec![UTXO {
            outpoint: OutPoint { txid: [0x01; 32], vout: 0 },
            value: funding_amount,
            script_pubkey: vec![0xAB],
            address: "demo-address".to_string(),
            rounds: 0,
            confirmations: 6,
        }],
    }]);
}

fn setup_logging(config: &LoggingConfig, verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if verbose { "trace" } else { &config.level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let is_systemd = std::env::var("JOURNAL_STREAM").is_ok() || std::env::var("INVOCATION_ID").is_ok();

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let short_hostname = hostname.split('.').next().unwrap_or(&hostname).to_string();

    match config.format.as_str() {
        "json" => {
            fmt().json().with_env_filter(filter).with_thread_ids(false).init();
        }
        _ => {
            if is_systemd {
                // journald already timestamps and tags entries with the unit.
                fmt()
                    .with_env_filter(filter)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_file(false)
                    .with_line_number(false)
                    .without_time()
                    .compact()
                    .init();
            } else {
                fmt()
                    .with_env_filter(filter)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_timer(CustomTimer { hostname: short_hostname })
                    .compact()
                    .init();
            }
        }
    }
}

struct CustomTimer {
    hostname: String,
}

impl tracing_subscriber::fmt::time::FormatTime for CustomTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        use chrono::Utc;
        let now = Utc::now();
        write!(
            w,
            "{}.{:03} [{}]",
            now.format("%Y-%m-%d %H:%M:%S"),
            now.timestamp_subsec_millis(),
            self.hostname
        )
    }
}
