use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pooldb_updater::{
    config::Config,
    data_pipeline::{discovery::raydium, stream_program_accounts, IngestionListener, WorkerPool},
    decoders::raydium::amm_v4::RAYDIUM_AMM_V4_PROGRAM_ID,
    monitoring::{logging, metrics},
    rpc::{AccountFetcher, ResilientRpcClient},
    store::{PoolStore, RedisDocumentStore},
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::{mpsc, watch}, time::sleep};
use tracing::{error, info, warn};

const NOTIFICATION_BUFFER: usize = 1024;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Miroir Redis des pools Raydium AMM V4", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listener et workers de revalidation dans le même process.
    Run {
        /// Vide la base avant de démarrer.
        #[arg(long)]
        flush: bool,
        /// Importe le catalogue Raydium avant d'écouter.
        #[arg(long)]
        backfill: bool,
    },
    /// Listener seul : invalide les documents et remplit la file.
    Listen,
    /// Workers seuls : vident la file.
    Revalidate,
    /// Crée l'index de recherche s'il n'existe pas.
    CreateIndex,
    /// Importe le catalogue Raydium puis s'arrête.
    Backfill,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::setup_logging()?;
    let cli = Cli::parse();
    let config = Config::load()?;

    info!("[Main] Démarrage : {:?}", cli.command);

    let task_result = match cli.command {
        Commands::Run { flush, backfill } => run_all(&config, flush, backfill).await,
        Commands::Listen => run_listen(&config).await,
        Commands::Revalidate => run_revalidate(&config).await,
        Commands::CreateIndex => run_create_index(&config).await,
        Commands::Backfill => run_backfill_only(&config).await,
    };

    if let Err(e) = task_result {
        error!("[Main] La tâche a échoué : {:?}", e);
        std::process::exit(1);
    }

    info!("[Main] Tâche terminée avec succès.");
    Ok(())
}

async fn open_store(config: &Config) -> Result<PoolStore> {
    let backend = RedisDocumentStore::connect(&config.redis_url)
        .await
        .with_context(|| format!("Connexion à Redis ({})", config.redis_url))?;
    Ok(PoolStore::new(Arc::new(backend)))
}

fn rpc_client(config: &Config) -> Arc<ResilientRpcClient> {
    Arc::new(ResilientRpcClient::new(
        config.solana_rpc_url.clone(),
        config.rpc_max_retries,
        config.rpc_retry_delay_ms,
    ))
}

/// Canal d'arrêt : passe à `true` au premier Ctrl-C ou quand l'appelant
/// décide d'arrêter le process.
fn shutdown_channel() -> (Arc<watch::Sender<bool>>, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    let tx = Arc::new(tx);
    let on_ctrl_c = tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("[Main] Impossible d'écouter Ctrl-C : {}", e);
            return;
        }
        info!("[Main] Ctrl-C reçu, arrêt en cours...");
        let _ = on_ctrl_c.send(true);
    });
    (tx, rx)
}

fn spawn_workers(
    config: &Config,
    store: &PoolStore,
    fetcher: Arc<dyn AccountFetcher>,
    shutdown: &watch::Receiver<bool>,
) -> WorkerPool {
    WorkerPool::spawn(config.worker_count, store, fetcher, config.queue_poll_interval(), shutdown)
}

/// Abonnement + listener, avec reconnexion tant qu'aucun arrêt n'est demandé.
async fn run_listener(wss_url: String, listener: IngestionListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    loop {
        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let consumer = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.run(rx).await })
        };

        let stream_result = stream_program_accounts(&wss_url, RAYDIUM_AMM_V4_PROGRAM_ID, tx, shutdown.clone()).await;
        // L'émetteur est libéré : le consommateur finit les notifications en attente puis s'arrête.
        consumer
            .await
            .context("Tâche listener interrompue")?
            .context("Store indisponible, arrêt du listener")?;

        match stream_result {
            Ok(()) => return Ok(()),
            Err(e) => {
                metrics::SUBSCRIPTION_RECONNECTS.inc();
                warn!("[Listener] Abonnement perdu ({:#}), reconnexion dans {:?}.", e, RECONNECT_DELAY);
                tokio::select! {
                    _ = sleep(RECONNECT_DELAY) => {}
                    _ = shutdown.changed() => return Ok(()),
                }
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

async fn run_backfill(config: &Config, listener: &IngestionListener, fetcher: &dyn AccountFetcher) -> Result<()> {
    let pools = raydium::fetch_amm_v4_pools(&config.raydium_api_url, config.min_pool_volume)
        .await
        .context("Lecture du catalogue Raydium")?;
    raydium::backfill(listener, fetcher, &pools)
        .await
        .context("Store indisponible pendant le backfill")?;
    Ok(())
}

async fn run_all(config: &Config, flush: bool, backfill: bool) -> Result<()> {
    let store = open_store(config).await?;
    if flush {
        store.backend().flush().await.context("Vidage de la base")?;
    }
    store.backend().ensure_index().await.context("Création de l'index")?;
    tokio::spawn(metrics::start_metrics_server(config.metrics_port));

    let rpc = rpc_client(config);
    let listener = IngestionListener::new(store.clone(), RAYDIUM_AMM_V4_PROGRAM_ID);
    if backfill {
        run_backfill(config, &listener, rpc.as_ref()).await?;
    }

    let (shutdown_tx, shutdown) = shutdown_channel();
    let mut workers = spawn_workers(config, &store, rpc, &shutdown);
    let listening = run_listener(config.wss_url(), listener, shutdown);
    tokio::pin!(listening);

    tokio::select! {
        listened = &mut listening => {
            if let Err(e) = listened {
                // Sans listener, les workers n'ont plus rien de frais à traiter.
                let _ = shutdown_tx.send(true);
                workers.abort();
                return Err(e);
            }
            workers.wait().await
        }
        joined = workers.wait() => {
            // Un worker a perdu le store (ou tous sont arrêtés) : le listener s'arrête aussi.
            let _ = shutdown_tx.send(true);
            let listened = listening.await;
            joined?;
            listened
        }
    }
}

async fn run_listen(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    tokio::spawn(metrics::start_metrics_server(config.metrics_port));
    let listener = IngestionListener::new(store, RAYDIUM_AMM_V4_PROGRAM_ID);
    let (_shutdown_tx, shutdown) = shutdown_channel();
    run_listener(config.wss_url(), listener, shutdown).await
}

async fn run_revalidate(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    tokio::spawn(metrics::start_metrics_server(config.metrics_port));
    let (shutdown_tx, shutdown) = shutdown_channel();
    let mut workers = spawn_workers(config, &store, rpc_client(config), &shutdown);
    let joined = workers.wait().await;
    let _ = shutdown_tx.send(true);
    joined
}

async fn run_create_index(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    store.backend().ensure_index().await.context("Création de l'index")?;
    Ok(())
}

async fn run_backfill_only(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let rpc = rpc_client(config);
    let listener = IngestionListener::new(store, RAYDIUM_AMM_V4_PROGRAM_ID);
    run_backfill(config, &listener, rpc.as_ref()).await
}
