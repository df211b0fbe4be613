// DANS : src/monitoring/metrics.rs

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge,
};
use tracing::{info, warn};
use warp::Filter;

lazy_static! {
    // --- Ingestion ---
    pub static ref NOTIFICATIONS_RECEIVED: IntCounter = register_int_counter!(
        "pooldb_notifications_received_total", "Nombre total de notifications de compte reçues"
    ).expect("enregistrement de pooldb_notifications_received_total");
    pub static ref LAST_NOTIFICATION_SLOT: IntGauge = register_int_gauge!(
        "pooldb_last_notification_slot", "Slot de la dernière notification reçue"
    ).expect("enregistrement de pooldb_last_notification_slot");
    pub static ref INGEST_OUTCOMES: IntCounterVec = register_int_counter_vec!(
        "pooldb_ingest_outcomes_total",
        "Résultat du traitement de chaque notification",
        &["outcome"] // Labels: "created", "invalidated", "malformed", "not_tradeable"
    ).expect("enregistrement de pooldb_ingest_outcomes_total");
    pub static ref SUBSCRIPTION_RECONNECTS: IntCounter = register_int_counter!(
        "pooldb_subscription_reconnects_total", "Nombre de reconnexions de l'abonnement websocket"
    ).expect("enregistrement de pooldb_subscription_reconnects_total");

    // --- Revalidation ---
    pub static ref REVALIDATION_OUTCOMES: IntCounterVec = register_int_counter_vec!(
        "pooldb_revalidation_outcomes_total",
        "Résultat de chaque tentative de revalidation",
        &["outcome"] // Labels: "committed", "superseded", "negative_reserve", ...
    ).expect("enregistrement de pooldb_revalidation_outcomes_total");
    pub static ref REVALIDATION_LATENCY: Histogram = register_histogram!(
        "pooldb_revalidation_latency_seconds", "Durée d'un cycle lecture / fetch / calcul / écriture"
    ).expect("enregistrement de pooldb_revalidation_latency_seconds");
    pub static ref QUEUE_EMPTY_POLLS: IntCounter = register_int_counter!(
        "pooldb_queue_empty_polls_total", "Nombre de lectures de la file qui l'ont trouvée vide"
    ).expect("enregistrement de pooldb_queue_empty_polls_total");

    // --- RPC ---
    pub static ref RPC_REQUEST_LATENCY: HistogramVec = register_histogram_vec!(
        "pooldb_rpc_request_latency_seconds",
        "Latence des appels RPC vers le nœud Solana",
        &["method"]
    ).expect("enregistrement de pooldb_rpc_request_latency_seconds");
    pub static ref RPC_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "pooldb_rpc_requests_total",
        "Compteur total des requêtes RPC, segmenté par méthode et statut",
        &["method", "status"] // Labels: "get_multiple_accounts", "success" / "retry" / "failure"
    ).expect("enregistrement de pooldb_rpc_requests_total");
}

pub async fn start_metrics_server(port: u16) {
    let metrics_route = warp::path!("metrics").map(|| {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            warn!(error = %e, "[Monitoring] Encodage des métriques impossible.");
        }
        warp::reply::with_header(buffer, "content-type", "text/plain; version=0.0.4")
    });
    info!("[Monitoring] Serveur de métriques exposé sur http://0.0.0.0:{}/metrics", port);
    warp::serve(metrics_route).run(([0, 0, 0, 0], port)).await;
}
