use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::info;

use voting_service::audit::AuditLog;
use voting_service::campaign::commit_campaign;
use voting_service::casting::{CastMode, VoteReceipt, VoteCastingService};
use voting_service::config::ServiceConfig;
use voting_service::consistency::ConsistencyChecker;
use voting_service::database::Database;
use voting_service::error::{StoreError, VoteError};
use voting_service::finalizer::TallyFinalizer;
use voting_service::ledger::{JsonRpcLedger, LedgerClient};
use voting_service::metrics;
use voting_service::state::AppState;
use voting_service::types::CastVoteBody;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting Vote Integrity Service");

    let config = Arc::new(ServiceConfig::from_env());

    let db = Database::connect(&config.db_path, config.db_max_connections).await?;

    let ledger: Arc<dyn LedgerClient> = Arc::new(JsonRpcLedger::new(
        &config.ledger_rpc_url,
        config.ledger_timeout(),
    )?);
    let audit = AuditLog::new(db.clone());
    let checker = ConsistencyChecker::new(db.clone(), ledger.clone(), audit.clone());
    let casting = VoteCastingService::new(
        db.clone(),
        ledger.clone(),
        checker.clone(),
        audit.clone(),
        config.ledger_max_inflight,
    );
    let finalizer = TallyFinalizer::new(db.clone(), ledger.clone(), audit.clone());

    let state = AppState {
        config: config.clone(),
        db,
        casting,
        checker,
        finalizer,
        audit,
        ledger,
    };

    let app = Router::new()
        .route("/healthz", get(health_check))
        .route("/metricsz", get(get_metrics))
        .route("/campaigns/{campaign_id}/votes", post(cast_vote))
        .route(
            "/campaigns/{campaign_id}/voters/{voter_id}/has-voted",
            get(has_voted),
        )
        .route(
            "/campaigns/{campaign_id}/voters/{voter_id}/verification",
            get(get_verification),
        )
        .route("/campaigns/{campaign_id}/commit", post(commit_campaign_to_ledger))
        .route("/campaigns/{campaign_id}/finalize", post(finalize_campaign))
        .route("/campaigns/{campaign_id}/results", get(get_results))
        .route("/votes/{content_hash}", get(verify_vote))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

async fn get_metrics() -> Json<Value> {
    Json(metrics::snapshot_as_json())
}

async fn cast_vote(
    State(state): State<AppState>,
    Path(campaign_id): Path<i64>,
    Json(body): Json<CastVoteBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    info!(
        "POST /campaigns/{}/votes - voter {}",
        campaign_id, body.voter_id
    );

    let mode = if body.synchronous {
        CastMode::Synchronous
    } else {
        CastMode::Background
    };

    let receipt = state
        .casting
        .cast_vote(campaign_id, body.voter_id, body.option_id, &body.voter_seed, mode)
        .await
        .map_err(error_response)?;

    Ok(Json(receipt_json(&receipt, &state)))
}

async fn has_voted(
    State(state): State<AppState>,
    Path((campaign_id, voter_id)): Path<(i64, i64)>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let has_voted = state
        .casting
        .has_voted(voter_id, campaign_id)
        .await
        .map_err(error_response)?;

    Ok(Json(json!({
        "campaign_id": campaign_id,
        "voter_id": voter_id,
        "has_voted": has_voted,
    })))
}

async fn get_verification(
    State(state): State<AppState>,
    Path((campaign_id, voter_id)): Path<(i64, i64)>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let verdict = state
        .checker
        .check(voter_id, campaign_id)
        .await
        .map_err(error_response)?;

    Ok(to_json(&verdict))
}

async fn verify_vote(
    State(state): State<AppState>,
    Path(content_hash): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let verification = state
        .checker
        .verify_vote(&content_hash)
        .await
        .map_err(error_response)?;

    Ok(to_json(&verification))
}

async fn commit_campaign_to_ledger(
    State(state): State<AppState>,
    Path(campaign_id): Path<i64>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    info!("POST /campaigns/{}/commit", campaign_id);

    let commit = commit_campaign(&state.db, &state.ledger, &state.audit, campaign_id)
        .await
        .map_err(error_response)?;

    Ok(Json(json!({
        "campaign_id": campaign_id,
        "ledger_campaign_id": commit.campaign_ledger_id,
        "tx_ref": commit.tx_ref,
    })))
}

async fn finalize_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<i64>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    info!("POST /campaigns/{}/finalize", campaign_id);

    let result = state
        .finalizer
        .finalize(campaign_id)
        .await
        .map_err(error_response)?;

    Ok(to_json(&result))
}

async fn get_results(
    State(state): State<AppState>,
    Path(campaign_id): Path<i64>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let result = state
        .finalizer
        .results(campaign_id)
        .await
        .map_err(error_response)?;

    Ok(to_json(&result))
}

fn to_json<T: Serialize>(value: &T) -> Json<Value> {
    Json(serde_json::to_value(value).unwrap_or_else(|_| json!({})))
}

fn receipt_json(receipt: &VoteReceipt, state: &AppState) -> Value {
    let display = receipt.display_status(chrono::Utc::now(), state.config.confirm_timeout());
    let mut value = serde_json::to_value(receipt).unwrap_or_else(|_| json!({}));
    if let Some(map) = value.as_object_mut() {
        map.insert(
            "display_status".to_string(),
            serde_json::to_value(display).unwrap_or(Value::Null),
        );
    }
    value
}

fn error_response(err: VoteError) -> (StatusCode, Json<Value>) {
    let (status, kind) = match &err {
        VoteError::InvalidVoteRequest(_) => (StatusCode::BAD_REQUEST, "invalid_vote_request"),
        VoteError::AlreadyVoted { .. } => (StatusCode::CONFLICT, "already_voted"),
        VoteError::IntegrityConflict { .. } => (StatusCode::CONFLICT, "integrity_conflict"),
        VoteError::InvalidTransition(_) => (StatusCode::CONFLICT, "invalid_transition"),
        VoteError::Store(StoreError::CampaignNotFound(_)) | VoteError::Store(StoreError::VoteNotFound) => {
            (StatusCode::NOT_FOUND, "not_found")
        }
        VoteError::Ledger(_) => (StatusCode::BAD_GATEWAY, "ledger"),
        VoteError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store"),
    };

    (status, Json(json!({"error": kind, "message": err.to_string()})))
}
