//! HTTP handlers for the node interface

use crate::core::{AcceptError, MempoolError, Miner, MiningError, Transaction};
use crate::network::message::{
    BalanceResponse, BlockResponse, MineRequest, MineResponse, StatusResponse, SubmitTxResponse,
    TxPoolResponse, NO_RELAY_HEADER,
};
use crate::network::node::NodeConfig;
use crate::network::peer::PeerSet;
use crate::network::sync::SharedChain;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub chain: SharedChain,
    pub peers: Arc<PeerSet>,
    pub config: Arc<NodeConfig>,
    /// Node shutdown; aborts in-flight mining
    pub shutdown: CancellationToken,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

pub type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

fn api_error(status: StatusCode, error: impl ToString) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: error.to_string(),
        }),
    )
}

fn internal(error: impl ToString) -> (StatusCode, Json<ApiError>) {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, error)
}

/// Unwrap a JSON body, reporting every decode failure as 400
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("bad json: {}", e.body_text())))
}

/// Like [`json_body`], but only a JSON object is decoded. Derived struct
/// impls would otherwise accept a sequence too.
fn json_object<T: DeserializeOwned>(
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> ApiResult<T> {
    let object = json_body(payload)?;
    serde_json::from_value(Value::Object(object))
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("bad json: {}", e)))
}

#[derive(Deserialize)]
pub struct BlockQuery {
    pub height: Option<String>,
}

#[derive(Deserialize)]
pub struct BalanceQuery {
    pub addr: Option<String>,
}

/// GET /status
pub async fn get_status(State(state): State<ApiState>) -> ApiResult<Json<StatusResponse>> {
    let chain = state.chain.read().await;
    let height = chain.status_height().map_err(internal)?;
    Ok(Json(StatusResponse {
        node_id: chain.node_id().to_string(),
        height,
    }))
}

/// GET /block?height=N
pub async fn get_block(
    State(state): State<ApiState>,
    Query(query): Query<BlockQuery>,
) -> ApiResult<Json<BlockResponse>> {
    let height: u64 = query
        .height
        .as_deref()
        .and_then(|h| h.trim().parse().ok())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "invalid height"))?;

    let block = state.chain.read().await.block(height).map_err(internal)?;
    match block {
        Some(block) => Ok(Json(BlockResponse { block })),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("block {} not found", height),
        )),
    }
}

/// POST /block - run a pushed block through acceptance
pub async fn post_block(
    State(state): State<ApiState>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let block = json_object::<BlockResponse>(payload)?.block;
    let height = block.height();

    let result = state.chain.write().await.accept_block(block);
    match result {
        Ok(_) => Ok(StatusCode::NO_CONTENT),
        Err(AcceptError::Storage(e)) => Err(internal(e)),
        Err(e) => {
            log::warn!("Rejected pushed block {}: {}", height, e);
            Err(api_error(StatusCode::BAD_REQUEST, e))
        }
    }
}

/// GET /txpool
pub async fn get_txpool(State(state): State<ApiState>) -> Json<TxPoolResponse> {
    let entries = state.chain.read().await.mempool_snapshot();
    Json(TxPoolResponse { entries })
}

/// POST /txpool - replace the pool wholesale
pub async fn post_txpool(
    State(state): State<ApiState>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let pool: TxPoolResponse = json_object(payload)?;
    state
        .chain
        .write()
        .await
        .replace_mempool(pool.entries)
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /tx - validate, pool, and relay one hop unless told not to
pub async fn submit_tx(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<Transaction>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitTxResponse>)> {
    let mut tx = json_body(payload)?;
    tx.ensure_id();
    let relayed = tx.clone();

    let result = state.chain.write().await.submit_transaction(tx);
    let id = match result {
        Ok(id) => id,
        Err(MempoolError::Storage(e)) => return Err(internal(e)),
        Err(e) => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                format!("tx invalid: {}", e),
            ))
        }
    };

    if !headers.contains_key(NO_RELAY_HEADER) && !state.peers.is_empty() {
        let peers = state.peers.clone();
        tokio::spawn(async move {
            let delivered = peers.relay_transaction(&relayed).await;
            log::debug!(
                "Relayed {} to {}/{} peers",
                relayed.id_hex(),
                delivered,
                peers.peers().len()
            );
        });
    }

    Ok((StatusCode::CREATED, Json(SubmitTxResponse { id })))
}

/// GET /balance?addr=A
pub async fn get_balance(
    State(state): State<ApiState>,
    Query(query): Query<BalanceQuery>,
) -> ApiResult<Json<BalanceResponse>> {
    let address = query
        .addr
        .filter(|a| !a.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "addr is required"))?;

    let balance = state
        .chain
        .read()
        .await
        .balance(&address)
        .map_err(internal)?;
    Ok(Json(BalanceResponse { address, balance }))
}

/// POST /mine - mine one block off the current tip and commit it
pub async fn mine(
    State(state): State<ApiState>,
    payload: Result<Json<MineRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<MineResponse>)> {
    let req = json_body(payload)?;
    if req.miner.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "miner is required"));
    }
    let difficulty = req.difficulty.unwrap_or(state.config.difficulty);
    let reward = req.reward.unwrap_or(state.config.reward);
    if reward < 0 {
        return Err(api_error(StatusCode::BAD_REQUEST, "reward must not be negative"));
    }

    // the lock is not held while mining
    let template = state
        .chain
        .read()
        .await
        .mining_template(&req.miner, reward)
        .map_err(internal)?;
    let count = template.transactions.len();
    let prev = template.prev.map(|b| b.header);

    // cancelled on shutdown, or when this future is dropped
    let cancel = state.shutdown.child_token();
    let _abort_on_drop = cancel.clone().drop_guard();
    let miner = Miner::new()
        .with_timeout(state.config.mining_timeout)
        .with_cancellation(cancel);
    let (block, _stats) = miner
        .mine_detached(prev, template.transactions, difficulty)
        .await
        .map_err(|e| match e {
            MiningError::UnsatisfiableDifficulty(_) => api_error(StatusCode::BAD_REQUEST, e),
            MiningError::TimedOut(_) | MiningError::Cancelled(_) => {
                api_error(StatusCode::SERVICE_UNAVAILABLE, e)
            }
            MiningError::Aborted(_) => internal(e),
        })?;

    let result = state.chain.write().await.commit_mined(block.clone());
    match result {
        Ok(_) => {}
        Err(e @ (AcceptError::StaleTip(_) | AcceptError::ForkConflict { .. })) => {
            log::info!("Discarding mined block {}: {}", block.height(), e);
            return Err(api_error(StatusCode::CONFLICT, e));
        }
        Err(e) => return Err(internal(e)),
    }

    Ok((
        StatusCode::CREATED,
        Json(MineResponse {
            height: block.height(),
            hash: block.header.hash_hex(),
            transactions: count,
        }),
    ))
}
