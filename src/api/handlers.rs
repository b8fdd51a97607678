//! The node's read-only HTTP surface, served alongside the gossip socket
//! so a miner or explorer can poll chain state without joining the mesh.

use crate::consensus::ChainManager;
use crate::core::{Block, Transaction};
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub struct ApiState {
    pub chain: Arc<ChainManager>,
}

#[derive(Serialize)]
struct HeightResponse {
    height: u64,
}

async fn get_height(State(state): State<Arc<ApiState>>) -> Json<HeightResponse> {
    Json(HeightResponse { height: state.chain.height() })
}

async fn get_block(State(state): State<Arc<ApiState>>, Path(height): Path<u64>) -> Result<Json<Block>, StatusCode> {
    state.chain.get_block(height).map(Json).map_err(|_| StatusCode::NOT_FOUND)
}

#[derive(Deserialize)]
struct RangeQuery {
    start: u64,
    end: u64,
}

const MAX_BLOCK_RANGE: u64 = 500;

async fn get_blocks(
    State(state): State<Arc<ApiState>>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<Block>>, StatusCode> {
    if range.end < range.start || range.end - range.start > MAX_BLOCK_RANGE {
        return Err(StatusCode::BAD_REQUEST);
    }
    state
        .chain
        .get_blocks(range.start, range.end)
        .map(Json)
        .map_err(|_| StatusCode::NOT_FOUND)
}

async fn get_mempool(State(state): State<Arc<ApiState>>) -> Json<Vec<Transaction>> {
    Json(state.chain.mempool_snapshot())
}

#[derive(Serialize)]
struct DiffResponse {
    diff: String,
}

async fn get_diff(State(state): State<Arc<ApiState>>) -> Json<DiffResponse> {
    Json(DiffResponse { diff: hex::encode(state.chain.current_target()) })
}

#[derive(Serialize)]
struct FeeResponse {
    fee: u64,
}

async fn get_mint_fee(State(state): State<Arc<ApiState>>) -> Json<FeeResponse> {
    Json(FeeResponse { fee: state.chain.mint_fee() })
}

#[derive(Serialize)]
struct RewardResponse {
    reward: u64,
}

async fn get_reward(State(state): State<Arc<ApiState>>) -> Json<RewardResponse> {
    Json(RewardResponse { reward: state.chain.reward() })
}

/// `:addr` or `:addr.token`, as used by every balance-family route.
fn split_address_token(raw: &str) -> (String, Option<String>) {
    match raw.split_once('.') {
        Some((addr, token)) => (addr.to_string(), Some(token.to_string())),
        None => (raw.to_string(), None),
    }
}

async fn get_balance(State(state): State<Arc<ApiState>>, Path(raw): Path<String>) -> Json<u64> {
    let (address, token) = split_address_token(&raw);
    Json(state.chain.balance(&address, token.as_deref()))
}

async fn get_locked_balance(State(state): State<Arc<ApiState>>, Path(raw): Path<String>) -> Json<u64> {
    let (address, token) = split_address_token(&raw);
    Json(state.chain.locked_balance(&address, token.as_deref()))
}

async fn get_balance_including_mempool(State(state): State<Arc<ApiState>>, Path(raw): Path<String>) -> Json<u64> {
    let (address, token) = split_address_token(&raw);
    Json(state.chain.balance_including_mempool(&address, token.as_deref()))
}

async fn get_tokens(State(state): State<Arc<ApiState>>, Path(address): Path<String>) -> Json<Vec<String>> {
    Json(state.chain.tokens_held(&address))
}

#[derive(Serialize)]
struct TokenInfoResponse {
    mining_reward: u64,
    airdrop: u64,
}

async fn get_token_info(
    State(state): State<Arc<ApiState>>,
    Path(token): Path<String>,
) -> Result<Json<TokenInfoResponse>, StatusCode> {
    state
        .chain
        .mint_entry(&token)
        .map(|entry| Json(TokenInfoResponse { mining_reward: entry.mining_reward, airdrop: entry.airdrop }))
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Serialize)]
struct TokenCountResponse {
    count: usize,
}

async fn get_token_count(State(state): State<Arc<ApiState>>) -> Json<TokenCountResponse> {
    Json(TokenCountResponse { count: state.chain.mint_count() })
}

#[derive(Serialize)]
struct TokenByIndexResponse {
    token: String,
    mining_reward: u64,
    airdrop: u64,
}

async fn get_token_by_index(
    State(state): State<Arc<ApiState>>,
    Path(index): Path<usize>,
) -> Result<Json<TokenByIndexResponse>, StatusCode> {
    state
        .chain
        .mint_nth(index)
        .map(|(token, entry)| Json(TokenByIndexResponse { token, mining_reward: entry.mining_reward, airdrop: entry.airdrop }))
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Serialize)]
struct HistoryEntry {
    height: u64,
    #[serde(flatten)]
    transaction: Transaction,
}

async fn get_history(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> Result<Json<Vec<HistoryEntry>>, StatusCode> {
    state
        .chain
        .history(&address)
        .map(|entries| Json(entries.into_iter().map(|(height, transaction)| HistoryEntry { height, transaction }).collect()))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[derive(Serialize)]
struct BlockSearchResponse {
    block: Block,
    height: u64,
}

async fn search_blocks(
    State(state): State<Arc<ApiState>>,
    Path(hash): Path<String>,
) -> Result<Json<BlockSearchResponse>, StatusCode> {
    match state.chain.find_block_by_hash(&hash) {
        Ok(Some((height, block))) => Ok(Json(BlockSearchResponse { block, height })),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

#[derive(Serialize)]
struct TxSearchResponse {
    results: Vec<HistoryEntry>,
}

async fn search_tx(
    State(state): State<Arc<ApiState>>,
    Path(query): Path<String>,
) -> Result<Json<TxSearchResponse>, StatusCode> {
    match state.chain.find_transaction(&query) {
        Ok(Some((height, transaction))) => Ok(Json(TxSearchResponse { results: vec![HistoryEntry { height, transaction }] })),
        Ok(None) => Ok(Json(TxSearchResponse { results: Vec::new() })),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

pub fn create_router(chain: Arc<ChainManager>) -> Router {
    let state = Arc::new(ApiState { chain });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/height", get(get_height))
        .route("/block/:h", get(get_block))
        .route("/blocks", get(get_blocks))
        .route("/mempool", get(get_mempool))
        .route("/diff", get(get_diff))
        .route("/mint-fee", get(get_mint_fee))
        .route("/reward", get(get_reward))
        .route("/balance/:addr", get(get_balance))
        .route("/locked/:addr", get(get_locked_balance))
        .route("/balance-mempool/:addr", get(get_balance_including_mempool))
        .route("/tokens/:addr", get(get_tokens))
        .route("/token-info/:token", get(get_token_info))
        .route("/token-count", get(get_token_count))
        .route("/token/:i", get(get_token_by_index))
        .route("/history/:addr", get(get_history))
        .route("/search-blocks/:hash", get(search_blocks))
        .route("/search-tx/:query", get(search_tx))
        .layer(cors)
        .with_state(state)
}
