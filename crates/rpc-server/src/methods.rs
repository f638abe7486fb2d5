//! RPC Methods - JSON-RPC method handlers
//!
//! Service verbs over the lease VM. Ids are base58, transaction bytes base64.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use lease_program::{Id, PrefixInfo};
use lease_runtime::{Vm, VmError};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, sync::Arc};

/// RPC context shared across handlers
pub struct RpcContext {
    pub vm: Arc<Vm>,
}

// ============ Request/Response Types ============

#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IssueTxRequest {
    /// Base64 encoded transaction
    pub tx: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IssueTxResponse {
    #[serde(rename = "txID")]
    pub tx_id: String,
    /// Whether the mempool holds the transaction
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckTxRequest {
    #[serde(rename = "txID")]
    pub tx_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckTxResponse {
    pub confirmed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CurrBlockResponse {
    #[serde(rename = "blockID")]
    pub block_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidBlockIdRequest {
    #[serde(rename = "blockID")]
    pub block_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidBlockIdResponse {
    pub valid: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DifficultyEstimateResponse {
    pub difficulty: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrefixInfoRequest {
    pub prefix: String,
}

/// Lease record with the owner key in base58
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrefixInfoView {
    pub owner: String,
    pub created: u64,
    pub last_updated: u64,
    pub expiry: u64,
    pub previous_expiry: u64,
    pub units: u64,
}

impl From<PrefixInfo> for PrefixInfoView {
    fn from(info: PrefixInfo) -> Self {
        Self {
            owner: bs58::encode(info.owner).into_string(),
            created: info.created,
            last_updated: info.last_updated,
            expiry: info.expiry,
            previous_expiry: info.previous_expiry,
            units: info.units,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrefixInfoResponse {
    pub info: Option<PrefixInfoView>,
}

// ============ RPC Handlers ============

fn parse_id(value: &str) -> Result<Id, RpcError> {
    Id::from_str(value).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

/// Handle ping RPC method
pub fn handle_ping() -> Result<PingResponse, RpcError> {
    tracing::info!("ping");
    Ok(PingResponse { success: true })
}

/// Handle issueTx RPC method
pub fn handle_issue_tx(ctx: &RpcContext, params: IssueTxRequest) -> Result<IssueTxResponse, RpcError> {
    let tx_bytes = BASE64
        .decode(&params.tx)
        .map_err(|_| RpcError::InvalidParams("Invalid base64 encoding".to_string()))?;

    let (id, admitted) = ctx.vm.issue_tx(&tx_bytes)?;
    Ok(IssueTxResponse {
        tx_id: id.to_string(),
        success: admitted,
    })
}

/// Handle checkTx RPC method
pub fn handle_check_tx(ctx: &RpcContext, params: CheckTxRequest) -> Result<CheckTxResponse, RpcError> {
    let id = parse_id(&params.tx_id)?;
    Ok(CheckTxResponse {
        confirmed: ctx.vm.has_transaction(&id)?,
    })
}

/// Handle currBlock RPC method
pub fn handle_curr_block(ctx: &RpcContext) -> Result<CurrBlockResponse, RpcError> {
    Ok(CurrBlockResponse {
        block_id: ctx.vm.preferred().to_string(),
    })
}

/// Handle validBlockID RPC method
pub fn handle_valid_block_id(
    ctx: &RpcContext,
    params: ValidBlockIdRequest,
) -> Result<ValidBlockIdResponse, RpcError> {
    let id = parse_id(&params.block_id)?;
    Ok(ValidBlockIdResponse {
        valid: ctx.vm.valid_block_id(&id)?,
    })
}

/// Handle difficultyEstimate RPC method
pub fn handle_difficulty_estimate(ctx: &RpcContext) -> Result<DifficultyEstimateResponse, RpcError> {
    Ok(DifficultyEstimateResponse {
        difficulty: ctx.vm.difficulty_estimate()?,
    })
}

/// Handle prefixInfo RPC method
pub fn handle_prefix_info(
    ctx: &RpcContext,
    params: PrefixInfoRequest,
) -> Result<PrefixInfoResponse, RpcError> {
    lease_program::parser::check_prefix(&params.prefix)
        .map_err(|e| RpcError::InvalidParams(e.to_string()))?;
    Ok(PrefixInfoResponse {
        info: ctx.vm.prefix_info(&params.prefix)?.map(PrefixInfoView::from),
    })
}

// ============ Error Types ============

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    /// Transaction or query rejected by the VM; message is the VM error text
    #[error("{0}")]
    Rejected(String),
}

impl From<VmError> for RpcError {
    fn from(e: VmError) -> Self {
        match e {
            VmError::Chain(ref chain) if chain.kind() != lease_program::ErrorKind::Infrastructure => {
                RpcError::Rejected(e.to_string())
            }
            _ => RpcError::InternalError(e.to_string()),
        }
    }
}
