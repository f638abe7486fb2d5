//! HTTP JSON-RPC Server
//!
//! Provides HTTP endpoint for the lease service verbs. Params may be
//! positional (`["abc"]`) or named (`{"prefix": "abc"}`).

use crate::methods::{
    handle_check_tx, handle_curr_block, handle_difficulty_estimate, handle_issue_tx, handle_ping,
    handle_prefix_info, handle_valid_block_id, CheckTxRequest, IssueTxRequest, PrefixInfoRequest,
    RpcContext, RpcError, ValidBlockIdRequest,
};
use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// JSON-RPC request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

/// HTTP RPC Server
pub struct HttpRpcServer {
    context: Arc<RpcContext>,
}

impl HttpRpcServer {
    /// Create a new HTTP RPC server
    pub fn new(context: Arc<RpcContext>) -> Self {
        Self { context }
    }

    /// Create the Axum router
    pub fn router(self) -> Router {
        // CORS layer to allow browser clients
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        Router::new()
            .route("/", post(handle_rpc))
            .layer(cors)
            .with_state(self.context)
    }

    /// Run the server until `shutdown` resolves
    pub async fn run<F>(self, addr: &str, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP RPC server listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

/// Handle JSON-RPC request
async fn handle_rpc(
    State(context): State<Arc<RpcContext>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    (StatusCode::OK, Json(respond(&context, request)))
}

fn respond(context: &RpcContext, request: JsonRpcRequest) -> JsonRpcResponse {
    match dispatch_method(context, &request.method, request.params) {
        Ok(value) => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result: Some(value),
            error: None,
        },
        Err(e) => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result: None,
            error: Some(JsonRpcError {
                code: error_code(&e),
                message: e.to_string(),
            }),
        },
    }
}

/// Single string param, by position or by name
fn string_param(params: &Value, name: &str) -> Result<String, RpcError> {
    let value = match params {
        Value::Array(values) => values.first(),
        Value::Object(map) => map.get(name),
        _ => None,
    };
    value
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| RpcError::InvalidParams(format!("Missing {}", name)))
}

fn to_value<T: Serialize>(response: T) -> Result<Value, RpcError> {
    serde_json::to_value(response).map_err(|e| RpcError::InternalError(e.to_string()))
}

/// Dispatch to appropriate method handler
pub fn dispatch_method(ctx: &RpcContext, method: &str, params: Value) -> Result<Value, RpcError> {
    tracing::debug!("RPC method called: {}", method);
    match method {
        "ping" => to_value(handle_ping()?),

        "issueTx" => {
            let request = IssueTxRequest {
                tx: string_param(&params, "tx")?,
            };
            to_value(handle_issue_tx(ctx, request)?)
        }

        "checkTx" => {
            let request = CheckTxRequest {
                tx_id: string_param(&params, "txID")?,
            };
            to_value(handle_check_tx(ctx, request)?)
        }

        "currBlock" => to_value(handle_curr_block(ctx)?),

        "validBlockID" => {
            let request = ValidBlockIdRequest {
                block_id: string_param(&params, "blockID")?,
            };
            to_value(handle_valid_block_id(ctx, request)?)
        }

        "difficultyEstimate" => to_value(handle_difficulty_estimate(ctx)?),

        "prefixInfo" => {
            let request = PrefixInfoRequest {
                prefix: string_param(&params, "prefix")?,
            };
            to_value(handle_prefix_info(ctx, request)?)
        }

        _ => Err(RpcError::MethodNotFound(method.to_string())),
    }
}

/// Map error to JSON-RPC error code
fn error_code(error: &RpcError) -> i32 {
    match error {
        RpcError::InvalidParams(_) => -32602,
        RpcError::MethodNotFound(_) => -32601,
        RpcError::InternalError(_) => -32603,
        RpcError::Rejected(_) => -32000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use ed25519_dalek::SigningKey;
    use lease_program::{
        BaseTx, ClaimTx, Database, Genesis, LifelineTx, MemoryDatabase, Transaction,
        UnsignedTransaction,
    };
    use lease_runtime::{ManualClock, NoopGossip, Vm, VmConfig};
    use serde_json::json;

    fn test_genesis() -> Genesis {
        Genesis {
            claim_reward: 1_000,
            min_difficulty: 2,
            ..Default::default()
        }
    }

    fn context() -> RpcContext {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let vm = Vm::new(
            test_genesis(),
            VmConfig::default(),
            db,
            Arc::new(ManualClock::new(100)),
            Arc::new(NoopGossip),
        )
        .unwrap();
        RpcContext { vm: Arc::new(vm) }
    }

    fn signed(ctx: &RpcContext, make: impl FnOnce(BaseTx) -> UnsignedTransaction) -> Transaction {
        let key = SigningKey::from_bytes(&[3u8; 32]);
        let base = BaseTx {
            sender: key.verifying_key().to_bytes(),
            block_id: ctx.vm.preferred(),
            prefix: "abc".to_string(),
            magic: test_genesis().magic,
            max_units: u64::MAX,
            graffiti: 0,
        };
        let mut unsigned = make(base);
        unsigned.mine(ctx.vm.difficulty_estimate().unwrap() * 4);
        unsigned.sign(&key)
    }

    #[test]
    fn test_ping_and_unknown_method() {
        let ctx = context();
        assert_eq!(dispatch_method(&ctx, "ping", Value::Null).unwrap(), json!({"success": true}));

        let err = dispatch_method(&ctx, "getSlot", Value::Null).unwrap_err();
        assert_eq!(error_code(&err), -32601);
    }

    #[test]
    fn test_issue_tx_then_check_after_accept() {
        let ctx = context();
        let tx = signed(&ctx, |base| UnsignedTransaction::Claim(ClaimTx { base }));
        let encoded = BASE64.encode(tx.to_bytes());

        let reply = dispatch_method(&ctx, "issueTx", json!([encoded])).unwrap();
        assert_eq!(reply["success"], json!(true));
        assert_eq!(reply["txID"], json!(tx.id().to_string()));

        let check = json!({"txID": tx.id().to_string()});
        let reply = dispatch_method(&ctx, "checkTx", check.clone()).unwrap();
        assert_eq!(reply["confirmed"], json!(false));

        let block = ctx.vm.build_block().unwrap();
        ctx.vm.set_preference(block.id()).unwrap();
        ctx.vm.accept_block(&block.id()).unwrap();

        let reply = dispatch_method(&ctx, "checkTx", check).unwrap();
        assert_eq!(reply["confirmed"], json!(true));

        let reply = dispatch_method(&ctx, "currBlock", Value::Null).unwrap();
        assert_eq!(reply["blockID"], json!(block.id().to_string()));

        let reply = dispatch_method(&ctx, "prefixInfo", json!({"prefix": "abc"})).unwrap();
        assert_eq!(reply["info"]["expiry"], json!(1_100));
        assert_eq!(
            reply["info"]["owner"],
            json!(bs58::encode(tx.sender()).into_string())
        );
    }

    #[test]
    fn test_rejected_tx_reports_error_text() {
        let ctx = context();
        let tx = signed(&ctx, |base| {
            UnsignedTransaction::Lifeline(LifelineTx { base, units: 1 })
        });

        let err = dispatch_method(&ctx, "issueTx", json!([BASE64.encode(tx.to_bytes())])).unwrap_err();
        assert_eq!(error_code(&err), -32000);
        assert_eq!(err.to_string(), lease_program::ChainError::PrefixMissing.to_string());
    }

    #[test]
    fn test_invalid_params() {
        let ctx = context();
        for (method, params) in [
            ("issueTx", json!(["not base64!"])),
            ("issueTx", Value::Null),
            ("checkTx", json!(["zz"])),
            ("validBlockID", json!({})),
            ("prefixInfo", json!(["Not-Valid"])),
        ] {
            let err = dispatch_method(&ctx, method, params).unwrap_err();
            assert_eq!(error_code(&err), -32602, "{}", method);
        }
    }

    #[test]
    fn test_block_queries() {
        let ctx = context();
        let genesis_id = ctx.vm.last_accepted().to_string();

        let reply = dispatch_method(&ctx, "validBlockID", json!([genesis_id])).unwrap();
        assert_eq!(reply["valid"], json!(true));

        let reply = dispatch_method(&ctx, "difficultyEstimate", Value::Null).unwrap();
        assert!(reply["difficulty"].as_u64().unwrap() >= test_genesis().min_difficulty);

        let reply = dispatch_method(&ctx, "prefixInfo", json!(["abc"])).unwrap();
        assert_eq!(reply["info"], Value::Null);
    }

    #[test]
    fn test_response_envelope() {
        let ctx = context();
        let request: JsonRpcRequest = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "nope"
        }))
        .unwrap();
        let response = respond(&ctx, request);
        assert_eq!(response.id, json!(7));
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().code, -32601);
    }
}
