//! HTTP front end over the orchestrator.
//!
//! Exposes the EVM analysis pipeline as `POST /analyze/evm` plus `GET
//! /health`, matching §6's "one service per source language" contract: each
//! service takes `(before_revision, after_revision, diff_log_path)` and
//! returns artifact file paths, a status, and a message. `AnalysisService` is
//! the trait that contract is modeled as, so a future non-EVM language can be
//! mounted at a sibling route without touching the EVM core.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, instrument};

use crate::config::Config;
use crate::orchestrator::{self, CompiledArtifact};
use crate::source::Source;

#[derive(Debug, Deserialize)]
pub struct RevisionRequest {
    /// Path to the compiled-artifact JSON for this revision (§6's "Input
    /// file layout": `evm.deployedBytecode.{opcodes,sourceMap,object}`,
    /// `evm.methodIdentifiers`, `sources[path].ast`).
    pub artifact_path: PathBuf,
    /// Path to the Solidity source file the bytecode was compiled from.
    pub source_path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub request_id: String,
    pub before_revision: RevisionRequest,
    pub after_revision: RevisionRequest,
    pub diff_log_path: Option<PathBuf>,
    pub config_path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub message: String,
    pub artifact_path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}

fn error_response(status: StatusCode, error: &str, details: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            details: Some(details.into()),
        }),
    )
        .into_response()
}

/// The per-language analysis contract from §6: one method, one revision pair
/// plus an optional diff, one artifact written to disk.
pub trait AnalysisService {
    fn analyze(
        &self,
        request_id: &str,
        before: &CompiledArtifact,
        after: &CompiledArtifact,
        diff_text: Option<&str>,
        config: &Config,
    ) -> crate::error::Result<PathBuf>;
}

pub struct EvmAnalysisService;

impl AnalysisService for EvmAnalysisService {
    fn analyze(
        &self,
        request_id: &str,
        before: &CompiledArtifact,
        after: &CompiledArtifact,
        diff_text: Option<&str>,
        config: &Config,
    ) -> crate::error::Result<PathBuf> {
        orchestrator::run(request_id.to_string(), before, after, diff_text, config)?;
        Ok(config.dest_path.clone())
    }
}

/// Solidity compiler standard-json output, reduced to the fields the
/// interpreter and source-map annotator actually read.
#[derive(Debug, Deserialize)]
struct CompiledJson {
    evm: CompiledEvm,
    #[serde(default)]
    ast: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CompiledEvm {
    #[serde(rename = "deployedBytecode")]
    deployed_bytecode: DeployedBytecode,
}

#[derive(Debug, Deserialize)]
struct DeployedBytecode {
    object: String,
    #[serde(rename = "sourceMap", default)]
    source_map: String,
}

fn load_revision(req: &RevisionRequest) -> crate::error::Result<CompiledArtifact> {
    let raw = std::fs::read_to_string(&req.artifact_path).map_err(|e| {
        crate::error::AnalyzerError::Compilation(format!("{}: {}", req.artifact_path.display(), e))
    })?;
    let compiled: CompiledJson = serde_json::from_str(&raw)
        .map_err(|e| crate::error::AnalyzerError::Compilation(e.to_string()))?;
    let object = compiled
        .evm
        .deployed_bytecode
        .object
        .trim_start_matches("0x");
    let bytecode = hex::decode(object)
        .map_err(|e| crate::error::AnalyzerError::Compilation(e.to_string()))?;
    let source_bytes = std::fs::read(&req.source_path).map_err(|e| {
        crate::error::AnalyzerError::Compilation(format!("{}: {}", req.source_path.display(), e))
    })?;
    Ok(CompiledArtifact {
        bytecode,
        source_map: compiled.evm.deployed_bytecode.source_map,
        ast: compiled.ast,
        source: Source::new(req.source_path.display().to_string(), source_bytes),
    })
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "xgraph-diff".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Guards the EVM pipeline: the algebraic simplifier backing the interpreter
/// is not reentrant, so concurrent requests are serialized behind this lock
/// (§5) rather than given one interpreter instance each.
struct AppState {
    evm_lock: Mutex<()>,
    service: EvmAnalysisService,
}

#[instrument(skip_all, fields(request_id = %payload.request_id))]
async fn analyze_evm_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AnalyzeRequest>,
) -> impl IntoResponse {
    let config = match Config::load(&payload.config_path) {
        Ok(c) => c,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "invalid config", e.to_string()),
    };

    let before = match load_revision(&payload.before_revision) {
        Ok(a) => a,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, "failed to load before-revision", e.to_string())
        }
    };
    let after = match load_revision(&payload.after_revision) {
        Ok(a) => a,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, "failed to load after-revision", e.to_string())
        }
    };
    let diff_text = match &payload.diff_log_path {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(t) => Some(t),
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, "failed to read diff log", e.to_string())
            }
        },
        None => None,
    };

    let _permit = state.evm_lock.lock().await;
    let request_id = payload.request_id.clone();
    let result = tokio::task::spawn_blocking(move || {
        state
            .service
            .analyze(&request_id, &before, &after, diff_text.as_deref(), &config)
    })
    .await;

    match result {
        Ok(Ok(artifact_path)) => Json(AnalyzeResponse {
            success: true,
            message: "analysis complete".to_string(),
            artifact_path: Some(artifact_path),
        })
        .into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "analysis failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "analysis failed", e.to_string())
        }
        Err(join_err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "analysis task panicked",
            join_err.to_string(),
        ),
    }
}

pub async fn run_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(AppState {
        evm_lock: Mutex::new(()),
        service: EvmAnalysisService,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/analyze/evm", post(analyze_evm_handler))
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "xgraph-diff server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiled_json_reads_object_and_source_map() {
        let raw = r#"{
            "evm": { "deployedBytecode": { "object": "0x6001", "sourceMap": "0:1:0:-:0" } },
            "ast": { "nodeType": "SourceUnit" }
        }"#;
        let compiled: CompiledJson = serde_json::from_str(raw).unwrap();
        assert_eq!(compiled.evm.deployed_bytecode.object, "0x6001");
        assert_eq!(compiled.evm.deployed_bytecode.source_map, "0:1:0:-:0");
    }
}
