use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::api::dto::{BuildDto, TreeDto};
use crate::application::{CompareUsecase, ImportPipeline, ImportTarget};
use crate::common::config::Settings;
use crate::domain::history::historical_calls;
use crate::domain::model::BuildKey;
use crate::domain::payload::BuildPayload;
use crate::domain::store::BuildStore;

#[derive(Debug, Deserialize)]
struct CommandReq {
    command: String,
    params: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ImportParams {
    payload: serde_json::Value,
    project: Option<String>,
    revision: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BuildParams {
    project: String,
    revision: String,
    /// Revision of the comparison build; defaults to the previous build.
    against: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TraceDiffParams {
    project: String,
    revision: String,
    label: String,
    against: Option<String>,
    against_label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    project: String,
    revision: String,
    labels: Vec<String>,
}

/// Shared by every connection.
pub struct ServerState {
    pub store: Arc<dyn BuildStore>,
    pub settings: Settings,
    /// Imports of the same (project, revision) must not interleave.
    import_lock: Mutex<()>,
}

impl ServerState {
    pub fn new(store: Arc<dyn BuildStore>, settings: Settings) -> Self {
        Self {
            store,
            settings,
            import_lock: Mutex::new(()),
        }
    }
}

pub fn start_server(port: u16, state: Arc<ServerState>) -> Result<()> {
    let address = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&address)
        .with_context(|| format!("Failed to bind to {}", address))?;

    info!(%address, "API server listening");
    serve(listener, state)
}

/// Accept connections forever, one thread per connection.
pub fn serve(listener: TcpListener, state: Arc<ServerState>) -> Result<()> {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, &state) {
                        warn!(error = %e, "connection error");
                    }
                });
            }
            Err(e) => error!(error = %e, "accept error"),
        }
    }

    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &ServerState) -> Result<()> {
    // Clone stream for reading/writing
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            break; // Connection closed
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match process_command(trimmed, state) {
            Ok(data) => json!({
                "status": "success",
                "data": data
            }),
            Err(e) => json!({
                "status": "error",
                "message": format!("{:#}", e)
            }),
        };

        let response_str = serde_json::to_string(&response)?;
        stream.write_all(response_str.as_bytes())?;
        stream.write_all(b"\n")?;

        if let Ok(req) = serde_json::from_str::<CommandReq>(trimmed) {
            if req.command == "SHUTDOWN" {
                info!("shutdown requested");
                std::process::exit(0);
            }
        }
    }
    Ok(())
}

fn params<T: DeserializeOwned>(command: &str, params: Option<serde_json::Value>) -> Result<T> {
    let params = params.ok_or_else(|| anyhow::anyhow!("Missing params for {}", command))?;
    serde_json::from_value(params).with_context(|| format!("Invalid params for {}", command))
}

fn process_command(json_str: &str, state: &ServerState) -> Result<serde_json::Value> {
    let req: CommandReq = serde_json::from_str(json_str)
        .context("Invalid JSON format")?;

    match req.command.as_str() {
        "PING" => Ok(json!("PONG")),
        "IMPORT" => handle_import(params("IMPORT", req.params)?, state),
        "TREE" => handle_tree(params("TREE", req.params)?, state),
        "TRACE_DIFF" => handle_trace_diff(params("TRACE_DIFF", req.params)?, state),
        "CHANGES" => handle_changes(params("CHANGES", req.params)?, state),
        "HISTORY" => handle_history(params("HISTORY", req.params)?, state),
        "SHUTDOWN" => Ok(json!("Shutting down...")),
        _ => anyhow::bail!("Unknown command: {}", req.command),
    }
}

fn handle_import(params: ImportParams, state: &ServerState) -> Result<serde_json::Value> {
    let payload: BuildPayload =
        serde_json::from_value(params.payload).context("Invalid report payload")?;
    let target = ImportTarget {
        project: params.project,
        revision: params.revision,
    };

    let _guard = state
        .import_lock
        .lock()
        .map_err(|_| anyhow::anyhow!("Import lock poisoned"))?;
    let build = ImportPipeline::new(state.store.as_ref()).import(&payload, &target)?;

    Ok(serde_json::to_value(BuildDto::from(&build))?)
}

fn handle_tree(params: BuildParams, state: &ServerState) -> Result<serde_json::Value> {
    let compare = CompareUsecase::new(state.store.as_ref());
    let key = BuildKey::new(params.project, params.revision);
    let build = compare.build(&key)?;
    let tree = compare.tree(&key)?;
    Ok(serde_json::to_value(TreeDto::new(&build, &tree))?)
}

fn handle_trace_diff(params: TraceDiffParams, state: &ServerState) -> Result<serde_json::Value> {
    let compare = CompareUsecase::new(state.store.as_ref());
    let against = params
        .against
        .map(|revision| BuildKey::new(params.project.clone(), revision));
    let key = BuildKey::new(params.project, params.revision);
    let diff = compare.trace_diff(
        &key,
        &params.label,
        against.as_ref(),
        params.against_label.as_deref(),
    )?;
    Ok(serde_json::to_value(diff)?)
}

fn handle_changes(params: BuildParams, state: &ServerState) -> Result<serde_json::Value> {
    let compare = CompareUsecase::new(state.store.as_ref());
    let against = params
        .against
        .map(|revision| BuildKey::new(params.project.clone(), revision));
    let key = BuildKey::new(params.project, params.revision);
    let changes = compare.changes(&key, against.as_ref())?;
    Ok(serde_json::to_value(changes)?)
}

fn handle_history(params: HistoryParams, state: &ServerState) -> Result<serde_json::Value> {
    let compare = CompareUsecase::new(state.store.as_ref());
    let build = compare.build(&BuildKey::new(params.project, params.revision))?;
    let labels: Vec<&str> = params.labels.iter().map(String::as_str).collect();
    let series: BTreeMap<_, _> = historical_calls(
        state.store.as_ref(),
        &build,
        &labels,
        &state.settings.call_types,
        state.settings.history_points,
    )?;
    Ok(serde_json::to_value(series)?)
}
