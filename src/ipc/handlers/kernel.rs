//! Request handlers for the `kernel` service.
//!
//! Each handler pulls its arguments out of the request body by hand rather
//! than deriving a `Deserialize` request struct per method: the wire shapes
//! are small and this keeps every field's "missing" and "wrong type" error
//! messages in one place.

use crate::driver::{Capabilities, FilesystemMount, KernelMode, Language};
use crate::ipc::router::DispatchResponse;
use crate::kernel::manager::{CreateRequest, KernelManager};
use crate::types::{Error, KernelId, Result};
use serde_json::{json, Value};
use std::collections::HashMap;

fn field<'a>(body: &'a Value, key: &str) -> Result<&'a Value> {
    body.get(key)
        .ok_or_else(|| Error::policy_error(format!("missing required field '{}'", key)))
}

fn str_field<'a>(body: &'a Value, key: &str) -> Result<&'a str> {
    field(body, key)?
        .as_str()
        .ok_or_else(|| Error::policy_error(format!("field '{}' must be a string", key)))
}

fn opt_str_field<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str)
}

fn opt_u64_field(body: &Value, key: &str) -> Option<u64> {
    body.get(key).and_then(Value::as_u64)
}

fn parse_kernel_id(body: &Value) -> Result<KernelId> {
    let raw = str_field(body, "id")?;
    KernelId::from_string(raw.to_string()).map_err(|e| Error::policy_error(e.to_string()))
}

fn parse_capabilities(body: &Value) -> Result<Capabilities> {
    let Some(caps) = body.get("capabilities") else {
        return Ok(Capabilities::default());
    };
    serde_json::from_value(caps.clone()).map_err(Error::from)
}

fn parse_filesystem(body: &Value) -> Option<FilesystemMount> {
    body.get("filesystem")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

fn parse_env(body: &Value) -> HashMap<String, String> {
    body.get("env")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

pub async fn create(manager: &mut KernelManager, body: Value) -> Result<DispatchResponse> {
    let mode: KernelMode = str_field(&body, "mode")?
        .parse()
        .map_err(Error::policy_error)?;
    let language: Language = str_field(&body, "language")?
        .parse()
        .map_err(Error::policy_error)?;

    let request = CreateRequest {
        namespace: opt_str_field(&body, "namespace").map(str::to_string),
        base_id: str_field(&body, "id")?.to_string(),
        mode,
        language,
        filesystem: parse_filesystem(&body),
        capabilities: parse_capabilities(&body)?,
        env: parse_env(&body),
        startup_script: opt_str_field(&body, "startupScript").map(str::to_string),
        inactivity_timeout_ms: opt_u64_field(&body, "inactivityTimeoutMs"),
        max_execution_time_ms: opt_u64_field(&body, "maxExecutionTimeMs"),
    };

    let summary = manager.create(request).await?;
    Ok(DispatchResponse::Single(json!({
        "id": summary.id.as_str(),
        "mode": summary.mode,
        "language": summary.language,
        "created": summary.created,
    })))
}

pub async fn list(manager: &mut KernelManager, body: Value) -> Result<DispatchResponse> {
    let namespace = opt_str_field(&body, "namespace");
    let summaries = manager.list(namespace).await;
    let body = summaries
        .into_iter()
        .map(|s| {
            json!({
                "id": s.id.as_str(),
                "mode": s.mode,
                "language": s.language,
                "status": s.status,
                "created": s.created,
                "namespace": s.namespace,
            })
        })
        .collect::<Vec<_>>();
    Ok(DispatchResponse::Single(Value::Array(body)))
}

pub async fn destroy(manager: &mut KernelManager, body: Value) -> Result<DispatchResponse> {
    let id = parse_kernel_id(&body)?;
    manager.destroy(&id).await?;
    Ok(DispatchResponse::Single(json!({})))
}

pub async fn destroy_all(manager: &mut KernelManager, body: Value) -> Result<DispatchResponse> {
    let namespace = opt_str_field(&body, "namespace");
    let count = manager.destroy_all(namespace).await?;
    Ok(DispatchResponse::Single(json!({ "count": count })))
}

pub async fn execute(manager: &mut KernelManager, body: Value) -> Result<DispatchResponse> {
    let id = parse_kernel_id(&body)?;
    let code = str_field(&body, "code")?.to_string();
    let execution_id = manager.execute(&id, code).await?;
    Ok(DispatchResponse::Single(json!({
        "executionId": execution_id.as_str(),
    })))
}

pub async fn execute_stream(
    manager: &mut KernelManager,
    body: Value,
    stream_channel_capacity: usize,
) -> Result<DispatchResponse> {
    let id = parse_kernel_id(&body)?;
    let code = str_field(&body, "code")?.to_string();
    let (execution_id, mut events) = manager.execute_stream(&id, code).await?;

    let (out_tx, out_rx) = tokio::sync::mpsc::channel(stream_channel_capacity);
    tokio::spawn(async move {
        let first = json!({ "executionId": execution_id.as_str() });
        if out_tx.send(first).await.is_err() {
            return;
        }
        while let Some(event) = events.recv().await {
            let chunk = match serde_json::to_value(&event) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("failed to serialize event for executeStream: {}", e);
                    continue;
                }
            };
            if out_tx.send(chunk).await.is_err() {
                break;
            }
        }
    });

    Ok(DispatchResponse::Stream(out_rx))
}

pub async fn input_reply(manager: &mut KernelManager, body: Value) -> Result<DispatchResponse> {
    let id = parse_kernel_id(&body)?;
    let value = str_field(&body, "value")?.to_string();
    manager.input_reply(&id, value).await?;
    Ok(DispatchResponse::Single(json!({})))
}

pub async fn interrupt(manager: &mut KernelManager, body: Value) -> Result<DispatchResponse> {
    let id = parse_kernel_id(&body)?;
    let interrupted = manager.interrupt(&id)?;
    Ok(DispatchResponse::Single(json!({ "interrupted": interrupted })))
}

pub async fn restart(manager: &mut KernelManager, body: Value) -> Result<DispatchResponse> {
    let id = parse_kernel_id(&body)?;
    let restarted = manager.restart(&id).await?;
    Ok(DispatchResponse::Single(json!({ "restarted": restarted })))
}

pub async fn force_terminate(manager: &mut KernelManager, body: Value) -> Result<DispatchResponse> {
    let id = parse_kernel_id(&body)?;
    let reason = opt_str_field(&body, "reason").map(str::to_string);
    let terminated = manager.force_terminate(&id, reason).await?;
    Ok(DispatchResponse::Single(json!({ "terminated": terminated })))
}

pub async fn info(manager: &mut KernelManager, body: Value) -> Result<DispatchResponse> {
    let id = parse_kernel_id(&body)?;
    let info = manager.info(&id)?;
    Ok(DispatchResponse::Single(json!({
        "status": info.summary.status,
        "created": info.summary.created,
        "lastActivity": info.execution.last_activity,
        "ongoing": info.execution.count,
        "longestRunningMs": info.execution.longest_running_ms,
        "stuck": info.execution.stuck,
    })))
}

pub async fn pool_stats(manager: &mut KernelManager, _body: Value) -> Result<DispatchResponse> {
    let stats = manager.pool_stats();
    let body: HashMap<String, Value> = stats
        .into_iter()
        .map(|(key, stats)| {
            (
                key.to_string(),
                json!({ "available": stats.available, "cap": stats.cap }),
            )
        })
        .collect();
    Ok(DispatchResponse::Single(serde_json::to_value(body).map_err(Error::from)?))
}
