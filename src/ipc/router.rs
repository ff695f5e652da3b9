//! Maps an IPC request's `(service, method)` pair onto a `KernelManager` call.
//!
//! A single service, `kernel`, covers every operation in the CLI/service
//! surface; the split exists so a second service (metrics, admin) could be
//! added later without touching the framing or dispatch loop.

use crate::ipc::handlers::kernel as kernel_handlers;
use crate::kernel::manager::KernelManager;
use crate::kernel::with_recovery_async;
use crate::types::{Error, Result};
use serde_json::Value;
use tokio::sync::mpsc;

/// What a handler hands back to the connection loop: either a single reply
/// value, or the first value plus a channel of follow-up stream chunks (used
/// only by `executeStream`).
pub enum DispatchResponse {
    Single(Value),
    Stream(mpsc::Receiver<Value>),
}

pub async fn route_request(
    manager: &mut KernelManager,
    service: &str,
    method: &str,
    body: Value,
    ipc_config: &crate::types::IpcConfig,
) -> Result<DispatchResponse> {
    if service != "kernel" {
        return Err(Error::policy_error(format!("unknown service: {}", service)));
    }

    let stream_channel_capacity = ipc_config.stream_channel_capacity;

    with_recovery_async(
        move || async move {
            match method {
                "create" => kernel_handlers::create(manager, body).await,
                "list" => kernel_handlers::list(manager, body).await,
                "destroy" => kernel_handlers::destroy(manager, body).await,
                "destroyAll" => kernel_handlers::destroy_all(manager, body).await,
                "execute" => kernel_handlers::execute(manager, body).await,
                "executeStream" => {
                    kernel_handlers::execute_stream(manager, body, stream_channel_capacity).await
                }
                "inputReply" => kernel_handlers::input_reply(manager, body).await,
                "interrupt" => kernel_handlers::interrupt(manager, body).await,
                "restart" => kernel_handlers::restart(manager, body).await,
                "forceTerminate" => kernel_handlers::force_terminate(manager, body).await,
                "info" => kernel_handlers::info(manager, body).await,
                "poolStats" => kernel_handlers::pool_stats(manager, body).await,
                other => Err(Error::policy_error(format!("unknown method: {}", other))),
            }
        },
        method,
    )
    .await
}
