//! Kernel orchestrator IPC server — main entry point.

use kernelhost_core::driver::{KernelMode, KernelTypeKey, Language};
use kernelhost_core::events::EventBus;
use kernelhost_core::ipc::IpcServer;
use kernelhost_core::kernel::{AllowedTypes, KernelManager};
use kernelhost_core::Config;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    kernelhost_core::observability::init_tracing();

    let allowed_types = AllowedTypes::new(config.kernel.allowed_kernel_types.iter().filter_map(
        |t| {
            let mode: KernelMode = t.mode.parse().ok()?;
            let language: Language = t.language.parse().ok()?;
            Some(KernelTypeKey { mode, language })
        },
    ));

    let bus = EventBus::new();
    let stream_channel_capacity = config.ipc.stream_channel_capacity;
    let (manager, tick_rx) = KernelManager::new(
        allowed_types,
        config.kernel.clone(),
        bus,
        stream_channel_capacity,
    );

    let addr = config.server.listen_addr.parse()?;

    tracing::info!("Kernel orchestrator IPC server starting on {}", addr);
    let server = IpcServer::new(manager, tick_rx, addr, config.ipc.clone());
    server.serve().await?;

    Ok(())
}
