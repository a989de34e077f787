use std::panic;
use std::sync::Arc;

use tonic::transport::Server;
use tracing_subscriber::EnvFilter;

use crate::config::SandboxConfig;
use crate::core::language::LanguageRegistry;
use crate::core::manager::SessionManager;
use crate::grpc::models::sandbox_server::SandboxServer;
use crate::grpc::services::SandboxServiceImpl;
use crate::native::executor::NativeExecutor;

mod config;
mod constants;
mod core;
mod grpc;
mod native;


#[tokio::main]
#[tracing::instrument]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    set_panic_hook();

    let config = SandboxConfig::from_env()?;
    tracing::info!("Configuration: {:?}", config);

    let addr = config.addr;
    let registry = LanguageRegistry::default();
    let manager = Arc::new(SessionManager::new(
        Arc::new(NativeExecutor::new()),
        registry,
        config,
    ));
    let reaper = manager.spawn_reaper();

    let service = SandboxServer::new(SandboxServiceImpl::new(manager.clone()));

    tracing::info!("gRPC server listening on {}", addr);
    Server::builder()
        .add_service(service)
        .serve_with_shutdown(addr, shutdown_signal())
        .await?;

    reaper.abort();
    manager.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received, draining sessions");
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
