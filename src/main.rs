//! aurad daemon entry point.

use std::sync::Arc;

use tracing::{info, warn};

use aurad::config::Config;
use aurad::server::Server;
use aurad::services::bluetooth::{
    A2dpManager, BtCommander, BtMonitor, HfpAgManager, NullCommander, ZbusCommander,
};
use aurad::tracing_config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    tracing_config::init(&config.general)?;

    let system_bus = match zbus::Connection::system().await {
        Ok(conn) => Some(conn),
        Err(e) => {
            warn!("system bus unavailable, Bluetooth audio disabled: {e}");
            None
        }
    };

    let commander: Arc<dyn BtCommander> = match &system_bus {
        Some(conn) => Arc::new(ZbusCommander::new(conn.clone())),
        None => Arc::new(NullCommander),
    };

    let mut server = Server::new(
        &config,
        commander,
        Box::new(A2dpManager::new()),
        Box::new(HfpAgManager::new()),
    );
    server.start();

    if let Some(conn) = &system_bus {
        BtMonitor::start(conn, server.sender()).await?;
        info!("watching host bus for Bluetooth devices");
    }

    tokio::select! {
        () = server.run() => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("interrupt received");
        }
    }
    server.shutdown();

    Ok(())
}
