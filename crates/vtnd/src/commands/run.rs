//! `vtnd run`: serve with the in-memory backend until Ctrl-C.

use std::sync::Arc;

use tracing::info;

use vtnd_core::{AlarmSink, Coordinator, TracingAlarmSink};

use super::{config_file, load_config};
use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = config_file(global);
    let engine_config = load_config(global)?
        .to_engine_config()
        .map_err(|e| CliError::config(&path, e))?;

    let alarms: Arc<dyn AlarmSink> = Arc::new(TracingAlarmSink);
    let engine = Coordinator::in_memory(engine_config, alarms)?;
    let coordinator = engine.coordinator;
    if !args.standby {
        coordinator.become_active(args.failover).await?;
    }
    info!(
        role = %coordinator.role(),
        key_types = coordinator.live_tree().len(),
        config = %path.display(),
        "vtnd running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    coordinator.shutdown().await;
    Ok(())
}
