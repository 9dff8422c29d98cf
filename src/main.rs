use anyhow::Result;

use api_gateway::ApiServer;
use config::EngineConfig;
use qc_vision::{init_logging, Engine};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = EngineConfig::load()?;
    let addr = config.bind_addr()?;

    let engine = Engine::new(config)?;
    let _scheduler = engine.spawn_scheduler();

    ApiServer::new(addr, engine.api_context()).serve().await?;

    Ok(())
}
