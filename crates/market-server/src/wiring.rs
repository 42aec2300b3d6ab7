use std::{error::Error, sync::Arc};

use api::AppState;
use axum::{routing::get, Router};
use market_core::SystemClock;
use price_store::SqlitePriceStore;
use runtime::{EngineConfig, EngineError, EngineHandle, MarketEngine};

use crate::config::Config;

pub struct Services {
    pub engine: EngineHandle,
    pub app: Router,
}

pub async fn build_services(config: &Config) -> Result<Services, Box<dyn Error>> {
    let store = Arc::new(SqlitePriceStore::open(&config.db_path, config.db_pool_size)?);
    let generator = config.generator.build()?;
    let engine = MarketEngine::spawn(
        EngineConfig {
            interval: config.interval,
            history_window: config.history_window,
            seed: None,
        },
        generator,
        store.clone(),
        Arc::new(SystemClock),
    );
    let state = AppState::connect(engine.clone(), store.clone(), store).await?;

    Ok(Services {
        engine,
        app: build_app(state),
    })
}

pub fn build_app(state: AppState) -> Router {
    api::app(state).route("/health", get(healthcheck))
}

/// Loads every stored instrument and, when asked, schedules the first tick.
pub async fn bootstrap(engine: &EngineHandle, autostart: bool) -> Result<usize, EngineError> {
    let tracked = engine.reload().await?;
    if autostart {
        engine.start(None).await?;
    }
    Ok(tracked)
}

async fn healthcheck() -> &'static str {
    "ok"
}
