use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use market_core::{InstrumentId, InstrumentRecord, PriceEntry, PriceStore};
use runtime::EngineStatus;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{error::ApiError, state::AppState, ws};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/engine", get(engine_status))
        .route("/engine/start", post(start_engine))
        .route("/engine/stop", post(stop_engine))
        .route("/engine/reload", post(reload_engine))
        .route("/instruments", get(list_instruments).post(create_instrument))
        .route("/instruments/:id", get(show_instrument).patch(rename_instrument))
        .route("/prices/history", get(all_histories))
        .route("/prices/preview", get(all_previews))
        .route("/prices/:id/current", get(current_price))
        .route("/prices/:id/history", get(price_history))
        .route("/prices/:id/preview", get(price_preview))
        .route("/ws/prices", get(ws::prices_socket))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct StartRequest {
    #[serde(default, with = "time::serde::rfc3339::option")]
    at: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize)]
struct ReloadResponse {
    tracked: usize,
}

#[derive(Debug, Deserialize)]
struct CreateInstrumentRequest {
    name: String,
    #[serde(default)]
    color: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RenameInstrumentRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    entries: Option<i64>,
}

fn history_len(query: Result<Query<HistoryQuery>, QueryRejection>) -> Result<usize, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::invalid_input(rejection.body_text()))?;
    match query.entries {
        None => Ok(1),
        Some(entries) if entries > 0 => usize::try_from(entries)
            .map_err(|_| ApiError::invalid_input("'entries' is too large")),
        Some(_) => Err(ApiError::invalid_input("'entries' must be > 0")),
    }
}

fn instrument_id(path: Result<Path<i64>, PathRejection>) -> Result<InstrumentId, ApiError> {
    path.map(|Path(id)| InstrumentId(id))
        .map_err(|rejection| ApiError::invalid_input(rejection.body_text()))
}

async fn engine_status(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.engine().status())
}

async fn start_engine(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<EngineStatus>, ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        StartRequest::default()
    } else {
        serde_json::from_slice::<StartRequest>(&body)
            .map_err(|err| ApiError::invalid_input(err.to_string()))?
    };

    state.engine().start(request.at).await?;
    Ok(Json(state.engine().status()))
}

async fn stop_engine(State(state): State<AppState>) -> Result<Json<EngineStatus>, ApiError> {
    state.engine().stop().await?;
    Ok(Json(state.engine().status()))
}

async fn reload_engine(State(state): State<AppState>) -> Result<Json<ReloadResponse>, ApiError> {
    let tracked = state.engine().reload().await?;
    Ok(Json(ReloadResponse { tracked }))
}

async fn list_instruments(
    State(state): State<AppState>,
) -> Result<Json<Vec<InstrumentRecord>>, ApiError> {
    Ok(Json(state.catalog().list_instruments()?))
}

async fn create_instrument(
    State(state): State<AppState>,
    body: Result<Json<CreateInstrumentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::invalid_input(rejection.body_text()))?;
    let id = state
        .catalog()
        .create_instrument(&request.name, request.color.as_deref())?;
    let location = format!("/instruments/{id}");

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(InstrumentRecord {
            id,
            name: request.name.trim().to_owned(),
            color: request.color,
        }),
    ))
}

async fn show_instrument(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<InstrumentRecord>, ApiError> {
    let id = instrument_id(path)?;
    Ok(Json(state.catalog().get_instrument(id)?))
}

async fn rename_instrument(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<RenameInstrumentRequest>, JsonRejection>,
) -> Result<Json<InstrumentRecord>, ApiError> {
    let id = instrument_id(path)?;
    let Json(request) = body.map_err(|rejection| ApiError::invalid_input(rejection.body_text()))?;
    Ok(Json(state.catalog().rename_instrument(id, &request.name)?))
}

async fn current_price(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<PriceEntry>, ApiError> {
    let id = instrument_id(path)?;
    state
        .prices()
        .read_current(id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("current price of instrument {id}")))
}

async fn price_history(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<PriceEntry>>, ApiError> {
    let id = instrument_id(path)?;
    let limit = history_len(query)?;
    Ok(Json(state.prices().read_history(id, limit)?))
}

async fn price_preview(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<PriceEntry>, ApiError> {
    let id = instrument_id(path)?;
    state
        .prices()
        .read_future(id, 1)?
        .into_iter()
        .next()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("preview of instrument {id}")))
}

fn per_instrument(
    prices: &dyn PriceStore,
    read: impl Fn(InstrumentId) -> Result<Vec<PriceEntry>, market_core::StorageError>,
) -> Result<BTreeMap<InstrumentId, Vec<PriceEntry>>, ApiError> {
    let mut out = BTreeMap::new();
    for id in prices.list_instrument_ids()? {
        out.insert(id, read(id)?);
    }
    Ok(out)
}

async fn all_histories(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<BTreeMap<InstrumentId, Vec<PriceEntry>>>, ApiError> {
    let limit = history_len(query)?;
    let prices = state.prices();
    per_instrument(prices, |id| prices.read_history(id, limit)).map(Json)
}

async fn all_previews(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<InstrumentId, Vec<PriceEntry>>>, ApiError> {
    let prices = state.prices();
    per_instrument(prices, |id| prices.read_future(id, 1)).map(Json)
}
