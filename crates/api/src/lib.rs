pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

use axum::Router;

pub use error::ApiError;
pub use state::{AppState, PriceBroadcaster, PriceEvent, SocketMessage};

pub fn app(state: AppState) -> Router {
    routes::router(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        Router,
    };
    use futures_util::StreamExt;
    use market_core::{InstrumentId, ManualClock, MemoryPriceStore, PriceStore};
    use runtime::{EngineConfig, MarketEngine};
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use strategy::GeneratorConfig;
    use time::{macros::datetime, Duration, OffsetDateTime};
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    use crate::{app, AppState};

    const NOON: OffsetDateTime = datetime!(2024-03-01 12:00:00 UTC);

    async fn fixture(ids: &[i64]) -> (Arc<MemoryPriceStore>, AppState) {
        let clock = Arc::new(ManualClock::new(NOON));
        let store = Arc::new(MemoryPriceStore::with_instruments(clock.clone(), ids));
        let engine = MarketEngine::spawn(
            EngineConfig {
                seed: Some(1),
                ..EngineConfig::default()
            },
            GeneratorConfig::default().build().unwrap(),
            store.clone(),
            clock,
        );
        let state = AppState::connect(engine, store.clone(), store.clone())
            .await
            .unwrap();
        (store, state)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str) -> Request<Body> {
        Request::post(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn engine_lifecycle_over_http() {
        let (_store, state) = fixture(&[1, 2, 5]).await;
        let app = app(state);

        let (status, body) = send(app.clone(), post("/engine/reload")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "tracked": 3 }));

        let (status, body) = send(
            app.clone(),
            post_json("/engine/start", json!({ "at": "2024-03-01T13:00:00Z" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], json!(true));
        assert_eq!(body["next_tick_at"], json!("2024-03-01T13:00:00Z"));

        let (status, body) = send(app.clone(), post("/engine/start")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["err"], json!("invalid-state"));

        let (status, body) = send(app.clone(), post("/engine/stop")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], json!(false));

        let (status, body) = send(app, get("/engine")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tracked"], json!(3));
    }

    #[tokio::test]
    async fn malformed_start_body_is_invalid_input() {
        let (_store, state) = fixture(&[1]).await;

        let (status, body) = send(
            app(state),
            post_json("/engine/start", json!({ "at": "noon" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["err"], json!("invalid-input"));
    }

    #[tokio::test]
    async fn instruments_can_be_created_and_listed() {
        let (_store, state) = fixture(&[1]).await;
        let app = app(state);

        let response = app
            .clone()
            .oneshot(post_json("/instruments", json!({ "name": "ACME", "color": "#00ff00" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::LOCATION], "/instruments/2");

        let (status, body) = send(app.clone(), get("/instruments")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[1], json!({ "id": 2, "name": "ACME", "color": "#00ff00" }));

        let (status, body) = send(app, post_json("/instruments", json!({ "name": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["err"], json!("invalid-input"));
    }

    fn patch_json(uri: &str, body: Value) -> Request<Body> {
        Request::patch(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn instruments_can_be_shown_and_renamed() {
        let (_store, state) = fixture(&[1, 2]).await;
        let app = app(state);

        let (status, body) = send(app.clone(), get("/instruments/2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "id": 2, "name": "instrument-2", "color": null }));

        let (status, body) = send(
            app.clone(),
            patch_json("/instruments/2", json!({ "name": " Globex " })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], json!("Globex"));

        let (_, body) = send(app.clone(), get("/instruments/2")).await;
        assert_eq!(body["name"], json!("Globex"));

        let (status, body) = send(app.clone(), get("/instruments/9")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["err"], json!("not-found"));

        let (status, body) = send(app, patch_json("/instruments/1", json!({ "name": "" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["err"], json!("invalid-input"));
    }

    #[tokio::test]
    async fn price_reads_split_history_and_preview() {
        let (store, state) = fixture(&[1, 2]).await;
        let id = InstrumentId(1);
        store.write_price(id, NOON - Duration::seconds(30), dec!(3)).unwrap();
        store.write_price(id, NOON - Duration::seconds(15), dec!(4)).unwrap();
        store.write_price(id, NOON + Duration::seconds(15), dec!(6)).unwrap();
        let app = app(state);

        let (status, body) = send(app.clone(), get("/prices/1/current")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "price": "4", "valid_after": "2024-03-01T11:59:45Z" }));

        let (_, body) = send(app.clone(), get("/prices/1/history")).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (_, body) = send(app.clone(), get("/prices/1/history?entries=5")).await;
        assert_eq!(body[0]["price"], json!("4"));
        assert_eq!(body[1]["price"], json!("3"));

        let (status, body) = send(app.clone(), get("/prices/1/preview")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["price"], json!("6"));

        let (status, _) = send(app.clone(), get("/prices/2/preview")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = send(app, get("/prices/preview")).await;
        assert_eq!(body["1"][0]["price"], json!("6"));
        assert_eq!(body["2"], json!([]));
    }

    #[tokio::test]
    async fn history_rejects_non_positive_entries() {
        let (_store, state) = fixture(&[1]).await;
        let app = app(state);

        for uri in [
            "/prices/1/history?entries=0",
            "/prices/history?entries=-2",
            "/prices/1/history?entries=x",
        ] {
            let (status, body) = send(app.clone(), get(uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["err"], json!("invalid-input"), "{uri}");
        }
    }

    #[tokio::test]
    async fn unknown_instrument_is_not_found() {
        let (_store, state) = fixture(&[1]).await;

        let (status, body) = send(app(state), get("/prices/42/current")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["err"], json!("not-found"));
    }

    #[tokio::test]
    async fn price_socket_streams_engine_pushes() {
        let (_store, state) = fixture(&[1]).await;
        let engine = state.engine().clone();
        engine.reload().await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app(state)).await.unwrap();
        });

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/prices"))
            .await
            .unwrap();
        let connected: Value = serde_json::from_str(
            socket.next().await.unwrap().unwrap().to_text().unwrap(),
        )
        .unwrap();
        assert_eq!(connected["event_type"], json!("connected"));
        assert_eq!(connected["tracked"], json!(1));

        engine.start(Some(NOON)).await.unwrap();
        let pushed: Value = serde_json::from_str(
            socket.next().await.unwrap().unwrap().to_text().unwrap(),
        )
        .unwrap();

        assert_eq!(pushed["event_type"], json!("price"));
        assert_eq!(pushed["instrument"], json!(1));
        assert_eq!(pushed["price"], json!("1"));
        assert_eq!(pushed["valid_after"], json!("2024-03-01T12:00:15Z"));
        engine.shutdown().await.unwrap();
    }
}
