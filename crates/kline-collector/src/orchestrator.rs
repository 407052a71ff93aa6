//! 오케스트레이터 HTTP 트리거.
//!
//! 외부 오케스트레이터가 특정 심볼의 최신 캔들 조회/발행을 동기적으로 요청하는
//! 엔드포인트와 헬스 체크를 제공합니다. 실패 응답에는 내부 에러 내용을 담지 않습니다.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use kline_core::Timeframe;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::service::KlineService;

/// 한 번에 요청할 수 있는 최대 캔들 수.
const MAX_KLINES: i64 = 1000;

/// 라우터 상태.
#[derive(Clone)]
pub struct OrchestratorState {
    pub service: Arc<KlineService>,
    /// `time`이 비어 있을 때 사용할 간격
    pub default_interval: Timeframe,
}

/// 조회 요청.
#[derive(Debug, Deserialize)]
pub struct FetchRequest {
    pub pair: String,
    #[serde(default)]
    pub time: String,
    pub klines: i64,
}

/// 응답 본문.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FetchResponse {
    fn ok(count: usize) -> Self {
        Self {
            status: "ok".to_string(),
            count: Some(count),
            message: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            count: None,
            message: Some(message.into()),
        }
    }
}

fn reply(status: StatusCode, body: FetchResponse) -> Response {
    (status, Json(body)).into_response()
}

/// 오케스트레이터 라우터를 생성합니다.
pub fn router(state: OrchestratorState) -> Router {
    Router::new()
        .route("/orchestrator/fetch", post(fetch_klines))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 헬스 체크.
pub async fn healthz() -> &'static str {
    "OK"
}

/// 최신 캔들을 조회해 스트림으로 발행합니다.
pub async fn fetch_klines(
    State(state): State<OrchestratorState>,
    body: Result<Json<FetchRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(error = %rejection, "Invalid orchestrator request body");
            return reply(
                StatusCode::BAD_REQUEST,
                FetchResponse::error("invalid request body"),
            );
        }
    };

    let pair = req.pair.trim().to_uppercase();
    if pair.is_empty() {
        return reply(
            StatusCode::BAD_REQUEST,
            FetchResponse::error("pair must not be empty"),
        );
    }
    if !(1..=MAX_KLINES).contains(&req.klines) {
        return reply(
            StatusCode::BAD_REQUEST,
            FetchResponse::error(format!("klines must be between 1 and {}", MAX_KLINES)),
        );
    }

    let interval = match req.time.trim() {
        "" => state.default_interval,
        raw => match raw.parse::<Timeframe>() {
            Ok(tf) => tf,
            Err(e) => {
                return reply(StatusCode::BAD_REQUEST, FetchResponse::error(e));
            }
        },
    };

    let limit = req.klines as u32;
    info!(pair = %pair, interval = %interval, limit, "Orchestrator fetch requested");

    let candles = match state.service.get_candles(&pair, interval, limit).await {
        Ok(candles) => candles,
        Err(e) => {
            error!(pair = %pair, error = %e, "Orchestrator fetch failed");
            return reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                FetchResponse::error("failed to fetch klines"),
            );
        }
    };

    if let Err(e) = state.service.publish_candles(&candles).await {
        error!(pair = %pair, error = %e, "Orchestrator publish failed");
        return reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            FetchResponse::error("failed to publish klines"),
        );
    }

    reply(StatusCode::OK, FetchResponse::ok(candles.len()))
}
