//! Binance REST 캔들 클라이언트.
//!
//! 공개 klines 엔드포인트만 사용하므로 인증이 필요 없습니다.
//! 응답의 각 행은 위치 기반 배열입니다:
//!
//! | idx | 필드 |
//! |-----|------|
//! | 0 | open time (ms) |
//! | 1-4 | open, high, low, close |
//! | 5 | volume |
//! | 6 | close time (ms) |
//! | 7 | quote volume |
//! | 8 | trades |
//! | 9 | taker buy base volume |
//! | 10 | taker buy quote volume |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kline_core::{datetime_from_ms, Candle, ExchangeConfig, Timeframe};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::traits::{ExchangeClient, ExchangeResult};
use crate::ExchangeError;

/// 행이 가져야 하는 최소 필드 수.
const KLINE_ROW_FIELDS: usize = 11;

/// Binance 에러 응답 본문.
#[derive(Debug, Deserialize)]
struct BinanceError {
    code: i64,
    msg: String,
}

/// Binance 캔들 클라이언트.
#[derive(Debug, Clone)]
pub struct BinanceClient {
    client: Client,
    endpoint: String,
}

impl BinanceClient {
    /// 설정으로 클라이언트를 생성합니다.
    pub fn new(config: &ExchangeConfig) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: join_url(&config.base_url, &config.klines_path),
        })
    }

    /// 요청 대상 URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get_klines(
        &self,
        symbol: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<Vec<Candle>> {
        debug!(endpoint = %self.endpoint, symbol, "GET klines");

        let response = self.client.get(&self.endpoint).query(params).send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // 에러 응답 파싱 시도
            return Err(match serde_json::from_str::<BinanceError>(&body) {
                Ok(err) => ExchangeError::Api {
                    code: err.code,
                    message: err.msg,
                },
                Err(_) => ExchangeError::Status {
                    status: status.as_u16(),
                    body,
                },
            });
        }

        let rows: Vec<Vec<Value>> = serde_json::from_str(&body).map_err(|e| {
            warn!(error = %e, "Failed to parse klines response");
            ExchangeError::Parse(e.to_string())
        })?;

        let symbol = symbol.to_uppercase();
        let mut candles = rows
            .iter()
            .enumerate()
            .map(|(index, row)| parse_row(&symbol, index, row))
            .collect::<ExchangeResult<Vec<_>>>()?;

        candles.sort_by_key(|c| c.time);
        Ok(candles)
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        self.get_klines(
            symbol,
            &[
                ("symbol", symbol.to_uppercase()),
                ("interval", timeframe.to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn fetch_klines_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        self.get_klines(
            symbol,
            &[
                ("symbol", symbol.to_uppercase()),
                ("interval", timeframe.to_string()),
                ("startTime", start.timestamp_millis().to_string()),
                ("endTime", end.timestamp_millis().to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }
}

// ============================================================================
// 행 파싱
// ============================================================================

fn parse_row(symbol: &str, index: usize, row: &[Value]) -> ExchangeResult<Candle> {
    if row.len() < KLINE_ROW_FIELDS {
        return Err(ExchangeError::Malformed {
            index,
            reason: format!(
                "expected at least {} fields, got {}",
                KLINE_ROW_FIELDS,
                row.len()
            ),
        });
    }

    let open_ms = int_field(index, row, 0, "open_time")?;
    let time = datetime_from_ms(open_ms).ok_or_else(|| ExchangeError::Malformed {
        index,
        reason: format!("open_time out of range: {}", open_ms),
    })?;

    Ok(Candle {
        time,
        symbol: symbol.to_string(),
        open: float_field(index, row, 1, "open")?,
        high: float_field(index, row, 2, "high")?,
        low: float_field(index, row, 3, "low")?,
        close: float_field(index, row, 4, "close")?,
        volume: float_field(index, row, 5, "volume")?,
        quote_volume: float_field(index, row, 7, "quote_volume")?,
        trades: int_field(index, row, 8, "trades")?,
        taker_buy_base_volume: float_field(index, row, 9, "taker_buy_base_volume")?,
        taker_buy_quote_volume: float_field(index, row, 10, "taker_buy_quote_volume")?,
    })
}

/// 문자열 또는 숫자로 인코딩된 실수 필드.
fn float_field(index: usize, row: &[Value], pos: usize, name: &str) -> ExchangeResult<f64> {
    let parsed = match &row[pos] {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    parsed.ok_or_else(|| ExchangeError::Malformed {
        index,
        reason: format!("invalid {}: {}", name, row[pos]),
    })
}

fn int_field(index: usize, row: &[Value], pos: usize, name: &str) -> ExchangeResult<i64> {
    let parsed = match &row[pos] {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ExchangeError::Malformed {
        index,
        reason: format!("invalid {}: {}", name, row[pos]),
    })
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard) -> BinanceClient {
        let config = ExchangeConfig {
            base_url: server.url(),
            klines_path: "api/v3/klines".to_string(),
            timeout_secs: 5,
        };
        BinanceClient::new(&config).unwrap()
    }

    const TWO_ROWS: &str = r#"[
        [120000, "3.0", "4.0", "2.5", "3.5", "10", 179999, "35", 7, "4", "14", "0"],
        [60000, "1.0", "2.0", "0.5", "1.5", "20.5", 119999, "30.75", 12, "10", "15", "0"]
    ]"#;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://api.binance.com/", "/api/v3/klines"),
            "https://api.binance.com/api/v3/klines"
        );
        assert_eq!(
            join_url("http://localhost:1234", "api/v3/klines"),
            "http://localhost:1234/api/v3/klines"
        );
    }

    #[tokio::test]
    async fn test_fetch_klines_parses_rows_in_ascending_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
                Matcher::UrlEncoded("interval".into(), "1m".into()),
                Matcher::UrlEncoded("limit".into(), "2".into()),
            ]))
            .with_status(200)
            .with_body(TWO_ROWS)
            .create_async()
            .await;

        let client = client_for(&server);
        let candles = client
            .fetch_klines("btcusdt", Timeframe::M1, 2)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].time_ms(), 60_000);
        assert_eq!(candles[0].symbol, "BTCUSDT");
        assert_eq!(candles[0].open, 1.0);
        assert_eq!(candles[0].volume, 20.5);
        assert_eq!(candles[0].quote_volume, 30.75);
        assert_eq!(candles[0].trades, 12);
        assert_eq!(candles[0].taker_buy_base_volume, 10.0);
        assert_eq!(candles[0].taker_buy_quote_volume, 15.0);
        assert_eq!(candles[1].time_ms(), 120_000);
    }

    #[tokio::test]
    async fn test_fetch_range_sends_window() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("startTime".into(), "60000".into()),
                Matcher::UrlEncoded("endTime".into(), "180000".into()),
                Matcher::UrlEncoded("limit".into(), "720".into()),
            ]))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let client = client_for(&server);
        let candles = client
            .fetch_klines_range(
                "ETHUSDT",
                Timeframe::M1,
                datetime_from_ms(60_000).unwrap(),
                datetime_from_ms(180_000).unwrap(),
                720,
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(candles.is_empty());
    }

    #[tokio::test]
    async fn test_short_row_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"[[60000, "1.0", "2.0", "0.5", "1.5", "20.5", 119999, "30.75", 12]]"#)
            .create_async()
            .await;

        let err = client_for(&server)
            .fetch_klines("BTCUSDT", Timeframe::M1, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Malformed { index: 0, .. }));
    }

    #[tokio::test]
    async fn test_bad_number_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"[[60000, "abc", "2.0", "0.5", "1.5", "20.5", 119999, "30.75", 12, "1", "1"]]"#)
            .create_async()
            .await;

        let err = client_for(&server)
            .fetch_klines("BTCUSDT", Timeframe::M1, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_api_error_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":-1121,"msg":"Invalid symbol."}"#)
            .create_async()
            .await;

        let err = client_for(&server)
            .fetch_klines("NOPE", Timeframe::M1, 1)
            .await
            .unwrap_err();
        match err {
            ExchangeError::Api { code, message } => {
                assert_eq!(code, -1121);
                assert_eq!(message, "Invalid symbol.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_plain_status_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::Any)
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let err = client_for(&server)
            .fetch_klines("BTCUSDT", Timeframe::M1, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Status { status: 502, .. }));
        assert!(err.is_retryable());
    }
}
