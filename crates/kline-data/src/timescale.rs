//! TimescaleDB 스토리지 구현.
//!
//! 캔들은 `futures_klines` 테이블에 저장되며 `(symbol, time)` 충돌은
//! `ON CONFLICT DO NOTHING`으로 무시됩니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kline_core::{Candle, DatabaseConfig};
use secrecy::ExposeSecret;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, instrument};

use crate::error::{DataError, Result};
use crate::repository::CandleRepository;

/// UNNEST 한 번에 보내는 최대 행 수.
const INSERT_CHUNK: usize = 1000;

/// 데이터베이스 연결 풀 래퍼.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 새로운 데이터베이스 연결 풀을 생성합니다.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!(host = %config.host, db = %config.name, "Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(config.url().expose_secret())
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// 기존 연결 풀에서 Database 인스턴스를 생성합니다.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 내부 연결 풀을 반환합니다.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 데이터베이스 마이그레이션을 실행합니다.
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations...");

        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DataError::MigrationError(e.to_string()))?;

        info!("Migrations completed successfully");
        Ok(())
    }

    /// 데이터베이스 상태를 확인합니다.
    pub async fn health_check(&self) -> Result<bool> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| DataError::QueryError(e.to_string()))?;
        Ok(true)
    }
}

// =============================================================================
// Candle Repository
// =============================================================================

/// `futures_klines` 테이블 repository.
#[derive(Clone)]
pub struct TimescaleCandleRepository {
    db: Database,
}

impl TimescaleCandleRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CandleRepository for TimescaleCandleRepository {
    #[instrument(skip(self, candle), fields(symbol = %candle.symbol))]
    async fn insert_one(&self, candle: &Candle) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO futures_klines (
                time, symbol, open_price, high_price, low_price, close_price,
                volume, quote_volume, trades, taker_buy_base_volume, taker_buy_quote_volume
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (symbol, time) DO NOTHING
            "#,
        )
        .bind(candle.time)
        .bind(&candle.symbol)
        .bind(candle.open)
        .bind(candle.high)
        .bind(candle.low)
        .bind(candle.close)
        .bind(candle.volume)
        .bind(candle.quote_volume)
        .bind(candle.trades)
        .bind(candle.taker_buy_base_volume)
        .bind(candle.taker_buy_quote_volume)
        .execute(self.db.pool())
        .await
        .map_err(|e| DataError::InsertError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, candles), fields(count = candles.len()))]
    async fn insert_batch(&self, candles: &[Candle]) -> Result<u64> {
        if candles.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0;

        // UNNEST 패턴으로 일괄 삽입
        for chunk in candles.chunks(INSERT_CHUNK) {
            let times: Vec<DateTime<Utc>> = chunk.iter().map(|c| c.time).collect();
            let symbols: Vec<&str> = chunk.iter().map(|c| c.symbol.as_str()).collect();
            let opens: Vec<f64> = chunk.iter().map(|c| c.open).collect();
            let highs: Vec<f64> = chunk.iter().map(|c| c.high).collect();
            let lows: Vec<f64> = chunk.iter().map(|c| c.low).collect();
            let closes: Vec<f64> = chunk.iter().map(|c| c.close).collect();
            let volumes: Vec<f64> = chunk.iter().map(|c| c.volume).collect();
            let quote_volumes: Vec<f64> = chunk.iter().map(|c| c.quote_volume).collect();
            let trades: Vec<i64> = chunk.iter().map(|c| c.trades).collect();
            let taker_base: Vec<f64> = chunk.iter().map(|c| c.taker_buy_base_volume).collect();
            let taker_quote: Vec<f64> = chunk.iter().map(|c| c.taker_buy_quote_volume).collect();

            let result = sqlx::query(
                r#"
                INSERT INTO futures_klines (
                    time, symbol, open_price, high_price, low_price, close_price,
                    volume, quote_volume, trades, taker_buy_base_volume, taker_buy_quote_volume
                )
                SELECT * FROM UNNEST(
                    $1::timestamptz[], $2::text[],
                    $3::float8[], $4::float8[], $5::float8[], $6::float8[],
                    $7::float8[], $8::float8[], $9::int8[], $10::float8[], $11::float8[]
                )
                ON CONFLICT (symbol, time) DO NOTHING
                "#,
            )
            .bind(&times)
            .bind(&symbols)
            .bind(&opens)
            .bind(&highs)
            .bind(&lows)
            .bind(&closes)
            .bind(&volumes)
            .bind(&quote_volumes)
            .bind(&trades)
            .bind(&taker_base)
            .bind(&taker_quote)
            .execute(self.db.pool())
            .await
            .map_err(|e| DataError::InsertError(e.to_string()))?;

            inserted += result.rows_affected();
        }

        debug!(
            requested = candles.len(),
            inserted, "캔들 배치 저장 완료"
        );

        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn last_candle_time(&self, symbol: &str) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
            SELECT time
            FROM futures_klines
            WHERE symbol = $1
            ORDER BY time DESC
            LIMIT 1
            "#,
        )
        .bind(symbol)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|(time,)| time))
    }
}
