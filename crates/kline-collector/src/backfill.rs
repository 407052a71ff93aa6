//! 과거 구간 백필.
//!
//! 심볼별로 마지막 저장 시점부터 "현재 - 1 간격"까지 청크 단위로 거래소를
//! 조회해 저장소에 직접 넣습니다. 스트림을 거치지 않는 일회성 대량 적재입니다.
//!
//! 청크 조회 실패는 고정 backoff 후 같은 청크를 무제한 재시도하며, 취소 신호가
//! 오면 대기 중에 즉시 빠져나옵니다. 한 심볼 안의 청크는 엄격히 순차 처리됩니다.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use kline_core::{datetime_from_ms, AppConfig, CursorPolicy, Timeframe, SYNC_EPOCH_MS};
use kline_data::CandleRepository;
use kline_exchange::ExchangeClient;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{CollectorError, Result};
use crate::service::retain_valid;
use crate::stats::CollectionStats;

/// 백필 엔진.
pub struct BackfillEngine {
    exchange: Arc<dyn ExchangeClient>,
    repository: Arc<dyn CandleRepository>,
    pairs: Vec<String>,
    interval: Timeframe,
    chunk_size: u32,
    earliest: DateTime<Utc>,
    backoff: Duration,
    chunk_delay: Duration,
    cursor_policy: CursorPolicy,
}

/// 취소 신호와 함께 대기합니다. 취소되면 `false`.
async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

impl BackfillEngine {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        repository: Arc<dyn CandleRepository>,
        pairs: Vec<String>,
        interval: Timeframe,
    ) -> Self {
        Self {
            exchange,
            repository,
            pairs,
            interval,
            chunk_size: 720,
            earliest: datetime_from_ms(SYNC_EPOCH_MS).unwrap_or_default(),
            backoff: Duration::from_secs(5),
            chunk_delay: Duration::from_secs(1),
            cursor_policy: CursorPolicy::default(),
        }
    }

    /// `[sync]` 설정으로 생성합니다.
    pub fn from_config(
        exchange: Arc<dyn ExchangeClient>,
        repository: Arc<dyn CandleRepository>,
        config: &AppConfig,
    ) -> Result<Self> {
        let sync = &config.sync;
        let earliest = datetime_from_ms(sync.earliest_ms).ok_or_else(|| {
            CollectorError::Config(format!("earliest_ms out of range: {}", sync.earliest_ms))
        })?;

        Ok(
            Self::new(exchange, repository, sync.pairs.clone(), sync.interval)
                .with_chunk_size(sync.chunk_size)
                .with_earliest(earliest)
                .with_delays(sync.backoff(), sync.chunk_delay())
                .with_cursor_policy(sync.cursor_policy),
        )
    }

    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// 저장된 캔들이 없을 때의 시작 시점.
    pub fn with_earliest(mut self, earliest: DateTime<Utc>) -> Self {
        self.earliest = earliest;
        self
    }

    /// 실패 backoff와 청크 간 대기 시간.
    pub fn with_delays(mut self, backoff: Duration, chunk_delay: Duration) -> Self {
        self.backoff = backoff;
        self.chunk_delay = chunk_delay;
        self
    }

    pub fn with_cursor_policy(mut self, policy: CursorPolicy) -> Self {
        self.cursor_policy = policy;
        self
    }

    /// 설정된 모든 심볼을 순서대로 백필합니다.
    ///
    /// 한 심볼의 실패는 다른 심볼에 영향을 주지 않습니다.
    pub async fn run(&self, cancel: &CancellationToken) -> CollectionStats {
        let start = Instant::now();
        let mut stats = CollectionStats::new();

        info!(
            symbols = self.pairs.len(),
            interval = %self.interval,
            exchange = self.exchange.name(),
            "백필 시작"
        );

        if !self.exchange.supports_range() {
            warn!("Exchange has no range query; backfill can only reach the latest chunk");
        }

        for symbol in &self.pairs {
            if cancel.is_cancelled() {
                info!("백필 취소됨");
                break;
            }

            match self.backfill_symbol(symbol, cancel).await {
                Ok(symbol_stats) => stats.merge(&symbol_stats),
                Err(e) => {
                    stats.symbols += 1;
                    stats.errors += 1;
                    error!(symbol = %symbol, error = %e, "백필 실패");
                }
            }
        }

        stats.elapsed = start.elapsed();
        stats
    }

    /// 한 심볼을 백필합니다.
    pub async fn backfill_symbol(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> Result<CollectionStats> {
        let mut stats = CollectionStats {
            symbols: 1,
            ..Default::default()
        };

        let target = Utc::now() - self.interval.as_chrono();

        let last = self
            .repository
            .last_candle_time(symbol)
            .await
            .map_err(CollectorError::PersistFailed)?;
        let mut resume = match last {
            Some(t) => self.interval.next_open(t),
            None => self.earliest,
        };

        if resume >= target {
            debug!(symbol, resume = %resume, "Already up to date");
            stats.skipped = 1;
            return Ok(stats);
        }

        info!(symbol, from = %resume, to = %target, "Backfill range");

        loop {
            if cancel.is_cancelled() {
                info!(symbol, resume = %resume, "Backfill cancelled");
                break;
            }

            let fetch = async {
                if self.exchange.supports_range() {
                    self.exchange
                        .fetch_klines_range(symbol, self.interval, resume, target, self.chunk_size)
                        .await
                } else {
                    self.exchange
                        .fetch_klines(symbol, self.interval, self.chunk_size)
                        .await
                }
            };
            // 응답이 늦어도 종료 신호를 기다리게 하지 않는다
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(symbol, resume = %resume, "Backfill cancelled during fetch");
                    break;
                }
                fetched = fetch => fetched,
            };

            let chunk = match fetched {
                Ok(chunk) => chunk,
                Err(e) => {
                    stats.errors += 1;
                    warn!(
                        symbol,
                        resume = %resume,
                        error = %e,
                        backoff_ms = self.backoff.as_millis() as u64,
                        "Chunk fetch failed, retrying"
                    );
                    if !sleep_or_cancel(cancel, self.backoff).await {
                        break;
                    }
                    continue;
                }
            };

            let Some(last_time) = chunk.last().map(|c| c.time) else {
                info!(symbol, resume = %resume, "No more data from exchange");
                break;
            };

            let received = chunk.len();
            let valid = retain_valid(symbol, chunk);
            let rejected = received - valid.len();

            let persisted = if valid.is_empty() {
                Ok(0)
            } else {
                self.repository.insert_batch(&valid).await
            };

            match persisted {
                Ok(inserted) => {
                    stats.inserted += inserted;
                    debug!(symbol, received, inserted, "Chunk stored");
                }
                Err(e) => {
                    stats.errors += 1;
                    match self.cursor_policy {
                        CursorPolicy::ConfirmedPersistence => {
                            warn!(
                                symbol,
                                resume = %resume,
                                error = %e,
                                "Chunk insert failed, retrying same chunk"
                            );
                            if !sleep_or_cancel(cancel, self.backoff).await {
                                break;
                            }
                            continue;
                        }
                        CursorPolicy::ExchangeResponse => {
                            warn!(
                                symbol,
                                resume = %resume,
                                error = %e,
                                "Chunk insert failed, cursor advances anyway"
                            );
                        }
                    }
                }
            }

            stats.chunks += 1;
            stats.fetched += received;
            stats.rejected += rejected;

            let next = self.interval.next_open(last_time);
            if next <= resume {
                // 구간 조회를 못 하는 거래소가 이미 지난 구간을 돌려준 경우
                warn!(symbol, resume = %resume, last = %last_time, "Cursor did not advance, stopping");
                break;
            }
            resume = next;

            if resume >= target {
                info!(symbol, resume = %resume, "Caught up");
                break;
            }

            if !sleep_or_cancel(cancel, self.chunk_delay).await {
                break;
            }
        }

        Ok(stats)
    }
}
