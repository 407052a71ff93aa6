//! 실시간 폴링 스케줄러.
//!
//! 고정 주기마다 모든 심볼의 최신 구간을 조회해 스트림으로 발행합니다.
//! 취소 신호는 틱 사이에서만 확인하므로 발행 도중에 끊기지 않습니다.

use std::sync::Arc;
use std::time::Duration;

use kline_core::{AppConfig, Timeframe};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::service::KlineService;

/// 한 번의 틱 결과.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// 발행까지 성공한 심볼 수
    pub relayed: usize,
    /// 실패한 심볼 수
    pub failed: usize,
    /// 발행한 캔들 수
    pub candles: usize,
}

/// 실시간 스케줄러.
pub struct RealtimeScheduler {
    service: Arc<KlineService>,
    pairs: Vec<String>,
    interval: Timeframe,
    limit: u32,
    period: Duration,
}

impl RealtimeScheduler {
    pub fn new(
        service: Arc<KlineService>,
        pairs: Vec<String>,
        interval: Timeframe,
        limit: u32,
        period: Duration,
    ) -> Self {
        Self {
            service,
            pairs,
            interval,
            limit,
            period,
        }
    }

    pub fn from_config(service: Arc<KlineService>, config: &AppConfig) -> Self {
        Self::new(
            service,
            config.sync.pairs.clone(),
            config.sync.interval,
            config.sync.limit,
            config.sync.tick(),
        )
    }

    /// 취소될 때까지 주기적으로 실행합니다. 첫 틱은 한 주기 뒤입니다.
    ///
    /// 틱 처리가 주기보다 오래 걸리면 다음 틱이 밀릴 뿐 겹쳐 실행되지 않습니다.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            symbols = self.pairs.len(),
            interval = %self.interval,
            period_secs = self.period.as_secs(),
            "실시간 스케줄러 시작"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.tick().await;
            debug!(
                relayed = report.relayed,
                failed = report.failed,
                candles = report.candles,
                "Tick done"
            );
        }

        info!("실시간 스케줄러 종료");
    }

    /// 모든 심볼을 한 번씩 조회/발행합니다. 한 심볼의 실패는 다음 심볼을 막지 않습니다.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        for symbol in &self.pairs {
            match self
                .service
                .fetch_and_publish(symbol, self.interval, self.limit)
                .await
            {
                Ok(count) => {
                    report.relayed += 1;
                    report.candles += count;
                }
                Err(e) => {
                    report.failed += 1;
                    error!(symbol = %symbol, error = %e, "Realtime relay failed");
                }
            }
        }

        report
    }
}
