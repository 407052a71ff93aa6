//! 캔들(kline) 동기화 및 수집 서비스.
//!
//! 이 crate는 다음을 제공합니다:
//! - 재시도 조회/발행 서비스 ([`KlineService`])
//! - 과거 구간 백필 ([`BackfillEngine`])
//! - 주기적 최신 구간 폴링 ([`RealtimeScheduler`])
//! - 스트림 구독 및 저장 ([`CandleConsumer`])
//! - 오케스트레이터 HTTP 트리거 ([`orchestrator`])

pub mod backfill;
pub mod consumer;
pub mod error;
pub mod orchestrator;
pub mod scheduler;
pub mod service;
pub mod stats;

pub use backfill::BackfillEngine;
pub use consumer::{CandleConsumer, Disposition, MessageOutcome};
pub use error::{CollectorError, Result};
pub use scheduler::RealtimeScheduler;
pub use service::KlineService;
pub use stats::CollectionStats;
