//! 수집 통계 구조체.

use serde::Serialize;
use std::time::Duration;

/// 수집 작업 통계
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionStats {
    /// 처리한 심볼 수
    pub symbols: usize,
    /// 건너뛴 심볼 수 (이미 최신)
    pub skipped: usize,
    /// 저장까지 끝난 청크 수
    pub chunks: usize,
    /// 거래소에서 받은 캔들 수
    pub fetched: usize,
    /// 새로 저장된 캔들 수
    pub inserted: u64,
    /// 검증에 실패해 버린 캔들 수
    pub rejected: usize,
    /// 에러 횟수 (재시도 포함)
    pub errors: usize,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl CollectionStats {
    /// 새 통계 객체 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 다른 통계를 합칩니다.
    pub fn merge(&mut self, other: &CollectionStats) {
        self.symbols += other.symbols;
        self.skipped += other.skipped;
        self.chunks += other.chunks;
        self.fetched += other.fetched;
        self.inserted += other.inserted;
        self.rejected += other.rejected;
        self.errors += other.errors;
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            symbols = self.symbols,
            skipped = self.skipped,
            chunks = self.chunks,
            fetched = self.fetched,
            inserted = self.inserted,
            rejected = self.rejected,
            errors = self.errors,
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "수집 완료"
        );
    }
}
