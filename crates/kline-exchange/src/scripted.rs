//! 스크립트 기반 테스트 거래소.
//!
//! 미리 넣어둔 응답을 순서대로 돌려주고 모든 호출을 기록합니다.
//! 스크립트가 비면 빈 결과를 반환합니다.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kline_core::{Candle, Timeframe};

use crate::traits::{ExchangeClient, ExchangeResult};

/// 기록된 조회 호출.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub limit: u32,
    /// 구간 조회일 때의 `(start, end)`
    pub range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

/// 테스트용 거래소.
#[derive(Debug)]
pub struct ScriptedExchange {
    script: Mutex<VecDeque<ExchangeResult<Vec<Candle>>>>,
    calls: Mutex<Vec<FetchCall>>,
    range_capable: bool,
}

impl Default for ScriptedExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedExchange {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            range_capable: true,
        }
    }

    /// 구간 조회를 지원하지 않는 거래소로 설정합니다.
    pub fn without_range(mut self) -> Self {
        self.range_capable = false;
        self
    }

    /// 다음 응답을 추가합니다.
    pub fn push(&self, result: ExchangeResult<Vec<Candle>>) -> &Self {
        lock(&self.script).push_back(result);
        self
    }

    /// 기록된 호출 목록.
    pub fn calls(&self) -> Vec<FetchCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    fn next(&self, call: FetchCall) -> ExchangeResult<Vec<Candle>> {
        lock(&self.calls).push(call);
        lock(&self.script).pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// poison 된 락도 내부 데이터를 그대로 사용합니다.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl ExchangeClient for ScriptedExchange {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        self.next(FetchCall {
            symbol: symbol.to_string(),
            timeframe,
            limit,
            range: None,
        })
    }

    async fn fetch_klines_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        self.next(FetchCall {
            symbol: symbol.to_string(),
            timeframe,
            limit,
            range: Some((start, end)),
        })
    }

    fn supports_range(&self) -> bool {
        self.range_capable
    }
}
