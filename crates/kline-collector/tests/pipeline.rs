//! 조회 → 발행 → 구독 → 저장 경로 통합 테스트.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kline_collector::{
    BackfillEngine, CandleConsumer, KlineService, MessageOutcome, RealtimeScheduler,
};
use kline_core::{datetime_from_ms, decode_batch, encode_batch, Candle, Timeframe};
use kline_data::{
    CandleRepository, InMemoryCandleRepository, InMemoryTransport, StreamTransport,
};
use kline_exchange::ScriptedExchange;
use tokio_util::sync::CancellationToken;

const SUBJECT: &str = "infosir_kline";
const DURABLE: &str = "infosir_kline_consumer";

fn candle(symbol: &str, ms: i64) -> Candle {
    Candle {
        time: datetime_from_ms(ms).unwrap(),
        symbol: symbol.to_string(),
        open: 42_000.0,
        high: 42_100.0,
        low: 41_900.0,
        close: 42_050.0,
        volume: 12.5,
        quote_volume: 525_000.0,
        trades: 321,
        taker_buy_base_volume: 6.0,
        taker_buy_quote_volume: 252_000.0,
    }
}

#[tokio::test]
async fn test_get_then_publish_single_candle() {
    let exchange = Arc::new(ScriptedExchange::new());
    exchange.push(Ok(vec![candle("BTCUSDT", 1_000_000)]));
    let transport = Arc::new(InMemoryTransport::new());
    let service = KlineService::new(exchange.clone(), transport.clone(), SUBJECT);

    let candles = service
        .get_candles("BTCUSDT", Timeframe::M1, 5)
        .await
        .unwrap();
    assert_eq!(candles, vec![candle("BTCUSDT", 1_000_000)]);

    let call = &exchange.calls()[0];
    assert_eq!(call.symbol, "BTCUSDT");
    assert_eq!(call.timeframe.as_str(), "1m");
    assert_eq!(call.limit, 5);

    service.publish_candles(&candles).await.unwrap();

    let published = transport.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].subject, SUBJECT);
    assert_eq!(published[0].payload, encode_batch(&candles).unwrap());
    assert_eq!(decode_batch(&published[0].payload).unwrap(), candles);
}

#[tokio::test]
async fn test_scheduler_tick_reaches_repository() {
    let exchange = Arc::new(ScriptedExchange::new());
    exchange
        .push(Ok(vec![candle("BTCUSDT", 60_000), candle("BTCUSDT", 120_000)]))
        .push(Ok(vec![candle("ETHUSDT", 60_000)]));
    let transport = Arc::new(InMemoryTransport::new());
    let repo = Arc::new(InMemoryCandleRepository::new());

    let service = Arc::new(KlineService::new(
        exchange.clone(),
        transport.clone(),
        SUBJECT,
    ));
    let scheduler = RealtimeScheduler::new(
        service,
        vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
        Timeframe::M1,
        5,
        Duration::from_secs(60),
    );
    let report = scheduler.tick().await;
    assert_eq!(report.relayed, 2);
    assert_eq!(report.candles, 3);

    let consumer = CandleConsumer::new(repo.clone(), transport.clone(), SUBJECT, DURABLE);
    let mut sub = transport.subscribe(SUBJECT, DURABLE).await.unwrap();
    for _ in 0..2 {
        let outcome = consumer.process(sub.next().await.unwrap()).await;
        assert!(matches!(outcome, MessageOutcome::Persisted(_)));
    }

    assert_eq!(repo.candles("BTCUSDT").await.len(), 2);
    assert_eq!(repo.candles("ETHUSDT").await.len(), 1);
    assert_eq!(transport.acked().len(), 2);
}

#[tokio::test]
async fn test_redelivered_batch_is_noop() {
    let transport = Arc::new(InMemoryTransport::new());
    let repo = Arc::new(InMemoryCandleRepository::new());
    let consumer = CandleConsumer::new(repo.clone(), transport.clone(), SUBJECT, DURABLE);

    let payload = encode_batch(&[candle("BTCUSDT", 60_000)]).unwrap();
    transport.publish(SUBJECT, &payload).await.unwrap();
    transport.publish(SUBJECT, &payload).await.unwrap();

    let mut sub = transport.subscribe(SUBJECT, DURABLE).await.unwrap();
    let first = consumer.process(sub.next().await.unwrap()).await;
    let second = consumer.process(sub.next().await.unwrap()).await;

    assert_eq!(first, MessageOutcome::Persisted(1));
    assert_eq!(second, MessageOutcome::Persisted(0));
    assert_eq!(repo.len().await, 1);
    assert_eq!(transport.acked().len(), 2);
}

#[tokio::test]
async fn test_backfill_and_consumer_share_keys() {
    // 백필 대상이 없도록 최신 캔들을 미리 넣어 둔다
    let latest = Utc::now().timestamp_millis() / 60_000 * 60_000;
    let exchange = Arc::new(ScriptedExchange::new());
    let transport = Arc::new(InMemoryTransport::new());
    let repo = Arc::new(InMemoryCandleRepository::new());
    repo.seed([candle("BTCUSDT", latest)]).await;

    let engine = BackfillEngine::new(
        exchange.clone(),
        repo.clone(),
        vec!["BTCUSDT".to_string()],
        Timeframe::M1,
    );
    let stats = engine.run(&CancellationToken::new()).await;
    assert_eq!(stats.inserted, 0);
    assert_eq!(exchange.call_count(), 0);

    // 실시간 경로로 같은 캔들이 다시 들어와도 덮어쓰지 않는다
    let mut revised = candle("BTCUSDT", latest);
    revised.close = 1.0;
    let consumer = CandleConsumer::new(repo.clone(), transport.clone(), SUBJECT, DURABLE);
    let outcome = consumer.handle(&encode_batch(&[revised]).unwrap()).await;

    assert_eq!(outcome, MessageOutcome::Persisted(0));
    let stored = repo.candles("BTCUSDT").await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].close, 42_050.0);
    assert_eq!(
        repo.last_candle_time("BTCUSDT").await.unwrap(),
        datetime_from_ms(latest)
    );
}
