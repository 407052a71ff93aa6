//! Redis Streams 기반 전송 계층.
//!
//! - subject = 스트림 키, durable 이름 = 컨슈머 그룹
//! - 발행: `XADD` (선택적으로 근사 `MAXLEN`)
//! - 구독: 전용 연결에서 `XREADGROUP`. 시작 시 이전 실행이 남긴 pending 목록("0")을
//!   한 번 훑은 뒤 새 메시지(">")를 블로킹으로 읽습니다.
//! - ack: `XACK`. nak은 메시지를 pending에 남겨 두고 `redelivery_delay` 뒤에
//!   pending 목록을 한 번 더 훑게 합니다. 그 사이에도 새 메시지는 계속 읽습니다.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kline_core::StreamConfig;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{DataError, Result};
use crate::stream::{Acker, Delivery, StreamTransport, Subscription};

/// 메시지 본문이 저장되는 필드 이름.
const PAYLOAD_FIELD: &str = "payload";

/// Redis Streams 전송 계층.
#[derive(Clone)]
pub struct RedisStreamTransport {
    client: Client,
    connection: MultiplexedConnection,
    config: StreamConfig,
}

impl RedisStreamTransport {
    /// Redis에 연결합니다.
    pub async fn connect(config: &StreamConfig) -> Result<Self> {
        info!("Connecting to Redis...");

        let client = Client::open(config.redis_url.as_str())
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;

        info!("Redis connection established");

        Ok(Self {
            client,
            connection,
            config: config.clone(),
        })
    }

    /// Redis 상태를 확인합니다.
    pub async fn health_check(&self) -> Result<bool> {
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}

#[async_trait]
impl StreamTransport for RedisStreamTransport {
    async fn ensure_stream(&self, subject: &str, durable: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let created: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(subject, durable, "0").await;

        match created {
            Ok(()) => {
                info!(subject, durable, "Stream consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(subject, durable, "Stream consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.connection.clone();
        let fields = [(PAYLOAD_FIELD, payload)];

        let id: String = match self.config.max_len {
            Some(n) => {
                conn.xadd_maxlen(subject, StreamMaxlen::Approx(n), "*", &fields)
                    .await?
            }
            None => conn.xadd(subject, "*", &fields).await?,
        };

        debug!(subject, id = %id, bytes = payload.len(), "Published to stream");
        Ok(())
    }

    async fn subscribe(&self, subject: &str, durable: &str) -> Result<Box<dyn Subscription>> {
        // XREADGROUP BLOCK 동안 다른 명령이 막히지 않도록 읽기 전용 연결을 따로 연다
        let reader = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;

        let acker = Arc::new(RedisAcker {
            connection: self.connection.clone(),
            stream: subject.to_string(),
            group: durable.to_string(),
            redelivery: Mutex::new(RedeliveryState::new()),
            attempts: Mutex::new(HashMap::new()),
            redelivery_delay: self.config.redelivery_delay(),
        });

        info!(
            subject,
            durable,
            consumer = %self.config.consumer_name,
            "Subscribed to stream"
        );

        Ok(Box::new(RedisSubscription {
            reader,
            stream: subject.to_string(),
            group: durable.to_string(),
            consumer: self.config.consumer_name.clone(),
            block_ms: self.config.block_timeout().as_millis() as u64,
            count: self.config.batch_size,
            buffer: VecDeque::new(),
            acker,
            closed: false,
        }))
    }
}

// =============================================================================
// 재전달 스케줄
// =============================================================================

/// pending 목록 처음부터 읽을 때의 ID.
const SCAN_START: &str = "0";

/// 다음 `XREADGROUP` 종류.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReadKind {
    /// pending 목록에서 `from` 이후 항목
    Pending { from: String },
    /// 새 메시지를 최대 `block_ms` 동안 대기
    New { block_ms: u64 },
}

/// pending 목록을 언제 다시 훑을지 결정합니다.
///
/// 한 번의 훑기는 `count` 단위 페이지로 끝까지 진행하고, 끝나면 다음 nak 예정
/// 시각까지 새 메시지만 읽습니다. nak된 메시지가 계속 실패해도 새 메시지는
/// 재전달 간격마다 흘러갑니다.
#[derive(Debug)]
struct RedeliveryState {
    /// 진행 중인 훑기의 마지막 ID
    scan: Option<String>,
    /// 다음 훑기 예정 시각
    due_at: Option<Instant>,
}

impl RedeliveryState {
    fn new() -> Self {
        Self {
            scan: Some(SCAN_START.to_string()),
            due_at: None,
        }
    }

    /// `at` 이후에 pending 목록을 다시 훑도록 예약합니다. 더 이른 예약은 유지합니다.
    fn schedule(&mut self, at: Instant) {
        self.due_at = Some(match self.due_at {
            Some(prev) => prev.min(at),
            None => at,
        });
    }

    fn next_read(&mut self, now: Instant, block_ms: u64) -> ReadKind {
        if let Some(from) = &self.scan {
            return ReadKind::Pending { from: from.clone() };
        }

        match self.due_at {
            Some(at) if at <= now => {
                self.due_at = None;
                ReadKind::Pending {
                    from: SCAN_START.to_string(),
                }
            }
            // BLOCK 0은 무한 대기이므로 최소 1ms
            Some(at) => ReadKind::New {
                block_ms: block_ms
                    .min(at.saturating_duration_since(now).as_millis() as u64)
                    .max(1),
            },
            None => ReadKind::New {
                block_ms: block_ms.max(1),
            },
        }
    }

    /// pending 페이지를 읽은 뒤 호출합니다. 꽉 찬 페이지면 이어서 읽습니다.
    fn finish_page(&mut self, read: usize, count: usize, last_id: Option<&str>) {
        self.scan = match last_id {
            Some(id) if read >= count => Some(id.to_string()),
            _ => None,
        };
    }
}

// =============================================================================
// 구독
// =============================================================================

struct RedisAcker {
    connection: MultiplexedConnection,
    stream: String,
    group: String,
    redelivery: Mutex<RedeliveryState>,
    /// pending 목록에서 다시 읽힌 항목의 전달 횟수
    attempts: Mutex<HashMap<String, u32>>,
    redelivery_delay: std::time::Duration,
}

impl RedisAcker {
    fn state(&self) -> std::sync::MutexGuard<'_, RedeliveryState> {
        self.redelivery.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn attempts(&self) -> std::sync::MutexGuard<'_, HashMap<String, u32>> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn xack(&self, id: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.xack(&self.stream, &self.group, &[id]).await?;
        self.attempts().remove(id);
        Ok(())
    }
}

#[async_trait]
impl Acker for RedisAcker {
    async fn ack(&self, id: &str) -> Result<()> {
        self.xack(id).await
    }

    async fn nak(&self, id: &str) -> Result<()> {
        self.state()
            .schedule(Instant::now() + self.redelivery_delay);
        debug!(stream = %self.stream, id, "Message nak'd, redelivery scheduled");
        Ok(())
    }
}

struct RedisSubscription {
    reader: MultiplexedConnection,
    stream: String,
    group: String,
    consumer: String,
    block_ms: u64,
    count: usize,
    buffer: VecDeque<Delivery>,
    acker: Arc<RedisAcker>,
    closed: bool,
}

impl RedisSubscription {
    async fn read(&mut self, id: &str, block_ms: Option<u64>) -> Result<Vec<StreamId>> {
        let mut opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.count);
        if let Some(ms) = block_ms {
            opts = opts.block(ms as usize);
        }

        // 블로킹 읽기가 타임아웃되면 nil 응답이 온다
        let reply: Option<StreamReadReply> = self
            .reader
            .xread_options(&[self.stream.as_str()], &[id], &opts)
            .await?;

        Ok(reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default())
    }

    /// 읽은 항목을 버퍼에 넣습니다.
    ///
    /// 전달 횟수는 pending 목록에서 다시 읽힌 항목만 추적합니다. 새 메시지는
    /// 항상 첫 전달입니다.
    async fn fill(&mut self, entries: Vec<StreamId>, from_pending: bool) -> Result<()> {
        for entry in entries {
            let Some(payload) = entry.get::<Vec<u8>>(PAYLOAD_FIELD) else {
                // MAXLEN으로 잘려나간 항목은 본문 없이 pending에만 남는다
                warn!(stream = %self.stream, id = %entry.id, "Pending entry without payload, acknowledging");
                self.acker.xack(&entry.id).await?;
                continue;
            };

            let attempt = if from_pending {
                let mut attempts = self.acker.attempts();
                let seen = attempts.entry(entry.id.clone()).or_insert(1);
                *seen += 1;
                *seen
            } else {
                1
            };

            let acker: Arc<dyn Acker> = self.acker.clone();
            self.buffer.push_back(Delivery::new(
                entry.id,
                self.stream.clone(),
                payload,
                attempt,
                acker,
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next(&mut self) -> Result<Delivery> {
        loop {
            if self.closed {
                return Err(DataError::SubscriptionClosed);
            }
            if let Some(delivery) = self.buffer.pop_front() {
                return Ok(delivery);
            }

            let kind = self.acker.state().next_read(Instant::now(), self.block_ms);
            match kind {
                ReadKind::Pending { from } => {
                    let entries = self.read(&from, None).await?;
                    let last = entries.last().map(|e| e.id.clone());
                    self.acker
                        .state()
                        .finish_page(entries.len(), self.count, last.as_deref());
                    self.fill(entries, true).await?;
                }
                ReadKind::New { block_ms } => {
                    let entries = self.read(">", Some(block_ms)).await?;
                    self.fill(entries, false).await?;
                }
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.closed = true;
        self.buffer.clear();
        info!(
            stream = %self.stream,
            group = %self.group,
            consumer = %self.consumer,
            "Unsubscribed from stream"
        );
        Ok(())
    }
}
