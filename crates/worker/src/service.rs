use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use relay_api::protocol::{CompleteRequest, CompleteResponse};
use relay_config::WorkerConfig;
use relay_domain::{IntentKind, IntentPayload};
use relay_errors::{RelayError, RelayResult};

use crate::client::{LeasedIntent, OpsApi};
use crate::handlers::HandlerRegistry;

/// 一次轮询的结果
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// 队列为空
    Idle,
    Completed {
        lease_key: String,
        done_key: Option<String>,
        /// 处理器返回错误，结果记入错误桶
        failed: bool,
        /// 服务端判定为幂等重放
        idempotent: bool,
    },
    /// 提交时租约已不存在（过期或已被完成）
    LeaseLost { lease_key: String },
}

pub struct WorkerService {
    worker_id: String,
    api: Arc<dyn OpsApi>,
    registry: HandlerRegistry,
    /// 每轮依次使用的类型过滤；`None` 表示不过滤
    kind_filters: Vec<Option<IntentKind>>,
    poll_interval: Duration,
    max_backoff: Duration,
    complete_max_attempts: u32,
}

impl WorkerService {
    pub fn new(
        config: &WorkerConfig,
        api: Arc<dyn OpsApi>,
        registry: HandlerRegistry,
    ) -> RelayResult<Self> {
        let kind_filters = resolve_kind_filters(&config.kinds, &registry)?;

        Ok(Self {
            worker_id: config.worker_id.clone(),
            api,
            registry,
            kind_filters,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            complete_max_attempts: config.complete_max_attempts.max(1),
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn kind_filters(&self) -> &[Option<IntentKind>] {
        &self.kind_filters
    }

    /// 租用一个意图，执行后提交结果
    pub async fn poll_once(&self, kind: Option<IntentKind>) -> RelayResult<PollOutcome> {
        let Some(leased) = self.api.next(kind).await? else {
            return Ok(PollOutcome::Idle);
        };
        let lease_key = leased.lease_key.clone();
        let intent_kind = leased.intent.kind;

        let started = Instant::now();
        let outcome = self.execute(&leased).await;
        metrics::histogram!("relay_worker_handler_seconds", "kind" => intent_kind.as_str())
            .record(started.elapsed().as_secs_f64());

        let failed = outcome.is_err();
        let request = match outcome {
            Ok(result) => CompleteRequest {
                key: lease_key.clone(),
                result: Some(reportable_result(result)),
                error: None,
                idempotency_key: Some(new_idempotency_token()),
            },
            Err(message) => {
                warn!("意图 {} 执行失败: {}", leased.intent.intent_key, message);
                CompleteRequest {
                    key: lease_key.clone(),
                    result: None,
                    error: Some(message),
                    idempotency_key: Some(new_idempotency_token()),
                }
            }
        };

        match self.complete_with_retry(&request).await {
            Ok(response) => {
                let status = if failed { "error" } else { "done" };
                metrics::counter!(
                    "relay_worker_intents_total",
                    "kind" => intent_kind.as_str(),
                    "status" => status
                )
                .increment(1);
                info!(
                    "Worker {} 完成 {} ({}) -> {:?}",
                    self.worker_id, lease_key, intent_kind, response.done_key
                );
                Ok(PollOutcome::Completed {
                    lease_key,
                    done_key: response.done_key,
                    failed,
                    idempotent: response.idempotent,
                })
            }
            Err(RelayError::NotFound { .. }) => {
                metrics::counter!(
                    "relay_worker_intents_total",
                    "kind" => intent_kind.as_str(),
                    "status" => "lease_lost"
                )
                .increment(1);
                warn!("租约 {} 已不存在，可能已过期", lease_key);
                Ok(PollOutcome::LeaseLost { lease_key })
            }
            Err(e) => Err(e),
        }
    }

    /// 校验负载并交给对应处理器；错误以字符串形式上报
    async fn execute(&self, leased: &LeasedIntent) -> Result<serde_json::Value, String> {
        let intent = &leased.intent;
        if chrono::Utc::now().timestamp() > intent.expires_ts {
            warn!("租约 {} 在执行前已过期，仍尝试执行", leased.lease_key);
        }

        let payload = IntentPayload::from_parts(intent.kind, &intent.payload)
            .map_err(|e| format!("invalid payload: {e}"))?;
        let handler = self
            .registry
            .get(intent.kind)
            .ok_or_else(|| format!("no handler registered for {}", intent.kind))?;

        debug!("执行意图 {} ({})", intent.intent_key, intent.kind);
        handler
            .handle(&intent.intent_key, &payload)
            .await
            .map_err(|e| e.to_string())
    }

    /// 传输失败时用同一个幂等令牌重试
    async fn complete_with_retry(&self, request: &CompleteRequest) -> RelayResult<CompleteResponse> {
        let mut delay = self.poll_interval;
        let mut attempt = 1;
        loop {
            match self.api.complete(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.complete_max_attempts => {
                    warn!(
                        "提交 {} 失败 (第{}次): {}，{:?} 后重试",
                        request.key, attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.max_backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 轮询直到收到关闭信号；正在处理的意图会先完成再退出
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> RelayResult<()> {
        info!(
            "Worker {} 开始轮询，类型过滤: {:?}",
            self.worker_id, self.kind_filters
        );

        let mut backoff = self.poll_interval;
        let mut cursor = 0usize;

        loop {
            let kind = self.kind_filters[cursor % self.kind_filters.len()];
            cursor = cursor.wrapping_add(1);

            let delay = match self.poll_once(kind).await {
                Ok(PollOutcome::Idle) => {
                    backoff = self.poll_interval;
                    // 一轮过滤都为空时才休眠
                    if cursor % self.kind_filters.len() == 0 {
                        self.poll_interval
                    } else {
                        Duration::ZERO
                    }
                }
                Ok(_) => {
                    backoff = self.poll_interval;
                    Duration::ZERO
                }
                Err(e) => {
                    let delay = backoff;
                    backoff = (backoff * 2).min(self.max_backoff);
                    if e.is_retryable() {
                        warn!("轮询失败: {}，{:?} 后重试", e, delay);
                    } else {
                        error!("轮询失败: {}，{:?} 后重试", e, delay);
                    }
                    delay
                }
            };

            if delay.is_zero() {
                match shutdown.try_recv() {
                    Err(TryRecvError::Empty) => continue,
                    _ => break,
                }
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Worker {} 已停止", self.worker_id);
        Ok(())
    }
}

fn new_idempotency_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// 未配置类型时租用所有已注册的类型；全部类型都支持时不带过滤
fn resolve_kind_filters(
    configured: &[String],
    registry: &HandlerRegistry,
) -> RelayResult<Vec<Option<IntentKind>>> {
    let kinds = if configured.is_empty() {
        registry.supported_kinds()
    } else {
        let mut kinds = Vec::with_capacity(configured.len());
        for raw in configured {
            let kind: IntentKind = raw.trim().parse()?;
            if !registry.supports(kind) {
                return Err(RelayError::config_error(format!(
                    "worker.kinds 包含未注册处理器的类型: {kind}"
                )));
            }
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        kinds
    };

    if kinds.is_empty() {
        return Err(RelayError::config_error("Worker没有可处理的意图类型"));
    }
    if kinds.len() == IntentKind::ALL.len() {
        return Ok(vec![None]);
    }
    Ok(kinds.into_iter().map(Some).collect())
}

/// 线上的 `"result": null` 与缺省无法区分，空结果以 `{}` 上报
fn reportable_result(result: serde_json::Value) -> serde_json::Value {
    if result.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    use crate::handlers::IntentHandler;
    use relay_api::protocol::LeasedIntentView;
    use relay_config::QueueConfig;
    use relay_core::IntentQueue;
    use relay_domain::{
        BuybackOrder, CompleteOutcome, CompletionOutcome, KeySpace, KvStore,
    };
    use relay_infrastructure::InMemoryKvStore;

    mock! {
        pub Api {}

        #[async_trait]
        impl OpsApi for Api {
            async fn next(&self, kind: Option<IntentKind>) -> RelayResult<Option<LeasedIntent>>;
            async fn complete(&self, request: &CompleteRequest) -> RelayResult<CompleteResponse>;
        }
    }

    mock! {
        pub Handler {}

        #[async_trait]
        impl IntentHandler for Handler {
            async fn handle(&self, intent_key: &str, payload: &IntentPayload) -> RelayResult<Value>;
        }
    }

    /// 直接调用队列的进程内实现
    struct QueueApi {
        queue: IntentQueue,
    }

    #[async_trait]
    impl OpsApi for QueueApi {
        async fn next(&self, kind: Option<IntentKind>) -> RelayResult<Option<LeasedIntent>> {
            Ok(self.queue.lease(kind).await?.map(|lease| LeasedIntent {
                lease_key: lease.lease_key.clone(),
                intent: LeasedIntentView::from(&lease),
            }))
        }

        async fn complete(&self, request: &CompleteRequest) -> RelayResult<CompleteResponse> {
            // 与HTTP一致：经过一次JSON编解码
            let request: CompleteRequest = serde_json::from_str(&serde_json::to_string(request)?)?;
            let outcome = match (&request.result, &request.error) {
                (Some(result), None) => CompletionOutcome::Success(result.clone()),
                (None, Some(error)) => CompletionOutcome::Failure(error.clone()),
                _ => return Err(RelayError::validation("exactly one of result or error")),
            };
            let response = match self
                .queue
                .complete(&request.key, outcome, request.idempotency_key.as_deref())
                .await?
            {
                CompleteOutcome::Completed { done_key } => CompleteResponse {
                    ok: true,
                    done_key: Some(done_key),
                    idempotent: false,
                },
                CompleteOutcome::Idempotent => CompleteResponse {
                    ok: true,
                    done_key: None,
                    idempotent: true,
                },
            };
            Ok(response)
        }
    }

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            poll_interval_ms: 10,
            max_backoff_ms: 80,
            complete_max_attempts: 3,
            ..WorkerConfig::default()
        }
    }

    fn queue() -> IntentQueue {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        IntentQueue::new(store, KeySpace::default(), QueueConfig::default())
    }

    fn ping() -> IntentPayload {
        IntentPayload::Ping(serde_json::Map::new())
    }

    fn ping_lease(lease_key: &str) -> LeasedIntent {
        let now = chrono::Utc::now().timestamp();
        LeasedIntent {
            lease_key: lease_key.to_string(),
            intent: LeasedIntentView {
                intent_key: "0000000000001-aaaaaaaaaaaa".to_string(),
                kind: IntentKind::Ping,
                payload: json!({}),
                created_ts: now,
                leased_ts: now,
                expires_ts: now + 1800,
            },
        }
    }

    #[test]
    fn test_kind_filters() {
        let registry = HandlerRegistry::with_defaults(false);
        assert_eq!(
            resolve_kind_filters(&[], &registry).unwrap(),
            vec![Some(IntentKind::Ping)]
        );

        let all = HandlerRegistry::with_defaults(true);
        assert_eq!(resolve_kind_filters(&[], &all).unwrap(), vec![None]);
        assert_eq!(
            resolve_kind_filters(
                &["CREATOR_PAYOUT_USDC".into(), "PING".into(), "PING".into()],
                &all
            )
            .unwrap(),
            vec![Some(IntentKind::CreatorPayoutUsdc), Some(IntentKind::Ping)]
        );

        let err = resolve_kind_filters(&["BUYBACK_TWAP_AND_LP".into()], &registry).unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
        assert!(resolve_kind_filters(&["SWAP".into()], &registry).is_err());
        assert!(resolve_kind_filters(&[], &HandlerRegistry::new()).is_err());
    }

    #[tokio::test]
    async fn test_null_handler_result_is_still_completed() {
        let queue = queue();
        queue.enqueue(&ping()).await.unwrap();
        let api = Arc::new(QueueApi {
            queue: queue.clone(),
        });

        let mut handler = MockHandler::new();
        handler.expect_handle().returning(|_, _| Ok(Value::Null));
        let mut registry = HandlerRegistry::new();
        registry.register(IntentKind::Ping, Arc::new(handler));

        let worker = WorkerService::new(&test_config(), api, registry).unwrap();
        let outcome = worker.poll_once(None).await.unwrap();
        let PollOutcome::Completed {
            lease_key, failed, ..
        } = outcome
        else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert!(!failed);

        let record = queue.done_record(&lease_key).await.unwrap().unwrap();
        assert_eq!(record.result, Some(json!({})));
        assert_eq!(queue.stats().await.unwrap().inflight, 0);
    }

    #[tokio::test]
    async fn test_poll_once_completes_ping() {
        let queue = queue();
        queue.enqueue(&ping()).await.unwrap();
        let api = Arc::new(QueueApi {
            queue: queue.clone(),
        });
        let worker =
            WorkerService::new(&test_config(), api, HandlerRegistry::with_defaults(false)).unwrap();

        let outcome = worker.poll_once(Some(IntentKind::Ping)).await.unwrap();
        let PollOutcome::Completed {
            lease_key,
            done_key,
            failed,
            idempotent,
        } = outcome
        else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert!(!failed && !idempotent);
        assert_eq!(done_key, Some(format!("done:{lease_key}")));

        let record = queue.done_record(&lease_key).await.unwrap().unwrap();
        assert!(!record.is_error());
        assert_eq!(worker.poll_once(None).await.unwrap(), PollOutcome::Idle);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_reported_as_error() {
        let queue = queue();
        queue
            .enqueue(&IntentPayload::BuybackTwapAndLp(BuybackOrder {
                usdc: 100,
                twap_slices: 6,
                split_burn_bps: 5_000,
                split_lp_bps: 5_000,
            }))
            .await
            .unwrap();
        let api = Arc::new(QueueApi {
            queue: queue.clone(),
        });

        let mut handler = MockHandler::new();
        handler
            .expect_handle()
            .returning(|_, _| Err(RelayError::internal("swap reverted")));
        let mut registry = HandlerRegistry::new();
        registry.register(IntentKind::BuybackTwapAndLp, Arc::new(handler));

        let worker = WorkerService::new(&test_config(), api, registry).unwrap();
        let outcome = worker.poll_once(None).await.unwrap();
        let PollOutcome::Completed { failed, done_key, .. } = outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert!(failed);
        assert!(done_key.unwrap().starts_with("err:"));

        let stats = queue.stats().await.unwrap();
        assert_eq!((stats.done, stats.error), (0, 1));
    }

    #[tokio::test]
    async fn test_malformed_payload_never_reaches_handler() {
        let mut api = MockApi::new();
        api.expect_next().times(1).returning(|_| {
            let mut lease = ping_lease("Lbad");
            lease.intent.kind = IntentKind::CreatorPayoutUsdc;
            lease.intent.payload = json!({"amount": "lots"});
            Ok(Some(lease))
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        api.expect_complete().times(1).returning(move |request| {
            captured.lock().unwrap().push(request.clone());
            Ok(CompleteResponse {
                ok: true,
                done_key: Some(format!("err:{}", request.key)),
                idempotent: false,
            })
        });

        let mut handler = MockHandler::new();
        handler.expect_handle().times(0);
        let mut registry = HandlerRegistry::new();
        registry.register(IntentKind::CreatorPayoutUsdc, Arc::new(handler));

        let worker = WorkerService::new(&test_config(), Arc::new(api), registry).unwrap();
        worker.poll_once(None).await.unwrap();

        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].result.is_none());
        assert!(requests[0]
            .error
            .as_deref()
            .unwrap()
            .starts_with("invalid payload"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_retries_with_same_token() {
        let mut api = MockApi::new();
        api.expect_next()
            .times(1)
            .returning(|_| Ok(Some(ping_lease("L1"))));

        let attempts = Arc::new(AtomicU32::new(0));
        let tokens = Arc::new(Mutex::new(Vec::new()));
        let (counter, captured) = (attempts.clone(), tokens.clone());
        api.expect_complete().times(3).returning(move |request| {
            captured
                .lock()
                .unwrap()
                .push(request.idempotency_key.clone().unwrap());
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RelayError::Network("connection reset".into()))
            } else {
                Ok(CompleteResponse {
                    ok: true,
                    done_key: Some("done:L1".into()),
                    idempotent: false,
                })
            }
        });

        let worker = WorkerService::new(
            &test_config(),
            Arc::new(api),
            HandlerRegistry::with_defaults(false),
        )
        .unwrap();
        let outcome = worker.poll_once(None).await.unwrap();
        assert!(matches!(outcome, PollOutcome::Completed { .. }));

        let tokens = tokens.lock().unwrap();
        assert_eq!(tokens.len(), 3);
        assert!(tokens.iter().all(|t| t == &tokens[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_gives_up_after_max_attempts() {
        let mut api = MockApi::new();
        api.expect_next()
            .returning(|_| Ok(Some(ping_lease("L2"))));
        api.expect_complete()
            .times(3)
            .returning(|_| Err(RelayError::store("redis down")));

        let worker = WorkerService::new(
            &test_config(),
            Arc::new(api),
            HandlerRegistry::with_defaults(false),
        )
        .unwrap();
        let err = worker.poll_once(None).await.unwrap_err();
        assert!(matches!(err, RelayError::Store(_)));
    }

    #[tokio::test]
    async fn test_not_found_on_complete_is_lease_lost() {
        let mut api = MockApi::new();
        api.expect_next()
            .returning(|_| Ok(Some(ping_lease("L3"))));
        api.expect_complete()
            .times(1)
            .returning(|request| Err(RelayError::not_found(request.key.clone())));

        let worker = WorkerService::new(
            &test_config(),
            Arc::new(api),
            HandlerRegistry::with_defaults(false),
        )
        .unwrap();
        assert_eq!(
            worker.poll_once(None).await.unwrap(),
            PollOutcome::LeaseLost {
                lease_key: "L3".into()
            }
        );
    }

    #[tokio::test]
    async fn test_run_drains_queue_until_shutdown() {
        let queue = queue();
        for _ in 0..3 {
            queue.enqueue(&ping()).await.unwrap();
        }
        let worker = Arc::new(
            WorkerService::new(
                &test_config(),
                Arc::new(QueueApi {
                    queue: queue.clone(),
                }),
                HandlerRegistry::with_defaults(false),
            )
            .unwrap(),
        );

        let (tx, rx) = broadcast::channel(1);
        let runner = worker.clone();
        let handle = tokio::spawn(async move { runner.run(rx).await });

        for _ in 0..200 {
            if queue.stats().await.unwrap().done == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!((stats.pending, stats.inflight, stats.done), (0, 0, 3));
    }

    struct SlowHandler {
        started: Arc<Notify>,
    }

    #[async_trait]
    impl IntentHandler for SlowHandler {
        async fn handle(&self, _intent_key: &str, _payload: &IntentPayload) -> RelayResult<Value> {
            self.started.notify_one();
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(json!({"slow": true}))
        }
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_intent() {
        let queue = queue();
        queue.enqueue(&ping()).await.unwrap();

        let started = Arc::new(Notify::new());
        let mut registry = HandlerRegistry::new();
        registry.register(
            IntentKind::Ping,
            Arc::new(SlowHandler {
                started: started.clone(),
            }),
        );
        let worker = Arc::new(
            WorkerService::new(
                &test_config(),
                Arc::new(QueueApi {
                    queue: queue.clone(),
                }),
                registry,
            )
            .unwrap(),
        );

        let (tx, rx) = broadcast::channel(1);
        let runner = worker.clone();
        let handle = tokio::spawn(async move { runner.run(rx).await });

        started.notified().await;
        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!((stats.inflight, stats.done), (0, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_backs_off_on_errors_and_stops() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut api = MockApi::new();
        api.expect_next().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(RelayError::Network("refused".into()))
        });

        let worker = Arc::new(
            WorkerService::new(
                &test_config(),
                Arc::new(api),
                HandlerRegistry::with_defaults(false),
            )
            .unwrap(),
        );
        let (tx, rx) = broadcast::channel(1);
        let runner = worker.clone();
        let handle = tokio::spawn(async move { runner.run(rx).await });

        // 10 + 20 + 40 + 80 + 80 = 230ms 内最多6次调用
        tokio::time::sleep(Duration::from_millis(235)).await;
        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        let calls = calls.load(Ordering::SeqCst);
        assert!((2..=6).contains(&calls), "unexpected call count {calls}");
    }
}
