use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use relay_config::QueueConfig;
use relay_domain::{
    new_intent_key, new_lease_key, CompleteOutcome, CompletionOutcome, DoneRecord, EnqueueMarker,
    EnqueueOutcome, Intent, IntentKind, IntentPayload, KeySpace, KvStore, Lease, QueueStats,
};
use relay_errors::{RelayError, RelayResult};

use crate::idempotency::IdempotencyGuard;

/// 持久化意图队列
///
/// 生命周期：`intent:` (待处理) → `lease:` (进行中，带TTL) → `done:` / `err:`。
/// 所有互斥都依赖存储的 `take`：同一意图只有一个调用方能把它转为租约。
#[derive(Clone)]
pub struct IntentQueue {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    config: QueueConfig,
    idempotency: IdempotencyGuard,
}

impl IntentQueue {
    pub fn new(store: Arc<dyn KvStore>, keys: KeySpace, config: QueueConfig) -> Self {
        let idempotency = IdempotencyGuard::new(
            store.clone(),
            keys.clone(),
            Duration::from_secs(config.idempotency_ttl_seconds),
        );
        Self {
            store,
            keys,
            config,
            idempotency,
        }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    #[instrument(skip(self, payload), fields(kind = %payload.kind()))]
    pub async fn enqueue(&self, payload: &IntentPayload) -> RelayResult<String> {
        payload.validate()?;

        let now = Utc::now();
        let intent = Intent::new(new_intent_key(now), payload, now.timestamp())?;
        self.write_intent(&intent).await?;
        Ok(intent.key)
    }

    /// 同一 `dedupe_id` 至多产生一个意图
    ///
    /// 标记 `enq:<id>` 记录意图本身并保留 `done_ttl_seconds`。重复调用返回最初的意图；
    /// 若上次在写入意图前中断（标记未提交且意图不在任何阶段），补写该意图。
    #[instrument(skip(self, payload), fields(kind = %payload.kind()))]
    pub async fn enqueue_once(
        &self,
        dedupe_id: &str,
        payload: &IntentPayload,
    ) -> RelayResult<EnqueueOutcome> {
        if dedupe_id.is_empty() {
            return Err(RelayError::validation("dedupe id must not be empty"));
        }
        payload.validate()?;

        let marker_key = self.keys.enqueued(dedupe_id);
        let marker_ttl = Some(Duration::from_secs(self.config.done_ttl_seconds));
        let now = Utc::now();
        let marker = EnqueueMarker {
            intent: Intent::new(new_intent_key(now), payload, now.timestamp())?,
            committed: false,
        };

        if !self
            .store
            .put_if_absent(&marker_key, &serde_json::to_string(&marker)?, marker_ttl)
            .await?
        {
            if let Some(raw) = self.store.get(&marker_key).await? {
                let existing: EnqueueMarker = serde_json::from_str(&raw)?;
                if !existing.committed && !self.is_tracked(&existing.intent.key).await? {
                    warn!(
                        "去重标识 {} 的意图 {} 未写入，补写",
                        dedupe_id, existing.intent.key
                    );
                    self.write_intent(&existing.intent).await?;
                    self.commit_marker(&marker_key, existing.clone(), marker_ttl).await;
                }
                info!("去重标识 {} 已入队: key={}", dedupe_id, existing.intent.key);
                return Ok(EnqueueOutcome::AlreadyEnqueued(existing.intent));
            }
            // 标记恰好在两次读写之间过期
            self.store
                .put(&marker_key, &serde_json::to_string(&marker)?, marker_ttl)
                .await?;
        }

        if let Err(e) = self.write_intent(&marker.intent).await {
            if let Err(clear_err) = self.store.delete(&marker_key).await {
                warn!("清除去重标记 {} 失败: {}", dedupe_id, clear_err);
            }
            return Err(e);
        }
        self.commit_marker(&marker_key, marker.clone(), marker_ttl).await;

        Ok(EnqueueOutcome::Enqueued(marker.intent))
    }

    async fn write_intent(&self, intent: &Intent) -> RelayResult<()> {
        self.store
            .put(&self.keys.intent(&intent.key), &serde_json::to_string(intent)?, None)
            .await?;
        metrics::counter!("relay_intents_enqueued_total", "kind" => intent.kind.as_str())
            .increment(1);
        info!("意图已入队: key={}, kind={}", intent.key, intent.kind);
        Ok(())
    }

    /// 提交失败只会让下次重复调用多做一次存在性检查
    async fn commit_marker(
        &self,
        marker_key: &str,
        mut marker: EnqueueMarker,
        ttl: Option<Duration>,
    ) {
        marker.committed = true;
        let written = match serde_json::to_string(&marker) {
            Ok(encoded) => self.store.put(marker_key, &encoded, ttl).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = written {
            warn!("提交去重标记 {} 失败: {}", marker_key, e);
        }
    }

    /// 意图是否处于任一生命周期阶段
    async fn is_tracked(&self, intent_key: &str) -> RelayResult<bool> {
        if self.store.get(&self.keys.intent(intent_key)).await?.is_some() {
            return Ok(true);
        }
        let lease_prefix = format!("L{intent_key}-");
        for prefix in [
            self.keys.lease(&lease_prefix),
            self.keys.done(&lease_prefix),
            self.keys.failed(&lease_prefix),
        ] {
            if !self.store.list(&prefix, None, 1).await?.keys.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// 按键序（最旧优先）领取一个意图，可按类型过滤
    #[instrument(skip(self))]
    pub async fn lease(&self, kind_filter: Option<IntentKind>) -> RelayResult<Option<Lease>> {
        let pending = self
            .store
            .list_all(&self.keys.intent_prefix(), self.config.scan_page_size)
            .await?;

        for full_key in &pending {
            let Some(raw) = self.store.get(full_key).await? else {
                continue;
            };
            let intent: Intent = match serde_json::from_str(&raw) {
                Ok(intent) => intent,
                Err(e) => {
                    warn!("跳过无法解析的意图 {}: {}", full_key, e);
                    continue;
                }
            };
            if kind_filter.is_some_and(|kind| kind != intent.kind) {
                continue;
            }

            if self.store.take(full_key).await?.is_none() {
                debug!("意图 {} 已被其他调用方领取", full_key);
                continue;
            }

            let lease = Lease {
                lease_key: new_lease_key(&intent.key),
                intent,
                leased_ts: Utc::now().timestamp(),
                ttl_secs: self.config.lease_ttl_seconds,
            };
            self.persist_lease(full_key, &raw, &lease).await?;

            metrics::counter!("relay_intents_leased_total", "kind" => lease.intent.kind.as_str())
                .increment(1);
            info!(
                "意图已租出: intent={}, lease={}, ttl={}s",
                lease.intent.key, lease.lease_key, lease.ttl_secs
            );
            return Ok(Some(lease));
        }

        Ok(None)
    }

    /// 写入租约；失败时尽力把意图放回待处理区
    async fn persist_lease(&self, intent_full_key: &str, raw_intent: &str, lease: &Lease) -> RelayResult<()> {
        let encoded = serde_json::to_string(lease)?;
        let written = self
            .store
            .put(
                &self.keys.lease(&lease.lease_key),
                &encoded,
                Some(Duration::from_secs(lease.ttl_secs)),
            )
            .await;

        if let Err(e) = written {
            error!("写入租约 {} 失败，尝试恢复意图: {}", lease.lease_key, e);
            if let Err(restore_err) = self.store.put(intent_full_key, raw_intent, None).await {
                error!("恢复意图 {} 失败: {}", intent_full_key, restore_err);
            }
            return Err(e);
        }
        Ok(())
    }

    /// 结束租约并写入完成记录
    ///
    /// 带幂等令牌的重复调用返回 `Idempotent`；租约不存在（已完成或已过期）返回 `NotFound`。
    #[instrument(skip(self, outcome))]
    pub async fn complete(
        &self,
        lease_key: &str,
        outcome: CompletionOutcome,
        idempotency_token: Option<&str>,
    ) -> RelayResult<CompleteOutcome> {
        if lease_key.is_empty() {
            return Err(RelayError::validation("lease key must not be empty"));
        }

        if let Some(token) = idempotency_token {
            if !self.idempotency.mark_if_absent(token).await? {
                info!("重复的完成请求: lease={}, token={}", lease_key, token);
                return Ok(CompleteOutcome::Idempotent);
            }
        }

        let raw = match self.store.take(&self.keys.lease(lease_key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                warn!("租约 {} 不存在（已完成或已过期）", lease_key);
                self.release_token(idempotency_token).await;
                return Err(RelayError::not_found(lease_key));
            }
            Err(e) => {
                self.release_token(idempotency_token).await;
                return Err(e);
            }
        };

        match self.record_completion(lease_key, &raw, outcome).await {
            Ok(done_key) => Ok(CompleteOutcome::Completed { done_key }),
            Err(e) => {
                error!("写入完成记录失败，恢复租约 {}: {}", lease_key, e);
                self.restore_lease(lease_key, &raw).await;
                self.release_token(idempotency_token).await;
                Err(e)
            }
        }
    }

    async fn record_completion(
        &self,
        lease_key: &str,
        raw_lease: &str,
        outcome: CompletionOutcome,
    ) -> RelayResult<String> {
        let lease: Lease = serde_json::from_str(raw_lease)?;
        let success = outcome.is_success();
        let record = DoneRecord::new(&lease, outcome, Utc::now().timestamp());
        let done_key = if record.is_error() {
            self.keys.failed(lease_key)
        } else {
            self.keys.done(lease_key)
        };

        self.store
            .put(
                &done_key,
                &serde_json::to_string(&record)?,
                Some(Duration::from_secs(self.config.done_ttl_seconds)),
            )
            .await?;

        let status = if success { "success" } else { "error" };
        metrics::counter!(
            "relay_intents_completed_total",
            "kind" => record.kind.as_str(),
            "status" => status
        )
        .increment(1);
        info!(
            "租约已完成: lease={}, intent={}, status={}",
            lease_key, record.intent_key, status
        );
        Ok(done_key)
    }

    /// 把已取出的租约按剩余TTL放回；已过期的租约不再恢复
    async fn restore_lease(&self, lease_key: &str, raw_lease: &str) {
        let ttl = match serde_json::from_str::<Lease>(raw_lease) {
            Ok(lease) => {
                let remaining = lease.expires_ts() - Utc::now().timestamp();
                if remaining <= 0 {
                    warn!("租约 {} 已过期，不再恢复", lease_key);
                    return;
                }
                remaining as u64
            }
            Err(_) => self.config.lease_ttl_seconds,
        };

        if let Err(e) = self
            .store
            .put(
                &self.keys.lease(lease_key),
                raw_lease,
                Some(Duration::from_secs(ttl)),
            )
            .await
        {
            error!("恢复租约 {} 失败: {}", lease_key, e);
        }
    }

    async fn release_token(&self, token: Option<&str>) {
        if let Some(token) = token {
            if let Err(e) = self.idempotency.clear(token).await {
                warn!("清除幂等标记 {} 失败: {}", token, e);
            }
        }
    }

    pub async fn stats(&self) -> RelayResult<QueueStats> {
        let page = self.config.scan_page_size;
        Ok(QueueStats {
            pending: self.store.count_prefix(&self.keys.intent_prefix(), page).await?,
            inflight: self.store.count_prefix(&self.keys.lease_prefix(), page).await?,
            done: self.store.count_prefix(&self.keys.done_prefix(), page).await?,
            error: self.store.count_prefix(&self.keys.failed_prefix(), page).await?,
            locked: self.store.count_prefix(&self.keys.lock_prefix(), page).await?,
        })
    }

    /// 查找租约的完成记录（成功或失败）
    pub async fn done_record(&self, lease_key: &str) -> RelayResult<Option<DoneRecord>> {
        for key in [self.keys.done(lease_key), self.keys.failed(lease_key)] {
            if let Some(raw) = self.store.get(&key).await? {
                return Ok(Some(serde_json::from_str(&raw)?));
            }
        }
        Ok(None)
    }

    /// 最旧的至多 `limit` 个待处理意图
    pub async fn list_pending(&self, limit: usize) -> RelayResult<Vec<Intent>> {
        let page = self
            .store
            .list(&self.keys.intent_prefix(), None, limit)
            .await?;
        let mut intents = Vec::with_capacity(page.keys.len());
        for key in &page.keys {
            if let Some(raw) = self.store.get(key).await? {
                intents.push(serde_json::from_str(&raw)?);
            }
        }
        Ok(intents)
    }
}
