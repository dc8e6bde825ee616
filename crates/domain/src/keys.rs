//! 共享存储中的键布局
//!
//! ```text
//! intent:<key>        待处理意图
//! lease:<lease_key>   进行中的租约（带TTL）
//! done:<lease_key>    成功完成记录
//! err:<lease_key>     失败完成记录
//! idem:<token>        幂等标记
//! enq:<id>            生产者去重入队标记
//! lock:<name>         分布式锁
//! cfg:<name>          运行参数
//! jobs:error:<job>    生产者错误标记
//! metrics:latest      最近一次指标快照
//! ```

const INTENT: &str = "intent:";
const LEASE: &str = "lease:";
const DONE: &str = "done:";
const FAILED: &str = "err:";
const IDEMPOTENCY: &str = "idem:";
const ENQUEUED: &str = "enq:";
const LOCK: &str = "lock:";
const CONFIG: &str = "cfg:";
const JOB_ERROR: &str = "jobs:error:";
const METRICS_LATEST: &str = "metrics:latest";
const METRICS_ERROR: &str = "metrics:error";

/// 带可选全局前缀的键空间
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn join(&self, namespace: &str, id: &str) -> String {
        format!("{}{}{}", self.prefix, namespace, id)
    }

    pub fn intent(&self, key: &str) -> String {
        self.join(INTENT, key)
    }

    pub fn intent_prefix(&self) -> String {
        self.join(INTENT, "")
    }

    pub fn lease(&self, lease_key: &str) -> String {
        self.join(LEASE, lease_key)
    }

    pub fn lease_prefix(&self) -> String {
        self.join(LEASE, "")
    }

    pub fn done(&self, lease_key: &str) -> String {
        self.join(DONE, lease_key)
    }

    pub fn done_prefix(&self) -> String {
        self.join(DONE, "")
    }

    pub fn failed(&self, lease_key: &str) -> String {
        self.join(FAILED, lease_key)
    }

    pub fn failed_prefix(&self) -> String {
        self.join(FAILED, "")
    }

    pub fn idempotency(&self, token: &str) -> String {
        self.join(IDEMPOTENCY, token)
    }

    pub fn enqueued(&self, dedupe_id: &str) -> String {
        self.join(ENQUEUED, dedupe_id)
    }

    pub fn lock(&self, name: &str) -> String {
        self.join(LOCK, name)
    }

    pub fn lock_prefix(&self) -> String {
        self.join(LOCK, "")
    }

    pub fn config(&self, name: &str) -> String {
        self.join(CONFIG, name)
    }

    pub fn job_error(&self, job: &str) -> String {
        self.join(JOB_ERROR, job)
    }

    pub fn metrics_latest(&self) -> String {
        self.join(METRICS_LATEST, "")
    }

    pub fn metrics_error(&self) -> String {
        self.join(METRICS_ERROR, "")
    }

    /// 去掉命名空间前缀，还原业务键
    pub fn strip<'a>(&self, full_key: &'a str, namespace_prefix: &str) -> Option<&'a str> {
        full_key.strip_prefix(namespace_prefix)
    }
}
