use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 意图键：13位零填充毫秒时间戳 + 随机后缀，字典序即创建顺序
pub fn new_intent_key(now: DateTime<Utc>) -> String {
    let millis = now.timestamp_millis().max(0);
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{millis:013}-{}", &suffix[..12])
}

/// 租约键：与意图键不同，但保留其时间顺序
pub fn new_lease_key(intent_key: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("L{intent_key}-{}", &suffix[..8])
}
