use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::result::ValidationStatus;

/// 增量验证缓存条目
///
/// 每个单元一条，在每次实际执行后整体覆盖。指纹必须反映产生
/// `last_status` 的那次执行的精确输入。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub unit_id: String,
    /// 配置文件内容指纹
    pub config_fingerprint: String,
    /// 测试制品内容指纹
    pub artifact_fingerprint: String,
    pub last_status: ValidationStatus,
    pub last_run_id: String,
    pub last_validated_at: DateTime<Utc>,
    #[serde(default)]
    pub skip_reason: Option<String>,
}

impl CacheEntry {
    /// 条目是否超过TTL
    pub fn is_expired(&self, ttl: chrono::Duration) -> bool {
        Utc::now() - self.last_validated_at > ttl
    }
}
