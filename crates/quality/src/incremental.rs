use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use validator_core::{CacheEntry, Result, ValidationStatus, ValidationUnit};

/// 指纹十六进制长度
const FINGERPRINT_LEN: usize = 16;

/// 增量验证缓存
///
/// 基于内容指纹决定单元是否需要重新验证。缓存文件损坏或无法读取时
/// 按空缓存处理（fail-open），绝不因此阻断验证。
pub struct IncrementalCache {
    cache_file: PathBuf,
    ttl: chrono::Duration,
    skip_passed: bool,
    skip_config_errors: bool,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

/// 预演统计中的跳过原因分类
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkipBreakdown {
    pub unchanged_passed: usize,
    pub config_errors: usize,
    pub other: usize,
}

/// 一批候选单元的将跑/将跳过划分
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipSummary {
    pub total: usize,
    pub will_validate: usize,
    pub will_skip: usize,
    pub breakdown: SkipBreakdown,
    /// 样例，各最多20个
    pub units_to_validate: Vec<String>,
    pub units_to_skip: Vec<String>,
}

impl IncrementalCache {
    pub async fn new(state_dir: &Path, ttl_hours: i64) -> Result<Self> {
        Self::with_options(state_dir, ttl_hours, true, true).await
    }

    pub async fn with_options(
        state_dir: &Path,
        ttl_hours: i64,
        skip_passed: bool,
        skip_config_errors: bool,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(state_dir).await?;
        let cache = Self {
            cache_file: state_dir.join("validation_cache.json"),
            ttl: chrono::Duration::hours(ttl_hours),
            skip_passed,
            skip_config_errors,
            entries: RwLock::new(HashMap::new()),
        };
        cache.load().await;
        Ok(cache)
    }

    /// 读取缓存文件，任何失败按空缓存处理
    async fn load(&self) {
        match tokio::fs::read_to_string(&self.cache_file).await {
            Ok(content) => match serde_json::from_str::<HashMap<String, CacheEntry>>(&content) {
                Ok(loaded) => {
                    let mut entries = self.entries.write().await;
                    *entries = loaded;
                    debug!("加载缓存条目 {} 条", entries.len());
                }
                Err(e) => warn!("解析验证缓存失败，按空缓存处理: {e}"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("读取验证缓存失败，按空缓存处理: {e}"),
        }
    }

    async fn save(&self, entries: &HashMap<String, CacheEntry>) -> Result<()> {
        let content = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&self.cache_file, content).await?;
        Ok(())
    }

    /// 对文件集合计算确定性指纹
    ///
    /// 按文件名排序后依次喂入哈希，与枚举顺序无关。
    pub fn fingerprint(files: &BTreeMap<String, String>) -> String {
        let mut hasher = Sha256::new();
        for (name, content) in files {
            hasher.update(name.as_bytes());
            hasher.update(content.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        digest[..FINGERPRINT_LEN].to_string()
    }

    /// 判定单元是否需要验证
    ///
    /// 首个命中的规则生效：强制 -> 无条目 -> 条目过期 -> 指纹漂移 ->
    /// 上次通过且未变更 -> 已知配置错误 -> 默认执行。
    pub async fn should_validate(
        &self,
        unit: &ValidationUnit,
        force: bool,
    ) -> (bool, Option<String>) {
        if force {
            return (true, None);
        }

        let entries = self.entries.read().await;
        let entry = match entries.get(&unit.id) {
            Some(entry) => entry,
            None => return (true, None),
        };

        if entry.is_expired(self.ttl) {
            return (true, None);
        }

        if Self::fingerprint(&unit.config_files) != entry.config_fingerprint {
            return (true, None);
        }
        if Self::fingerprint(&unit.test_files) != entry.artifact_fingerprint {
            return (true, None);
        }

        if self.skip_passed && entry.last_status == ValidationStatus::Passed {
            return (false, Some("previously passed, unchanged".to_string()));
        }

        if self.skip_config_errors {
            if let Some(reason) = &entry.skip_reason {
                if reason.to_lowercase().contains("config") {
                    return (false, Some(reason.clone()));
                }
            }
        }

        (true, None)
    }

    /// 实际执行后立即写入新条目
    pub async fn update(
        &self,
        unit: &ValidationUnit,
        status: ValidationStatus,
        run_id: &str,
        skip_reason: Option<String>,
    ) -> Result<CacheEntry> {
        let entry = CacheEntry {
            unit_id: unit.id.clone(),
            config_fingerprint: Self::fingerprint(&unit.config_files),
            artifact_fingerprint: Self::fingerprint(&unit.test_files),
            last_status: status,
            last_run_id: run_id.to_string(),
            last_validated_at: chrono::Utc::now(),
            skip_reason,
        };

        let mut entries = self.entries.write().await;
        entries.insert(unit.id.clone(), entry.clone());
        self.save(&entries).await?;
        Ok(entry)
    }

    /// 为单元记录配置错误，作为后续跳过依据
    pub async fn mark_config_error(&self, unit_id: &str, error_message: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(unit_id) {
            let truncated: String = error_message.chars().take(100).collect();
            entry.skip_reason = Some(format!("config error: {truncated}"));
            self.save(&entries).await?;
        }
        Ok(())
    }

    /// 读取单元的缓存条目
    pub async fn entry(&self, unit_id: &str) -> Option<CacheEntry> {
        self.entries.read().await.get(unit_id).cloned()
    }

    /// 清除指定单元或全部条目，返回清除数量
    pub async fn clear(&self, unit_id: Option<&str>) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let removed = match unit_id {
            Some(id) => {
                if entries.remove(id).is_some() {
                    1
                } else {
                    0
                }
            }
            None => {
                let count = entries.len();
                entries.clear();
                count
            }
        };
        self.save(&entries).await?;
        info!("清除缓存条目 {removed} 条");
        Ok(removed)
    }

    /// 对候选集合做预演划分，供dry-run报告使用
    pub async fn skip_summary(&self, units: &[ValidationUnit]) -> SkipSummary {
        let mut will_validate = Vec::new();
        let mut will_skip = Vec::new();
        let mut breakdown = SkipBreakdown::default();

        for unit in units {
            let (run, reason) = self.should_validate(unit, false).await;
            if run {
                will_validate.push(unit.id.clone());
            } else {
                let reason = reason.unwrap_or_default();
                let lower = reason.to_lowercase();
                if lower.contains("passed") {
                    breakdown.unchanged_passed += 1;
                } else if lower.contains("config") {
                    breakdown.config_errors += 1;
                } else {
                    breakdown.other += 1;
                }
                will_skip.push(unit.id.clone());
            }
        }

        SkipSummary {
            total: units.len(),
            will_validate: will_validate.len(),
            will_skip: will_skip.len(),
            breakdown,
            units_to_validate: will_validate.into_iter().take(20).collect(),
            units_to_skip: will_skip.into_iter().take(20).collect(),
        }
    }
}
