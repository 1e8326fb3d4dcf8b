use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 验证单元
///
/// 一个待验证的基础设施配置包，包含配置文件、测试文件和声明的服务集合。
/// 单元由调用方构造，验证过程中不会被修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationUnit {
    /// 单元唯一标识（内容哈希）
    pub id: String,
    /// 配置文件：文件名 -> 内容
    pub config_files: BTreeMap<String, String>,
    /// 测试应用文件：文件名 -> 内容
    #[serde(default)]
    pub test_files: BTreeMap<String, String>,
    /// 单元声明使用的服务
    #[serde(default)]
    pub services: Vec<String>,
    /// 来源元数据
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ValidationUnit {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            config_files: BTreeMap::new(),
            test_files: BTreeMap::new(),
            services: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }

    /// 添加配置文件
    pub fn with_config_file(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.config_files.insert(name.into(), content.into());
        self
    }

    /// 添加测试文件
    pub fn with_test_file(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.test_files.insert(name.into(), content.into());
        self
    }

    /// 设置服务集合
    pub fn with_services(mut self, services: Vec<String>) -> Self {
        self.services = services;
        self
    }

    /// 短ID，用于日志和容器命名
    pub fn short_id(&self) -> &str {
        let end = self.id.len().min(8);
        &self.id[..end]
    }
}
