//! 声明式管线配置。
//!
//! # 教案式说明
//! - **意图（Why）**：宿主可以直接调用注册表 API 装配过滤器，也可以在配置文件中按名称列出过滤器，
//!   由 [`FilterCatalog`] 把名称映射到具体来源；两种方式得到同一个 [`FilterRegistry`]。
//! - **逻辑（How）**：`serde` 反序列化 TOML 文本为 [`PipelineSettings`]，
//!   [`build_registry`](PipelineSettings::build_registry) 先注册 `global` 列表，再按 Hub 名称字典序注册各 Hub 的局部列表。
//! - **契约（What）**：解析失败与引用未知名称均返回 `hub.configuration`；返回的注册表尚未封存，
//!   宿主可以继续追加条目。
//!
//! ```toml
//! global = ["logging", "error_masking"]
//!
//! [hubs.chat]
//! filters = ["language"]
//!
//! [options]
//! slow_call_threshold_ms = 250
//! ```

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use serde::Deserialize;

use crate::{
    HubError, HubResult,
    registry::{FilterRegistry, FilterSource},
};

/// 管线配置根节点。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSettings {
    /// 全局过滤器名称，按执行顺序（外层在前）排列。
    pub global: Vec<String>,
    /// 以 Hub 名称为键的局部过滤器列表。
    pub hubs: BTreeMap<String, HubSettings>,
    pub options: PipelineOptions,
}

/// 单个 Hub 的局部配置。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubSettings {
    pub filters: Vec<String>,
}

/// 执行器运行参数。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineOptions {
    /// 慢调用阈值（毫秒）；超过阈值的调用输出 `warn` 事件，缺省时不检测。
    pub slow_call_threshold_ms: Option<u64>,
}

impl PipelineOptions {
    pub fn with_slow_call_threshold(mut self, threshold: Duration) -> Self {
        self.slow_call_threshold_ms = Some(u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn slow_call_threshold(&self) -> Option<Duration> {
        self.slow_call_threshold_ms.map(Duration::from_millis)
    }
}

impl PipelineSettings {
    pub fn from_toml_str(text: &str) -> HubResult<Self> {
        toml::from_str(text)
            .map_err(|err| HubError::configuration(format!("invalid pipeline settings: {err}")))
    }

    /// 依据名称目录构造注册表。
    pub fn build_registry(&self, catalog: &FilterCatalog) -> HubResult<FilterRegistry> {
        let mut registry = FilterRegistry::new();
        for name in &self.global {
            registry.add_global(catalog.source(name)?)?;
        }
        for (hub, settings) in &self.hubs {
            for name in &settings.filters {
                registry.add_local(hub.as_str(), catalog.source(name)?)?;
            }
        }
        tracing::debug!(
            global = self.global.len(),
            hubs = self.hubs.len(),
            entries = registry.len(),
            "hub filter registry built from settings"
        );
        Ok(registry)
    }
}

type SourceFactory = Arc<dyn Fn() -> FilterSource + Send + Sync>;

/// 过滤器名称目录：配置中的名称到过滤器来源的映射。
#[derive(Clone, Default)]
pub struct FilterCatalog {
    entries: BTreeMap<String, SourceFactory>,
}

impl FilterCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记名称；重复登记时后者覆盖前者。
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> FilterSource + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// 生成名称对应的过滤器来源；未登记的名称返回 `hub.configuration`。
    pub fn source(&self, name: &str) -> HubResult<FilterSource> {
        self.entries
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| HubError::configuration(format!("unknown hub filter `{name}`")))
    }
}

impl fmt::Debug for FilterCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterCatalog")
            .field("names", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
