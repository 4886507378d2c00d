#![deny(unsafe_code)]

//! spark-hub-filters: 面向 `spark-hub` 管线的可复用过滤器组件库。
//!
//! # 教案式概览
//! - **意图（Why）**：日志、指标、参数清洗、错误脱敏是大多数 Hub 都需要的横切逻辑，集中实现一次，
//!   各 Hub 通过注册表或配置文件按名称挂载。
//! - **结构（How）**：[`logging`]、[`metrics`]、[`language`]、[`masking`] 各提供一个过滤器与其配置；
//!   [`catalog`] 把它们登记到 [`spark_hub::FilterCatalog`]。
//! - **契约（What）**：所有过滤器都实现 [`spark_hub::HubFilter`]；除非文档另有说明，失败原样向外传播。
//! - **风险提示（Trade-offs）**：[`MetricsFilter`] 以单例方式共享计数，其余过滤器无跨调用状态。

pub mod catalog;
pub mod language;
pub mod logging;
pub mod masking;
pub mod metrics;

pub use catalog::{catalog_with_metrics, default_catalog};
pub use language::{LanguageFilter, LanguageFilterConfig};
pub use logging::{LoggingFilter, LoggingFilterConfig};
pub use masking::{ErrorMaskingConfig, ErrorMaskingFilter};
pub use metrics::{MethodSnapshot, MetricsFilter, MetricsSnapshot};
