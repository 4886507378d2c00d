//! 内置过滤器的名称目录，供 [`PipelineSettings`](spark_hub::PipelineSettings) 按名称装配。

use std::sync::Arc;

use spark_hub::{FilterCatalog, FilterSource};

use crate::{
    language::LanguageFilter, logging::LoggingFilter, masking::ErrorMaskingFilter,
    metrics::MetricsFilter,
};

pub const LOGGING: &str = "logging";
pub const METRICS: &str = "metrics";
pub const LANGUAGE: &str = "language";
pub const ERROR_MASKING: &str = "error_masking";

/// 登记全部内置过滤器，指标过滤器使用目录私有的单例。
pub fn default_catalog() -> FilterCatalog {
    catalog_with_metrics(Arc::new(MetricsFilter::default()))
}

/// 登记全部内置过滤器。
///
/// # 契约说明（What）
/// - `logging`：共享实例，默认 `INFO` 级别；
/// - `metrics`：共享调用方传入的 `metrics`，调用方保留句柄读取快照；
/// - `language`、`error_masking`：按类型逐次激活，配置从作用域服务读取（缺省时使用默认值）。
pub fn catalog_with_metrics(metrics: Arc<MetricsFilter>) -> FilterCatalog {
    let mut catalog = FilterCatalog::new();
    catalog
        .register(LOGGING, || FilterSource::instance(LoggingFilter::default()))
        .register(METRICS, move || FilterSource::shared(metrics.clone()))
        .register(LANGUAGE, FilterSource::of_type::<LanguageFilter>)
        .register(ERROR_MASKING, FilterSource::of_type::<ErrorMaskingFilter>);
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_builtin_filter() {
        let catalog = default_catalog();
        let names: Vec<_> = catalog.names().collect();
        assert_eq!(names, [ERROR_MASKING, LANGUAGE, LOGGING, METRICS]);
        assert!(catalog.source("unknown").is_err());
    }
}
