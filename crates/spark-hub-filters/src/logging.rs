use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use spark_hub::{
    FilterCapabilities, FilterDescriptor, HubFilter, HubResult, InvocationContext, InvokeNext,
    LifecycleContext, LifecycleNext,
};
use tracing::Level;

/// `tracing` 宏要求级别为常量，此处按运行期配置分派到对应宏。
macro_rules! emit {
    ($level:expr, $($arg:tt)+) => {{
        let level: Level = $level;
        if level == Level::TRACE {
            tracing::trace!($($arg)+);
        } else if level == Level::DEBUG {
            tracing::debug!($($arg)+);
        } else if level == Level::INFO {
            tracing::info!($($arg)+);
        } else if level == Level::WARN {
            tracing::warn!($($arg)+);
        } else {
            tracing::error!($($arg)+);
        }
    }};
}

/// 日志过滤器配置。
///
/// # 教案式说明
/// - **意图（Why）**：不同 Hub 对日志量的容忍度不同，级别外部化后过滤器本身保持无状态。
/// - **契约（What）**：
///   - `descriptor`：遵循 `vendor.component` 命名惯例；
///   - `level`：调用开始、完成与生命周期事件的输出级别；失败固定以 `warn` 输出，取消以 `level` 输出。
/// - **风险提示（Trade-offs）**：高频 Hub 使用 `INFO` 可能造成日志风暴，可调低到 `DEBUG` 后再由
///   `EnvFilter` 控制。
#[derive(Clone, Debug)]
pub struct LoggingFilterConfig {
    pub descriptor: FilterDescriptor,
    pub level: Level,
}

impl Default for LoggingFilterConfig {
    fn default() -> Self {
        Self {
            descriptor: FilterDescriptor::new(
                "spark.hub.filters.logging",
                "observability",
                "记录 Hub 方法调用与连接生命周期的结构化日志",
            ),
            level: Level::INFO,
        }
    }
}

/// 记录调用与生命周期事件的过滤器，所有结果原样返回。
#[derive(Clone, Debug, Default)]
pub struct LoggingFilter {
    config: LoggingFilterConfig,
}

impl LoggingFilter {
    pub fn new(config: LoggingFilterConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl HubFilter for LoggingFilter {
    fn descriptor(&self) -> FilterDescriptor {
        self.config.descriptor.clone()
    }

    fn capabilities(&self) -> FilterCapabilities {
        FilterCapabilities::ALL
    }

    async fn invoke_method(&self, ctx: InvocationContext, next: InvokeNext) -> HubResult<Value> {
        let hub = ctx.hub_name().to_owned();
        let method = ctx.method_name().to_owned();
        let connection = ctx.caller().connection_id().to_owned();
        emit!(
            self.config.level,
            hub = %hub,
            method = %method,
            connection = %connection,
            arguments = ctx.arguments().len(),
            "hub method invoking"
        );

        let started = Instant::now();
        let outcome = next.run(ctx).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &outcome {
            Ok(_) => emit!(
                self.config.level,
                hub = %hub,
                method = %method,
                elapsed_ms,
                "hub method completed"
            ),
            Err(err) if err.is_cancelled() => emit!(
                self.config.level,
                hub = %hub,
                method = %method,
                elapsed_ms,
                "hub method cancelled"
            ),
            Err(err) => tracing::warn!(
                hub = %hub,
                method = %method,
                connection = %connection,
                code = err.code(),
                error = %err,
                elapsed_ms,
                "hub method failed"
            ),
        }
        outcome
    }

    async fn on_connected(&self, ctx: LifecycleContext, next: LifecycleNext) -> HubResult<()> {
        emit!(
            self.config.level,
            hub = ctx.hub_name(),
            connection = ctx.caller().connection_id(),
            user = ctx.caller().user_identifier().unwrap_or("anonymous"),
            "hub connection established"
        );
        next.run(ctx).await
    }

    async fn on_disconnected(&self, ctx: LifecycleContext, next: LifecycleNext) -> HubResult<()> {
        match ctx.error() {
            None => emit!(
                self.config.level,
                hub = ctx.hub_name(),
                connection = ctx.caller().connection_id(),
                "hub connection closed"
            ),
            Some(err) => emit!(
                self.config.level,
                hub = ctx.hub_name(),
                connection = ctx.caller().connection_id(),
                code = err.code(),
                error = %err,
                "hub connection closed with error"
            ),
        }
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use spark_hub::{
        CallerContext, Cancellation, FilterRegistry, FilterSource, Hub, HubDefinition, HubError,
        HubPipeline, InvocationRequest, ServiceProvider,
    };
    use tracing_test::traced_test;

    use super::*;

    fn pipeline(level: Level) -> HubPipeline {
        let mut registry = FilterRegistry::new();
        registry
            .add_global(FilterSource::instance(LoggingFilter::new(LoggingFilterConfig {
                level,
                ..LoggingFilterConfig::default()
            })))
            .expect("注册应成功");
        HubPipeline::new(registry, ServiceProvider::default())
    }

    fn hub() -> Arc<dyn Hub> {
        Arc::new(
            HubDefinition::new("chat")
                .with_method("Echo", |ctx| async move {
                    Ok(ctx.argument(0).cloned().unwrap_or(Value::Null))
                })
                .with_method("Fail", |_ctx| async {
                    Err(HubError::invocation("database offline"))
                }),
        )
    }

    #[tokio::test]
    #[traced_test]
    async fn logs_successful_invocation() {
        let value = pipeline(Level::INFO)
            .invoke(
                hub(),
                InvocationRequest::new(CallerContext::new("conn-1"), "Echo").with_argument(json!("hi")),
            )
            .await
            .expect("调用应成功");
        assert_eq!(value, json!("hi"));
        assert!(logs_contain("hub method invoking"));
        assert!(logs_contain("hub method completed"));
        assert!(logs_contain("method=Echo"));
    }

    #[tokio::test]
    #[traced_test]
    async fn failures_are_logged_and_rethrown_unchanged() {
        let err = pipeline(Level::DEBUG)
            .invoke(hub(), InvocationRequest::new(CallerContext::new("conn-2"), "Fail"))
            .await
            .expect_err("失败应原样传播");
        assert_eq!(err.code(), spark_hub::codes::INVOCATION_FAILED);
        assert_eq!(err.to_string(), "hub invocation failed: database offline");
        assert!(logs_contain("hub method failed"));
        assert!(logs_contain("database offline"));
    }

    #[tokio::test]
    #[traced_test]
    async fn lifecycle_events_are_logged() {
        let pipeline = pipeline(Level::INFO);
        pipeline
            .on_connected(hub(), CallerContext::new("conn-3"), Cancellation::new())
            .await
            .expect("连接通知应成功");
        pipeline
            .on_disconnected(
                hub(),
                CallerContext::new("conn-3"),
                Some(HubError::invocation("transport reset")),
                Cancellation::new(),
            )
            .await
            .expect("断开通知应成功");
        assert!(logs_contain("hub connection established"));
        assert!(logs_contain("hub connection closed with error"));
        assert!(logs_contain("transport reset"));
    }
}
