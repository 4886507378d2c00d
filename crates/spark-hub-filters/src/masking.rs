use async_trait::async_trait;
use serde_json::Value;
use spark_hub::{
    ActivateFilter, FilterDescriptor, HubError, HubFilter, HubResult, InvocationContext,
    InvokeNext, ServiceScope,
};

/// 错误脱敏配置。`detailed_errors = true` 时过滤器不做任何改写，适合开发环境。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ErrorMaskingConfig {
    pub detailed_errors: bool,
}

/// 把内部失败改写为通用提示的过滤器。
///
/// # 教案式说明
/// - **意图（Why）**：目标方法的失败消息可能包含连接串、堆栈等内部细节，不应直接返回给客户端。
/// - **逻辑（How）**：等待延续返回；失败既不是 [`HubError::HubException`] 也不是取消时，
///   记录原始错误并以 `"An unexpected error occurred invoking '<method>' on the server."` 替换。
/// - **契约（What）**：替换结果是 `hub.exception`，外层过滤器把它当作可展示给客户端的消息；
///   应注册在日志过滤器之内，使日志仍能看到原始失败。
#[derive(Clone, Debug)]
pub struct ErrorMaskingFilter {
    descriptor: FilterDescriptor,
    config: ErrorMaskingConfig,
}

impl ErrorMaskingFilter {
    pub fn new(config: ErrorMaskingConfig) -> Self {
        Self {
            descriptor: FilterDescriptor::new(
                "spark.hub.filters.error_masking",
                "security",
                "以通用提示替换 Hub 内部错误",
            ),
            config,
        }
    }

    pub fn masked_message(method: &str) -> String {
        format!("An unexpected error occurred invoking '{method}' on the server.")
    }
}

impl Default for ErrorMaskingFilter {
    fn default() -> Self {
        Self::new(ErrorMaskingConfig::default())
    }
}

#[async_trait]
impl HubFilter for ErrorMaskingFilter {
    fn descriptor(&self) -> FilterDescriptor {
        self.descriptor.clone()
    }

    async fn invoke_method(&self, ctx: InvocationContext, next: InvokeNext) -> HubResult<Value> {
        if self.config.detailed_errors {
            return next.run(ctx).await;
        }
        let method = ctx.method_name().to_owned();
        match next.run(ctx).await {
            Err(err) if !(err.is_hub_exception() || err.is_cancelled()) => {
                tracing::debug!(
                    method = %method,
                    code = err.code(),
                    error = %err,
                    "hub error masked before reaching the caller"
                );
                Err(HubError::hub_exception(Self::masked_message(&method)))
            }
            outcome => outcome,
        }
    }
}

impl ActivateFilter for ErrorMaskingFilter {
    fn activate(services: &ServiceScope) -> HubResult<Self> {
        let config = services
            .get::<ErrorMaskingConfig>()?
            .map(|config| *config)
            .unwrap_or_default();
        Ok(Self::new(config))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use spark_hub::{
        CallerContext, Cancellation, FilterRegistry, FilterSource, Hub, HubDefinition,
        HubPipeline, InvocationRequest, ServiceCollection, codes,
    };

    use super::*;

    fn hub() -> Arc<dyn Hub> {
        Arc::new(
            HubDefinition::new("chat")
                .with_method("Crash", |_ctx| async {
                    Err(HubError::invocation("connection string leaked"))
                })
                .with_method("Reject", |_ctx| async {
                    Err(HubError::hub_exception("room is full"))
                })
                .with_method("Ok", |_ctx| async { Ok(Value::from(1)) }),
        )
    }

    fn pipeline(services: ServiceCollection) -> HubPipeline {
        let mut registry = FilterRegistry::new();
        registry
            .add_global(FilterSource::of_type::<ErrorMaskingFilter>())
            .expect("注册应成功");
        HubPipeline::new(registry, services.build())
    }

    fn call(method: &str) -> InvocationRequest {
        InvocationRequest::new(CallerContext::new("c"), method)
    }

    #[tokio::test]
    async fn internal_failures_are_replaced() {
        let err = pipeline(ServiceCollection::new())
            .invoke(hub(), call("Crash"))
            .await
            .expect_err("失败应继续向外传播");
        assert_eq!(err.code(), codes::HUB_EXCEPTION);
        assert_eq!(
            err.to_string(),
            "An unexpected error occurred invoking 'Crash' on the server."
        );
    }

    #[tokio::test]
    async fn hub_exceptions_and_successes_pass_through() {
        let pipeline = pipeline(ServiceCollection::new());
        let err = pipeline
            .invoke(hub(), call("Reject"))
            .await
            .expect_err("业务异常应原样返回");
        assert_eq!(err.to_string(), "room is full");
        let value = pipeline.invoke(hub(), call("Ok")).await.expect("成功结果不受影响");
        assert_eq!(value, Value::from(1));
    }

    #[tokio::test]
    async fn detailed_errors_disable_masking() {
        let mut services = ServiceCollection::new();
        services.add_singleton(ErrorMaskingConfig {
            detailed_errors: true,
        });
        let err = pipeline(services)
            .invoke(hub(), call("Crash"))
            .await
            .expect_err("失败应原样传播");
        assert_eq!(err.code(), codes::INVOCATION_FAILED);
        assert!(err.to_string().contains("connection string leaked"));
    }

    #[tokio::test]
    async fn cancellation_is_not_masked() {
        let cancellation = Cancellation::new();
        cancellation.cancel();
        let err = pipeline(ServiceCollection::new())
            .invoke(hub(), call("Ok").with_cancellation(cancellation))
            .await
            .expect_err("已取消的调用应失败");
        assert!(err.is_cancelled());
    }
}
