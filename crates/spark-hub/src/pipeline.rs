//! 管线执行器：为单次调用或生命周期事件构建并驱动过滤器链。
//!
//! # 教案式说明
//! - **意图（Why）**：把“查方法、建作用域、解析过滤器、折叠延续、运行”这一固定流程收敛到一处，
//!   宿主的 Hub 分发层只需调用 [`HubPipeline::invoke`] 或两个生命周期入口。
//! - **逻辑（How）**：
//!   1. 查询方法元数据，未知方法以 `hub.method_not_found` 拒绝；
//!   2. 调用已被取消时直接返回 `hub.cancelled`；
//!   3. 为本次调用创建 [`ServiceScope`]，取出有序条目并按钩子能力解析；
//!   4. 以 Hub 终端为起点由右向左折叠，得到最外层延续并运行。
//! - **契约（What）**：
//!   - 步骤 1 至 3 的失败发生在任何过滤器或目标执行之前；
//!   - 链路节点与作用域在调用返回时被丢弃，执行器不缓存逐次构造的过滤器实例；
//!   - 各阶段以 [`CallPhase`] 名称写入 `debug` 事件，慢调用输出 `warn` 事件。
//! - **风险提示（Trade-offs）**：每次调用都会重新解析过滤器；单例来源的解析只是一次 `Arc` 复制，
//!   按类型激活的过滤器则每次构造新实例。

use std::{sync::Arc, time::Instant};

use serde_json::Value;
use tracing::Instrument;

use crate::{
    BoxFuture, Cancellation, HubError, HubResult,
    config::PipelineOptions,
    context::{CallerContext, InvocationContext, LifecycleContext},
    filter::{FilterCapabilities, HubFilter},
    hub::Hub,
    next::{InvokeNext, LifecycleNext},
    registry::FilterRegistry,
    resolver::FilterResolver,
    services::{ServiceProvider, ServiceScope},
};

/// 单次调用所处阶段，仅用于日志。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallPhase {
    Built,
    Running,
    Succeeded,
    Failed,
}

impl CallPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Built => "built",
            Self::Running => "running",
            Self::Succeeded => "completed.success",
            Self::Failed => "completed.failure",
        }
    }
}

/// 进入管线的一次方法调用请求，由传输层在鉴权之后构造。
#[derive(Clone, Debug)]
pub struct InvocationRequest {
    caller: CallerContext,
    method: String,
    arguments: Vec<Value>,
    cancellation: Cancellation,
}

impl InvocationRequest {
    pub fn new(caller: CallerContext, method: impl Into<String>) -> Self {
        Self {
            caller,
            method: method.into(),
            arguments: Vec::new(),
            cancellation: Cancellation::new(),
        }
    }

    pub fn with_arguments(mut self, arguments: impl IntoIterator<Item = Value>) -> Self {
        self.arguments = arguments.into_iter().collect();
        self
    }

    pub fn with_argument(mut self, argument: Value) -> Self {
        self.arguments.push(argument);
        self
    }

    /// 绑定调用的取消令牌；宿主保留其克隆以便在连接断开时触发。
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn caller(&self) -> &CallerContext {
        &self.caller
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }
}

#[derive(Clone, Copy, Debug)]
enum LifecycleHook {
    Connected,
    Disconnected,
}

impl LifecycleHook {
    fn capability(self) -> FilterCapabilities {
        match self {
            Self::Connected => FilterCapabilities::CONNECT,
            Self::Disconnected => FilterCapabilities::DISCONNECT,
        }
    }
}

/// Hub 过滤器管线。
///
/// 构造时封存注册表；克隆只复制 `Arc`，可在多个任务间共享同一管线。
#[derive(Clone, Debug)]
pub struct HubPipeline {
    registry: Arc<FilterRegistry>,
    services: ServiceProvider,
    options: PipelineOptions,
}

impl HubPipeline {
    pub fn new(mut registry: FilterRegistry, services: ServiceProvider) -> Self {
        registry.seal();
        Self {
            registry: Arc::new(registry),
            services,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// 经过滤器链调用 Hub 方法。
    pub async fn invoke(&self, hub: Arc<dyn Hub>, request: InvocationRequest) -> HubResult<Value> {
        let span = tracing::debug_span!(
            "hub.invoke",
            hub = hub.name(),
            method = %request.method,
            connection = request.caller.connection_id(),
        );
        self.invoke_inner(hub, request).instrument(span).await
    }

    /// 经过滤器链通知 Hub 连接建立。
    pub async fn on_connected(
        &self,
        hub: Arc<dyn Hub>,
        caller: CallerContext,
        cancellation: Cancellation,
    ) -> HubResult<()> {
        let span = tracing::debug_span!(
            "hub.connect",
            hub = hub.name(),
            connection = caller.connection_id(),
        );
        self.lifecycle(hub, caller, None, cancellation, LifecycleHook::Connected)
            .instrument(span)
            .await
    }

    /// 经过滤器链通知 Hub 连接断开；`error` 为断开原因，过滤器可沿链路替换。
    pub async fn on_disconnected(
        &self,
        hub: Arc<dyn Hub>,
        caller: CallerContext,
        error: Option<HubError>,
        cancellation: Cancellation,
    ) -> HubResult<()> {
        let span = tracing::debug_span!(
            "hub.disconnect",
            hub = hub.name(),
            connection = caller.connection_id(),
            reason = error.as_ref().map(HubError::code).unwrap_or("none"),
        );
        self.lifecycle(hub, caller, error, cancellation, LifecycleHook::Disconnected)
            .instrument(span)
            .await
    }

    async fn invoke_inner(&self, hub: Arc<dyn Hub>, request: InvocationRequest) -> HubResult<Value> {
        let InvocationRequest {
            caller,
            method,
            arguments,
            cancellation,
        } = request;

        let Some(descriptor) = hub.method(&method) else {
            tracing::debug!(method = %method, "hub method not found");
            return Err(HubError::method_not_found(hub.name(), method));
        };
        if cancellation.is_cancelled() {
            return Err(HubError::Cancelled);
        }

        let scope = self.services.create_scope();
        let filters = self.resolve(hub.name(), &scope, FilterCapabilities::INVOKE)?;
        let ctx = InvocationContext::new(caller, descriptor, arguments, scope, cancellation);
        let chain = invoke_chain(hub, filters);
        tracing::debug!(
            phase = CallPhase::Built.as_str(),
            filters = chain.remaining(),
            "hub call chain built"
        );

        let started = Instant::now();
        tracing::debug!(phase = CallPhase::Running.as_str(), "hub call running");
        let outcome = chain.run(ctx).await;
        self.finish(started, outcome.as_ref().err());
        outcome
    }

    async fn lifecycle(
        &self,
        hub: Arc<dyn Hub>,
        caller: CallerContext,
        error: Option<HubError>,
        cancellation: Cancellation,
        hook: LifecycleHook,
    ) -> HubResult<()> {
        if cancellation.is_cancelled() {
            return Err(HubError::Cancelled);
        }

        let scope = self.services.create_scope();
        let filters = self.resolve(hub.name(), &scope, hook.capability())?;
        let ctx = LifecycleContext::new(caller, Arc::from(hub.name()), scope, cancellation)
            .with_error(error);
        let chain = lifecycle_chain(hub, filters, hook);
        tracing::debug!(
            phase = CallPhase::Built.as_str(),
            filters = chain.remaining(),
            "hub lifecycle chain built"
        );

        let started = Instant::now();
        let outcome = chain.run(ctx).await;
        self.finish(started, outcome.as_ref().err());
        outcome
    }

    fn resolve(
        &self,
        hub: &str,
        scope: &ServiceScope,
        hook: FilterCapabilities,
    ) -> HubResult<Vec<Arc<dyn HubFilter>>> {
        let entries = self.registry.ordered_entries(hub);
        FilterResolver::resolve(&entries, scope, hook)
    }

    fn finish(&self, started: Instant, failure: Option<&HubError>) {
        let elapsed = started.elapsed();
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        match failure {
            None => tracing::debug!(
                phase = CallPhase::Succeeded.as_str(),
                elapsed_ms,
                "hub call completed"
            ),
            Some(error) => tracing::debug!(
                phase = CallPhase::Failed.as_str(),
                code = error.code(),
                elapsed_ms,
                "hub call completed"
            ),
        }
        if let Some(threshold) = self.options.slow_call_threshold()
            && elapsed > threshold
        {
            tracing::warn!(
                elapsed_ms,
                threshold_ms = u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX),
                "slow hub call"
            );
        }
    }
}

fn invoke_chain(hub: Arc<dyn Hub>, filters: Vec<Arc<dyn HubFilter>>) -> InvokeNext {
    let terminal = InvokeNext::terminal(move |ctx| -> BoxFuture<'static, HubResult<Value>> {
        Box::pin(async move { hub.invoke(ctx).await })
    });
    filters.into_iter().rev().fold(terminal, |next, filter| {
        next.wrap(move |ctx, next| -> BoxFuture<'static, HubResult<Value>> {
            Box::pin(async move { filter.invoke_method(ctx, next).await })
        })
    })
}

fn lifecycle_chain(
    hub: Arc<dyn Hub>,
    filters: Vec<Arc<dyn HubFilter>>,
    hook: LifecycleHook,
) -> LifecycleNext {
    let terminal = LifecycleNext::terminal(move |ctx| -> BoxFuture<'static, HubResult<()>> {
        Box::pin(async move {
            match hook {
                LifecycleHook::Connected => hub.on_connected(ctx).await,
                LifecycleHook::Disconnected => hub.on_disconnected(ctx).await,
            }
        })
    });
    filters.into_iter().rev().fold(terminal, |next, filter| {
        next.wrap(move |ctx, next| -> BoxFuture<'static, HubResult<()>> {
            Box::pin(async move {
                match hook {
                    LifecycleHook::Connected => filter.on_connected(ctx, next).await,
                    LifecycleHook::Disconnected => filter.on_disconnected(ctx, next).await,
                }
            })
        })
    })
}
