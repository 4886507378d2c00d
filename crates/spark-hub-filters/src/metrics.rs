use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use spark_hub::{
    FilterCapabilities, FilterDescriptor, HubFilter, HubResult, InvocationContext, InvokeNext,
    LifecycleContext, LifecycleNext,
};

/// 单个方法的计数。
#[derive(Debug, Default)]
struct MethodCounters {
    calls: AtomicU64,
    failures: AtomicU64,
}

/// 单个方法的计数快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MethodSnapshot {
    pub calls: u64,
    pub failures: u64,
}

/// [`MetricsFilter`] 在某一时刻的计数快照。
///
/// `methods` 以 `hub.method` 为键，按字典序排列。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub invocations: u64,
    pub failures: u64,
    pub cancellations: u64,
    pub connections: u64,
    pub disconnections: u64,
    pub methods: BTreeMap<String, MethodSnapshot>,
}

/// 以单例共享的计数过滤器。
///
/// # 教案式说明
/// - **意图（Why）**：给宿主一个无需外部指标后端即可读取的调用统计入口。
/// - **逻辑（How）**：进程级计数使用原子量，按方法的计数放在 `DashMap` 中；
///   取消不计入失败，短路返回的成功值与目标返回的成功值同样计为成功调用。
/// - **契约（What）**：实例应以 [`FilterSource::shared`](spark_hub::FilterSource::shared) 或单例服务注册，
///   否则每次调用得到新实例，计数失去意义；[`snapshot`](Self::snapshot) 不保证各计数之间的原子一致性。
#[derive(Debug)]
pub struct MetricsFilter {
    descriptor: FilterDescriptor,
    invocations: AtomicU64,
    failures: AtomicU64,
    cancellations: AtomicU64,
    connections: AtomicU64,
    disconnections: AtomicU64,
    methods: DashMap<String, MethodCounters>,
}

impl Default for MetricsFilter {
    fn default() -> Self {
        Self::new(FilterDescriptor::new(
            "spark.hub.filters.metrics",
            "observability",
            "统计 Hub 方法调用与连接事件次数",
        ))
    }
}

impl MetricsFilter {
    pub fn new(descriptor: FilterDescriptor) -> Self {
        Self {
            descriptor,
            invocations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            cancellations: AtomicU64::new(0),
            connections: AtomicU64::new(0),
            disconnections: AtomicU64::new(0),
            methods: DashMap::new(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let methods = self
            .methods
            .iter()
            .map(|entry| {
                let counters = entry.value();
                (
                    entry.key().clone(),
                    MethodSnapshot {
                        calls: counters.calls.load(Ordering::Relaxed),
                        failures: counters.failures.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        MetricsSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            disconnections: self.disconnections.load(Ordering::Relaxed),
            methods,
        }
    }

    fn record_method(&self, key: String, failed: bool) {
        let counters = self.methods.entry(key).or_default();
        counters.calls.fetch_add(1, Ordering::Relaxed);
        if failed {
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl HubFilter for MetricsFilter {
    fn descriptor(&self) -> FilterDescriptor {
        self.descriptor.clone()
    }

    fn capabilities(&self) -> FilterCapabilities {
        FilterCapabilities::ALL
    }

    async fn invoke_method(&self, ctx: InvocationContext, next: InvokeNext) -> HubResult<Value> {
        let key = format!("{}.{}", ctx.hub_name(), ctx.method_name());
        self.invocations.fetch_add(1, Ordering::Relaxed);
        let outcome = next.run(ctx).await;
        let failed = match &outcome {
            Ok(_) => false,
            Err(err) if err.is_cancelled() => {
                self.cancellations.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                true
            }
        };
        self.record_method(key, failed);
        outcome
    }

    async fn on_connected(&self, ctx: LifecycleContext, next: LifecycleNext) -> HubResult<()> {
        self.connections.fetch_add(1, Ordering::Relaxed);
        next.run(ctx).await
    }

    async fn on_disconnected(&self, ctx: LifecycleContext, next: LifecycleNext) -> HubResult<()> {
        self.disconnections.fetch_add(1, Ordering::Relaxed);
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use spark_hub::{
        CallerContext, Cancellation, FilterRegistry, FilterSource, HubDefinition, HubError,
        HubPipeline, InvocationRequest, ServiceProvider,
    };

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn counts_calls_failures_and_lifecycle_events() {
        let metrics = Arc::new(MetricsFilter::default());
        let mut registry = FilterRegistry::new();
        registry
            .add_global(FilterSource::shared(metrics.clone()))
            .expect("注册应成功");
        let pipeline = HubPipeline::new(registry, ServiceProvider::default());
        let hub = Arc::new(
            HubDefinition::new("chat")
                .with_method("Ok", |_ctx| async { Ok(Value::Null) })
                .with_method("Fail", |_ctx| async { Err(HubError::invocation("nope")) }),
        );

        let mut tasks = Vec::new();
        for index in 0..20 {
            let pipeline = pipeline.clone();
            let hub = Arc::clone(&hub);
            let method = if index % 4 == 0 { "Fail" } else { "Ok" };
            tasks.push(tokio::spawn(async move {
                pipeline
                    .invoke(hub, InvocationRequest::new(CallerContext::new("c"), method))
                    .await
            }));
        }
        for task in tasks {
            let _ = task.await.expect("任务不应 panic");
        }
        pipeline
            .on_connected(hub.clone(), CallerContext::new("c"), Cancellation::new())
            .await
            .expect("连接通知应成功");
        pipeline
            .on_disconnected(hub, CallerContext::new("c"), None, Cancellation::new())
            .await
            .expect("断开通知应成功");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.invocations, 20);
        assert_eq!(snapshot.failures, 5);
        assert_eq!(snapshot.cancellations, 0);
        assert_eq!(snapshot.connections, 1);
        assert_eq!(snapshot.disconnections, 1);
        assert_eq!(
            snapshot.methods.get("chat.Ok"),
            Some(&MethodSnapshot {
                calls: 15,
                failures: 0
            })
        );
        assert_eq!(
            snapshot.methods.get("chat.Fail"),
            Some(&MethodSnapshot {
                calls: 5,
                failures: 5
            })
        );
    }
}
