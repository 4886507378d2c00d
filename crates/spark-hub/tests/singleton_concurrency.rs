//! 单例过滤器在并发调用下的共享语义。

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use futures::future::join_all;
use spark_hub::{
    CallerContext, FilterDescriptor, FilterRegistry, FilterSource, Hub, HubDefinition, HubFilter,
    HubPipeline, HubResult, InvocationContext, InvocationRequest, InvokeNext, ServiceCollection,
    Value, async_trait,
};

#[derive(Default)]
struct Counter {
    calls: AtomicUsize,
}

#[async_trait]
impl HubFilter for Counter {
    fn descriptor(&self) -> FilterDescriptor {
        FilterDescriptor::new("test.counter", "observability", "counts invocations")
    }

    async fn invoke_method(&self, ctx: InvocationContext, next: InvokeNext) -> HubResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        next.run(ctx).await
    }
}

fn echo_hub() -> Arc<dyn Hub> {
    Arc::new(HubDefinition::new("chat").with_method("Echo", |ctx| async move {
        tokio::task::yield_now().await;
        Ok(ctx.argument(0).cloned().unwrap_or(Value::Null))
    }))
}

async fn run_concurrently(pipeline: HubPipeline, calls: usize) {
    let hub = echo_hub();
    let handles = (0..calls).map(|index| {
        let pipeline = pipeline.clone();
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            let request = InvocationRequest::new(CallerContext::new(format!("conn-{index}")), "Echo")
                .with_argument(Value::from(index));
            pipeline.invoke(hub, request).await
        })
    });
    for (index, outcome) in join_all(handles).await.into_iter().enumerate() {
        let value = outcome.expect("任务不应 panic").expect("调用应成功");
        assert_eq!(value, Value::from(index));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_instance_counts_every_concurrent_call() {
    let counter = Arc::new(Counter::default());
    let mut registry = FilterRegistry::new();
    registry
        .add_global(FilterSource::shared(counter.clone()))
        .expect("注册应成功");
    let pipeline = HubPipeline::new(registry, ServiceCollection::new().build());

    run_concurrently(pipeline, 100).await;
    assert_eq!(counter.calls.load(Ordering::SeqCst), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn singleton_registered_in_services_is_shared_by_type_source() {
    let counter = Arc::new(Counter::default());
    let mut services = ServiceCollection::new();
    services.add_singleton_arc(Arc::clone(&counter));
    let mut registry = FilterRegistry::new();
    registry
        .add_global(FilterSource::from_services::<Counter>())
        .expect("注册应成功");
    let pipeline = HubPipeline::new(registry, services.build());

    run_concurrently(pipeline, 100).await;
    assert_eq!(counter.calls.load(Ordering::SeqCst), 100);
}
