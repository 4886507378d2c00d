//! Hub 目标契约：方法元数据查找与终端调用。

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    future::Future,
    sync::Arc,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    BoxFuture, HubError, HubResult,
    context::{InvocationContext, LifecycleContext},
};

/// Hub 方法的元数据，包括声明式标记。
///
/// # 契约说明（What）
/// - `markers` 对管线本身不透明，仅供个别过滤器读取，例如语言过滤器通过
///   `language_filter.argument` 得到需要清洗的参数下标；
/// - 实例在服务期间不可变，以 `Arc` 在调用间共享。
#[derive(Clone, Debug, PartialEq)]
pub struct HubMethod {
    hub: String,
    name: String,
    markers: BTreeMap<String, Value>,
}

impl HubMethod {
    pub fn new(hub: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            hub: hub.into(),
            name: name.into(),
            markers: BTreeMap::new(),
        }
    }

    pub fn with_marker(mut self, key: impl Into<String>, value: Value) -> Self {
        self.markers.insert(key.into(), value);
        self
    }

    pub fn hub(&self) -> &str {
        &self.hub
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn marker(&self, key: &str) -> Option<&Value> {
        self.markers.get(key)
    }

    pub fn markers(&self) -> &BTreeMap<String, Value> {
        &self.markers
    }
}

/// 过滤器链的终端：真正执行方法与生命周期回调的 Hub。
///
/// # 教案式说明
/// - **意图（Why）**：方法分派属于外部 Hub 层，管线只需要一个“给定上下文、返回值或失败”的入口，
///   以及在构链前查询方法元数据的能力。
/// - **契约（What）**：
///   - [`method`](Self::method) 返回 `None` 时执行器以 `hub.method_not_found` 拒绝调用，不进入任何过滤器；
///   - [`invoke`](Self::invoke) 接收链路最终的上下文（可能已被过滤器替换参数）；
///   - 生命周期回调默认无操作。
/// - **并发（Concurrency）**：同一 Hub 实例会被并发调用，实现需保证 `Send + Sync`。
#[async_trait]
pub trait Hub: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn method(&self, name: &str) -> Option<Arc<HubMethod>>;

    async fn invoke(&self, ctx: InvocationContext) -> HubResult<Value>;

    async fn on_connected(&self, _ctx: LifecycleContext) -> HubResult<()> {
        Ok(())
    }

    async fn on_disconnected(&self, _ctx: LifecycleContext) -> HubResult<()> {
        Ok(())
    }
}

type MethodHandler = Arc<dyn Fn(InvocationContext) -> BoxFuture<'static, HubResult<Value>> + Send + Sync>;
type LifecycleHandler =
    Arc<dyn Fn(LifecycleContext) -> BoxFuture<'static, HubResult<()>> + Send + Sync>;

/// 以闭包表定义的 Hub，适用于宿主装配与测试。
///
/// # 使用方式（How）
/// ```rust
/// use spark_hub::{HubDefinition, Value};
///
/// let hub = HubDefinition::new("chat").with_method("Echo", |ctx| async move {
///     Ok(ctx.argument(0).cloned().unwrap_or(Value::Null))
/// });
/// # let _ = hub;
/// ```
pub struct HubDefinition {
    name: String,
    methods: HashMap<String, (Arc<HubMethod>, MethodHandler)>,
    on_connected: Option<LifecycleHandler>,
    on_disconnected: Option<LifecycleHandler>,
}

impl HubDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
            on_connected: None,
            on_disconnected: None,
        }
    }

    /// 注册不带标记的方法。
    pub fn with_method<F, Fut>(self, name: &str, handler: F) -> Self
    where
        F: Fn(InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HubResult<Value>> + Send + 'static,
    {
        self.with_marked_method(name, Vec::<(String, Value)>::new(), handler)
    }

    /// 注册带声明式标记的方法；同名方法以后注册者为准。
    pub fn with_marked_method<F, Fut, K>(
        mut self,
        name: &str,
        markers: impl IntoIterator<Item = (K, Value)>,
        handler: F,
    ) -> Self
    where
        F: Fn(InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HubResult<Value>> + Send + 'static,
        K: Into<String>,
    {
        let descriptor = markers
            .into_iter()
            .fold(HubMethod::new(self.name.clone(), name), |method, (key, value)| {
                method.with_marker(key, value)
            });
        let handler: MethodHandler =
            Arc::new(move |ctx| -> BoxFuture<'static, HubResult<Value>> { Box::pin(handler(ctx)) });
        self.methods
            .insert(name.to_owned(), (Arc::new(descriptor), handler));
        self
    }

    pub fn with_connected<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(LifecycleContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HubResult<()>> + Send + 'static,
    {
        self.on_connected = Some(Arc::new(
            move |ctx| -> BoxFuture<'static, HubResult<()>> { Box::pin(handler(ctx)) },
        ));
        self
    }

    pub fn with_disconnected<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(LifecycleContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HubResult<()>> + Send + 'static,
    {
        self.on_disconnected = Some(Arc::new(
            move |ctx| -> BoxFuture<'static, HubResult<()>> { Box::pin(handler(ctx)) },
        ));
        self
    }
}

impl fmt::Debug for HubDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("HubDefinition")
            .field("name", &self.name)
            .field("methods", &methods)
            .finish()
    }
}

#[async_trait]
impl Hub for HubDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn method(&self, name: &str) -> Option<Arc<HubMethod>> {
        self.methods
            .get(name)
            .map(|(descriptor, _)| Arc::clone(descriptor))
    }

    async fn invoke(&self, ctx: InvocationContext) -> HubResult<Value> {
        let handler = match self.methods.get(ctx.method_name()) {
            Some((_, handler)) => Arc::clone(handler),
            None => return Err(HubError::method_not_found(&self.name, ctx.method_name())),
        };
        handler(ctx).await
    }

    async fn on_connected(&self, ctx: LifecycleContext) -> HubResult<()> {
        match &self.on_connected {
            Some(handler) => handler(ctx).await,
            None => Ok(()),
        }
    }

    async fn on_disconnected(&self, ctx: LifecycleContext) -> HubResult<()> {
        match &self.on_disconnected {
            Some(handler) => handler(ctx).await,
            None => Ok(()),
        }
    }
}
