use std::{fmt, sync::Arc};

use dashmap::DashMap;
use serde_json::Value;

use crate::{Cancellation, HubError, hub::HubMethod, services::ServiceScope};

/// 连接级调用方信息，同一连接上的所有调用共享一份。
///
/// # 设计背景（Why）
/// - 过滤器常需读取连接标识与用户标识，或在连接级 `items` 中暂存跨调用的数据（例如连接建立时记录的
///   客户端版本）；
/// - `items` 使用并发映射，使不同调用任务可同时读写而无需在上下文外再包一层锁。
///
/// # 契约说明（What）
/// - 克隆为常数时间的 `Arc` 复制，所有克隆观察到同一份 `items`；
/// - `connection_id` 在连接生命周期内稳定，`user_identifier` 由鉴权层在进入管线前写入。
#[derive(Clone)]
pub struct CallerContext {
    inner: Arc<CallerInner>,
}

struct CallerInner {
    connection_id: String,
    user_identifier: Option<String>,
    items: DashMap<String, Value>,
}

impl CallerContext {
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self::with_user(connection_id, None)
    }

    pub fn with_user(connection_id: impl Into<String>, user_identifier: Option<String>) -> Self {
        Self {
            inner: Arc::new(CallerInner {
                connection_id: connection_id.into(),
                user_identifier,
                items: DashMap::new(),
            }),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.inner.connection_id
    }

    pub fn user_identifier(&self) -> Option<&str> {
        self.inner.user_identifier.as_deref()
    }

    /// 读取连接级条目的副本。
    pub fn item(&self, key: &str) -> Option<Value> {
        self.inner.items.get(key).map(|entry| entry.value().clone())
    }

    /// 写入连接级条目，返回被覆盖的旧值。
    pub fn set_item(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.inner.items.insert(key.into(), value)
    }

    pub fn remove_item(&self, key: &str) -> Option<Value> {
        self.inner.items.remove(key).map(|(_, value)| value)
    }
}

impl fmt::Debug for CallerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerContext")
            .field("connection_id", &self.inner.connection_id)
            .field("user_identifier", &self.inner.user_identifier)
            .field("items", &self.inner.items.len())
            .finish()
    }
}

/// 描述一次 Hub 方法调用的上下文。
///
/// # 教案式说明
/// - **意图（Why）**：把调用方、目标方法元数据、位置参数、作用域服务与取消令牌打包为单个值，
///   沿过滤器链逐节点移交。
/// - **逻辑（How）**：上下文按值移动，每个过滤器拿到的都是独占所有权；因此
///   [`arguments_mut`](Self::arguments_mut) 的原地修改只影响当前持有者之后的链路，
///   [`with_arguments`](Self::with_arguments) 则生成携带新参数序列的替换上下文。
/// - **契约（What）**：
///   - 参数顺序与方法签名的位置一致；
///   - `method()` 返回的元数据在服务期间不可变，可被多个调用共享；
///   - `services()` 属于本次调用，调用结束即被丢弃。
/// - **风险提示（Trade-offs）**：若过滤器需要在调用结束后保留参数，应显式克隆，而非持有上下文。
pub struct InvocationContext {
    caller: CallerContext,
    method: Arc<HubMethod>,
    arguments: Vec<Value>,
    services: ServiceScope,
    cancellation: Cancellation,
}

impl InvocationContext {
    pub fn new(
        caller: CallerContext,
        method: Arc<HubMethod>,
        arguments: Vec<Value>,
        services: ServiceScope,
        cancellation: Cancellation,
    ) -> Self {
        Self {
            caller,
            method,
            arguments,
            services,
            cancellation,
        }
    }

    pub fn caller(&self) -> &CallerContext {
        &self.caller
    }

    pub fn hub_name(&self) -> &str {
        self.method.hub()
    }

    pub fn method(&self) -> &Arc<HubMethod> {
        &self.method
    }

    pub fn method_name(&self) -> &str {
        self.method.name()
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn argument(&self, index: usize) -> Option<&Value> {
        self.arguments.get(index)
    }

    /// 原地修改参数；调用方此时独占上下文。
    pub fn arguments_mut(&mut self) -> &mut Vec<Value> {
        &mut self.arguments
    }

    /// 以新的参数序列生成替换上下文，其余字段保持不变。
    pub fn with_arguments(self, arguments: Vec<Value>) -> Self {
        Self { arguments, ..self }
    }

    /// 取出参数序列，供终端处理函数按位置解构。
    pub fn into_arguments(self) -> Vec<Value> {
        self.arguments
    }

    pub fn services(&self) -> &ServiceScope {
        &self.services
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("connection_id", &self.caller.connection_id())
            .field("hub", &self.method.hub())
            .field("method", &self.method.name())
            .field("arguments", &self.arguments.len())
            .finish()
    }
}

/// 描述一次连接级生命周期事件（连接建立或断开）的上下文。
///
/// # 契约说明（What）
/// - 连接链路中 `error()` 恒为 `None`；
/// - 断开链路中 `error()` 携带断开原因（若有），过滤器可在调用延续前通过
///   [`set_error`](Self::set_error) 或 [`with_error`](Self::with_error) 替换；
/// - 原因沿链路一直传到 Hub 的 `on_disconnected`。
pub struct LifecycleContext {
    caller: CallerContext,
    hub: Arc<str>,
    services: ServiceScope,
    cancellation: Cancellation,
    error: Option<HubError>,
}

impl LifecycleContext {
    pub fn new(
        caller: CallerContext,
        hub: Arc<str>,
        services: ServiceScope,
        cancellation: Cancellation,
    ) -> Self {
        Self {
            caller,
            hub,
            services,
            cancellation,
            error: None,
        }
    }

    pub fn caller(&self) -> &CallerContext {
        &self.caller
    }

    pub fn hub_name(&self) -> &str {
        &self.hub
    }

    pub fn services(&self) -> &ServiceScope {
        &self.services
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn error(&self) -> Option<&HubError> {
        self.error.as_ref()
    }

    pub fn set_error(&mut self, error: Option<HubError>) {
        self.error = error;
    }

    pub fn with_error(self, error: Option<HubError>) -> Self {
        Self { error, ..self }
    }

    pub fn take_error(&mut self) -> Option<HubError> {
        self.error.take()
    }
}

impl fmt::Debug for LifecycleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleContext")
            .field("connection_id", &self.caller.connection_id())
            .field("hub", &self.hub)
            .field("error", &self.error)
            .finish()
    }
}
