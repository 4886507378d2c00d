use std::{future::Future, pin::Pin};

/// `BoxFuture` 是过滤器链与 Hub 处理函数共用的对象安全 Future 包装。
///
/// # 契约说明（What）
/// - 约束 Future 为 `Send + 'a`，可安全跨线程调度；
/// - 链路节点以 `'static` 实例化，节点持有的过滤器与 Hub 均经 `Arc` 共享。
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
