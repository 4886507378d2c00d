#![deny(unsafe_code)]
#![doc = "spark-hub: 面向 RPC 风格 Hub 调用的有序异步过滤器管线。"]
#![doc = ""]
#![doc = "== 执行顺序契约 =="]
#![doc = "1. 全局过滤器先于 Hub 局部过滤器执行；同一层级内先注册者位于最外层。"]
#![doc = "2. 注册表在开始服务前封存，封存后再注册返回 `hub.configuration` 错误。"]
#![doc = "3. 每次调用独立构建链路，链路节点在调用完成后即被丢弃。"]

//! # 教案式概览
//! - **意图（Why）**：为 Hub 方法调用与连接生命周期事件提供可组合的拦截点，使鉴权之后的横切逻辑
//!   （日志、指标、参数清洗、错误脱敏）以统一方式装配，而不侵入 Hub 业务代码。
//! - **结构（How）**：
//!   - [`registry`]：配置期收集过滤器条目，按“全局 → 局部、注册顺序”给出有序视图；
//!   - [`resolver`]：按调用作用域将条目物化为过滤器实例；
//!   - [`next`]：由右向左折叠出单次调用的延续链；
//!   - [`pipeline`]：执行器，串联以上组件并驱动方法调用与连接/断开两条生命周期链路；
//!   - [`context`]、[`hub`]、[`services`]、[`cancellation`] 提供链路上流转的值类型与外部协作者契约。
//! - **契约（What）**：过滤器实现 [`HubFilter`]，通过 [`FilterCapabilities`] 声明参与的钩子；
//!   延续以值语义消费，因此同一链路节点最多被调用一次。
//! - **风险提示（Trade-offs）**：单例过滤器在并发调用间共享，内部可变状态需由作者自行保证线程安全。

pub mod cancellation;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod future;
pub mod hub;
pub mod next;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod services;
pub mod telemetry;

pub use async_trait::async_trait;
pub use serde_json::Value;

pub use cancellation::Cancellation;
pub use config::{FilterCatalog, HubSettings, PipelineOptions, PipelineSettings};
pub use context::{CallerContext, InvocationContext, LifecycleContext};
pub use error::{HubError, HubResult, codes};
pub use filter::{ActivateFilter, FilterCapabilities, FilterDescriptor, HubFilter};
pub use future::BoxFuture;
pub use hub::{Hub, HubDefinition, HubMethod};
pub use next::{ChainInput, InvokeNext, LifecycleNext, Next};
pub use pipeline::{CallPhase, HubPipeline, InvocationRequest};
pub use registry::{FilterEntry, FilterOrigin, FilterRegistry, FilterSource, FilterSourceKind};
pub use resolver::FilterResolver;
pub use services::{ServiceCollection, ServiceProvider, ServiceScope};
