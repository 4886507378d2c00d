use std::{borrow::Cow, fmt, ops::BitOr};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    HubResult,
    context::{InvocationContext, LifecycleContext},
    next::{InvokeNext, LifecycleNext},
    services::ServiceScope,
};

/// 描述过滤器的元数据，辅助链路诊断与日志。
///
/// # 契约说明（What）
/// - `name`：组件的稳定标识，建议使用 `vendor.component` 命名；
/// - `category`：可选分类（如 `observability`、`security`、`sanitize`）；
/// - `summary`：人类可读描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterDescriptor {
    name: Cow<'static, str>,
    category: Cow<'static, str>,
    summary: Cow<'static, str>,
}

impl FilterDescriptor {
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        category: impl Into<Cow<'static, str>>,
        summary: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            summary: summary.into(),
        }
    }

    /// 构造匿名描述，常用于测试或快速原型。
    pub fn anonymous(stage: impl Into<Cow<'static, str>>) -> Self {
        let stage = stage.into();
        Self {
            name: Cow::Owned(format!("anonymous.{stage}")),
            category: Cow::Borrowed("unspecified"),
            summary: Cow::Owned(format!("auto-generated descriptor for {stage}")),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }
}

/// 过滤器参与的钩子集合。
///
/// # 设计背景（Why）
/// - 过滤器可以只实现部分钩子（例如只关心方法调用）；执行器在构链时按声明挑选过滤器，
///   不依赖运行期“是否实现了某个方法”的探测。
///
/// # 契约说明（What）
/// - [`INVOKE`](Self::INVOKE)：参与方法调用链；
/// - [`CONNECT`](Self::CONNECT)：参与连接建立链；
/// - [`DISCONNECT`](Self::DISCONNECT)：参与连接断开链；
/// - 未声明某钩子的过滤器在对应链路中被跳过，即便其实现了该钩子。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FilterCapabilities(u8);

impl FilterCapabilities {
    pub const NONE: Self = Self(0);
    pub const INVOKE: Self = Self(1);
    pub const CONNECT: Self = Self(1 << 1);
    pub const DISCONNECT: Self = Self(1 << 2);
    pub const LIFECYCLE: Self = Self::CONNECT.union(Self::DISCONNECT);
    pub const ALL: Self = Self::INVOKE.union(Self::LIFECYCLE);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for FilterCapabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for FilterCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        if self.contains(Self::INVOKE) {
            set.entry(&"invoke");
        }
        if self.contains(Self::CONNECT) {
            set.entry(&"connect");
        }
        if self.contains(Self::DISCONNECT) {
            set.entry(&"disconnect");
        }
        set.finish()
    }
}

/// Hub 过滤器契约：包裹方法调用或连接生命周期事件的拦截逻辑。
///
/// # 契约维度速览
/// - **语义**：每个钩子接收上下文与延续 `next`。过滤器可以：
///   - 不调用 `next`，直接返回值或失败（短路，后续过滤器与目标均不执行）；
///   - 调用一次 `next`，可在调用前替换上下文、在返回后变换结果或失败。
///   `next` 以值语义消费，第二次调用无法通过编译。
/// - **错误**：目标或内层过滤器的失败以 `Err` 返回；过滤器可原样返回、替换为新错误，
///   或返回 `Ok` 值以吞掉失败，外层过滤器随后看到的是成功结果。
/// - **并发**：实例可能是单例，被并发调用共享；内部可变状态需自行保证线程安全。
/// - **取消**：调用被取消时，`next` 返回 [`HubError::Cancelled`](crate::HubError::Cancelled)，
///   过滤器可观察后继续向外返回。
///
/// # 风险提示（Trade-offs）
/// - 钩子默认实现直接调用 `next`；只覆写需要的钩子，并在 [`capabilities`](Self::capabilities)
///   中声明，否则执行器不会把过滤器放进对应链路。
#[async_trait]
pub trait HubFilter: Send + Sync + 'static {
    /// 返回组件元数据。
    fn descriptor(&self) -> FilterDescriptor;

    /// 声明参与的钩子，默认只参与方法调用。
    fn capabilities(&self) -> FilterCapabilities {
        FilterCapabilities::INVOKE
    }

    async fn invoke_method(&self, ctx: InvocationContext, next: InvokeNext) -> HubResult<Value> {
        next.run(ctx).await
    }

    async fn on_connected(&self, ctx: LifecycleContext, next: LifecycleNext) -> HubResult<()> {
        next.run(ctx).await
    }

    /// 断开钩子；断开原因位于 `ctx.error()`，可在调用 `next` 前替换。
    async fn on_disconnected(&self, ctx: LifecycleContext, next: LifecycleNext) -> HubResult<()> {
        next.run(ctx).await
    }
}

/// 以类型方式注册的过滤器如何在调用作用域中被构造。
///
/// # 契约说明（What）
/// - 执行器优先在作用域服务中查找该类型；未注册时调用 `activate`；
/// - `activate` 通过 `services.require::<Dep>()?` 获取构造依赖，缺失依赖即返回
///   `hub.service_resolution`，调用在任何过滤器运行前终止；
/// - 每次调用都会重新激活，不在调用间缓存；
/// - [`CAPABILITIES`](Self::CAPABILITIES) 须与实例的 [`HubFilter::capabilities`] 一致，执行器据此
///   在构造前排除不参与当前钩子的类型，未参与的钩子不会触发激活。
pub trait ActivateFilter: HubFilter + Sized {
    /// 类型级能力声明，默认只参与方法调用。
    const CAPABILITIES: FilterCapabilities = FilterCapabilities::INVOKE;

    fn activate(services: &ServiceScope) -> HubResult<Self>;
}
