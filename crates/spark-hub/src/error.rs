//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为过滤器管线对外暴露的失败语义提供集中定义：配置期错误、服务解析失败、调用失败与取消；
//! - 每个变体映射到稳定错误码，日志与上层协议可据此分类，而无需解析消息文本。
//!
//! ## 设计要求（What）
//! - 错误类型派生 `thiserror::Error`，与 `std::error::Error` 生态兼容；
//! - 错误实现 `Clone`：断开链路需要把同一个失败原因交给多个过滤器观察，底层原因以 `Arc` 共享；
//! - 配置与解析错误发生在任何过滤器或目标执行之前，调用失败则沿已进入的过滤器向外传播。

use std::{borrow::Cow, sync::Arc};

use thiserror::Error;

/// 稳定错误码集合，遵循 `<域>.<语义>` 命名。
pub mod codes {
    /// 封存后注册、配置文件非法或引用了未知过滤器。
    pub const CONFIGURATION: &str = "hub.configuration";
    /// 作用域服务或过滤器实例无法解析。
    pub const SERVICE_RESOLUTION: &str = "hub.service_resolution";
    /// Hub 上不存在目标方法。
    pub const METHOD_NOT_FOUND: &str = "hub.method_not_found";
    /// 面向调用方的业务异常，消息可直接展示给客户端。
    pub const HUB_EXCEPTION: &str = "hub.exception";
    /// 目标方法或过滤器在调用过程中失败。
    pub const INVOCATION_FAILED: &str = "hub.invocation_failed";
    /// 调用被调用方或传输层取消。
    pub const CANCELLED: &str = "hub.cancelled";
}

/// `ErrorCause` 封装底层原因，保持 `Send + Sync` 并以 `Arc` 共享。
pub type ErrorCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// 管线统一返回值别名。
pub type HubResult<T> = Result<T, HubError>;

/// Hub 过滤器管线的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：聚合注册、解析、调用、取消四类失败路径，调用方只需面对一个错误类型；
///   过滤器可以据此决定观察、替换或以返回值吞掉失败。
/// - **契约 (What)**：
///   - [`HubError::Configuration`] 与 [`HubError::ServiceResolution`] 在任何用户代码运行前终止调用；
///   - [`HubError::Invocation`] 携带原始原因，经 `source()` 可追溯；
///   - [`HubError::HubException`] 的消息被视为可以安全展示给客户端；
///   - [`HubError::Cancelled`] 不是业务错误，只表示链路被中止。
/// - **设计权衡 (Trade-offs)**：上下文使用 `String` 保存，牺牲少量堆分配换取可读性。
#[derive(Clone, Debug, Error)]
pub enum HubError {
    /// 配置阶段被拒绝，例如注册表封存后继续注册。
    #[error("hub pipeline configuration rejected: {detail}")]
    Configuration { detail: String },

    /// 服务或过滤器实例解析失败。
    ///
    /// - **契约 (What)**：`service` 为目标类型名或注册标签；`detail` 描述缺失的依赖。
    #[error("failed to resolve `{service}`: {detail}")]
    ServiceResolution {
        service: Cow<'static, str>,
        detail: String,
    },

    /// Hub 未声明该方法。
    #[error("method `{method}` does not exist on hub `{hub}`")]
    MethodNotFound { hub: String, method: String },

    /// 面向调用方的业务异常。
    #[error("{message}")]
    HubException { message: String },

    /// 目标方法或过滤器抛出的调用失败。
    #[error("hub invocation failed: {message}")]
    Invocation {
        message: String,
        #[source]
        cause: Option<ErrorCause>,
    },

    /// 调用被取消。
    #[error("hub call was cancelled")]
    Cancelled,
}

impl HubError {
    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::Configuration {
            detail: detail.into(),
        }
    }

    pub fn service_resolution(
        service: impl Into<Cow<'static, str>>,
        detail: impl Into<String>,
    ) -> Self {
        Self::ServiceResolution {
            service: service.into(),
            detail: detail.into(),
        }
    }

    pub fn method_not_found(hub: impl Into<String>, method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            hub: hub.into(),
            method: method.into(),
        }
    }

    /// 构造可以直接展示给客户端的业务异常。
    pub fn hub_exception(message: impl Into<String>) -> Self {
        Self::HubException {
            message: message.into(),
        }
    }

    pub fn invocation(message: impl Into<String>) -> Self {
        Self::Invocation {
            message: message.into(),
            cause: None,
        }
    }

    /// 构造携带底层原因的调用失败。
    pub fn invocation_with_cause(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Invocation {
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => codes::CONFIGURATION,
            Self::ServiceResolution { .. } => codes::SERVICE_RESOLUTION,
            Self::MethodNotFound { .. } => codes::METHOD_NOT_FOUND,
            Self::HubException { .. } => codes::HUB_EXCEPTION,
            Self::Invocation { .. } => codes::INVOCATION_FAILED,
            Self::Cancelled => codes::CANCELLED,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_hub_exception(&self) -> bool {
        matches!(self, Self::HubException { .. })
    }
}
