//! 过滤器链的延续节点。
//!
//! # 教案式说明
//! - **意图（Why）**：每个过滤器拿到一个“把控制权交给下一环”的可调用对象；链路按调用现场构建，
//!   构建与销毁都是确定的，便于测试观察。
//! - **逻辑（How）**：执行器先创建终端节点（调用 Hub），再由右向左把每个过滤器折叠成外层节点，
//!   最终得到一个单一的 [`Next`]；运行最外层节点即启动整条链。
//! - **契约（What）**：
//!   - [`Next::run`] 以值接收 `self`，同一节点最多运行一次；
//!   - 进入下一环前检查取消标记，已取消时直接返回 [`HubError::Cancelled`]，不进入尚未访问的过滤器或目标；
//!   - 等待下一环期间若发生取消，优先轮询内层 Future，使最内层挂起的节点先观察到取消并逐层向外退栈。

use std::fmt;

use serde_json::Value;

use crate::{
    BoxFuture, Cancellation, HubError, HubResult,
    context::{InvocationContext, LifecycleContext},
};

/// 能沿过滤器链流转的上下文，需暴露调用的取消令牌。
pub trait ChainInput: Send + 'static {
    fn cancellation(&self) -> &Cancellation;
}

impl ChainInput for InvocationContext {
    fn cancellation(&self) -> &Cancellation {
        InvocationContext::cancellation(self)
    }
}

impl ChainInput for LifecycleContext {
    fn cancellation(&self) -> &Cancellation {
        LifecycleContext::cancellation(self)
    }
}

type Step<In, Out> = Box<dyn FnOnce(In) -> BoxFuture<'static, HubResult<Out>> + Send>;

/// 单个延续节点，持有“下一环”的全部剩余链路。
pub struct Next<In, Out> {
    step: Step<In, Out>,
    remaining: usize,
}

/// 方法调用链的延续。
pub type InvokeNext = Next<InvocationContext, Value>;

/// 连接/断开链的延续。
pub type LifecycleNext = Next<LifecycleContext, ()>;

impl<In, Out> Next<In, Out>
where
    In: ChainInput,
    Out: Send + 'static,
{
    /// 创建链路终端，`target` 负责调用真正的 Hub。
    pub(crate) fn terminal<F>(target: F) -> Self
    where
        F: FnOnce(In) -> BoxFuture<'static, HubResult<Out>> + Send + 'static,
    {
        Self {
            step: Box::new(target),
            remaining: 0,
        }
    }

    /// 以当前节点为“下一环”包上一层过滤器。
    pub(crate) fn wrap<F>(self, link: F) -> Self
    where
        F: FnOnce(In, Self) -> BoxFuture<'static, HubResult<Out>> + Send + 'static,
    {
        let remaining = self.remaining + 1;
        Self {
            step: Box::new(move |input| link(input, self)),
            remaining,
        }
    }

    /// 剩余尚未进入的过滤器数量；为 0 表示下一环就是目标本身。
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// 把控制权交给下一环，并等待其结果。
    pub async fn run(self, input: In) -> HubResult<Out> {
        let cancellation = input.cancellation().clone();
        if cancellation.is_cancelled() {
            return Err(HubError::Cancelled);
        }
        let inner = (self.step)(input);
        tokio::select! {
            biased;
            outcome = inner => outcome,
            () = cancellation.cancelled() => Err(HubError::Cancelled),
        }
    }
}

impl<In, Out> fmt::Debug for Next<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;
    use crate::{CallerContext, HubMethod, ServiceScope};

    fn context(cancellation: Cancellation) -> InvocationContext {
        InvocationContext::new(
            CallerContext::new("conn"),
            Arc::new(HubMethod::new("chat", "Echo")),
            vec![json!("hi")],
            ServiceScope::empty(),
            cancellation,
        )
    }

    #[tokio::test]
    async fn fold_runs_links_outermost_first() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let terminal = {
            let trace = Arc::clone(&trace);
            InvokeNext::terminal(move |ctx: InvocationContext| -> BoxFuture<'static, HubResult<Value>> {
                Box::pin(async move {
                    trace.lock().expect("trace lock").push("target".to_owned());
                    Ok(ctx.argument(0).cloned().unwrap_or(Value::Null))
                })
            })
        };
        let chain = ["outer", "inner"].into_iter().rev().fold(terminal, |next, label| {
            let trace = Arc::clone(&trace);
            next.wrap(move |ctx, next| -> BoxFuture<'static, HubResult<Value>> {
                Box::pin(async move {
                    trace.lock().expect("trace lock").push(label.to_owned());
                    next.run(ctx).await
                })
            })
        });
        assert_eq!(chain.remaining(), 2);

        let value = chain.run(context(Cancellation::new())).await.expect("链路应成功");
        assert_eq!(value, json!("hi"));
        assert_eq!(
            trace.lock().expect("trace lock").as_slice(),
            ["outer", "inner", "target"]
        );
    }

    #[tokio::test]
    async fn cancelled_before_entry_skips_target() {
        let entered = Arc::new(Mutex::new(false));
        let terminal = {
            let entered = Arc::clone(&entered);
            InvokeNext::terminal(move |_ctx: InvocationContext| -> BoxFuture<'static, HubResult<Value>> {
                Box::pin(async move {
                    *entered.lock().expect("entered lock") = true;
                    Ok(Value::Null)
                })
            })
        };
        let cancellation = Cancellation::new();
        cancellation.cancel();
        let err = terminal
            .run(context(cancellation))
            .await
            .expect_err("已取消的调用不应进入目标");
        assert!(err.is_cancelled());
        assert!(!*entered.lock().expect("entered lock"));
    }
}
