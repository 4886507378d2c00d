use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::Notify;

/// 取消令牌，统一描述一次调用是否已被调用方或传输层中止。
///
/// # 设计背景（Why）
/// - 连接断开时，正在执行的过滤器链需要在当前挂起点观察到取消并逐层退栈；
/// - 仅靠原子位只能轮询，链路中的 `await` 需要可等待的通知，因此在原子位旁挂一个 [`Notify`]。
///
/// # 契约说明（What）
/// - 克隆或 [`child`](Self::child) 得到的令牌共享同一状态；
/// - [`cancel`](Self::cancel) 幂等，返回值表示是否为首次触发；
/// - [`cancelled`](Self::cancelled) 在令牌被取消后完成，取消前创建的等待者都会被唤醒。
///
/// # 风险提示（Trade-offs）
/// - 令牌不会自动与截止时间联动，超时策略由宿主在外层调用 `cancel` 实现。
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    inner: Arc<CancellationState>,
}

#[derive(Debug, Default)]
struct CancellationState {
    flag: AtomicBool,
    notify: Notify,
}

impl Cancellation {
    /// 创建处于“未取消”状态的取消令牌。
    pub fn new() -> Self {
        Self::default()
    }

    /// 查询当前是否已被标记取消。
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// 将当前令牌标记为取消。
    ///
    /// 返回值为 `true` 表示本次调用首次触发取消；返回 `false` 表示之前已被取消。
    pub fn cancel(&self) -> bool {
        let first = self
            .inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// 派生共享同一状态的子令牌，用于跨模块传播取消语义。
    pub fn child(&self) -> Self {
        self.clone()
    }

    /// 等待令牌被取消。
    pub async fn cancelled(&self) {
        loop {
            // 先登记等待者再检查标志位，避免错过两者之间发生的 `notify_waiters`。
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn cancel_is_idempotent_and_shared() {
        let token = Cancellation::new();
        let child = token.child();
        assert!(!child.is_cancelled());
        assert!(token.cancel(), "首次取消应返回 true");
        assert!(!child.cancel(), "重复取消应返回 false");
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn waiters_wake_on_cancel() {
        let token = Cancellation::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("取消后等待者应在超时前完成")
            .expect("等待任务不应 panic");
    }

    #[tokio::test]
    async fn already_cancelled_returns_immediately() {
        let token = Cancellation::new();
        token.cancel();
        token.cancelled().await;
    }
}
