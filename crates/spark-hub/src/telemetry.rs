//! 宿主进程的 `tracing` 订阅者安装入口。

use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

use crate::{HubError, HubResult};

/// 安装 `fmt + EnvFilter` 全局订阅者。
///
/// # 教案式说明
/// - **意图（Why）**：管线在执行器中输出 `hub.invoke`、`hub.connect`、`hub.disconnect` span 与阶段事件，
///   宿主只需调用一次即可在标准输出看到它们。
/// - **逻辑（How）**：优先读取 `RUST_LOG`，缺省或非法时回退到 `default_directive`（再失败则退回
///   `info`），随后以 `registry().with(filter).with(fmt::layer())` 组装并设置为全局默认。
/// - **契约（What）**：进程内已存在全局订阅者时返回 `hub.configuration`，不会覆盖外部配置。
pub fn init_tracing(default_directive: &str) -> HubResult<()> {
    if dispatcher::has_been_set() {
        return Err(HubError::configuration(
            "a global tracing subscriber has already been installed",
        ));
    }
    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter(default_directive))
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| HubError::configuration(format!("failed to install tracing: {err}")))
}

fn build_env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 本 crate 的单元测试中只有此用例安装全局订阅者，首次安装必然成功。
    #[test]
    fn installs_once_then_rejects_reinstallation() {
        init_tracing("spark_hub=debug").expect("首次安装应成功");
        assert!(dispatcher::has_been_set(), "安装后应存在全局订阅者");
        let err = init_tracing("info").expect_err("重复安装应失败");
        assert_eq!(err.code(), crate::codes::CONFIGURATION);
    }
}
