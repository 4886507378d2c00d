//! 将注册表条目物化为单次调用使用的过滤器实例。

use std::sync::Arc;

use crate::{
    HubError, HubResult,
    filter::{FilterCapabilities, HubFilter},
    registry::{FilterEntry, FilterSource},
    services::ServiceScope,
};

/// 条目解析器。
///
/// # 教案式说明
/// - **意图（Why）**：实例来源的差异（共享实例、按类型激活、作用域服务、工厂）只在这里处理，
///   执行器拿到的始终是有序的 `Arc<dyn HubFilter>` 列表。
/// - **逻辑（How）**：先按来源的能力声明剔除不参与 `hook` 的条目，再按输入顺序逐条解析，
///   遇到第一个失败立即返回；构造出的实例再以自身声明复核一次。
/// - **契约（What）**：
///   - 所有过滤器在任何过滤器运行之前解析完毕，失败时没有用户代码被执行；
///   - 未声明 `hook` 的条目不会被构造，其依赖缺失不影响该钩子的链路；
///   - 非服务解析类的失败（例如工厂返回的调用错误）统一改写为 `hub.service_resolution`，
///     `service` 字段为条目标签；
///   - 输出顺序与输入顺序一致，只剔除未声明 `hook` 的过滤器。
#[derive(Clone, Copy, Debug, Default)]
pub struct FilterResolver;

impl FilterResolver {
    pub fn resolve(
        entries: &[&FilterEntry],
        scope: &ServiceScope,
        hook: FilterCapabilities,
    ) -> HubResult<Vec<Arc<dyn HubFilter>>> {
        let mut resolved = Vec::with_capacity(entries.len());
        for entry in entries
            .iter()
            .filter(|entry| entry.source().capabilities().contains(hook))
        {
            let filter = Self::resolve_entry(entry, scope)?;
            if filter.capabilities().contains(hook) {
                resolved.push(filter);
            }
        }
        Ok(resolved)
    }

    /// 解析单个条目，不做能力筛选。
    pub fn resolve_entry(entry: &FilterEntry, scope: &ServiceScope) -> HubResult<Arc<dyn HubFilter>> {
        let source = entry.source();
        let outcome = match source {
            FilterSource::Instance(filter) => return Ok(Arc::clone(filter)),
            FilterSource::Type { resolve, .. }
            | FilterSource::Service { resolve, .. }
            | FilterSource::Factory { resolve, .. } => resolve(scope),
        };
        outcome.map_err(|error| {
            tracing::warn!(
                filter = %source.label(),
                kind = source.kind().as_str(),
                registration_index = entry.registration_index(),
                code = error.code(),
                "hub filter resolution failed"
            );
            if matches!(error, HubError::ServiceResolution { .. }) {
                error
            } else {
                HubError::service_resolution(source.label(), error.to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        ActivateFilter, FilterDescriptor, FilterRegistry, ServiceCollection, codes,
    };

    struct Probe;

    impl HubFilter for Probe {
        fn descriptor(&self) -> FilterDescriptor {
            FilterDescriptor::anonymous("probe")
        }
    }

    struct Lifecycle;

    impl HubFilter for Lifecycle {
        fn descriptor(&self) -> FilterDescriptor {
            FilterDescriptor::anonymous("lifecycle")
        }

        fn capabilities(&self) -> FilterCapabilities {
            FilterCapabilities::LIFECYCLE
        }
    }

    struct Prefix(Arc<String>);

    impl HubFilter for Prefix {
        fn descriptor(&self) -> FilterDescriptor {
            FilterDescriptor::anonymous("prefix")
        }
    }

    impl ActivateFilter for Prefix {
        fn activate(services: &ServiceScope) -> HubResult<Self> {
            Ok(Self(services.require::<String>()?))
        }
    }

    #[test]
    fn skips_filters_without_the_hook() {
        let mut registry = FilterRegistry::new();
        registry
            .add_global(FilterSource::instance(Probe))
            .and_then(|r| r.add_global(FilterSource::instance(Lifecycle)))
            .expect("注册应成功");
        let entries = registry.ordered_entries("chat");
        let scope = ServiceScope::empty();

        let invoke = FilterResolver::resolve(&entries, &scope, FilterCapabilities::INVOKE)
            .expect("解析应成功");
        assert_eq!(invoke.len(), 1);
        assert_eq!(invoke[0].descriptor().name(), "anonymous.probe");

        let connect = FilterResolver::resolve(&entries, &scope, FilterCapabilities::CONNECT)
            .expect("解析应成功");
        assert_eq!(connect.len(), 1);
        assert_eq!(connect[0].descriptor().name(), "anonymous.lifecycle");
    }

    #[test]
    fn type_activation_reports_missing_dependency() {
        let mut registry = FilterRegistry::new();
        registry
            .add_global(FilterSource::of_type::<Prefix>())
            .expect("注册应成功");
        let entries = registry.ordered_entries("chat");

        let err = FilterResolver::resolve(&entries, &ServiceScope::empty(), FilterCapabilities::INVOKE)
            .err()
            .expect("缺少依赖时应解析失败");
        assert_eq!(err.code(), codes::SERVICE_RESOLUTION);

        let mut services = ServiceCollection::new();
        services.add_singleton(String::from("> "));
        let scope = services.build().create_scope();
        let resolved = FilterResolver::resolve(&entries, &scope, FilterCapabilities::INVOKE)
            .expect("依赖齐备时应解析成功");
        assert_eq!(resolved.len(), 1);
    }

    #[test]
    fn factory_failures_become_resolution_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = FilterRegistry::new();
        let counter = Arc::clone(&calls);
        registry
            .add_local(
                "chat",
                FilterSource::factory("broken", move |_scope| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(HubError::invocation("factory exploded"))
                }),
            )
            .expect("注册应成功");
        let entries = registry.ordered_entries("chat");
        let err = FilterResolver::resolve(&entries, &ServiceScope::empty(), FilterCapabilities::INVOKE)
            .err()
            .expect("工厂失败应传播");
        assert_eq!(err.code(), codes::SERVICE_RESOLUTION);
        assert!(err.to_string().contains("broken"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn undeclared_hooks_never_build_the_filter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut registry = FilterRegistry::new();
        registry
            .add_global(
                FilterSource::factory("presence", move |_scope| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(Lifecycle) as Arc<dyn HubFilter>)
                })
                .with_capabilities(FilterCapabilities::LIFECYCLE),
            )
            .expect("注册应成功");
        let entries = registry.ordered_entries("chat");
        let scope = ServiceScope::empty();

        let invoke = FilterResolver::resolve(&entries, &scope, FilterCapabilities::INVOKE)
            .expect("解析应成功");
        assert!(invoke.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0, "未声明的钩子不应调用工厂");

        let connect = FilterResolver::resolve(&entries, &scope, FilterCapabilities::CONNECT)
            .expect("解析应成功");
        assert_eq!(connect.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
