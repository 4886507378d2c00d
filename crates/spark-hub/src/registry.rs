use std::{any::type_name, borrow::Cow, fmt, sync::Arc};

use crate::{
    HubError, HubResult,
    filter::{ActivateFilter, FilterCapabilities, HubFilter},
    services::ServiceScope,
};

/// 条目所属层级。全局条目作用于所有 Hub，局部条目只作用于指定 Hub。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FilterOrigin {
    Global,
    Local(Arc<str>),
}

impl FilterOrigin {
    /// 排序等级：全局小于局部，因此全局过滤器位于外层。
    pub fn rank(&self) -> u8 {
        match self {
            Self::Global => 0,
            Self::Local(_) => 1,
        }
    }

    pub fn applies_to(&self, hub: &str) -> bool {
        match self {
            Self::Global => true,
            Self::Local(target) => target.as_ref() == hub,
        }
    }
}

/// 过滤器来源的类别，仅用于诊断与日志。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterSourceKind {
    Instance,
    Type,
    Service,
    Factory,
}

impl FilterSourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Type => "type",
            Self::Service => "service",
            Self::Factory => "factory",
        }
    }
}

pub(crate) type FilterFactory =
    Arc<dyn Fn(&ServiceScope) -> HubResult<Arc<dyn HubFilter>> + Send + Sync>;

/// 过滤器实例从何而来。
///
/// # 教案式说明
/// - **意图（Why）**：同一个过滤器既可以作为共享实例注册，也可以按类型在每次调用时构造，
///   或交给作用域服务决定生命周期；来源决定了实例是否跨调用共享。
/// - **契约（What）**：
///   - `Instance`：原样返回，所有调用共享（单例语义）；
///   - `Type`：作用域服务中已注册则按其生命周期取用，否则经 [`ActivateFilter::activate`] 逐次构造；
///   - `Service`：只从作用域服务取用，未注册即解析失败；
///   - `Factory`：以调用作用域执行工厂闭包；
///   - 非 `Instance` 来源在注册时携带能力声明（`Type` 取 [`ActivateFilter::CAPABILITIES`]，
///     其余默认 `INVOKE`，可经 [`with_capabilities`](Self::with_capabilities) 覆写），
///     执行器只为声明了当前钩子的条目构造实例。
/// - **风险提示（Trade-offs）**：`Instance` 的内部状态被并发调用共享，需自行保证线程安全。
#[derive(Clone)]
pub enum FilterSource {
    Instance(Arc<dyn HubFilter>),
    Type {
        type_name: &'static str,
        capabilities: FilterCapabilities,
        resolve: FilterFactory,
    },
    Service {
        type_name: &'static str,
        capabilities: FilterCapabilities,
        resolve: FilterFactory,
    },
    Factory {
        label: Cow<'static, str>,
        capabilities: FilterCapabilities,
        resolve: FilterFactory,
    },
}

impl FilterSource {
    /// 以共享实例注册过滤器。
    pub fn instance<F: HubFilter>(filter: F) -> Self {
        Self::Instance(Arc::new(filter))
    }

    /// 以已有的共享句柄注册，调用方可继续持有句柄观察过滤器状态。
    pub fn shared(filter: Arc<dyn HubFilter>) -> Self {
        Self::Instance(filter)
    }

    /// 按类型注册：作用域服务优先，否则逐次激活。
    pub fn of_type<F: ActivateFilter>() -> Self {
        Self::Type {
            type_name: type_name::<F>(),
            capabilities: F::CAPABILITIES,
            resolve: Arc::new(|scope: &ServiceScope| -> HubResult<Arc<dyn HubFilter>> {
                if let Some(registered) = scope.get::<F>()? {
                    return Ok(registered as Arc<dyn HubFilter>);
                }
                Ok(Arc::new(F::activate(scope)?) as Arc<dyn HubFilter>)
            }),
        }
    }

    /// 只从作用域服务取用的过滤器类型；参与方法调用以外的钩子时需配合
    /// [`with_capabilities`](Self::with_capabilities) 声明。
    pub fn from_services<F: HubFilter>() -> Self {
        Self::Service {
            type_name: type_name::<F>(),
            capabilities: FilterCapabilities::INVOKE,
            resolve: Arc::new(|scope: &ServiceScope| -> HubResult<Arc<dyn HubFilter>> {
                Ok(scope.require::<F>()? as Arc<dyn HubFilter>)
            }),
        }
    }

    pub fn factory<F>(label: impl Into<Cow<'static, str>>, factory: F) -> Self
    where
        F: Fn(&ServiceScope) -> HubResult<Arc<dyn HubFilter>> + Send + Sync + 'static,
    {
        Self::Factory {
            label: label.into(),
            capabilities: FilterCapabilities::INVOKE,
            resolve: Arc::new(factory),
        }
    }

    /// 覆写注册时的能力声明。`Instance` 来源以实例自身的声明为准，不受影响。
    pub fn with_capabilities(mut self, declared: FilterCapabilities) -> Self {
        match &mut self {
            Self::Instance(_) => {}
            Self::Type { capabilities, .. }
            | Self::Service { capabilities, .. }
            | Self::Factory { capabilities, .. } => *capabilities = declared,
        }
        self
    }

    /// 无需构造实例即可得知的能力声明。
    pub fn capabilities(&self) -> FilterCapabilities {
        match self {
            Self::Instance(filter) => filter.capabilities(),
            Self::Type { capabilities, .. }
            | Self::Service { capabilities, .. }
            | Self::Factory { capabilities, .. } => *capabilities,
        }
    }

    pub fn kind(&self) -> FilterSourceKind {
        match self {
            Self::Instance(_) => FilterSourceKind::Instance,
            Self::Type { .. } => FilterSourceKind::Type,
            Self::Service { .. } => FilterSourceKind::Service,
            Self::Factory { .. } => FilterSourceKind::Factory,
        }
    }

    /// 诊断用标签：实例取描述符名称，其余取类型名或工厂标签。
    pub fn label(&self) -> Cow<'static, str> {
        match self {
            Self::Instance(filter) => Cow::Owned(filter.descriptor().name().to_owned()),
            Self::Type { type_name, .. } | Self::Service { type_name, .. } => {
                Cow::Borrowed(type_name)
            }
            Self::Factory { label, .. } => label.clone(),
        }
    }
}

impl fmt::Debug for FilterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSource")
            .field("kind", &self.kind())
            .field("label", &self.label())
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// 注册表中的一条记录。
#[derive(Clone, Debug)]
pub struct FilterEntry {
    origin: FilterOrigin,
    registration_index: usize,
    source: FilterSource,
}

impl FilterEntry {
    pub fn origin(&self) -> &FilterOrigin {
        &self.origin
    }

    /// 层级内的注册序号，同一层级严格递增。
    pub fn registration_index(&self) -> usize {
        self.registration_index
    }

    pub fn source(&self) -> &FilterSource {
        &self.source
    }

    /// 排序键 `(层级等级, 注册序号)`。
    pub fn order_key(&self) -> (u8, usize) {
        (self.origin.rank(), self.registration_index)
    }
}

/// 过滤器注册表：配置期追加，服务期只读。
///
/// # 教案式说明
/// - **意图（Why）**：执行顺序是管线最核心的契约，集中在注册表一处决定，调用期无需再排序或加锁。
/// - **逻辑（How）**：全局与局部分别维护递增序号；[`ordered_entries`](Self::ordered_entries) 先筛出适用于
///   目标 Hub 的条目，再按 `(层级等级, 注册序号)` 稳定排序。
/// - **契约（What）**：
///   - [`seal`](Self::seal) 之后再注册返回 `hub.configuration`；
///   - 全局条目总在局部条目之前；同一层级内先注册者在外层，包裹之后注册的全部过滤器与目标。
#[derive(Clone, Debug, Default)]
pub struct FilterRegistry {
    entries: Vec<FilterEntry>,
    next_global: usize,
    next_local: usize,
    sealed: bool,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加全局过滤器。
    pub fn add_global(&mut self, source: FilterSource) -> HubResult<&mut Self> {
        self.push(FilterOrigin::Global, source)
    }

    /// 追加作用于 `hub` 的局部过滤器。
    pub fn add_local(
        &mut self,
        hub: impl Into<Arc<str>>,
        source: FilterSource,
    ) -> HubResult<&mut Self> {
        self.push(FilterOrigin::Local(hub.into()), source)
    }

    /// 结束配置阶段；重复封存无副作用。
    pub fn seal(&mut self) {
        if !self.sealed {
            tracing::debug!(entries = self.entries.len(), "hub filter registry sealed");
        }
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn entries(&self) -> &[FilterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 返回适用于 `hub` 的条目，按执行顺序（外层在前）排列。
    pub fn ordered_entries(&self, hub: &str) -> Vec<&FilterEntry> {
        let mut selected: Vec<&FilterEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.origin.applies_to(hub))
            .collect();
        selected.sort_by_key(|entry| entry.order_key());
        selected
    }

    fn push(&mut self, origin: FilterOrigin, source: FilterSource) -> HubResult<&mut Self> {
        if self.sealed {
            return Err(HubError::configuration(format!(
                "cannot register filter `{}` after the registry has been sealed",
                source.label()
            )));
        }
        let counter = match origin {
            FilterOrigin::Global => &mut self.next_global,
            FilterOrigin::Local(_) => &mut self.next_local,
        };
        let registration_index = *counter;
        *counter += 1;
        tracing::debug!(
            origin = ?origin,
            registration_index,
            kind = source.kind().as_str(),
            "hub filter registered"
        );
        self.entries.push(FilterEntry {
            origin,
            registration_index,
            source,
        });
        Ok(self)
    }
}
