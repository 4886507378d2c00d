use async_trait::async_trait;
use serde_json::Value;
use spark_hub::{
    ActivateFilter, FilterDescriptor, HubFilter, HubResult, InvocationContext, InvokeNext,
    ServiceScope,
};

/// 方法标记键：值为需要清洗的参数下标。
pub const ARGUMENT_MARKER: &str = "language_filter.argument";

/// 语言过滤器配置。
///
/// # 契约说明（What）
/// - `banned_phrases`：区分大小写的子串，逐个替换为 `mask`；
/// - 以单例服务注册到作用域容器时，按类型激活的 [`LanguageFilter`] 会取用该配置，否则使用默认值。
#[derive(Clone, Debug)]
pub struct LanguageFilterConfig {
    pub descriptor: FilterDescriptor,
    pub banned_phrases: Vec<String>,
    pub mask: String,
}

impl Default for LanguageFilterConfig {
    fn default() -> Self {
        Self {
            descriptor: FilterDescriptor::new(
                "spark.hub.filters.language",
                "sanitize",
                "按方法标记屏蔽参数中的禁用短语",
            ),
            banned_phrases: vec!["async void".to_owned(), ".Result".to_owned()],
            mask: "***".to_owned(),
        }
    }
}

/// 按方法标记清洗字符串参数的过滤器。
///
/// # 教案式说明
/// - **意图（Why）**：示范“调用目标前替换参数”：过滤器不修改其他持有者看到的参数序列，而是构造
///   携带新参数的替换上下文交给下一环。
/// - **逻辑（How）**：读取方法元数据上的 [`ARGUMENT_MARKER`]；若标记指向的参数是字符串且包含禁用短语，
///   生成替换后的参数序列并通过 [`InvocationContext::with_arguments`] 继续调用。
/// - **契约（What）**：未标记的方法、越界下标与非字符串参数均原样透传。
#[derive(Clone, Debug, Default)]
pub struct LanguageFilter {
    config: LanguageFilterConfig,
}

impl LanguageFilter {
    pub fn new(config: LanguageFilterConfig) -> Self {
        Self { config }
    }

    /// 替换文本中的全部禁用短语；无命中时返回 `None`。
    pub fn sanitize(&self, text: &str) -> Option<String> {
        let mut cleaned: Option<String> = None;
        for phrase in self.config.banned_phrases.iter().filter(|phrase| !phrase.is_empty()) {
            let current = cleaned.as_deref().unwrap_or(text);
            if current.contains(phrase.as_str()) {
                cleaned = Some(current.replace(phrase.as_str(), &self.config.mask));
            }
        }
        cleaned
    }

    fn target_index(ctx: &InvocationContext) -> Option<usize> {
        ctx.method()
            .marker(ARGUMENT_MARKER)
            .and_then(Value::as_u64)
            .and_then(|index| usize::try_from(index).ok())
    }
}

#[async_trait]
impl HubFilter for LanguageFilter {
    fn descriptor(&self) -> FilterDescriptor {
        self.config.descriptor.clone()
    }

    async fn invoke_method(&self, ctx: InvocationContext, next: InvokeNext) -> HubResult<Value> {
        let cleaned = Self::target_index(&ctx).and_then(|index| {
            let text = ctx.argument(index)?.as_str()?;
            self.sanitize(text).map(|cleaned| (index, cleaned))
        });
        let Some((index, cleaned)) = cleaned else {
            return next.run(ctx).await;
        };

        tracing::debug!(
            method = ctx.method_name(),
            argument = index,
            "banned phrase masked in hub argument"
        );
        let mut arguments = ctx.arguments().to_vec();
        arguments[index] = Value::String(cleaned);
        next.run(ctx.with_arguments(arguments)).await
    }
}

impl ActivateFilter for LanguageFilter {
    fn activate(services: &ServiceScope) -> HubResult<Self> {
        let config = services
            .get::<LanguageFilterConfig>()?
            .map(|config| config.as_ref().clone())
            .unwrap_or_default();
        Ok(Self::new(config))
    }
}
