//! 调用作用域内的服务查找。
//!
//! # 教案式说明
//! - **意图（Why）**：过滤器解析需要一个“按类型查找实例”的协作者，决定某个过滤器类型是否已在容器中
//!   注册、以何种生命周期提供；本模块只提供管线所需的最小契约，并不试图成为完整的依赖注入框架。
//! - **逻辑（How）**：配置期通过 [`ServiceCollection`] 登记单例/作用域/瞬态三类注册项，`build` 后得到只读的
//!   [`ServiceProvider`]；每次调用由执行器创建一个 [`ServiceScope`]，作用域实例在其内部缓存。
//! - **契约（What）**：同一类型重复注册时后者覆盖前者；工厂返回的错误原样透出；查找不存在的类型通过
//!   [`ServiceScope::get`] 返回 `Ok(None)`，通过 [`ServiceScope::require`] 返回 `hub.service_resolution`。

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{HubError, HubResult};

type AnyArc = Arc<dyn Any + Send + Sync>;
type AnyFactory = Arc<dyn Fn(&ServiceScope) -> HubResult<AnyArc> + Send + Sync>;

enum Registration {
    Singleton(AnyArc),
    Scoped(AnyFactory),
    Transient(AnyFactory),
}

struct ServiceDescriptor {
    type_name: &'static str,
    registration: Registration,
}

/// 配置期的服务登记表。
#[derive(Default)]
pub struct ServiceCollection {
    registrations: HashMap<TypeId, ServiceDescriptor>,
}

impl ServiceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记进程级单例，所有作用域共享同一实例。
    pub fn add_singleton<T>(&mut self, value: T) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        self.add_singleton_arc(Arc::new(value))
    }

    /// 以已有的 `Arc` 登记单例，便于调用方保留句柄观察内部状态。
    pub fn add_singleton_arc<T>(&mut self, value: Arc<T>) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        self.insert::<T>(Registration::Singleton(value as AnyArc))
    }

    /// 登记作用域服务：同一 [`ServiceScope`] 内只构造一次。
    pub fn add_scoped<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceScope) -> HubResult<T> + Send + Sync + 'static,
    {
        self.insert::<T>(Registration::Scoped(erase(factory)))
    }

    /// 登记瞬态服务：每次查找都构造新实例。
    pub fn add_transient<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceScope) -> HubResult<T> + Send + Sync + 'static,
    {
        self.insert::<T>(Registration::Transient(erase(factory)))
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.registrations.contains_key(&TypeId::of::<T>())
    }

    /// 结束配置，得到只读的服务提供者。
    pub fn build(self) -> ServiceProvider {
        ServiceProvider {
            registrations: Arc::new(self.registrations),
        }
    }

    fn insert<T: 'static>(&mut self, registration: Registration) -> &mut Self {
        self.registrations.insert(
            TypeId::of::<T>(),
            ServiceDescriptor {
                type_name: type_name::<T>(),
                registration,
            },
        );
        self
    }
}

fn erase<T, F>(factory: F) -> AnyFactory
where
    T: Send + Sync + 'static,
    F: Fn(&ServiceScope) -> HubResult<T> + Send + Sync + 'static,
{
    Arc::new(move |scope| factory(scope).map(|value| Arc::new(value) as AnyArc))
}

/// 只读服务提供者，服务期间在调用间共享。
#[derive(Clone, Default)]
pub struct ServiceProvider {
    registrations: Arc<HashMap<TypeId, ServiceDescriptor>>,
}

impl ServiceProvider {
    /// 为一次调用创建新的作用域。
    pub fn create_scope(&self) -> ServiceScope {
        ServiceScope {
            inner: Arc::new(ScopeState {
                registrations: Arc::clone(&self.registrations),
                scoped: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("registrations", &self.registrations.len())
            .finish()
    }
}

/// 单次调用的服务作用域。
///
/// # 契约说明（What）
/// - 克隆得到的句柄共享同一份作用域缓存；
/// - 作用域工厂在未持锁状态下执行，工厂内部可以继续查找其他服务；
///   若并发查找同一作用域服务，以先写入缓存者为准。
#[derive(Clone)]
pub struct ServiceScope {
    inner: Arc<ScopeState>,
}

struct ScopeState {
    registrations: Arc<HashMap<TypeId, ServiceDescriptor>>,
    scoped: Mutex<HashMap<TypeId, AnyArc>>,
}

impl ServiceScope {
    /// 创建不含任何注册项的空作用域。
    pub fn empty() -> Self {
        ServiceProvider::default().create_scope()
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.inner.registrations.contains_key(&TypeId::of::<T>())
    }

    /// 查找服务；未注册时返回 `Ok(None)`，工厂失败时返回其错误。
    pub fn get<T>(&self) -> HubResult<Option<Arc<T>>>
    where
        T: Send + Sync + 'static,
    {
        let id = TypeId::of::<T>();
        let Some(descriptor) = self.inner.registrations.get(&id) else {
            return Ok(None);
        };
        let instance = match &descriptor.registration {
            Registration::Singleton(value) => Arc::clone(value),
            Registration::Transient(factory) => factory(self)?,
            Registration::Scoped(factory) => {
                let cached = self.inner.scoped.lock().get(&id).cloned();
                match cached {
                    Some(value) => value,
                    None => {
                        let created = factory(self)?;
                        Arc::clone(self.inner.scoped.lock().entry(id).or_insert(created))
                    }
                }
            }
        };
        instance.downcast::<T>().map(Some).map_err(|_| {
            HubError::service_resolution(
                descriptor.type_name,
                "registered instance does not match the requested type",
            )
        })
    }

    /// 查找必需的服务；未注册时返回 `hub.service_resolution`。
    pub fn require<T>(&self) -> HubResult<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.get::<T>()?.ok_or_else(|| {
            HubError::service_resolution(type_name::<T>(), "no service registered for this type")
        })
    }
}

impl fmt::Debug for ServiceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceScope")
            .field("registrations", &self.inner.registrations.len())
            .field("scoped_cached", &self.inner.scoped.lock().len())
            .finish()
    }
}
