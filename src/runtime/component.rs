//! Component instances as seen by the runtime.
//!
//! The interpreter owns the meaning of a component; the runtime only needs a
//! stable handle with an identity, a state map, and a behavior table it can
//! swap. A [`ComponentDefinition`] is that behavior table: optional lifecycle
//! hooks plus named methods. A [`Component`] points at exactly one definition
//! at a time and keeps its state across definition swaps.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;

/// Component state: ordered `key → value` map.
pub type State = IndexMap<String, Value>;

/// Shared component handle. Identity is the [`ComponentId`], never the value.
pub type ComponentHandle = Arc<Component>;

/// `onMount` / `onUnmount` / `cleanup` hook.
pub type LifecycleHook = Arc<dyn Fn(&Component) -> anyhow::Result<()> + Send + Sync>;

/// `onUpdate(old_state)` hook.
pub type UpdateHook = Arc<dyn Fn(&Component, &State) -> anyhow::Result<()> + Send + Sync>;

/// Named method operating on the instance state.
pub type Method = Arc<dyn Fn(&mut State, &[Value]) -> anyhow::Result<Value> + Send + Sync>;

static NEXT_COMPONENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique component identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u64);

impl ComponentId {
    fn next() -> Self {
        Self(NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Component({})", self.0)
    }
}

/// Optional capabilities a definition may provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    OnMount,
    OnUpdate,
    OnUnmount,
    Cleanup,
}

impl Capability {
    /// Name the interpreter uses for this capability.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::OnMount => "onMount",
            Capability::OnUpdate => "onUpdate",
            Capability::OnUnmount => "onUnmount",
            Capability::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hook invocation, carrying its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Hook {
    Mount,
    Update(State),
    Unmount,
    Cleanup,
}

impl Hook {
    /// The capability this invocation requires.
    pub fn capability(&self) -> Capability {
        match self {
            Hook::Mount => Capability::OnMount,
            Hook::Update(_) => Capability::OnUpdate,
            Hook::Unmount => Capability::OnUnmount,
            Hook::Cleanup => Capability::Cleanup,
        }
    }
}

/// Behavior table for a component.
pub struct ComponentDefinition {
    name: String,
    initial_state: State,
    on_mount: Option<LifecycleHook>,
    on_update: Option<UpdateHook>,
    on_unmount: Option<LifecycleHook>,
    cleanup: Option<LifecycleHook>,
    methods: IndexMap<String, Method>,
}

impl fmt::Debug for ComponentDefinition {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let capabilities: Vec<&str> = [
            Capability::OnMount,
            Capability::OnUpdate,
            Capability::OnUnmount,
            Capability::Cleanup,
        ]
        .into_iter()
        .filter(|cap| self.has(*cap))
        .map(|cap| cap.as_str())
        .collect();

        f.debug_struct("ComponentDefinition")
            .field("name", &self.name)
            .field("initial_state", &self.initial_state)
            .field("capabilities", &capabilities)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ComponentDefinition {
    /// Start building a definition called `name`.
    pub fn builder(name: impl Into<String>) -> DefinitionBuilder {
        DefinitionBuilder {
            definition: ComponentDefinition {
                name: name.into(),
                initial_state: State::new(),
                on_mount: None,
                on_update: None,
                on_unmount: None,
                cleanup: None,
                methods: IndexMap::new(),
            },
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// State a fresh instance starts with.
    #[inline]
    pub fn initial_state(&self) -> &State {
        &self.initial_state
    }

    /// Whether the definition provides `capability`.
    pub fn has(
        &self,
        capability: Capability,
    ) -> bool {
        match capability {
            Capability::OnMount => self.on_mount.is_some(),
            Capability::OnUpdate => self.on_update.is_some(),
            Capability::OnUnmount => self.on_unmount.is_some(),
            Capability::Cleanup => self.cleanup.is_some(),
        }
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    fn method(
        &self,
        name: &str,
    ) -> Option<Method> {
        self.methods.get(name).cloned()
    }
}

/// Builder for [`ComponentDefinition`].
pub struct DefinitionBuilder {
    definition: ComponentDefinition,
}

impl DefinitionBuilder {
    /// Add a state field with its default value.
    pub fn state(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.definition
            .initial_state
            .insert(key.into(), value.into());
        self
    }

    pub fn on_mount<F>(
        mut self,
        hook: F,
    ) -> Self
    where
        F: Fn(&Component) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.definition.on_mount = Some(Arc::new(hook));
        self
    }

    pub fn on_update<F>(
        mut self,
        hook: F,
    ) -> Self
    where
        F: Fn(&Component, &State) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.definition.on_update = Some(Arc::new(hook));
        self
    }

    pub fn on_unmount<F>(
        mut self,
        hook: F,
    ) -> Self
    where
        F: Fn(&Component) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.definition.on_unmount = Some(Arc::new(hook));
        self
    }

    pub fn cleanup<F>(
        mut self,
        hook: F,
    ) -> Self
    where
        F: Fn(&Component) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.definition.cleanup = Some(Arc::new(hook));
        self
    }

    /// Add a named method. Re-adding a name replaces the previous method.
    pub fn method<F>(
        mut self,
        name: impl Into<String>,
        method: F,
    ) -> Self
    where
        F: Fn(&mut State, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.definition
            .methods
            .insert(name.into(), Arc::new(method));
        self
    }

    pub fn build(self) -> Arc<ComponentDefinition> {
        Arc::new(self.definition)
    }
}

struct ComponentInner {
    definition: Arc<ComponentDefinition>,
    state: State,
}

/// A live component instance.
///
/// The handle is stable for the instance's whole life; hot reload only
/// changes which definition it points at.
pub struct Component {
    id: ComponentId,
    inner: RwLock<ComponentInner>,
}

impl fmt::Debug for Component {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Component")
            .field("id", &self.id)
            .field("definition", &inner.definition.name())
            .field("state", &inner.state)
            .finish()
    }
}

impl Component {
    /// Create an instance seeded with the definition's initial state.
    pub fn new(definition: Arc<ComponentDefinition>) -> ComponentHandle {
        let state = definition.initial_state().clone();
        Arc::new(Self {
            id: ComponentId::next(),
            inner: RwLock::new(ComponentInner { definition, state }),
        })
    }

    #[inline]
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// The currently active definition.
    pub fn definition(&self) -> Arc<ComponentDefinition> {
        Arc::clone(&self.inner.read().definition)
    }

    pub fn definition_name(&self) -> String {
        self.inner.read().definition.name().to_string()
    }

    pub fn has_capability(
        &self,
        capability: Capability,
    ) -> bool {
        self.inner.read().definition.has(capability)
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> State {
        self.inner.read().state.clone()
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<Value> {
        self.inner.read().state.get(key).cloned()
    }

    /// Set a state field, returning the previous value.
    pub fn set_state(
        &self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Option<Value> {
        self.inner.write().state.insert(key.into(), value.into())
    }

    /// Call a method of the active definition.
    ///
    /// The method runs with exclusive access to the state and must not call
    /// back into this instance.
    pub fn call(
        &self,
        method: &str,
        args: &[Value],
    ) -> anyhow::Result<Value> {
        let mut inner = self.inner.write();
        let function = inner.definition.method(method).ok_or_else(|| {
            anyhow!(
                "component `{}` has no method `{}`",
                inner.definition.name(),
                method
            )
        })?;
        function(&mut inner.state, args)
    }

    /// Point the instance at `definition`, keeping its state.
    ///
    /// Fields present in the old state keep their values; fields that only
    /// the new definition declares are added with their defaults. Returns
    /// the state as it was before the swap.
    pub fn swap_definition(
        &self,
        definition: Arc<ComponentDefinition>,
    ) -> State {
        let mut inner = self.inner.write();
        let old_state = inner.state.clone();

        let mut merged = definition.initial_state().clone();
        for (key, value) in &old_state {
            merged.insert(key.clone(), value.clone());
        }

        inner.state = merged;
        inner.definition = definition;
        old_state
    }

    /// Invoke a hook if the active definition provides it.
    ///
    /// The instance lock is released before the hook runs, so hooks may read
    /// and write this instance. Returns `None` when the capability is absent.
    pub fn invoke(
        &self,
        hook: &Hook,
    ) -> Option<anyhow::Result<()>> {
        let definition = self.definition();
        match hook {
            Hook::Mount => definition.on_mount.as_ref().map(|f| f(self)),
            Hook::Update(old_state) => definition.on_update.as_ref().map(|f| f(self, old_state)),
            Hook::Unmount => definition.on_unmount.as_ref().map(|f| f(self)),
            Hook::Cleanup => definition.cleanup.as_ref().map(|f| f(self)),
        }
    }
}
