//! Module identity.
//!
//! Every posted event carries the identity of the module that posted it.
//! The host owns module lifecycles; this crate only needs a cheap, comparable
//! handle and a way to answer "which module is running right now".

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Identifier of the host's own module.
pub const LOADER_MODULE_ID: &str = "tether.loader";

/// Static description of a loaded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub id: String,
    pub name: String,
    pub version: Option<String>,
}

/// Shared handle to a module. Clones are cheap; equality is by id.
#[derive(Clone)]
pub struct ModuleRef(Arc<ModuleInfo>);

impl ModuleRef {
    pub fn new(info: ModuleInfo) -> Self {
        Self(Arc::new(info))
    }

    /// Module with only an id; the name defaults to the id.
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(ModuleInfo {
            name: id.clone(),
            id,
            version: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn version(&self) -> Option<&str> {
        self.0.version.as_deref()
    }

    pub fn info(&self) -> &ModuleInfo {
        &self.0
    }
}

impl PartialEq for ModuleRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.id == other.0.id
    }
}

impl Eq for ModuleRef {}

impl fmt::Debug for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModuleRef").field(&self.0.id).finish()
    }
}

impl fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.id)
    }
}

static LOADER: OnceLock<ModuleRef> = OnceLock::new();

thread_local! {
    static SCOPES: RefCell<Vec<ModuleRef>> = const { RefCell::new(Vec::new()) };
}

/// The host's own module identity. Created on first use.
pub fn loader_module() -> ModuleRef {
    LOADER
        .get_or_init(|| {
            ModuleRef::new(ModuleInfo {
                id: LOADER_MODULE_ID.to_string(),
                name: "Tether Loader".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            })
        })
        .clone()
}

/// The module currently executing on this thread.
///
/// Innermost [`ModuleScope`] wins; outside any scope this is the loader.
pub fn current_module() -> ModuleRef {
    SCOPES
        .with(|scopes| scopes.borrow().last().cloned())
        .unwrap_or_else(loader_module)
}

/// Marks the current thread as running on behalf of a module until dropped.
///
/// Scopes nest. Not `Send`: a scope must be dropped on the thread that
/// entered it.
#[must_use = "the scope ends as soon as the guard is dropped"]
pub struct ModuleScope {
    module: ModuleRef,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ModuleScope {
    pub fn enter(module: ModuleRef) -> Self {
        SCOPES.with(|scopes| scopes.borrow_mut().push(module.clone()));
        Self {
            module,
            _not_send: std::marker::PhantomData,
        }
    }

    pub fn module(&self) -> &ModuleRef {
        &self.module
    }
}

impl Drop for ModuleScope {
    fn drop(&mut self) {
        SCOPES.with(|scopes| {
            let mut scopes = scopes.borrow_mut();
            // Guards normally drop in LIFO order; tolerate the odd mem::swap.
            if let Some(pos) = scopes.iter().rposition(|m| m == &self.module) {
                scopes.remove(pos);
            }
        });
    }
}
