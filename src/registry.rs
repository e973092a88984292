//! Binding registry queried by the resolver.
//!
//! The registry maps identifiers to ready-made instances (singletons) or to factories building
//! them on first use. It also stores named variables injected into scalar parameters, and
//! converters turning a variable into a richer value for a given type.
//!
//! A process-wide instance is available through [Registry::global], but resolvers accept any
//! registry so that tests and embedded applications can keep their own.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::{Lazy, OnceCell};
use tracing::{debug, trace};

use crate::error::{ResolveError, Result};
use crate::value::{Object, Value};

/// Zero-argument constructor registered under an identifier
pub type Factory = Arc<dyn Fn() -> Object + Send + Sync>;

/// Turn a named variable into the value injected for a given type
pub type Converter = Arc<dyn Fn(&str, &Value) -> Result<Value> + Send + Sync>;

/// Something that can be bound to an identifier
#[derive(Clone)]
pub enum Binding {
    Instance(Object),
    Factory(Factory),
}

impl Binding {
    pub fn factory(factory: impl Fn() -> Object + Send + Sync + 'static) -> Self {
        Binding::Factory(Arc::new(factory))
    }
}

impl From<Object> for Binding {
    fn from(instance: Object) -> Self {
        Binding::Instance(instance)
    }
}

impl From<Factory> for Binding {
    fn from(factory: Factory) -> Self {
        Binding::Factory(factory)
    }
}

/// A factory with its memoized result
struct Lazily {
    factory: Factory,
    built: OnceCell<Object>,
}

impl Lazily {
    fn new(factory: Factory) -> Arc<Self> {
        Arc::new(Self {
            factory,
            built: OnceCell::new(),
        })
    }
}

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::default);

/// Lock a map, recovering from poisoning: every update is a single insert or removal
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Store of singletons, factories, variables and converters
#[derive(Default)]
pub struct Registry {
    singletons: Mutex<HashMap<String, Object>>,
    factories: Mutex<HashMap<String, Arc<Lazily>>>,
    vars: Mutex<HashMap<String, Value>>,
    converters: Mutex<HashMap<String, Converter>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry, created on first access
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Bind an instance or a factory to an identifier.
    ///
    /// A factory never evicts an existing singleton: the singleton keeps priority on lookup.
    pub fn set(&self, id: impl Into<String>, binding: impl Into<Binding>) {
        let id = id.into();
        match binding.into() {
            Binding::Instance(instance) => {
                debug!(id = %id, class = instance.class(), "bind singleton");
                lock(&self.singletons).insert(id, instance);
            }
            Binding::Factory(factory) => {
                debug!(id = %id, "bind factory");
                lock(&self.factories).insert(id, Lazily::new(factory));
            }
        }
    }

    /// Bind a value under its type name
    pub fn set_instance<T: Any + Send + Sync>(&self, value: T) {
        self.set(type_name::<T>(), Object::new(value));
    }

    /// Bind a factory under the type name of what it builds
    pub fn set_factory<T, F>(&self, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.set(
            type_name::<T>(),
            Binding::factory(move || Object::new(factory())),
        );
    }

    /// Bind several singletons at once, replacing existing ones
    pub fn import<I, S>(&self, instances: I)
    where
        I: IntoIterator<Item = (S, Object)>,
        S: Into<String>,
    {
        let mut singletons = lock(&self.singletons);
        singletons.extend(instances.into_iter().map(|(id, o)| (id.into(), o)));
    }

    /// Bind several factories at once, replacing existing ones
    pub fn import_factories<I, S>(&self, factories: I)
    where
        I: IntoIterator<Item = (S, Factory)>,
        S: Into<String>,
    {
        let mut map = lock(&self.factories);
        map.extend(
            factories
                .into_iter()
                .map(|(id, f)| (id.into(), Lazily::new(f))),
        );
    }

    /// True if a singleton or a factory is bound to the identifier
    pub fn has(&self, id: &str) -> bool {
        let found =
            lock(&self.singletons).contains_key(id) || lock(&self.factories).contains_key(id);
        trace!(id, found, "has");
        found
    }

    /// Obtain the instance bound to an identifier.
    ///
    /// A factory runs at most once; its result is cached as the singleton.
    pub fn get(&self, id: &str) -> Result<Object> {
        if let Some(instance) = lock(&self.singletons).get(id) {
            trace!(id, "singleton hit");
            return Ok(instance.clone());
        }

        let lazily = lock(&self.factories)
            .get(id)
            .cloned()
            .ok_or_else(|| ResolveError::NotRegistered(id.to_owned()))?;

        // no lock is held while the factory runs, it may query the registry itself
        let built = lazily
            .built
            .get_or_init(|| {
                debug!(id, "build singleton from factory");
                (lazily.factory)()
            })
            .clone();

        Ok(lock(&self.singletons)
            .entry(id.to_owned())
            .or_insert(built)
            .clone())
    }

    /// Drop the named singletons.
    ///
    /// Also clears every variable, whichever identifiers are named. Callers relying on
    /// variables must set them again after a removal.
    pub fn remove<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut singletons = lock(&self.singletons);
        let mut factories = lock(&self.factories);
        for id in ids {
            let id = id.as_ref();
            if singletons.remove(id).is_some() {
                debug!(id, "remove singleton");
                // the next lookup builds a fresh instance
                if let Some(lazily) = factories.get_mut(id) {
                    *lazily = Lazily::new(lazily.factory.clone());
                }
            }
        }
        lock(&self.vars).clear();
    }

    /// Return to the initial empty state
    pub fn reset(&self) {
        debug!("reset registry");
        lock(&self.singletons).clear();
        lock(&self.factories).clear();
        lock(&self.vars).clear();
        lock(&self.converters).clear();
    }

    pub fn set_var(&self, name: impl Into<String>, value: impl Into<Value>) {
        lock(&self.vars).insert(name.into(), value.into());
    }

    pub fn import_vars<I, S, V>(&self, vars: I)
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<Value>,
    {
        lock(&self.vars).extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    /// Import every member of a JSON object as a variable
    pub fn import_vars_json(&self, document: &str) -> Result<()> {
        let members: serde_json::Map<String, serde_json::Value> = serde_json::from_str(document)?;
        debug!(count = members.len(), "import variables");
        self.import_vars(members);
        Ok(())
    }

    /// True if the variable exists, even when its value is empty
    pub fn has_var(&self, name: &str) -> bool {
        lock(&self.vars).contains_key(name)
    }

    /// Value of a variable, or an empty string if it does not exist
    pub fn get_var(&self, name: &str) -> Value {
        lock(&self.vars)
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::Str(String::new()))
    }

    pub fn set_converter<F>(&self, id: impl Into<String>, converter: F)
    where
        F: Fn(&str, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        lock(&self.converters).insert(id.into(), Arc::new(converter));
    }

    pub fn has_converter(&self, id: &str) -> bool {
        lock(&self.converters).contains_key(id)
    }

    pub fn get_converter(&self, id: &str) -> Option<Converter> {
        lock(&self.converters).get(id).cloned()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys = |map: Vec<&String>| {
            let mut keys: Vec<String> = map.into_iter().cloned().collect();
            keys.sort();
            keys
        };
        f.debug_struct("Registry")
            .field("singletons", &keys(lock(&self.singletons).keys().collect()))
            .field("factories", &keys(lock(&self.factories).keys().collect()))
            .field("vars", &keys(lock(&self.vars).keys().collect()))
            .field("converters", &keys(lock(&self.converters).keys().collect()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn has_after_set() {
        let registry = Registry::new();
        registry.set("value", Object::new(1i64));
        registry.set("lazy", Binding::factory(|| Object::new(2i64)));

        assert!(registry.has("value"));
        assert!(registry.has("lazy"));
        assert!(!registry.has("other"));
    }

    #[test]
    fn factory_runs_once() {
        static BUILT: AtomicUsize = AtomicUsize::new(0);
        let registry = Registry::new();
        registry.set(
            "service",
            Binding::factory(|| {
                BUILT.fetch_add(1, Ordering::SeqCst);
                Object::new(String::from("service"))
            }),
        );

        let a = registry.get("service").unwrap();
        let b = registry.get("service").unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(BUILT.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn factory_runs_once_across_threads() {
        let built = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(Registry::new());
        let counter = built.clone();
        registry.set(
            "shared",
            Binding::factory(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Object::new(0u64)
            }),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.get("shared").unwrap())
            })
            .collect();
        let instances: Vec<Object> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(instances.windows(2).all(|w| w[0].ptr_eq(&w[1])));
    }

    #[test]
    fn singleton_has_priority_over_factory() {
        let registry = Registry::new();
        let instance = Object::new(1i64);
        registry.set("id", instance.clone());
        registry.set("id", Binding::factory(|| Object::new(2i64)));

        assert!(registry.get("id").unwrap().ptr_eq(&instance));
    }

    #[test]
    fn import_replaces_singletons() {
        let registry = Registry::new();
        let old = Object::new(1i64);
        registry.set("a", old.clone());

        let a = Object::new(10i64);
        registry.import([("a", a.clone()), ("b", Object::new(20i64))]);

        assert!(registry.get("a").unwrap().ptr_eq(&a));
        assert!(!registry.get("a").unwrap().ptr_eq(&old));
        assert_eq!(registry.get("b").unwrap().downcast_ref::<i64>(), Some(&20));
    }

    #[test]
    fn imported_factories_are_memoized() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let factory: Factory = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Object::new(String::from("db"))
        });

        let registry = Registry::new();
        registry.import_factories([("db", factory)]);
        assert!(registry.has("db"));
        assert_eq!(built.load(Ordering::SeqCst), 0);

        let first = registry.get("db").unwrap();
        let second = registry.get("db").unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn imported_factory_does_not_evict_singleton() {
        let registry = Registry::new();
        let instance = Object::new(1i64);
        registry.set("id", instance.clone());

        let factory: Factory = Arc::new(|| Object::new(2i64));
        registry.import_factories([("id", factory)]);

        assert!(registry.get("id").unwrap().ptr_eq(&instance));
    }

    #[test]
    fn get_unregistered() {
        let registry = Registry::new();
        let err = registry.get("Missing").unwrap_err();
        assert!(matches!(err, ResolveError::NotRegistered(ref id) if id == "Missing"));
        assert_eq!(err.to_string(), "[Missing] is not registered in the registry");
    }

    #[test]
    fn typed_bindings() {
        let registry = Registry::new();
        registry.set_instance(7u32);
        registry.set_factory(|| String::from("built"));

        let n = registry.get(type_name::<u32>()).unwrap();
        assert_eq!(n.downcast_ref::<u32>(), Some(&7));
        let s = registry.get(type_name::<String>()).unwrap();
        assert_eq!(s.downcast_ref::<String>().unwrap(), "built");
    }

    #[test]
    fn vars_and_sentinel() {
        let registry = Registry::new();
        assert!(!registry.has_var("name"));
        assert_eq!(registry.get_var("name"), Value::Str(String::new()));

        registry.set_var("name", "");
        assert!(registry.has_var("name"));

        registry.import_vars([("a", 1i64), ("b", 2i64)]);
        assert_eq!(registry.get_var("b"), Value::Int(2));
    }

    #[test]
    fn vars_from_json() {
        let registry = Registry::new();
        registry
            .import_vars_json(r#"{"port": 8080, "debug": true, "hosts": ["a", "b"]}"#)
            .unwrap();
        assert_eq!(registry.get_var("port"), Value::Int(8080));
        assert_eq!(registry.get_var("debug"), Value::Bool(true));
        assert_eq!(
            registry.get_var("hosts"),
            Value::List(vec![Value::from("a"), Value::from("b")])
        );

        let err = registry.import_vars_json("[1, 2]").unwrap_err();
        assert!(matches!(err, ResolveError::Config(_)));
    }

    #[test]
    fn converters() {
        let registry = Registry::new();
        assert!(!registry.has_converter("Money"));
        assert!(registry.get_converter("Money").is_none());

        registry.set_converter("Money", |name, raw| {
            Ok(Value::from(format!("{name}={}", raw.to_int())))
        });
        assert!(registry.has_converter("Money"));
        let convert = registry.get_converter("Money").unwrap();
        assert_eq!(
            convert("price", &Value::from("12")).unwrap(),
            Value::from("price=12")
        );
    }

    #[test]
    fn remove_clears_all_vars() {
        let registry = Registry::new();
        registry.set("X", Object::new(1i64));
        registry.set("Y", Object::new(2i64));
        registry.set_var("unrelated", "kept?");

        registry.remove(["X"]);

        assert!(!registry.has("X"));
        assert!(registry.has("Y"));
        assert!(!registry.has_var("unrelated"));
    }

    #[test]
    fn remove_keeps_factory_and_rebuilds() {
        let registry = Registry::new();
        registry.set("X", Binding::factory(|| Object::new(1i64)));
        let first = registry.get("X").unwrap();

        registry.remove(["X"]);
        assert!(registry.has("X"));

        let second = registry.get("X").unwrap();
        assert!(!first.ptr_eq(&second));
    }

    #[test]
    fn reset_empties_everything() {
        let registry = Registry::new();
        registry.set("X", Object::new(1i64));
        registry.set("F", Binding::factory(|| Object::new(1i64)));
        registry.set_var("v", 1i64);
        registry.set_converter("X", |_, raw| Ok(raw.clone()));

        registry.reset();

        assert!(!registry.has("X"));
        assert!(!registry.has("F"));
        assert!(!registry.has_var("v"));
        assert!(!registry.has_converter("X"));
    }

    #[test]
    #[serial]
    fn global_is_shared() {
        Registry::global().reset();
        Registry::global().set_var("shared", 1i64);
        assert!(Registry::global().has_var("shared"));
        Registry::global().reset();
    }
}
