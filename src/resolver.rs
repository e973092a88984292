//! Argument resolution and invocation.
//!
//! A [Resolver] turns a [CallableRef] into an [Invocable] ([Resolver::normalize]), then computes
//! the argument list of the target and calls it ([Resolver::resolve]).
//!
//! Each parameter is satisfied, in order of precedence, by:
//!
//! * for a parameter typed with a class: a converter applied to the variable of the same name,
//!   the registry binding of the class, or a recursively constructed instance;
//! * for any other parameter: the variable of the same name (cast to the declared scalar kind),
//!   the declared default, or a fallback derived from the declared kind.

use std::cell::RefCell;

use tracing::{debug, trace};

use crate::error::{ResolveError, Result};
use crate::reflect::{Catalog, Class, Constructor, Function, Method, Param, ParamType};
use crate::registry::Registry;
use crate::value::{FromValue, Object, Value};

const FREE_FUNCTION: &str = "free function";
const CONSTRUCTOR: &str = "new";

/// A type, named by its identifier, or an existing instance
#[derive(Clone, Debug)]
pub enum Target {
    Type(String),
    Instance(Object),
}

impl Target {
    /// Target a Rust type, identified by its type name
    pub fn of<T: ?Sized>() -> Self {
        Target::Type(std::any::type_name::<T>().to_owned())
    }

    pub fn id(&self) -> &str {
        match self {
            Target::Type(id) => id,
            Target::Instance(instance) => instance.class(),
        }
    }
}

impl From<&str> for Target {
    fn from(id: &str) -> Self {
        Target::Type(id.to_owned())
    }
}

impl From<String> for Target {
    fn from(id: String) -> Self {
        Target::Type(id)
    }
}

impl From<Object> for Target {
    fn from(instance: Object) -> Self {
        Target::Instance(instance)
    }
}

/// Reference to something the resolver may call, as supplied by the application
#[derive(Clone, Debug)]
pub enum CallableRef {
    Function(Function),
    Member(Target, String),
}

impl CallableRef {
    pub fn member(target: impl Into<Target>, name: impl Into<String>) -> Self {
        CallableRef::Member(target.into(), name.into())
    }
}

impl From<Function> for CallableRef {
    fn from(function: Function) -> Self {
        CallableRef::Function(function)
    }
}

impl<T: Into<Target>, S: Into<String>> From<(T, S)> for CallableRef {
    fn from((target, name): (T, S)) -> Self {
        CallableRef::member(target, name)
    }
}

/// Normalized callable, ready to be resolved
#[derive(Clone, Debug)]
pub enum Invocable {
    Function(Function),
    /// Static method: the class is never instantiated
    Static { class: String, method: String },
    /// Instance method on an existing instance
    Bound { instance: Object, method: String },
    /// Instance method whose receiver is constructed when resolved
    Unbound { class: String, method: String },
}

/// Pops the resolution stack when a constructor has been resolved
struct Resolving<'r> {
    stack: &'r RefCell<Vec<String>>,
}

impl Drop for Resolving<'_> {
    fn drop(&mut self) {
        self.stack.borrow_mut().pop();
    }
}

/// Resolve parameters against a registry and a catalog of type descriptors
pub struct Resolver<'a> {
    registry: &'a Registry,
    catalog: &'a Catalog,
    resolving: RefCell<Vec<String>>,
}

impl<'a> Resolver<'a> {
    /// Resolver reading the process-wide registry
    pub fn new(catalog: &'a Catalog) -> Self {
        Self::with_registry(catalog, Registry::global())
    }

    pub fn with_registry(catalog: &'a Catalog, registry: &'a Registry) -> Self {
        Self {
            registry,
            catalog,
            resolving: RefCell::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn catalog(&self) -> &'a Catalog {
        self.catalog
    }

    /// Check that a callable exists and select how it will be invoked.
    ///
    /// Instance methods named on a type are deferred: the receiver is only constructed when the
    /// invocable is resolved.
    pub fn normalize(&self, callable: impl Into<CallableRef>) -> Result<Invocable> {
        let (target, member) = match callable.into() {
            CallableRef::Function(function) => return Ok(Invocable::Function(function)),
            CallableRef::Member(target, member) => (target, member),
        };

        let is_static = self
            .catalog
            .get(target.id())
            .and_then(|class| class.method(&member))
            .map(Method::is_static)
            .ok_or_else(|| ResolveError::NotCallable {
                target: target.id().to_owned(),
                member: Some(member.clone()),
            })?;

        Ok(match target {
            _ if is_static => Invocable::Static {
                class: target.id().to_owned(),
                method: member,
            },
            Target::Type(class) => Invocable::Unbound {
                class,
                method: member,
            },
            Target::Instance(instance) => Invocable::Bound {
                instance,
                method: member,
            },
        })
    }

    /// Compute the arguments of an invocable and call it
    pub fn resolve(&self, invocable: Invocable) -> Result<Value> {
        match invocable {
            Invocable::Function(function) => self.invoke(&function),
            Invocable::Static { class, method } => {
                self.construct(Target::Type(class), Some(&method))
            }
            Invocable::Bound { instance, method } => {
                self.construct(Target::Instance(instance), Some(&method))
            }
            Invocable::Unbound { class, method } => {
                debug!(class = %class, method = %method, "construct receiver");
                let instance = Object::from_value(self.construct(Target::Type(class), None)?)?;
                self.construct(Target::Instance(instance), Some(&method))
            }
        }
    }

    /// Normalize then resolve a callable
    pub fn call(&self, callable: impl Into<CallableRef>) -> Result<Value> {
        let invocable = self.normalize(callable)?;
        self.resolve(invocable)
    }

    /// Construct a type (or reuse an instance) and optionally call one of its methods.
    ///
    /// Static methods never construct their type. Constructor and method parameters are
    /// resolved separately.
    pub fn construct(&self, target: impl Into<Target>, member: Option<&str>) -> Result<Value> {
        let target = target.into();
        let class = self.class_of(&target)?;
        if !class.is_instantiable() {
            return Err(ResolveError::NotInstantiable(class.id().to_owned()));
        }

        let method = member
            .map(|name| {
                class.method(name).ok_or_else(|| ResolveError::NotCallable {
                    target: class.id().to_owned(),
                    member: Some(name.to_owned()),
                })
            })
            .transpose()?;

        let constructor = match (&target, method) {
            (Target::Instance(_), _) => None,
            (_, Some(method)) if method.is_static() => None,
            (Target::Type(_), _) => class.constructor(),
        };

        let Some(constructor) = constructor else {
            return match method {
                None => self.existing_or_default(target, class).map(Value::Object),
                Some(method) if method.is_static() => self.call_method(class, method, None),
                Some(method) => {
                    let instance = self.existing_or_default(target, class)?;
                    self.call_method(class, method, Some(&instance))
                }
            };
        };

        let instance = self.instantiate(class, constructor)?;
        match method {
            Some(method) => self.call_method(class, method, Some(&instance)),
            None => Ok(Value::Object(instance)),
        }
    }

    /// Resolve the parameters of a free function and call it
    pub fn invoke(&self, function: &Function) -> Result<Value> {
        let args = self.resolve_parameters(function.params(), None, function.name())?;
        function.call(args)
    }

    /// Resolve a parameter list, in declaration order.
    ///
    /// `owner` and `function` identify the declaring type and function in errors.
    pub fn resolve_parameters(
        &self,
        params: &[Param],
        owner: Option<&str>,
        function: &str,
    ) -> Result<Vec<Value>> {
        params
            .iter()
            .map(|param| match param.ty() {
                ParamType::Class(id) => self.resolve_class(param, id),
                _ => self.resolve_non_class(param, owner, function),
            })
            .collect()
    }

    fn resolve_class(&self, param: &Param, id: &str) -> Result<Value> {
        let name = param.name();
        if self.registry.has_var(name) {
            if let Some(convert) = self.registry.get_converter(id) {
                trace!(parameter = name, class = id, "convert variable");
                return convert(name, &self.registry.get_var(name));
            }
        }
        if self.registry.has(id) {
            trace!(parameter = name, class = id, "registry binding");
            return self.registry.get(id).map(Value::Object);
        }
        trace!(parameter = name, class = id, "construct dependency");
        self.construct(Target::Type(id.to_owned()), None)
    }

    fn resolve_non_class(&self, param: &Param, owner: Option<&str>, function: &str) -> Result<Value> {
        let name = param.name();
        if self.registry.has_var(name) {
            trace!(parameter = name, "variable");
            let raw = self.registry.get_var(name);
            return Ok(match param.ty() {
                ParamType::Builtin(kind) => raw.cast(*kind),
                _ => raw,
            });
        }
        if let Some(default) = param.default() {
            trace!(parameter = name, "declared default");
            return Ok(default.clone());
        }
        if let ParamType::Builtin(kind) = param.ty() {
            if let Some(fallback) = kind.fallback() {
                trace!(parameter = name, kind = kind.name(), "fallback");
                return Ok(fallback);
            }
        }
        Err(ResolveError::UnresolvableParameter {
            owner: owner.unwrap_or(FREE_FUNCTION).to_owned(),
            function: function.to_owned(),
            parameter: name.to_owned(),
        })
    }

    fn class_of(&self, target: &Target) -> Result<&'a Class> {
        self.catalog
            .get(target.id())
            .ok_or_else(|| ResolveError::UnknownType(target.id().to_owned()))
    }

    fn existing_or_default(&self, target: Target, class: &Class) -> Result<Object> {
        match target {
            Target::Instance(instance) => Ok(instance),
            Target::Type(_) => class
                .instantiate_default()
                .ok_or_else(|| ResolveError::NotInstantiable(class.id().to_owned())),
        }
    }

    fn instantiate(&self, class: &Class, constructor: &Constructor) -> Result<Object> {
        let _guard = self.enter(class.id())?;
        debug!(class = class.id(), "construct");
        let args = self.resolve_parameters(constructor.params(), Some(class.id()), CONSTRUCTOR)?;
        constructor.call(args)
    }

    fn call_method(&self, class: &Class, method: &Method, receiver: Option<&Object>) -> Result<Value> {
        debug!(class = class.id(), method = method.name(), "call");
        let args = self.resolve_parameters(method.params(), Some(class.id()), method.name())?;
        method.call(receiver, args)
    }

    fn enter(&self, id: &str) -> Result<Resolving<'_>> {
        let mut stack = self.resolving.borrow_mut();
        if let Some(start) = stack.iter().position(|open| open == id) {
            let mut chain = stack[start..].to_vec();
            chain.push(id.to_owned());
            return Err(ResolveError::CyclicDependency { chain });
        }
        stack.push(id.to_owned());
        Ok(Resolving {
            stack: &self.resolving,
        })
    }
}
