//! Runtime dependency resolution for functions, methods and constructors.
//!
//! # Simple use case
//!
//! ```
//! # use wirebind::*;
//! # fn main() -> Result<(), ResolveError> {
//! // A type with a constructor depending on a configuration value
//! struct Greeter {
//!     greeting: String,
//! }
//!
//! // Describe how to build it and which methods can be called
//! let catalog = Catalog::new().with(
//!     TypeDef::<Greeter>::new()
//!         .constructor(vec![Param::builtin("greeting", Builtin::String)], |greeting: String| {
//!             Greeter { greeting }
//!         })
//!         .method("greet", vec![Param::builtin("name", Builtin::String)], |g: &Greeter, name: String| {
//!             format!("{}, {name}!", g.greeting)
//!         }),
//! );
//!
//! // Provide the values, then let the resolver wire everything
//! let registry = Registry::new();
//! registry.set_var("greeting", "Hello");
//! registry.set_var("name", "world");
//!
//! let resolver = Resolver::with_registry(&catalog, &registry);
//! let message = resolver.call((Target::of::<Greeter>(), "greet"))?;
//! assert_eq!(message, Value::from("Hello, world!"));
//! # Ok(())
//! # }
//! ```
//!
//! # Mechanism
//!
//! Rust has no runtime reflection, so every injectable item is described explicitly.
//! A [Catalog] holds [Class] descriptors (built with [TypeDef]) listing constructors and methods
//! together with their [Param] lists, and a [Function] describes a free function.
//! Bodies are plain closures: resolved arguments are converted to their typed parameters.
//!
//! * The [Registry] holds singletons, lazily built singletons (factories), named variables and
//!   converters. [Registry::global] gives access to a process-wide instance.
//! * The [Resolver] reads a registry and a catalog. It normalizes a [CallableRef] into an
//!   [Invocable], then resolves each parameter from the registry or by constructing it.
//!
//! Construction cycles are reported as [ResolveError::CyclicDependency].

mod error;
mod reflect;
mod registry;
mod resolver;
mod value;

pub use error::{ResolveError, Result};
pub use reflect::{
    Callable, Catalog, Class, Constructor, FromArgs, Function, Method, MethodCallable, Param,
    ParamType, TypeDef,
};
pub use registry::{Binding, Converter, Factory, Registry};
pub use resolver::{CallableRef, Invocable, Resolver, Target};
pub use value::{Builtin, FromValue, Object, Value};
