//! Declarative descriptors for injectable functions and types.
//!
//! The resolver never inspects Rust items directly: each free function, constructor and method
//! it may call is described by its parameter list ([Param]) and a type-erased body.
//! Bodies are ordinary Rust closures taking typed arguments; the [Callable] and [MethodCallable]
//! traits bridge between the ordered list of resolved [Value]s and the closure's parameters.
//!
//! * A [Function] is a free function.
//! * A [Class] describes a type: whether it can be instantiated, its constructor, and its
//!   static and instance methods. [TypeDef] builds a [Class] for a concrete Rust type.
//! * A [Catalog] collects the classes known to a resolver.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{ResolveError, Result};
use crate::value::{Builtin, FromValue, Object, Value};

type Body = Arc<dyn Fn(Vec<Value>) -> Result<Value> + Send + Sync>;
type MethodBody = Arc<dyn Fn(&Object, Vec<Value>) -> Result<Value> + Send + Sync>;
type ConstructorBody = Arc<dyn Fn(Vec<Value>) -> Result<Object> + Send + Sync>;
type DefaultFactory = Arc<dyn Fn() -> Object + Send + Sync>;

/// Declared type of a parameter
#[derive(Clone, Debug, PartialEq)]
pub enum ParamType {
    Untyped,
    Builtin(Builtin),
    /// A structured type, named by its identifier
    Class(String),
}

/// Parameter descriptor
#[derive(Clone, Debug)]
pub struct Param {
    name: String,
    ty: ParamType,
    default: Option<Value>,
}

impl Param {
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ParamType::Untyped,
            default: None,
        }
    }

    pub fn builtin(name: impl Into<String>, kind: Builtin) -> Self {
        Self {
            name: name.into(),
            ty: ParamType::Builtin(kind),
            default: None,
        }
    }

    pub fn class(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ParamType::Class(id.into()),
            default: None,
        }
    }

    /// Parameter typed with a Rust type, identified by its type name
    pub fn of<T: ?Sized>(name: impl Into<String>) -> Self {
        Self::class(name, type_name::<T>())
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &ParamType {
        &self.ty
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }
}

/*
 * Bridge typed closures with up to 10 parameters to ordered argument lists.
 */

/// A Callable has a ```call``` function with a single argument and a single return type.
///
/// This trait is implemented for all functions with up to 10 arguments, using a tuple to
/// wrap them all in a single type.
pub trait Callable<Args, Ret> {
    fn call(&self, args: Args) -> Ret;
}

/// Same as [Callable] for functions taking a receiver as first argument
pub trait MethodCallable<Recv, Args, Ret> {
    fn call(&self, receiver: &Recv, args: Args) -> Ret;
}

/// Tuple of typed arguments extracted from resolved values
pub trait FromArgs: Sized {
    const ARITY: usize;

    /// Convert the values in order, failing with the position of the first rejected one
    fn from_args(args: Vec<Value>) -> std::result::Result<Self, (usize, ResolveError)>;
}

macro_rules! callable_tuple ({ $($param:ident)* } => {
    impl<Func, Ret, $($param,)*> Callable<($($param,)*), Ret> for Func
    where
        Func: Fn($($param),*) -> Ret,
    {
        #[inline]
        #[allow(non_snake_case)]
        fn call(&self, ($($param,)*): ($($param,)*)) -> Ret {
            (self)($($param,)*)
        }
    }

    impl<Recv, Func, Ret, $($param,)*> MethodCallable<Recv, ($($param,)*), Ret> for Func
    where
        Func: Fn(&Recv, $($param),*) -> Ret,
    {
        #[inline]
        #[allow(non_snake_case)]
        fn call(&self, receiver: &Recv, ($($param,)*): ($($param,)*)) -> Ret {
            (self)(receiver, $($param,)*)
        }
    }

    #[allow(clippy::unused_unit)]
    impl<$($param: FromValue,)*> FromArgs for ($($param,)*) {
        const ARITY: usize = <[&str]>::len(&[$(stringify!($param)),*]);

        #[inline]
        #[allow(unused_mut, unused_variables, unused_assignments)]
        fn from_args(args: Vec<Value>) -> std::result::Result<Self, (usize, ResolveError)> {
            let mut args = args.into_iter();
            let mut position = 0;
            Ok(($({
                let arg = $param::from_value(args.next().unwrap_or_default())
                    .map_err(|err| (position, err))?;
                position += 1;
                arg
            },)*))
        }
    }
});

callable_tuple! {}
callable_tuple! { A }
callable_tuple! { A B }
callable_tuple! { A B C }
callable_tuple! { A B C D }
callable_tuple! { A B C D E }
callable_tuple! { A B C D E F }
callable_tuple! { A B C D E F G }
callable_tuple! { A B C D E F G H }
callable_tuple! { A B C D E F G H I }
callable_tuple! { A B C D E F G H I J }

fn param_names(params: &[Param]) -> Vec<String> {
    params.iter().map(|p| p.name.clone()).collect()
}

/// Convert resolved values to typed arguments, naming the function and parameter on failure
fn extract<A: FromArgs>(function: &str, names: &[String], args: Vec<Value>) -> Result<A> {
    if args.len() != A::ARITY {
        return Err(ResolveError::ArgumentCount {
            function: function.to_owned(),
            expected: A::ARITY,
            found: args.len(),
        });
    }
    A::from_args(args).map_err(|(position, source)| ResolveError::InvalidArgument {
        function: function.to_owned(),
        parameter: names
            .get(position)
            .cloned()
            .unwrap_or_else(|| format!("#{position}")),
        source: Box::new(source),
    })
}

/// Free function descriptor
#[derive(Clone)]
pub struct Function {
    name: String,
    params: Vec<Param>,
    body: Body,
}

impl Function {
    pub fn new<A, R, F>(name: impl Into<String>, params: Vec<Param>, body: F) -> Self
    where
        F: Callable<A, R> + Send + Sync + 'static,
        A: FromArgs + 'static,
        R: Into<Value> + 'static,
    {
        let name = name.into();
        let label = name.clone();
        let names = param_names(&params);
        Self {
            name,
            params,
            body: Arc::new(move |args| {
                Ok(Callable::call(&body, extract::<A>(&label, &names, args)?).into())
            }),
        }
    }

    /// Anonymous function
    pub fn closure<A, R, F>(params: Vec<Param>, body: F) -> Self
    where
        F: Callable<A, R> + Send + Sync + 'static,
        A: FromArgs + 'static,
        R: Into<Value> + 'static,
    {
        Self::new("{closure}", params, body)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn call(&self, args: Vec<Value>) -> Result<Value> {
        (self.body)(args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
enum MethodKind {
    Static(Body),
    Instance(MethodBody),
}

/// Method descriptor, either static or bound to an instance
#[derive(Clone)]
pub struct Method {
    owner: String,
    name: String,
    params: Vec<Param>,
    kind: MethodKind,
}

impl Method {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn is_static(&self) -> bool {
        matches!(self.kind, MethodKind::Static(_))
    }

    /// Invoke the method.
    ///
    /// The receiver is ignored by static methods and required by instance methods.
    pub fn call(&self, receiver: Option<&Object>, args: Vec<Value>) -> Result<Value> {
        match (&self.kind, receiver) {
            (MethodKind::Static(body), _) => body(args),
            (MethodKind::Instance(body), Some(receiver)) => body(receiver, args),
            (MethodKind::Instance(_), None) => Err(ResolveError::NotCallable {
                target: self.owner.clone(),
                member: Some(self.name.clone()),
            }),
        }
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("static", &self.is_static())
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Constructor descriptor
#[derive(Clone)]
pub struct Constructor {
    params: Vec<Param>,
    body: ConstructorBody,
}

impl Constructor {
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn call(&self, args: Vec<Value>) -> Result<Object> {
        (self.body)(args)
    }
}

/// Type descriptor
#[derive(Clone)]
pub struct Class {
    id: String,
    is_abstract: bool,
    constructor: Option<Constructor>,
    default_factory: Option<DefaultFactory>,
    methods: HashMap<String, Method>,
}

impl Class {
    /// Identifier that cannot be instantiated (an interface or abstract type)
    pub fn abstract_type(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_abstract: true,
            constructor: None,
            default_factory: None,
            methods: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_instantiable(&self) -> bool {
        !self.is_abstract
    }

    pub fn constructor(&self) -> Option<&Constructor> {
        self.constructor.as_ref()
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    /// Build an instance without arguments, if the type allows it
    pub fn instantiate_default(&self) -> Option<Object> {
        self.default_factory.as_ref().map(|factory| factory())
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("Class")
            .field("id", &self.id)
            .field("abstract", &self.is_abstract)
            .field("constructor", &self.constructor.as_ref().map(|c| &c.params))
            .field("methods", &methods)
            .finish_non_exhaustive()
    }
}

/// Build the [Class] descriptor of a concrete type
pub struct TypeDef<T> {
    class: Class,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> Default for TypeDef<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Any + Send + Sync> TypeDef<T> {
    /// Describe `T`, identified by its type name
    pub fn new() -> Self {
        Self::named(type_name::<T>())
    }

    /// Describe `T` under a custom identifier
    pub fn named(id: impl Into<String>) -> Self {
        Self {
            class: Class {
                id: id.into(),
                is_abstract: false,
                constructor: None,
                default_factory: None,
                methods: HashMap::new(),
            },
            _marker: PhantomData,
        }
    }

    pub fn constructor<A, F>(mut self, params: Vec<Param>, body: F) -> Self
    where
        F: Callable<A, T> + Send + Sync + 'static,
        A: FromArgs + 'static,
    {
        let id = self.class.id.clone();
        let label = format!("{id}::new");
        let names = param_names(&params);
        self.class.constructor = Some(Constructor {
            params,
            body: Arc::new(move |args| {
                let instance = Callable::call(&body, extract::<A>(&label, &names, args)?);
                Ok(Object::with_class(id.as_str(), instance))
            }),
        });
        self
    }

    pub fn method<A, R, F>(self, name: impl Into<String>, params: Vec<Param>, body: F) -> Self
    where
        F: MethodCallable<T, A, R> + Send + Sync + 'static,
        A: FromArgs + 'static,
        R: Into<Value> + 'static,
    {
        let name = name.into();
        let label = format!("{}::{}", self.class.id, name);
        let names = param_names(&params);
        let body: MethodBody = Arc::new(move |receiver: &Object, args: Vec<Value>| {
            let instance = receiver
                .downcast_ref::<T>()
                .ok_or_else(|| ResolveError::TypeMismatch {
                    expected: type_name::<T>(),
                    found: receiver.class().to_owned(),
                })?;
            Ok(MethodCallable::call(&body, instance, extract::<A>(&label, &names, args)?).into())
        });
        self.insert(name, params, MethodKind::Instance(body))
    }

    pub fn static_method<A, R, F>(
        self,
        name: impl Into<String>,
        params: Vec<Param>,
        body: F,
    ) -> Self
    where
        F: Callable<A, R> + Send + Sync + 'static,
        A: FromArgs + 'static,
        R: Into<Value> + 'static,
    {
        let name = name.into();
        let label = format!("{}::{}", self.class.id, name);
        let names = param_names(&params);
        let body: Body = Arc::new(move |args| {
            Ok(Callable::call(&body, extract::<A>(&label, &names, args)?).into())
        });
        self.insert(name, params, MethodKind::Static(body))
    }

    fn insert(mut self, name: String, params: Vec<Param>, kind: MethodKind) -> Self {
        let owner = self.class.id.clone();
        self.class.methods.insert(
            name.clone(),
            Method {
                owner,
                name,
                params,
                kind,
            },
        );
        self
    }

    pub fn build(self) -> Class {
        self.class
    }
}

impl<T: Any + Send + Sync + Default> TypeDef<T> {
    /// Allow building `T` without arguments through [Default]
    pub fn default_constructible(mut self) -> Self {
        let id = self.class.id.clone();
        self.class.default_factory = Some(Arc::new(move || {
            Object::with_class(id.as_str(), T::default())
        }));
        self
    }
}

impl<T: Any + Send + Sync> From<TypeDef<T>> for Class {
    fn from(def: TypeDef<T>) -> Self {
        def.build()
    }
}

/// Collection of type descriptors, keyed by identifier
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    classes: HashMap<String, Class>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a type descriptor
    pub fn define(&mut self, class: impl Into<Class>) -> &mut Self {
        let class = class.into();
        self.classes.insert(class.id.clone(), class);
        self
    }

    pub fn with(mut self, class: impl Into<Class>) -> Self {
        self.define(class);
        self
    }

    pub fn get(&self, id: &str) -> Option<&Class> {
        self.classes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.classes.contains_key(id)
    }
}
