use thiserror::Error;

/// Errors triggered while resolving and invoking a callable
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("[{0}] is not registered in the registry")]
    NotRegistered(String),
    #[error("[{target}{}] is not callable", .member.as_ref().map(|m| format!("::{m}")).unwrap_or_default())]
    NotCallable {
        target: String,
        member: Option<String>,
    },
    #[error("[{0}] is not instantiable")]
    NotInstantiable(String),
    #[error("[{0}] has no class descriptor in the catalog")]
    UnknownType(String),
    #[error("cannot resolve the parameter {owner} {function}(${parameter} ...)")]
    UnresolvableParameter {
        owner: String,
        function: String,
        parameter: String,
    },
    #[error("Cyclic dependencies: {}", .chain.join(" -> "))]
    CyclicDependency { chain: Vec<String> },
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },
    #[error("invalid argument ${parameter} of {function}: {source}")]
    InvalidArgument {
        function: String,
        parameter: String,
        source: Box<ResolveError>,
    },
    #[error("{function} expects {expected} argument(s), got {found}")]
    ArgumentCount {
        function: String,
        expected: usize,
        found: usize,
    },
    #[error("invalid variable document: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T, E = ResolveError> = std::result::Result<T, E>;
