use std::sync::Arc;
use std::time::SystemTime;

use wirebind::*;

// Define regular structs, without any knowledge of the resolver

struct Logger {
    prefix: String,
}

impl Logger {
    fn log(&self, content: &str) {
        println!("[{}] {}", self.prefix, content);
    }
}

struct DateLogger {
    logger: Arc<Logger>,
    verbose: bool,
}

impl DateLogger {
    fn log_date(&self, label: &str) -> u64 {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        if self.verbose {
            self.logger.log(&format!("{label}: {now}s since epoch"));
        }
        now
    }
}

// Describe how the resolver can build and call them

fn catalog() -> Catalog {
    Catalog::new()
        .with(TypeDef::<Logger>::new().constructor(
            vec![Param::builtin("prefix", Builtin::String).with_default("app")],
            |prefix: String| Logger { prefix },
        ))
        .with(
            TypeDef::<DateLogger>::new()
                .constructor(
                    vec![
                        Param::of::<Logger>("logger"),
                        Param::builtin("verbose", Builtin::Bool),
                    ],
                    |logger: Arc<Logger>, verbose: bool| DateLogger { logger, verbose },
                )
                .method(
                    "logDate",
                    vec![Param::builtin("label", Builtin::String).with_default("now")],
                    |d: &DateLogger, label: String| d.log_date(&label) as i64,
                ),
        )
}

fn main() -> Result<(), ResolveError> {
    let catalog = catalog();

    // Variables usually come from a configuration document
    let registry = Registry::global();
    registry.import_vars_json(r#"{"prefix": "demo", "verbose": "1"}"#)?;

    let resolver = Resolver::new(&catalog);
    let seconds = resolver.call((Target::of::<DateLogger>(), "logDate"))?;
    println!("resolved: {seconds:?}");

    // A free function receiving a registered singleton
    registry.set_instance(Logger {
        prefix: "shared".into(),
    });
    let hello = Function::new("hello", vec![Param::of::<Logger>("logger")], |logger: Arc<Logger>| {
        logger.log("hello from a free function")
    });
    resolver.invoke(&hello)?;

    Ok(())
}
