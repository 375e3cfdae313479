pub use slog::{debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds the standard terminal logger (stderr, debug level). Components
/// derive their own child loggers off the returned root.
pub fn init() -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(Severity::Debug);
    builder.destination(Destination::Stderr);

    builder.build().expect("Error building terminal logger")
}

/// Logger that swallows all records. Default for components constructed
/// without an explicit parent logger, and for unit tests.
#[inline]
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}

/// Resolves an optional parent logger into a component logger.
#[inline]
pub fn child<'a, L: Into<Option<&'a Logger>>>(log: L) -> Logger {
    match log.into() {
        Some(log) => log.new(o!()),
        None => discard(),
    }
}
