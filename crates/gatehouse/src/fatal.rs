//! Log-and-exit wrappers for process entry points.
//!
//! Each helper logs a failure inside the caller's span and terminates with
//! status 1. Library code should call the `Result`-returning functions instead.
use crate::config::ProviderConfig;
use gatehouse_authz::{ProviderError, ProviderResult, SharedEnforcer, StoreSource, provider};
use std::path::Path;
use tracing::Span;

/// Unwrap `result`, or log the error under `logger` and exit the process.
pub fn exit_on_error<T>(logger: &Span, result: ProviderResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => exit(logger, &err),
    }
}

pub async fn init_and_get_enforcer_or_exit(
    source: impl Into<StoreSource>,
    logger: Span,
    model_path: impl AsRef<Path>,
) -> SharedEnforcer {
    let outcome = provider::init_and_get_enforcer(source, logger.clone(), model_path).await;
    exit_on_error(&logger, outcome)
}

pub async fn init_and_get_enforcer_with_custom_db_or_exit(
    db_conn: &str,
    rule_table: &str,
    logger: Span,
    model_path: impl AsRef<Path>,
) -> SharedEnforcer {
    let outcome =
        provider::init_and_get_enforcer_with_custom_db(db_conn, rule_table, logger.clone(), model_path)
            .await;
    exit_on_error(&logger, outcome)
}

pub async fn bootstrap_or_exit(config: &ProviderConfig, logger: Span) -> SharedEnforcer {
    let outcome = crate::bootstrap(config, logger.clone()).await;
    exit_on_error(&logger, outcome)
}

fn exit(logger: &Span, err: &ProviderError) -> ! {
    tracing::error!(
        parent: logger,
        error = %err,
        kind = err.kind().as_str(),
        "authorization provider unavailable, exiting"
    );
    std::process::exit(1)
}
