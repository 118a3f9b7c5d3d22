//! Public entry points for the gatehouse enforcer provider.
//!
//! # Purpose
//! Exposes the process-wide provider operations unchanged, plus the helpers a
//! binary needs at its composition root: configuration loading, tracing setup,
//! and log-and-exit wrappers.
//!
//! # How it fits
//! Implementation lives in `gatehouse-authz`; this crate only forwards to it
//! and adds boundary concerns that must not leak into library code.
//!
//! # Key invariants
//! - Functions here return errors; only the `fatal` module exits the process.
//! - All entry points share one process-wide provider.
//!
//! # Examples
//! ```rust,no_run
//! # async fn run() -> anyhow::Result<()> {
//! gatehouse::observability::init_tracing();
//! let config = gatehouse::config::ProviderConfig::from_env_or_yaml()?;
//! let enforcer = gatehouse::fatal::bootstrap_or_exit(&config, tracing::info_span!("authz")).await;
//! let _guard = enforcer.read().await;
//! # Ok(())
//! # }
//! ```
pub mod config;
pub mod fatal;
pub mod observability;

use config::ProviderConfig;
use tracing::Span;

pub use gatehouse_authz::provider::{
    get_service, init_and_get_enforcer, init_and_get_enforcer_with_custom_db,
};
pub use gatehouse_authz::{
    CasbinService, DEFAULT_TABLE_NAME, Enforcer, EnforcerService, ErrorKind, PgPolicyAdapter,
    PolicyFilter, ProviderError, ProviderResult, SharedEnforcer, StoreSource,
};

/// Initialize the process-wide provider from `config`.
///
/// A non-empty `rule_table` selects the custom-db path; otherwise the
/// connection URL is bound against the default rule table.
pub async fn bootstrap(config: &ProviderConfig, logger: Span) -> ProviderResult<SharedEnforcer> {
    let provider = gatehouse_authz::provider::global();
    let settings = config.pool_settings();
    if config.rule_table.is_empty() {
        provider
            .init_and_get_enforcer(
                config.database_url.as_str(),
                logger,
                &config.model_path,
                settings,
            )
            .await
    } else {
        provider
            .init_and_get_enforcer_with_custom_db(
                &config.database_url,
                &config.rule_table,
                logger,
                &config.model_path,
                settings,
            )
            .await
    }
}
