//! Enforcement service holding the bound adapter and the default enforcer.
//!
//! # Purpose
//! Owns everything recorded by the first initialization (adapter, logging span,
//! model path) and hands out freshly loaded enforcers on demand.
//!
//! # Concurrency
//! - The default-enforcer slot sits behind an `RwLock`; concurrent
//!   initializations each store their own enforcer and the last write wins.
//! - Returned enforcers are independent; mutating one never affects another.
use crate::adapter::PgPolicyAdapter;
use crate::errors::ProviderResult;
use crate::factory::{build_enforcer, load_filtered_policy, load_policy};
use crate::filter::PolicyFilter;
use async_trait::async_trait;
use casbin::{Adapter, Enforcer};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{Instrument, Span};

/// Enforcer shared between the service and its callers.
pub type SharedEnforcer = Arc<tokio::sync::RwLock<Enforcer>>;

/// Operations available once a provider has been initialized.
#[async_trait]
pub trait EnforcerService: Send + Sync {
    /// Enforcer recorded by the most recent initialization, if any.
    fn default_enforcer(&self) -> Option<SharedEnforcer>;

    /// Build and fully load a new enforcer. The default is left untouched.
    async fn new_enforcer(&self) -> ProviderResult<Enforcer>;

    /// Build a new enforcer holding only the rules matching `filter`.
    async fn new_filtered_enforcer(&self, filter: PolicyFilter) -> ProviderResult<Enforcer>;
}

/// The enforcement service recorded by the first successful initialization.
///
/// # Invariants
/// - Adapter, logger and model path are fixed for the service's lifetime.
/// - Every enforcer it builds is loaded through a clone of the same adapter.
///
/// # Example
/// ```rust,no_run
/// use gatehouse_authz::{EnforcerService, PolicyFilter, provider};
///
/// # async fn run() -> gatehouse_authz::ProviderResult<()> {
/// if let Some(service) = provider::get_service() {
///     let tenant_a = service
///         .new_filtered_enforcer(PolicyFilter::new().with_policy(["", "tenant-a"]))
///         .await?;
///     drop(tenant_a);
/// }
/// # Ok(())
/// # }
/// ```
pub struct CasbinService<A = PgPolicyAdapter> {
    adapter: A,
    logger: Span,
    model_path: PathBuf,
    default_enforcer: RwLock<Option<SharedEnforcer>>,
}

impl<A> CasbinService<A>
where
    A: Adapter + Clone + 'static,
{
    /// Record an already bound adapter. Events from later loads are emitted
    /// inside `logger`.
    pub fn new(adapter: A, logger: Span, model_path: impl Into<PathBuf>) -> Self {
        Self {
            adapter,
            logger,
            model_path: model_path.into(),
            default_enforcer: RwLock::new(None),
        }
    }

    /// Adapter shared by every enforcer this service builds.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn logger(&self) -> &Span {
        &self.logger
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub(crate) fn set_default_enforcer(&self, enforcer: SharedEnforcer) {
        let mut slot = self
            .default_enforcer
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(enforcer);
    }

    async fn load(&self, filter: Option<&PolicyFilter>) -> ProviderResult<Enforcer> {
        async {
            let enforcer = build_enforcer(self.adapter.clone(), &self.model_path).await?;
            match filter {
                Some(filter) => load_filtered_policy(enforcer, filter).await,
                None => load_policy(enforcer).await,
            }
        }
        .instrument(self.logger.clone())
        .await
    }
}

#[async_trait]
impl<A> EnforcerService for CasbinService<A>
where
    A: Adapter + Clone + 'static,
{
    fn default_enforcer(&self) -> Option<SharedEnforcer> {
        self.default_enforcer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn new_enforcer(&self) -> ProviderResult<Enforcer> {
        self.load(None).await
    }

    async fn new_filtered_enforcer(&self, filter: PolicyFilter) -> ProviderResult<Enforcer> {
        self.load(Some(&filter)).await
    }
}
