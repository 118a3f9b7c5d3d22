//! One-time initialization of the enforcement service.
//!
//! # Purpose
//! Guarantees the adapter is bound and the service recorded at most once per
//! provider, no matter how many tasks initialize concurrently, while every
//! initialization call still produces a freshly loaded default enforcer.
//!
//! # Lifecycle
//! `Uninitialized -> Initialized`, terminal. A failed guarded body leaves the
//! provider uninitialized; the next call runs it again.
//!
//! # How it fits
//! Applications normally own an [`EnforcerProvider`] at their composition root.
//! The free functions at the bottom of this module drive a process-wide
//! instance for callers that need a global entry point.
use crate::adapter::{PgPolicyAdapter, RuleTable};
use crate::connection::{ConnectionDescriptor, PoolSettings, StoreSource};
use crate::errors::{ProviderError, ProviderResult};
use crate::service::{CasbinService, EnforcerService, SharedEnforcer};
use casbin::Adapter;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{Instrument, Span};

static PROVIDER: EnforcerProvider<PgPolicyAdapter> = EnforcerProvider::new();

pub struct EnforcerProvider<A = PgPolicyAdapter> {
    service: OnceCell<CasbinService<A>>,
}

impl<A> EnforcerProvider<A> {
    pub const fn new() -> Self {
        Self {
            service: OnceCell::const_new(),
        }
    }

    /// The recorded service, or `None` before the first successful initialization.
    pub fn service(&self) -> Option<&CasbinService<A>> {
        self.service.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.service.initialized()
    }
}

impl<A> Default for EnforcerProvider<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> EnforcerProvider<A>
where
    A: Adapter + Clone + 'static,
{
    /// Record the service on first use, then build, load and record a default enforcer.
    ///
    /// `bind` runs at most once across all callers; later calls reuse the
    /// recorded adapter, logger and model path and ignore their own.
    ///
    /// # Errors
    /// - `Configuration` for an empty model path (checked before `bind`).
    /// - Whatever `bind` returns.
    /// - `Model` / `Load` from building the default enforcer.
    pub async fn initialize<F, Fut>(
        &self,
        logger: Span,
        model_path: &Path,
        bind: F,
    ) -> ProviderResult<SharedEnforcer>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProviderResult<A>>,
    {
        if model_path.as_os_str().is_empty() {
            return Err(ProviderError::config("missing model definition path"));
        }

        let service = self
            .service
            .get_or_try_init(|| async move {
                let adapter = bind().instrument(logger.clone()).await?;
                Ok::<_, ProviderError>(CasbinService::new(adapter, logger, model_path))
            })
            .await?;

        let enforcer = service.new_enforcer().await?;
        let shared = Arc::new(tokio::sync::RwLock::new(enforcer));
        service.set_default_enforcer(Arc::clone(&shared));
        Ok(shared)
    }
}

impl EnforcerProvider<PgPolicyAdapter> {
    /// Initialize from an already established store connection, targeting the
    /// default rule table.
    pub async fn init_and_get_enforcer(
        &self,
        source: impl Into<StoreSource>,
        logger: Span,
        model_path: &Path,
        settings: PoolSettings,
    ) -> ProviderResult<SharedEnforcer> {
        let source = source.into();
        self.initialize(logger, model_path, || async move {
            tracing::info!(target_db = %source.redacted(), "initializing casbin postgres adapter");
            PgPolicyAdapter::from_source(source, settings).await
        })
        .await
    }

    /// Initialize from a connection descriptor and an optional rule table name.
    ///
    /// The descriptor and table name are validated on every call. The store
    /// handle is opened only by the guarded body and released before it
    /// returns, on success and on failure.
    pub async fn init_and_get_enforcer_with_custom_db(
        &self,
        db_conn: &str,
        rule_table: &str,
        logger: Span,
        model_path: &Path,
        settings: PoolSettings,
    ) -> ProviderResult<SharedEnforcer> {
        let descriptor = ConnectionDescriptor::parse(db_conn)?;
        let table = RuleTable::new(rule_table)?;
        self.initialize(logger, model_path, || async move {
            tracing::info!(
                target_db = %descriptor.redacted(),
                table = %table,
                "initializing casbin postgres adapter with custom db and table"
            );
            let mut handle = descriptor.open().await?;
            let bound = PgPolicyAdapter::bind(&mut handle, table, settings).await;
            let released = handle.release().await;
            match (bound, released) {
                (Ok(adapter), Ok(())) => Ok(adapter),
                (Ok(_), Err(err)) => Err(err),
                (Err(err), Ok(())) => Err(err),
                (Err(err), Err(release_err)) => {
                    tracing::warn!(error = %release_err, "store handle release failed");
                    Err(err)
                }
            }
        })
        .await
    }
}

/// Process-wide provider behind the free functions below.
pub fn global() -> &'static EnforcerProvider<PgPolicyAdapter> {
    &PROVIDER
}

/// Initialize the process-wide service from a store connection (default table).
pub async fn init_and_get_enforcer(
    source: impl Into<StoreSource>,
    logger: Span,
    model_path: impl AsRef<Path>,
) -> ProviderResult<SharedEnforcer> {
    PROVIDER
        .init_and_get_enforcer(
            source,
            logger,
            model_path.as_ref(),
            PoolSettings::default(),
        )
        .await
}

/// Initialize the process-wide service from a descriptor and rule table.
pub async fn init_and_get_enforcer_with_custom_db(
    db_conn: &str,
    rule_table: &str,
    logger: Span,
    model_path: impl AsRef<Path>,
) -> ProviderResult<SharedEnforcer> {
    PROVIDER
        .init_and_get_enforcer_with_custom_db(
            db_conn,
            rule_table,
            logger,
            model_path.as_ref(),
            PoolSettings::default(),
        )
        .await
}

/// The process-wide service, or `None` if no initialization has succeeded.
pub fn get_service() -> Option<&'static CasbinService<PgPolicyAdapter>> {
    PROVIDER.service()
}
