//! Casbin enforcer construction and policy loading.
//!
//! # Purpose
//! Builds fresh enforcers bound to a model definition file and a policy adapter,
//! then fills their in-memory rule set from the adapter.
//!
//! # Key invariants
//! - An enforcer is tied to exactly one adapter and one model path for its
//!   lifetime; changing either means building a new enforcer.
//! - Construction never loads policy; loading is an explicit second step so a
//!   filtered load never pays for a full one first.
use crate::errors::{ProviderError, ProviderResult};
use crate::filter::PolicyFilter;
use casbin::{Adapter, CoreApi, DefaultModel, Enforcer};
use std::path::Path;

/// Build an enforcer from a model definition file and an adapter.
///
/// # Errors
/// - `Configuration` for an empty model path.
/// - `Model` when the model file cannot be read or parsed, or the engine
///   rejects the adapter binding.
pub async fn build_enforcer<A>(adapter: A, model_path: &Path) -> ProviderResult<Enforcer>
where
    A: Adapter + 'static,
{
    if model_path.as_os_str().is_empty() {
        return Err(ProviderError::config("missing model definition path"));
    }
    tracing::info!(model = %model_path.display(), "initializing casbin enforcer");
    let model_error = |source| ProviderError::Model {
        path: model_path.to_path_buf(),
        source,
    };
    let model = DefaultModel::from_file(model_path)
        .await
        .map_err(model_error)?;
    let enforcer = Enforcer::new_raw(model, adapter)
        .await
        .map_err(model_error)?;
    metrics::counter!("gatehouse_enforcers_built_total").increment(1);
    Ok(enforcer)
}

/// Replace the enforcer's rules with everything the adapter holds.
///
/// # Errors
/// - `Load` when the adapter fails to fetch rules or role links cannot be built.
pub async fn load_policy(mut enforcer: Enforcer) -> ProviderResult<Enforcer> {
    tracing::info!(filtered = false, "loading policy from database");
    let outcome = enforcer.load_policy().await;
    record_load(false, outcome.is_ok());
    outcome.map_err(ProviderError::Load)?;
    Ok(enforcer)
}

/// Replace the enforcer's rules with the subset matching `filter`.
///
/// # Errors
/// - `Load` when the adapter fails to fetch rules.
pub async fn load_filtered_policy(
    mut enforcer: Enforcer,
    filter: &PolicyFilter,
) -> ProviderResult<Enforcer> {
    tracing::info!(filtered = true, "loading policy from database");
    let outcome = enforcer.load_filtered_policy(filter.as_casbin()).await;
    record_load(true, outcome.is_ok());
    outcome.map_err(ProviderError::Load)?;
    Ok(enforcer)
}

fn record_load(filtered: bool, ok: bool) {
    metrics::counter!(
        "gatehouse_policy_loads_total",
        "filtered" => if filtered { "true" } else { "false" },
        "outcome" => if ok { "ok" } else { "error" }
    )
    .increment(1);
}
