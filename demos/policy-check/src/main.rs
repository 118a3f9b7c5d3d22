// Policy check demo: loads the shared enforcer from Postgres and evaluates one request.
use anyhow::{Context, Result};
use casbin::CoreApi;
use clap::Parser;
use gatehouse::EnforcerService;
use gatehouse::config::ProviderConfig;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "policy-check")]
#[command(about = "Evaluate one authorization request against the stored policy")]
struct Args {
    /// Subject (user or role)
    #[arg(long)]
    sub: String,

    /// Domain / tenant
    #[arg(long, default_value = "default")]
    dom: String,

    /// Object path
    #[arg(long)]
    obj: String,

    /// Action
    #[arg(long, default_value = "read")]
    act: String,

    /// Rule table; overrides GATEHOUSE_RULE_TABLE
    #[arg(long, env = "GATEHOUSE_RULE_TABLE")]
    table: Option<String>,

    /// Load only rules for the requested domain
    #[arg(long)]
    filtered: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    gatehouse::observability::init_tracing();
    let args = Args::parse();

    let mut config = ProviderConfig::from_env_or_yaml().context("load gatehouse config")?;
    if let Some(table) = args.table {
        config.rule_table = table;
    }

    let span = tracing::info_span!("policy-check", table = %config.rule_table);
    let default = gatehouse::fatal::bootstrap_or_exit(&config, span.clone()).await;

    let allowed = if args.filtered {
        let service = gatehouse::get_service().context("provider not initialized")?;
        let filter = gatehouse::PolicyFilter::new()
            .with_policy(["", args.dom.as_str()])
            .with_grouping(["", "", args.dom.as_str()]);
        let enforcer = gatehouse::fatal::exit_on_error(
            &span,
            service.new_filtered_enforcer(filter).await,
        );
        enforcer.enforce((&args.sub, &args.dom, &args.obj, &args.act))?
    } else {
        default
            .read()
            .await
            .enforce((&args.sub, &args.dom, &args.obj, &args.act))?
    };

    info!(
        sub = %args.sub,
        dom = %args.dom,
        obj = %args.obj,
        act = %args.act,
        allowed,
        "policy evaluated"
    );
    println!("{}", if allowed { "allow" } else { "deny" });
    Ok(())
}
