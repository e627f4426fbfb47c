//! Binary wiring: layered configuration in, exit code out.
//!
//! Exit codes: `0` success, `2` preflight or validation failure in any
//! workorder, `1` uncaught infrastructure errors. Module implementations
//! are registered by the embedder through [`run_with_modules`]; the stock
//! binary ships the interface only.

use {
    ordo_app::{
        CancelToken, Context, EngineConfig, KindTimeouts, ModuleTable, NoopPublisher,
        Orchestrator, Stores,
        executor::QueueSummary,
        queue::{self, WORKORDERS_INDEX_FILE},
    },
    ordo_catalog::{ModuleRegistry, PlatformPolicy, PriceBook, ReasonCatalog, SecretStore},
    ordo_cli_args::{
        Config, DefaultLayer, OptionalConfig, OptionalPaths, OptionalPool, OptionalTimeouts,
    },
    ordo_ledger::{CacheIndex, Ledger},
    ordo_runstate::RunStateStore,
    ordo_shared::{error::Result, time::UtcClock},
    std::{path::Path, sync::Arc, time::Duration},
};

pub fn default_layer() -> DefaultLayer {
    DefaultLayer::new(OptionalConfig {
        paths: Some(OptionalPaths {
            repo_root: Some(Path::new(".").into()),
            maintenance_dir: Some(Path::new("maintenance-state").into()),
            billing_state_dir: Some(Path::new(".billing-state").into()),
            runtime_dir: Some(Path::new("runtime").into()),
            secretstore: Some(Path::new("secretstore.json").into()),
            fixtures_dir: None,
            repo_prices: None,
            billing_template: None,
        }),
        pool: Some(OptionalPool {
            max_workers: Some(4),
        }),
        timeouts: Some(OptionalTimeouts {
            acquisition_secs: Some(120),
            transform_secs: Some(60),
            packaging_secs: Some(300),
            delivery_secs: Some(600),
        }),
    })
}

pub async fn run(config: Config) -> i32 {
    run_with_modules(config, ModuleTable::default()).await
}

pub async fn run_with_modules(config: Config, modules: ModuleTable) -> i32 {
    match try_run(config, modules).await {
        Ok(summary) => {
            if summary.any_validation_failures() {
                2
            } else if summary.any_infra_failures() {
                1
            } else {
                0
            }
        }
        Err(e) => {
            tracing::error!("orchestrator failed to start: {e}");
            1
        }
    }
}

async fn try_run(config: Config, modules: ModuleTable) -> Result<QueueSummary> {
    let paths = &config.paths;
    let ctx = Context {
        registry: ModuleRegistry::load(&paths.maintenance_dir)?,
        prices: PriceBook::load(
            &paths.maintenance_dir.join("module_prices.csv"),
            paths.repo_prices.as_deref(),
        )?,
        reasons: ReasonCatalog::load(&paths.maintenance_dir)?,
        secrets: SecretStore::load(&paths.secretstore)?,
        policy: PlatformPolicy::load(&paths.maintenance_dir)?,
    };
    let stores = Stores {
        ledger: Ledger::open(&*paths.billing_state_dir, paths.billing_template.as_deref())?,
        run_state: RunStateStore::open(&*paths.billing_state_dir)?,
        cache: CacheIndex::open(&paths.billing_state_dir)?,
    };
    let engine_config = EngineConfig {
        repo_root: paths.repo_root.to_path_buf(),
        billing_state_dir: paths.billing_state_dir.to_path_buf(),
        runtime_dir: paths.runtime_dir.to_path_buf(),
        fixtures_dir: paths.fixtures_dir.as_ref().map(|p| p.to_path_buf()),
        max_workers: config.pool.max_workers as usize,
        timeouts: KindTimeouts {
            acquisition: Duration::from_secs(config.timeouts.acquisition_secs),
            transform: Duration::from_secs(config.timeouts.transform_secs),
            packaging: Duration::from_secs(config.timeouts.packaging_secs),
            delivery: Duration::from_secs(config.timeouts.delivery_secs),
        },
    };

    let entries = queue::load_queue(&paths.maintenance_dir.join(WORKORDERS_INDEX_FILE))?;
    let orchestrator = Arc::new(Orchestrator::new(
        ctx,
        modules,
        Arc::new(NoopPublisher),
        Arc::new(UtcClock),
        engine_config,
        stores,
    ));
    Ok(orchestrator.run_queue(entries, CancelToken::none()).await)
}
