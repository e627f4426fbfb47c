use {
    clap::{Args, Parser},
    serde::Deserialize,
    std::path::Path,
    thiserror::Error,
};

#[derive(PartialEq, Debug, Clone)]
pub struct Config {
    pub paths: Paths,
    pub pool: Pool,
    pub timeouts: Timeouts,
}

#[derive(PartialEq, Debug, Clone)]
pub struct Paths {
    /// Base directory for relative workorder paths from the queue.
    pub repo_root: Box<Path>,
    pub maintenance_dir: Box<Path>,
    pub billing_state_dir: Box<Path>,
    pub runtime_dir: Box<Path>,
    pub secretstore: Box<Path>,
    pub fixtures_dir: Option<Box<Path>>,
    /// Repo-level price table consulted when the maintenance table has no
    /// effective row.
    pub repo_prices: Option<Box<Path>>,
    /// Template used to bootstrap missing billing-state tables.
    pub billing_template: Option<Box<Path>>,
}

#[derive(PartialEq, Debug, Clone)]
pub struct Pool {
    pub max_workers: u32,
}

#[derive(PartialEq, Debug, Clone)]
pub struct Timeouts {
    pub acquisition_secs: u64,
    pub transform_secs: u64,
    pub packaging_secs: u64,
    pub delivery_secs: u64,
}

#[derive(Deserialize, Parser, PartialEq, Debug, Clone, Default)]
pub struct OptionalConfig {
    #[command(flatten)]
    pub paths: Option<OptionalPaths>,
    #[command(flatten)]
    pub pool: Option<OptionalPool>,
    #[command(flatten)]
    pub timeouts: Option<OptionalTimeouts>,
}

#[derive(Deserialize, Args, PartialEq, Debug, Clone, Default)]
pub struct OptionalPaths {
    #[arg(long = "paths.repo-root", id = "paths.repo-root")]
    pub repo_root: Option<Box<Path>>,
    #[arg(long = "paths.maintenance-dir", id = "paths.maintenance-dir")]
    pub maintenance_dir: Option<Box<Path>>,
    #[arg(long = "paths.billing-state-dir", id = "paths.billing-state-dir")]
    pub billing_state_dir: Option<Box<Path>>,
    #[arg(long = "paths.runtime-dir", id = "paths.runtime-dir")]
    pub runtime_dir: Option<Box<Path>>,
    #[arg(long = "paths.secretstore", id = "paths.secretstore")]
    pub secretstore: Option<Box<Path>>,
    #[arg(long = "paths.fixtures-dir", id = "paths.fixtures-dir")]
    pub fixtures_dir: Option<Box<Path>>,
    #[arg(long = "paths.repo-prices", id = "paths.repo-prices")]
    pub repo_prices: Option<Box<Path>>,
    #[arg(long = "paths.billing-template", id = "paths.billing-template")]
    pub billing_template: Option<Box<Path>>,
}

#[derive(Deserialize, Args, PartialEq, Debug, Clone, Default)]
pub struct OptionalPool {
    #[arg(long = "pool.max-workers", id = "pool.max-workers")]
    pub max_workers: Option<u32>,
}

#[derive(Deserialize, Args, PartialEq, Debug, Clone, Default)]
pub struct OptionalTimeouts {
    #[arg(long = "timeouts.acquisition-secs", id = "timeouts.acquisition-secs")]
    pub acquisition_secs: Option<u64>,
    #[arg(long = "timeouts.transform-secs", id = "timeouts.transform-secs")]
    pub transform_secs: Option<u64>,
    #[arg(long = "timeouts.packaging-secs", id = "timeouts.packaging-secs")]
    pub packaging_secs: Option<u64>,
    #[arg(long = "timeouts.delivery-secs", id = "timeouts.delivery-secs")]
    pub delivery_secs: Option<u64>,
}

#[derive(Debug, Clone, Error)]
#[error("Missing field `{0}`")]
pub struct MissingField(&'static str);

impl TryFrom<OptionalConfig> for Config {
    type Error = MissingField;

    fn try_from(value: OptionalConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            paths: value.paths.ok_or(MissingField("paths"))?.try_into()?,
            pool: value.pool.ok_or(MissingField("pool"))?.try_into()?,
            timeouts: value.timeouts.ok_or(MissingField("timeouts"))?.try_into()?,
        })
    }
}

impl TryFrom<OptionalPaths> for Paths {
    type Error = MissingField;

    fn try_from(value: OptionalPaths) -> Result<Self, Self::Error> {
        Ok(Self {
            repo_root: value.repo_root.ok_or(MissingField("paths.repo-root"))?,
            maintenance_dir: value
                .maintenance_dir
                .ok_or(MissingField("paths.maintenance-dir"))?,
            billing_state_dir: value
                .billing_state_dir
                .ok_or(MissingField("paths.billing-state-dir"))?,
            runtime_dir: value.runtime_dir.ok_or(MissingField("paths.runtime-dir"))?,
            secretstore: value.secretstore.ok_or(MissingField("paths.secretstore"))?,
            fixtures_dir: value.fixtures_dir,
            repo_prices: value.repo_prices,
            billing_template: value.billing_template,
        })
    }
}

impl TryFrom<OptionalPool> for Pool {
    type Error = MissingField;

    fn try_from(value: OptionalPool) -> Result<Self, Self::Error> {
        Ok(Self {
            max_workers: value.max_workers.ok_or(MissingField("pool.max-workers"))?,
        })
    }
}

impl TryFrom<OptionalTimeouts> for Timeouts {
    type Error = MissingField;

    fn try_from(value: OptionalTimeouts) -> Result<Self, Self::Error> {
        Ok(Self {
            acquisition_secs: value
                .acquisition_secs
                .ok_or(MissingField("timeouts.acquisition-secs"))?,
            transform_secs: value
                .transform_secs
                .ok_or(MissingField("timeouts.transform-secs"))?,
            packaging_secs: value
                .packaging_secs
                .ok_or(MissingField("timeouts.packaging-secs"))?,
            delivery_secs: value
                .delivery_secs
                .ok_or(MissingField("timeouts.delivery-secs"))?,
        })
    }
}

impl OptionalConfig {
    pub fn apply(mut self, other: Self) -> Self {
        let Self {
            paths,
            pool,
            timeouts,
        } = other;

        self.paths = match (self.paths, paths) {
            (Some(ours), Some(theirs)) => Some(ours.apply(theirs)),
            (ours, theirs) => theirs.or(ours),
        };
        self.pool = match (self.pool, pool) {
            (Some(ours), Some(theirs)) => Some(ours.apply(theirs)),
            (ours, theirs) => theirs.or(ours),
        };
        self.timeouts = match (self.timeouts, timeouts) {
            (Some(ours), Some(theirs)) => Some(ours.apply(theirs)),
            (ours, theirs) => theirs.or(ours),
        };

        self
    }
}

impl OptionalPaths {
    pub fn apply(mut self, other: Self) -> Self {
        let Self {
            repo_root,
            maintenance_dir,
            billing_state_dir,
            runtime_dir,
            secretstore,
            fixtures_dir,
            repo_prices,
            billing_template,
        } = other;

        self.repo_root = repo_root.or(self.repo_root);
        self.maintenance_dir = maintenance_dir.or(self.maintenance_dir);
        self.billing_state_dir = billing_state_dir.or(self.billing_state_dir);
        self.runtime_dir = runtime_dir.or(self.runtime_dir);
        self.secretstore = secretstore.or(self.secretstore);
        self.fixtures_dir = fixtures_dir.or(self.fixtures_dir);
        self.repo_prices = repo_prices.or(self.repo_prices);
        self.billing_template = billing_template.or(self.billing_template);

        self
    }
}

impl OptionalPool {
    pub fn apply(mut self, other: Self) -> Self {
        let Self { max_workers } = other;

        self.max_workers = max_workers.or(self.max_workers);

        self
    }
}

impl OptionalTimeouts {
    pub fn apply(mut self, other: Self) -> Self {
        let Self {
            acquisition_secs,
            transform_secs,
            packaging_secs,
            delivery_secs,
        } = other;

        self.acquisition_secs = acquisition_secs.or(self.acquisition_secs);
        self.transform_secs = transform_secs.or(self.transform_secs);
        self.packaging_secs = packaging_secs.or(self.packaging_secs);
        self.delivery_secs = delivery_secs.or(self.delivery_secs);

        self
    }
}
