use serde::Deserialize;

/// Recognized environment options for the engine (§6.3 of the operation
/// surface this crate implements). Loaded with the `config` crate layered
/// over hard-coded defaults, with an optional local `.env` read by
/// `dotenvy` before the environment is sampled.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub commission: f64,
    pub cash_asset: String,
    pub min_settle: f64,
    pub max_settle: f64,
    pub sigma_fill: f64,
    pub tick_period: u64,
    pub prune_period: u64,
    pub audit_period: u64,
    pub stale_age: u64,
    pub expire_age: u64,
    pub store_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commission: 0.0,
            cash_asset: "USDT".to_string(),
            min_settle: 1.0,
            max_settle: 5.0,
            sigma_fill: 0.1,
            tick_period: 1,
            prune_period: 60,
            audit_period: 30,
            stale_age: 24 * 3600,
            expire_age: 3600,
            store_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment, falling back to
    /// defaults for anything unset. Mirrors the teacher's `AppConfig::load`
    /// env-var-driven construction, minus the Postgres/JWT/blockchain
    /// sections this crate has no use for.
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let d = EngineConfig::default();
        let settings = config::Config::builder()
            .set_default("commission", d.commission)?
            .set_default("cash_asset", d.cash_asset)?
            .set_default("min_settle", d.min_settle)?
            .set_default("max_settle", d.max_settle)?
            .set_default("sigma_fill", d.sigma_fill)?
            .set_default("tick_period", d.tick_period)?
            .set_default("prune_period", d.prune_period)?
            .set_default("audit_period", d.audit_period)?
            .set_default("stale_age", d.stale_age)?
            .set_default("expire_age", d.expire_age)?
            .set_default("store_url", d.store_url)?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
