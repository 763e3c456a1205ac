use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyConfig {
    pub limits: LimitsConfig,
    pub concurrency: ConcurrencyConfig,
    /// Resolve unknown `has_children` flags before nodes are returned
    pub determine_children: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of rows a single hierarchy level may produce; `None` is unlimited
    pub size_limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Child requests for hidden nodes running at the same time
    pub hidden_levels: usize,
    /// First-child requests resolving `has_children` running at the same time
    pub children_checks: usize,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            limits: LimitsConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            determine_children: true,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { size_limit: Some(1000) }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            hidden_levels: 4,
            children_checks: 8,
        }
    }
}

impl HierarchyConfig {
    /// Load configuration from environment variables and config file
    pub fn load() -> anyhow::Result<Self> {
        // Load environment variables from .env file if it exists
        dotenvy::dotenv().ok();

        let mut config = config::Config::builder();

        // Add default configuration
        config = config.add_source(config::Config::try_from(&HierarchyConfig::default())?);

        // Add config file if it exists
        config = config.add_source(config::File::with_name("hierarchy").required(false));

        // Add environment variables with prefix "HIERARCHY", e.g. HIERARCHY_LIMITS__SIZE_LIMIT
        config = config.add_source(
            config::Environment::with_prefix("HIERARCHY")
                .separator("__")
                .prefix_separator("_")
                .try_parsing(true),
        );

        let config = config.build()?;
        let hierarchy_config: HierarchyConfig = config.try_deserialize()?;

        Ok(hierarchy_config.normalized())
    }

    /// Row ceiling for a request, preferring the request's own limit
    pub fn effective_size_limit(&self, requested: Option<usize>) -> Option<usize> {
        requested.or(self.limits.size_limit)
    }

    pub fn unlimited() -> Self {
        Self {
            limits: LimitsConfig { size_limit: None },
            ..Self::default()
        }
    }

    /// Zero concurrency would stall the pipeline
    pub(crate) fn normalized(mut self) -> Self {
        self.concurrency.hidden_levels = self.concurrency.hidden_levels.max(1);
        self.concurrency.children_checks = self.concurrency.children_checks.max(1);
        self
    }
}
