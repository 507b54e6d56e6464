use std::collections::HashMap;
use std::time::Duration;

use genflow_core::node::NodeCategory;

use crate::models::default_chain;
use crate::timing::CategoryTiming;

/// Categories whose processors call the prediction provider.
const PROVIDER_CATEGORIES: [NodeCategory; 4] = [
    NodeCategory::Image,
    NodeCategory::Video,
    NodeCategory::Text,
    NodeCategory::Audio,
];

/// Timing and default model chain of one category.
#[derive(Debug, Clone, PartialEq)]
pub struct CategorySettings {
    pub timing: CategoryTiming,
    pub models: Vec<String>,
}

impl CategorySettings {
    pub fn defaults(category: NodeCategory) -> Self {
        Self {
            timing: CategoryTiming::for_category(category),
            models: default_chain(category),
        }
    }
}

/// Node processor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    categories: HashMap<NodeCategory, CategorySettings>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            categories: PROVIDER_CATEGORIES
                .into_iter()
                .map(|c| (c, CategorySettings::defaults(c)))
                .collect(),
        }
    }
}

impl PipelineConfig {
    /// Load overrides from environment variables.
    ///
    /// For each of `IMAGE`, `VIDEO`, `TEXT` and `AUDIO`:
    ///
    /// | Env Var                      | Default                     |
    /// |------------------------------|-----------------------------|
    /// | `<CAT>_POLL_INTERVAL_MS`     | 2000 / 5000 / 1000 / 2000   |
    /// | `<CAT>_POLL_MAX_ATTEMPTS`    | 90 / 360 / 120 / 150        |
    /// | `<CAT>_MODELS`               | built-in fallback chain     |
    ///
    /// `<CAT>_MODELS` is a comma-separated, ordered list of model names.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        for category in PROVIDER_CATEGORIES {
            let prefix = env_prefix(category);
            let settings = config.settings_mut(category);

            if let Ok(ms) = std::env::var(format!("{prefix}_POLL_INTERVAL_MS")) {
                let ms: u64 = ms
                    .parse()
                    .unwrap_or_else(|_| panic!("{prefix}_POLL_INTERVAL_MS must be a valid u64"));
                settings.timing.poll_interval = Duration::from_millis(ms);
            }
            if let Ok(attempts) = std::env::var(format!("{prefix}_POLL_MAX_ATTEMPTS")) {
                settings.timing.max_attempts = attempts
                    .parse()
                    .unwrap_or_else(|_| panic!("{prefix}_POLL_MAX_ATTEMPTS must be a valid u32"));
            }
            if let Ok(models) = std::env::var(format!("{prefix}_MODELS")) {
                let models: Vec<String> = models
                    .split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect();
                if !models.is_empty() {
                    settings.models = models;
                }
            }
        }
        config
    }

    pub fn settings(&self, category: NodeCategory) -> CategorySettings {
        self.categories
            .get(&category)
            .cloned()
            .unwrap_or_else(|| CategorySettings::defaults(category))
    }

    /// Replace the settings of one category.
    pub fn with_settings(mut self, category: NodeCategory, settings: CategorySettings) -> Self {
        self.categories.insert(category, settings);
        self
    }

    fn settings_mut(&mut self, category: NodeCategory) -> &mut CategorySettings {
        self.categories
            .entry(category)
            .or_insert_with(|| CategorySettings::defaults(category))
    }
}

fn env_prefix(category: NodeCategory) -> &'static str {
    match category {
        NodeCategory::Orchestration => "ORCHESTRATION",
        NodeCategory::Image => "IMAGE",
        NodeCategory::Video => "VIDEO",
        NodeCategory::Text => "TEXT",
        NodeCategory::Audio => "AUDIO",
    }
}
