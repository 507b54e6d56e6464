//! Model fallback chains.
//!
//! A node may pin one model (`"model": "owner/name"`) or an ordered list
//! (`"models": [...]`). Otherwise the category's default chain applies.
//! Models are tried in order until one succeeds.

use genflow_core::node::NodeCategory;

/// Node data keys that select models rather than feed the provider.
pub const MODEL_KEYS: [&str; 2] = ["model", "models"];

/// Built-in chain for a category.
pub fn default_chain(category: NodeCategory) -> Vec<String> {
    let models: &[&str] = match category {
        NodeCategory::Image => &["black-forest-labs/flux-schnell", "stability-ai/sdxl"],
        NodeCategory::Video => &["minimax/video-01", "luma/ray"],
        NodeCategory::Text => &["meta/meta-llama-3-8b-instruct"],
        NodeCategory::Audio => &["suno-ai/bark"],
        NodeCategory::Orchestration => &[],
    };
    models.iter().map(|m| m.to_string()).collect()
}

/// The chain to try for a node: node data overrides first, then `defaults`.
///
/// Blank entries are dropped and duplicates keep their first position.
pub fn resolve_chain(node_data: &serde_json::Value, defaults: &[String]) -> Vec<String> {
    let requested: Vec<String> = match (node_data.get("models"), node_data.get("model")) {
        (Some(serde_json::Value::Array(list)), _) if !list.is_empty() => list
            .iter()
            .filter_map(|m| m.as_str().map(str::to_string))
            .collect(),
        (_, Some(serde_json::Value::String(model))) => vec![model.clone()],
        _ => defaults.to_vec(),
    };

    let mut chain: Vec<String> = Vec::with_capacity(requested.len());
    for model in requested {
        let model = model.trim().to_string();
        if !model.is_empty() && !chain.contains(&model) {
            chain.push(model);
        }
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Vec<String> {
        default_chain(NodeCategory::Image)
    }

    #[test]
    fn falls_back_to_category_defaults() {
        let chain = resolve_chain(&serde_json::json!({"prompt": "x"}), &defaults());
        assert_eq!(chain, defaults());
    }

    #[test]
    fn single_model_overrides_defaults() {
        let chain = resolve_chain(&serde_json::json!({"model": "acme/painter"}), &defaults());
        assert_eq!(chain, vec!["acme/painter"]);
    }

    #[test]
    fn model_list_wins_over_single_model() {
        let data = serde_json::json!({
            "model": "acme/ignored",
            "models": ["acme/first", " ", "acme/second", "acme/first"],
        });
        assert_eq!(resolve_chain(&data, &defaults()), vec!["acme/first", "acme/second"]);
    }

    #[test]
    fn orchestration_has_no_models() {
        assert!(default_chain(NodeCategory::Orchestration).is_empty());
    }
}
