/// ModelSpec describes one model a provider can serve: its context limits,
/// per-token prices, and capability flags that steer request assembly.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ModelSpec {
    pub litellm_model: String,
    pub max_input_tokens: u32,
    pub max_output_tokens: u32,
    pub input_cost_per_token: f64,
    pub output_cost_per_token: f64,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default)]
    pub supports_response_schema: bool,
}

/// ProviderConfig is one configured LLM provider: its catalog of available
/// models, the subset an administrator enabled, and its credential.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub display_name: String,
    pub litellm_provider: String,
    pub base_url: String,
    pub litellm_models_available: Vec<ModelSpec>,
    pub litellm_models_enabled: Vec<String>,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Registry is the resolved set of providers, injected into handlers and
/// workers through the application context.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    pub providers: Vec<ProviderConfig>,
}

impl Registry {
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        Self { providers }
    }

    /// Resolve a model name to its provider and spec. Only enabled models of
    /// enabled providers resolve; everything else is an invalid model.
    pub fn find_model(&self, model: &str) -> Option<(&ProviderConfig, &ModelSpec)> {
        for provider in self.providers.iter().filter(|p| p.enabled) {
            if !provider.litellm_models_enabled.iter().any(|m| m == model) {
                continue;
            }
            if let Some(spec) = provider
                .litellm_models_available
                .iter()
                .find(|spec| spec.litellm_model == model)
            {
                return Some((provider, spec));
            }
        }
        None
    }

    /// The union of enabled model names across enabled providers.
    pub fn enabled_models(&self) -> Vec<&ModelSpec> {
        self.providers
            .iter()
            .filter(|p| p.enabled)
            .flat_map(|p| {
                p.litellm_models_available
                    .iter()
                    .filter(|spec| p.litellm_models_enabled.contains(&spec.litellm_model))
            })
            .collect()
    }
}

fn spec(
    model: &str,
    max_input: u32,
    max_output: u32,
    input_per_m: f64,
    output_per_m: f64,
    vision: bool,
    schema: bool,
) -> ModelSpec {
    ModelSpec {
        litellm_model: model.to_string(),
        max_input_tokens: max_input,
        max_output_tokens: max_output,
        input_cost_per_token: input_per_m / 1e6,
        output_cost_per_token: output_per_m / 1e6,
        supports_vision: vision,
        supports_response_schema: schema,
    }
}

/// The catalog seeded into `llm_providers` when the table is empty.
/// Administrators enable providers and models from here.
pub fn default_catalog() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            name: "openai".to_string(),
            display_name: "OpenAI".to_string(),
            litellm_provider: "openai".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            litellm_models_available: vec![
                spec("gpt-4o-mini", 128_000, 16_384, 0.15, 0.60, true, true),
                spec("gpt-4o", 128_000, 16_384, 2.50, 10.00, true, true),
            ],
            litellm_models_enabled: vec!["gpt-4o-mini".to_string()],
            enabled: true,
            token: None,
            token_created_at: None,
        },
        ProviderConfig {
            name: "anthropic".to_string(),
            display_name: "Anthropic".to_string(),
            litellm_provider: "anthropic".to_string(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            litellm_models_available: vec![
                spec(
                    "claude-3-5-sonnet-20241022",
                    200_000,
                    8_192,
                    3.00,
                    15.00,
                    true,
                    false,
                ),
                spec(
                    "claude-3-5-haiku-20241022",
                    200_000,
                    8_192,
                    0.80,
                    4.00,
                    false,
                    false,
                ),
            ],
            litellm_models_enabled: vec![],
            enabled: false,
            token: None,
            token_created_at: None,
        },
        ProviderConfig {
            name: "gemini".to_string(),
            display_name: "Gemini".to_string(),
            litellm_provider: "gemini".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            litellm_models_available: vec![spec(
                "gemini-2.0-flash",
                1_048_576,
                8_192,
                0.10,
                0.40,
                true,
                true,
            )],
            litellm_models_enabled: vec![],
            enabled: false,
            token: None,
            token_created_at: None,
        },
    ]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_model_resolution_requires_enablement() {
        let registry = Registry::new(default_catalog());

        let (provider, spec) = registry.find_model("gpt-4o-mini").unwrap();
        assert_eq!(provider.name, "openai");
        assert!(spec.supports_response_schema);

        // Available but not enabled.
        assert!(registry.find_model("gpt-4o").is_none());
        // Provider disabled entirely.
        assert!(registry.find_model("claude-3-5-sonnet-20241022").is_none());
        // Unknown model.
        assert!(registry.find_model("made-up-model").is_none());
    }

    #[test]
    fn test_enabled_models_union() {
        let mut catalog = default_catalog();
        catalog[0]
            .litellm_models_enabled
            .push("gpt-4o".to_string());
        catalog[1].enabled = true;
        catalog[1]
            .litellm_models_enabled
            .push("claude-3-5-haiku-20241022".to_string());

        let registry = Registry::new(catalog);
        let names: Vec<&str> = registry
            .enabled_models()
            .iter()
            .map(|m| m.litellm_model.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["gpt-4o-mini", "gpt-4o", "claude-3-5-haiku-20241022"]
        );
    }

    #[test]
    fn test_catalog_prices_are_per_token() {
        let registry = Registry::new(default_catalog());
        let (_, spec) = registry.find_model("gpt-4o-mini").unwrap();
        assert!((spec.input_cost_per_token - 1.5e-7).abs() < 1e-12);
        assert!((spec.output_cost_per_token - 6e-7).abs() < 1e-12);
    }
}
