//! Capability registry: the static lookup table of `(provider, model)` offerings.
//!
//! The registry is built once at startup from the built-in catalog plus any
//! configured entries and is immutable afterwards. It is shared as
//! `Arc<CapabilityRegistry>` and read without locks from any number of requests.

use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::error::GatewayError;
use crate::llm::models::{ModelEntry, BUILTIN_MODELS};
use crate::llm::traits::ProviderType;
use crate::types::{Capability, ModelId};

static BUILTIN_REGISTRY: Lazy<Arc<CapabilityRegistry>> = Lazy::new(|| {
    let registry = CapabilityRegistry::from_entries(BUILTIN_MODELS.iter().cloned())
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Built-in model catalog is invalid; registry is empty");
            CapabilityRegistry::empty()
        });
    Arc::new(registry)
});

/// Registered metadata for one `(provider, model)` pair
#[derive(Debug, Clone)]
pub struct RegisteredModel {
    pub provider: ProviderType,
    pub model: ModelId,
    pub capabilities: HashSet<Capability>,
    pub context_window: u32,
    pub max_output_tokens: u32,
}

/// Immutable map from `(provider, model)` to capabilities
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    entries: HashMap<(ProviderType, ModelId), RegisteredModel>,
    defaults: HashMap<ModelId, ProviderType>,
}

impl CapabilityRegistry {
    fn empty() -> Self {
        Self::default()
    }

    /// Shared registry over the built-in catalog
    pub fn builtin() -> Arc<CapabilityRegistry> {
        Arc::clone(&BUILTIN_REGISTRY)
    }

    /// Build the registry from catalog entries
    ///
    /// Fails on duplicate `(provider, model)` pairs and on models with more than
    /// one entry flagged as default.
    pub fn from_entries<I>(entries: I) -> Result<Self, GatewayError>
    where
        I: IntoIterator<Item = ModelEntry>,
    {
        let mut registered = HashMap::new();
        let mut hosts: BTreeMap<ModelId, Vec<ProviderType>> = BTreeMap::new();
        let mut flagged: HashMap<ModelId, ProviderType> = HashMap::new();

        for entry in entries {
            let key = (entry.provider, entry.model.clone());
            if registered.contains_key(&key) {
                return Err(GatewayError::configuration(format!(
                    "Model '{}' is registered twice for provider {}",
                    entry.model, entry.provider
                )));
            }
            if entry.default {
                if let Some(existing) = flagged.insert(entry.model.clone(), entry.provider) {
                    return Err(GatewayError::configuration(format!(
                        "Model '{}' has two default providers ({} and {})",
                        entry.model, existing, entry.provider
                    )));
                }
            }
            hosts
                .entry(entry.model.clone())
                .or_default()
                .push(entry.provider);
            registered.insert(
                key,
                RegisteredModel {
                    provider: entry.provider,
                    model: entry.model,
                    capabilities: entry.capabilities.into_iter().collect(),
                    context_window: entry.context_window,
                    max_output_tokens: entry.max_output_tokens,
                },
            );
        }

        // Default provider: the flagged entry, else the sole host
        let mut defaults = HashMap::new();
        for (model, providers) in hosts {
            if let Some(provider) = flagged.get(&model) {
                defaults.insert(model, *provider);
            } else if providers.len() == 1 {
                defaults.insert(model, providers[0]);
            }
        }

        tracing::debug!(
            models = registered.len(),
            defaults = defaults.len(),
            "Capability registry built"
        );

        Ok(Self {
            entries: registered,
            defaults,
        })
    }

    /// Built-in catalog extended with extra entries
    pub fn builtin_with(extra: &[ModelEntry]) -> Result<Self, GatewayError> {
        Self::from_entries(BUILTIN_MODELS.iter().cloned().chain(extra.iter().cloned()))
    }

    /// Metadata for a registered pair
    pub fn entry(
        &self,
        provider: ProviderType,
        model: &ModelId,
    ) -> Result<&RegisteredModel, GatewayError> {
        self.entries
            .get(&(provider, model.clone()))
            .ok_or_else(|| GatewayError::UnknownModel {
                provider: Some(provider),
                model: model.to_string(),
            })
    }

    /// Capability set of a registered pair
    pub fn capabilities_of(
        &self,
        provider: ProviderType,
        model: &ModelId,
    ) -> Result<&HashSet<Capability>, GatewayError> {
        self.entry(provider, model).map(|e| &e.capabilities)
    }

    /// Whether a registered pair supports `capability`
    pub fn supports(
        &self,
        provider: ProviderType,
        model: &ModelId,
        capability: Capability,
    ) -> Result<bool, GatewayError> {
        self.capabilities_of(provider, model)
            .map(|caps| caps.contains(&capability))
    }

    /// Whether any provider registers `model`
    pub fn is_known_model(&self, model: &ModelId) -> bool {
        self.entries.keys().any(|(_, m)| m == model)
    }

    /// Default provider for `model`, if one is determined
    pub fn default_provider(&self, model: &ModelId) -> Option<ProviderType> {
        self.defaults.get(model).copied()
    }

    /// Providers that register `model`, in stable order
    pub fn providers_for(&self, model: &ModelId) -> Vec<ProviderType> {
        let mut providers: Vec<ProviderType> = self
            .entries
            .keys()
            .filter(|(_, m)| m == model)
            .map(|(p, _)| *p)
            .collect();
        providers.sort();
        providers
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
