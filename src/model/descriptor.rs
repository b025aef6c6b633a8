//! Model descriptor registry and per-backend parameter filtering.

use std::collections::{HashMap, HashSet};

/// One entry in the caller-supplied parameter bag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Temperature,
    TopK,
    TopP,
    MaxTokens,
    Stop,
    ThinkingMode,
    MaxInputTokens,
}

/// Backend family. Dispatch is by tag, not by inheritance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Anthropic,
    BedrockNova,
    OpenAi,
    Google,
}

/// Static description of one selectable model.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub endpoint_tag: String,
    /// region prefix -> canonical model id; empty map means `default_model_id` applies everywhere.
    pub region_model_ids: HashMap<String, String>,
    pub default_model_id: String,
    pub token_limit: u32,
    pub max_output_tokens: u32,
    pub supported_parameters: HashSet<ParamKind>,
    pub family: Family,
    pub extended_context_header: Option<(&'static str, &'static str)>,
    pub supports_context_caching: bool,
    pub supports_thinking: bool,
}

impl ModelDescriptor {
    pub fn model_id_for_region(&self, region: Option<&str>) -> &str {
        if let Some(region) = region {
            for (prefix, id) in &self.region_model_ids {
                if region.starts_with(prefix.as_str()) {
                    return id;
                }
            }
        }
        &self.default_model_id
    }
}

/// Read-only-after-startup registry of known descriptors, keyed by endpoint tag.
#[derive(Debug, Default)]
pub struct DescriptorRegistry {
    descriptors: HashMap<String, ModelDescriptor>,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, descriptor: ModelDescriptor) -> Self {
        self.descriptors
            .insert(descriptor.endpoint_tag.clone(), descriptor);
        self
    }

    pub fn get(&self, endpoint_tag: &str) -> Option<&ModelDescriptor> {
        self.descriptors.get(endpoint_tag)
    }
}

/// A generic parameter value.
#[derive(Debug, Clone)]
pub enum ParamValue {
    Float(f32),
    UInt(u32),
    Strings(Vec<String>),
    Bool(bool),
}

/// Pure function: given a descriptor and a parameter bag, return only the
/// entries the backend accepts. Must be called immediately before every
/// model invocation.
pub fn filter_params(
    descriptor: &ModelDescriptor,
    bag: &HashMap<ParamKind, ParamValue>,
) -> HashMap<ParamKind, ParamValue> {
    let mut out = HashMap::new();
    for (kind, value) in bag {
        if !descriptor.supported_parameters.contains(kind) {
            continue;
        }
        // stop is dropped for Anthropic-family descriptors even when listed:
        // the tool loop supplies its own sentinel handling instead.
        if *kind == ParamKind::Stop && descriptor.family == Family::Anthropic {
            continue;
        }
        out.insert(*kind, value.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(supported: &[ParamKind], family: Family) -> ModelDescriptor {
        ModelDescriptor {
            endpoint_tag: "test".into(),
            region_model_ids: HashMap::new(),
            default_model_id: "test-model".into(),
            token_limit: 100_000,
            max_output_tokens: 4096,
            supported_parameters: supported.iter().copied().collect(),
            family,
            extended_context_header: None,
            supports_context_caching: false,
            supports_thinking: false,
        }
    }

    #[test]
    fn keeps_only_supported_keys() {
        let descriptor = descriptor(&[ParamKind::Temperature, ParamKind::MaxTokens], Family::OpenAi);
        let mut bag = HashMap::new();
        bag.insert(ParamKind::TopK, ParamValue::UInt(40));
        bag.insert(ParamKind::Temperature, ParamValue::Float(0.7));
        bag.insert(ParamKind::MaxTokens, ParamValue::UInt(1024));
        bag.insert(ParamKind::Stop, ParamValue::Strings(vec!["STOP".into()]));

        let filtered = filter_params(&descriptor, &bag);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.contains_key(&ParamKind::Temperature));
        assert!(filtered.contains_key(&ParamKind::MaxTokens));
    }

    #[test]
    fn empty_bag_yields_empty_result() {
        let descriptor = descriptor(&[ParamKind::Temperature], Family::OpenAi);
        let filtered = filter_params(&descriptor, &HashMap::new());
        assert!(filtered.is_empty());
    }

    #[test]
    fn drops_stop_for_anthropic_even_if_supported() {
        let descriptor = descriptor(&[ParamKind::Stop, ParamKind::Temperature], Family::Anthropic);
        let mut bag = HashMap::new();
        bag.insert(ParamKind::Stop, ParamValue::Strings(vec!["X".into()]));
        bag.insert(ParamKind::Temperature, ParamValue::Float(1.0));
        let filtered = filter_params(&descriptor, &bag);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key(&ParamKind::Temperature));
    }

    #[test]
    fn region_lookup_falls_back_to_default() {
        let mut descriptor = descriptor(&[], Family::BedrockNova);
        descriptor
            .region_model_ids
            .insert("eu-".into(), "eu.model-id".into());
        assert_eq!(descriptor.model_id_for_region(Some("eu-west-1")), "eu.model-id");
        assert_eq!(descriptor.model_id_for_region(Some("us-east-1")), "test-model");
        assert_eq!(descriptor.model_id_for_region(None), "test-model");
    }
}
