//! Read-only registry of image styles and personas
//!
//! Built once at startup from [`Config`](crate::config::Config) and shared
//! behind an `Arc`. Lookups that fail here reject a request before any
//! backend process is touched.

use std::collections::BTreeMap;

use super::{ModelProfile, Persona};
use crate::config::Config;
use crate::types::GenerationError;

#[derive(Debug, Clone)]
pub struct ProfileCatalog {
    /// Keyed by lowercase style name
    image_profiles: BTreeMap<String, ModelProfile>,
    personas: BTreeMap<String, Persona>,
    default_persona: String,
}

impl ProfileCatalog {
    pub fn new(
        image_profiles: BTreeMap<String, ModelProfile>,
        personas: BTreeMap<String, Persona>,
        default_persona: impl Into<String>,
    ) -> Self {
        let image_profiles = image_profiles
            .into_iter()
            .map(|(key, profile)| (key.to_lowercase(), profile))
            .collect();

        Self {
            image_profiles,
            personas,
            default_persona: default_persona.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.image_profiles.clone(),
            config.personas.clone(),
            config.default_persona.clone(),
        )
    }

    /// Look up an image style. Matching is case-insensitive.
    pub fn image_profile(&self, key: &str) -> Result<&ModelProfile, GenerationError> {
        self.image_profiles
            .get(&key.trim().to_lowercase())
            .ok_or_else(|| GenerationError::UnknownProfile {
                key: key.to_string(),
                available: self.image_keys(),
            })
    }

    /// Look up a persona, falling back to the configured default when `name`
    /// is `None`.
    pub fn persona(&self, name: Option<&str>) -> Result<&Persona, GenerationError> {
        let name = name.unwrap_or(&self.default_persona);
        self.personas
            .get(name)
            .ok_or_else(|| GenerationError::UnknownPersona(name.to_string()))
    }

    /// Sorted style keys.
    pub fn image_keys(&self) -> Vec<String> {
        self.image_profiles.keys().cloned().collect()
    }

    pub fn persona_names(&self) -> Vec<String> {
        self.personas.keys().cloned().collect()
    }

    pub fn default_persona(&self) -> &str {
        &self.default_persona
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ProfileCatalog {
        ProfileCatalog::from_config(&Config::default())
    }

    #[test]
    fn default_styles_are_sorted() {
        assert_eq!(catalog().image_keys(), vec!["art", "flux", "realistic"]);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let catalog = catalog();
        let profile = catalog.image_profile("FLUX").unwrap();
        assert_eq!(profile.model, "flux1-dev-bnb-nf4.safetensors");
        assert_eq!(profile.steps, 20);
    }

    #[test]
    fn unknown_style_reports_available_keys() {
        match catalog().image_profile("anime") {
            Err(GenerationError::UnknownProfile { key, available }) => {
                assert_eq!(key, "anime");
                assert_eq!(available.len(), 3);
            }
            other => panic!("expected UnknownProfile, got {:?}", other),
        }
    }

    #[test]
    fn default_persona_is_used_when_unnamed() {
        let catalog = catalog();
        let persona = catalog.persona(None).unwrap();
        assert!(persona.prompt.contains("{cleaned_message}"));
        assert!(matches!(
            catalog.persona(Some("nobody")),
            Err(GenerationError::UnknownPersona(_))
        ));
    }
}
