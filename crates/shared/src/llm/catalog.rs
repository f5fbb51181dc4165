use std::collections::HashSet;

use thiserror::Error;

use crate::models::ModelDescriptor;

const MODEL_TABLE_JSON: &str = include_str!("../../assets/models.json");
const DEFAULT_MODEL_ID: &str = "openai";

/// Static classification of model identifiers, loaded once at startup.
#[derive(Debug)]
pub struct ModelCatalog {
    descriptors: Vec<ModelDescriptor>,
}

#[derive(Debug, Clone, Copy)]
pub struct ModelClass {
    pub anonymous_capable: bool,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("model table is not valid json: {0}")]
    InvalidJson(String),
    #[error("duplicate model id in table: {0}")]
    DuplicateId(String),
    #[error("default model {0} is missing from the table")]
    MissingDefault(String),
}

impl ModelCatalog {
    pub fn load() -> Result<Self, CatalogError> {
        Self::from_json(MODEL_TABLE_JSON)
    }

    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let descriptors: Vec<ModelDescriptor> =
            serde_json::from_str(raw).map_err(|err| CatalogError::InvalidJson(err.to_string()))?;

        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            if !seen.insert(descriptor.id.as_str()) {
                return Err(CatalogError::DuplicateId(descriptor.id.clone()));
            }
        }
        if !seen.contains(DEFAULT_MODEL_ID) {
            return Err(CatalogError::MissingDefault(DEFAULT_MODEL_ID.to_string()));
        }

        Ok(Self { descriptors })
    }

    /// Unknown ids classify as authenticated-only: the table fails closed,
    /// and the dispatcher's fallback policy takes it from there.
    pub fn classify(&self, model_id: &str) -> ModelClass {
        ModelClass {
            anonymous_capable: self
                .descriptor(model_id)
                .is_some_and(|descriptor| descriptor.free),
        }
    }

    pub fn exists(&self, model_id: &str) -> bool {
        self.descriptor(model_id).is_some()
    }

    pub fn descriptor(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.descriptors
            .iter()
            .find(|descriptor| descriptor.id == model_id)
    }

    pub fn default_model(&self) -> &str {
        DEFAULT_MODEL_ID
    }

    pub fn descriptors(&self) -> &[ModelDescriptor] {
        &self.descriptors
    }
}
