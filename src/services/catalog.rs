use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::job::MediaType;

/// Request/response envelope family for text models.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TextEnvelope {
    /// Chat-style `messages` body, answer under `content[].text`.
    Messages,
    /// Single `inputText` body, answer under `results[].outputText`.
    Completion,
}

/// Capabilities of one backend model, resolved once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub id: String,
    pub media_type: MediaType,
    pub text_envelope: Option<TextEnvelope>,
}

impl ModelDescriptor {
    pub fn image(id: &str) -> Self {
        Self {
            id: id.to_string(),
            media_type: MediaType::Image,
            text_envelope: None,
        }
    }

    pub fn video(id: &str) -> Self {
        Self {
            id: id.to_string(),
            media_type: MediaType::Video,
            text_envelope: None,
        }
    }

    pub fn text(id: &str, envelope: TextEnvelope) -> Self {
        Self {
            id: id.to_string(),
            media_type: MediaType::Text,
            text_envelope: Some(envelope),
        }
    }
}

/// Registry of models the orchestrator may target, with a default per media type.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: HashMap<String, ModelDescriptor>,
    defaults: HashMap<MediaType, String>,
}

impl ModelCatalog {
    /// Build the catalog from the built-in model table plus the configured defaults.
    ///
    /// A default that is not in the built-in table is registered as-is; for text
    /// its envelope comes from `default_text_envelope`.
    pub fn new(
        image_default: &str,
        video_default: &str,
        text_default: &str,
        default_text_envelope: TextEnvelope,
    ) -> Self {
        let mut models: HashMap<String, ModelDescriptor> = builtin_models()
            .into_iter()
            .map(|model| (model.id.clone(), model))
            .collect();

        models
            .entry(image_default.to_string())
            .or_insert_with(|| ModelDescriptor::image(image_default));
        models
            .entry(video_default.to_string())
            .or_insert_with(|| ModelDescriptor::video(video_default));
        models
            .entry(text_default.to_string())
            .or_insert_with(|| ModelDescriptor::text(text_default, default_text_envelope));

        let defaults = HashMap::from([
            (MediaType::Image, image_default.to_string()),
            (MediaType::Video, video_default.to_string()),
            (MediaType::Text, text_default.to_string()),
        ]);

        Self { models, defaults }
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.models.get(model_id)
    }

    pub fn default_for(&self, media_type: MediaType) -> Option<&ModelDescriptor> {
        self.defaults
            .get(&media_type)
            .and_then(|id| self.models.get(id))
    }

    /// Resolve the model for a request: the explicit id when given, otherwise the default.
    pub fn resolve(
        &self,
        media_type: MediaType,
        explicit_model_id: Option<&str>,
    ) -> Result<&ModelDescriptor, CatalogError> {
        let descriptor = match explicit_model_id {
            Some(id) => self
                .get(id)
                .ok_or_else(|| CatalogError::Unknown(id.to_string()))?,
            None => self
                .default_for(media_type)
                .ok_or(CatalogError::NoDefault(media_type))?,
        };

        if descriptor.media_type != media_type {
            return Err(CatalogError::WrongMedia {
                model_id: descriptor.id.clone(),
                expected: media_type,
                actual: descriptor.media_type,
            });
        }

        Ok(descriptor)
    }
}

fn builtin_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::image("amazon.titan-image-generator-v1"),
        ModelDescriptor::image("amazon.titan-image-generator-v2:0"),
        ModelDescriptor::image("amazon.nova-canvas-v1:0"),
        ModelDescriptor::video("amazon.nova-reel-v1:0"),
        ModelDescriptor::video("amazon.nova-reel-v1:1"),
        ModelDescriptor::text("anthropic.claude-3-haiku-20240307-v1:0", TextEnvelope::Messages),
        ModelDescriptor::text("anthropic.claude-3-5-sonnet-20240620-v1:0", TextEnvelope::Messages),
        ModelDescriptor::text("anthropic.claude-3-5-haiku-20241022-v1:0", TextEnvelope::Messages),
        ModelDescriptor::text("amazon.titan-text-express-v1", TextEnvelope::Completion),
        ModelDescriptor::text("amazon.titan-text-lite-v1", TextEnvelope::Completion),
        ModelDescriptor::text("amazon.titan-text-premier-v1:0", TextEnvelope::Completion),
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("model {0} is not registered")]
    Unknown(String),

    #[error("no default model configured for {0}")]
    NoDefault(MediaType),

    #[error("model {model_id} generates {actual}, not {expected}")]
    WrongMedia {
        model_id: String,
        expected: MediaType,
        actual: MediaType,
    },
}
