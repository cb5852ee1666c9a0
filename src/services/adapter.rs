//! Backend invocation adapter.
//!
//! Turns a [`GenerationRequest`] into the JSON body the backend expects for the
//! resolved model. Pure: no I/O, and the only failure is a validation error.

use base64::Engine;
use rand::Rng;
use serde_json::{json, Value};
use tracing::debug;

use crate::models::generation::{
    GenerationRequest, ImageSettings, TextSettings, VideoMode, VideoSettings,
};
use crate::models::job::MediaType;
use crate::services::catalog::{ModelCatalog, ModelDescriptor, TextEnvelope};

/// Largest seed accepted by the image and video models.
pub const MAX_SEED: u32 = 2_147_483_646;

/// The only frame rate the video model supports.
pub const VIDEO_FPS: u32 = 24;

/// The only resolution the video model supports.
pub const VIDEO_DIMENSION: &str = "1280x720";

/// Duration of a single-shot video.
pub const SINGLE_SHOT_SECONDS: u32 = 6;

const MULTI_SHOT_MIN_SECONDS: u32 = 12;
const MULTI_SHOT_MAX_SECONDS: u32 = 120;

const MESSAGES_API_VERSION: &str = "bedrock-2023-05-31";

/// Image body shape, chosen from the reference image and logo flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageTask {
    TextImage,
    ImageVariation,
    Outpainting,
}

impl ImageTask {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextImage => "TEXT_IMAGE",
            Self::ImageVariation => "IMAGE_VARIATION",
            Self::Outpainting => "OUTPAINTING",
        }
    }

    fn select(settings: &ImageSettings) -> Self {
        match (&settings.reference_image, settings.include_logo) {
            (None, _) => Self::TextImage,
            (Some(_), false) => Self::ImageVariation,
            (Some(_), true) => Self::Outpainting,
        }
    }
}

/// A request body ready to send, with the model it targets.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedInvocation {
    pub media_type: MediaType,
    pub model: ModelDescriptor,
    pub body: Value,
}

impl PreparedInvocation {
    pub fn model_id(&self) -> &str {
        &self.model.id
    }
}

/// Builds backend request bodies from generic generation requests.
#[derive(Debug, Clone)]
pub struct InvocationAdapter {
    catalog: ModelCatalog,
}

impl InvocationAdapter {
    pub fn new(catalog: ModelCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Resolve the model and build the request body.
    pub fn prepare(&self, request: &GenerationRequest) -> Result<PreparedInvocation, AdapterError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(AdapterError::EmptyPrompt);
        }

        let model = self
            .catalog
            .resolve(request.media_type, request.explicit_model_id.as_deref())
            .map_err(|e| AdapterError::Model(e.to_string()))?
            .clone();

        let body = match request.media_type {
            MediaType::Image => image_body(prompt, decode_settings(&request.settings)?)?,
            MediaType::Video => video_body(prompt, decode_settings(&request.settings)?)?,
            MediaType::Text => {
                let envelope = model.text_envelope.unwrap_or(TextEnvelope::Messages);
                text_body(prompt, decode_settings(&request.settings)?, envelope)
            }
        };

        debug!(
            media_type = %request.media_type,
            model_id = %model.id,
            "Prepared backend invocation"
        );

        Ok(PreparedInvocation {
            media_type: request.media_type,
            model,
            body,
        })
    }
}

fn decode_settings<T>(settings: &Value) -> Result<T, AdapterError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if settings.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(settings.clone()).map_err(|e| AdapterError::Settings(e.to_string()))
}

/// Pseudo-random seed in the backend's accepted range.
pub fn random_seed() -> u32 {
    rand::thread_rng().gen_range(0..=MAX_SEED)
}

fn resolve_seed(seed: Option<u32>) -> Result<u32, AdapterError> {
    match seed {
        Some(seed) if seed > MAX_SEED => Err(AdapterError::Seed(seed)),
        Some(seed) => Ok(seed),
        None => Ok(random_seed()),
    }
}

/// Check that a base64 reference image decodes to a known image format.
/// Check a base64 reference image and return its format label (`png`, `jpeg`, `webp`).
fn validate_reference_image(encoded: &str) -> Result<&'static str, AdapterError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| AdapterError::ReferenceImage("not valid base64".to_string()))?;
    match image::guess_format(&bytes) {
        Ok(image::ImageFormat::Png) => Ok("png"),
        Ok(image::ImageFormat::Jpeg) => Ok("jpeg"),
        Ok(image::ImageFormat::WebP) => Ok("webp"),
        Ok(other) => Err(AdapterError::ReferenceImage(format!(
            "unsupported image format {:?}",
            other
        ))),
        Err(_) => Err(AdapterError::ReferenceImage(
            "unrecognised image format".to_string(),
        )),
    }
}

fn image_body(prompt: &str, settings: ImageSettings) -> Result<Value, AdapterError> {
    if !(1..=5).contains(&settings.number_of_images) {
        return Err(AdapterError::Settings(format!(
            "number_of_images must be between 1 and 5, got {}",
            settings.number_of_images
        )));
    }

    let task = ImageTask::select(&settings);
    if settings.include_logo && task == ImageTask::TextImage {
        debug!("include_logo ignored without a reference image");
    }
    if let Some(reference) = &settings.reference_image {
        validate_reference_image(reference)?;
    }

    let seed = resolve_seed(settings.seed)?;
    let generation_config = json!({
        "numberOfImages": settings.number_of_images,
        "height": settings.height,
        "width": settings.width,
        "cfgScale": settings.cfg_scale,
        "quality": settings.quality,
        "seed": seed,
    });

    let mut params = serde_json::Map::new();
    params.insert("text".to_string(), json!(prompt));
    if let Some(negative) = &settings.negative_prompt {
        params.insert("negativeText".to_string(), json!(negative));
    }

    let params_key = match task {
        ImageTask::TextImage => "textToImageParams",
        ImageTask::ImageVariation => {
            params.insert("images".to_string(), json!([settings.reference_image]));
            params.insert(
                "similarityStrength".to_string(),
                json!(settings.similarity_strength),
            );
            "imageVariationParams"
        }
        ImageTask::Outpainting => {
            params.insert("image".to_string(), json!(settings.reference_image));
            params.insert(
                "maskPrompt".to_string(),
                json!(settings.mask_prompt.as_deref().unwrap_or("logo")),
            );
            params.insert("outPaintingMode".to_string(), json!("PRECISE"));
            "outPaintingParams"
        }
    };

    Ok(json!({
        "taskType": task.as_str(),
        params_key: Value::Object(params),
        "imageGenerationConfig": generation_config,
    }))
}

fn video_body(prompt: &str, settings: VideoSettings) -> Result<Value, AdapterError> {
    let seed = resolve_seed(settings.seed)?;

    match settings.mode {
        VideoMode::Single => {
            if settings.duration_seconds != SINGLE_SHOT_SECONDS {
                debug!(
                    requested = settings.duration_seconds,
                    "Single-shot video keeps its fixed duration"
                );
            }

            let mut params = json!({ "text": prompt });
            if let Some(reference) = &settings.reference_image {
                let format = validate_reference_image(reference)?;
                params["images"] = json!([{
                    "format": format,
                    "source": { "bytes": reference },
                }]);
            }

            Ok(json!({
                "taskType": "TEXT_VIDEO",
                "textToVideoParams": params,
                "videoGenerationConfig": {
                    "durationSeconds": SINGLE_SHOT_SECONDS,
                    "fps": VIDEO_FPS,
                    "dimension": VIDEO_DIMENSION,
                    "seed": seed,
                },
            }))
        }
        VideoMode::Multi => {
            let duration = settings.duration_seconds;
            if !(MULTI_SHOT_MIN_SECONDS..=MULTI_SHOT_MAX_SECONDS).contains(&duration)
                || duration % SINGLE_SHOT_SECONDS != 0
            {
                return Err(AdapterError::Duration(duration));
            }

            Ok(json!({
                "taskType": "MULTI_SHOT_AUTOMATED",
                "multiShotAutomatedParams": { "text": prompt },
                "videoGenerationConfig": {
                    "durationSeconds": duration,
                    "fps": VIDEO_FPS,
                    "dimension": VIDEO_DIMENSION,
                    "seed": seed,
                },
            }))
        }
    }
}

fn text_body(prompt: &str, settings: TextSettings, envelope: TextEnvelope) -> Value {
    match envelope {
        TextEnvelope::Messages => {
            let mut body = json!({
                "anthropic_version": MESSAGES_API_VERSION,
                "max_tokens": settings.max_tokens,
                "temperature": settings.temperature,
                "top_p": settings.top_p,
                "messages": [{
                    "role": "user",
                    "content": [{ "type": "text", "text": prompt }],
                }],
            });
            if let Some(system) = &settings.system {
                body["system"] = json!(system);
            }
            body
        }
        TextEnvelope::Completion => {
            let input_text = match &settings.system {
                Some(system) => format!("{}\n\n{}", system, prompt),
                None => prompt.to_string(),
            };
            json!({
                "inputText": input_text,
                "textGenerationConfig": {
                    "maxTokenCount": settings.max_tokens,
                    "temperature": settings.temperature,
                    "topP": settings.top_p,
                },
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("invalid settings: {0}")]
    Settings(String),

    #[error("invalid model: {0}")]
    Model(String),

    #[error("invalid reference image: {0}")]
    ReferenceImage(String),

    #[error("seed {0} is outside 0..=2147483646")]
    Seed(u32),

    #[error("multi-shot duration must be a multiple of 6 between 12 and 120 seconds, got {0}")]
    Duration(u32),
}
