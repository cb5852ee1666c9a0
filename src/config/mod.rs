use serde::Deserialize;
use std::time::Duration;

use crate::services::catalog::{ModelCatalog, TextEnvelope};
use crate::services::gateway::GatewaySettings;
use crate::services::poller::PollerSettings;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for notifications and workflow executions
    pub redis_url: String,

    /// Base URL of the model runtime gateway
    pub backend_url: String,

    /// Bearer token for the model runtime gateway
    pub backend_api_token: String,

    /// S3-compatible endpoint URL
    pub s3_endpoint: String,

    /// S3 region name
    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    /// S3 access key ID
    pub s3_access_key: String,

    /// S3 secret access key
    pub s3_secret_key: String,

    /// Bucket for generated artifacts and async video output
    pub artifact_bucket: String,

    /// Key prefix under which async video jobs write their output
    #[serde(default = "default_video_output_prefix")]
    pub video_output_prefix: String,

    #[serde(default = "default_image_model_id")]
    pub image_model_id: String,

    #[serde(default = "default_video_model_id")]
    pub video_model_id: String,

    #[serde(default = "default_text_model_id")]
    pub text_model_id: String,

    /// Envelope for a text model that is not in the built-in catalog
    #[serde(default = "default_text_envelope")]
    pub text_envelope: TextEnvelope,

    #[serde(default = "default_poll_initial_delay_secs")]
    pub poll_initial_delay_secs: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,

    #[serde(default = "default_jobs_table")]
    pub jobs_table: String,

    #[serde(default = "default_creatives_table")]
    pub creatives_table: String,

    #[serde(default = "default_notification_queue")]
    pub notification_queue: String,

    #[serde(default = "default_event_bus")]
    pub event_bus: String,

    #[serde(default = "default_event_source")]
    pub event_source: String,

    /// Durable workflow to prefer for submissions. Unset: direct paths only.
    #[serde(default)]
    pub workflow_ref: Option<String>,

    /// Workflow executions the worker runs at once
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_video_output_prefix() -> String {
    "video-jobs".to_string()
}

fn default_image_model_id() -> String {
    "amazon.titan-image-generator-v2:0".to_string()
}

fn default_video_model_id() -> String {
    "amazon.nova-reel-v1:0".to_string()
}

fn default_text_model_id() -> String {
    "anthropic.claude-3-haiku-20240307-v1:0".to_string()
}

fn default_text_envelope() -> TextEnvelope {
    TextEnvelope::Messages
}

fn default_poll_initial_delay_secs() -> u64 {
    10
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_poll_max_attempts() -> u32 {
    30
}

fn default_worker_concurrency() -> usize {
    16
}

fn default_jobs_table() -> String {
    GatewaySettings::default().jobs_table
}

fn default_creatives_table() -> String {
    GatewaySettings::default().creatives_table
}

fn default_notification_queue() -> String {
    GatewaySettings::default().notification_queue
}

fn default_event_bus() -> String {
    GatewaySettings::default().event_bus
}

fn default_event_source() -> String {
    GatewaySettings::default().event_source
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn model_catalog(&self) -> ModelCatalog {
        ModelCatalog::new(
            &self.image_model_id,
            &self.video_model_id,
            &self.text_model_id,
            self.text_envelope,
        )
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings::new(
            Duration::from_secs(self.poll_initial_delay_secs),
            Duration::from_secs(self.poll_interval_secs),
            self.poll_max_attempts,
        )
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            jobs_table: self.jobs_table.clone(),
            creatives_table: self.creatives_table.clone(),
            notification_queue: self.notification_queue.clone(),
            event_bus: self.event_bus.clone(),
            event_source: self.event_source.clone(),
        }
    }

    /// `s3://bucket/prefix` under which async video jobs write their output.
    pub fn video_output_root(&self) -> String {
        format!(
            "s3://{}/{}",
            self.artifact_bucket,
            self.video_output_prefix.trim_matches('/')
        )
    }
}
