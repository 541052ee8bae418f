//! Generation parameters, persisted generation configs, and the upscale
//! request shape sent to the backend.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::ConfigId;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_STEPS: u32 = 25;
pub const DEFAULT_SAMPLER: &str = "Euler a";
pub const DEFAULT_SCHEDULER: &str = "Automatic";
pub const DEFAULT_CFG_SCALE: f64 = 10.0;
pub const DEFAULT_DIMENSION: u32 = 512;
pub const DEFAULT_HR_DENOISING_STRENGTH: f64 = 0.7;
pub const DEFAULT_HR_SECOND_PASS_STEPS: u32 = 20;
pub const DEFAULT_UPSCALE_TILE_OVERLAP: u32 = 64;
pub const DEFAULT_UPSCALE_SCALE_FACTOR: f64 = 2.5;
pub const DEFAULT_UPSCALE_DENOISING_STRENGTH: f64 = 0.15;

/// Fallback scale factor when an upscale request leaves it unset.
pub const FALLBACK_UPSCALE_SCALE_FACTOR: f64 = 2.0;

/// Backend script that tiles and upscales an existing image.
pub const UPSCALE_SCRIPT_NAME: &str = "SD upscale";

/// Keys that only the server understands; stripped before a payload is
/// forwarded to the backend.
const SERVER_ONLY_KEYS: &[&str] = &[
    "model",
    "hr_denoising_strength",
    "upscale_tile_overlap",
    "upscale_scale_factor",
    "upscale_upscaler",
    "upscale_denoising_strength",
];

// ---------------------------------------------------------------------------
// Generation parameters
// ---------------------------------------------------------------------------

/// Text-to-image parameters. Missing fields take the defaults above;
/// unrecognised fields are kept in `extra` and forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: u32,
    pub sampler_name: String,
    pub scheduler: String,
    pub cfg_scale: f64,
    pub width: u32,
    pub height: u32,
    pub batch_size: u32,
    pub n_iter: u32,
    pub seed: i64,
    pub save_images: bool,

    pub enable_hr: bool,
    pub hr_resize_x: u32,
    pub hr_resize_y: u32,
    pub hr_denoising_strength: f64,
    pub hr_second_pass_steps: u32,
    pub hr_upscaler: String,

    pub upscale_tile_overlap: u32,
    pub upscale_scale_factor: f64,
    pub upscale_upscaler: String,
    pub upscale_denoising_strength: f64,

    /// Checkpoint to select before generating.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            steps: DEFAULT_STEPS,
            sampler_name: DEFAULT_SAMPLER.to_string(),
            scheduler: DEFAULT_SCHEDULER.to_string(),
            cfg_scale: DEFAULT_CFG_SCALE,
            width: DEFAULT_DIMENSION,
            height: DEFAULT_DIMENSION,
            batch_size: 1,
            n_iter: 1,
            seed: -1,
            save_images: false,
            enable_hr: false,
            hr_resize_x: 0,
            hr_resize_y: 0,
            hr_denoising_strength: DEFAULT_HR_DENOISING_STRENGTH,
            hr_second_pass_steps: DEFAULT_HR_SECOND_PASS_STEPS,
            hr_upscaler: String::new(),
            upscale_tile_overlap: DEFAULT_UPSCALE_TILE_OVERLAP,
            upscale_scale_factor: DEFAULT_UPSCALE_SCALE_FACTOR,
            upscale_upscaler: String::new(),
            upscale_denoising_strength: DEFAULT_UPSCALE_DENOISING_STRENGTH,
            model: None,
            extra: Map::new(),
        }
    }
}

impl GenerationParams {
    /// Number of images the backend was asked for.
    pub fn requested_images(&self) -> u32 {
        self.batch_size.max(1).saturating_mul(self.n_iter.max(1))
    }

    /// Target checkpoint, if one is named.
    pub fn target_model(&self) -> Option<&str> {
        self.model.as_deref().map(str::trim).filter(|m| !m.is_empty())
    }

    /// JSON body for the backend's text-to-image endpoint.
    ///
    /// The hires-fix denoising strength travels as `denoising_strength`;
    /// server-only keys are dropped.
    pub fn to_txt2img_payload(&self) -> Value {
        let mut body = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for key in SERVER_ONLY_KEYS {
            body.remove(*key);
        }
        body.insert(
            "denoising_strength".to_string(),
            Value::from(self.hr_denoising_strength),
        );
        Value::Object(body)
    }
}

// ---------------------------------------------------------------------------
// Persisted configs
// ---------------------------------------------------------------------------

/// A named generation recipe as stored by the config store and submitted
/// by clients. The wire shape is flat: `{id, name, steps, prompt, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub id: ConfigId,
    pub name: String,
    #[serde(flatten)]
    pub params: GenerationParams,
}

impl GenerationConfig {
    pub fn new(id: impl Into<ConfigId>, name: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            params,
        }
    }

    /// A config without a non-blank id cannot be scheduled.
    pub fn has_identity(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Upscale
// ---------------------------------------------------------------------------

/// Optional per-job upscale overrides. Unset values fall back to the
/// script defaults when the backend request is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpscaleSettings {
    #[serde(rename = "upscale_upscaler", skip_serializing_if = "Option::is_none")]
    pub upscaler: Option<String>,
    #[serde(rename = "upscale_scale_factor", skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<f64>,
    #[serde(
        rename = "upscale_denoising_strength",
        skip_serializing_if = "Option::is_none"
    )]
    pub denoising_strength: Option<f64>,
    #[serde(rename = "upscale_tile_overlap", skip_serializing_if = "Option::is_none")]
    pub tile_overlap: Option<u32>,
}

impl UpscaleSettings {
    /// Positional arguments of the upscale script:
    /// `[upscaler, scale factor, denoising strength, tile overlap]`.
    pub fn script_args(&self) -> Value {
        serde_json::json!([
            self.upscaler.clone().unwrap_or_default(),
            self.scale_factor.unwrap_or(FALLBACK_UPSCALE_SCALE_FACTOR),
            self.denoising_strength
                .unwrap_or(DEFAULT_UPSCALE_DENOISING_STRENGTH),
            self.tile_overlap.unwrap_or(DEFAULT_UPSCALE_TILE_OVERLAP),
        ])
    }
}

/// Everything the backend needs to upscale one stored artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct UpscaleRequest {
    /// Base64-encoded source image.
    pub init_image: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub settings: UpscaleSettings,
}

impl UpscaleRequest {
    /// JSON body for the backend's image-to-image endpoint, driving the
    /// upscale script.
    pub fn to_img2img_payload(&self) -> Value {
        serde_json::json!({
            "init_images": [self.init_image],
            "prompt": self.prompt,
            "negative_prompt": self.negative_prompt,
            "denoising_strength": self.settings.denoising_strength
                .unwrap_or(DEFAULT_UPSCALE_DENOISING_STRENGTH),
            "script_name": UPSCALE_SCRIPT_NAME,
            "script_args": self.settings.script_args(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_takes_all_defaults() {
        let params: GenerationParams = serde_json::from_value(json!({})).unwrap();
        assert_eq!(params, GenerationParams::default());
        assert_eq!(params.steps, 25);
        assert_eq!(params.sampler_name, "Euler a");
        assert_eq!(params.upscale_scale_factor, 2.5);
    }

    #[test]
    fn flat_config_splits_identity_from_params() {
        let config: GenerationConfig = serde_json::from_value(json!({
            "id": "cfg-1",
            "name": "A",
            "steps": 20,
            "prompt": "a lighthouse",
            "styles": ["film"],
        }))
        .unwrap();

        assert_eq!(config.id, "cfg-1");
        assert_eq!(config.name, "A");
        assert_eq!(config.params.steps, 20);
        assert_eq!(config.params.prompt, "a lighthouse");
        assert_eq!(config.params.extra["styles"], json!(["film"]));
    }

    #[test]
    fn config_without_id_has_no_identity() {
        let config: GenerationConfig =
            serde_json::from_value(json!({"name": "A"})).unwrap();
        assert!(!config.has_identity());

        let blank = GenerationConfig::new("  ", "A", GenerationParams::default());
        assert!(!blank.has_identity());
    }

    #[test]
    fn txt2img_payload_strips_server_only_keys() {
        let params = GenerationParams {
            model: Some("sdxl.safetensors".into()),
            hr_denoising_strength: 0.4,
            ..Default::default()
        };
        let body = params.to_txt2img_payload();

        assert!(body.get("model").is_none());
        assert!(body.get("upscale_scale_factor").is_none());
        assert_eq!(body["denoising_strength"], json!(0.4));
        assert_eq!(body["steps"], json!(25));
        assert_eq!(body["scheduler"], json!("Automatic"));
    }

    #[test]
    fn blank_model_is_not_a_target() {
        let params = GenerationParams {
            model: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(params.target_model(), None);
    }

    #[test]
    fn requested_images_multiplies_batch_and_iterations() {
        let params = GenerationParams {
            batch_size: 2,
            n_iter: 3,
            ..Default::default()
        };
        assert_eq!(params.requested_images(), 6);
    }

    #[test]
    fn requested_images_saturates() {
        let params = GenerationParams {
            batch_size: u32::MAX,
            n_iter: 2,
            ..Default::default()
        };
        assert_eq!(params.requested_images(), u32::MAX);
    }

    #[test]
    fn script_args_fall_back_to_defaults() {
        let args = UpscaleSettings::default().script_args();
        assert_eq!(args, json!(["", 2.0, 0.15, 64]));
    }

    #[test]
    fn img2img_payload_drives_upscale_script() {
        let request = UpscaleRequest {
            init_image: "aGVsbG8=".into(),
            prompt: "p".into(),
            negative_prompt: "n".into(),
            settings: UpscaleSettings {
                upscaler: Some("R-ESRGAN 4x+".into()),
                scale_factor: Some(3.0),
                ..Default::default()
            },
        };
        let body = request.to_img2img_payload();
        assert_eq!(body["script_name"], "SD upscale");
        assert_eq!(body["init_images"], json!(["aGVsbG8="]));
        assert_eq!(body["script_args"], json!(["R-ESRGAN 4x+", 3.0, 0.15, 64]));
    }
}
