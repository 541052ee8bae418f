//! Parsing of the generation-parameters text the backend embeds in the
//! PNG artifacts it produces.
//!
//! The text looks like:
//!
//! ```text
//! a lighthouse at dusk
//! Negative prompt: blurry, low quality
//! Steps: 20, Sampler: Euler a, CFG scale: 7, Seed: 1234, Size: 512x512
//! ```

use serde::{Deserialize, Serialize};

/// PNG text-chunk keyword holding the parameters block.
pub const PARAMETERS_KEYWORD: &str = "parameters";

const NEGATIVE_MARKER: &str = "\nNegative prompt: ";
const SETTINGS_MARKER: &str = "\nSteps: ";

/// Prompts recovered from an artifact. Both are empty when nothing could
/// be read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMetadata {
    pub prompt: String,
    pub negative_prompt: String,
}

/// Split a parameters block into prompt and negative prompt.
pub fn parse_parameters(text: &str) -> PromptMetadata {
    match text.split_once(NEGATIVE_MARKER) {
        Some((prompt, rest)) => PromptMetadata {
            prompt: prompt.trim().to_string(),
            negative_prompt: rest.lines().next().unwrap_or_default().trim().to_string(),
        },
        None => {
            let prompt = text
                .split_once(SETTINGS_MARKER)
                .map_or(text, |(prompt, _)| prompt);
            PromptMetadata {
                prompt: prompt.trim().to_string(),
                negative_prompt: String::new(),
            }
        }
    }
}
