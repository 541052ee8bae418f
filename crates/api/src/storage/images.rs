//! On-disk artifact store.
//!
//! Artifacts live under `<root>/<name>/<NNNNN>.png`, numbered per
//! directory. Paths handed to clients are relative to the root and are
//! also what the static `/output` route serves.

use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use easel_core::error::CoreError;
use easel_core::metadata::{parse_parameters, PromptMetadata, PARAMETERS_KEYWORD};

/// Width of the zero-padded file number.
const FILE_NUMBER_WIDTH: usize = 5;

/// Extension of every stored artifact.
const ARTIFACT_EXTENSION: &str = "png";

pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if it does not exist.
    pub async fn init(&self) -> Result<(), CoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error("create output directory", &self.root, e))
    }

    /// Create (if needed) and return the directory for `name`.
    pub async fn ensure_named_directory(&self, name: &str) -> Result<PathBuf, CoreError> {
        validate_name(name)?;
        let dir = self.root.join(name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error("create artifact directory", &dir, e))?;
        Ok(dir)
    }

    /// Decode and write every base64 image under `name`, returning the
    /// relative paths in input order.
    pub async fn save_all(&self, name: &str, images: &[String]) -> Result<Vec<String>, CoreError> {
        if images.is_empty() {
            tracing::warn!(name, "No images to save");
            return Ok(Vec::new());
        }

        let dir = self.ensure_named_directory(name).await?;
        let mut next = next_file_number(&dir).await?;
        let mut saved = Vec::with_capacity(images.len());

        for encoded in images {
            let bytes = decode_image(encoded)?;
            let file_name = format!("{next:0width$}.{ARTIFACT_EXTENSION}", width = FILE_NUMBER_WIDTH);
            let path = dir.join(&file_name);
            tokio::fs::write(&path, &bytes)
                .await
                .map_err(|e| io_error("write artifact", &path, e))?;

            saved.push(format!("{name}/{file_name}"));
            next += 1;
        }

        tracing::debug!(name, count = saved.len(), "Saved artifacts");
        Ok(saved)
    }

    /// Prompts embedded in the artifact at `relative`. Empty on any
    /// failure.
    pub async fn read_metadata(&self, relative: &str) -> PromptMetadata {
        let path = match self.resolve(relative) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(path = relative, error = %e, "Rejected metadata path");
                return PromptMetadata::default();
            }
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => match parameters_text(&bytes) {
                Some(text) => parse_parameters(&text),
                None => {
                    tracing::debug!(path = relative, "No parameters text in artifact");
                    PromptMetadata::default()
                }
            },
            Err(e) => {
                tracing::warn!(path = relative, error = %e, "Failed to read artifact metadata");
                PromptMetadata::default()
            }
        }
    }

    /// Read an artifact and return it base64-encoded.
    pub async fn load_base64(&self, relative: &str) -> Result<String, CoreError> {
        let path = self.resolve(relative)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(STANDARD.encode(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::not_found("Image", relative))
            }
            Err(e) => Err(io_error("read artifact", &path, e)),
        }
    }

    /// Pixel dimensions of a stored artifact, read from its header.
    pub fn dimensions(&self, relative: &str) -> Option<(u32, u32)> {
        let path = self.resolve(relative).ok()?;
        image::image_dimensions(path).ok()
    }

    /// Map a relative artifact path onto the root, refusing anything that
    /// could escape it.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, CoreError> {
        let candidate = Path::new(relative);
        let safe = !relative.is_empty()
            && candidate
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(CoreError::Validation(format!(
                "Invalid artifact path: {relative}"
            )));
        }
        Ok(self.root.join(candidate))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_name(name: &str) -> Result<(), CoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\'])
    {
        return Err(CoreError::Validation(format!(
            "Invalid artifact directory name: {name:?}"
        )));
    }
    Ok(())
}

/// Next free number in `dir`: one past the largest numeric file stem,
/// or 0 for an empty directory.
async fn next_file_number(dir: &Path) -> Result<u64, CoreError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| io_error("list artifact directory", dir, e))?;

    let mut highest: Option<u64> = None;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error("list artifact directory", dir, e))?
    {
        let path = entry.path();
        let number = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok());
        if let Some(n) = number {
            highest = Some(highest.map_or(n, |h| h.max(n)));
        }
    }

    Ok(highest.map_or(0, |h| h + 1))
}

/// Decode one backend image and make sure it is actually an image.
fn decode_image(encoded: &str) -> Result<Vec<u8>, CoreError> {
    // Some backends prefix a data URL header.
    let payload = encoded
        .split_once("base64,")
        .map_or(encoded, |(_, data)| data);
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| CoreError::Backend(format!("Backend returned invalid image data: {e}")))?;
    image::guess_format(&bytes)
        .map_err(|e| CoreError::Backend(format!("Backend returned an unrecognised image: {e}")))?;
    Ok(bytes)
}

/// The `parameters` text chunk of a PNG, if present.
fn parameters_text(bytes: &[u8]) -> Option<String> {
    let reader = png::Decoder::new(Cursor::new(bytes)).read_info().ok()?;
    let info = reader.info();

    info.uncompressed_latin1_text
        .iter()
        .find(|chunk| chunk.keyword == PARAMETERS_KEYWORD)
        .map(|chunk| chunk.text.clone())
        .or_else(|| {
            info.utf8_text
                .iter()
                .find(|chunk| chunk.keyword == PARAMETERS_KEYWORD)
                .and_then(|chunk| chunk.get_text().ok())
        })
        .or_else(|| {
            info.compressed_latin1_text
                .iter()
                .find(|chunk| chunk.keyword == PARAMETERS_KEYWORD)
                .and_then(|chunk| chunk.get_text().ok())
        })
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> CoreError {
    CoreError::Internal(format!("Failed to {action} {}: {err}", path.display()))
}
