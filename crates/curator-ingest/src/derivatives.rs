//! Derivative generation.
//!
//! A [`RecipeGenerator`] holds pluggable [`DerivativeRecipe`]s. Each recipe
//! that accepts the file set's content type renders one rendition, which is
//! attached under the recipe's relation without auto-versioning. A failing
//! recipe is logged and skipped; it never aborts the others.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use curator_core::config::DerivativeConfig;
use curator_core::store::RepositoryStore;
use curator_core::types::{AttachOptions, FileSet, IncomingFile, EXTRACTED_TEXT, THUMBNAIL};

use crate::error::{DerivativeError, IngestError};

/// Bytes produced by a recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendition {
    pub content: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

/// One kind of secondary rendition.
#[async_trait]
pub trait DerivativeRecipe: Send + Sync {
    /// Name used in logs and reports.
    fn name(&self) -> &str;

    /// Relation the rendition is attached under.
    fn relation(&self) -> &str;

    /// Whether this recipe applies to the given content type.
    fn accepts(&self, mime_type: &str) -> bool;

    /// Render from `source`. `scratch` is an empty directory owned by the
    /// caller and removed afterwards.
    async fn render(&self, source: &Path, scratch: &Path) -> Result<Rendition, DerivativeError>;
}

/// Outcome of one `create_derivatives` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivativeReport {
    /// Relations written.
    pub created: Vec<String>,
    /// `(recipe, error)` pairs for recipes that failed.
    pub failed: Vec<(String, String)>,
}

impl DerivativeReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.failed.is_empty()
    }
}

/// Produces renditions of a file set and stores them as extra relations.
#[async_trait]
pub trait DerivativeGenerator: Send + Sync {
    /// No-op, not an error, for content types without a recipe.
    async fn create_derivatives(
        &self,
        file_set: &mut FileSet,
        path: &Path,
    ) -> Result<DerivativeReport, IngestError>;
}

/// Generator dispatching to registered recipes in registration order.
pub struct RecipeGenerator {
    store: Arc<dyn RepositoryStore>,
    recipes: Vec<Box<dyn DerivativeRecipe>>,
}

impl RecipeGenerator {
    /// Generator with no recipes.
    pub fn new(store: Arc<dyn RepositoryStore>) -> Self {
        Self {
            store,
            recipes: Vec::new(),
        }
    }

    /// Generator with the built-in recipes configured from `config`.
    pub fn with_defaults(store: Arc<dyn RepositoryStore>, config: &DerivativeConfig) -> Self {
        let mut generator = Self::new(store);
        generator.register(Box::new(ExtractedTextRecipe));
        generator.register(Box::new(ThumbnailRecipe::new(
            config.convert_program.clone(),
            config.thumbnail_size,
        )));
        generator.register(Box::new(TranscodeRecipe::audio(config.ffmpeg_program.clone())));
        generator.register(Box::new(TranscodeRecipe::video(config.ffmpeg_program.clone())));
        generator
    }

    pub fn register(&mut self, recipe: Box<dyn DerivativeRecipe>) {
        debug!(recipe = recipe.name(), relation = recipe.relation(), "Registered derivative recipe");
        self.recipes.push(recipe);
    }

    pub fn with_recipe(mut self, recipe: Box<dyn DerivativeRecipe>) -> Self {
        self.register(recipe);
        self
    }

    pub fn recipe_names(&self) -> Vec<&str> {
        self.recipes.iter().map(|r| r.name()).collect()
    }
}

#[async_trait]
impl DerivativeGenerator for RecipeGenerator {
    async fn create_derivatives(
        &self,
        file_set: &mut FileSet,
        path: &Path,
    ) -> Result<DerivativeReport, IngestError> {
        let mut report = DerivativeReport::default();
        let Some(mime_type) = file_set.mime_type().map(str::to_string) else {
            debug!(file_set = %file_set.id, "No content type, no derivatives");
            return Ok(report);
        };

        for recipe in self.recipes.iter().filter(|r| r.accepts(&mime_type)) {
            let scratch = tempfile::tempdir().map_err(DerivativeError::from)?;
            let rendition = match recipe.render(path, scratch.path()).await {
                Ok(rendition) => rendition,
                Err(e) => {
                    warn!(
                        file_set = %file_set.id,
                        recipe = recipe.name(),
                        error = %e,
                        "Derivative recipe failed, skipping"
                    );
                    report.failed.push((recipe.name().to_string(), e.to_string()));
                    continue;
                }
            };

            let incoming = IncomingFile {
                content: rendition.content,
                mime_type: Some(rendition.mime_type),
                original_name: rendition.file_name,
            };
            self.store
                .attach(
                    file_set,
                    recipe.relation(),
                    incoming,
                    AttachOptions { versioning: false },
                )
                .await?;
            report.created.push(recipe.relation().to_string());
        }

        if !report.created.is_empty() {
            self.store.persist(file_set).await?;
            info!(
                file_set = %file_set.id,
                relations = ?report.created,
                "Derivatives stored"
            );
        }
        Ok(report)
    }
}

// =============================================================================
// Built-in recipes
// =============================================================================

/// Plain text rendition of text content.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractedTextRecipe;

#[async_trait]
impl DerivativeRecipe for ExtractedTextRecipe {
    fn name(&self) -> &str {
        "extracted_text"
    }

    fn relation(&self) -> &str {
        EXTRACTED_TEXT
    }

    fn accepts(&self, mime_type: &str) -> bool {
        mime_type.starts_with("text/")
    }

    async fn render(&self, source: &Path, _scratch: &Path) -> Result<Rendition, DerivativeError> {
        let bytes = tokio::fs::read(source).await?;
        let text = String::from_utf8_lossy(&bytes);
        let normalized: Vec<&str> = text.split_whitespace().collect();
        Ok(Rendition {
            content: normalized.join(" ").into_bytes(),
            mime_type: "text/plain".to_string(),
            file_name: "extracted_text.txt".to_string(),
        })
    }
}

/// JPEG thumbnail of an image or the first page of a PDF, via ImageMagick.
#[derive(Debug, Clone)]
pub struct ThumbnailRecipe {
    program: String,
    size: u32,
}

impl ThumbnailRecipe {
    pub fn new(program: impl Into<String>, size: u32) -> Self {
        Self {
            program: program.into(),
            size,
        }
    }
}

#[async_trait]
impl DerivativeRecipe for ThumbnailRecipe {
    fn name(&self) -> &str {
        "thumbnail"
    }

    fn relation(&self) -> &str {
        THUMBNAIL
    }

    fn accepts(&self, mime_type: &str) -> bool {
        mime_type.starts_with("image/") || mime_type == "application/pdf"
    }

    async fn render(&self, source: &Path, scratch: &Path) -> Result<Rendition, DerivativeError> {
        let output = scratch.join("thumbnail.jpg");
        let geometry = format!("{0}x{0}>", self.size);
        // `[0]` selects the first frame or page.
        let input = format!("{}[0]", source.display());
        run_program(
            self.name(),
            &self.program,
            &[
                input.as_str(),
                "-auto-orient",
                "-thumbnail",
                geometry.as_str(),
                "-flatten",
                path_arg(&output).as_str(),
            ],
        )
        .await?;
        read_output(output, "image/jpeg").await
    }
}

const MP3_ARGS: &[&str] = &["-vn", "-codec:a", "libmp3lame", "-q:a", "2"];
const MP4_ARGS: &[&str] = &["-codec:v", "libx264", "-pix_fmt", "yuv420p", "-codec:a", "aac"];

/// Audio or video transcode via ffmpeg.
#[derive(Debug, Clone)]
pub struct TranscodeRecipe {
    program: String,
    kind: MediaKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Audio,
    Video,
}

impl TranscodeRecipe {
    /// MP3 rendition of audio content.
    pub fn audio(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            kind: MediaKind::Audio,
        }
    }

    /// MP4 rendition of video content.
    pub fn video(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            kind: MediaKind::Video,
        }
    }
}

#[async_trait]
impl DerivativeRecipe for TranscodeRecipe {
    fn name(&self) -> &str {
        match self.kind {
            MediaKind::Audio => "transcode_audio",
            MediaKind::Video => "transcode_video",
        }
    }

    fn relation(&self) -> &str {
        match self.kind {
            MediaKind::Audio => "mp3",
            MediaKind::Video => "mp4",
        }
    }

    fn accepts(&self, mime_type: &str) -> bool {
        match self.kind {
            MediaKind::Audio => mime_type.starts_with("audio/"),
            MediaKind::Video => mime_type.starts_with("video/"),
        }
    }

    async fn render(&self, source: &Path, scratch: &Path) -> Result<Rendition, DerivativeError> {
        let (output, codec_args, mime) = match self.kind {
            MediaKind::Audio => (scratch.join("audio.mp3"), MP3_ARGS, "audio/mpeg"),
            MediaKind::Video => (scratch.join("video.mp4"), MP4_ARGS, "video/mp4"),
        };
        let input = path_arg(source);
        let out = path_arg(&output);
        let mut args = vec!["-y", "-loglevel", "error", "-i", input.as_str()];
        args.extend_from_slice(codec_args);
        args.push(out.as_str());

        run_program(self.name(), &self.program, &args).await?;
        read_output(output, mime).await
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Run an external converter and fail with its stderr on a non-zero exit.
async fn run_program(recipe: &str, program: &str, args: &[&str]) -> Result<(), DerivativeError> {
    debug!(recipe, program, ?args, "Running converter");
    let output = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| DerivativeError::Launch {
            program: program.to_string(),
            source,
        })?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(DerivativeError::RecipeFailed {
        recipe: recipe.to_string(),
        message: format!("{}: {}", output.status, stderr.trim()),
    })
}

async fn read_output(path: PathBuf, mime_type: &str) -> Result<Rendition, DerivativeError> {
    let content = tokio::fs::read(&path).await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Rendition {
        content,
        mime_type: mime_type.to_string(),
        file_name,
    })
}
