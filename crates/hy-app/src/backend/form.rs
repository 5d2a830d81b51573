//! Multipart parsing for the generation endpoints.
//!
//! Images are decoded and re-encoded as PNG here, before admission, so a
//! malformed upload never occupies the generation slot.

use std::io::Cursor;
use std::str::FromStr;
use axum::extract::Multipart;
use hy_core::{GenerationInputs, GenerationParameters, InputImage, View};
use image::ImageFormat;
use crate::error::AppError;

/// Which image fields an endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    /// One `image` field.
    Single,
    /// `front` (required), `back`, `left`, `right`.
    MultiView,
}

impl FormMode {
    fn view_for(&self, field: &str) -> Option<View> {
        match (self, field) {
            (Self::Single, "image") => Some(View::Front),
            (Self::MultiView, "image" | "front") => Some(View::Front),
            (Self::MultiView, "back") => Some(View::Back),
            (Self::MultiView, "left") => Some(View::Left),
            (Self::MultiView, "right") => Some(View::Right),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct GenerationForm {
    pub inputs: GenerationInputs,
    pub params: GenerationParameters,
}

fn parse_field<T: FromStr>(name: &str, raw: &str) -> Result<T, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::Form(format!("{name} has an invalid value '{raw}'")))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(AppError::Form(format!("{name} must be a boolean (got '{raw}')"))),
    }
}

fn apply_param(params: &mut GenerationParameters, name: &str, raw: &str) -> Result<bool, AppError> {
    match name {
        "seed" => params.seed = parse_field(name, raw)?,
        "guidance_scale" => params.guidance_scale = parse_field(name, raw)?,
        "inference_steps" | "steps" => params.inference_steps = parse_field(name, raw)?,
        "octree_resolution" => params.octree_resolution = parse_field(name, raw)?,
        "num_chunks" => params.num_chunks = parse_field(name, raw)?,
        "mesh_simplify_ratio" => params.mesh_simplify_ratio = parse_field(name, raw)?,
        "apply_texture" => params.apply_texture = parse_bool(name, raw)?,
        "texture_size" => params.texture_size = parse_field(name, raw)?,
        "output_format" => params.output_format = raw.parse()?,
        _ => return Ok(false),
    }
    Ok(true)
}

/// Decodes an uploaded image of any supported format and re-encodes it as PNG.
pub fn normalize_image(field: &str, bytes: &[u8]) -> Result<Vec<u8>, AppError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| AppError::Form(format!("{field} is not a readable image: {e}")))?;

    let mut png = Vec::new();
    decoded
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| AppError::Form(format!("{field} could not be re-encoded: {e}")))?;
    Ok(png)
}

impl GenerationForm {
    pub async fn parse(mut multipart: Multipart, mode: FormMode) -> Result<Self, AppError> {
        let mut params = GenerationParameters::default();
        let mut uploads: Vec<(View, String, Vec<u8>)> = Vec::new();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::Form(e.to_string()))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if let Some(view) = mode.view_for(&name) {
                if uploads.iter().any(|(v, _, _)| *v == view) {
                    return Err(AppError::Form(format!("{name} was uploaded more than once")));
                }
                let bytes = field.bytes().await.map_err(|e| AppError::Form(e.to_string()))?;
                uploads.push((view, name, bytes.to_vec()));
                continue;
            }

            let text = field.text().await.map_err(|e| AppError::Form(e.to_string()))?;
            if !apply_param(&mut params, &name, &text)? {
                tracing::debug!(field = %name, "Ignoring unknown form field");
            }
        }

        if !uploads.iter().any(|(view, _, _)| *view == View::Front) {
            let expected = match mode {
                FormMode::Single => "image",
                FormMode::MultiView => "front",
            };
            return Err(AppError::Form(format!("missing required {expected} upload")));
        }

        let images = tokio::task::spawn_blocking(move || {
            uploads
                .into_iter()
                .map(|(view, name, bytes)| normalize_image(&name, &bytes).map(|png| InputImage { view, png }))
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| AppError::Form(format!("image decoding aborted: {e}")))??;

        Ok(Self {
            inputs: GenerationInputs { images },
            params,
        })
    }
}
