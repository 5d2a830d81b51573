use std::ops::Deref;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::error::GenError;

pub const GUIDANCE_SCALE_RANGE: (f32, f32) = (0.0, 10.0);
pub const INFERENCE_STEPS_RANGE: (u32, u32) = (1, 50);
pub const OCTREE_RESOLUTION_RANGE: (u32, u32) = (128, 512);
pub const NUM_CHUNKS_RANGE: (u32, u32) = (1_000, 200_000);
pub const TEXTURE_SIZE_RANGE: (u32, u32) = (512, 4096);

/// Mesh export format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Glb,
    Obj,
}

impl OutputFormat {
    pub fn extension(&self) -> &str {
        match self {
            Self::Glb => "glb",
            Self::Obj => "obj",
        }
    }

    pub fn content_type(&self) -> &str {
        match self {
            Self::Glb => "model/gltf-binary",
            Self::Obj => "model/obj",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = GenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "glb" => Ok(Self::Glb),
            "obj" => Ok(Self::Obj),
            other => Err(GenError::Validation(format!(
                "output_format must be one of glb, obj (got '{other}')"
            ))),
        }
    }
}

/// Input to one generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParameters {
    pub seed: u64,
    pub guidance_scale: f32,
    pub inference_steps: u32,
    pub octree_resolution: u32,
    /// Absolute chunk count, or thousands of chunks when 1..=200.
    pub num_chunks: u32,
    /// Fraction in (0, 1] or percentage in (1, 100].
    pub mesh_simplify_ratio: f32,
    pub apply_texture: bool,
    pub texture_size: u32,
    pub output_format: OutputFormat,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            seed: 1234,
            guidance_scale: 5.0,
            inference_steps: 30,
            octree_resolution: 256,
            num_chunks: 8_000,
            mesh_simplify_ratio: 0.1,
            apply_texture: false,
            texture_size: 1024,
            output_format: OutputFormat::Glb,
        }
    }
}

/// Parameters that passed [`GenerationParameters::validate`], with every
/// dual-unit field normalised. Only this type can be submitted for a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Validated<T>(T);

impl<T> Validated<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Validated<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// Percentages (> 1.0) are divided by 100; fractions pass through.
/// `1.0` is a fraction, i.e. keep every face.
pub fn normalize_simplify_ratio(ratio: f32) -> f32 {
    if ratio > 1.0 { ratio / 100.0 } else { ratio }
}

/// Counts of 1..=200 are thousands; anything else is taken as-is.
pub fn normalize_num_chunks(num_chunks: u32) -> u32 {
    if (1..=NUM_CHUNKS_RANGE.1 / 1_000).contains(&num_chunks) {
        num_chunks * 1_000
    } else {
        num_chunks
    }
}

fn check_range<T: PartialOrd + std::fmt::Display>(name: &str, value: T, (lo, hi): (T, T)) -> Result<(), GenError> {
    if value < lo || value > hi {
        return Err(GenError::Validation(format!(
            "{name} must be between {lo} and {hi} (got {value})"
        )));
    }
    Ok(())
}

impl GenerationParameters {
    /// Range-checks every field and normalises the dual-unit ones.
    pub fn validate(self) -> Result<Validated<Self>, GenError> {
        if !self.guidance_scale.is_finite() {
            return Err(GenError::Validation("guidance_scale must be a number".into()));
        }
        check_range("guidance_scale", self.guidance_scale, GUIDANCE_SCALE_RANGE)?;
        check_range("inference_steps", self.inference_steps, INFERENCE_STEPS_RANGE)?;
        check_range("octree_resolution", self.octree_resolution, OCTREE_RESOLUTION_RANGE)?;
        check_range("texture_size", self.texture_size, TEXTURE_SIZE_RANGE)?;

        let num_chunks = normalize_num_chunks(self.num_chunks);
        check_range("num_chunks", num_chunks, NUM_CHUNKS_RANGE)?;

        let ratio = self.mesh_simplify_ratio;
        // Zero would simplify to an empty mesh.
        if !ratio.is_finite() || ratio <= 0.0 || ratio > 100.0 {
            return Err(GenError::Validation(format!(
                "mesh_simplify_ratio must be in (0, 1] or a percentage in (1, 100] (got {ratio})"
            )));
        }

        Ok(Validated(Self {
            num_chunks,
            mesh_simplify_ratio: normalize_simplify_ratio(ratio),
            ..self
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_simplify_ratio() {
        assert!((normalize_simplify_ratio(55.0) - 0.55).abs() < 1e-6);
        assert_eq!(normalize_simplify_ratio(0.2), 0.2);
        assert_eq!(normalize_simplify_ratio(100.0), 1.0);
        assert_eq!(normalize_simplify_ratio(1.0), 1.0);
    }

    #[test]
    fn test_normalize_num_chunks() {
        assert_eq!(normalize_num_chunks(80), 80_000);
        assert_eq!(normalize_num_chunks(200), 200_000);
        assert_eq!(normalize_num_chunks(8_000), 8_000);
        assert_eq!(normalize_num_chunks(0), 0);
    }

    #[test]
    fn test_defaults_validate() {
        let params = GenerationParameters::default().validate().unwrap();
        assert_eq!(params.octree_resolution, 256);
        assert_eq!(params.output_format, OutputFormat::Glb);
    }

    #[test]
    fn test_validate_normalises_once() {
        let params = GenerationParameters {
            num_chunks: 80,
            mesh_simplify_ratio: 10.0,
            ..Default::default()
        };
        let validated = params.validate().unwrap();
        assert_eq!(validated.num_chunks, 80_000);
        assert!((validated.mesh_simplify_ratio - 0.1).abs() < 1e-6);

        // Revalidating normalised values is a no-op.
        let again = validated.into_inner().validate().unwrap();
        assert_eq!(again.num_chunks, 80_000);
        assert!((again.mesh_simplify_ratio - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let cases = [
            GenerationParameters { guidance_scale: 10.5, ..Default::default() },
            GenerationParameters { guidance_scale: f32::NAN, ..Default::default() },
            GenerationParameters { inference_steps: 0, ..Default::default() },
            GenerationParameters { inference_steps: 51, ..Default::default() },
            GenerationParameters { octree_resolution: 64, ..Default::default() },
            GenerationParameters { octree_resolution: 1024, ..Default::default() },
            GenerationParameters { num_chunks: 0, ..Default::default() },
            GenerationParameters { num_chunks: 500, ..Default::default() },
            GenerationParameters { num_chunks: 250_000, ..Default::default() },
            GenerationParameters { mesh_simplify_ratio: 0.0, ..Default::default() },
            GenerationParameters { mesh_simplify_ratio: 101.0, ..Default::default() },
            GenerationParameters { texture_size: 256, ..Default::default() },
            GenerationParameters { texture_size: 8192, ..Default::default() },
        ];

        for params in cases {
            let err = params.clone().validate().unwrap_err();
            assert!(matches!(err, GenError::Validation(_)), "{params:?} passed validation");
        }
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("GLB".parse::<OutputFormat>().unwrap(), OutputFormat::Glb);
        assert_eq!("obj".parse::<OutputFormat>().unwrap(), OutputFormat::Obj);
        assert!("stl".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_params_deserialize_with_defaults() {
        let params: GenerationParameters =
            serde_json::from_str(r#"{"seed": 7, "output_format": "obj"}"#).unwrap();
        assert_eq!(params.seed, 7);
        assert_eq!(params.output_format, OutputFormat::Obj);
        assert_eq!(params.inference_steps, 30);
    }
}
