use crate::config::{PreprocessingConfig, Validatable};
use image::{
    imageops::{self, FilterType},
    DynamicImage, ImageError,
};
use ndarray::{Array, Ix4};
use serde::Deserialize;
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreprocessorError {
    #[error("Failed to read preprocessor config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse preprocessor config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid preprocessor config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(untagged)]
enum ImageSize {
    Square(u32),
    HeightWidth { height: u32, width: u32 },
}

impl ImageSize {
    fn dimensions(self) -> (u32, u32) {
        match self {
            ImageSize::Square(side) => (side, side),
            ImageSize::HeightWidth { height, width } => (width, height),
        }
    }
}

/// Image processor parameters as exported next to the model
/// (`preprocessor_config.json`).
#[derive(Debug, Deserialize, Clone)]
pub struct PreprocessorParams {
    #[serde(default = "default_true")]
    pub do_resize: bool,
    #[serde(default = "default_size")]
    size: ImageSize,
    /// PIL resampling code.
    #[serde(default = "default_resample")]
    pub resample: u8,
    #[serde(default = "default_true")]
    pub do_rescale: bool,
    #[serde(default = "default_rescale_factor")]
    pub rescale_factor: f32,
    #[serde(default = "default_true")]
    pub do_normalize: bool,
    #[serde(default = "default_channel_stats")]
    pub image_mean: [f32; 3],
    #[serde(default = "default_channel_stats")]
    pub image_std: [f32; 3],
}

fn default_true() -> bool {
    true
}

fn default_size() -> ImageSize {
    ImageSize::Square(224)
}

fn default_resample() -> u8 {
    2
}

fn default_rescale_factor() -> f32 {
    1.0 / 255.0
}

fn default_channel_stats() -> [f32; 3] {
    [0.5, 0.5, 0.5]
}

impl Default for PreprocessorParams {
    fn default() -> Self {
        Self {
            do_resize: true,
            size: default_size(),
            resample: default_resample(),
            do_rescale: true,
            rescale_factor: default_rescale_factor(),
            do_normalize: true,
            image_mean: default_channel_stats(),
            image_std: default_channel_stats(),
        }
    }
}

fn filter_from_pil(resample: u8) -> FilterType {
    match resample {
        0 => FilterType::Nearest,
        1 => FilterType::Lanczos3,
        3 => FilterType::CatmullRom,
        _ => FilterType::Triangle,
    }
}

/// Turns uploaded bytes into the NCHW tensor the classifier expects.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    width: u32,
    height: u32,
    filter: FilterType,
    params: PreprocessorParams,
}

impl ImagePreprocessor {
    pub fn new(preprocessing_cfg: &PreprocessingConfig) -> Result<Self, PreprocessorError> {
        let contents = std::fs::read_to_string(preprocessing_cfg.get_path())?;
        let params: PreprocessorParams = serde_json::from_str(&contents)?;
        let preprocessor = Self::from_params(params)?;
        tracing::info!(
            "Preprocessing to {}x{} with {:?}",
            preprocessor.width,
            preprocessor.height,
            preprocessor.filter
        );
        Ok(preprocessor)
    }

    pub fn from_params(params: PreprocessorParams) -> Result<Self, PreprocessorError> {
        let (width, height) = params.size.dimensions();
        if width == 0 || height == 0 {
            return Err(PreprocessorError::Invalid(format!(
                "target size {}x{} is empty",
                width, height
            )));
        }
        if params.do_normalize && params.image_std.iter().any(|std| *std == 0.0) {
            return Err(PreprocessorError::Invalid(
                "image_std must not contain zero".to_string(),
            ));
        }

        Ok(Self {
            width,
            height,
            filter: filter_from_pil(params.resample),
            params,
        })
    }

    pub fn decode(image_data: &[u8]) -> Result<DynamicImage, ImageError> {
        let image_reader = image::ImageReader::new(Cursor::new(image_data)).with_guessed_format()?;
        image_reader.decode()
    }

    pub fn preprocess(&self, image: &DynamicImage) -> Array<f32, Ix4> {
        let mut rgb = image.to_rgb8();
        if self.params.do_resize {
            rgb = imageops::resize(&rgb, self.width, self.height, self.filter);
        }
        let (width, height) = rgb.dimensions();

        let mut input = Array::zeros((1, 3, height as usize, width as usize));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for (channel, value) in pixel.0.iter().enumerate() {
                input[[0, channel, y as usize, x as usize]] = self.scale(channel, *value);
            }
        }

        input
    }

    fn scale(&self, channel: usize, value: u8) -> f32 {
        let mut value = value as f32;
        if self.params.do_rescale {
            value *= self.params.rescale_factor;
        }
        if self.params.do_normalize {
            value = (value - self.params.image_mean[channel]) / self.params.image_std[channel];
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, Rgba};

    fn encode_png(img: DynamicImage) -> Vec<u8> {
        let mut image_data = Vec::new();
        img.write_to(&mut Cursor::new(&mut image_data), image::ImageFormat::Png)
            .unwrap();
        image_data
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 60, Rgb([255, 0, 0]));
        let image_data = encode_png(DynamicImage::ImageRgb8(img));
        let preprocessor = ImagePreprocessor::from_params(PreprocessorParams::default()).unwrap();

        let image = ImagePreprocessor::decode(&image_data).unwrap();
        let input = preprocessor.preprocess(&image);

        assert_eq!(input.shape(), &[1, 3, 224, 224]);
        assert!((input[[0, 0, 10, 10]] - 1.0).abs() < 1e-3);
        assert!((input[[0, 1, 10, 10]] + 1.0).abs() < 1e-3);
        assert!((input[[0, 2, 200, 200]] + 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_alpha_channel_is_dropped() {
        let img = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_pixel(32, 32, Rgba([0, 0, 255, 10]));
        let image_data = encode_png(DynamicImage::ImageRgba8(img));
        let preprocessor = ImagePreprocessor::from_params(PreprocessorParams::default()).unwrap();

        let input = preprocessor.preprocess(&ImagePreprocessor::decode(&image_data).unwrap());

        assert_eq!(input.shape(), &[1, 3, 224, 224]);
        assert!((input[[0, 2, 0, 0]] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_params_from_json() {
        let params: PreprocessorParams = serde_json::from_str(
            r#"{
                "do_normalize": true,
                "do_resize": true,
                "image_mean": [0.485, 0.456, 0.406],
                "image_std": [0.229, 0.224, 0.225],
                "resample": 3,
                "size": {"height": 256, "width": 192}
            }"#,
        )
        .unwrap();
        let preprocessor = ImagePreprocessor::from_params(params).unwrap();

        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(10, 10, Rgb([0, 0, 0]));
        let input = preprocessor.preprocess(&DynamicImage::ImageRgb8(img));

        assert_eq!(input.shape(), &[1, 3, 256, 192]);
        assert!((input[[0, 0, 0, 0]] - (-0.485 / 0.229)).abs() < 1e-4);
        assert_eq!(preprocessor.filter, FilterType::CatmullRom);
    }

    #[test]
    fn test_without_resize_keeps_dimensions() {
        let params = PreprocessorParams {
            do_resize: false,
            do_normalize: false,
            ..PreprocessorParams::default()
        };
        let preprocessor = ImagePreprocessor::from_params(params).unwrap();
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(7, 5, Rgb([255, 255, 255]));

        let input = preprocessor.preprocess(&DynamicImage::ImageRgb8(img));

        assert_eq!(input.shape(), &[1, 3, 5, 7]);
        assert!((input[[0, 1, 4, 6]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_shortest_edge_size_is_rejected() {
        let result = serde_json::from_str::<PreprocessorParams>(r#"{"size": {"shortest_edge": 224}}"#);

        assert!(result.is_err());
    }

    #[test]
    fn test_zero_std_is_rejected() {
        let params = PreprocessorParams {
            image_std: [0.5, 0.0, 0.5],
            ..PreprocessorParams::default()
        };

        assert!(ImagePreprocessor::from_params(params).is_err());
    }

    #[test]
    fn test_decode_rejects_non_image_bytes() {
        let result = ImagePreprocessor::decode(b"definitely not an image");

        assert!(result.is_err());
    }
}
