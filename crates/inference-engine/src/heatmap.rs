//! Anomaly-map overlay rendering
//!
//! Turns the reference backend's per-cell anomaly map into an operator
//! visualization: the map is normalized, resized to the original image,
//! colorized with a JET colormap, and blended over the original at fixed
//! weights. The result is embedded as a base64 JPEG data URL.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, RgbImage};

use common::{Error, Result};
use model_backend::AnomalyMap;

/// Blend weight of the original image
const ORIGINAL_WEIGHT: f32 = 0.6;

/// Blend weight of the colorized map
const MAP_WEIGHT: f32 = 0.4;

/// JPEG quality of the embedded overlay
const JPEG_QUALITY: u8 = 85;

/// Renders the overlay and returns it as a `data:image/jpeg;base64,…` URL.
pub fn overlay_data_url(original: &DynamicImage, map: &AnomalyMap) -> Result<String> {
    let cells = (map.width as usize) * (map.height as usize);
    if cells == 0 || map.values.len() != cells {
        return Err(Error::Inference(format!(
            "anomaly map is malformed: {}x{} grid with {} values",
            map.width,
            map.height,
            map.values.len()
        )));
    }

    // normalize the raw deviations to 0..255
    let min = map.values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = map.values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    let normalized: Vec<u8> = map
        .values
        .iter()
        .map(|v| {
            if range > 0.0 {
                ((v - min) / range * 255.0).round() as u8
            } else {
                0
            }
        })
        .collect();

    let gray = GrayImage::from_raw(map.width, map.height, normalized)
        .ok_or_else(|| Error::Inference("anomaly map buffer mismatch".to_string()))?;

    let original_rgb = original.to_rgb8();
    let (width, height) = (original_rgb.width(), original_rgb.height());
    let resized = image::imageops::resize(&gray, width, height, FilterType::Triangle);

    let blended = RgbImage::from_fn(width, height, |x, y| {
        let heat = jet(resized.get_pixel(x, y)[0]);
        let base = original_rgb.get_pixel(x, y);
        image::Rgb([
            blend(base[0], heat[0]),
            blend(base[1], heat[1]),
            blend(base[2], heat[2]),
        ])
    });

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut Cursor::new(&mut jpeg), JPEG_QUALITY)
        .encode_image(&blended)
        .map_err(|e| Error::Inference(format!("failed to encode heatmap: {}", e)))?;

    Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(&jpeg)))
}

fn blend(original: u8, heat: u8) -> u8 {
    (original as f32 * ORIGINAL_WEIGHT + heat as f32 * MAP_WEIGHT).round() as u8
}

/// Classic JET colormap over a 0..255 intensity.
fn jet(value: u8) -> [u8; 3] {
    let t = value as f32 / 255.0;
    let r = (1.5 - (4.0 * t - 3.0).abs()).clamp(0.0, 1.0);
    let g = (1.5 - (4.0 * t - 2.0).abs()).clamp(0.0, 1.0);
    let b = (1.5 - (4.0 * t - 1.0).abs()).clamp(0.0, 1.0);
    [
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    ]
}
