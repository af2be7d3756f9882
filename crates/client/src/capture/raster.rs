//! Band planning, compositing, downscaling and encoding.

use image::buffer::ConvertBuffer;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, ImageEncoder, RgbImage, RgbaImage};

use pageshot_core::{Dimensions, Error, ExportFormat};

/// A horizontal slice of the page, `[y, y + height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub y: u32,
    pub height: u32,
}

/// Height actually rendered for a page measured at `measured` CSS pixels.
///
/// A zero measurement falls back to the viewport height.
pub fn clamp_height(measured: u32, max_height: u32, viewport_height: u32) -> u32 {
    let height = if measured == 0 { viewport_height } else { measured };
    height.min(max_height).max(1)
}

/// Split `height` into bands: one pass up to `threshold`, else `tile_height` bands.
///
/// Band heights always sum to `height`; only the last band may be shorter.
pub fn tile_plan(height: u32, threshold: u32, tile_height: u32) -> Vec<Band> {
    if height <= threshold || tile_height == 0 {
        return vec![Band { y: 0, height }];
    }

    let mut bands = Vec::with_capacity(height.div_ceil(tile_height) as usize);
    let mut y = 0;
    while y < height {
        let band_height = tile_height.min(height - y);
        bands.push(Band { y, height: band_height });
        y += band_height;
    }
    bands
}

/// Decode a band screenshot and paste it into `canvas` at `y`.
pub fn composite(canvas: &mut RgbaImage, png: &[u8], y: u32) -> Result<(), Error> {
    let band = image::load_from_memory(png)
        .map_err(|e| Error::RenderFailed(format!("undecodable band at y={y}: {e}")))?
        .to_rgba8();
    imageops::replace(canvas, &band, 0, i64::from(y));
    Ok(())
}

/// Output size for a raster of `width` x `height` after scaling and edge capping.
pub fn output_dimensions(width: u32, height: u32, scale: f32, max_edge: Option<u32>) -> Dimensions {
    let mut w = (width as f64 * scale as f64).round().max(1.0);
    let mut h = (height as f64 * scale as f64).round().max(1.0);

    if let Some(edge) = max_edge.map(f64::from) {
        let longest = w.max(h);
        if longest > edge {
            let factor = edge / longest;
            w = (w * factor).round().max(1.0);
            h = (h * factor).round().max(1.0);
        }
    }

    Dimensions::new(w as u32, h as u32)
}

#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    pub scale: f32,
    pub max_edge: Option<u32>,
    pub format: ExportFormat,
    pub quality: u8,
}

#[derive(Debug, Clone)]
pub struct Exported {
    pub bytes: Vec<u8>,
    pub dimensions: Dimensions,
    pub source_dimensions: Dimensions,
}

/// Downscale `canvas` and encode it. The full-resolution buffer is consumed.
pub fn export(canvas: RgbaImage, options: &ExportOptions) -> Result<Exported, Error> {
    let source_dimensions = Dimensions::new(canvas.width(), canvas.height());
    let dimensions = output_dimensions(canvas.width(), canvas.height(), options.scale, options.max_edge);

    let scaled = if dimensions == source_dimensions {
        canvas
    } else {
        let resized = imageops::resize(&canvas, dimensions.width, dimensions.height, FilterType::Lanczos3);
        drop(canvas);
        resized
    };

    let bytes = encode(&scaled, options.format, options.quality)?;
    Ok(Exported { bytes, dimensions, source_dimensions })
}

/// Encode an RGBA raster as JPEG (alpha discarded) or PNG.
pub fn encode(img: &RgbaImage, format: ExportFormat, quality: u8) -> Result<Vec<u8>, Error> {
    let (width, height) = img.dimensions();
    let mut buf = Vec::new();

    let result = match format {
        ExportFormat::Jpeg => {
            let rgb: RgbImage = img.convert();
            JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).write_image(
                rgb.as_raw(),
                width,
                height,
                ColorType::Rgb8,
            )
        }
        ExportFormat::Png => PngEncoder::new(&mut buf).write_image(img.as_raw(), width, height, ColorType::Rgba8),
    };

    result.map_err(|e| Error::EncodeFailed(format!("{format:?} {width}x{height}: {e}")))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::sandbox::testing::solid_png;
    use image::{GenericImageView, Rgba};

    #[test]
    fn test_clamp_height() {
        assert_eq!(clamp_height(50_000, 12_000, 1080), 12_000);
        assert_eq!(clamp_height(0, 12_000, 1080), 1080);
        assert_eq!(clamp_height(3_000, 12_000, 1080), 3_000);
    }

    #[test]
    fn test_single_pass_at_or_below_threshold() {
        assert_eq!(tile_plan(2048, 2048, 512), vec![Band { y: 0, height: 2048 }]);
        assert_eq!(tile_plan(10, 2048, 512), vec![Band { y: 0, height: 10 }]);
    }

    #[test]
    fn test_tile_heights_sum_to_raster_height() {
        for height in [2049, 4096, 5000, 12_000, 11_999] {
            let bands = tile_plan(height, 2048, 512);
            assert_eq!(bands.iter().map(|b| b.height).sum::<u32>(), height);
            assert!(bands.iter().all(|b| b.height <= 512 && b.height > 0));
            for pair in bands.windows(2) {
                assert_eq!(pair[0].y + pair[0].height, pair[1].y);
            }
        }
        assert_eq!(tile_plan(5000, 2048, 512).last(), Some(&Band { y: 4608, height: 392 }));
    }

    #[test]
    fn test_composite_places_band() {
        let mut canvas = RgbaImage::new(4, 6);
        composite(&mut canvas, &solid_png(4, 2), 4).unwrap();
        assert_eq!(canvas.get_pixel(0, 3), &Rgba([0, 0, 0, 0]));
        assert_eq!(canvas.get_pixel(3, 5), &Rgba([200, 100, 50, 255]));
    }

    #[test]
    fn test_composite_rejects_garbage() {
        let mut canvas = RgbaImage::new(4, 4);
        assert!(matches!(composite(&mut canvas, b"not a png", 0), Err(Error::RenderFailed(_))));
    }

    #[test]
    fn test_output_dimensions() {
        assert_eq!(output_dimensions(1920, 12_000, 0.25, None), Dimensions::new(480, 3000));
        assert_eq!(output_dimensions(1920, 12_000, 0.25, Some(1500)), Dimensions::new(240, 1500));
        assert_eq!(output_dimensions(390, 844, 1.0, None), Dimensions::new(390, 844));
        assert_eq!(output_dimensions(1, 1, 0.25, None), Dimensions::new(1, 1));
    }

    #[test]
    fn test_export_jpeg_downscaled() {
        let canvas = RgbaImage::from_pixel(400, 800, Rgba([10, 20, 30, 255]));
        let options = ExportOptions { scale: 0.25, max_edge: None, format: ExportFormat::Jpeg, quality: 70 };

        let exported = export(canvas, &options).unwrap();
        assert_eq!(exported.source_dimensions, Dimensions::new(400, 800));
        assert_eq!(exported.dimensions, Dimensions::new(100, 200));
        assert_eq!(&exported.bytes[..2], &[0xff, 0xd8]);

        let decoded = image::load_from_memory(&exported.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (100, 200));
    }

    #[test]
    fn test_export_png_full_size() {
        let canvas = RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 255]));
        let options = ExportOptions { scale: 1.0, max_edge: None, format: ExportFormat::Png, quality: 70 };

        let exported = export(canvas, &options).unwrap();
        assert_eq!(exported.dimensions, Dimensions::new(8, 8));
        assert_eq!(&exported.bytes[1..4], b"PNG");
    }
}
