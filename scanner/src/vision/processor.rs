//! Scan image processing
//!
//! Turns the frame a barcode was decoded from into the image shown to the
//! user and written to storage:
//!
//! 1. planar YUV 4:2:0 to RGBA (BT.601, full range)
//! 2. contrast scaling then brightness offset on each colour channel
//! 3. rotation into the decoder's upright coordinate space
//! 4. bounding box outline at the decoded barcode's position
//!
//! Each stage consumes the previous buffer, so no intermediate image stays
//! resident once the next one exists.

use super::frame::{chroma_size, rotate_clockwise, YuvImage};
use super::types::{BoundingBox, DecodedBarcode};
use crate::config::{BOUNDING_BOX_COLOR, BOUNDING_BOX_STROKE_WIDTH};
use crate::error::{AppError, Result};
use image::buffer::ConvertBuffer;
use image::{Rgba, RgbImage, RgbaImage};
use tracing::{debug, warn};

/// Pixel layout of a processed image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
}

/// Result of processing one scan
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedImage {
    image: RgbaImage,
}

impl ProcessedImage {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgba8
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.image
    }

    /// Drop the alpha channel, as needed by JPEG
    pub fn to_rgb(&self) -> RgbImage {
        self.image.convert()
    }
}

/// Builds the annotated scan image
#[derive(Debug, Clone)]
pub struct ImageProcessor {
    box_color: Rgba<u8>,
    stroke_width: u32,
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProcessor {
    pub fn new() -> Self {
        Self {
            box_color: Rgba(BOUNDING_BOX_COLOR),
            stroke_width: BOUNDING_BOX_STROKE_WIDTH,
        }
    }

    pub fn with_box_style(box_color: [u8; 4], stroke_width: u32) -> Self {
        Self {
            box_color: Rgba(box_color),
            stroke_width,
        }
    }

    /// Run every stage. Returns `None` when any stage fails.
    ///
    /// `brightness` is added to each channel after scaling by
    /// `contrast / 100`.
    pub fn process(
        &self,
        frame: &YuvImage,
        barcode: &DecodedBarcode,
        brightness: u32,
        contrast: u32,
    ) -> Option<ProcessedImage> {
        match self.try_process(frame, barcode, brightness, contrast) {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(error = %e, "Image processing failed");
                None
            }
        }
    }

    fn try_process(
        &self,
        frame: &YuvImage,
        barcode: &DecodedBarcode,
        brightness: u32,
        contrast: u32,
    ) -> Result<ProcessedImage> {
        let start = std::time::Instant::now();

        let mut image = yuv420_to_rgba(frame)?;
        adjust_brightness_contrast(&mut image, brightness, contrast);

        let mut image = rotate_clockwise(image, frame.rotation_degrees).ok_or_else(|| {
            AppError::Image(format!("unsupported rotation {}", frame.rotation_degrees))
        })?;

        if let Some(bbox) = barcode.bounding_box {
            draw_box_outline(&mut image, bbox, self.box_color, self.stroke_width);
        }

        debug!(
            width = image.width(),
            height = image.height(),
            elapsed_ms = start.elapsed().as_millis(),
            "Processed scan image"
        );

        Ok(ProcessedImage::new(image))
    }
}

/// Convert planar YUV 4:2:0 to RGBA. Each chroma sample covers the 2x2
/// luma block it was subsampled from.
pub fn yuv420_to_rgba(frame: &YuvImage) -> Result<RgbaImage> {
    if !frame.is_complete() {
        return Err(AppError::Image(format!(
            "YUV planes too short for {}x{}",
            frame.width, frame.height
        )));
    }

    let (w, h) = (frame.width as usize, frame.height as usize);
    let planes = &frame.planes;
    let (cw, ch) = chroma_size(w, h);
    let mut rgba = Vec::with_capacity(w * h * 4);

    for y in 0..h {
        let cy = (y / 2).min(ch.saturating_sub(1));
        for x in 0..w {
            let cx = (x / 2).min(cw.saturating_sub(1));

            let luma = planes.y.sample(x, y) as f32;
            let u = planes.u.sample(cx, cy) as f32 - 128.0;
            let v = planes.v.sample(cx, cy) as f32 - 128.0;

            let r = luma + 1.402 * v;
            let g = luma - 0.344 * u - 0.714 * v;
            let b = luma + 1.772 * u;

            rgba.push(to_channel(r));
            rgba.push(to_channel(g));
            rgba.push(to_channel(b));
            rgba.push(255);
        }
    }

    RgbaImage::from_raw(frame.width, frame.height, rgba)
        .ok_or_else(|| AppError::Image("RGBA buffer size mismatch".to_string()))
}

/// Scale every colour channel by `contrast / 100`, then add `brightness`.
/// Alpha is left alone.
pub fn adjust_brightness_contrast(image: &mut RgbaImage, brightness: u32, contrast: u32) {
    let scale = contrast as f32 / 100.0;
    let offset = brightness as f32;

    for pixel in image.pixels_mut() {
        for channel in pixel.0.iter_mut().take(3) {
            *channel = to_channel(*channel as f32 * scale + offset);
        }
    }
}

/// Draw an unfilled rectangle whose stroke is centred on the box edges,
/// clipped to the image.
pub fn draw_box_outline(image: &mut RgbaImage, bbox: BoundingBox, color: Rgba<u8>, stroke: u32) {
    if stroke == 0 || bbox.width() < 0 || bbox.height() < 0 {
        return;
    }

    let (width, height) = (image.width() as i64, image.height() as i64);
    let half = stroke as i64 / 2;
    let rest = stroke as i64 - half;

    // Outer edge of the stroke, half-open
    let outer_left = (bbox.left as i64 - half).max(0);
    let outer_top = (bbox.top as i64 - half).max(0);
    let outer_right = (bbox.right as i64 + rest).min(width);
    let outer_bottom = (bbox.bottom as i64 + rest).min(height);

    // Inner edge of the stroke, half-open
    let inner_left = bbox.left as i64 + rest;
    let inner_top = bbox.top as i64 + rest;
    let inner_right = bbox.right as i64 - half;
    let inner_bottom = bbox.bottom as i64 - half;
    let hollow = inner_left < inner_right && inner_top < inner_bottom;

    for y in outer_top..outer_bottom {
        for x in outer_left..outer_right {
            let inside = hollow
                && x >= inner_left
                && x < inner_right
                && y >= inner_top
                && y < inner_bottom;
            if !inside {
                image.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

#[inline]
fn to_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::frame::{Frame, Plane, YuvPlanes};
    use crate::vision::types::BarcodeFormat;

    fn gray_frame(width: u32, height: u32, luma: u8, rotation: i32) -> YuvImage {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = chroma_size(w, h);
        YuvImage {
            width,
            height,
            rotation_degrees: rotation,
            planes: YuvPlanes {
                y: Plane::packed(vec![luma; w * h], w),
                u: Plane::packed(vec![128; cw * ch], cw),
                v: Plane::packed(vec![128; cw * ch], cw),
            },
        }
    }

    fn barcode(bbox: Option<BoundingBox>) -> DecodedBarcode {
        DecodedBarcode::new("1234567890128", BarcodeFormat::Ean13, bbox)
    }

    #[test]
    fn test_neutral_chroma_is_gray() {
        let rgba = yuv420_to_rgba(&gray_frame(4, 4, 100, 0)).unwrap();
        assert!(rgba.pixels().all(|p| p.0 == [100, 100, 100, 255]));
    }

    #[test]
    fn test_chroma_is_shared_by_2x2_block() {
        // 4x2 image, two chroma samples: red-ish on the left, neutral on the right
        let frame = YuvImage {
            width: 4,
            height: 2,
            rotation_degrees: 0,
            planes: YuvPlanes {
                y: Plane::packed(vec![128; 8], 4),
                u: Plane::packed(vec![128, 128], 2),
                v: Plane::packed(vec![200, 128], 2),
            },
        };

        let rgba = yuv420_to_rgba(&frame).unwrap();
        let left = rgba.get_pixel(1, 1).0;
        let right = rgba.get_pixel(2, 0).0;
        assert!(left[0] > left[1], "left block should lean red: {:?}", left);
        assert_eq!(right, [128, 128, 128, 255]);
        assert_eq!(rgba.get_pixel(0, 0), rgba.get_pixel(1, 1));
    }

    #[test]
    fn test_strided_planes() {
        let frame = YuvImage {
            width: 2,
            height: 2,
            rotation_degrees: 0,
            planes: YuvPlanes {
                y: Plane {
                    data: vec![50, 0, 60, 0, 70, 0, 80, 0],
                    row_stride: 4,
                    pixel_stride: 2,
                },
                u: Plane::packed(vec![128], 1),
                v: Plane::packed(vec![128], 1),
            },
        };

        let rgba = yuv420_to_rgba(&frame).unwrap();
        assert_eq!(rgba.get_pixel(1, 0).0[0], 60);
        assert_eq!(rgba.get_pixel(0, 1).0[0], 70);
    }

    #[test]
    fn test_short_planes_are_rejected() {
        let mut frame = gray_frame(4, 4, 10, 0);
        frame.planes.y.data.truncate(3);
        assert!(yuv420_to_rgba(&frame).is_err());
    }

    #[test]
    fn test_identity_adjustment() {
        let mut image = RgbaImage::new(3, 1);
        image.put_pixel(0, 0, Rgba([0, 0, 0, 7]));
        image.put_pixel(1, 0, Rgba([12, 128, 200, 255]));
        image.put_pixel(2, 0, Rgba([255, 255, 255, 0]));
        let original = image.clone();

        adjust_brightness_contrast(&mut image, 0, 100);

        assert_eq!(image, original);
    }

    #[test]
    fn test_adjustment_scales_then_offsets_and_clamps() {
        let mut image = RgbaImage::from_pixel(1, 1, Rgba([100, 200, 10, 42]));

        adjust_brightness_contrast(&mut image, 80, 140);

        // 100 * 1.4 + 80 = 220, 200 * 1.4 + 80 clamps, 10 * 1.4 + 80 = 94
        assert_eq!(image.get_pixel(0, 0).0, [220, 255, 94, 42]);
    }

    #[test]
    fn test_low_contrast_halves() {
        let mut image = RgbaImage::from_pixel(1, 1, Rgba([100, 51, 0, 255]));
        adjust_brightness_contrast(&mut image, 0, 50);
        assert_eq!(image.get_pixel(0, 0).0, [50, 26, 0, 255]);
    }

    #[test]
    fn test_box_outline_is_unfilled() {
        let mut image = RgbaImage::from_pixel(40, 40, Rgba([0, 0, 0, 255]));
        let green = Rgba([0, 255, 0, 255]);

        draw_box_outline(&mut image, BoundingBox::new(10, 10, 30, 30), green, 4);

        // On the edges
        assert_eq!(*image.get_pixel(10, 20), green);
        assert_eq!(*image.get_pixel(20, 29), green);
        assert_eq!(*image.get_pixel(8, 8), green);
        // Centre and far outside untouched
        assert_eq!(image.get_pixel(20, 20).0, [0, 0, 0, 255]);
        assert_eq!(image.get_pixel(2, 2).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_box_outline_is_clipped() {
        let mut image = RgbaImage::new(10, 10);
        let green = Rgba([0, 255, 0, 255]);

        draw_box_outline(&mut image, BoundingBox::new(-20, -20, 50, 50), green, 8);
        draw_box_outline(&mut image, BoundingBox::new(100, 100, 120, 120), green, 8);

        assert_eq!(image.get_pixel(5, 5).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_process_rotates_and_draws() {
        let processor = ImageProcessor::new();
        let frame = gray_frame(8, 4, 100, 90);

        let processed = processor
            .process(&frame, &barcode(Some(BoundingBox::new(0, 0, 4, 8))), 0, 100)
            .unwrap();

        assert_eq!((processed.width(), processed.height()), (4, 8));
        assert_eq!(processed.pixel_format(), PixelFormat::Rgba8);
        assert_eq!(processed.as_rgba().get_pixel(0, 0).0, BOUNDING_BOX_COLOR);
    }

    #[test]
    fn test_process_without_box_keeps_pixels() {
        let processor = ImageProcessor::new();
        let frame = gray_frame(4, 4, 60, 180);

        let processed = processor.process(&frame, &barcode(None), 0, 100).unwrap();

        assert!(processed
            .as_rgba()
            .pixels()
            .all(|p| p.0 == [60, 60, 60, 255]));
    }

    #[test]
    fn test_process_rejects_bad_input() {
        let processor = ImageProcessor::new();

        assert!(processor
            .process(&gray_frame(4, 4, 60, 45), &barcode(None), 80, 140)
            .is_none());

        let mut short = gray_frame(4, 4, 60, 0);
        short.planes.v.data.clear();
        assert!(processor.process(&short, &barcode(None), 80, 140).is_none());
    }

    #[test]
    fn test_round_trip_from_rgba_frame() {
        let source = RgbaImage::from_pixel(6, 4, Rgba([40, 160, 90, 255]));
        let frame = Frame::from_rgba(&source, 0).to_yuv_image().unwrap();

        let rgba = yuv420_to_rgba(&frame).unwrap();
        let [r, g, b, a] = rgba.get_pixel(3, 2).0;
        assert!((r as i32 - 40).abs() <= 3);
        assert!((g as i32 - 160).abs() <= 3);
        assert!((b as i32 - 90).abs() <= 3);
        assert_eq!(a, 255);
    }

    #[test]
    fn test_to_rgb_drops_alpha() {
        let image = ProcessedImage::new(RgbaImage::from_pixel(2, 1, Rgba([1, 2, 3, 4])));
        assert_eq!(image.to_rgb().into_raw(), vec![1, 2, 3, 1, 2, 3]);
    }
}
