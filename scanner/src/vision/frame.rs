//! Camera frames
//!
//! A `Frame` is one unit of camera output: planar YUV 4:2:0 buffers plus the
//! rotation the sensor reports. The camera owns the underlying buffer, so a
//! frame carries a release hook that runs exactly once, either on an
//! explicit `release()` or when the frame is dropped.

use image::{GrayImage, ImageBuffer, Pixel, RgbaImage};
use std::fmt;

type ReleaseHook = Box<dyn FnOnce() + Send + 'static>;

/// One plane of a planar YUV image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    /// Bytes between the starts of two consecutive rows
    pub row_stride: usize,
    /// Bytes between two consecutive samples of a row
    pub pixel_stride: usize,
}

impl Plane {
    /// Tightly packed plane (`pixel_stride` 1, `row_stride` = width)
    pub fn packed(data: Vec<u8>, width: usize) -> Self {
        Self {
            data,
            row_stride: width,
            pixel_stride: 1,
        }
    }

    /// Whether the plane holds `width` x `height` samples
    pub fn covers(&self, width: usize, height: usize) -> bool {
        if width == 0 || height == 0 {
            return true;
        }
        if self.pixel_stride == 0 || self.row_stride == 0 {
            return false;
        }
        let last = (height - 1)
            .checked_mul(self.row_stride)
            .zip((width - 1).checked_mul(self.pixel_stride))
            .and_then(|(rows, cols)| rows.checked_add(cols));
        matches!(last, Some(last) if last < self.data.len())
    }

    #[inline]
    pub fn sample(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.row_stride + x * self.pixel_stride]
    }
}

/// Y, U and V planes of a 4:2:0 image. Chroma planes are half resolution
/// in each dimension, rounded up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YuvPlanes {
    pub y: Plane,
    pub u: Plane,
    pub v: Plane,
}

/// Frame pixels detached from the camera buffer.
///
/// This is what outlives the frame: the image processor runs on it after
/// the frame itself has been released.
#[derive(Debug, Clone)]
pub struct YuvImage {
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: i32,
    pub planes: YuvPlanes,
}

impl YuvImage {
    /// Whether every plane is large enough for the declared geometry
    pub fn is_complete(&self) -> bool {
        let (w, h) = (self.width as usize, self.height as usize);
        let (cw, ch) = chroma_size(w, h);
        self.planes.y.covers(w, h) && self.planes.u.covers(cw, ch) && self.planes.v.covers(cw, ch)
    }
}

/// Image handed to the decode capability: the luma plane plus the rotation
/// needed to make it upright.
#[derive(Debug, Clone)]
pub struct InputImage {
    pub luma: GrayImage,
    pub rotation_degrees: i32,
}

impl InputImage {
    /// Luma rotated upright. Bounding boxes reported by a decoder are in
    /// this coordinate space.
    pub fn upright(&self) -> Option<GrayImage> {
        rotate_clockwise(self.luma.clone(), self.rotation_degrees)
    }
}

/// One camera frame
pub struct Frame {
    width: u32,
    height: u32,
    rotation_degrees: i32,
    planes: Option<YuvPlanes>,
    release: Option<ReleaseHook>,
}

impl Frame {
    pub fn new(width: u32, height: u32, rotation_degrees: i32, planes: Option<YuvPlanes>) -> Self {
        Self {
            width,
            height,
            rotation_degrees,
            planes,
            release: None,
        }
    }

    /// Attach the hook that hands the buffer back to the camera
    pub fn with_release_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    /// Build an I420 frame from an RGBA still image (BT.601 full range)
    pub fn from_rgba(image: &RgbaImage, rotation_degrees: i32) -> Self {
        let (width, height) = image.dimensions();
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = chroma_size(w, h);

        let mut y_plane = Vec::with_capacity(w * h);
        for pixel in image.pixels() {
            let [r, g, b, _] = pixel.0;
            let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
            y_plane.push(luma.round().clamp(0.0, 255.0) as u8);
        }

        let mut u_plane = Vec::with_capacity(cw * ch);
        let mut v_plane = Vec::with_capacity(cw * ch);
        for cy in 0..ch {
            for cx in 0..cw {
                // Average the 2x2 block this chroma sample covers
                let (mut r, mut g, mut b, mut n) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
                for y in (cy * 2)..((cy * 2 + 2).min(h)) {
                    for x in (cx * 2)..((cx * 2 + 2).min(w)) {
                        let [pr, pg, pb, _] = image.get_pixel(x as u32, y as u32).0;
                        r += pr as f32;
                        g += pg as f32;
                        b += pb as f32;
                        n += 1.0;
                    }
                }
                let (r, g, b) = (r / n, g / n, b / n);
                let u = 128.0 - 0.168736 * r - 0.331264 * g + 0.5 * b;
                let v = 128.0 + 0.5 * r - 0.418688 * g - 0.081312 * b;
                u_plane.push(u.round().clamp(0.0, 255.0) as u8);
                v_plane.push(v.round().clamp(0.0, 255.0) as u8);
            }
        }

        let planes = YuvPlanes {
            y: Plane::packed(y_plane, w),
            u: Plane::packed(u_plane, cw),
            v: Plane::packed(v_plane, cw),
        };

        Self::new(width, height, rotation_degrees, Some(planes))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rotation_degrees(&self) -> i32 {
        self.rotation_degrees
    }

    pub fn planes(&self) -> Option<&YuvPlanes> {
        self.planes.as_ref()
    }

    /// Copy the pixels out so they survive the frame's release
    pub fn to_yuv_image(&self) -> Option<YuvImage> {
        let planes = self.planes.clone()?;
        Some(YuvImage {
            width: self.width,
            height: self.height,
            rotation_degrees: self.rotation_degrees,
            planes,
        })
    }

    /// Decoder input: the luma plane without row padding
    pub fn input_image(&self) -> Option<InputImage> {
        let planes = self.planes.as_ref()?;
        let (w, h) = (self.width as usize, self.height as usize);
        if !planes.y.covers(w, h) {
            return None;
        }

        let mut luma = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                luma.push(planes.y.sample(x, y));
            }
        }

        let luma = GrayImage::from_raw(self.width, self.height, luma)?;
        Some(InputImage {
            luma,
            rotation_degrees: self.rotation_degrees,
        })
    }

    /// Hand the buffer back to the camera
    pub fn release(mut self) {
        self.run_release_hook();
    }

    fn run_release_hook(&mut self) {
        if let Some(hook) = self.release.take() {
            hook();
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.run_release_hook();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("rotation_degrees", &self.rotation_degrees)
            .field("has_planes", &self.planes.is_some())
            .finish()
    }
}

/// Dimensions of a 4:2:0 chroma plane
pub fn chroma_size(width: usize, height: usize) -> (usize, usize) {
    (width.div_ceil(2), height.div_ceil(2))
}

/// Normalise a rotation to 0, 90, 180 or 270. Non right angles are rejected.
pub fn normalize_rotation(degrees: i32) -> Option<i32> {
    let degrees = degrees.rem_euclid(360);
    (degrees % 90 == 0).then_some(degrees)
}

/// Rotate clockwise by a right angle, swapping the canvas for 90/270.
/// The input buffer is consumed so it is freed as soon as the rotated copy
/// exists.
pub fn rotate_clockwise<P>(
    image: ImageBuffer<P, Vec<P::Subpixel>>,
    degrees: i32,
) -> Option<ImageBuffer<P, Vec<P::Subpixel>>>
where
    P: Pixel + 'static,
{
    match normalize_rotation(degrees)? {
        0 => Some(image),
        90 => Some(image::imageops::rotate90(&image)),
        180 => Some(image::imageops::rotate180(&image)),
        _ => Some(image::imageops::rotate270(&image)),
    }
}
