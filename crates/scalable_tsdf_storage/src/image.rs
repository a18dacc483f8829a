//! Frames consumed by integration.
//!
//! Depth is in meters along the camera `+Z` axis. A depth sample is invalid if it is zero, negative, non-finite or beyond the
//! volume's `max_depth`.

use crate::Rgb;

use scalable_tsdf_core::prelude::*;

use auto_impl::auto_impl;

/// A rectangular grid of depth samples.
#[auto_impl(&, &mut, Box)]
pub trait DepthImage {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// The depth at `pixel`. Callers only pass pixels inside the image.
    fn depth(&self, pixel: Point2i) -> f32;
}

/// A rectangular grid of colors aligned with a `DepthImage`.
#[auto_impl(&, &mut, Box)]
pub trait ColorImage {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// The color at `pixel`. Callers only pass pixels inside the image.
    fn color(&self, pixel: Point2i) -> Rgb;
}

/// Returns true iff `depth` is a usable sample.
#[inline]
pub fn is_valid_depth(depth: f32, max_depth: f32) -> bool {
    depth.is_finite() && depth > 0.0 && depth <= max_depth
}

/// A row-major image that owns its pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageBuffer<T> {
    width: u32,
    height: u32,
    pixels: Vec<T>,
}

impl<T> ImageBuffer<T> {
    /// Returns `None` unless `pixels.len() == width * height`.
    pub fn from_vec(width: u32, height: u32, pixels: Vec<T>) -> Option<Self> {
        (pixels.len() == width as usize * height as usize).then(|| Self {
            width,
            height,
            pixels,
        })
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(Point2i) -> T) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height as i32 {
            for x in 0..width as i32 {
                pixels.push(f(PointN([x, y])));
            }
        }

        Self {
            width,
            height,
            pixels,
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn contains(&self, pixel: Point2i) -> bool {
        pixel.x() >= 0
            && pixel.y() >= 0
            && (pixel.x() as u32) < self.width
            && (pixel.y() as u32) < self.height
    }

    #[inline]
    fn index(&self, pixel: Point2i) -> usize {
        pixel.y() as usize * self.width as usize + pixel.x() as usize
    }

    #[inline]
    pub fn get(&self, pixel: Point2i) -> Option<&T> {
        if self.contains(pixel) {
            Some(&self.pixels[self.index(pixel)])
        } else {
            None
        }
    }

    #[inline]
    pub fn get_mut(&mut self, pixel: Point2i) -> Option<&mut T> {
        if self.contains(pixel) {
            let i = self.index(pixel);
            Some(&mut self.pixels[i])
        } else {
            None
        }
    }

    #[inline]
    pub fn pixels(&self) -> &[T] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<T> {
        self.pixels
    }
}

impl<T: Clone> ImageBuffer<T> {
    pub fn filled(width: u32, height: u32, value: T) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width as usize * height as usize],
        }
    }
}

impl DepthImage for ImageBuffer<f32> {
    #[inline]
    fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    fn depth(&self, pixel: Point2i) -> f32 {
        self.get(pixel).copied().unwrap_or(0.0)
    }
}

impl ColorImage for ImageBuffer<Rgb> {
    #[inline]
    fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    fn color(&self, pixel: Point2i) -> Rgb {
        self.get(pixel).copied().unwrap_or_default()
    }
}

/// One frame of depth, with optional aligned color and an optional mask. Pixels whose mask value is zero are ignored.
pub struct RgbdFrame<'a, D, C = &'a ImageBuffer<Rgb>> {
    pub depth: D,
    pub color: Option<C>,
    pub mask: Option<&'a ImageBuffer<u8>>,
}

impl<'a, D: DepthImage> RgbdFrame<'a, D> {
    pub fn depth_only(depth: D) -> Self {
        Self {
            depth,
            color: None,
            mask: None,
        }
    }
}

impl<'a, D: DepthImage, C: ColorImage> RgbdFrame<'a, D, C> {
    pub fn new(depth: D, color: C) -> Self {
        Self {
            depth,
            color: Some(color),
            mask: None,
        }
    }

    pub fn with_mask(mut self, mask: &'a ImageBuffer<u8>) -> Self {
        self.mask = Some(mask);

        self
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.depth.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.depth.height()
    }

    /// False if the mask excludes `pixel`.
    #[inline]
    pub fn is_unmasked(&self, pixel: Point2i) -> bool {
        self.mask
            .map_or(true, |m| m.get(pixel).map_or(false, |v| *v != 0))
    }

    /// The depth at `pixel`, if it is valid and unmasked.
    #[inline]
    pub fn valid_depth(&self, pixel: Point2i, max_depth: f32) -> Option<f32> {
        if !self.is_unmasked(pixel) {
            return None;
        }
        let d = self.depth.depth(pixel);

        is_valid_depth(d, max_depth).then(|| d)
    }

    #[inline]
    pub fn color(&self, pixel: Point2i) -> Option<Rgb> {
        self.color.as_ref().map(|c| c.color(pixel))
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
