use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Physical position of a camera device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DevicePosition {
    Front,
    Back,
    External,
}

/// Color spaces a capture format can output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorSpace {
    Srgb,
    P3D65,
    HlgBt2020,
}

impl ColorSpace {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "srgb" => Some(ColorSpace::Srgb),
            "p3-d65" => Some(ColorSpace::P3D65),
            "hlg-bt2020" => Some(ColorSpace::HlgBt2020),
            _ => None,
        }
    }
}

/// One native capture format supported by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceFormat {
    pub photo_width: u32,
    pub photo_height: u32,
    pub video_width: u32,
    pub video_height: u32,
    /// Supported frame-rate range
    pub min_fps: u32,
    pub max_fps: u32,
    pub supports_hdr: bool,
    pub color_spaces: Vec<ColorSpace>,
}

impl DeviceFormat {
    pub fn supports_fps(&self, fps: u32) -> bool {
        fps >= self.min_fps && fps <= self.max_fps
    }

    pub fn supports_color_space(&self, color_space: ColorSpace) -> bool {
        self.color_spaces.contains(&color_space)
    }

    fn photo_pixels(&self) -> u64 {
        self.photo_width as u64 * self.photo_height as u64
    }

    fn video_pixels(&self) -> u64 {
        self.video_width as u64 * self.video_height as u64
    }
}

/// Caller-supplied filter narrowing down the device format to bind.
///
/// Hard constraints (fps range, HDR, color space) exclude formats entirely;
/// target resolutions only rank the remaining candidates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatFilter {
    pub photo_width: Option<u32>,
    pub photo_height: Option<u32>,
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
    pub fps: Option<u32>,
    pub hdr: Option<bool>,
    pub color_space: Option<ColorSpace>,
}

impl FormatFilter {
    /// Whether a format satisfies every hard constraint of this filter.
    pub fn matches(&self, format: &DeviceFormat) -> bool {
        if let Some(fps) = self.fps {
            if !format.supports_fps(fps) {
                return false;
            }
        }
        if self.hdr == Some(true) && !format.supports_hdr {
            return false;
        }
        if let Some(color_space) = self.color_space {
            if !format.supports_color_space(color_space) {
                return false;
            }
        }
        true
    }

    fn is_exact_resolution_match(&self, format: &DeviceFormat) -> bool {
        let photo_matches = match (self.photo_width, self.photo_height) {
            (Some(w), Some(h)) => format.photo_width == w && format.photo_height == h,
            _ => true,
        };
        let video_matches = match (self.video_width, self.video_height) {
            (Some(w), Some(h)) => format.video_width == w && format.video_height == h,
            _ => true,
        };
        photo_matches && video_matches
    }

    /// Ordering between two matching formats; `Less` means `a` is better.
    ///
    /// Exact target-resolution matches win outright; otherwise prefer the
    /// higher resolution, then the frame-rate range closest to the request.
    fn compare(&self, a: &DeviceFormat, b: &DeviceFormat) -> Ordering {
        let a_exact = self.is_exact_resolution_match(a);
        let b_exact = self.is_exact_resolution_match(b);
        if a_exact != b_exact {
            return if a_exact { Ordering::Less } else { Ordering::Greater };
        }

        let resolution = (b.photo_pixels() + b.video_pixels())
            .cmp(&(a.photo_pixels() + a.video_pixels()));
        if resolution != Ordering::Equal {
            return resolution;
        }

        let target_fps = self.fps.unwrap_or(30);
        let a_fps_delta = a.max_fps.abs_diff(target_fps);
        let b_fps_delta = b.max_fps.abs_diff(target_fps);
        a_fps_delta.cmp(&b_fps_delta)
    }

    /// Select the best matching format, or `None` if nothing satisfies the
    /// hard constraints.
    pub fn select<'a>(&self, formats: &'a [DeviceFormat]) -> Option<&'a DeviceFormat> {
        let mut matching: Vec<&DeviceFormat> = formats.iter().filter(|f| self.matches(f)).collect();
        matching.sort_by(|a, b| self.compare(a, b));
        matching.first().copied()
    }
}

/// Capabilities of one camera device, as reported to the bridging layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub position: DevicePosition,
    pub min_zoom: f32,
    pub max_zoom: f32,
    pub has_flash: bool,
    pub has_torch: bool,
    pub supports_focus: bool,
    pub supports_low_light_boost: bool,
    pub supports_depth_capture: bool,
    pub supports_raw_capture: bool,
    /// How many use-cases the hardware can bind concurrently. Legacy
    /// devices support a single one; most support three or more.
    pub max_concurrent_use_cases: usize,
    pub formats: Vec<DeviceFormat>,
}

impl DeviceDescriptor {
    /// Clamp a zoom factor into this device's supported range.
    pub fn clamp_zoom(&self, zoom: f32) -> f32 {
        zoom.clamp(self.min_zoom, self.max_zoom)
    }
}
