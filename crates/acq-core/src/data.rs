//! Frame geometry and pixel-format data types.

/// Per-frame geometry: pixel dimensions plus pixel depth in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameDim {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per pixel (1 or 2 here).
    pub bytes_per_pixel: u32,
}

impl FrameDim {
    /// Build a frame geometry.
    pub fn new(width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        Self {
            width,
            height,
            bytes_per_pixel,
        }
    }

    /// Frame payload size in bytes.
    pub fn mem_size(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel as usize
    }
}

/// Stored image depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    /// 8 bits per pixel.
    Bpp8,
    /// 16 bits per pixel.
    Bpp16,
}

impl ImageType {
    /// Bytes per pixel for this depth.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            ImageType::Bpp8 => 1,
            ImageType::Bpp16 => 2,
        }
    }
}

/// Video/pixel formats the adapter can stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoMode {
    /// 8-bit monochrome.
    Y8,
    /// 16-bit monochrome.
    Y16,
    /// 8-bit Bayer mosaic.
    BayerRg8,
    /// 16-bit Bayer mosaic.
    BayerRg16,
}

impl VideoMode {
    /// Parse a device `PixelFormat` attribute value.
    pub fn from_pixel_format(format: &str) -> Option<Self> {
        match format {
            "Mono8" => Some(VideoMode::Y8),
            "Mono16" => Some(VideoMode::Y16),
            "Bayer8" => Some(VideoMode::BayerRg8),
            "Bayer16" => Some(VideoMode::BayerRg16),
            _ => None,
        }
    }

    /// Device `PixelFormat` attribute value for this mode.
    pub fn pixel_format(self) -> &'static str {
        match self {
            VideoMode::Y8 => "Mono8",
            VideoMode::Y16 => "Mono16",
            VideoMode::BayerRg8 => "Bayer8",
            VideoMode::BayerRg16 => "Bayer16",
        }
    }

    /// Stored depth for this mode.
    pub fn image_type(self) -> ImageType {
        match self {
            VideoMode::Y8 | VideoMode::BayerRg8 => ImageType::Bpp8,
            VideoMode::Y16 | VideoMode::BayerRg16 => ImageType::Bpp16,
        }
    }

    /// Bytes per pixel for this mode.
    pub fn bytes_per_pixel(self) -> u32 {
        self.image_type().bytes_per_pixel()
    }

    /// Whether this is a monochrome mode.
    pub fn is_mono(self) -> bool {
        matches!(self, VideoMode::Y8 | VideoMode::Y16)
    }
}

/// One delivered frame with its pixel payload.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bits per pixel (8 or 16).
    pub bit_depth: u32,
    /// Zero-based acquisition frame index.
    pub frame_idx: i64,
    /// Raw pixel data, row-major.
    pub data: Vec<u8>,
}

/// Region of interest in sensor coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Roi {
    /// Origin column.
    pub x: u32,
    /// Origin row.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Roi {
    /// Build a region.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Full-sensor region for the given size.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// A region with zero area means "no ROI requested".
    pub fn is_active(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Binning factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bin {
    /// Horizontal factor.
    pub x: u32,
    /// Vertical factor.
    pub y: u32,
}

impl Default for Bin {
    fn default() -> Self {
        Self { x: 1, y: 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_size_accounts_for_depth() {
        assert_eq!(FrameDim::new(4, 3, 2).mem_size(), 24);
        assert_eq!(FrameDim::new(4, 3, 1).mem_size(), 12);
    }

    #[test]
    fn video_mode_round_trips_pixel_format() {
        for mode in [
            VideoMode::Y8,
            VideoMode::Y16,
            VideoMode::BayerRg8,
            VideoMode::BayerRg16,
        ] {
            assert_eq!(VideoMode::from_pixel_format(mode.pixel_format()), Some(mode));
        }
        assert_eq!(VideoMode::from_pixel_format("Rgb24"), None);
    }

    #[test]
    fn inactive_roi_is_detected() {
        assert!(!Roi::default().is_active());
        assert!(Roi::full(640, 480).is_active());
    }
}
