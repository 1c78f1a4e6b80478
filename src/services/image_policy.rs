//! Fixed resize bounds and encoder settings for every image derivative.
//!
//! Bounds are "fit within" limits: sources smaller than a bound are kept at
//! their native size.

use crate::models::Derivative;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeSpec {
    pub derivative: Derivative,
    /// Longest permitted edge; every box is square.
    pub bound: u32,
    /// WebP quality, 0-100.
    pub quality: u8,
    /// AVIF quality for sizes that also get an AVIF copy.
    pub avif_quality: Option<u8>,
}

pub const TINY: SizeSpec = SizeSpec {
    derivative: Derivative::TinyBase64,
    bound: 20,
    quality: 50,
    avif_quality: None,
};

pub const THUMBNAIL: SizeSpec = SizeSpec {
    derivative: Derivative::Thumbnail,
    bound: 150,
    quality: 85,
    avif_quality: None,
};

pub const SMALL: SizeSpec = SizeSpec {
    derivative: Derivative::Small,
    bound: 600,
    quality: 92,
    avif_quality: Some(75),
};

pub const MEDIUM: SizeSpec = SizeSpec {
    derivative: Derivative::Medium,
    bound: 1200,
    quality: 94,
    avif_quality: Some(80),
};

pub const LARGE: SizeSpec = SizeSpec {
    derivative: Derivative::Large,
    bound: 2000,
    quality: 96,
    avif_quality: Some(85),
};

/// Full table, smallest first.
pub const SIZE_POLICY: [SizeSpec; 5] = [TINY, THUMBNAIL, SMALL, MEDIUM, LARGE];

/// The four sizes written to disk as WebP files.
pub const FILE_SIZES: [SizeSpec; 4] = [THUMBNAIL, SMALL, MEDIUM, LARGE];

/// Longest edge of the bitmap averaged for the dominant colour.
pub const DOMINANT_COLOR_BOUND: u32 = 50;

/// Gaussian sigma applied to the tiny placeholder.
pub const TINY_BLUR_SIGMA: f32 = 1.0;

/// libwebp effort level; 6 is the slowest, smallest output.
pub const WEBP_METHOD: i32 = 6;

/// rav1e speed preset, 1 (slowest) to 10.
pub const AVIF_SPEED: u8 = 6;

/// Derivatives regenerate/copy fall back to as the re-encoding source, in
/// preference order.
pub const SOURCE_PREFERENCE: [Derivative; 2] = [Derivative::Large, Derivative::Medium];

pub fn spec_for(derivative: Derivative) -> Option<&'static SizeSpec> {
    SIZE_POLICY.iter().find(|s| s.derivative == derivative)
}

/// AVIF quality for an AVIF derivative, looked up through its WebP source.
pub fn avif_quality_for(avif: Derivative) -> Option<u8> {
    FILE_SIZES
        .iter()
        .find(|s| s.derivative.avif_counterpart() == Some(avif))
        .and_then(|s| s.avif_quality)
}

/// Whether this build can encode AVIF at all.
pub const fn avif_compiled_in() -> bool {
    cfg!(feature = "avif")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_values() {
        let rows: Vec<(Derivative, u32, u8, Option<u8>)> = SIZE_POLICY
            .iter()
            .map(|s| (s.derivative, s.bound, s.quality, s.avif_quality))
            .collect();

        assert_eq!(
            rows,
            vec![
                (Derivative::TinyBase64, 20, 50, None),
                (Derivative::Thumbnail, 150, 85, None),
                (Derivative::Small, 600, 92, Some(75)),
                (Derivative::Medium, 1200, 94, Some(80)),
                (Derivative::Large, 2000, 96, Some(85)),
            ]
        );
    }

    #[test]
    fn test_avif_only_for_three_sizes() {
        let avif: Vec<_> = FILE_SIZES
            .iter()
            .filter_map(|s| s.avif_quality.map(|_| s.derivative))
            .collect();
        assert_eq!(avif, vec![Derivative::Small, Derivative::Medium, Derivative::Large]);
        assert_eq!(avif_quality_for(Derivative::MediumAvif), Some(80));
        assert_eq!(avif_quality_for(Derivative::Medium), None);
    }

    #[test]
    fn test_size_lookup() {
        assert_eq!(spec_for(Derivative::Large).map(|s| s.bound), Some(2000));
        assert!(spec_for(Derivative::DominantColor).is_none());
    }
}
