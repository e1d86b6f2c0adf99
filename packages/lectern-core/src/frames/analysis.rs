//! Frame content analysis.
//!
//! A cheap content-vs-face heuristic decides whether a sampled frame
//! shows screen content (slides, UI, code) or a talking head. Screen
//! content carries dense sharp edges; webcam shots carry a person and
//! few edges. Person detection sits behind a seam so the detector
//! backend can be swapped or disabled.

use image::GrayImage;

/// A detected region, in pixels.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Detector seam for faces and upper bodies.
pub trait PersonDetector: Send + Sync {
    fn detect_upper_bodies(&self, frame: &GrayImage) -> Vec<Region>;
    fn detect_faces(&self, frame: &GrayImage) -> Vec<Region>;
}

/// Detector that reports nothing. With it, frame filtering relies on
/// edge density alone.
pub struct DisabledPersonDetector;

impl PersonDetector for DisabledPersonDetector {
    fn detect_upper_bodies(&self, _frame: &GrayImage) -> Vec<Region> {
        Vec::new()
    }

    fn detect_faces(&self, _frame: &GrayImage) -> Vec<Region> {
        Vec::new()
    }
}

/// Upper-body coverage above this fraction marks a webcam shot.
const UPPER_BODY_REJECT_RATIO: f64 = 0.15;
/// Face coverage above this fraction marks a talking head outright.
const FACE_REJECT_RATIO: f64 = 0.20;
/// Any face combined with edge density below this marks a talking head.
const LOW_EDGE_WITH_FACE: f64 = 0.11;
/// Minimum edge density for a frame to count as screen content.
const MIN_CONTENT_EDGE_DENSITY: f64 = 0.05;
/// Gradient magnitude above which a pixel counts as an edge.
const EDGE_MAGNITUDE_THRESHOLD: i32 = 128;

/// Fraction of pixels lying on sharp edges (Sobel gradient magnitude).
///
/// Screen content (text, UI chrome, slides) scores well above 10%;
/// webcam feeds and transition slides sit in low single digits.
pub fn edge_density(frame: &GrayImage) -> f64 {
    let (width, height) = frame.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let mut edge_pixels = 0u64;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let p = |dx: i32, dy: i32| -> i32 {
                frame
                    .get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)
                    .0[0] as i32
            };
            let gx = -p(-1, -1) - 2 * p(-1, 0) - p(-1, 1) + p(1, -1) + 2 * p(1, 0) + p(1, 1);
            let gy = -p(-1, -1) - 2 * p(0, -1) - p(1, -1) + p(-1, 1) + 2 * p(0, 1) + p(1, 1);
            if gx.abs() + gy.abs() > EDGE_MAGNITUDE_THRESHOLD {
                edge_pixels += 1;
            }
        }
    }
    edge_pixels as f64 / ((width - 2) as u64 * (height - 2) as u64) as f64
}

/// Why a frame was kept or rejected, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameVerdict {
    KeepScreenContent,
    RejectUpperBody,
    RejectFaceLowEdges,
    RejectLargeFace,
    RejectBlank,
}

impl FrameVerdict {
    pub fn keep(self) -> bool {
        self == Self::KeepScreenContent
    }
}

/// Classifies a frame as screen content or not.
pub fn classify_frame(frame: &GrayImage, detector: &dyn PersonDetector) -> FrameVerdict {
    let frame_area = (frame.width() as u64 * frame.height() as u64).max(1);
    let density = edge_density(frame);

    let upper_bodies = detector.detect_upper_bodies(frame);
    if !upper_bodies.is_empty() {
        let coverage =
            upper_bodies.iter().map(Region::area).sum::<u64>() as f64 / frame_area as f64;
        if coverage > UPPER_BODY_REJECT_RATIO {
            return FrameVerdict::RejectUpperBody;
        }
    }

    let faces = detector.detect_faces(frame);
    if !faces.is_empty() {
        if density < LOW_EDGE_WITH_FACE {
            return FrameVerdict::RejectFaceLowEdges;
        }
        let coverage = faces.iter().map(Region::area).sum::<u64>() as f64 / frame_area as f64;
        if coverage > FACE_REJECT_RATIO {
            return FrameVerdict::RejectLargeFace;
        }
    }

    if density > MIN_CONTENT_EDGE_DENSITY {
        FrameVerdict::KeepScreenContent
    } else {
        FrameVerdict::RejectBlank
    }
}

/// 64-bit perceptual average-hash: downsample to 8x8, threshold on the
/// mean. Stored with each kept frame for traceability.
pub fn perceptual_hash(frame: &GrayImage) -> u64 {
    let small = image::imageops::resize(frame, 8, 8, image::imageops::FilterType::Triangle);
    let mean: u32 = small.pixels().map(|p| p.0[0] as u32).sum::<u32>() / 64;

    let mut hash = 0u64;
    for (i, pixel) in small.pixels().enumerate() {
        if pixel.0[0] as u32 > mean {
            hash |= 1 << i;
        }
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Vertical bars 4px wide: a quarter of interior pixels sit on a
    /// hard edge, like dense UI chrome.
    fn busy_frame() -> GrayImage {
        GrayImage::from_fn(64, 64, |x, _y| {
            image::Luma([if (x / 4) % 2 == 0 { 255 } else { 0 }])
        })
    }

    fn blank_frame() -> GrayImage {
        GrayImage::from_pixel(64, 64, image::Luma([128]))
    }

    struct ScriptedDetector {
        upper_bodies: Vec<Region>,
        faces: Vec<Region>,
    }

    impl PersonDetector for ScriptedDetector {
        fn detect_upper_bodies(&self, _frame: &GrayImage) -> Vec<Region> {
            self.upper_bodies.clone()
        }
        fn detect_faces(&self, _frame: &GrayImage) -> Vec<Region> {
            self.faces.clone()
        }
    }

    #[test]
    fn busy_frame_has_high_edge_density() {
        let density = edge_density(&busy_frame());
        assert!(density > 0.2, "density was {}", density);
    }

    #[test]
    fn blank_frame_has_zero_edge_density() {
        assert_eq!(edge_density(&blank_frame()), 0.0);
    }

    #[test]
    fn screen_content_kept_without_detections() {
        let verdict = classify_frame(&busy_frame(), &DisabledPersonDetector);
        assert_eq!(verdict, FrameVerdict::KeepScreenContent);
    }

    #[test]
    fn blank_frame_rejected() {
        let verdict = classify_frame(&blank_frame(), &DisabledPersonDetector);
        assert_eq!(verdict, FrameVerdict::RejectBlank);
    }

    #[test]
    fn large_upper_body_rejected_even_with_edges() {
        let detector = ScriptedDetector {
            // 32x64 of a 64x64 frame = 50% coverage.
            upper_bodies: vec![Region { x: 0, y: 0, width: 32, height: 64 }],
            faces: vec![],
        };
        let verdict = classify_frame(&busy_frame(), &detector);
        assert_eq!(verdict, FrameVerdict::RejectUpperBody);
    }

    #[test]
    fn face_with_low_edges_rejected() {
        let detector = ScriptedDetector {
            upper_bodies: vec![],
            faces: vec![Region { x: 0, y: 0, width: 8, height: 8 }],
        };
        let verdict = classify_frame(&blank_frame(), &detector);
        assert_eq!(verdict, FrameVerdict::RejectFaceLowEdges);
    }

    #[test]
    fn large_face_rejected_despite_edges() {
        let detector = ScriptedDetector {
            upper_bodies: vec![],
            // 32x32 of 64x64 = 25% coverage.
            faces: vec![Region { x: 0, y: 0, width: 32, height: 32 }],
        };
        let verdict = classify_frame(&busy_frame(), &detector);
        assert_eq!(verdict, FrameVerdict::RejectLargeFace);
    }

    #[test]
    fn small_face_on_busy_screen_kept() {
        let detector = ScriptedDetector {
            upper_bodies: vec![],
            // Small picture-in-picture webcam: 6x6 of 64x64 < 1%.
            faces: vec![Region { x: 0, y: 0, width: 6, height: 6 }],
        };
        let verdict = classify_frame(&busy_frame(), &detector);
        assert_eq!(verdict, FrameVerdict::KeepScreenContent);
    }

    #[test]
    fn hash_stable_and_discriminating() {
        assert_eq!(perceptual_hash(&busy_frame()), perceptual_hash(&busy_frame()));
        assert_ne!(perceptual_hash(&busy_frame()), perceptual_hash(&blank_frame()));
    }
}
