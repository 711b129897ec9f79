mod blob;
mod corner;
mod derivatives;
mod descriptors;
mod histogram;
mod image;
mod matcher;
mod pyramid;

pub use crate::image::{
    gaussian_blur, horizontal_filter, separable_filter, vertical_filter, BorderPolicy,
    BorderedImage, GaussianKernel, GrayImageBuffer, GrayscaleMethod, Kernel,
};
pub use blob::Blob;
pub use corner::{FeaturePoint, FeaturePoints, HarrisDetector, HarrisMethod, MoravecDetector};
pub use derivatives::{sobel_horizontal, sobel_vertical, SobelAxis, SobelKernel};
pub use descriptors::{
    describe, normalize_angle, normalize_vector, CellAssignment, Descriptor, SECOND_PEAK_RATIO,
};
pub use histogram::{Histogram, HistogramBuilder};
pub use matcher::{find_closest, matches, DistanceMetric, Match, DISTINCTIVENESS_RATIO};
pub use pyramid::{delta_sigma, to_differences, Octave, OctaveElement};

use log::*;

/// Errors reported by the feature pipeline.
///
/// Configuration problems surface at construction or call time and are
/// never coerced; out-of-range pixel access is *not* an error anywhere
/// (see [`BorderPolicy`]).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("buffer of {actual} values cannot back a {width}x{height} image")]
    BufferSize {
        width: usize,
        height: usize,
        actual: usize,
    },
    #[error("images must have equal dimensions, got {expected:?} and {actual:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("kernel size {size} must be odd and at least 3")]
    InvalidKernelSize { size: usize },
    #[error("window offset must be positive, got {offset}")]
    InvalidOffset { offset: i64 },
    #[error("threshold must be positive, got {threshold}")]
    InvalidThreshold { threshold: f64 },
    #[error("target sigma {target} must exceed source sigma {source_sigma}")]
    SigmaNotIncreasing { source_sigma: f64, target: f64 },
    #[error("configuration value {name} must be positive")]
    InvalidConfig { name: &'static str },
}

/// A point of interest in an image.
/// This pretty much follows from OpenCV conventions.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyPoint {
    /// The horizontal and vertical coordinates in the base image's frame,
    /// +x right and +y down from the top-left corner.
    pub point: (f64, f64),

    /// The magnitude of response from the detector that produced the point.
    pub response: f64,

    /// The radius defining the extent of the keypoint, in pixel units.
    pub size: f64,

    /// The orientation angle in `[0, 2*pi)`.
    pub angle: f64,

    /// Absolute blur at which the point was found, comparable across the
    /// whole pyramid.
    pub scale: f64,

    /// The octave in which the keypoint was detected.
    pub octave: usize,

    /// The level within the octave.
    pub level: usize,
}

/// Contains the configuration parameters of the feature pipeline.
///
/// The most important parameter to pay attention to is `blob_threshold`.
/// [`Extractor::new`] can be used to set this threshold and let all other
/// parameters remain default. The default value is `0.03`.
#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Extractor {
    /// Number of octaves in the pyramid.
    pub octave_count: usize,

    /// Blur steps per octave; the sigma ratio between adjacent levels is
    /// `2^(1/shrinks_per_octave)`.
    pub shrinks_per_octave: usize,

    /// Blur assigned to the first level of the first octave (sigma units).
    pub base_sigma: f64,

    /// Blur assumed already present in the input image (sigma units).
    pub image_sigma: f64,

    /// Extra levels past the nominal top of each octave, used only so
    /// extrema can be tested near the top of the octave's scale range.
    pub overhead_size: usize,

    /// Difference-of-Gaussians response threshold to accept a blob.
    pub blob_threshold: f64,

    /// Corner-strength gate applied to blob candidates before a descriptor
    /// is built for them.
    pub corner_threshold: f64,

    /// Descriptor sampling window side, in pixels, at unit scale ratio.
    pub descriptor_window: usize,

    /// The descriptor grid is `histogram_rows x histogram_rows` cells.
    pub histogram_rows: usize,

    /// Angular bins per descriptor grid cell.
    pub histogram_bins: usize,

    /// Angular bins of the dominant-orientation histogram.
    pub orientation_bins: usize,

    /// How gradient samples are distributed over the descriptor grid.
    pub cell_assignment: CellAssignment,
}

impl Extractor {
    /// This convenience constructor is provided for the very common case
    /// that the blob threshold needs to be modified.
    pub fn new(blob_threshold: f64) -> Self {
        Self {
            blob_threshold,
            ..Default::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        let positives = [
            ("octave_count", self.octave_count),
            ("shrinks_per_octave", self.shrinks_per_octave),
            ("descriptor_window", self.descriptor_window),
            ("histogram_rows", self.histogram_rows),
            ("histogram_bins", self.histogram_bins),
            ("orientation_bins", self.orientation_bins),
        ];
        for (name, value) in positives {
            if value == 0 {
                return Err(Error::InvalidConfig { name });
            }
        }
        if self.image_sigma <= 0.0 {
            return Err(Error::InvalidConfig {
                name: "image_sigma",
            });
        }
        if self.blob_threshold <= 0.0 {
            return Err(Error::InvalidThreshold {
                threshold: self.blob_threshold,
            });
        }
        if self.corner_threshold <= 0.0 {
            return Err(Error::InvalidThreshold {
                threshold: self.corner_threshold,
            });
        }
        Ok(())
    }

    /// Run the scale-space pipeline end-to-end: pyramid, differences,
    /// extrema, descriptors.
    ///
    /// The client might be only interested in certain portions of the
    /// process, all of which are exposed in public functions, but this
    /// function can document how the various parts fit together.
    pub fn extract(
        &self,
        image: &BorderedImage,
    ) -> Result<(Vec<KeyPoint>, Vec<Descriptor>), Error> {
        self.validate()?;
        trace!("generating {} octaves", self.octave_count);
        let octaves = self.generate_octaves(image)?;
        trace!("building difference-of-Gaussians octaves");
        let differences = to_differences(&octaves)?;
        trace!("scanning for scale-space extrema");
        let blobs = self.find_blobs(&differences);
        let descriptors = self.describe_blobs(&blobs, &octaves)?;
        info!("extracted {} descriptors", descriptors.len());
        let keypoints = descriptors.iter().map(|d| d.keypoint).collect();
        Ok((keypoints, descriptors))
    }
}

impl Default for Extractor {
    fn default() -> Extractor {
        Extractor {
            octave_count: 3,
            shrinks_per_octave: 4,
            base_sigma: 1.6,
            image_sigma: 0.5,
            overhead_size: 3,
            blob_threshold: 0.03,
            corner_threshold: 0.005,
            descriptor_window: 16,
            histogram_rows: 4,
            histogram_bins: 10,
            orientation_bins: 36,
            cell_assignment: CellAssignment::Bilinear,
        }
    }
}
