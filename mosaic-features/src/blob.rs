use crate::corner::{FeaturePoint, FeaturePoints, HarrisDetector, HarrisMethod};
use crate::descriptors::{describe, Descriptor};
use crate::pyramid::Octave;
use crate::{Error, Extractor, KeyPoint};
use log::*;

/// Centers whose value ties the neighborhood extremum within this
/// tolerance still count as extrema.
const EXTREMUM_TOLERANCE: f64 = 1e-12;

/// A scale-space extremum: a roughly circular feature of characteristic
/// size found in the difference-of-Gaussians octaves.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Blob {
    /// Drawing radius, `local_sigma * sqrt(2)`.
    pub radius: f64,
    /// Column in the base image's frame.
    pub x: i64,
    /// Row in the base image's frame.
    pub y: i64,
    /// The difference response at the extremum.
    pub intensity: f64,
    /// `local_sigma / level0_sigma`; scales the descriptor window.
    pub descriptor_size_ratio: f64,
    /// Octave the extremum was found in.
    pub octave: usize,
    /// Difference level within the octave.
    pub level: usize,
    /// Column within the octave's own (possibly downsampled) image.
    pub image_x: i64,
    /// Row within the octave's own image.
    pub image_y: i64,
}

fn almost_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= EXTREMUM_TOLERANCE
}

impl Extractor {
    /// Scan the difference octaves for 3x3x3 local extrema above the blob
    /// threshold.
    ///
    /// Interior levels of the full chain (overhead included) are compared
    /// against their scale neighbors, so extrema near the top of an
    /// octave's nominal range are still testable. Candidate coordinates
    /// are rescaled back into the base image's frame.
    pub fn find_blobs(&self, differences: &[Octave]) -> Vec<Blob> {
        let Some(first) = differences.first() else {
            return Vec::new();
        };
        let base_width = first.through_all(0).image.width() as f64;
        let base_height = first.through_all(0).image.height() as f64;
        let mut result = Vec::new();
        for (octave_index, octave) in differences.iter().enumerate() {
            let start_sigma = octave.through_all(0).local_sigma;
            for level in 1..octave.total_len().saturating_sub(1) {
                let previous = &octave.through_all(level - 1).image;
                let current_element = octave.through_all(level);
                let current = &current_element.image;
                let next = &octave.through_all(level + 1).image;
                let (width, height) = (current.width(), current.height());
                if width < 3 || height < 3 {
                    continue;
                }
                for i in 1..width - 1 {
                    for j in 1..height - 1 {
                        let center = current.at(i, j);
                        if center < self.blob_threshold {
                            continue;
                        }
                        let mut min_value = f64::INFINITY;
                        let mut max_value = f64::NEG_INFINITY;
                        for x in i - 1..=i + 1 {
                            for y in j - 1..=j + 1 {
                                for img in [previous, current, next] {
                                    let value = img.at(x, y);
                                    min_value = min_value.min(value);
                                    max_value = max_value.max(value);
                                }
                            }
                        }
                        if almost_equal(center, min_value) || almost_equal(center, max_value) {
                            result.push(Blob {
                                radius: current_element.local_sigma * 2f64.sqrt(),
                                x: (i as f64 * base_width / width as f64).round() as i64,
                                y: (j as f64 * base_height / height as f64).round() as i64,
                                intensity: center,
                                descriptor_size_ratio: current_element.local_sigma / start_sigma,
                                octave: octave_index,
                                level,
                                image_x: i as i64,
                                image_y: j as i64,
                            });
                        }
                    }
                }
            }
        }
        debug!("found {} blob candidates", result.len());
        result
    }

    /// Build descriptors for blob candidates that survive a corner gate.
    ///
    /// Each blob is scored on its own octave level with an eigenvalue
    /// Harris sized to the blob's scale ratio; weak candidates are
    /// dropped. The descriptor window is sized the same way, and the
    /// produced keypoints carry base-frame coordinates plus the level's
    /// absolute scale.
    pub fn describe_blobs(
        &self,
        blobs: &[Blob],
        octaves: &[Octave],
    ) -> Result<Vec<Descriptor>, Error> {
        let mut descriptors = Vec::new();
        for blob in blobs {
            let element = octaves[blob.octave].through_all(blob.level);
            let gate_window = {
                let window = (5.0 * blob.descriptor_size_ratio).round() as usize;
                // Gaussian windows must be odd
                (if window % 2 == 0 { window + 1 } else { window }).max(3)
            };
            let harris = HarrisDetector::new(
                &element.image,
                gate_window,
                self.corner_threshold,
                HarrisMethod::EigenValues,
            )?;
            let response = harris.calculate_point(blob.image_x, blob.image_y);
            if response < self.corner_threshold {
                continue;
            }
            let points = FeaturePoints::new(
                element.image.width(),
                element.image.height(),
                vec![FeaturePoint {
                    x: blob.image_x,
                    y: blob.image_y,
                    response,
                }],
            );
            let window =
                (self.descriptor_window as f64 * blob.descriptor_size_ratio).round() as usize;
            let described = describe(
                &element.image,
                &points,
                window,
                self.histogram_rows,
                self.histogram_bins,
                self.cell_assignment,
                self.orientation_bins,
            )?;
            for mut descriptor in described {
                descriptor.keypoint = KeyPoint {
                    point: (blob.x as f64, blob.y as f64),
                    response,
                    size: blob.radius,
                    angle: descriptor.keypoint.angle,
                    scale: element.global_sigma,
                    octave: blob.octave,
                    level: blob.level,
                };
                descriptors.push(descriptor);
            }
        }
        info!(
            "described {} descriptors from {} blobs",
            descriptors.len(),
            blobs.len()
        );
        Ok(descriptors)
    }
}
