use crate::corner::{FeaturePoint, FeaturePoints};
use crate::derivatives::{sobel_horizontal, sobel_vertical};
use crate::histogram::HistogramBuilder;
use crate::image::{BorderedImage, GaussianKernel, Kernel};
use crate::{Error, KeyPoint};
use log::*;
use std::f64::consts::PI;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// A second orientation peak at or above this fraction of the top peak
/// produces an extra descriptor for the same keypoint.
pub const SECOND_PEAK_RATIO: f64 = 0.8;

/// Fold any angle into `[0, 2*pi)`.
pub fn normalize_angle(angle: f64) -> f64 {
    (2.0 * PI + angle) % (2.0 * PI)
}

/// Scale a vector to unit L2 norm; the zero vector is returned unchanged.
pub fn normalize_vector(values: &[f64]) -> Vec<f64> {
    let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm == 0.0 {
        return values.to_vec();
    }
    values.iter().map(|v| v / norm).collect()
}

/// How a rotated gradient sample is placed on the spatial descriptor grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CellAssignment {
    /// Distribute each vote over the four nearest cells, weighted by
    /// relative distance to the cell centers. Shares falling outside the
    /// grid are dropped.
    Bilinear,
    /// Hard assignment to the containing cell. Cheaper and cruder; kept as
    /// an explicit reduced-fidelity mode.
    Nearest,
}

/// A fixed-length feature vector and the keypoint it fingerprints. Always
/// stored L2-normalized.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Descriptor {
    pub values: Vec<f64>,
    pub keypoint: KeyPoint,
}

/// Per-pixel gradient magnitude and angle, derived once per image.
struct GradientField {
    magnitude: BorderedImage,
    angle: BorderedImage,
}

impl GradientField {
    fn of(image: &BorderedImage) -> Result<Self, Error> {
        #[cfg(not(feature = "rayon"))]
        let (gx, gy) = (sobel_horizontal(image), sobel_vertical(image));
        #[cfg(feature = "rayon")]
        let (gx, gy) = rayon::join(|| sobel_horizontal(image), || sobel_vertical(image));
        let magnitude = gx.hypot_with(&gy)?;
        let angle = gx.zip_map(&gy, |x, y| normalize_angle(y.atan2(x)))?;
        Ok(Self { magnitude, angle })
    }
}

/// Orientation peaks of the Gaussian-weighted gradient histogram around a
/// point: the dominant angle, possibly joined by a near-tied second.
fn dominant_orientations(
    point: &FeaturePoint,
    lower: i64,
    higher: i64,
    gaussian: &GaussianKernel,
    gradients: &GradientField,
    bins: usize,
) -> Vec<f64> {
    let step = 2.0 * PI / bins as f64;
    let mut builder = HistogramBuilder::new(step, bins);
    for x in -lower..=higher {
        for y in -lower..=higher {
            let weight = gradients.magnitude.get(point.x + x, point.y + y) * gaussian.value(x, y);
            let angle = gradients.angle.get(point.x + x, point.y + y);
            builder.add_gradient(weight, angle);
        }
    }
    builder.build().two_peak_angles(SECOND_PEAK_RATIO)
}

/// Build rotation-normalized descriptors for a set of feature points.
///
/// For each point the sampling window is rotated against the point's
/// dominant orientation(s); every gradient sample votes into a
/// `rows x rows` grid of angular histograms with soft angular binning, and
/// the concatenated grid is L2-normalized.
pub fn describe(
    image: &BorderedImage,
    points: &FeaturePoints,
    window: usize,
    rows: usize,
    bins: usize,
    assignment: CellAssignment,
    orientation_bins: usize,
) -> Result<Vec<Descriptor>, Error> {
    if window == 0 {
        return Err(Error::InvalidConfig {
            name: "descriptor_window",
        });
    }
    if rows == 0 || bins == 0 || orientation_bins == 0 {
        return Err(Error::InvalidConfig {
            name: "histogram shape",
        });
    }
    let gradients = GradientField::of(image)?;
    let gaussian = GaussianKernel::from_size(window / 2 * 2 + 1)?;
    let lower = (window / 2) as i64;
    let higher = if window % 2 == 0 { lower - 1 } else { lower };
    let cell_size = window as f64 / rows as f64;
    let step = 2.0 * PI / bins as f64;

    let describe_point = |point: &FeaturePoint| -> Vec<Descriptor> {
        let orientations = dominant_orientations(
            point,
            lower,
            higher,
            &gaussian,
            &gradients,
            orientation_bins,
        );
        orientations
            .into_iter()
            .map(|turn_angle| {
                let mut builders: Vec<HistogramBuilder> = (0..rows * rows)
                    .map(|_| HistogramBuilder::new(step, bins))
                    .collect();
                let (sin, cos) = turn_angle.sin_cos();
                for i in -lower..=higher {
                    for j in -lower..=higher {
                        let rotated_i = i as f64 * cos + j as f64 * sin;
                        let rotated_j = j as f64 * cos - i as f64 * sin;
                        let rounded_i = rotated_i.floor() as i64;
                        let rounded_j = rotated_j.floor() as i64;
                        if rounded_i < -lower
                            || rounded_i > higher
                            || rounded_j < -lower
                            || rounded_j > higher
                        {
                            continue;
                        }
                        let weight = gradients.magnitude.get(point.x + i, point.y + j)
                            * gaussian.value(rounded_i, rounded_j);
                        let vote_angle = normalize_angle(
                            gradients.angle.get(point.x + i, point.y + j) + turn_angle,
                        );
                        match assignment {
                            CellAssignment::Nearest => {
                                let cell_i =
                                    ((rounded_i + lower) as f64 / cell_size).floor() as usize;
                                let cell_j =
                                    ((rounded_j + lower) as f64 / cell_size).floor() as usize;
                                builders[cell_i * rows + cell_j].add_gradient(weight, vote_angle);
                            }
                            CellAssignment::Bilinear => {
                                // continuous cell coordinates, measured from
                                // cell centers
                                let u = (rotated_i + lower as f64) / cell_size - 0.5;
                                let v = (rotated_j + lower as f64) / cell_size - 0.5;
                                let (u0, v0) = (u.floor(), v.floor());
                                let (fu, fv) = (u - u0, v - v0);
                                for (du, wu) in [(0i64, 1.0 - fu), (1, fu)] {
                                    for (dv, wv) in [(0i64, 1.0 - fv), (1, fv)] {
                                        let cu = u0 as i64 + du;
                                        let cv = v0 as i64 + dv;
                                        if cu < 0
                                            || cu >= rows as i64
                                            || cv < 0
                                            || cv >= rows as i64
                                        {
                                            continue;
                                        }
                                        let share = weight * wu * wv;
                                        if share > 0.0 {
                                            builders[cu as usize * rows + cv as usize]
                                                .add_gradient(share, vote_angle);
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                let values: Vec<f64> = builders
                    .into_iter()
                    .flat_map(|builder| builder.build().values().to_vec())
                    .collect();
                Descriptor {
                    values: normalize_vector(&values),
                    keypoint: KeyPoint {
                        point: (point.x as f64, point.y as f64),
                        response: point.response,
                        size: 0.0,
                        angle: turn_angle,
                        scale: 0.0,
                        octave: 0,
                        level: 0,
                    },
                }
            })
            .collect()
    };

    #[cfg(not(feature = "rayon"))]
    let descriptors: Vec<Descriptor> = points.iter().flat_map(describe_point).collect();
    #[cfg(feature = "rayon")]
    let descriptors: Vec<Descriptor> = {
        let points: Vec<&FeaturePoint> = points.iter().collect();
        points
            .into_par_iter()
            .flat_map_iter(describe_point)
            .collect()
    };
    trace!(
        "described {} descriptors over {} points",
        descriptors.len(),
        points.len()
    );
    Ok(descriptors)
}
