use four_point::{
    to_normalized, to_pixel, ConsensusFit, FeatureMatch, FourPointError, HomographyConsensus,
};
use log::*;
use mosaic_features::{BorderPolicy, BorderedImage, Match};
use nalgebra::Point2;
use rand::Rng;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PanoError {
    #[error("panorama inputs must have nonzero dimensions")]
    EmptyImage,
    #[error(transparent)]
    Estimation(#[from] FourPointError),
}

/// A stitched canvas: the composited pixel grid plus the position of its
/// origin in the first image's pixel frame. Plain data for the display
/// layer.
#[derive(Debug, Clone)]
pub struct Panorama {
    pub image: BorderedImage,
    pub min_x: i64,
    pub min_y: i64,
}

/// Strip matches down to the point correspondences the estimator wants.
pub fn correspondences(matches: &[Match]) -> Vec<FeatureMatch> {
    matches
        .iter()
        .map(|m| {
            FeatureMatch(
                Point2::new(m.first.point.0, m.first.point.1),
                Point2::new(m.second.point.0, m.second.point.1),
            )
        })
        .collect()
}

/// Run the consensus estimator over matched keypoints of two images.
pub fn estimate<R: Rng>(
    image1: &BorderedImage,
    image2: &BorderedImage,
    matches: &[Match],
    rng: R,
) -> Result<ConsensusFit, PanoError> {
    let mut consensus = HomographyConsensus::new(
        (image1.width(), image1.height()),
        (image2.width(), image2.height()),
        rng,
    );
    Ok(consensus.model_inliers(&correspondences(matches))?)
}

/// Estimate the homography pair and composite the panorama canvas.
pub fn stitch<R: Rng>(
    image1: &BorderedImage,
    image2: &BorderedImage,
    matches: &[Match],
    rng: R,
) -> Result<Panorama, PanoError> {
    if image1.width() == 0 || image1.height() == 0 || image2.width() == 0 || image2.height() == 0 {
        return Err(PanoError::EmptyImage);
    }
    let fit = estimate(image1, image2, matches, rng)?;
    Ok(compose(image1, image2, &fit))
}

/// Rasterize the stitched canvas for an already-estimated fit.
///
/// The canvas bounds are the union of image 1's own conditioned square
/// and image 2's corners pulled through the inverse homography. Every
/// canvas pixel maps straight back into image 1 for a direct copy, then
/// forward through the homography into image 2; where both land, image 2
/// wins (painter's order, not blending).
pub fn compose(image1: &BorderedImage, image2: &BorderedImage, fit: &ConsensusFit) -> Panorama {
    let (w1, h1) = (image1.width(), image1.height());
    let (w2, h2) = (image2.width(), image2.height());

    let (mut min_x, mut max_x, mut min_y, mut max_y) = (-1.0f64, 1.0f64, -1.0f64, 1.0f64);
    let corners = [
        (0.0, 0.0),
        (w2 as f64, 0.0),
        (0.0, h2 as f64),
        (w2 as f64, h2 as f64),
    ];
    for (x, y) in corners {
        let corner = Point2::new(to_normalized(x, w2), to_normalized(y, h2));
        let projected = fit.inverse.transform(corner);
        min_x = min_x.min(projected.x);
        max_x = max_x.max(projected.x);
        min_y = min_y.min(projected.y);
        max_y = max_y.max(projected.y);
    }

    let min_i = to_pixel(min_x, w1);
    let max_i = to_pixel(max_x, w1);
    let min_j = to_pixel(min_y, h1);
    let max_j = to_pixel(max_y, h1);
    let width = (max_i - min_i + 1) as usize;
    let height = (max_j - min_j + 1) as usize;
    debug!("compositing a {width}x{height} canvas anchored at ({min_i}, {min_j})");

    let mut canvas = BorderedImage::new(width, height, BorderPolicy::Zero);
    for i in min_i..=max_i {
        for j in min_j..=max_j {
            let x = (i - min_i) as f64 * (max_x - min_x) / (max_i - min_i) as f64 + min_x;
            let y = (j - min_j) as f64 * (max_y - min_y) / (max_j - min_j) as f64 + min_y;
            let (ci, cj) = ((i - min_i) as usize, (j - min_j) as usize);

            let ax = to_pixel(x, w1);
            let ay = to_pixel(y, h1);
            if (0..w1 as i64).contains(&ax) && (0..h1 as i64).contains(&ay) {
                canvas.put(ci, cj, image1.at(ax as usize, ay as usize));
            }

            let projected = fit.homography.transform(Point2::new(x, y));
            let bx = to_pixel(projected.x, w2);
            let by = to_pixel(projected.y, h2);
            if (0..w2 as i64).contains(&bx) && (0..h2 as i64).contains(&by) {
                canvas.put(ci, cj, image2.at(bx as usize, by as usize));
            }
        }
    }
    Panorama {
        image: canvas,
        min_x: min_i,
        min_y: min_j,
    }
}
