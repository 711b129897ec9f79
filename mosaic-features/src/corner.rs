use crate::derivatives::{sobel_horizontal, sobel_vertical};
use crate::image::{BorderedImage, GaussianKernel, Kernel};
use crate::Error;
use float_ord::FloatOrd;
use log::*;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Corner response formula applied to the 2x2 structure tensor
/// `[[a, b], [b, c]]`. A small closed set of strategies selected at
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HarrisMethod {
    /// The smaller eigenvalue of the tensor, via the closed form
    /// `(trace +- sqrt(trace^2 - 4 det)) / 2`.
    EigenValues,
    /// `det - 0.06 trace^2`.
    Original,
    /// `det / trace` (Forstner-Gulch).
    ForstnerGulch,
}

impl HarrisMethod {
    pub fn response(&self, a: f64, b: f64, c: f64) -> f64 {
        let trace = a + c;
        let det = a * c - b * b;
        match self {
            HarrisMethod::EigenValues => {
                let d = (trace * trace - 4.0 * det).sqrt();
                f64::min((trace + d) / 2.0, (trace - d) / 2.0)
            }
            HarrisMethod::Original => det - 0.06 * trace * trace,
            HarrisMethod::ForstnerGulch => det / trace,
        }
    }
}

/// Detector-stage output: a location and its raw response score. Kept
/// distinct from the descriptor-stage [`crate::KeyPoint`] so no field is
/// reused with a different meaning later in the pipeline.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeaturePoint {
    pub x: i64,
    pub y: i64,
    pub response: f64,
}

impl FeaturePoint {
    pub fn distance_to(&self, other: &FeaturePoint) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Feature points detected on one image, tagged with that image's extents.
#[derive(Debug, Clone)]
pub struct FeaturePoints {
    pub width: usize,
    pub height: usize,
    points: Vec<FeaturePoint>,
}

impl FeaturePoints {
    pub fn new(width: usize, height: usize, points: Vec<FeaturePoint>) -> Self {
        Self {
            width,
            height,
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, index: usize) -> &FeaturePoint {
        &self.points[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeaturePoint> {
        self.points.iter()
    }

    /// Thin the point set down to at most `count` survivors.
    ///
    /// The suppression radius starts at 0.9 and grows by 0.9 each pass;
    /// within a pass a point is removed when any other point of
    /// higher-or-equal response lies inside the radius. Removal decisions
    /// of a pass are made against the pass's starting snapshot. The radius
    /// keeps growing until the target count is met, so no single radius
    /// has to be chosen up front.
    pub fn filter_by_adaptive_non_maximum_suppression(&self, count: usize) -> FeaturePoints {
        let mut points = self.points.clone();
        let mut radius = 0.0;
        while points.len() > count {
            radius += 0.9;
            let survivors: Vec<FeaturePoint> = points
                .iter()
                .enumerate()
                .filter(|(i, p)| {
                    !points.iter().enumerate().any(|(j, q)| {
                        j != *i && q.response >= p.response && p.distance_to(q) <= radius
                    })
                })
                .map(|(_, p)| *p)
                .collect();
            if survivors.is_empty() {
                // a cluster of exactly tied responses annihilated itself
                warn!("non-maximum suppression stalled at radius {radius}");
                break;
            }
            points = survivors;
        }
        trace!(
            "suppression kept {}/{} points at radius {radius}",
            points.len(),
            self.points.len()
        );
        FeaturePoints::new(self.width, self.height, points)
    }
}

/// Harris corner detector over a Gaussian-weighted structure tensor.
///
/// Gradients are computed once at construction; both the full-image scan
/// and single-point scoring share the same windowed accumulation, so they
/// agree exactly.
pub struct HarrisDetector<'a> {
    image: &'a BorderedImage,
    gaussian: GaussianKernel,
    threshold: f64,
    method: HarrisMethod,
    gradient_x: BorderedImage,
    gradient_y: BorderedImage,
}

impl<'a> HarrisDetector<'a> {
    pub fn new(
        image: &'a BorderedImage,
        window: usize,
        threshold: f64,
        method: HarrisMethod,
    ) -> Result<Self, Error> {
        if threshold <= 0.0 {
            return Err(Error::InvalidThreshold { threshold });
        }
        let gaussian = GaussianKernel::from_size(window)?;
        #[cfg(not(feature = "rayon"))]
        let (gradient_x, gradient_y) = (sobel_horizontal(image), sobel_vertical(image));
        #[cfg(feature = "rayon")]
        let (gradient_x, gradient_y) =
            rayon::join(|| sobel_horizontal(image), || sobel_vertical(image));
        Ok(Self {
            image,
            gaussian,
            threshold,
            method,
            gradient_x,
            gradient_y,
        })
    }

    fn tensor_at(&self, x: i64, y: i64) -> (f64, f64, f64) {
        let r = self.gaussian.radius();
        let (mut a, mut b, mut c) = (0.0, 0.0, 0.0);
        for dx in -r..=r {
            for dy in -r..=r {
                let weight = self.gaussian.value(dx, dy);
                let ix = self.gradient_x.get(x - dx, y - dy);
                let iy = self.gradient_y.get(x - dx, y - dy);
                a += ix * ix * weight;
                b += ix * iy * weight;
                c += iy * iy * weight;
            }
        }
        (a, b, c)
    }

    /// Corner strength at a single pixel, used by the blob pipeline for
    /// on-demand gating.
    pub fn calculate_point(&self, x: i64, y: i64) -> f64 {
        let (a, b, c) = self.tensor_at(x, y);
        self.method.response(a, b, c)
    }

    fn response_map(&self) -> Vec<f64> {
        let width = self.image.width();
        let height = self.image.height();
        let mut map = vec![0.0; width * height];
        let fill_row = |y: usize, row: &mut [f64]| {
            for (x, out) in row.iter_mut().enumerate() {
                *out = self.calculate_point(x as i64, y as i64);
            }
        };
        #[cfg(not(feature = "rayon"))]
        for (y, row) in map.chunks_exact_mut(width).enumerate() {
            fill_row(y, row);
        }
        #[cfg(feature = "rayon")]
        map.par_chunks_exact_mut(width)
            .enumerate()
            .for_each(|(y, row)| fill_row(y, row));
        map
    }

    /// Every pixel whose response exceeds the threshold.
    pub fn calculate(&self) -> FeaturePoints {
        let width = self.image.width();
        let map = self.response_map();
        let points = map
            .iter()
            .enumerate()
            .filter(|(_, &response)| response > self.threshold)
            .map(|(index, &response)| FeaturePoint {
                x: (index % width) as i64,
                y: (index / width) as i64,
                response,
            })
            .collect();
        let points = FeaturePoints::new(width, self.image.height(), points);
        debug!("harris found {} points", points.len());
        points
    }

    /// Thresholding plus a 3x3 non-maximum requirement, for use inside the
    /// pyramid where a dense response carpet is useless.
    pub fn calculate_local_maxima(&self) -> FeaturePoints {
        let width = self.image.width();
        let height = self.image.height();
        let map = self.response_map();
        let mut points = Vec::new();
        for y in 0..height {
            for x in 0..width {
                let response = map[y * width + x];
                if response <= self.threshold {
                    continue;
                }
                let mut is_maximum = true;
                'neighbors: for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                        if nx < 0 || nx >= width as i64 || ny < 0 || ny >= height as i64 {
                            continue;
                        }
                        if map[ny as usize * width + nx as usize] > response {
                            is_maximum = false;
                            break 'neighbors;
                        }
                    }
                }
                if is_maximum {
                    points.push(FeaturePoint {
                        x: x as i64,
                        y: y as i64,
                        response,
                    });
                }
            }
        }
        debug!("harris kept {} local maxima", points.len());
        FeaturePoints::new(width, height, points)
    }
}

/// Moravec operator: the second-smallest sum of squared differences over
/// the eight shifted windows (plus the zero shift, whose SSD is always
/// zero and occupies the smallest slot).
pub struct MoravecDetector<'a> {
    image: &'a BorderedImage,
    window: usize,
    offset: i64,
    threshold: f64,
}

impl<'a> MoravecDetector<'a> {
    pub fn new(
        image: &'a BorderedImage,
        window: usize,
        offset: i64,
        threshold: f64,
    ) -> Result<Self, Error> {
        if offset <= 0 {
            return Err(Error::InvalidOffset { offset });
        }
        if threshold <= 0.0 {
            return Err(Error::InvalidThreshold { threshold });
        }
        if window % 2 == 0 || window == 0 {
            return Err(Error::InvalidKernelSize { size: window });
        }
        Ok(Self {
            image,
            window,
            offset,
            threshold,
        })
    }

    fn response_at(&self, i: i64, j: i64) -> f64 {
        let r = (self.window as i64 - 1) / 2;
        let offsets = [-self.offset, 0, self.offset];
        let mut responses = [0.0f64; 9];
        let mut slot = 0;
        for &ox in &offsets {
            for &oy in &offsets {
                let mut ssd = 0.0;
                for x in -r..=r {
                    for y in -r..=r {
                        let value = self.image.get(i - x, j - y);
                        let shifted = self.image.get(i - x - ox, j - y - oy);
                        let diff = value - shifted;
                        ssd += diff * diff;
                    }
                }
                responses[slot] = ssd;
                slot += 1;
            }
        }
        responses.sort_by_key(|&v| FloatOrd(v));
        responses[1]
    }

    pub fn calculate(&self) -> FeaturePoints {
        let width = self.image.width();
        let height = self.image.height();
        let collect_row = |j: usize| -> Vec<FeaturePoint> {
            (0..width)
                .filter_map(|i| {
                    let response = self.response_at(i as i64, j as i64);
                    (response > self.threshold).then_some(FeaturePoint {
                        x: i as i64,
                        y: j as i64,
                        response,
                    })
                })
                .collect()
        };
        #[cfg(not(feature = "rayon"))]
        let rows: Vec<Vec<FeaturePoint>> = (0..height).map(collect_row).collect();
        #[cfg(feature = "rayon")]
        let rows: Vec<Vec<FeaturePoint>> = (0..height).into_par_iter().map(collect_row).collect();
        let points = FeaturePoints::new(width, height, rows.into_iter().flatten().collect());
        debug!("moravec found {} points", points.len());
        points
    }
}
