use float_ord::FloatOrd;

/// An angular histogram: vote weights paired with the center angle of each
/// bin. Both vectors always have equal length.
#[derive(Debug, Clone)]
pub struct Histogram {
    values: Vec<f64>,
    angles: Vec<f64>,
}

impl Histogram {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, index: usize) -> f64 {
        self.values[index]
    }

    pub fn angle(&self, index: usize) -> f64 {
        self.angles[index]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Center angle of the most voted bin.
    pub fn peak_angle(&self) -> Option<f64> {
        self.values
            .iter()
            .enumerate()
            .max_by_key(|&(_, &v)| FloatOrd(v))
            .map(|(index, _)| self.angles[index])
    }

    /// The strongest bin's angle, plus the runner-up's when its vote count
    /// reaches `ratio` of the top. Keypoints near an orientation tie get a
    /// descriptor for each.
    pub fn two_peak_angles(&self, ratio: f64) -> Vec<f64> {
        let mut order: Vec<usize> = (0..self.values.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(FloatOrd(self.values[i])));
        let mut result = Vec::with_capacity(2);
        if let Some(&top) = order.first() {
            result.push(self.angles[top]);
            if let Some(&second) = order.get(1) {
                if self.values[second] / self.values[top] >= ratio {
                    result.push(self.angles[second]);
                }
            }
        }
        result
    }
}

/// Accumulates weighted angular votes with soft binning: each vote is
/// split between the two nearest bins by linear interpolation, which keeps
/// the histogram stable under small angle perturbations and conserves the
/// total weight exactly.
#[derive(Debug, Clone)]
pub struct HistogramBuilder {
    step: f64,
    bins: usize,
    values: Vec<f64>,
}

impl HistogramBuilder {
    pub fn new(step: f64, bins: usize) -> Self {
        Self {
            step,
            bins,
            values: vec![0.0; bins],
        }
    }

    pub fn add_gradient(&mut self, weight: f64, angle: f64) {
        // The first bin whose upper edge covers the angle owns the vote;
        // angles at or past the last edge land in the last bin.
        let mut bin = self.bins - 1;
        for i in 1..=self.bins {
            if angle <= self.step * i as f64 {
                bin = i - 1;
                break;
            }
        }
        let mid = self.step * (bin as f64 + 0.5);
        let b = (angle - mid) / self.step;
        let a = 1.0 - b.abs();
        self.values[bin] += a * weight;
        let neighbor = if b >= 0.0 {
            if bin < self.bins - 1 {
                bin + 1
            } else {
                0
            }
        } else if bin > 0 {
            bin - 1
        } else {
            self.bins - 1
        };
        self.values[neighbor] += b.abs() * weight;
    }

    pub fn build(self) -> Histogram {
        let angles = (0..self.bins)
            .map(|i| i as f64 * self.step + self.step / 2.0)
            .collect();
        Histogram {
            values: self.values,
            angles,
        }
    }
}
