//! Labeled time series driving gravity, prescribed velocities and applied
//! force magnitudes.

use hashbrown::HashMap;

/// Scalar function of time, either constant or piecewise linear.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeSeries {
    /// Same value at every time.
    Constant(f64),
    /// Linear interpolation between `(time, value)` markers sorted by time.
    Linear(Vec<(f64, f64)>),
}

impl TimeSeries {
    /// Construct a constant series.
    pub fn constant(value: f64) -> Self {
        Self::Constant(value)
    }

    /// Construct a piecewise linear series from `(time, value)` markers.
    ///
    /// Markers must be sorted by strictly increasing time.
    pub fn linear(points: Vec<(f64, f64)>) -> Self {
        debug_assert!(points.windows(2).all(|w| w[0].0 < w[1].0));

        Self::Linear(points)
    }

    /// Value at a given time.
    ///
    /// Before the first marker the first value holds, after the last marker
    /// the last value holds.
    pub fn value(&self, time: f64) -> f64 {
        match self {
            Self::Constant(value) => *value,
            Self::Linear(points) => match points.len() {
                0 => 0.0,
                1 => points[0].1,
                _ => {
                    if time <= points[0].0 {
                        return points[0].1;
                    }
                    let last = points[points.len() - 1];
                    if time >= last.0 {
                        return last.1;
                    }

                    // Index of the first marker past the queried time
                    let after = points.partition_point(|(t, _)| *t <= time);
                    let (t0, v0) = points[after - 1];
                    let (t1, v1) = points[after];

                    v0 + (v1 - v0) * (time - t0) / (t1 - t0)
                }
            },
        }
    }

    /// Running trapezoidal integral as a new series.
    pub fn integral(&self) -> Self {
        match self {
            Self::Constant(_) => Self::Constant(0.0),
            Self::Linear(points) => {
                let mut sum = 0.0;
                let mut out = Vec::with_capacity(points.len());

                for (i, (t, v)) in points.iter().enumerate() {
                    if i > 0 {
                        let (t0, v0) = points[i - 1];
                        sum += 0.5 * (v0 + v) * (t - t0);
                    }
                    out.push((*t, sum));
                }

                Self::Linear(out)
            }
        }
    }

    /// Piecewise constant derivative sampled at the marker midpoints.
    pub fn derivative(&self) -> Self {
        match self {
            Self::Constant(_) => Self::Constant(0.0),
            Self::Linear(points) if points.len() < 2 => Self::Constant(0.0),
            Self::Linear(points) => {
                let out = points
                    .windows(2)
                    .map(|w| {
                        let (t0, v0) = w[0];
                        let (t1, v1) = w[1];

                        (0.5 * (t0 + t1), (v1 - v0) / (t1 - t0))
                    })
                    .collect();

                Self::Linear(out)
            }
        }
    }
}

impl Default for TimeSeries {
    fn default() -> Self {
        Self::Constant(0.0)
    }
}

/// Named registry of time series owned by the session front-end.
///
/// Torn down together with the session; never process-global.
#[derive(Debug, Default)]
pub struct SeriesRegistry {
    /// Series by label.
    series: HashMap<String, TimeSeries>,
}

impl SeriesRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a series under a label, replacing any previous one.
    pub fn insert(&mut self, label: impl Into<String>, series: TimeSeries) {
        self.series.insert(label.into(), series);
    }

    /// Look up a series by label.
    pub fn get(&self, label: &str) -> Option<&TimeSeries> {
        self.series.get(label)
    }

    /// Drop every registered series.
    pub fn clear(&mut self) {
        self.series.clear();
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::TimeSeries;

    #[test]
    fn test_linear_interpolation() {
        let series = TimeSeries::linear(vec![(0.0, 0.0), (1.0, 2.0), (3.0, -2.0)]);

        assert_relative_eq!(series.value(-1.0), 0.0);
        assert_relative_eq!(series.value(0.5), 1.0);
        assert_relative_eq!(series.value(2.0), 0.0);
        assert_relative_eq!(series.value(10.0), -2.0);
    }

    #[test]
    fn test_integral_of_ramp() {
        let series = TimeSeries::linear(vec![(0.0, 0.0), (2.0, 2.0)]);
        let integral = series.integral();

        // ∫ t dt over [0, 2] = 2
        assert_relative_eq!(integral.value(2.0), 2.0);
    }

    #[test]
    fn test_derivative_of_ramp() {
        let series = TimeSeries::linear(vec![(0.0, 0.0), (1.0, 3.0), (2.0, 6.0)]);
        let derivative = series.derivative();

        assert_relative_eq!(derivative.value(1.0), 3.0);
    }
}
