use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{GeostatError, Result};
use crate::geometry::anisotropy::normalize_angle;
use crate::geometry::DistanceMetric;
use crate::spatial_database::SampleSet;

/// Number of lags used when no bin width is given.
pub const DEFAULT_LAG_COUNT: usize = 15;

/// Fraction of the largest pairwise distance used as cutoff when none is given.
pub const DEFAULT_CUTOFF_FRACTION: f64 = 1.0 / 3.0;

/// Direction classes for directional variograms.
///
/// Centres are bearings in degrees, counter-clockwise from the x axis, in [0, 180).
/// A pair joins the sector whose centre is closest to its bearing, and is dropped if
/// that centre is further than `half_width` away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionSectors {
    centers: Vec<f64>,
    half_width: f64,
}

impl Default for DirectionSectors {
    fn default() -> Self {
        Self {
            centers: vec![0.0, 45.0, 90.0, 135.0],
            half_width: 22.5,
        }
    }
}

impl DirectionSectors {
    pub fn new(centers: Vec<f64>, half_width: f64) -> Result<Self> {
        if centers.is_empty() {
            return Err(GeostatError::InvalidParameter {
                name: "directions.centers",
                reason: "at least one direction is required".into(),
            });
        }
        if let Some(c) = centers.iter().find(|c| !c.is_finite()) {
            return Err(GeostatError::InvalidParameter {
                name: "directions.centers",
                reason: format!("direction {} is not finite", c),
            });
        }
        if !(half_width > 0.0 && half_width <= 90.0) {
            return Err(GeostatError::InvalidParameter {
                name: "directions.half_width",
                reason: format!("{} is outside (0, 90]", half_width),
            });
        }

        Ok(Self {
            centers: centers.into_iter().map(normalize_angle).collect(),
            half_width,
        })
    }

    pub fn centers(&self) -> &[f64] {
        &self.centers
    }

    pub fn half_width(&self) -> f64 {
        self.half_width
    }

    /// Index of the sector holding `bearing` (degrees), if any.
    pub fn assign(&self, bearing: f64) -> Option<usize> {
        let bearing = normalize_angle(bearing);

        let (index, gap) = self
            .centers
            .iter()
            .map(|c| {
                // circular distance on the half circle
                let d = (bearing - c).abs() % 180.0;
                d.min(180.0 - d)
            })
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(&b.1))?;

        (gap <= self.half_width).then_some(index)
    }
}

/// Binning scheme for [`estimate_variogram`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariogramParams {
    /// Lag bin width. Defaults to cutoff / 15.
    pub bin_width: Option<f64>,
    /// Largest separation considered. Defaults to a third of the largest pairwise distance.
    pub cutoff: Option<f64>,
    /// Directional classes, omnidirectional when `None`.
    pub directions: Option<DirectionSectors>,
    pub metric: DistanceMetric,
}

impl VariogramParams {
    pub fn with_bin_width(mut self, bin_width: f64) -> Self {
        self.bin_width = Some(bin_width);
        self
    }

    pub fn with_cutoff(mut self, cutoff: f64) -> Self {
        self.cutoff = Some(cutoff);
        self
    }

    pub fn with_directions(mut self, directions: DirectionSectors) -> Self {
        self.directions = Some(directions);
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SemivarianceBin {
    /// Mean separation of the pairs in the bin.
    pub lag_distance: f64,
    /// Sector centre in degrees for directional variograms.
    pub direction: Option<f64>,
    pub gamma: f64,
    pub pair_count: usize,
}

/// Binned semivariance, ordered by direction and then by lag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmpiricalVariogram {
    pub bins: Vec<SemivarianceBin>,
    pub bin_width: f64,
    pub cutoff: f64,
    pub metric: DistanceMetric,
}

impl EmpiricalVariogram {
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn is_directional(&self) -> bool {
        self.bins.iter().any(|b| b.direction.is_some())
    }

    /// Distinct directions present, in bin order.
    pub fn directions(&self) -> Vec<f64> {
        let mut directions: Vec<f64> = Vec::new();
        for dir in self.bins.iter().filter_map(|b| b.direction) {
            if directions.last() != Some(&dir) {
                directions.push(dir);
            }
        }
        directions
    }

    pub fn bins_in_direction(&self, direction: f64) -> impl Iterator<Item = &SemivarianceBin> {
        self.bins
            .iter()
            .filter(move |b| b.direction == Some(direction))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CellAccumulator {
    sum_sq_diff: f64,
    sum_distance: f64,
    count: usize,
}

impl CellAccumulator {
    fn push(&mut self, distance: f64, sq_diff: f64) {
        self.sum_sq_diff += sq_diff;
        self.sum_distance += distance;
        self.count += 1;
    }

    fn merge(&mut self, other: &CellAccumulator) {
        self.sum_sq_diff += other.sum_sq_diff;
        self.sum_distance += other.sum_distance;
        self.count += other.count;
    }
}

// (direction index, lag index)
type CellKey = (usize, usize);

/// Computes the empirical semivariogram of `samples`.
///
/// Every unordered pair with `0 < d <= cutoff` falls into lag bin `floor(d / bin_width)`
/// (and a direction sector when requested); each non-empty cell reports
/// `gamma = sum((v_i - v_j)^2) / (2 * N)`.
pub fn estimate_variogram(samples: &SampleSet, params: &VariogramParams) -> Result<EmpiricalVariogram> {
    let n = samples.len();
    if n < 2 {
        return Err(GeostatError::InsufficientData {
            operation: "estimate_variogram",
            required: 2,
            actual: n,
        });
    }

    let metric = params.metric;
    let cutoff = match params.cutoff {
        Some(cutoff) => cutoff,
        None => samples.max_pairwise_distance(&metric) * DEFAULT_CUTOFF_FRACTION,
    };
    let bin_width = params
        .bin_width
        .unwrap_or(cutoff / DEFAULT_LAG_COUNT as f64);

    if !(cutoff.is_finite() && cutoff > 0.0) {
        return Err(GeostatError::DegenerateBinning {
            reason: "cutoff must be finite and positive",
            bin_width,
            cutoff,
        });
    }
    if !(bin_width.is_finite() && bin_width > 0.0) {
        return Err(GeostatError::DegenerateBinning {
            reason: "bin width must be finite and positive",
            bin_width,
            cutoff,
        });
    }

    let observations = samples.observations();
    let directions = params.directions.as_ref();

    // Rows are evaluated in parallel, then merged in row order so that the floating
    // point sums do not depend on scheduling.
    let rows = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut cells: BTreeMap<CellKey, CellAccumulator> = BTreeMap::new();
            let a = &observations[i];

            for b in observations.iter().skip(i + 1) {
                let separation = metric.separation(&a.location, &b.location);
                let d = separation.norm();

                if d <= 0.0 || d > cutoff {
                    continue;
                }

                let direction = match directions {
                    Some(sectors) => {
                        if separation.spatial.norm_squared() == 0.0 {
                            continue;
                        }
                        let bearing = separation.spatial.y.atan2(separation.spatial.x).to_degrees();
                        match sectors.assign(bearing) {
                            Some(dir) => dir,
                            None => continue,
                        }
                    }
                    None => 0,
                };

                let lag = (d / bin_width).floor() as usize;
                let diff = a.value - b.value;

                cells
                    .entry((direction, lag))
                    .or_default()
                    .push(d, diff * diff);
            }

            cells
        })
        .collect::<Vec<_>>();

    let mut cells: BTreeMap<CellKey, CellAccumulator> = BTreeMap::new();
    for row in rows.iter() {
        for (key, acc) in row.iter() {
            cells.entry(*key).or_default().merge(acc);
        }
    }

    let bins = cells
        .into_iter()
        .filter(|(_, acc)| acc.count > 0)
        .map(|((direction, _), acc)| SemivarianceBin {
            lag_distance: acc.sum_distance / acc.count as f64,
            direction: directions.map(|s| s.centers[direction]),
            gamma: acc.sum_sq_diff / (2.0 * acc.count as f64),
            pair_count: acc.count,
        })
        .collect::<Vec<_>>();

    if bins.is_empty() {
        return Err(GeostatError::DegenerateBinning {
            reason: "no pair of observations falls inside the cutoff",
            bin_width,
            cutoff,
        });
    }

    log::debug!(
        "empirical variogram: {} bins from {} observations (bin width {:.4}, cutoff {:.4})",
        bins.len(),
        n,
        bin_width,
        cutoff
    );

    Ok(EmpiricalVariogram {
        bins,
        bin_width,
        cutoff,
        metric,
    })
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::spatial_database::{Location, Observation};

    fn random_samples(n: usize, seed: u64) -> SampleSet {
        let mut rng = StdRng::seed_from_u64(seed);
        let observations = (0..n)
            .map(|_| {
                let x = rng.gen_range(0.0..100.0);
                let y = rng.gen_range(0.0..100.0);
                let v = 500.0 + 2.0 * x - y + rng.gen_range(-20.0..20.0);
                Observation::new((x, y), v)
            })
            .collect();
        SampleSet::new(observations).unwrap()
    }

    fn assert_same_variogram(a: &EmpiricalVariogram, b: &EmpiricalVariogram) {
        assert_eq!(a.bins.len(), b.bins.len());
        for (x, y) in a.bins.iter().zip(b.bins.iter()) {
            assert_eq!(x.pair_count, y.pair_count);
            assert_eq!(x.direction, y.direction);
            assert_relative_eq!(x.gamma, y.gamma, max_relative = 1e-9);
            assert_relative_eq!(x.lag_distance, y.lag_distance, max_relative = 1e-9);
        }
    }

    #[test]
    fn hand_computed_bins() {
        let samples = SampleSet::new(vec![
            Observation::new((0.0, 0.0), 1.0),
            Observation::new((1.0, 0.0), 3.0),
            Observation::new((3.0, 0.0), 4.0),
        ])
        .unwrap();

        let params = VariogramParams::default()
            .with_bin_width(2.0)
            .with_cutoff(3.0);
        let vgram = estimate_variogram(&samples, &params).unwrap();

        // pairs: d=1 (diff 2), d=2 (diff 1), d=3 (diff 3)
        assert_eq!(vgram.bins.len(), 2);

        assert_eq!(vgram.bins[0].pair_count, 1);
        assert_relative_eq!(vgram.bins[0].lag_distance, 1.0);
        assert_relative_eq!(vgram.bins[0].gamma, 2.0);

        assert_eq!(vgram.bins[1].pair_count, 2);
        assert_relative_eq!(vgram.bins[1].lag_distance, 2.5);
        assert_relative_eq!(vgram.bins[1].gamma, (1.0 + 9.0) / 4.0);
    }

    #[test]
    fn empty_bins_are_dropped() {
        let samples = SampleSet::new(vec![
            Observation::new((0.0, 0.0), 1.0),
            Observation::new((10.0, 0.0), 3.0),
        ])
        .unwrap();

        let params = VariogramParams::default()
            .with_bin_width(1.0)
            .with_cutoff(20.0);
        let vgram = estimate_variogram(&samples, &params).unwrap();

        assert_eq!(vgram.bins.len(), 1);
        assert_eq!(vgram.bins[0].pair_count, 1);
    }

    #[test]
    fn default_cutoff_is_a_third_of_max_distance() {
        let samples = random_samples(60, 7);
        let vgram = estimate_variogram(&samples, &VariogramParams::default()).unwrap();
        let max = samples.max_pairwise_distance(&DistanceMetric::Spatial);

        assert_relative_eq!(vgram.cutoff, max / 3.0);
        assert_relative_eq!(vgram.bin_width, max / 3.0 / 15.0);
        assert!(vgram.bins.iter().all(|b| b.lag_distance <= vgram.cutoff));
    }

    #[test]
    fn too_few_observations() {
        let samples = SampleSet::new(vec![Observation::new((0.0, 0.0), 1.0)]).unwrap();
        assert!(matches!(
            estimate_variogram(&samples, &VariogramParams::default()),
            Err(GeostatError::InsufficientData { actual: 1, .. })
        ));
    }

    #[test]
    fn degenerate_binning() {
        let samples = random_samples(10, 1);

        let params = VariogramParams::default().with_bin_width(0.0);
        assert!(matches!(
            estimate_variogram(&samples, &params),
            Err(GeostatError::DegenerateBinning { .. })
        ));

        // cutoff smaller than any separation
        let params = VariogramParams::default().with_cutoff(1e-9);
        assert!(matches!(
            estimate_variogram(&samples, &params),
            Err(GeostatError::DegenerateBinning { .. })
        ));
    }

    #[test]
    fn directional_bins() {
        // a transect along x with a trend, and a distant flat transect along y
        let mut observations = vec![];
        for i in 0..10 {
            observations.push(Observation::new((i as f64, 0.0), i as f64));
        }
        for j in 0..10 {
            observations.push(Observation::new((1000.0, j as f64), 0.0));
        }
        let samples = SampleSet::new(observations).unwrap();

        let params = VariogramParams::default()
            .with_bin_width(1.0)
            .with_cutoff(3.5)
            .with_directions(DirectionSectors::default());
        let vgram = estimate_variogram(&samples, &params).unwrap();

        assert!(vgram.is_directional());
        let directions = vgram.directions();
        assert!(directions.contains(&0.0));
        assert!(directions.contains(&90.0));

        let east_west: Vec<_> = vgram.bins_in_direction(0.0).collect();
        let north_south: Vec<_> = vgram.bins_in_direction(90.0).collect();

        // along x values change by the lag, along y they are constant
        let first_ew = east_west.iter().find(|b| b.lag_distance == 1.0).unwrap();
        assert_relative_eq!(first_ew.gamma, 0.5);
        assert!(north_south.iter().all(|b| b.gamma == 0.0));
    }

    #[test]
    fn sector_assignment() {
        let sectors = DirectionSectors::default();
        assert_eq!(sectors.assign(10.0), Some(0));
        assert_eq!(sectors.assign(170.0), Some(0));
        assert_eq!(sectors.assign(-10.0), Some(0));
        assert_eq!(sectors.assign(50.0), Some(1));
        assert_eq!(sectors.assign(100.0), Some(2));
        assert_eq!(sectors.assign(225.0), Some(1));

        let narrow = DirectionSectors::new(vec![0.0, 90.0], 10.0).unwrap();
        assert_eq!(narrow.assign(45.0), None);
        assert!(DirectionSectors::new(vec![], 10.0).is_err());
        assert!(DirectionSectors::new(vec![0.0], 0.0).is_err());
    }

    #[test]
    fn space_time_metric_pairs_repeated_sites() {
        let samples = SampleSet::new(vec![
            Observation::new(Location::with_time(0.0, 0.0, 0.0), 1.0),
            Observation::new(Location::with_time(0.0, 0.0, 1.0), 3.0),
        ])
        .unwrap();

        let spatial = VariogramParams::default().with_cutoff(5.0);
        assert!(estimate_variogram(&samples, &spatial).is_err());

        let space_time = spatial.with_metric(DistanceMetric::SpaceTime { time_scale: 2.0 });
        let vgram = estimate_variogram(&samples, &space_time).unwrap();
        assert_eq!(vgram.bins.len(), 1);
        assert_relative_eq!(vgram.bins[0].lag_distance, 2.0);
        assert_relative_eq!(vgram.bins[0].gamma, 2.0);
    }

    proptest! {
        #[test]
        fn gamma_and_counts_are_valid(seed in 0u64..1000, n in 2usize..40) {
            let samples = random_samples(n, seed);
            if let Ok(vgram) = estimate_variogram(&samples, &VariogramParams::default()) {
                for bin in vgram.bins.iter() {
                    prop_assert!(bin.gamma >= 0.0);
                    prop_assert!(bin.pair_count >= 1);
                }
            }
        }

        #[test]
        fn invariant_under_reordering(seed in 0u64..1000, shift in 1usize..30) {
            let samples = random_samples(30, seed);
            let mut observations = samples.observations().to_vec();
            observations.rotate_left(shift);
            observations.reverse();
            let shuffled = SampleSet::new(observations).unwrap();

            let params = VariogramParams::default().with_cutoff(40.0).with_bin_width(4.0);
            let a = estimate_variogram(&samples, &params).unwrap();
            let b = estimate_variogram(&shuffled, &params).unwrap();
            assert_same_variogram(&a, &b);
        }

        #[test]
        fn invariant_under_rigid_motion(
            seed in 0u64..1000,
            angle in 0.0f64..std::f64::consts::TAU,
            tx in -1e3f64..1e3,
            ty in -1e3f64..1e3,
        ) {
            let samples = random_samples(30, seed);
            let (s, c) = angle.sin_cos();
            let moved = SampleSet::new(
                samples
                    .iter()
                    .map(|o| {
                        let x = c * o.location.x - s * o.location.y + tx;
                        let y = s * o.location.x + c * o.location.y + ty;
                        Observation::new((x, y), o.value)
                    })
                    .collect(),
            )
            .unwrap();

            // one wide bin keeps pairs sitting on a bin edge from flipping bins after rounding
            let params = VariogramParams::default().with_cutoff(1e4).with_bin_width(1e4);
            let a = estimate_variogram(&samples, &params).unwrap();
            let b = estimate_variogram(&moved, &params).unwrap();
            assert_same_variogram(&a, &b);
        }
    }
}
