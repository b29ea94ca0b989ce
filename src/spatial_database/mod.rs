use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::path::Path;

use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::Serialize;

use crate::error::{GeostatError, Result};
use crate::geometry::DistanceMetric;

pub mod observation;

pub use observation::{Location, Observation};
use observation::ObservationRecord;

type LocationKey = (OrderedFloat<f64>, OrderedFloat<f64>, Option<OrderedFloat<f64>>);

fn location_key(location: &Location) -> LocationKey {
    (
        OrderedFloat(location.x),
        OrderedFloat(location.y),
        location.t.map(OrderedFloat),
    )
}

/// Validated, ordered set of observations.
///
/// Order is preserved as given and drives fold assignment during cross validation.
/// Every location is unique and every coordinate and value is finite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleSet {
    observations: Vec<Observation>,
}

impl SampleSet {
    /// Validates and wraps `observations`.
    /// Fails on non-finite data or on two observations sharing a location.
    pub fn new(observations: Vec<Observation>) -> Result<Self> {
        let mut seen: HashMap<LocationKey, usize> = HashMap::with_capacity(observations.len());

        for (index, obs) in observations.iter().enumerate() {
            validate_observation(index, obs)?;

            match seen.entry(location_key(&obs.location)) {
                Entry::Occupied(first) => {
                    return Err(GeostatError::DuplicateLocation {
                        first: *first.get(),
                        second: index,
                        x: obs.location.x,
                        y: obs.location.y,
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(index);
                }
            }
        }

        Ok(Self { observations })
    }

    /// Builds a set from raw observations by averaging the values of observations that
    /// share a location. The merged observation keeps the position of the first one.
    pub fn merge_duplicates(observations: Vec<Observation>) -> Result<Self> {
        let mut slots: HashMap<LocationKey, usize> = HashMap::new();
        let mut merged: Vec<(Observation, usize)> = Vec::new();

        for (index, obs) in observations.into_iter().enumerate() {
            validate_observation(index, &obs)?;

            match slots.entry(location_key(&obs.location)) {
                Entry::Occupied(slot) => {
                    let (acc, count) = &mut merged[*slot.get()];
                    acc.value += obs.value;
                    *count += 1;
                }
                Entry::Vacant(slot) => {
                    slot.insert(merged.len());
                    merged.push((obs, 1));
                }
            }
        }

        let merged_count = merged.iter().filter(|(_, c)| *c > 1).count();
        if merged_count > 0 {
            log::debug!("merged {} duplicated locations", merged_count);
        }

        Ok(Self {
            observations: merged
                .into_iter()
                .map(|(mut obs, count)| {
                    obs.value /= count as f64;
                    obs
                })
                .collect(),
        })
    }

    /// Reads `x,y,value` (and optionally `t`) columns from a csv file with headers.
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = csv::Reader::from_path(path)?;
        Self::from_csv(reader)
    }

    pub fn from_csv_reader<R: io::Read>(reader: R) -> Result<Self> {
        Self::from_csv(csv::Reader::from_reader(reader))
    }

    fn from_csv<R: io::Read>(mut reader: csv::Reader<R>) -> Result<Self> {
        let observations = reader
            .deserialize::<ObservationRecord>()
            .map(|record| record.map(Observation::from))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Self::new(observations)
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Observation> {
        self.observations.iter()
    }

    pub fn location(&self, index: usize) -> &Location {
        &self.observations[index].location
    }

    pub fn value(&self, index: usize) -> f64 {
        self.observations[index].value
    }

    pub fn values(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.value).collect()
    }

    pub fn locations(&self) -> Vec<Location> {
        self.observations.iter().map(|o| o.location).collect()
    }

    /// Arithmetic mean of the values, NaN for an empty set.
    pub fn mean(&self) -> f64 {
        self.observations.iter().map(|o| o.value).sum::<f64>() / self.len() as f64
    }

    /// Largest separation between any two observations under `metric`.
    pub fn max_pairwise_distance(&self, metric: &DistanceMetric) -> f64 {
        self.observations
            .iter()
            .tuple_combinations()
            .map(|(a, b)| OrderedFloat(metric.distance(&a.location, &b.location)))
            .max()
            .map_or(0.0, |d| d.0)
    }

    /// Observations at `indices`, in the order given.
    pub fn subset(&self, indices: &[usize]) -> SampleSet {
        SampleSet {
            observations: indices.iter().map(|&i| self.observations[i]).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a SampleSet {
    type Item = &'a Observation;
    type IntoIter = std::slice::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.observations.iter()
    }
}

impl TryFrom<Vec<Observation>> for SampleSet {
    type Error = GeostatError;

    fn try_from(observations: Vec<Observation>) -> Result<Self> {
        Self::new(observations)
    }
}

fn validate_observation(index: usize, obs: &Observation) -> Result<()> {
    if !obs.location.is_finite() {
        return Err(GeostatError::InvalidObservation {
            index,
            reason: "location has a non-finite coordinate",
        });
    }
    if !obs.value.is_finite() {
        return Err(GeostatError::InvalidObservation {
            index,
            reason: "value is not finite",
        });
    }
    Ok(())
}
