//! Pluggable sources for the request rate of a run.
//!
//! A run either uses a fixed rate or asks a [`RateForecaster`] for one, given a feature vector
//! describing the expected conditions. The rate is resolved once, before the first request.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Predicts a request rate from a feature vector.
pub trait RateForecaster: fmt::Debug + Send + Sync {
    /// Returns the predicted rate in requests per second.
    fn predict(&self, features: &[f64]) -> Result<f64>;
}

/// A forecaster that always returns the same rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedRate(pub f64);

impl RateForecaster for FixedRate {
    fn predict(&self, _features: &[f64]) -> Result<f64> {
        Ok(self.0)
    }
}

/// A linear model: `intercept + Σ coefficient_i * feature_i`.
///
/// The coefficients are typically exported from a regression fitted offline.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct LinearForecaster {
    /// Constant term.
    #[serde(default)]
    pub intercept: f64,
    /// One coefficient per feature, in feature order.
    pub coefficients: Vec<f64>,
}

impl RateForecaster for LinearForecaster {
    fn predict(&self, features: &[f64]) -> Result<f64> {
        if features.len() != self.coefficients.len() {
            return Err(Error::Forecast(format!(
                "model expects {} features, got {}",
                self.coefficients.len(),
                features.len()
            )));
        }

        let dot: f64 = self
            .coefficients
            .iter()
            .zip(features)
            .map(|(coefficient, feature)| coefficient * feature)
            .sum();

        Ok(self.intercept + dot)
    }
}

/// Where the feature vector for a forecast comes from.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FeatureSource {
    /// Feature values given inline.
    Values(Vec<f64>),
    /// The named columns of the first data row of a CSV file.
    File {
        /// Path to the CSV file.
        path: PathBuf,
        /// Header names of the feature columns, in model order.
        columns: Vec<String>,
    },
}

impl FeatureSource {
    /// Loads the feature vector.
    pub fn load(&self) -> Result<Vec<f64>> {
        match self {
            FeatureSource::Values(values) => Ok(values.clone()),
            FeatureSource::File { path, columns } => load_features(path, columns),
        }
    }
}

/// Reads the named `columns` from the first data row of the CSV file at `path`.
pub fn load_features(path: &Path, columns: &[String]) -> Result<Vec<f64>> {
    let reader = csv::Reader::from_path(path)?;
    read_features(reader, columns)
}

fn read_features<R: std::io::Read>(
    mut reader: csv::Reader<R>,
    columns: &[String],
) -> Result<Vec<f64>> {
    let headers = reader.headers()?.clone();
    let indices = columns
        .iter()
        .map(|column| {
            headers
                .iter()
                .position(|header| header.trim() == column)
                .ok_or_else(|| Error::Forecast(format!("feature column `{column}` not found")))
        })
        .collect::<Result<Vec<_>>>()?;

    let row = reader
        .records()
        .next()
        .ok_or_else(|| Error::Forecast("feature file has no data rows".into()))??;

    indices
        .into_iter()
        .zip(columns)
        .map(|(idx, column)| {
            let value = row.get(idx).unwrap_or_default().trim();
            value.parse::<f64>().map_err(|_| {
                Error::Forecast(format!("feature `{column}` is not a number: `{value}`"))
            })
        })
        .collect()
}

/// How the request rate of a run is determined.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RateSource {
    /// A fixed number of requests per second.
    Fixed {
        /// Requests per second.
        rps: f64,
    },
    /// A rate predicted by a linear model from a feature vector.
    Forecast {
        /// The model evaluated once at startup.
        model: LinearForecaster,
        /// The model input.
        features: FeatureSource,
    },
}

impl Default for RateSource {
    fn default() -> Self {
        RateSource::Fixed { rps: 10.0 }
    }
}

impl RateSource {
    /// Resolves the source into requests per second.
    ///
    /// Fails if the resulting rate is not a positive, finite number.
    pub fn resolve(&self) -> Result<f64> {
        let rate = match self {
            RateSource::Fixed { rps } => FixedRate(*rps).predict(&[])?,
            RateSource::Forecast { model, features } => {
                let features = features.load()?;
                let rate = model.predict(&features)?;
                tracing::info!(?features, rate, "forecasted request rate");
                rate
            }
        };

        if rate.is_finite() && rate > 0.0 {
            Ok(rate)
        } else {
            Err(Error::InvalidRate(rate))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|&name| name.to_owned()).collect()
    }

    #[test]
    fn linear_prediction() {
        let model = LinearForecaster {
            intercept: 1.5,
            coefficients: vec![2.0, 0.5, -1.0],
        };
        assert_eq!(model.predict(&[1.0, 4.0, 0.5]).unwrap(), 5.0);
        assert!(matches!(model.predict(&[1.0]), Err(Error::Forecast(_))));
    }

    #[test]
    fn reads_named_columns_of_first_row() {
        let data = "x0,x1,x2,x3\n9,1.5,2,3\n7,7,7,7\n";
        let reader = csv::Reader::from_reader(data.as_bytes());

        let features = read_features(reader, &columns(&["x3", "x1", "x2"])).unwrap();
        assert_eq!(features, [3.0, 1.5, 2.0]);
    }

    #[test]
    fn feature_errors() {
        let missing = csv::Reader::from_reader("x1\n1\n".as_bytes());
        assert!(read_features(missing, &columns(&["x2"])).is_err());

        let empty = csv::Reader::from_reader("x1\n".as_bytes());
        assert!(read_features(empty, &columns(&["x1"])).is_err());

        let invalid = csv::Reader::from_reader("x1\nabc\n".as_bytes());
        assert!(read_features(invalid, &columns(&["x1"])).is_err());
    }

    #[test]
    fn forecast_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forecast.csv");
        std::fs::write(&path, "x1,x2\n10,4\n").unwrap();

        let source = RateSource::Forecast {
            model: LinearForecaster {
                intercept: 0.0,
                coefficients: vec![1.0, 0.5],
            },
            features: FeatureSource::File {
                path,
                columns: columns(&["x1", "x2"]),
            },
        };
        assert_eq!(source.resolve().unwrap(), 12.0);
    }

    #[test]
    fn rejects_non_positive_rates() {
        for rps in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let result = RateSource::Fixed { rps }.resolve();
            assert!(matches!(result, Err(Error::InvalidRate(_))), "{rps}");
        }

        let negative_forecast = RateSource::Forecast {
            model: LinearForecaster {
                intercept: -5.0,
                coefficients: vec![1.0],
            },
            features: FeatureSource::Values(vec![2.0]),
        };
        assert!(negative_forecast.resolve().is_err());
    }
}
