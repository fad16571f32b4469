//! Distance/time sample series for a single workout
//!
//! A series is the raw material for best-effort extraction. It is validated
//! on construction and never repaired: a malformed series is an error.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{InsightsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
  /// Cumulative distance from the start of the activity
  pub distance_m: f64,
  /// Seconds since the start of the activity
  pub elapsed_s: f64,
  pub timestamp: DateTime<Utc>,
}

impl Sample {
  pub fn new(distance_m: f64, elapsed_s: f64, timestamp: DateTime<Utc>) -> Self {
    Self {
      distance_m,
      elapsed_s,
      timestamp,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SeriesParts")]
pub struct SampleSeries {
  pub workout_id: Option<i64>,
  samples: Vec<Sample>,
}

/// Unvalidated wire shape; deserialising goes through `SampleSeries::new`
#[derive(Deserialize)]
struct SeriesParts {
  workout_id: Option<i64>,
  samples: Vec<Sample>,
}

impl TryFrom<SeriesParts> for SampleSeries {
  type Error = InsightsError;

  fn try_from(parts: SeriesParts) -> Result<Self> {
    Self::new(parts.workout_id, parts.samples)
  }
}

impl SampleSeries {
  /// Build a validated series. Requires at least two samples, non-decreasing
  /// distance, strictly increasing elapsed time and ordered timestamps.
  pub fn new(workout_id: Option<i64>, samples: Vec<Sample>) -> Result<Self> {
    if samples.len() < 2 {
      return Err(InsightsError::InvalidSeries(format!(
        "need at least 2 samples, got {}",
        samples.len()
      )));
    }

    for (i, s) in samples.iter().enumerate() {
      if !s.distance_m.is_finite() || !s.elapsed_s.is_finite() {
        return Err(InsightsError::InvalidSeries(format!(
          "sample {} has a non-finite value",
          i
        )));
      }
    }

    for (i, pair) in samples.windows(2).enumerate() {
      let (prev, next) = (&pair[0], &pair[1]);
      if next.distance_m < prev.distance_m {
        return Err(InsightsError::InvalidSeries(format!(
          "distance decreases at sample {} ({} m -> {} m)",
          i + 1,
          prev.distance_m,
          next.distance_m
        )));
      }
      if next.elapsed_s <= prev.elapsed_s {
        return Err(InsightsError::InvalidSeries(format!(
          "elapsed time not increasing at sample {} ({} s -> {} s)",
          i + 1,
          prev.elapsed_s,
          next.elapsed_s
        )));
      }
      if next.timestamp < prev.timestamp {
        return Err(InsightsError::InvalidSeries(format!(
          "timestamp goes backwards at sample {}",
          i + 1
        )));
      }
    }

    Ok(Self {
      workout_id,
      samples,
    })
  }

  /// Build from parallel `time` (seconds) and `distance` (metres) provider streams
  pub fn from_streams(
    workout_id: Option<i64>,
    started_at: DateTime<Utc>,
    streams: &[ActivityStream],
  ) -> Result<Self> {
    let time_data = stream_values(streams, "time")?;
    let distance_data = stream_values(streams, "distance")?;

    if time_data.is_empty() || distance_data.is_empty() {
      return Err(InsightsError::InvalidSeries(
        "time and distance streams are both required".into(),
      ));
    }
    if time_data.len() != distance_data.len() {
      return Err(InsightsError::InvalidSeries(format!(
        "stream lengths differ (time {}, distance {})",
        time_data.len(),
        distance_data.len()
      )));
    }

    let samples = time_data
      .iter()
      .zip(distance_data.iter())
      .map(|(&t, &d)| Sample::new(d, t, started_at + Duration::milliseconds((t * 1000.0).round() as i64)))
      .collect();

    Self::new(workout_id, samples)
  }

  /// Parse the JSON stored in `workouts.samples_json`
  pub fn from_json(workout_id: Option<i64>, json: &str) -> Result<Self> {
    let samples: Vec<Sample> = serde_json::from_str(json)?;
    Self::new(workout_id, samples)
  }

  pub fn to_json(&self) -> Result<String> {
    Ok(serde_json::to_string(&self.samples)?)
  }

  pub fn samples(&self) -> &[Sample] {
    &self.samples
  }

  pub fn len(&self) -> usize {
    self.samples.len()
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }

  /// Distance covered between the first and last sample
  pub fn covered_distance(&self) -> f64 {
    match (self.samples.first(), self.samples.last()) {
      (Some(first), Some(last)) => last.distance_m - first.distance_m,
      _ => 0.0,
    }
  }
}

/// One provider stream, e.g. `{"type": "distance", "data": [0.0, 3.1, ...]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityStream {
  #[serde(rename = "type")]
  pub stream_type: String,
  pub data: Vec<serde_json::Value>,
}

/// Numeric values of one stream. A gap or non-numeric entry is an error,
/// since dropping it would misalign the parallel streams.
fn stream_values(streams: &[ActivityStream], stream_type: &str) -> Result<Vec<f64>> {
  let Some(stream) = streams.iter().find(|s| s.stream_type == stream_type) else {
    return Ok(Vec::new());
  };

  stream
    .data
    .iter()
    .enumerate()
    .map(|(i, v)| {
      v.as_f64().ok_or_else(|| {
        InsightsError::InvalidSeries(format!("{} stream has non-numeric entry {} at index {}", stream_type, v, i))
      })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 4, 7, 30, 0).unwrap()
  }

  fn sample(d: f64, t: f64) -> Sample {
    Sample::new(d, t, t0() + Duration::milliseconds((t * 1000.0) as i64))
  }

  #[test]
  fn test_rejects_single_sample() {
    let err = SampleSeries::new(None, vec![sample(0.0, 0.0)]).unwrap_err();
    assert!(matches!(err, InsightsError::InvalidSeries(_)));
  }

  #[test]
  fn test_rejects_decreasing_distance() {
    let err = SampleSeries::new(
      Some(3),
      vec![sample(0.0, 0.0), sample(100.0, 30.0), sample(90.0, 60.0)],
    )
    .unwrap_err();
    assert!(err.to_string().contains("distance decreases at sample 2"));
  }

  #[test]
  fn test_rejects_repeated_elapsed_time() {
    let err = SampleSeries::new(None, vec![sample(0.0, 0.0), sample(10.0, 0.0)]).unwrap_err();
    assert!(err.to_string().contains("elapsed time not increasing"));
  }

  #[test]
  fn test_allows_standing_still() {
    let series =
      SampleSeries::new(None, vec![sample(0.0, 0.0), sample(0.0, 10.0), sample(50.0, 20.0)]).unwrap();
    assert_eq!(series.len(), 3);
    assert_eq!(series.covered_distance(), 50.0);
  }

  #[test]
  fn test_json_round_trip_preserves_samples() {
    let series = SampleSeries::new(Some(1), vec![sample(0.0, 0.0), sample(200.0, 50.0)]).unwrap();
    let parsed = SampleSeries::from_json(Some(1), &series.to_json().unwrap()).unwrap();
    assert_eq!(parsed, series);
  }

  #[test]
  fn test_from_streams_builds_timestamps() {
    let streams: Vec<ActivityStream> = serde_json::from_str(
      r#"[
        {"type": "time", "data": [0, 50, 200]},
        {"type": "distance", "data": [0.0, 200.0, 700.0]},
        {"type": "heartrate", "data": [120, 140, 150]}
      ]"#,
    )
    .unwrap();

    let series = SampleSeries::from_streams(Some(9), t0(), &streams).unwrap();
    assert_eq!(series.len(), 3);
    assert_eq!(series.samples()[2].timestamp, t0() + Duration::seconds(200));
    assert_eq!(series.workout_id, Some(9));
  }

  #[test]
  fn test_from_streams_rejects_gaps() {
    let streams: Vec<ActivityStream> = serde_json::from_str(
      r#"[
        {"type": "time", "data": [0, null, 100, 150]},
        {"type": "distance", "data": [0.0, 200.0, null, 600.0]}
      ]"#,
    )
    .unwrap();

    let err = SampleSeries::from_streams(None, t0(), &streams).unwrap_err();
    assert!(matches!(err, InsightsError::InvalidSeries(_)));
    assert!(err.to_string().contains("time stream has non-numeric entry null at index 1"));
  }

  #[test]
  fn test_deserialize_validates_samples() {
    let empty = serde_json::from_str::<SampleSeries>(r#"{"workout_id":null,"samples":[]}"#);
    assert!(empty.is_err());

    let series = SampleSeries::new(Some(4), vec![sample(0.0, 0.0), sample(200.0, 50.0)]).unwrap();
    let json = serde_json::to_string(&series).unwrap();
    let parsed: SampleSeries = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, series);
  }

  #[test]
  fn test_from_streams_requires_distance() {
    let streams = vec![ActivityStream {
      stream_type: "time".to_string(),
      data: vec![0.into(), 1.into()],
    }];
    assert!(SampleSeries::from_streams(None, t0(), &streams).is_err());
  }
}
