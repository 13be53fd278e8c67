use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest segment handed to map clients in one piece.
pub const MAX_POINTS_PER_SEGMENT: usize = 27;

/// One detection of a vehicle by a roadside camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub datahora: DateTime<Utc>,
    pub codcet: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub bairro: Option<String>,
    #[serde(default)]
    pub localidade: Option<String>,
    #[serde(default)]
    pub velocidade: Option<f64>,
    #[serde(default)]
    pub seconds_to_next_point: Option<f64>,
}

/// One trip, split into overlapping segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarPath {
    pub locations: Vec<Vec<Location>>,
}

/// Splits time-ordered detections into trips wherever two consecutive points
/// are more than `max_gap_secs` apart.
///
/// Every point gets `seconds_to_next_point`; the last point of each trip gets `None`.
pub fn split_trips(mut locations: Vec<Location>, max_gap_secs: i64) -> Vec<Vec<Location>> {
    let mut trips = Vec::new();
    if locations.is_empty() {
        return trips;
    }

    locations.sort_by_key(|l| l.datahora);

    let mut points = locations.into_iter();
    let mut current = match points.next() {
        Some(first) => vec![first],
        None => return trips,
    };

    for point in points {
        let last = current.len() - 1;
        let gap = (point.datahora - current[last].datahora).num_milliseconds() as f64 / 1000.0;

        if gap > max_gap_secs as f64 {
            current[last].seconds_to_next_point = None;
            trips.push(std::mem::replace(&mut current, vec![point]));
        } else {
            current[last].seconds_to_next_point = Some(gap);
            current.push(point);
        }
    }

    if let Some(last) = current.last_mut() {
        last.seconds_to_next_point = None;
    }
    trips.push(current);

    trips
}

/// Cuts a trip into segments of at most `n` points. Consecutive segments share
/// their boundary point so the drawn path stays continuous.
pub fn chunk_locations<T: Clone>(locations: &[T], n: usize) -> Vec<Vec<T>> {
    if n >= locations.len() || n <= 1 {
        return vec![locations.to_vec()];
    }

    let mut chunks = Vec::new();
    let mut i = 0;
    while i + n < locations.len() {
        chunks.push(locations[i..i + n].to_vec());
        i += n - 1;
    }
    // The tail always holds at least two points.
    chunks.push(locations[i..].to_vec());

    chunks
}

pub fn build_paths(locations: Vec<Location>, max_gap_secs: i64, segment_len: usize) -> Vec<CarPath> {
    split_trips(locations, max_gap_secs)
        .into_iter()
        .map(|trip| CarPath {
            locations: chunk_locations(&trip, segment_len),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(offset_secs: i64) -> Location {
        Location {
            datahora: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
                + Duration::seconds(offset_secs),
            codcet: format!("CAM{}", offset_secs),
            latitude: -22.9,
            longitude: -43.2,
            bairro: None,
            localidade: None,
            velocidade: Some(40.0),
            seconds_to_next_point: None,
        }
    }

    #[test]
    fn splits_on_long_gaps() {
        let trips = split_trips(vec![at(0), at(60), at(5000), at(5030)], 3600);

        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].len(), 2);
        assert_eq!(trips[0][0].seconds_to_next_point, Some(60.0));
        assert_eq!(trips[0][1].seconds_to_next_point, None);
        assert_eq!(trips[1][0].seconds_to_next_point, Some(30.0));
        assert_eq!(trips[1][1].seconds_to_next_point, None);
    }

    #[test]
    fn orders_points_before_splitting() {
        let trips = split_trips(vec![at(120), at(0), at(60)], 3600);
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0][0].codcet, "CAM0");
        assert_eq!(trips[0][2].codcet, "CAM120");
    }

    #[test]
    fn empty_input_has_no_trips() {
        assert!(split_trips(Vec::new(), 3600).is_empty());
    }

    #[test]
    fn chunks_overlap_on_boundaries() {
        let points: Vec<u32> = (0..10).collect();
        let chunks = chunk_locations(&points, 4);
        assert_eq!(
            chunks,
            vec![vec![0, 1, 2, 3], vec![3, 4, 5, 6], vec![6, 7, 8, 9]]
        );

        let chunks = chunk_locations(&points, 3);
        assert_eq!(chunks.last().unwrap(), &vec![8, 9]);
    }

    #[test]
    fn short_trips_stay_whole() {
        let points = vec![1, 2, 3];
        assert_eq!(chunk_locations(&points, 27), vec![vec![1, 2, 3]]);
        assert_eq!(chunk_locations(&points, 1), vec![vec![1, 2, 3]]);
    }
}
