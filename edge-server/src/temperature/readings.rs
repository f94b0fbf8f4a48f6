use dashmap::DashMap;
use shared::models::{TemperatureReading, TemperatureStatus};
use std::sync::Arc;

/// Latest reading per sensor
#[derive(Debug, Clone, Default)]
pub struct LiveReadings {
    latest: Arc<DashMap<u16, TemperatureReading>>,
}

impl LiveReadings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, reading: TemperatureReading) {
        self.latest.insert(reading.sensor_id, reading);
    }

    pub fn latest(&self, sensor_id: u16) -> Option<TemperatureReading> {
        self.latest.get(&sensor_id).map(|r| *r)
    }

    /// Mean of the row's sensors, `None` before the first sample
    pub fn row_temperature(&self, row: char) -> Option<f64> {
        let (sum, count) = self
            .latest
            .iter()
            .filter(|r| r.row == row)
            .fold((0.0, 0u32), |(sum, count), r| (sum + r.temperature, count + 1));
        (count > 0).then(|| sum / count as f64)
    }

    /// All readings ordered by sensor
    pub fn snapshot(&self) -> Vec<TemperatureReading> {
        let mut all: Vec<_> = self.latest.iter().map(|r| *r).collect();
        all.sort_by_key(|r| r.sensor_id);
        all
    }
}

/// Intersection of storage ranges; `None` when they do not overlap
pub fn intersect_ranges(ranges: impl IntoIterator<Item = (f64, f64)>) -> Option<(f64, f64)> {
    let mut iter = ranges.into_iter();
    let first = iter.next()?;
    let (min, max) = iter.fold(first, |(lo, hi), (min, max)| (lo.max(min), hi.min(max)));
    (min <= max).then_some((min, max))
}

/// Classify a reading against `[min, max]`
///
/// Inside the range but within `warn_margin` of a bound is a warning; only
/// readings outside the range are breaches.
pub fn classify(temperature: f64, (min, max): (f64, f64), warn_margin: f64) -> TemperatureStatus {
    if temperature < min {
        TemperatureStatus::AlarmLow
    } else if temperature > max {
        TemperatureStatus::AlarmHigh
    } else if temperature < min + warn_margin {
        TemperatureStatus::WarnLow
    } else if temperature > max - warn_margin {
        TemperatureStatus::WarnHigh
    } else {
        TemperatureStatus::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(sensor_id: u16, row: char, temperature: f64) -> TemperatureReading {
        TemperatureReading {
            sensor_id,
            row,
            temperature,
            status: TemperatureStatus::Normal,
            timestamp: 0,
        }
    }

    #[test]
    fn row_temperature_averages_row_sensors() {
        let live = LiveReadings::new();
        assert_eq!(live.row_temperature('A'), None);
        live.update(reading(0, 'A', 4.0));
        live.update(reading(1, 'A', 6.0));
        live.update(reading(2, 'B', 9.0));
        assert_eq!(live.row_temperature('A'), Some(5.0));
        assert_eq!(live.row_temperature('B'), Some(9.0));

        live.update(reading(1, 'A', 5.0));
        assert_eq!(live.row_temperature('A'), Some(4.5));
        assert_eq!(live.snapshot().len(), 3);
    }

    #[test]
    fn ranges_intersect() {
        assert_eq!(intersect_ranges([(2.0, 8.0), (0.0, 6.0)]), Some((2.0, 6.0)));
        assert_eq!(intersect_ranges([(2.0, 4.0), (5.0, 8.0)]), None);
        assert_eq!(intersect_ranges(std::iter::empty()), None);
    }

    #[test]
    fn classification_bands() {
        let range = (2.0, 8.0);
        assert_eq!(classify(5.0, range, 0.5), TemperatureStatus::Normal);
        assert_eq!(classify(2.0, range, 0.5), TemperatureStatus::WarnLow);
        assert_eq!(classify(7.8, range, 0.5), TemperatureStatus::WarnHigh);
        assert_eq!(classify(8.0, range, 0.5), TemperatureStatus::WarnHigh);
        assert_eq!(classify(8.1, range, 0.5), TemperatureStatus::AlarmHigh);
        assert_eq!(classify(1.9, range, 0.5), TemperatureStatus::AlarmLow);
        assert!(classify(-3.0, range, 0.5).is_breach());
        assert!(!classify(7.9, range, 0.5).is_breach());
    }
}
