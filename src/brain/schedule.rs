use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

pub const HOURS_PER_DAY: u32 = 24;

/// Target used for an hour no segment covers. Only reachable for an unvalidated schedule.
pub const DEFAULT_TARGET_TEMPERATURE: f64 = 20.0;

/// A fixed time-of-day range (inclusive at both ends) with the temperature to heat to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScheduleSegment {
    #[serde(rename = "hour", alias = "start_hour")]
    start_hour: u32,
    #[serde(rename = "endHour", alias = "end_hour")]
    end_hour: u32,
    #[serde(rename = "targetTemperature", alias = "target_temperature")]
    target_temperature: f64,
}

impl ScheduleSegment {
    pub fn new(start_hour: u32, end_hour: u32, target_temperature: f64) -> Self {
        Self {
            start_hour,
            end_hour,
            target_temperature,
        }
    }

    pub fn contains(&self, hour: u32) -> bool {
        self.start_hour <= hour && hour <= self.end_hour
    }

    pub fn get_target_temperature(&self) -> f64 {
        self.target_temperature
    }
}

impl Display for ScheduleSegment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:0>2}-{:0>2}h @ {:.1}C", self.start_hour, self.end_hour, self.target_temperature)
    }
}

#[derive(Debug, PartialEq)]
pub enum ScheduleError {
    InvalidSegment { index: usize, start_hour: u32, end_hour: u32 },
    Uncovered(u32),
    Overlap { hour: u32, first: usize, second: usize },
}

impl Display for ScheduleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleError::InvalidSegment { index, start_hour, end_hour } => write!(f, "Segment {} has an invalid range {}-{}", index, start_hour, end_hour),
            ScheduleError::Uncovered(hour) => write!(f, "No segment covers hour {}", hour),
            ScheduleError::Overlap { hour, first, second } => write!(f, "Hour {} is covered by both segment {} and segment {}", hour, first, second),
        }
    }
}

impl std::error::Error for ScheduleError {}

/// The day's heating schedule. Every hour of the day belongs to exactly one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatingSchedule {
    segments: Vec<ScheduleSegment>,
}

impl HeatingSchedule {
    pub fn new(segments: Vec<ScheduleSegment>) -> Result<Self, ScheduleError> {
        for (index, segment) in segments.iter().enumerate() {
            if segment.start_hour > segment.end_hour || segment.end_hour >= HOURS_PER_DAY {
                return Err(ScheduleError::InvalidSegment {
                    index,
                    start_hour: segment.start_hour,
                    end_hour: segment.end_hour,
                });
            }
        }

        for hour in 0..HOURS_PER_DAY {
            let mut matching = segments.iter().enumerate().filter(|(_, s)| s.contains(hour)).map(|(i, _)| i);
            let first = matching.next().ok_or(ScheduleError::Uncovered(hour))?;
            if let Some(second) = matching.next() {
                return Err(ScheduleError::Overlap { hour, first, second });
            }
        }

        Ok(Self { segments })
    }

    /// The segment in force at the given hour, with its index.
    pub fn segment_for_hour(&self, hour: u32) -> Option<(usize, &ScheduleSegment)> {
        self.segments.iter().enumerate().find(|(_, segment)| segment.contains(hour))
    }

    pub fn get_segments(&self) -> &[ScheduleSegment] {
        &self.segments
    }
}

impl Default for HeatingSchedule {
    fn default() -> Self {
        Self {
            segments: vec![
                ScheduleSegment::new(0, 6, 16.0),
                ScheduleSegment::new(7, 21, 21.0),
                ScheduleSegment::new(22, 23, 16.0),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_covers_every_hour_once() {
        let schedule = HeatingSchedule::default();
        assert_eq!(HeatingSchedule::new(schedule.get_segments().to_vec()), Ok(schedule.clone()));
        for hour in 0..HOURS_PER_DAY {
            let matches = schedule.get_segments().iter().filter(|s| s.contains(hour)).count();
            assert_eq!(matches, 1, "Hour {} should match exactly one segment", hour);
            assert!(schedule.segment_for_hour(hour).is_some());
        }
    }

    #[test]
    fn lookup() {
        let schedule = HeatingSchedule::default();
        assert_eq!(schedule.segment_for_hour(6).unwrap().0, 0);
        assert_eq!(schedule.segment_for_hour(7).unwrap().0, 1);
        assert_eq!(schedule.segment_for_hour(21).unwrap().1.get_target_temperature(), 21.0);
        assert_eq!(schedule.segment_for_hour(22).unwrap().0, 2);
        assert_eq!(schedule.segment_for_hour(24), None);
    }

    #[test]
    fn shared_boundary_hours_are_rejected() {
        let result = HeatingSchedule::new(vec![
            ScheduleSegment::new(0, 7, 16.0),
            ScheduleSegment::new(7, 22, 21.0),
            ScheduleSegment::new(22, 23, 16.0),
        ]);
        assert_eq!(result, Err(ScheduleError::Overlap { hour: 7, first: 0, second: 1 }));
    }

    #[test]
    fn gaps_are_rejected() {
        let result = HeatingSchedule::new(vec![
            ScheduleSegment::new(0, 6, 16.0),
            ScheduleSegment::new(8, 23, 21.0),
        ]);
        assert_eq!(result, Err(ScheduleError::Uncovered(7)));
    }

    #[test]
    fn backwards_and_out_of_day_segments_are_rejected() {
        assert!(matches!(
            HeatingSchedule::new(vec![ScheduleSegment::new(10, 2, 16.0)]),
            Err(ScheduleError::InvalidSegment { index: 0, .. })
        ));
        assert!(matches!(
            HeatingSchedule::new(vec![ScheduleSegment::new(0, 24, 16.0)]),
            Err(ScheduleError::InvalidSegment { index: 0, .. })
        ));
    }

    #[test]
    fn serializes_with_front_end_names() {
        let json = serde_json::to_value(ScheduleSegment::new(7, 21, 21.0)).unwrap();
        assert_eq!(json, serde_json::json!({"hour": 7, "endHour": 21, "targetTemperature": 21.0}));
    }
}
