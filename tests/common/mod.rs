#![allow(dead_code)]

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use seriesclad::component::Component;
use seriesclad::container::TimeSeriesContainer;
use seriesclad::datatype::Resolution;
use seriesclad::forecast::Deterministic;
use seriesclad::series::SingleTimeSeries;
use uuid::Uuid;

pub fn at(hour: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + TimeDelta::hours(hour)
}

pub fn hourly() -> Resolution {
    Resolution::hours(1).expect("one hour is a valid resolution")
}

pub fn ramp(label: &str, len: usize) -> SingleTimeSeries {
    let values = (0..len).map(|i| i as f64 * 0.5).collect();
    SingleTimeSeries::from_values(label, at(0), hourly(), values).expect("series")
}

/// `count` windows issued hourly, each holding `horizon` values.
pub fn forecast(label: &str, count: usize, horizon: usize) -> Deterministic {
    let data: BTreeMap<NaiveDateTime, Vec<f64>> = (0..count)
        .map(|w| {
            let window = (0..horizon).map(|h| (w * 100 + h) as f64).collect();
            (at(w as i64), window)
        })
        .collect();
    Deterministic::new(label, data, hourly()).expect("forecast")
}

pub struct Bus {
    pub name: String,
    pub uuid: Uuid,
    pub base_power: f64,
    pub series: TimeSeriesContainer,
}

impl Bus {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            uuid: Uuid::new_v4(),
            base_power: 100.0,
            series: TimeSeriesContainer::new(),
        }
    }
}

impl Component for Bus {
    fn name(&self) -> &str {
        &self.name
    }
    fn uuid(&self) -> Uuid {
        self.uuid
    }
    fn time_series_container(&self) -> Option<&TimeSeriesContainer> {
        Some(&self.series)
    }
    fn time_series_container_mut(&mut self) -> Option<&mut TimeSeriesContainer> {
        Some(&mut self.series)
    }
    fn scaling_factor(&self, multiplier: &str) -> Option<f64> {
        (multiplier == "base_power").then_some(self.base_power)
    }
}

/// A component without time series support.
pub struct Line {
    pub name: String,
    pub uuid: Uuid,
}

impl Line {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            uuid: Uuid::new_v4(),
        }
    }
}

impl Component for Line {
    fn name(&self) -> &str {
        &self.name
    }
    fn uuid(&self) -> Uuid {
        self.uuid
    }
}
