use std::any::Any;

use uuid::Uuid;

use crate::container::TimeSeriesContainer;

/// Upcasting to [`Any`] so components stored as trait objects can be handed
/// back as their concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// An entity of a system.
///
/// Entities that can carry time series expose their container; the rest keep
/// the default `None` and are rejected by every time series operation.
pub trait Component: AsAny {
    fn name(&self) -> &str;
    fn uuid(&self) -> Uuid;
    fn time_series_container(&self) -> Option<&TimeSeriesContainer> {
        None
    }
    fn time_series_container_mut(&mut self) -> Option<&mut TimeSeriesContainer> {
        None
    }
    /// Value a scaling-factor multiplier resolves to on this component.
    fn scaling_factor(&self, _multiplier: &str) -> Option<f64> {
        None
    }
}
