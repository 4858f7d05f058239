//! Background workers

pub mod aggregation;

pub use aggregation::{
    AggregationConfig, AggregationScheduler, CycleReport, PassReport, SchedulerHandle,
};
