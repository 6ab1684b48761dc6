//! Dispatch services: providers, planning algorithms and the schedule store

pub mod conflicts;
pub mod geo;
pub mod geocoding;
pub mod nominatim;
pub mod outputs;
pub mod persistence;
pub mod placement;
pub mod planner;
pub mod redistribution;
pub mod roster;
pub mod routing;
pub mod sequencer;
pub mod store;
