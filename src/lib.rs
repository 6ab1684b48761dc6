//! Dispatch Engine - crew scheduling and route optimization for field
//! restoration work.
//!
//! The [`services::store::ScheduleStore`] owns one day's schedule; the
//! planner fills in coordinates and drive times through the geocoding and
//! routing providers, and the persister writes settled days to a repository.

pub mod cli;
pub mod config;
pub mod db;
pub mod defaults;
pub mod error;
pub mod services;
pub mod types;
