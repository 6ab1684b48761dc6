//! Database queries

pub mod schedule;
