//! Parameter-sweep harness for the RocksDB read cost of the gas estimator.
//!
//! The sweep runs the external estimator once per (value size, variant,
//! repetition), averages repetitions and hands the grouped result to gnuplot.

pub mod aggregate;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod pipeline;
pub mod render;
pub mod sweep;
pub mod trial;
pub mod types;
