// src/core/mod.rs

pub mod address;
pub mod config;
pub mod descriptor;
pub mod dispatcher;
pub mod graph;
pub mod interpolator;
pub mod ledger;
pub mod options;
pub mod overrides;
pub mod paths;
pub mod phase;
pub mod phase_kinds;
pub mod report;
pub mod value;
pub mod value_parser;
