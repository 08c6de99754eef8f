#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod bootstrap;
pub mod config;
pub mod jobs;
pub mod metrics;
pub mod patients;
pub mod pipeline;
pub mod progress;
pub mod summary;
pub mod types;
