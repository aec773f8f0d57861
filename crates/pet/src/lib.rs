pub mod cli;
pub mod config;
pub mod frames;
pub mod model;
pub mod runtime;
pub mod worker;
