#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod data;
pub mod embedding;
pub mod ensemble;
pub mod error;
pub mod generator;
pub mod metrics;
pub mod model;
pub mod training;
pub mod vocabulary;
