pub mod broker;
pub mod config;
pub mod execution;
pub mod models;
pub mod normalizer;
pub mod orchestration;
pub mod persistence;
pub mod sandbox;
pub mod sqlite;
