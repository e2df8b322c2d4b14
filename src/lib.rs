//! # Fulfillment Monitor Library
//!
//! Ingests fulfillment events from upstream systems, tracks project progress
//! and raises notifications when rules detect anomalies.

pub mod adapters;
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod handlers;
pub mod ingestion;
pub mod models;
pub mod normalization;
pub mod notifications;
pub mod pipeline;
pub mod queue;
pub mod repositories;
pub mod rules;
pub mod scheduler;
pub mod server;
pub mod steps;
pub mod telemetry;
pub mod transports;
pub use migration;
