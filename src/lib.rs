//! aeta: test discovery and batched remote execution.
//!
//! Tests are addressed by dotted fullname (`package.module.Class.method`),
//! discovered in a registry of test code, split into independently
//! scheduled units and run either inside the request or as deferred work.
//! A remote client replays the results as local test cases.
//!
//! # Architecture
//!
//! ```text
//!   client ──HTTP──► rest ──► orchestrator ──► discovery ──► catalog
//!                                 │    ▲            │
//!                                 │    │            ▼
//!                                 ▼    │         executor
//!                              queue ──┘
//!                                 │
//!                                 ▼
//!                               store
//! ```
//!
//! - **Catalog**: the registry of packages, modules, classes and methods
//! - **Discovery**: resolves fullnames and expands them into units
//! - **Executor**: runs a unit and captures its outcome
//! - **Orchestrator**: batch life cycle over the store and the queue
//! - **Rest**: the HTTP surface
//! - **Client**: polls a remote batch and replays its outcomes
//! - **Report**: console and JUnit output of a remote run
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use aeta::config::load_config_str;
//! use aeta::sample::sample_catalog;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config_str("[tests]\npackage_names = [\"sample_package\"]")?;
//!     let server = aeta::rest::start(&config, Arc::new(sample_catalog())).await?;
//!     println!("Serving on {}", server.base_url());
//!     server.wait().await
//! }
//! ```

pub mod catalog;
pub mod client;
pub mod config;
pub mod discovery;
pub mod executor;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod report;
pub mod rest;
pub mod sample;
pub mod store;

pub use catalog::{Catalog, ModuleLoader};
pub use client::{RemoteSuite, RestClient, ResultUpdater, create_test_cases};
pub use config::{Config, load_config};
pub use discovery::{Discovery, TestObject};
pub use orchestrator::Orchestrator;
