//! # k-mirror
//!
//! A periodic copy tool: each configured source is snapshotted into its
//! destination directory on a fixed interval, with retry back-off on
//! recoverable failures and eviction of the oldest snapshot past a retention
//! limit.
//!
//! ## Features
//!
//! - **Timer-Driven Schedulers**: One independent copy cycle per source
//! - **Multiple Backends**: Local filesystem, remote over SSH, or local with
//!   shell hooks around each cycle
//! - **Retention Management**: Oldest-first eviction past a per-source limit
//! - **Skip Detection**: Unchanged sources can skip the copy entirely
//! - **Deterministic Shutdown**: Stop requests land before any blocking wait,
//!   so in-flight cycles wind down concurrently
//!
//! ## Quick Start
//!
//! ```no_run
//! use k_mirror::mirror::config::OverseerConfig;
//! use k_mirror::mirror::ops::OpsConfig;
//! use k_mirror::mirror::overseer::Overseer;
//!
//! // Load configuration from YAML file
//! let config: OverseerConfig = serde_yml::from_reader(std::fs::File::open("config.yml")?)?;
//!
//! // Run every scheduler until interrupted (or max_run_time elapses)
//! let overseer = Overseer::<OpsConfig>::from_config(&config)?;
//! overseer.run_all(config.max_run_time)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod mirror;
