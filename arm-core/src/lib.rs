//! ARM - AI Rules Manager
//!
//! Installs rulesets and promptsets for AI coding assistants from remote
//! registries into tool-specific sink directories.
//!
//! # Architecture
//!
//! ```text
//! arm.json (manifest) ──► Service ──► Registry {git, gitlab, cloudsmith}
//!                            │              │
//!                            │              ├── git clone / HTTP API
//!                            │              └── package cache (~/.arm/storage)
//!                            │
//!                            ├── arm-lock.json (resolved version + integrity)
//!                            └── Sinks ──► compiler (cursor, markdown, amazonq, copilot)
//!                                      └── arm/index.json | arm-index.json
//! ```

pub mod archive;
pub mod cache;
pub mod config;
pub mod error;
pub mod filelock;
pub mod glob;
pub mod key;
pub mod lockfile;
pub mod manifest;
pub mod package;
pub mod registry;
pub mod resource;
pub mod service;
pub mod sink;
pub mod version;

pub use error::ArmError;
pub use package::{File, Package, PackageMetadata};
pub use version::{Constraint, ConstraintKind, Version};
