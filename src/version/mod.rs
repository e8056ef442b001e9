//! Version resolution layer for npm packages
//!
//! This module fetches, caches, and compares package versions from a CDN
//! mirror with the npm registry as the authoritative fallback.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  miss   ┌─────────────┐  no latest  ┌─────────────┐
//! │ CdnRegistry │────────▶│   Retry /   │────────────▶│ NpmRegistry │
//! │ (batch API) │         │  fetch_tag  │             │ (fallback)  │
//! └─────────────┘         └─────────────┘             └─────────────┘
//!        │                                                   │
//!        ▼                                                   ▼
//! ┌─────────────┐         ┌─────────────┐
//! │CacheManager │────────▶│ Persistent  │
//! │  (memory)   │         │   (disk)    │
//! └─────────────┘         └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`]: Two-tier cache (memory in front of disk)
//! - [`persistent`]: JSON-file disk cache with a versioned index
//! - [`registry`]: Registry trait used for fallback resolution
//! - [`registries`]: CDN and npm registry clients
//! - [`retry`]: Retry policy with per-attempt timeouts
//! - [`single_flight`]: Request coalescing
//! - [`sink`]: Progress and batch notifications
//! - [`semver`]: Version coercion, comparison, and range matching
//! - [`types`]: `PackageVersionData` and upgrade targets
//! - [`error`]: Error types

mod batch;
pub mod cache;
pub mod error;
pub mod persistent;
pub mod registries;
pub mod registry;
pub mod retry;
pub mod semver;
pub mod single_flight;
pub mod sink;
pub mod types;
