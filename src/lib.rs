//! # Ops Harness
//!
//! Two independent HTTP/JSON services sharing one admission and server stack:
//!
//! - **Network diagnostics** runs HTTP, DNS, connectivity, port-scan and TLS
//!   probes on request and optionally persists a summary of each result.
//! - **Visit tracking** maintains file-coverage campaigns: which files in a
//!   project have been reviewed, how often, and how stale each one is.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!   request ────▶ │ trace → cors → body limit →  │
//!                 │ admission (rate limit, auth) │
//!                 └──────────────┬───────────────┘
//!                ┌───────────────┴───────────────┐
//!                ▼                               ▼
//!         ┌─────────────┐                 ┌─────────────┐
//!         │ network_api │                 │ tracker_api │
//!         └──────┬──────┘                 └──────┬──────┘
//!                ▼                               ▼
//!         ┌─────────────┐                 ┌─────────────┐
//!         │ ProbeEngine │──▶ ProbeSink    │   Tracker   │──▶ CampaignStore
//!         └─────────────┘    (SQL/none)   └─────────────┘    (JSON files)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`error`] | Service error kinds and their HTTP status |
//! | [`envelope`] | Response envelopes for the two services |
//! | [`ratelimit`] | Per-client sliding-window limiter |
//! | [`client_id`] | Client identity for rate limiting |
//! | [`admission`] | Rate limit and API key middleware |
//! | [`server`] | Shared layers and graceful shutdown |
//! | [`probe`] | Diagnostic probes and the engine that runs them |
//! | [`sink`] | Optional persistence of probe results |
//! | [`network_api`] | Diagnostics router |
//! | [`models`] | Campaign data model |
//! | [`store`] | One JSON document per campaign |
//! | [`patterns`] | Glob compilation and path normalisation |
//! | [`sync`] | Reconciles campaigns with the filesystem |
//! | [`staleness`] | Staleness scoring |
//! | [`visits`] | Visit recording and adjustment |
//! | [`queries`] | Prioritisation, coverage, export and import |
//! | [`tracker`] | Campaign operations over the store |
//! | [`tracker_api`] | Visit-tracking router |
//! | [`clock`] | Injectable time source |

pub mod admission;
pub mod client_id;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod models;
pub mod network_api;
pub mod patterns;
pub mod probe;
pub mod queries;
pub mod ratelimit;
pub mod server;
pub mod sink;
pub mod staleness;
pub mod store;
pub mod sync;
pub mod tracker;
pub mod tracker_api;
pub mod visits;
