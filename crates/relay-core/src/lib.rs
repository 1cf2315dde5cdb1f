//! # Relay Core
//!
//! Chain abstraction core for the decentralized RPC relay: a
//! protocol-agnostic layer that normalizes four RPC dialects into a uniform
//! message, applies per-chain policy derived from a declarative spec, and
//! binds each message to a provider connection honoring its capability
//! requirements.
//!
//! - **[`spec`]**: the immutable per-epoch capability manifest and its
//!   lookup keys.
//!
//! - **[`parser`]**: the shared chain parser plus the JSON-RPC, Tendermint,
//!   REST and gRPC dialects producing [`message::ChainMessage`]s.
//!
//! - **[`extensions`]**: rule-driven activation of orthogonal capabilities
//!   (`archive` et al.) on a per-message basis.
//!
//! - **[`router`]**: extension-aware provider selection with pooled
//!   connections and per-message relay timeouts.
//!
//! - **[`health`]**: the provider prober (GUID echo, CORS preflight,
//!   unsigned-relay rejection, version gate) and its results aggregator.
//!
//! - **[`metrics`]**: the provider Prometheus series.
//!
//! ## Dataflow
//!
//! ```text
//! Listener → Dialect Parser → ChainMessage → Policy + Extensions → Router → Provider
//! ```
//!
//! The health prober runs independently, reusing the parser and router.
//!
//! ## Concurrency
//!
//! The parser is a long-lived shared object behind one reader-writer lock;
//! readers serve requests, writers swap specs and policies wholesale. No
//! lock is held across I/O. The router and prober are the only suspension
//! points and accept cancellation.

pub mod block;
pub mod config;
pub mod errors;
pub mod extensions;
pub mod fetcher;
pub mod health;
pub mod message;
pub mod metrics;
pub mod parser;
pub mod router;
pub mod spec;
pub mod testutil;
pub mod version;
