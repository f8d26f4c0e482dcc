//! examkit-core: Data model, progressive scoring, integrity sealing and caches.
//!
//! This crate holds everything the exam pipeline shares: the marking scheme
//! and submission types, the incremental score engine and the isolated task it
//! runs on, the keyed integrity hash, the server-side payload validation, and
//! the two caches (offline marking-scheme cache and attempts read cache).

pub mod attempts;
pub mod config;
pub mod error;
pub mod integrity;
pub mod model;
pub mod offline_cache;
pub mod parser;
pub mod scoring;
pub mod traits;
pub mod validation;
pub mod worker;
