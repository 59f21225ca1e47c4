//! KidneySphere client library.
//!
//! Drives the site search and notification aggregators against a hosted
//! Supabase/PostgREST deployment. Re-exports internal modules for
//! integration testing; the CLI entrypoint lives in `main.rs`.

pub mod config;
pub mod debounce;
pub mod location;
pub mod notifications;
pub mod search;
pub mod store;
pub mod supabase;
pub mod watch;
