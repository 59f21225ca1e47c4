//! KidneySphere domain core.
//!
//! Pure types and logic for the unified site search and the "new since last
//! seen" notification feed, plus the [`backend::SiteBackend`] trait that the
//! client crate implements against the hosted data store. This crate has
//! zero internal deps and performs no I/O of its own.

pub mod backend;
pub mod display;
pub mod error;
pub mod highlight;
pub mod notifications;
pub mod search;
pub mod types;
pub mod watermark;
