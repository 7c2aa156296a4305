//! Science Portal Session Library
//!
//! Client-side lifecycle management for interactive science-platform
//! sessions: discovery, launch, deletion, and polling until the session
//! list settles.

pub mod client;
pub mod config;
pub mod events;
pub mod launch;
pub mod session;
