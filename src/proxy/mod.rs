//! Proxy check core
//!
//! Pure building blocks of a proxy check cycle. None of them perform I/O and
//! all of them can run concurrently across entities and checks.
//!
//! ```text
//! entities ─► matcher ─► splay ─► for each match: tokens ─► publish at i × splay
//!                 ▲                                  ▲
//!                 └──────── attributes ──────────────┘
//! ```
//!
//! The actor that drives cycles lives in [`crate::actors::proxy_check`].

pub mod attributes;
pub mod matcher;
pub mod splay;
pub mod tokens;

pub use attributes::AttributeView;
pub use matcher::match_entities;
pub use splay::{SplayPolicy, calculate_splay_interval};
pub use tokens::substitute_proxy_entity_tokens;
