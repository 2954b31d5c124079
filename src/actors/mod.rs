//! Actor-based proxy check scheduling
//!
//! Each proxy check definition is driven by its own actor running as an
//! independent async task. Actors share only the read-only collaborators in
//! [`SchedulerContext`](proxy_check::SchedulerContext); a slow or failing
//! check never blocks another one.
//!
//! ## Architecture Overview
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │ schedulerd (main)│
//!                  └────────┬─────────┘
//!                           │ spawns one per check
//!              ┌────────────┼────────────┐
//!              │            │            │
//!      ┌───────▼───────┐    │    ┌───────▼───────┐
//!      │ ProxyCheck-1  │    │    │ ProxyCheck-N  │
//!      └───┬───────┬───┘    │    └───┬───────┬───┘
//!          │       │        │        │       │
//!   EntityCatalog  │  dispatcher tasks (splayed, cancellable)
//!                  │        │        │
//!                  └────────┼────────┘
//!                           │ publish
//!                 ┌─────────▼──────────┐
//!                 │  CheckPublisher    │ (broadcast, MPMC)
//!                 └────────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Events**: Resolved check requests go out through the publisher
//! 3. **Request/Response**: oneshot channels for cycle reports and state queries
//! 4. **Cancellation**: a watch channel per generation of dispatches

pub mod messages;
pub mod proxy_check;
