pub mod actors;
pub mod catalog;
pub mod check;
pub mod config;
pub mod entity;
pub mod error;
pub mod expression;
pub mod proxy;
pub mod publish;
pub mod util;

pub use check::{CheckConfig, ProxyRequests, SubstitutedCheck};
pub use entity::{Entity, System};
