//! # Gateway Routing
//!
//! Path routing and load balancing for the campus API gateway.
//!
//! This crate provides:
//! - First-match prefix routing with path rewriting
//! - Round robin, weighted and client-key hash instance selection
//! - Health- and circuit-aware candidate filtering

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod load_balancer;
pub mod router;

// Re-export main types
pub use load_balancer::{hash_key, select_weighted, LoadBalancer, LoadBalancerConfig};
pub use router::{rewrite_path, RouteMatch, RouteTable};
