//! # Offer tracking and matching.
//!
//! - [`Offer`] — one node's resource advertisement, redeemable once
//! - [`OfferRegistry`] — live-offer bookkeeping: insertion-order walk,
//!   rescind/consume/decline lifecycle, TTL sweeper
//!
//! The registry is the sole path by which a launch is decided: the binder
//! walks live offers in arrival order and consumes the first fit.

mod offer;
mod registry;

pub use offer::{Offer, OfferId};
pub use registry::{OfferRegistry, WalkAction, WalkOutcome};
