//! hypersignal - fleet directive coordination over Nostr relays
//!
//! Authorized signers publish directives (kind 33321) announcing an upgrade or
//! a reboot; nodes answer with acknowledgements (kind 3333). This crate follows
//! those records on the relays and derives the signal plan: which action is in
//! effect, who signed it, who is still pending, and whether it has decayed.

pub mod api;
pub mod cli;
pub mod config;
pub mod feed;
pub mod format;
pub mod plan;
pub mod profile;
pub mod record;
pub mod relay;
pub mod service;

pub use config::Config;
pub use feed::{Feed, ProcessedEvent};
pub use plan::{derive_plan, latest_directive_view, AuthorizedSigners, PlanEngine, SignalPlan};
pub use record::{RawEvent, Record, ValidationError};
pub use service::AppContext;
