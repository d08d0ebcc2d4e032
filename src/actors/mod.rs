//! Actor runtime and the hub's actors
//!
//! Every device and every rule chain gets its own actor: a tokio task with a
//! bounded mailbox, processing one message at a time.
//!
//! ## Architecture Overview
//!
//! ```text
//!   Device:d1 ─┐
//!   Device:d2 ─┼──→ RuleEngine ──┬──→ RuleChain:root
//!   Device:dN ─┘                 └──→ RuleChain:<profile chain>
//! ```
//!
//! ## Actor Types
//!
//! - **DeviceActor**: parses raw payloads, tracks transport sessions
//! - **RuleEngineActor**: resolves the chain of each message
//! - **RuleChainActor**: runs one chain instance and keeps its statistics
//!
//! ## Communication Patterns
//!
//! 1. **tell**: fire-and-forget into a named mailbox
//! 2. **Request/Response**: oneshot channels carried inside a message
//! 3. **Delayed redelivery**: `schedule_self`, cancelled when the actor stops

pub mod device;
pub mod mailbox;
pub mod messages;
pub mod rule_chain;
pub mod rule_engine;
pub mod system;

pub use mailbox::OverflowPolicy;
pub use messages::{ActorMsg, DeviceState};
pub use system::{Actor, ActorContext, ActorMessage, ActorSystem};
