//! Port forwarding daemon
//!
//! Keeps a persisted table of TCP/UDP forwarding rules in sync with the
//! host, using either a relay process per rule or a kernel DNAT rule per
//! rule. Every start re-derives the live state from the table.

mod commands;
pub mod config;
mod fwd_mgr;
pub mod keys;
mod nat;
mod registry;
mod relay;
pub mod server;
pub mod store;
mod validate;

pub use config::{DaemonConfig, DEFAULT_CONFIG_PATH};
pub use fwd_mgr::{AddOutcome, FwdMgr, RemoveOutcome, SyncReport};
pub use keys::{decode_key, encode_key, RuleKey};
pub use nat::NatDriver;
pub use registry::ResourceRegistry;
pub use relay::RelayDriver;
pub use store::{DesiredTable, JsonFileStore};
pub use validate::{validate_add, validate_remove};
