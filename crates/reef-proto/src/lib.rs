//! Wire-level types shared by the Reef relay and the operator console.
//!
//! The relay treats payloads as opaque frames and only peeks at their `type`
//! for diagnostics; the console decodes them into [`RelayedMessage`] and feeds
//! its reconciliation model.

pub mod bootstrap;
pub mod device;
pub mod identity;
pub mod message;
pub mod snapshot;

pub use bootstrap::{ColoniesEndpoint, ConsoleBootstrap};
pub use device::{DeviceConfig, DevicePair, SyncStatus};
pub use identity::{ClientIdentity, NeverPhantom, PhantomPolicy, UserAgentPolicy};
pub use message::{MalformedMessage, MessageKind, RelayedMessage};
pub use snapshot::{Blueprint, BlueprintMetadata};
