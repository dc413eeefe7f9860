//! # corrlink core
//!
//! The correction-delivery pipeline of the corrlink relay: everything
//! between a network link that carries GNSS corrections and the receiver
//! that consumes them.
//!
//! ```text
//!  CellularTransport ─┐
//!                     ├─▶ Mailbox ──▶ CorrectionRouter ──▶ GnssReceiver
//!  WifiTransport ─────┘                    ▲
//!        │                                 │ FrameDetector
//!        └── ConfigStore ◀── RegionSelector ◀── receiver GGA fixes
//! ```
//!
//! Hardware and network access goes through the capability traits in
//! [`drivers`]; the binary crate supplies host implementations.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`mailbox`] | Bounded, ownership-transferring message queue |
//! | [`stream`] | Byte-stream adapters over a mailbox |
//! | [`checklist`] | Ordered fallible transactions |
//! | [`selector`] | Region and L-band frequency selection |
//! | [`config`] | Persistent settings and the [`ConfigStore`] contract |
//! | [`drivers`] | Modem, WiFi, MQTT, socket, HTTPS and receiver traits |
//! | [`transport`] | Cellular and WiFi state machines |
//! | [`router`] | Frame classification and source arbitration |
//! | [`error`] | Error types |

pub mod checklist;
pub mod config;
pub mod drivers;
pub mod error;
pub mod mailbox;
pub mod router;
pub mod selector;
pub mod stream;
pub mod transport;

#[cfg(test)]
mod testing;

pub use checklist::Checklist;
pub use config::{ConfigStore, MemoryConfigStore, Settings, TransportTimings};
pub use drivers::{
    CellularModem, GnssReceiver, HttpResponse, HttpsClient, MqttLink, NtripSocket, WifiLink,
};
pub use error::{
    ChecklistError, ConfigError, DriverError, NtripError, ProvisionError, SendError,
};
pub use mailbox::{Mailbox, Wait};
pub use router::{CorrectionRouter, Discriminator, RouterStatus};
pub use selector::RegionSelector;
pub use stream::{StreamReader, StreamWriter};
pub use transport::TransportContext;
pub use transport::cellular::{CellularState, CellularTransport};
pub use transport::wifi::{WifiState, WifiTransport};
