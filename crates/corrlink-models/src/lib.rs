#![deny(missing_docs)]

//! # corrlink models
//!
//! Data types shared by every part of the corrlink correction relay.
//!
//! ## Data flow
//!
//! ```text
//! transport (MQTT / NTRIP) ──▶ Message{source, content} ──▶ Mailbox ──▶ router
//!                                                                      │
//!                                        FrameDetector ◀───────────────┘
//! ```
//!
//! ## Module layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`message`] | Move-only [`Message`] buffers, [`Source`], [`Content`] |
//! | [`frame`] | [`FrameDetector`] contract and the default protocol detector |
//! | [`topics`] | MQTT topic hierarchy and classification |
//! | [`region`] | Correction service regions |
//! | [`frequency`] | L-band frequency table payload |
//! | [`provisioning`] | ZTP request/response and the durable identity |
//! | [`nmea`] | GGA sentence build and parse |

pub mod error;
pub mod frame;
pub mod frequency;
pub mod message;
pub mod nmea;
pub mod provisioning;
pub mod region;
pub mod topics;

// Re-export all public types at crate root for convenience.
pub use error::*;
pub use frame::*;
pub use frequency::*;
pub use message::*;
pub use nmea::*;
pub use provisioning::*;
pub use region::*;
pub use topics::*;
