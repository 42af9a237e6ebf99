//! JT/T 808 wire codec.
//!
//! Everything that touches raw protocol bytes lives here: framing with
//! escape sequences and the XOR checksum, the bit-packed message header,
//! the per-message-ID body codec table, the configuration-parameter codec
//! table, and the alarm-attachment codecs carried inside position reports.
//!
//! The crate is I/O-free. Transports hand complete flag-delimited frames
//! to [`Packet::decode`] and write the bytes [`Packet::encode`] returns;
//! session and dispatch logic live in `roadlink-core` and
//! `roadlink-server`.
//!
//! # Editions
//!
//! The 2013 and 2019 protocol editions are served concurrently. The header
//! carries a version-sign bit selecting the layout; version-dependent body
//! fields (registration, authentication) take the edition explicitly.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod body;
pub mod codec;
mod error;
pub mod framing;
mod header;
pub mod location;
pub mod params;
mod packet;

pub use body::{
    Ack, AckResult, Authenticate, Body, MSG_AUTHENTICATE, MSG_DEREGISTER, MSG_HEARTBEAT,
    MSG_LOCATION, MSG_PARAMS_REPLY, MSG_PLATFORM_ACK, MSG_QUERY_PARAMS, MSG_REGISTER,
    MSG_REGISTER_ACK, MSG_SET_PARAMS, MSG_TERMINAL_ACK, ParamsReply, Register, RegisterAck,
};
pub use error::{ProtocolError, Result};
pub use header::{BodyAttr, Encryption, Fragment, Header, Version};
pub use location::{
    AdasAlarm, AlarmIdentity, AlarmPosition, Attachment, BsdAlarm, CarState, DsmAlarm, Location,
    TpmsAlarm,
};
pub use packet::Packet;
pub use params::{DsmSettings, Param, ParamValue, ParameterSet};
