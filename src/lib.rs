//! Streaming MPEG-TS descrambler pipe.
//!
//! Consumes 188-byte Transport Stream packets (and interleaved flow-def
//! control records), selectively decrypts scrambled payloads according to
//! the per-packet scrambling-control bits and an installed even/odd key
//! register, and re-emits cleartext packets in input order. Three cipher
//! backends are supported — classical DVB-CSA, bit-sliced batched DVB-CSA,
//! and AES-128-CBC with the fixed BISS-2 "CISSA" IV — selected
//! automatically from the shape of the installed control word.
//!
//! The streaming framework that owns this pipe (lifecycle, reference
//! counting, event probes, memory pools, event-loop integration), PID-filter
//! storage, and control-word string parsing are all treated as external
//! collaborators; see [`pid::PidSet`], [`sink::Sink`], and
//! [`timer::DeadlineTimer`] for the narrow contracts this crate expects from
//! its embedder.
//!
//! # Example
//!
//! ```
//! use mpegts_descrambler::core::{ControlOp, Descrambler};
//! use mpegts_descrambler::pid::HashPidSet;
//! use mpegts_descrambler::sink::RecordingSink;
//!
//! let mut descrambler = Descrambler::new(RecordingSink::new(), HashPidSet::new(), None);
//! descrambler.control(ControlOp::AddPid(0x100)).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod cipher;
pub mod core;
pub mod error;
pub mod header;
pub mod hold_queue;
pub mod key;
pub mod packet;
pub mod pid;
pub mod sink;
pub mod timer;

pub use crate::core::{ControlOp, Descrambler};
pub use crate::error::ControlError;
pub use crate::key::Parity;
pub use crate::packet::{ControlRecord, FlowDef, InputItem, Packet};
