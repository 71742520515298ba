//! # Transport Module
//!
//! Radio link between trackers and the collecting gateway.
//!
//! This module handles:
//! - Advertising data parsing and service filtering
//! - Connection slots and the per-link setup state machine
//! - The bounded hand-off queue from radio callbacks to the processing task
//! - Tracker and sink seams, plus an in-process loopback radio

pub mod advertising;
pub mod slots;
pub mod handoff;
pub mod link;
pub mod collector;
pub mod loopback;

pub use collector::{run_processor, Collector, RadioCentral, RadioEvent};
pub use handoff::{channel, FrameConsumer, FrameProducer, HandoffStats};
pub use link::{FrameLink, LogSink, RecordSink};
pub use loopback::{LoopbackAir, LoopbackCentral, LoopbackLink};
pub use slots::{PeerAddress, SlotId, SlotState};
