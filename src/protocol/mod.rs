//! Wire-level protocol handling.
//!
//! Pure state machines with no I/O; the BLE layer feeds them and the
//! session controller consumes what they emit.

pub mod reassembler;

pub use reassembler::{CompletedFrame, FrameReassembler, FRAME_TERMINATOR};
