//! Audio frame types, frame classification, pre-roll, and playback egress.

pub mod classifier;
pub mod egress;
pub mod frame;
pub mod pre_roll;
