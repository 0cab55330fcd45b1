// src/lib.rs

pub mod analysis;
pub mod color_analysis;
pub mod config;
pub mod dispatcher;
pub mod interface;
pub mod pipeline;
pub mod session;
pub mod types;

pub use analysis::{FrameOutput, FramePipeline, GroupOutcome};
pub use dispatcher::{DispatchOutcome, GroupDispatcher};
pub use types::{ColorObservation, Config, CubeColor, FrameInput};
