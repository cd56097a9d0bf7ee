//! Staged-forward pipeline: scratch acquisition, regroup and fan-out,
//! reclamation.

mod batch;
mod distributor;
mod pipeline;
mod scratch;

pub use batch::{rebatch, split_unit, BatchType, SendBatch};
pub use distributor::{BatchSendResult, TargetDistributor};
pub use pipeline::{PipelineState, RunVerdict, SessionForwardResult, StagedPipeline};
pub use scratch::{ScratchHandle, ScratchLedger, ScratchUnit};
