//! Tag operation sequences: building, submission and result correlation

pub mod model;
pub mod sequencer;

pub use model::{
    AccessResult, LockMemory, LockState, MemoryBank, OpId, OpOutcome, OpTally, RawOpResult,
    SequenceId, SubmittedSequence, TagOp, TagOpReport, TagOpResult, TagOpSequence, TargetTag,
};
pub use sequencer::{delete, outstanding, submit, tally, validate};
pub(crate) use sequencer::SequenceRegistry;
