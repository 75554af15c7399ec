//! Tag operation sequences and their results

use crate::tags::TagData;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned to a submitted sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceId(pub u32);

/// Identifier assigned to one op, unique within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(pub u32);

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq#{}", self.0)
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBank {
    Reserved,
    Epc,
    Tid,
    User,
}

impl MemoryBank {
    /// Bit offset where the EPC starts inside the EPC bank (after CRC and PC)
    pub const EPC_BIT_POINTER: u16 = 0x20;
}

/// Restricts a sequence to tags whose memory matches `data` at `bit_pointer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTag {
    pub memory_bank: MemoryBank,
    pub bit_pointer: u16,
    pub data: TagData,
}

impl TargetTag {
    /// Match tags by EPC prefix
    pub fn epc(data: TagData) -> Self {
        Self {
            memory_bank: MemoryBank::Epc,
            bit_pointer: MemoryBank::EPC_BIT_POINTER,
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMemory {
    KillPassword,
    AccessPassword,
    Epc,
    Tid,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    Unlock,
    Lock,
    Permaunlock,
    Permalock,
}

/// One operation against a singulated tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TagOp {
    Read {
        memory_bank: MemoryBank,
        word_pointer: u16,
        word_count: u16,
        access_password: Option<u32>,
    },
    Write {
        memory_bank: MemoryBank,
        word_pointer: u16,
        data: Option<TagData>,
        access_password: Option<u32>,
    },
    Lock {
        memory: LockMemory,
        state: LockState,
        access_password: Option<u32>,
    },
    Kill {
        kill_password: Option<u32>,
    },
    /// Impinj Authenticate: the tag encrypts a 48-bit challenge
    Authenticate {
        challenge: Option<TagData>,
        include_tid_in_reply: bool,
    },
}

impl TagOp {
    pub fn name(&self) -> &'static str {
        match self {
            TagOp::Read { .. } => "read",
            TagOp::Write { .. } => "write",
            TagOp::Lock { .. } => "lock",
            TagOp::Kill { .. } => "kill",
            TagOp::Authenticate { .. } => "authenticate",
        }
    }

    pub fn read(memory_bank: MemoryBank, word_pointer: u16, word_count: u16) -> Self {
        TagOp::Read {
            memory_bank,
            word_pointer,
            word_count,
            access_password: None,
        }
    }

    pub fn write(memory_bank: MemoryBank, word_pointer: u16, data: TagData) -> Self {
        TagOp::Write {
            memory_bank,
            word_pointer,
            data: Some(data),
            access_password: None,
        }
    }

    pub fn authenticate(challenge: TagData) -> Self {
        TagOp::Authenticate {
            challenge: Some(challenge),
            include_tid_in_reply: true,
        }
    }
}

/// Ordered operations plus an optional tag filter, built by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagOpSequence {
    pub ops: Vec<TagOp>,
    pub target: Option<TargetTag>,
}

impl TagOpSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_op(mut self, op: TagOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn with_target(mut self, target: TargetTag) -> Self {
        self.target = Some(target);
        self
    }
}

/// A sequence as handed to the transport, with identifiers assigned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedSequence {
    pub id: SequenceId,
    pub ops: Vec<(OpId, TagOp)>,
    pub target: Option<TargetTag>,
}

/// Gen2 access status for one op
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessResult {
    Success,
    NoResponseFromTag,
    InsufficientPower,
    TagMemoryLocked,
    TagMemoryOverrun,
    IncorrectPassword,
    NonspecificTagError,
    NonspecificReaderError,
}

impl AccessResult {
    pub fn is_success(self) -> bool {
        self == AccessResult::Success
    }
}

/// Per-kind result payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpOutcome {
    Read {
        result: AccessResult,
        data: TagData,
    },
    Write {
        result: AccessResult,
        words_written: u16,
    },
    Lock {
        result: AccessResult,
    },
    Kill {
        result: AccessResult,
    },
    Authenticate {
        result: AccessResult,
        challenge: TagData,
        response_cipher: TagData,
        response_tid: Option<TagData>,
    },
}

impl OpOutcome {
    pub fn result(&self) -> AccessResult {
        match self {
            OpOutcome::Read { result, .. }
            | OpOutcome::Write { result, .. }
            | OpOutcome::Lock { result }
            | OpOutcome::Kill { result }
            | OpOutcome::Authenticate { result, .. } => *result,
        }
    }
}

/// Completion as reported by the transport, identified only by op id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOpResult {
    pub op_id: OpId,
    pub epc: TagData,
    pub outcome: OpOutcome,
}

/// Completion correlated to the sequence that issued it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagOpResult {
    pub sequence_id: SequenceId,
    pub op_id: OpId,
    pub epc: TagData,
    pub outcome: OpOutcome,
}

/// Results from one completion batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagOpReport {
    pub results: Vec<TagOpResult>,
}

/// Running success/failure counts for a sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpTally {
    pub succeeded: u64,
    pub failed: u64,
}

impl OpTally {
    pub fn total(&self) -> u64 {
        self.succeeded + self.failed
    }
}
