//! Tag operation sequencer
//!
//! Validates caller-built sequences, assigns sequence and op identifiers,
//! submits them to the reader and maps op completions back to the sequence
//! that issued them.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info, warn};

use super::model::{
    OpId, OpTally, RawOpResult, SequenceId, SubmittedSequence, TagOp, TagOpReport, TagOpResult,
    TagOpSequence,
};
use crate::error::SubmitError;
use crate::reader::ReaderSession;

/// Authenticate challenges are exactly 48 bits
pub const CHALLENGE_BITS: usize = 48;

/// Check that every op carries what the reader needs to run it
pub fn validate(sequence: &TagOpSequence) -> Result<(), SubmitError> {
    if sequence.ops.is_empty() {
        return Err(SubmitError::EmptySequence);
    }

    for (op_index, op) in sequence.ops.iter().enumerate() {
        let name = op.name();
        let missing = |field: &'static str| SubmitError::MissingRequiredField {
            op_index,
            op: name,
            field,
        };
        let invalid = |field: &'static str, reason: String| SubmitError::InvalidField {
            op_index,
            op: name,
            field,
            reason,
        };

        match op {
            TagOp::Read { word_count, .. } => {
                if *word_count == 0 {
                    return Err(invalid("word_count", "must read at least one word".into()));
                }
            },
            TagOp::Write { data, .. } => match data {
                None => return Err(missing("data")),
                Some(d) if d.is_empty() => {
                    return Err(invalid("data", "write payload is empty".into()))
                },
                Some(_) => {},
            },
            TagOp::Lock { .. } => {},
            TagOp::Kill { kill_password } => match kill_password {
                None => return Err(missing("kill_password")),
                Some(0) => {
                    return Err(invalid(
                        "kill_password",
                        "a zero kill password cannot kill a tag".into(),
                    ))
                },
                Some(_) => {},
            },
            TagOp::Authenticate { challenge, .. } => match challenge {
                None => return Err(missing("challenge")),
                Some(c) if c.bit_len() != CHALLENGE_BITS => {
                    return Err(invalid(
                        "challenge",
                        format!("expected {} bits, got {}", CHALLENGE_BITS, c.bit_len()),
                    ))
                },
                Some(_) => {},
            },
        }
    }

    if let Some(target) = &sequence.target {
        if target.data.is_empty() {
            return Err(SubmitError::InvalidTarget("match data is empty".into()));
        }
    }

    Ok(())
}

/// Validate and submit a sequence; results arrive as `TagOpComplete` events
pub async fn submit(
    session: &ReaderSession,
    sequence: TagOpSequence,
) -> Result<SequenceId, SubmitError> {
    validate(&sequence)?;
    session.ensure_connected()?;

    let registry = session.sequences();
    let submitted = registry.allocate(sequence);
    let id = submitted.id;

    let result = session
        .guarded(async {
            let _serial = session.serialize().await;
            // Registered first so completions racing the acknowledgment correlate
            registry.register(&submitted);
            session
                .transport()
                .submit_op_sequence(&submitted)
                .await
                .map_err(SubmitError::from)
        })
        .await;

    if let Err(e) = result {
        registry.remove(id);
        warn!("Op sequence {} not submitted to {}: {}", id, session.address(), e);
        return Err(e);
    }

    info!(
        "🏷️  Submitted {} ({} ops) to {}",
        id,
        submitted.ops.len(),
        session.address()
    );
    Ok(id)
}

/// Remove an outstanding sequence from the reader
pub async fn delete(session: &ReaderSession, id: SequenceId) -> Result<(), SubmitError> {
    session.ensure_connected()?;
    if !session.sequences().contains(id) {
        return Err(SubmitError::Rejected(format!("unknown op sequence {}", id)));
    }

    session
        .guarded(async {
            let _serial = session.serialize().await;
            session
                .transport()
                .delete_op_sequence(id)
                .await
                .map_err(SubmitError::from)
        })
        .await?;

    session.sequences().remove(id);
    debug!("Deleted {} from {}", id, session.address());
    Ok(())
}

/// Sequences submitted on this session and not yet deleted
pub fn outstanding(session: &ReaderSession) -> Vec<SequenceId> {
    session.sequences().outstanding()
}

/// Success/failure counts gathered from completions so far
pub fn tally(session: &ReaderSession, id: SequenceId) -> Option<OpTally> {
    session.sequences().tally(id)
}

#[derive(Default)]
struct RegistryInner {
    sequences: BTreeMap<SequenceId, OpTally>,
    op_owner: HashMap<OpId, SequenceId>,
}

/// Per-session bookkeeping of submitted sequences
#[derive(Default)]
pub(crate) struct SequenceRegistry {
    next_sequence: AtomicU32,
    next_op: AtomicU32,
    inner: Mutex<RegistryInner>,
}

impl SequenceRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Assign a sequence id and session-unique op ids
    pub(crate) fn allocate(&self, sequence: TagOpSequence) -> SubmittedSequence {
        let id = SequenceId(self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1);
        let ops = sequence
            .ops
            .into_iter()
            .map(|op| (OpId(self.next_op.fetch_add(1, Ordering::Relaxed) + 1), op))
            .collect();
        SubmittedSequence {
            id,
            ops,
            target: sequence.target,
        }
    }

    pub(crate) fn register(&self, sequence: &SubmittedSequence) {
        let mut inner = self.inner.lock();
        inner.sequences.insert(sequence.id, OpTally::default());
        for (op_id, _) in &sequence.ops {
            inner.op_owner.insert(*op_id, sequence.id);
        }
    }

    pub(crate) fn remove(&self, id: SequenceId) -> bool {
        let mut inner = self.inner.lock();
        inner.op_owner.retain(|_, owner| *owner != id);
        inner.sequences.remove(&id).is_some()
    }

    pub(crate) fn contains(&self, id: SequenceId) -> bool {
        self.inner.lock().sequences.contains_key(&id)
    }

    pub(crate) fn outstanding(&self) -> Vec<SequenceId> {
        self.inner.lock().sequences.keys().copied().collect()
    }

    pub(crate) fn tally(&self, id: SequenceId) -> Option<OpTally> {
        self.inner.lock().sequences.get(&id).copied()
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.sequences.clear();
        inner.op_owner.clear();
    }

    /// Attach sequence ids to raw completions and update tallies
    pub(crate) fn correlate(&self, raw: Vec<RawOpResult>) -> TagOpReport {
        let mut inner = self.inner.lock();
        let mut results = Vec::with_capacity(raw.len());

        for r in raw {
            let Some(&sequence_id) = inner.op_owner.get(&r.op_id) else {
                warn!(op = %r.op_id, epc = %r.epc, "Skipping result for unknown op");
                continue;
            };
            if let Some(tally) = inner.sequences.get_mut(&sequence_id) {
                if r.outcome.result().is_success() {
                    tally.succeeded += 1;
                } else {
                    tally.failed += 1;
                }
            }
            results.push(TagOpResult {
                sequence_id,
                op_id: r.op_id,
                epc: r.epc,
                outcome: r.outcome,
            });
        }

        TagOpReport { results }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::model::{AccessResult, MemoryBank, OpOutcome, TargetTag};
    use crate::tags::TagData;

    fn hex(s: &str) -> TagData {
        TagData::from_hex(s).unwrap()
    }

    fn read_result(op_id: OpId, epc: &str, result: AccessResult) -> RawOpResult {
        RawOpResult {
            op_id,
            epc: hex(epc),
            outcome: OpOutcome::Read {
                result,
                data: TagData::default(),
            },
        }
    }

    #[test]
    fn test_authenticate_without_challenge_missing() {
        let sequence = TagOpSequence::new().with_op(TagOp::Authenticate {
            challenge: None,
            include_tid_in_reply: true,
        });
        assert_eq!(
            validate(&sequence),
            Err(SubmitError::MissingRequiredField {
                op_index: 0,
                op: "authenticate",
                field: "challenge",
            })
        );
    }

    #[test]
    fn test_challenge_must_be_48_bits() {
        let sequence = TagOpSequence::new().with_op(TagOp::authenticate(hex("A1B1C1D1")));
        let err = validate(&sequence).unwrap_err();
        assert_eq!(err.kind(), "invalid_field");

        let ok = TagOpSequence::new().with_op(TagOp::authenticate(hex("A1B1C1D1E1F1")));
        assert!(validate(&ok).is_ok());
    }

    #[test]
    fn test_write_and_kill_required_fields() {
        let write = TagOpSequence::new()
            .with_op(TagOp::read(MemoryBank::User, 0, 1))
            .with_op(TagOp::Write {
                memory_bank: MemoryBank::User,
                word_pointer: 0,
                data: None,
                access_password: None,
            });
        assert!(matches!(
            validate(&write),
            Err(SubmitError::MissingRequiredField { op_index: 1, field: "data", .. })
        ));

        let kill = TagOpSequence::new().with_op(TagOp::Kill { kill_password: None });
        assert!(matches!(
            validate(&kill),
            Err(SubmitError::MissingRequiredField { field: "kill_password", .. })
        ));
    }

    #[test]
    fn test_empty_sequence_and_target() {
        assert_eq!(validate(&TagOpSequence::new()), Err(SubmitError::EmptySequence));

        let sequence = TagOpSequence::new()
            .with_op(TagOp::read(MemoryBank::Tid, 0, 2))
            .with_target(TargetTag::epc(TagData::default()));
        assert_eq!(validate(&sequence).unwrap_err().kind(), "invalid_target");
    }

    #[test]
    fn test_op_ids_unique_across_sequences() {
        let registry = SequenceRegistry::new();
        let two_reads = TagOpSequence::new()
            .with_op(TagOp::read(MemoryBank::Tid, 0, 2))
            .with_op(TagOp::read(MemoryBank::User, 0, 2));

        let a = registry.allocate(two_reads.clone());
        let b = registry.allocate(two_reads);

        assert_ne!(a.id, b.id);
        let a_ops: Vec<_> = a.ops.iter().map(|(id, _)| *id).collect();
        assert!(b.ops.iter().all(|(id, _)| !a_ops.contains(id)));
    }

    #[test]
    fn test_out_of_order_results_correlate_to_owner() {
        let registry = SequenceRegistry::new();
        let a = registry.allocate(TagOpSequence::new().with_op(TagOp::read(MemoryBank::Tid, 0, 2)));
        let b = registry.allocate(TagOpSequence::new().with_op(TagOp::read(MemoryBank::Tid, 0, 2)));
        registry.register(&a);
        registry.register(&b);

        let report = registry.correlate(vec![
            read_result(b.ops[0].0, "BB", AccessResult::Success),
            read_result(a.ops[0].0, "AA", AccessResult::NoResponseFromTag),
        ]);

        assert_eq!(report.results[0].sequence_id, b.id);
        assert_eq!(report.results[0].epc, hex("BB"));
        assert_eq!(report.results[1].sequence_id, a.id);

        assert_eq!(registry.tally(a.id), Some(OpTally { succeeded: 0, failed: 1 }));
        assert_eq!(registry.tally(b.id), Some(OpTally { succeeded: 1, failed: 0 }));
    }

    #[test]
    fn test_unknown_op_skipped() {
        let registry = SequenceRegistry::new();
        let a = registry.allocate(TagOpSequence::new().with_op(TagOp::read(MemoryBank::Tid, 0, 2)));
        registry.register(&a);
        registry.remove(a.id);

        let report = registry.correlate(vec![read_result(a.ops[0].0, "AA", AccessResult::Success)]);
        assert!(report.results.is_empty());
        assert!(registry.outstanding().is_empty());
    }
}
