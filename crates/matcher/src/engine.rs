//! Fingerprint match engine.
//!
//! A pure function of (session, catalog): no internal state, so sessions can
//! be matched on independent worker tasks against one shared catalog. All
//! byte tests operate on slice views into the session's packet payloads;
//! nothing is copied.
//!
//! Offset chaining is threaded through evaluation as an explicit cursor
//! (packet index + end of the previous rule's match) rather than hidden
//! matcher state, and absolute-offset rules may resolve in the cursor's
//! packet or any later one, searched in order with backtracking so that a
//! greedy early choice cannot mask a valid assignment.

use tracing::trace;

use remora_catalog::model::{Offset, Rule, RuleSequence};
use remora_catalog::{Fingerprint, FingerprintCatalog, RoleHint};
use remora_common::{EndpointRole, MatchResult, Session, SessionPacket};

/// Evaluate every applicable fingerprint against a session.
///
/// Per fingerprint, sequences are tried in declaration order and the first
/// success wins (short-circuit); distinct fingerprints match independently,
/// so one session can legitimately carry several identities. Results are
/// ordered for determinism: declared confidence descending, then bytes of
/// matched evidence descending, then catalog load order.
#[must_use]
pub fn match_session(session: &Session, catalog: &FingerprintCatalog) -> Vec<MatchResult> {
    let mut results: Vec<MatchResult> = Vec::new();

    for fp in catalog.scoped(session.transport()) {
        if let Some(result) = match_fingerprint(session, fp) {
            trace!(
                session = %session.id,
                fingerprint = %result.fingerprint_id,
                sequence = result.sequence_index,
                bytes = result.bytes_matched,
                "fingerprint matched"
            );
            results.push(result);
        }
    }

    results.sort_by(|a, b| {
        b.confidence
            .cmp(&a.confidence)
            .then(b.bytes_matched.cmp(&a.bytes_matched))
            .then_with(|| {
                let oa = catalog.load_order(&a.fingerprint_id);
                let ob = catalog.load_order(&b.fingerprint_id);
                oa.cmp(&ob)
            })
    });
    results
}

fn match_fingerprint(session: &Session, fp: &Fingerprint) -> Option<MatchResult> {
    for (idx, seq) in fp.sequences.iter().enumerate() {
        if let Some(hit) = eval_sequence(&session.packets, seq) {
            let sender = if session.packets[hit.first_packet].from_initiator {
                EndpointRole::Initiator
            } else {
                EndpointRole::Responder
            };
            let role = match fp.identifies {
                RoleHint::Sender => sender,
                RoleHint::Receiver => sender.other(),
            };
            return Some(MatchResult {
                fingerprint_id: fp.id.clone(),
                label: fp.label.clone(),
                category: fp.category.clone(),
                confidence: fp.confidence,
                role: Some(role),
                sequence_index: idx,
                bytes_matched: hit.bytes,
            });
        }
    }
    None
}

/// Where evaluation of a sequence currently stands: the packet the previous
/// rule matched in and the offset just past its match.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    packet: usize,
    end: usize,
}

struct SequenceHit {
    /// Total payload bytes consumed by all rules.
    bytes: usize,
    /// Packet where the first rule matched; determines the sending endpoint.
    first_packet: usize,
}

fn eval_sequence(packets: &[SessionPacket], seq: &RuleSequence) -> Option<SequenceHit> {
    eval_from(packets, &seq.rules, None, 0, None)
}

/// Depth-first evaluation of `rules` with backtracking over the packets an
/// absolute-offset rule may anchor in. Relative rules are fully determined
/// by the cursor and never branch.
fn eval_from(
    packets: &[SessionPacket],
    rules: &[Rule],
    cursor: Option<Cursor>,
    bytes: usize,
    first_packet: Option<usize>,
) -> Option<SequenceHit> {
    let Some((rule, rest)) = rules.split_first() else {
        return first_packet.map(|first| SequenceHit {
            bytes,
            first_packet: first,
        });
    };

    match rule.offset {
        Offset::Absolute(off) => {
            let start = cursor.map_or(0, |c| c.packet);
            for (pkt_idx, sp) in packets.iter().enumerate().skip(start) {
                let Some(consumed) = rule.test.eval(&sp.packet.payload, off) else {
                    continue;
                };
                let next = Cursor {
                    packet: pkt_idx,
                    end: off + consumed,
                };
                let hit = eval_from(
                    packets,
                    rest,
                    Some(next),
                    bytes + consumed,
                    first_packet.or(Some(pkt_idx)),
                );
                if hit.is_some() {
                    return hit;
                }
            }
            None
        }
        Offset::FromPrevious(delta) => {
            let cursor = cursor?;
            let pos = isize::try_from(cursor.end).ok()?.checked_add(delta)?;
            let pos = usize::try_from(pos).ok()?;
            let payload = &packets[cursor.packet].packet.payload;
            let consumed = rule.test.eval(payload, pos)?;
            let next = Cursor {
                packet: cursor.packet,
                end: pos + consumed,
            };
            eval_from(packets, rest, Some(next), bytes + consumed, first_packet)
        }
    }
}
