//! Compiled fingerprint model.
//!
//! A fingerprint identifies a protocol or device family from byte patterns
//! in session payloads. Each fingerprint carries one or more rule sequences:
//! alternatives are ORed (any sequence matching is enough), rules inside a
//! sequence are ANDed and evaluated in declaration order because later rules
//! may chain their offsets to the previous rule's match position.

use regex::bytes::Regex;
use remora_common::Transport;

/// Where a rule's byte test is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offset {
    /// Fixed offset from the start of a packet's payload.
    Absolute(usize),
    /// Offset from the end of the previous rule's match, same packet.
    /// Negative deltas re-inspect already-consumed bytes.
    FromPrevious(isize),
}

/// The comparison a rule performs at its resolved offset.
#[derive(Debug, Clone)]
pub enum ByteTest {
    /// Exact byte equality.
    Equals(Vec<u8>),
    /// Equality only on the bits set in the mask.
    Masked { value: Vec<u8>, mask: Vec<u8> },
    /// Big-endian unsigned integer of `width` bytes within `[min, max]`.
    Range { width: usize, min: u64, max: u64 },
    /// Byte-oriented regex, anchored at the resolved offset.
    Pattern(Regex),
}

impl ByteTest {
    /// Fixed number of bytes this test consumes, when knowable up front.
    /// Pattern matches consume whatever the regex matched.
    #[must_use]
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            ByteTest::Equals(v) => Some(v.len()),
            ByteTest::Masked { value, .. } => Some(value.len()),
            ByteTest::Range { width, .. } => Some(*width),
            ByteTest::Pattern(_) => None,
        }
    }

    /// Evaluate against `payload` at `offset`. Returns the number of bytes
    /// consumed on success.
    #[must_use]
    pub fn eval(&self, payload: &[u8], offset: usize) -> Option<usize> {
        let window = payload.get(offset..)?;
        match self {
            ByteTest::Equals(expected) => {
                let got = window.get(..expected.len())?;
                (got == expected.as_slice()).then_some(expected.len())
            }
            ByteTest::Masked { value, mask } => {
                let got = window.get(..value.len())?;
                let ok = got
                    .iter()
                    .zip(value.iter().zip(mask.iter()))
                    .all(|(g, (v, m))| g & m == v & m);
                ok.then_some(value.len())
            }
            ByteTest::Range { width, min, max } => {
                let got = window.get(..*width)?;
                let mut n: u64 = 0;
                for b in got {
                    n = (n << 8) | u64::from(*b);
                }
                (*min <= n && n <= *max).then_some(*width)
            }
            ByteTest::Pattern(re) => {
                let m = re.find(window)?;
                // Anchored semantics: the match must start where the rule
                // resolved, not merely somewhere after it.
                (m.start() == 0).then_some(m.end())
            }
        }
    }
}

/// One byte-pattern test with its anchor.
#[derive(Debug, Clone)]
pub struct Rule {
    pub offset: Offset,
    pub test: ByteTest,
}

/// An ordered conjunction of rules. Order is significant: `FromPrevious`
/// offsets resolve against the preceding rule's match.
#[derive(Debug, Clone)]
pub struct RuleSequence {
    pub rules: Vec<Rule>,
}

/// Which endpoint a successful match identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoleHint {
    /// The endpoint that sent the packet where the sequence's first rule
    /// matched (e.g. a request-line fingerprint identifies the client).
    #[default]
    Sender,
    /// The other endpoint (e.g. a banner fingerprint sent by a server
    /// identifies the server even when evaluated against the receiver).
    Receiver,
}

/// A compiled fingerprint definition.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub id: String,
    /// Human-readable identity ("HTTP", "Siemens S7 PLC", ...).
    pub label: String,
    /// Protocol or device family grouping.
    pub category: String,
    /// Declared priority for tie-breaking; higher wins.
    pub confidence: u8,
    /// Restrict matching to sessions of this transport. `None` = any.
    pub transport: Option<Transport>,
    pub identifies: RoleHint,
    /// Alternative ways to match this identity (logical OR).
    pub sequences: Vec<RuleSequence>,
}
