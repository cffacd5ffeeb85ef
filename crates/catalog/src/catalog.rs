//! Immutable fingerprint catalog.
//!
//! Built once per run from already-compiled fingerprints and never mutated
//! afterward, which is what lets the match engine run concurrently across
//! sessions without synchronization.

use std::collections::HashMap;

use remora_common::{RemoraError, RemoraResult, Transport};

use crate::model::{ByteTest, Fingerprint, Offset};

/// Owning, lookup-indexed collection of fingerprints for one analysis run.
///
/// Iteration order is load order, which makes match tie-breaking (and
/// therefore the whole run) reproducible for a given catalog directory.
#[derive(Debug, Default)]
pub struct FingerprintCatalog {
    fingerprints: Vec<Fingerprint>,
    by_id: HashMap<String, usize>,
    by_category: HashMap<String, Vec<usize>>,
}

impl FingerprintCatalog {
    /// Validate and index a set of fingerprints.
    ///
    /// Fails with `DuplicateFingerprintId` when two definitions share an id
    /// and `MalformedFingerprint` on structural problems: zero sequences, an
    /// empty sequence, a sequence opening with a relative offset, or a test
    /// with contradictory operands. A partially invalid catalog is rejected
    /// outright; matching correctness cannot be guaranteed against one.
    pub fn from_fingerprints(fingerprints: Vec<Fingerprint>) -> RemoraResult<Self> {
        let mut by_id = HashMap::with_capacity(fingerprints.len());
        let mut by_category: HashMap<String, Vec<usize>> = HashMap::new();

        for (idx, fp) in fingerprints.iter().enumerate() {
            validate(fp)?;
            if by_id.insert(fp.id.clone(), idx).is_some() {
                return Err(RemoraError::DuplicateFingerprintId(fp.id.clone()));
            }
            by_category.entry(fp.category.clone()).or_default().push(idx);
        }

        Ok(Self {
            fingerprints,
            by_id,
            by_category,
        })
    }

    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<&Fingerprint> {
        self.by_id.get(id).map(|&idx| &self.fingerprints[idx])
    }

    /// All fingerprints in a category, in load order.
    pub fn all_by_category(&self, category: &str) -> impl Iterator<Item = &Fingerprint> {
        self.by_category
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .map(|&idx| &self.fingerprints[idx])
    }

    /// Fingerprints applicable to a session of the given transport: those
    /// scoped to exactly that transport plus the unscoped ones, load order.
    pub fn scoped(&self, transport: Option<Transport>) -> impl Iterator<Item = &Fingerprint> {
        self.fingerprints
            .iter()
            .filter(move |fp| fp.transport.is_none() || fp.transport == transport)
    }

    /// Position in load order, used as the final deterministic tie-break.
    #[must_use]
    pub fn load_order(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fingerprint> {
        self.fingerprints.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}

fn validate(fp: &Fingerprint) -> RemoraResult<()> {
    let malformed = |reason: &str| RemoraError::MalformedFingerprint {
        name: fp.id.clone(),
        reason: reason.to_string(),
    };

    if fp.id.is_empty() {
        return Err(malformed("empty id"));
    }
    if fp.sequences.is_empty() {
        return Err(malformed("no rule sequences"));
    }
    for seq in &fp.sequences {
        if seq.rules.is_empty() {
            return Err(malformed("empty rule sequence"));
        }
        if matches!(seq.rules[0].offset, Offset::FromPrevious(_)) {
            return Err(malformed("first rule in a sequence cannot be offset-relative"));
        }
        for rule in &seq.rules {
            match &rule.test {
                ByteTest::Equals(v) if v.is_empty() => {
                    return Err(malformed("equals test with empty operand"));
                }
                ByteTest::Masked { value, mask } => {
                    if value.is_empty() {
                        return Err(malformed("masked test with empty operand"));
                    }
                    if value.len() != mask.len() {
                        return Err(malformed("mask length does not match value length"));
                    }
                }
                ByteTest::Range { width, min, max } => {
                    if *width == 0 || *width > 8 {
                        return Err(malformed("range width must be 1..=8 bytes"));
                    }
                    if min > max {
                        return Err(malformed("range min exceeds max"));
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Rule, RuleSequence};

    fn fp(id: &str, category: &str) -> Fingerprint {
        Fingerprint {
            id: id.to_string(),
            label: id.to_uppercase(),
            category: category.to_string(),
            confidence: 5,
            transport: Some(Transport::Tcp),
            identifies: Default::default(),
            sequences: vec![RuleSequence {
                rules: vec![Rule {
                    offset: Offset::Absolute(0),
                    test: ByteTest::Equals(vec![0x01]),
                }],
            }],
        }
    }

    #[test]
    fn lookup_and_category_index() {
        let catalog =
            FingerprintCatalog::from_fingerprints(vec![fp("a", "ics"), fp("b", "web")]).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.lookup("a").unwrap().label, "A");
        assert!(catalog.lookup("missing").is_none());
        let ics: Vec<_> = catalog.all_by_category("ics").map(|f| f.id.as_str()).collect();
        assert_eq!(ics, ["a"]);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let err = FingerprintCatalog::from_fingerprints(vec![fp("a", "x"), fp("a", "y")])
            .unwrap_err();
        assert!(matches!(err, RemoraError::DuplicateFingerprintId(id) if id == "a"));
    }

    #[test]
    fn zero_sequences_rejected() {
        let mut bad = fp("a", "x");
        bad.sequences.clear();
        let err = FingerprintCatalog::from_fingerprints(vec![bad]).unwrap_err();
        assert!(matches!(err, RemoraError::MalformedFingerprint { .. }));
    }

    #[test]
    fn leading_relative_offset_rejected() {
        let mut bad = fp("a", "x");
        bad.sequences[0].rules[0].offset = Offset::FromPrevious(2);
        assert!(FingerprintCatalog::from_fingerprints(vec![bad]).is_err());
    }

    #[test]
    fn mask_length_mismatch_rejected() {
        let mut bad = fp("a", "x");
        bad.sequences[0].rules[0].test = ByteTest::Masked {
            value: vec![0x01, 0x02],
            mask: vec![0xff],
        };
        assert!(FingerprintCatalog::from_fingerprints(vec![bad]).is_err());
    }

    #[test]
    fn scoped_includes_unscoped_fingerprints() {
        let mut any = fp("any", "x");
        any.transport = None;
        let mut udp = fp("udp", "x");
        udp.transport = Some(Transport::Udp);
        let catalog =
            FingerprintCatalog::from_fingerprints(vec![fp("tcp", "x"), udp, any]).unwrap();

        let tcp_scoped: Vec<_> = catalog
            .scoped(Some(Transport::Tcp))
            .map(|f| f.id.as_str())
            .collect();
        assert_eq!(tcp_scoped, ["tcp", "any"]);
    }
}
