//! On-disk fingerprint definition loading.
//!
//! Definitions are JSON files, one fingerprint or an array of them per file.
//! Byte operands are hex strings (whitespace allowed), wildcard tests are
//! byte-oriented regexes. Any malformed file aborts the load: matching
//! against a partially loaded catalog would silently change results.
//!
//! ```json
//! {
//!   "id": "http-get",
//!   "label": "HTTP",
//!   "category": "protocol",
//!   "confidence": 5,
//!   "transport": "tcp",
//!   "sequences": [
//!     { "rules": [ { "at": 0, "ascii": "GET " } ] }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use remora_common::{RemoraError, RemoraResult, Transport};

use crate::catalog::FingerprintCatalog;
use crate::model::{ByteTest, Fingerprint, Offset, RoleHint, Rule, RuleSequence};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FileDef {
    One(FingerprintDef),
    Many(Vec<FingerprintDef>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FingerprintDef {
    id: String,
    label: String,
    category: String,
    #[serde(default = "default_confidence")]
    confidence: u8,
    #[serde(default)]
    transport: Option<String>,
    #[serde(default)]
    identifies: Option<String>,
    sequences: Vec<SequenceDef>,
}

fn default_confidence() -> u8 {
    3
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SequenceDef {
    rules: Vec<RuleDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDef {
    #[serde(default)]
    at: Option<usize>,
    #[serde(default)]
    from_previous: Option<isize>,
    #[serde(default)]
    equals: Option<String>,
    #[serde(default)]
    ascii: Option<String>,
    #[serde(default)]
    masked: Option<MaskedDef>,
    #[serde(default)]
    range: Option<RangeDef>,
    #[serde(default)]
    pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MaskedDef {
    value: String,
    mask: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RangeDef {
    width: usize,
    min: u64,
    max: u64,
}

/// Load every `*.json` definition in a directory into a validated catalog.
///
/// File names are sorted before loading so catalog order — and therefore
/// match tie-break order — does not depend on directory iteration order.
pub fn load_catalog(dir: &Path) -> RemoraResult<FingerprintCatalog> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut fingerprints = Vec::new();
    for path in &paths {
        debug!(path = %path.display(), "loading fingerprint definitions");
        fingerprints.extend(load_file(path)?);
    }
    FingerprintCatalog::from_fingerprints(fingerprints)
}

fn load_file(path: &Path) -> RemoraResult<Vec<Fingerprint>> {
    let text = fs::read_to_string(path)?;
    let name = path.display().to_string();
    parse_definitions(&text, &name)
}

/// Parse one definition file's contents.
pub fn parse_definitions(text: &str, source: &str) -> RemoraResult<Vec<Fingerprint>> {
    let parsed: FileDef =
        serde_json::from_str(text).map_err(|e| RemoraError::MalformedFingerprint {
            name: source.to_string(),
            reason: e.to_string(),
        })?;
    let defs = match parsed {
        FileDef::One(def) => vec![def],
        FileDef::Many(defs) => defs,
    };
    defs.into_iter().map(compile).collect()
}

fn compile(def: FingerprintDef) -> RemoraResult<Fingerprint> {
    let malformed = |reason: String| RemoraError::MalformedFingerprint {
        name: def.id.clone(),
        reason,
    };

    let transport = match def.transport.as_deref() {
        None => None,
        Some("tcp") => Some(Transport::Tcp),
        Some("udp") => Some(Transport::Udp),
        Some("icmp") => Some(Transport::Icmp),
        Some(other) => return Err(malformed(format!("unknown transport scope '{other}'"))),
    };

    let identifies = match def.identifies.as_deref() {
        None | Some("sender") => RoleHint::Sender,
        Some("receiver") => RoleHint::Receiver,
        Some(other) => return Err(malformed(format!("unknown role hint '{other}'"))),
    };

    let mut sequences = Vec::with_capacity(def.sequences.len());
    for seq in &def.sequences {
        let mut rules = Vec::with_capacity(seq.rules.len());
        for rule in &seq.rules {
            rules.push(compile_rule(rule).map_err(&malformed)?);
        }
        sequences.push(RuleSequence { rules });
    }

    Ok(Fingerprint {
        id: def.id,
        label: def.label,
        category: def.category,
        confidence: def.confidence,
        transport,
        identifies,
        sequences,
    })
}

fn compile_rule(def: &RuleDef) -> Result<Rule, String> {
    let offset = match (def.at, def.from_previous) {
        (Some(at), None) => Offset::Absolute(at),
        (None, Some(delta)) => Offset::FromPrevious(delta),
        (Some(_), Some(_)) => return Err("rule declares both 'at' and 'from_previous'".into()),
        (None, None) => return Err("rule declares no offset".into()),
    };

    let mut tests = Vec::new();
    if let Some(hex) = &def.equals {
        tests.push(ByteTest::Equals(parse_hex(hex)?));
    }
    if let Some(text) = &def.ascii {
        tests.push(ByteTest::Equals(text.as_bytes().to_vec()));
    }
    if let Some(m) = &def.masked {
        tests.push(ByteTest::Masked {
            value: parse_hex(&m.value)?,
            mask: parse_hex(&m.mask)?,
        });
    }
    if let Some(r) = &def.range {
        tests.push(ByteTest::Range {
            width: r.width,
            min: r.min,
            max: r.max,
        });
    }
    if let Some(p) = &def.pattern {
        let re = regex::bytes::RegexBuilder::new(p)
            .unicode(false)
            .build()
            .map_err(|e| format!("bad pattern: {e}"))?;
        tests.push(ByteTest::Pattern(re));
    }

    if tests.len() > 1 {
        return Err("rule declares more than one byte test".into());
    }
    match tests.pop() {
        Some(test) => Ok(Rule { offset, test }),
        None => Err("rule declares no byte test".into()),
    }
}

fn parse_hex(s: &str) -> Result<Vec<u8>, String> {
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() % 2 != 0 {
        return Err(format!("odd-length hex string '{s}'"));
    }
    (0..compact.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&compact[i..i + 2], 16)
                .map_err(|_| format!("invalid hex string '{s}'"))
        })
        .collect()
}
