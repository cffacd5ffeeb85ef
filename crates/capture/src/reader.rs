//! PCAP/PCAP-NG file reading.
//!
//! Wraps pcap-parser's incremental reader into a pull interface producing
//! decoded `Packet`s. The source is lazy and restartable only by reopening;
//! it ends when the capture is exhausted. Reader-level failures (bad magic,
//! truncated blocks) are `CaptureSource` and fatal; per-frame decode
//! failures are `MalformedPacket` and left to the caller's counting policy.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::{Duration, SystemTime};

use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{Block, LegacyPcapReader, Linktype, PcapBlockOwned, PcapError, PcapNGReader};
use tracing::{debug, trace};

use remora_common::{Packet, RemoraError, RemoraResult};

use crate::decode::{decode_ethernet, decode_raw_ip};

const READER_BUFFER_SIZE: usize = 1 << 20;

/// Per-interface decoding parameters from a PCAP-NG interface description.
#[derive(Debug, Clone, Copy)]
struct InterfaceParams {
    linktype: Linktype,
    ts_offset: u64,
    /// Timestamp units per second.
    ts_resolution: u64,
}

/// Decoding state accumulated from header and interface blocks. Kept apart
/// from the reader so blocks borrowed from the reader's buffer can be
/// processed against it.
#[derive(Debug, Default)]
struct SourceState {
    /// Linktype from a legacy header, when the file is legacy pcap.
    legacy_linktype: Option<Linktype>,
    legacy_nanos: bool,
    /// PCAP-NG interfaces, in description order.
    interfaces: Vec<InterfaceParams>,
    index: u64,
}

impl SourceState {
    fn handle_block(&mut self, block: &PcapBlockOwned) -> RemoraResult<Option<Packet>> {
        match block {
            PcapBlockOwned::LegacyHeader(header) => {
                trace!(linktype = ?header.network, "legacy capture header");
                self.legacy_linktype = Some(header.network);
                self.legacy_nanos = header.is_nanosecond_precision();
                Ok(None)
            }
            PcapBlockOwned::Legacy(frame) => {
                let linktype = self.legacy_linktype.ok_or_else(|| {
                    RemoraError::CaptureSource("packet before capture header".to_string())
                })?;
                let nanos = if self.legacy_nanos {
                    frame.ts_usec
                } else {
                    frame.ts_usec.saturating_mul(1000)
                };
                let ts = SystemTime::UNIX_EPOCH + Duration::new(u64::from(frame.ts_sec), nanos);
                self.index += 1;
                decode_frame(linktype, self.index, ts, frame.data)
            }
            PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                // A new section restarts interface numbering.
                self.interfaces.clear();
                Ok(None)
            }
            PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                let params = InterfaceParams {
                    linktype: idb.linktype,
                    ts_offset: idb.ts_offset() as u64,
                    ts_resolution: idb.ts_resolution().unwrap_or(1_000_000),
                };
                trace!(linktype = ?params.linktype, "interface description");
                self.interfaces.push(params);
                Ok(None)
            }
            PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                let params = self
                    .interfaces
                    .get(epb.if_id as usize)
                    .copied()
                    .ok_or_else(|| {
                        RemoraError::CaptureSource(format!(
                            "packet references undescribed interface {}",
                            epb.if_id
                        ))
                    })?;
                let (secs, frac) = epb.decode_ts(params.ts_offset, params.ts_resolution);
                let nanos =
                    u64::from(frac).saturating_mul(1_000_000_000) / params.ts_resolution;
                let ts = SystemTime::UNIX_EPOCH + Duration::new(u64::from(secs), nanos as u32);
                self.index += 1;
                decode_frame(params.linktype, self.index, ts, epb.data)
            }
            PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                // Simple packets carry no timestamp and assume interface 0.
                let params = self.interfaces.first().copied().ok_or_else(|| {
                    RemoraError::CaptureSource(
                        "simple packet before interface description".to_string(),
                    )
                })?;
                self.index += 1;
                decode_frame(
                    params.linktype,
                    self.index,
                    SystemTime::UNIX_EPOCH,
                    spb.data,
                )
            }
            PcapBlockOwned::NG(_) => Ok(None),
        }
    }
}

/// Concrete reader per container format. An enum rather than a boxed
/// `PcapReaderIterator` so the source stays `Send` and can live on a
/// blocking task.
enum CaptureReader {
    Legacy(LegacyPcapReader<File>),
    Ng(PcapNGReader<File>),
}

impl CaptureReader {
    fn next(&mut self) -> Result<(usize, PcapBlockOwned<'_>), PcapError<&[u8]>> {
        match self {
            Self::Legacy(r) => r.next(),
            Self::Ng(r) => r.next(),
        }
    }

    fn consume_noshift(&mut self, offset: usize) {
        match self {
            Self::Legacy(r) => r.consume_noshift(offset),
            Self::Ng(r) => r.consume_noshift(offset),
        }
    }

    fn refill(&mut self) -> Result<(), PcapError<&[u8]>> {
        match self {
            Self::Legacy(r) => r.refill(),
            Self::Ng(r) => r.refill(),
        }
    }
}

const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];
const PCAP_MAGICS: [[u8; 4]; 4] = [
    [0xa1, 0xb2, 0xc3, 0xd4],
    [0xd4, 0xc3, 0xb2, 0xa1],
    [0xa1, 0xb2, 0x3c, 0x4d],
    [0x4d, 0x3c, 0xb2, 0xa1],
];

/// A packet source backed by a capture file on disk.
pub struct PcapSource {
    reader: CaptureReader,
    state: SourceState,
}

impl PcapSource {
    /// Open a capture file. Fails with `CaptureSource` when the file cannot
    /// be opened or is not a recognizable capture format.
    pub fn open(path: &Path) -> RemoraResult<Self> {
        let open_err = |e: std::io::Error| {
            RemoraError::CaptureSource(format!("cannot open {}: {e}", path.display()))
        };
        let mut file = File::open(path).map_err(open_err)?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic).map_err(open_err)?;
        file.seek(SeekFrom::Start(0)).map_err(open_err)?;

        let reader = if magic == PCAPNG_MAGIC {
            CaptureReader::Ng(PcapNGReader::new(READER_BUFFER_SIZE, file).map_err(|e| {
                RemoraError::CaptureSource(format!("invalid pcapng capture: {e}"))
            })?)
        } else if PCAP_MAGICS.contains(&magic) {
            CaptureReader::Legacy(LegacyPcapReader::new(READER_BUFFER_SIZE, file).map_err(
                |e| RemoraError::CaptureSource(format!("invalid pcap capture: {e}")),
            )?)
        } else {
            return Err(RemoraError::CaptureSource(format!(
                "{} is not a pcap or pcapng capture",
                path.display()
            )));
        };
        debug!(path = %path.display(), "opened capture");
        Ok(Self {
            reader,
            state: SourceState::default(),
        })
    }

    /// Next decoded packet, or `Ok(None)` at end of capture.
    ///
    /// `MalformedPacket` errors are per-frame and resumable: the frame has
    /// already been consumed, so the caller may count the error and call
    /// again.
    pub fn next_packet(&mut self) -> RemoraResult<Option<Packet>> {
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let decoded = self.state.handle_block(&block);
                    self.reader.consume_noshift(offset);
                    match decoded {
                        Ok(Some(packet)) => return Ok(Some(packet)),
                        Ok(None) => continue,
                        Err(e) => return Err(e),
                    }
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete(_)) => {
                    self.reader
                        .refill()
                        .map_err(|e| RemoraError::CaptureSource(format!("refill failed: {e}")))?;
                }
                Err(e) => {
                    return Err(RemoraError::CaptureSource(format!("read failed: {e}")));
                }
            }
        }
    }

    /// Frames handed out so far (including malformed ones).
    #[must_use]
    pub fn frames_read(&self) -> u64 {
        self.state.index
    }
}

fn decode_frame(
    linktype: Linktype,
    index: u64,
    ts: SystemTime,
    data: &[u8],
) -> RemoraResult<Option<Packet>> {
    match linktype {
        Linktype::ETHERNET => decode_ethernet(index, ts, data),
        Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => decode_raw_ip(index, ts, data),
        other => Err(RemoraError::CaptureSource(format!(
            "unsupported link type {other:?}"
        ))),
    }
}
