use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;

use crate::stats::StatsAccumulator;

// Durable log of raw (pre, post) timestamp pairs. Every matched pair is written before
// validation so a later replay can apply the same validity filter without having lost
// the raw data.

/// One correlated pair: pre is the ingress timestamp, post the egress timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampPair {
    pub pre: u64,
    pub post: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormat {
    /// "<pre> <post>\n" per pair.
    Text,
    /// Fixed-width little-endian [pre u64][post u64] records, no header. A valid file
    /// length is always a multiple of 16 bytes.
    Binary,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("binary capture length {0} is not a multiple of 16 bytes")]
    TruncatedBinary(u64),
    #[error("malformed text record at line {0}")]
    MalformedText(u64),
}

pub struct CaptureWriter {
    file: BufWriter<File>,
    format: CaptureFormat,
}

impl CaptureWriter {
    /// Failing to create the file is fatal at this boundary; there is no point starting
    /// a measurement run that cannot persist its samples.
    pub fn create<P: AsRef<Path>>(
        path: P,
        format: CaptureFormat,
    ) -> Result<CaptureWriter, CaptureError> {
        let file = BufWriter::new(File::create(path)?);
        Ok(CaptureWriter { file, format })
    }

    pub fn write_pair(&mut self, pre: u64, post: u64) -> Result<(), CaptureError> {
        match self.format {
            CaptureFormat::Text => {
                writeln!(self.file, "{} {}", pre, post)?;
            }
            CaptureFormat::Binary => {
                self.file.write_all(&pre.to_le_bytes())?;
                self.file.write_all(&post.to_le_bytes())?;
            }
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), CaptureError> {
        self.file.flush()?;
        Ok(())
    }
}

pub struct CaptureReader {
    file: BufReader<File>,
    format: CaptureFormat,
    line: u64,
}

impl CaptureReader {
    /// Opens the log. A binary file whose length is not a multiple of the 16-byte
    /// record size was truncated or was never a binary capture; reject it here instead
    /// of parsing garbage.
    pub fn open<P: AsRef<Path>>(
        path: P,
        format: CaptureFormat,
    ) -> Result<CaptureReader, CaptureError> {
        let file = File::open(path)?;

        if format == CaptureFormat::Binary {
            let len = file.metadata()?.len();
            if len % 16 != 0 {
                return Err(CaptureError::TruncatedBinary(len));
            }
        }

        Ok(CaptureReader {
            file: BufReader::new(file),
            format,
            line: 0,
        })
    }

    /// Next pair, or None at end of file.
    pub fn next_pair(&mut self) -> Result<Option<TimestampPair>, CaptureError> {
        match self.format {
            CaptureFormat::Text => {
                let mut buf = String::new();
                loop {
                    buf.clear();
                    if self.file.read_line(&mut buf)? == 0 {
                        return Ok(None);
                    }
                    self.line += 1;
                    if buf.trim().is_empty() {
                        continue;
                    }

                    let mut fields = buf.split_whitespace();
                    let pre = fields.next().and_then(|f| f.parse().ok());
                    let post = fields.next().and_then(|f| f.parse().ok());
                    return match (pre, post, fields.next()) {
                        (Some(pre), Some(post), None) => {
                            Ok(Some(TimestampPair { pre, post }))
                        }
                        _ => Err(CaptureError::MalformedText(self.line)),
                    };
                }
            }
            CaptureFormat::Binary => {
                let mut record = [0u8; 16];
                match self.file.read_exact(&mut record) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        return Ok(None);
                    }
                    Err(e) => return Err(e.into()),
                }

                let mut pre = [0u8; 8];
                let mut post = [0u8; 8];
                pre.copy_from_slice(&record[..8]);
                post.copy_from_slice(&record[8..]);
                Ok(Some(TimestampPair {
                    pre: u64::from_le_bytes(pre),
                    post: u64::from_le_bytes(post),
                }))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureStats {
    pub pairs: u64,
    pub valid: u64,
    pub invalid_timestamps: u64,
    pub average_latency: f64,
    pub variance_latency: f64,
}

/// Replay a capture through the same validity filter the live path uses: a pair counts
/// only if pre < post and the latency stays under max_latency (clock skew and
/// reordering produce wrapped, huge values otherwise). Invalid pairs are counted, never
/// folded into the mean.
pub fn post_process<P: AsRef<Path>>(
    path: P,
    format: CaptureFormat,
    max_latency: u64,
) -> Result<CaptureStats, CaptureError> {
    let mut reader = CaptureReader::open(path, format)?;
    let mut acc = StatsAccumulator::new();
    let mut pairs = 0;
    let mut invalid = 0;

    while let Some(pair) = reader.next_pair()? {
        pairs += 1;
        if pair.pre < pair.post && pair.post - pair.pre < max_latency {
            acc.update((pair.post - pair.pre) as f64);
        } else {
            invalid += 1;
        }
    }

    let snap = acc.snapshot();
    Ok(CaptureStats {
        pairs,
        valid: snap.count,
        invalid_timestamps: invalid,
        average_latency: snap.mean,
        variance_latency: snap.variance.unwrap_or(0.0),
    })
}
