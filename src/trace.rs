//! Trace ingestion: turns a flat text file of host I/O requests into
//! [`Transaction`] batches, and a flat text file of content fingerprints
//! into a [`FingerprintSource`].

use std::fs;
use std::io;
use std::path::Path;

use crate::amu::dedup::FingerprintSource;
use crate::amu::transaction::{Transaction, TransactionKind};
use crate::error::{Result, SimError};
use crate::types::{Fingerprint, Lpa, PageStatusBitmap, StreamId};

/// Reads one fingerprint per line from a file, in order; mirrors
/// [`crate::amu::dedup::VecFingerprintSource`] but without holding the
/// whole file as owned `Fingerprint`s up front for very large traces.
pub struct FileFingerprintSource {
    lines: std::collections::VecDeque<String>,
}

impl FileFingerprintSource {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect();
        Ok(FileFingerprintSource { lines })
    }
}

impl FingerprintSource for FileFingerprintSource {
    fn next_fingerprint(&mut self) -> Option<Fingerprint> {
        self.lines.pop_front().map(Fingerprint)
    }
}

/// One parsed trace line: `stream,kind,lpa,bitmap[,user_request_ref]`,
/// where `kind` is `R` or `W` and `bitmap` is a hexadecimal sector mask.
#[derive(Debug)]
pub struct TransactionTrace {
    transactions: Vec<Transaction>,
}

impl TransactionTrace {
    pub fn parse(text: &str) -> Result<Self> {
        let mut transactions = Vec::new();
        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            transactions.push(parse_line(line, lineno + 1)?);
        }
        Ok(TransactionTrace { transactions })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| SimError::Config(e.to_string()))?;
        Self::parse(&text)
    }

    pub fn into_transactions(self) -> Vec<Transaction> {
        self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

fn parse_line(line: &str, lineno: usize) -> Result<Transaction> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 4 {
        return Err(SimError::Config(format!("trace line {lineno} needs at least 4 fields: {line:?}")));
    }
    let stream: u16 = fields[0]
        .parse()
        .map_err(|_| SimError::Config(format!("trace line {lineno}: invalid stream {:?}", fields[0])))?;
    let kind = match fields[1].to_ascii_uppercase().as_str() {
        "R" | "READ" => TransactionKind::Read,
        "W" | "WRITE" => TransactionKind::Write,
        other => return Err(SimError::Config(format!("trace line {lineno}: invalid kind {other:?}"))),
    };
    let lpa: u64 = fields[2]
        .parse()
        .map_err(|_| SimError::Config(format!("trace line {lineno}: invalid lpa {:?}", fields[2])))?;
    let bitmap = u64::from_str_radix(fields[3].trim_start_matches("0x"), 16)
        .map_err(|_| SimError::Config(format!("trace line {lineno}: invalid bitmap {:?}", fields[3])))?;
    let user_request_ref = fields.get(4).and_then(|s| s.parse().ok()).unwrap_or(lineno as u64);

    Ok(Transaction::new(StreamId(stream), kind, Lpa(lpa), PageStatusBitmap::new(bitmap), user_request_ref))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_read_and_write_lines() {
        let trace = TransactionTrace::parse(
            "0,W,10,0xff\n0,R,10,0x0f\n# a comment\n\n1,write,3,ff,77\n",
        )
        .unwrap();
        let txns = trace.into_transactions();
        assert_eq!(txns.len(), 3);
        assert!(txns[0].is_write());
        assert!(txns[1].is_read());
        assert_eq!(txns[2].user_request_ref, 77);
    }

    #[test]
    fn rejects_malformed_kind() {
        let err = TransactionTrace::parse("0,X,10,0xff\n").unwrap_err();
        assert!(matches!(err, SimError::Config(_)));
    }
}
