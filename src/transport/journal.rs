//! Append-only event journal
//!
//! Each record is a fixed 20-byte header followed by a bincode payload.
//!
//! ```text
//! ┌─────────────┬─────────┬──────────────────────────────────┐
//! │ seq         │ 8 bytes │ Monotonic record number in file  │
//! │ checksum    │ 4 bytes │ CRC32 of payload                 │
//! │ payload_len │ 4 bytes │ Payload size                     │
//! │ record_type │ 1 byte  │ Intent / Ack / FullyFunded       │
//! │ version     │ 1 byte  │ Payload format version           │
//! │ reserved    │ 2 bytes │ Zero                             │
//! └─────────────┴─────────┴──────────────────────────────────┘
//! ```
//!
//! Payloads carry only primitive fields. Decimals are stored in their
//! 16-byte serialized form, identities as raw UUID bytes and timestamps as
//! unix seconds plus nanoseconds.
//!
//! A record is written with a single `write_all` followed by `sync_data`.
//! A crash can therefore only leave a partial record at the very end of the
//! file; it is cut off on the next open. Damage anywhere else is an error.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use crc32fast::Hasher;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{FullyFundedEvent, InvestmentIntent};
use crate::core_types::EventId;
use crate::loan::{Loan, LoanState};

pub const HEADER_SIZE: usize = 20;
/// Largest payload any record type encodes to, with headroom
pub const MAX_PAYLOAD: u32 = 4096;
const FORMAT_VERSION: u8 = 2;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Intent = 1,
    Ack = 2,
    FullyFunded = 3,
}

impl TryFrom<u8> for RecordType {
    type Error = io::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Intent),
            2 => Ok(Self::Ack),
            3 => Ok(Self::FullyFunded),
            _ => Err(invalid(format!("Unknown journal record type: {}", value))),
        }
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// A record cut short by the end of the file
fn torn(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, msg)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub seq: u64,
    pub checksum: u32,
    pub payload_len: u32,
    pub record_type: u8,
    pub version: u8,
}

impl RecordHeader {
    fn new(record_type: RecordType, seq: u64, payload: &[u8]) -> Self {
        Self {
            seq,
            checksum: crc32(payload),
            payload_len: payload.len() as u32,
            record_type: record_type as u8,
            version: FORMAT_VERSION,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.seq.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf[12..16].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[16] = self.record_type;
        buf[17] = self.version;
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Self {
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&buf[0..8]);
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&buf[8..12]);
        let mut payload_len = [0u8; 4];
        payload_len.copy_from_slice(&buf[12..16]);
        Self {
            seq: u64::from_le_bytes(seq),
            checksum: u32::from_le_bytes(checksum),
            payload_len: u32::from_le_bytes(payload_len),
            record_type: buf[16],
            version: buf[17],
        }
    }
}

#[inline]
fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Unix seconds and subsecond nanos; round-trips every `DateTime<Utc>`
type Timestamp = (i64, u32);

fn split_time(at: &DateTime<Utc>) -> Timestamp {
    (at.timestamp(), at.timestamp_subsec_nanos())
}

fn join_time((secs, nanos): Timestamp) -> io::Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| invalid(format!("timestamp out of range: {}.{:09}", secs, nanos)))
}

// ============================================================
// PAYLOADS
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct IntentPayload {
    event_id: [u8; 16],
    loan_id: [u8; 16],
    investor_id: [u8; 16],
    amount: [u8; 16],
    created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct AckPayload {
    event_id: [u8; 16],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct FullyFundedPayload {
    loan_id: [u8; 16],
    borrower_id: [u8; 16],
    principal_amount: [u8; 16],
    invested_amount: [u8; 16],
    remaining_investment: [u8; 16],
    rate: [u8; 16],
    roi: [u8; 16],
    total_interest: [u8; 16],
    state: i16,
    created_at: Timestamp,
    updated_at: Timestamp,
    funded_at: Timestamp,
}

/// A decoded journal record
#[derive(Debug, Clone, PartialEq)]
pub enum JournalRecord {
    Intent(InvestmentIntent),
    Ack(EventId),
    FullyFunded(FullyFundedEvent),
}

impl JournalRecord {
    fn record_type(&self) -> RecordType {
        match self {
            JournalRecord::Intent(_) => RecordType::Intent,
            JournalRecord::Ack(_) => RecordType::Ack,
            JournalRecord::FullyFunded(_) => RecordType::FullyFunded,
        }
    }

    fn encode(&self) -> io::Result<Vec<u8>> {
        let bytes = match self {
            JournalRecord::Intent(intent) => bincode::serialize(&IntentPayload {
                event_id: *intent.id.as_uuid().as_bytes(),
                loan_id: *intent.loan_id.as_uuid().as_bytes(),
                investor_id: *intent.investor_id.as_uuid().as_bytes(),
                amount: intent.amount.serialize(),
                created_at: split_time(&intent.created_at),
            }),
            JournalRecord::Ack(event_id) => bincode::serialize(&AckPayload {
                event_id: *event_id.as_uuid().as_bytes(),
            }),
            JournalRecord::FullyFunded(event) => {
                let loan = &event.loan;
                bincode::serialize(&FullyFundedPayload {
                    loan_id: *loan.id.as_uuid().as_bytes(),
                    borrower_id: *loan.borrower_id.as_uuid().as_bytes(),
                    principal_amount: loan.principal_amount.serialize(),
                    invested_amount: loan.invested_amount.serialize(),
                    remaining_investment: loan.remaining_investment.serialize(),
                    rate: loan.rate.serialize(),
                    roi: loan.roi.serialize(),
                    total_interest: loan.total_interest.serialize(),
                    state: loan.state.id(),
                    created_at: split_time(&loan.created_at),
                    updated_at: split_time(&loan.updated_at),
                    funded_at: split_time(&event.funded_at),
                })
            }
        };
        bytes.map_err(|e| invalid(format!("journal encode failed: {}", e)))
    }

    fn decode(record_type: RecordType, payload: &[u8]) -> io::Result<Self> {
        let decode_err = |e: bincode::Error| invalid(format!("journal decode failed: {}", e));
        match record_type {
            RecordType::Intent => {
                let p: IntentPayload = bincode::deserialize(payload).map_err(decode_err)?;
                Ok(JournalRecord::Intent(InvestmentIntent {
                    id: Uuid::from_bytes(p.event_id).into(),
                    loan_id: Uuid::from_bytes(p.loan_id).into(),
                    investor_id: Uuid::from_bytes(p.investor_id).into(),
                    amount: Decimal::deserialize(p.amount),
                    created_at: join_time(p.created_at)?,
                }))
            }
            RecordType::Ack => {
                let p: AckPayload = bincode::deserialize(payload).map_err(decode_err)?;
                Ok(JournalRecord::Ack(Uuid::from_bytes(p.event_id).into()))
            }
            RecordType::FullyFunded => {
                let p: FullyFundedPayload = bincode::deserialize(payload).map_err(decode_err)?;
                let state = LoanState::from_id(p.state)
                    .ok_or_else(|| invalid(format!("invalid loan state id {}", p.state)))?;
                Ok(JournalRecord::FullyFunded(FullyFundedEvent {
                    loan: Loan {
                        id: Uuid::from_bytes(p.loan_id).into(),
                        borrower_id: Uuid::from_bytes(p.borrower_id).into(),
                        principal_amount: Decimal::deserialize(p.principal_amount),
                        invested_amount: Decimal::deserialize(p.invested_amount),
                        remaining_investment: Decimal::deserialize(p.remaining_investment),
                        rate: Decimal::deserialize(p.rate),
                        roi: Decimal::deserialize(p.roi),
                        total_interest: Decimal::deserialize(p.total_interest),
                        state,
                        created_at: join_time(p.created_at)?,
                        updated_at: join_time(p.updated_at)?,
                    },
                    funded_at: join_time(p.funded_at)?,
                }))
            }
        }
    }

    /// Header and payload as one contiguous frame
    fn frame(&self, seq: u64) -> io::Result<Vec<u8>> {
        let payload = self.encode()?;
        let header = RecordHeader::new(self.record_type(), seq, &payload);
        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }
}

// ============================================================
// READER
// ============================================================

pub struct JournalReader<R: Read> {
    reader: R,
    offset: u64,
}

impl<R: Read> JournalReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, offset: 0 }
    }

    /// Bytes covered by the records decoded so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read until `buf` is full or the input ends; returns bytes read
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Read the next record, `None` at a clean end of file.
    ///
    /// A record cut short by the end of input is an `UnexpectedEof` error;
    /// a damaged record is `InvalidData`.
    pub fn read_record(&mut self) -> io::Result<Option<(RecordHeader, JournalRecord)>> {
        let mut header_buf = [0u8; HEADER_SIZE];
        match self.fill(&mut header_buf)? {
            0 => return Ok(None),
            HEADER_SIZE => {}
            n => {
                return Err(torn(format!(
                    "partial header of {} bytes at offset {}",
                    n, self.offset
                )));
            }
        }

        let header = RecordHeader::from_bytes(&header_buf);
        if header.payload_len > MAX_PAYLOAD {
            return Err(invalid(format!(
                "payload length {} exceeds {} at offset {}",
                header.payload_len, MAX_PAYLOAD, self.offset
            )));
        }

        let mut payload = vec![0u8; header.payload_len as usize];
        let got = self.fill(&mut payload)?;
        if got < payload.len() {
            return Err(torn(format!(
                "partial payload ({} of {} bytes) at offset {}",
                got,
                payload.len(),
                self.offset
            )));
        }

        if header.checksum != crc32(&payload) {
            return Err(invalid(format!(
                "CRC32 checksum mismatch at seq={}, expected={}, got={}",
                header.seq,
                header.checksum,
                crc32(&payload)
            )));
        }
        if header.version != FORMAT_VERSION {
            return Err(invalid(format!(
                "unsupported journal version {} at seq={}",
                header.version, header.seq
            )));
        }

        let record_type = RecordType::try_from(header.record_type)?;
        let record = JournalRecord::decode(record_type, &payload)?;
        self.offset += (HEADER_SIZE + payload.len()) as u64;
        Ok(Some((header, record)))
    }
}

// ============================================================
// JOURNAL
// ============================================================

/// One channel's journal file, opened for append
pub struct Journal {
    path: PathBuf,
    file: File,
    next_seq: u64,
    /// File length covering only fully synced records
    committed_len: u64,
    /// Set when a failed append could not be rolled back
    broken: bool,
    #[cfg(test)]
    fail_next_sync: bool,
}

impl Journal {
    /// Open (creating if needed) and return every record already on disk.
    ///
    /// A partial record at the end of the file is cut off with a warning.
    pub fn open(path: impl AsRef<Path>) -> io::Result<(Self, Vec<JournalRecord>)> {
        let path = path.as_ref().to_path_buf();
        let mut records = Vec::new();
        let mut next_seq = 0;

        if path.exists() {
            let mut reader = JournalReader::new(BufReader::new(File::open(&path)?));
            loop {
                match reader.read_record() {
                    Ok(Some((header, record))) => {
                        next_seq = header.seq + 1;
                        records.push(record);
                    }
                    Ok(None) => break,
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        tracing::warn!(
                            path = %path.display(),
                            valid_len = reader.offset(),
                            error = %e,
                            "Discarding torn journal tail"
                        );
                        let file = OpenOptions::new().write(true).open(&path)?;
                        file.set_len(reader.offset())?;
                        file.sync_all()?;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok((Self::open_append(path, next_seq)?, records))
    }

    /// Atomically replace the file with `records`, renumbered from zero
    pub fn rewrite(path: impl AsRef<Path>, records: &[JournalRecord]) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tmp = path.with_extension("compacting");
        {
            let mut file = File::create(&tmp)?;
            for (seq, record) in records.iter().enumerate() {
                file.write_all(&record.frame(seq as u64)?)?;
            }
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;
        sync_parent(&path)?;

        Self::open_append(path, records.len() as u64)
    }

    fn open_append(path: PathBuf, next_seq: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            next_seq,
            committed_len,
            broken: false,
            #[cfg(test)]
            fail_next_sync: false,
        })
    }

    /// Append and fsync one record; returns its sequence number.
    ///
    /// On failure the file is cut back to its last committed length, so a
    /// record reported as failed never reappears on replay.
    pub fn append(&mut self, record: &JournalRecord) -> io::Result<u64> {
        if self.broken {
            return Err(io::Error::other(format!(
                "journal {} needs to be reopened after a failed rollback",
                self.path.display()
            )));
        }

        let seq = self.next_seq;
        let frame = record.frame(seq)?;

        if let Err(e) = self.write_frame(&frame) {
            self.rollback();
            return Err(e);
        }

        self.committed_len += frame.len() as u64;
        self.next_seq += 1;
        Ok(seq)
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.file.write_all(frame)?;
        self.injected_failure()?;
        self.file.sync_data()
    }

    fn rollback(&mut self) {
        let restored = self
            .file
            .set_len(self.committed_len)
            .and_then(|_| self.file.sync_data());
        if let Err(e) = restored {
            tracing::error!(
                path = %self.path.display(),
                committed_len = self.committed_len,
                error = %e,
                "Journal rollback failed; refusing further appends"
            );
            self.broken = true;
        }
    }

    #[cfg(test)]
    fn injected_failure(&mut self) -> io::Result<()> {
        if std::mem::take(&mut self.fail_next_sync) {
            return Err(io::Error::other("injected sync failure"));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn injected_failure(&mut self) -> io::Result<()> {
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{InvestorId, LoanId};

    fn intent(amount: i64) -> InvestmentIntent {
        InvestmentIntent {
            id: EventId::new(),
            loan_id: LoanId::new(),
            investor_id: InvestorId::new(),
            amount: Decimal::new(amount, 2),
            created_at: DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap(),
        }
    }

    fn write(path: &Path, records: &[JournalRecord]) {
        let (mut journal, _) = Journal::open(path).unwrap();
        for record in records {
            journal.append(record).unwrap();
        }
    }

    #[test]
    fn test_header_layout() {
        let header = RecordHeader::new(RecordType::Ack, 7, b"abc");
        let decoded = RecordHeader::from_bytes(&header.to_bytes());
        assert_eq!(decoded, header);
        assert_eq!(decoded.payload_len, 3);
        assert_eq!(header.to_bytes()[18..20], [0, 0]);
    }

    #[test]
    fn test_reopen_returns_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.journal");

        let first = intent(12_345);
        let second = intent(99);
        {
            let (mut journal, existing) = Journal::open(&path).unwrap();
            assert!(existing.is_empty());
            journal.append(&JournalRecord::Intent(first.clone())).unwrap();
            journal.append(&JournalRecord::Intent(second.clone())).unwrap();
            journal.append(&JournalRecord::Ack(first.id)).unwrap();
        }

        let (mut journal, records) = Journal::open(&path).unwrap();
        assert_eq!(
            records,
            vec![
                JournalRecord::Intent(first.clone()),
                JournalRecord::Intent(second),
                JournalRecord::Ack(first.id),
            ]
        );
        // sequence continues after reopen
        assert_eq!(journal.append(&JournalRecord::Ack(first.id)).unwrap(), 3);
    }

    #[test]
    fn test_intent_replays_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.journal");
        let mut original = intent(3_333_333);
        original.created_at = Utc::now();
        write(&path, &[JournalRecord::Intent(original.clone())]);

        let (_, records) = Journal::open(&path).unwrap();
        assert_eq!(records, vec![JournalRecord::Intent(original.clone())]);
        match &records[0] {
            JournalRecord::Intent(decoded) => {
                assert_eq!(decoded.amount, Decimal::new(3_333_333, 2));
                assert_eq!(
                    decoded.created_at.timestamp_subsec_nanos(),
                    original.created_at.timestamp_subsec_nanos()
                );
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_corrupted_record_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.journal");
        write(&path, &[JournalRecord::Intent(intent(1))]);

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let err = Journal::open(&path).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_corruption_before_the_tail_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.journal");
        write(
            &path,
            &[
                JournalRecord::Intent(intent(1)),
                JournalRecord::Intent(intent(2)),
            ],
        );

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[HEADER_SIZE] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let err = Journal::open(&path).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        // nothing was cut off
        assert_eq!(std::fs::read(&path).unwrap().len(), bytes.len());
    }

    #[test]
    fn test_torn_tail_is_cut_and_earlier_records_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.journal");
        let first = intent(1);
        let second = intent(2);
        write(
            &path,
            &[
                JournalRecord::Intent(first.clone()),
                JournalRecord::Intent(second),
            ],
        );
        let full = std::fs::read(&path).unwrap();
        let record_len = full.len() / 2;

        for cut in [3, HEADER_SIZE + 1, record_len - 1] {
            std::fs::write(&path, &full[..full.len() - cut]).unwrap();

            let (mut journal, records) = Journal::open(&path).unwrap();
            assert_eq!(records, vec![JournalRecord::Intent(first.clone())], "cut {}", cut);
            assert_eq!(std::fs::metadata(&path).unwrap().len(), record_len as u64);

            // appends continue cleanly after the cut
            let third = intent(3);
            assert_eq!(journal.append(&JournalRecord::Intent(third.clone())).unwrap(), 1);
            drop(journal);
            let (_, records) = Journal::open(&path).unwrap();
            assert_eq!(
                records,
                vec![JournalRecord::Intent(first.clone()), JournalRecord::Intent(third)]
            );
        }
    }

    #[test]
    fn test_oversized_length_rejected_before_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.journal");
        let mut header = RecordHeader::new(RecordType::Intent, 0, b"");
        header.payload_len = u32::MAX;
        std::fs::write(&path, header.to_bytes()).unwrap();

        let err = Journal::open(&path).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_failed_append_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.journal");
        let kept = intent(1);
        let failed = intent(2);
        let later = intent(3);
        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            journal.append(&JournalRecord::Intent(kept.clone())).unwrap();
            let len = std::fs::metadata(&path).unwrap().len();

            journal.fail_next_sync = true;
            assert!(journal.append(&JournalRecord::Intent(failed)).is_err());
            assert_eq!(std::fs::metadata(&path).unwrap().len(), len);

            // the failed record keeps no sequence number either
            assert_eq!(journal.append(&JournalRecord::Intent(later.clone())).unwrap(), 1);
        }

        let (_, records) = Journal::open(&path).unwrap();
        assert_eq!(
            records,
            vec![JournalRecord::Intent(kept), JournalRecord::Intent(later)]
        );
    }

    #[test]
    fn test_rewrite_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.journal");
        let acked = intent(1);
        let pending = intent(2);
        write(
            &path,
            &[
                JournalRecord::Intent(acked.clone()),
                JournalRecord::Intent(pending.clone()),
                JournalRecord::Ack(acked.id),
            ],
        );
        let before = std::fs::metadata(&path).unwrap().len();

        let mut journal =
            Journal::rewrite(&path, &[JournalRecord::Intent(pending.clone())]).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() < before);
        assert!(!path.with_extension("compacting").exists());
        assert_eq!(journal.append(&JournalRecord::Ack(pending.id)).unwrap(), 1);
        drop(journal);

        let (_, records) = Journal::open(&path).unwrap();
        assert_eq!(
            records,
            vec![JournalRecord::Intent(pending.clone()), JournalRecord::Ack(pending.id)]
        );
    }
}
