//! Recipient lists
//!
//! Recipients arrive either as explicit entries or as CSV text. CSV input has a
//! header row; the phone column is the first of `phone`, `phone_number`,
//! `mobile`, `number` (case-insensitive), otherwise the first column. Every
//! other non-empty cell becomes a variable keyed by its header. A file whose
//! first row is already a phone number is read as a single headerless column.
//!
//! Normalization never fails the batch. A recipient whose number cannot be
//! normalized keeps its position and becomes a failed outcome.

use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::debug;

use wb_common::phone::normalize_phone;
use wb_common::{RecipientEntry, Variables};

use crate::error::DispatchError;
use crate::Result;

const PHONE_HEADERS: [&str; 4] = ["phone", "phone_number", "mobile", "number"];

/// Where a broadcast's recipients come from
#[derive(Debug, Clone)]
pub enum RecipientSource {
    Numbers(Vec<RecipientEntry>),
    Csv(String),
}

/// A recipient ready to be sent to
#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    pub index: usize,
    pub phone: String,
    pub variables: Variables,
}

/// A recipient rejected before submission
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecipient {
    pub index: usize,
    pub raw: String,
    pub reason: String,
}

/// Normalized recipients in list order
#[derive(Debug, Clone, Default)]
pub struct PreparedRecipients {
    pub valid: Vec<Recipient>,
    pub rejected: Vec<RejectedRecipient>,
}

impl PreparedRecipients {
    pub fn total(&self) -> usize {
        self.valid.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    fn push(&mut self, index: usize, raw: &str, variables: Variables) {
        match normalize_phone(raw) {
            Ok(phone) => self.valid.push(Recipient {
                index,
                phone,
                variables,
            }),
            Err(e) => {
                debug!(index, raw = %raw, error = %e, "Recipient rejected");
                self.rejected.push(RejectedRecipient {
                    index,
                    raw: raw.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

impl RecipientSource {
    pub fn label(&self) -> &'static str {
        match self {
            RecipientSource::Numbers(_) => "numbers",
            RecipientSource::Csv(_) => "csv",
        }
    }

    /// Normalize into an ordered list. Fails only when there are no rows at all
    /// or the CSV cannot be parsed.
    pub fn prepare(self) -> Result<PreparedRecipients> {
        let prepared = match self {
            RecipientSource::Numbers(entries) => {
                let mut prepared = PreparedRecipients::default();
                for (index, entry) in entries.into_iter().enumerate() {
                    prepared.push(index, &entry.phone, entry.variables);
                }
                prepared
            }
            RecipientSource::Csv(content) => parse_csv(&content)?,
        };

        if prepared.is_empty() {
            return Err(DispatchError::NoRecipients);
        }
        Ok(prepared)
    }
}

fn parse_csv(content: &str) -> Result<PreparedRecipients> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(content.as_bytes());

    let mut records = reader.records();
    let first = match records.next() {
        Some(record) => record?,
        None => return Ok(PreparedRecipients::default()),
    };

    let mut prepared = PreparedRecipients::default();
    let (headers, phone_column) = match phone_column(&first) {
        Some(column) => (Some(first), column),
        None if looks_like_phone(&first) => {
            prepared.push(0, first.get(0).unwrap_or_default(), Variables::new());
            (None, 0)
        }
        None => (Some(first), 0),
    };

    for record in records {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }

        let raw = record.get(phone_column).unwrap_or_default();
        let variables = match &headers {
            Some(headers) => row_variables(headers, &record, phone_column),
            None => Variables::new(),
        };
        let index = prepared.total();
        prepared.push(index, raw, variables);
    }

    Ok(prepared)
}

fn phone_column(headers: &StringRecord) -> Option<usize> {
    PHONE_HEADERS.iter().find_map(|name| {
        headers
            .iter()
            .position(|header| header.eq_ignore_ascii_case(name))
    })
}

fn looks_like_phone(record: &StringRecord) -> bool {
    record
        .get(0)
        .map(|cell| normalize_phone(cell).is_ok())
        .unwrap_or(false)
}

fn row_variables(headers: &StringRecord, record: &StringRecord, phone_column: usize) -> Variables {
    headers
        .iter()
        .zip(record.iter())
        .enumerate()
        .filter(|(i, (header, value))| {
            *i != phone_column && !header.is_empty() && !value.is_empty()
        })
        .map(|(_, (header, value))| (header.to_string(), value.to_string()))
        .collect()
}
