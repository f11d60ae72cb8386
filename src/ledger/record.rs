//! Ledger record format
//!
//! One record per line: `identity,YYYY-MM-DD,display_name,0|1`.

use chrono::NaiveDate;

/// Header row written when the ledger is created
pub const HEADER: &str = "Identity,Date Processed,Name,Problematic";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A single completion record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Document identity token
    pub identity: String,
    /// Date of the last successful transform (`None` if unreadable)
    pub last_processed: Option<NaiveDate>,
    /// File name at the time of processing
    pub display_name: String,
    /// Reprocess on the next run regardless of date
    pub problematic: bool,
}

impl LedgerEntry {
    pub fn new(
        identity: impl Into<String>,
        date: NaiveDate,
        display_name: &str,
        problematic: bool,
    ) -> Self {
        Self {
            identity: identity.into(),
            last_processed: Some(date),
            display_name: sanitize_display_name(display_name),
            problematic,
        }
    }

    /// Parse a record line. Returns `None` for blank lines or lines without
    /// an identity.
    pub fn parse_line(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
        let identity = identity_field(line)?;

        let last_processed = fields
            .get(1)
            .and_then(|d| NaiveDate::parse_from_str(d, DATE_FORMAT).ok());

        let (display_name, problematic) = match fields.len() {
            0..=2 => (String::new(), false),
            3 => (fields[2].to_string(), false),
            n => (fields[2..n - 1].join("_"), fields[n - 1] == "1"),
        };

        Some(Self {
            identity: identity.to_string(),
            last_processed,
            display_name,
            problematic,
        })
    }

    /// Render the record as a ledger line (without newline)
    pub fn to_line(&self) -> String {
        let date = self
            .last_processed
            .map(|d| d.format(DATE_FORMAT).to_string())
            .unwrap_or_default();
        format!(
            "{},{},{},{}",
            self.identity,
            date,
            sanitize_display_name(&self.display_name),
            u8::from(self.problematic)
        )
    }
}

/// Identity column of a raw ledger line
pub(crate) fn identity_field(line: &str) -> Option<&str> {
    let id = line.trim().split(',').next()?.trim();
    (!id.is_empty()).then_some(id)
}

/// Make a file name safe for a comma-separated line
pub fn sanitize_display_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .map(|c| if c == ',' { '_' } else { c })
        .collect()
}
