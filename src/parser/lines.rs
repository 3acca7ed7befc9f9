use super::rows::{self, PriceRow, RowFormat, RowSkip};

const DATE_MARKER: &str = "fecha de plaza";

/// What one line of page text carries. A line can be both a date marker and
/// a candidate row; both are checked independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub date: Option<String>,
    pub row: Result<PriceRow, RowSkip>,
}

pub fn classify_line(line: &str, format: &RowFormat) -> Line {
    Line {
        date: date_marker(line),
        row: rows::parse_row(line, format),
    }
}

/// `Fecha de plaza: 15/06/2024` → `15/06/2024`. Everything after the first
/// colon, trimmed. A marker line without a colon yields nothing.
pub fn date_marker(line: &str) -> Option<String> {
    if !line.to_lowercase().contains(DATE_MARKER) {
        return None;
    }
    line.split_once(':').map(|(_, rest)| rest.trim().to_string())
}
