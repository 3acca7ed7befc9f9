use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::snapshot::PriceRecord;

static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[+-]?\d+(\.\d+)?$").unwrap());

const HEADER_WORD: &str = "producto";

/// How many trailing tokens of a row are fixed-position fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLayout {
    /// `… unit min max mode avg`: one token serves as both unit and wholesaler.
    Five,
    /// `… unit wholesaler min max mode avg`.
    Six,
}

impl RowLayout {
    fn trailing(self) -> usize {
        match self {
            RowLayout::Five => 5,
            RowLayout::Six => 6,
        }
    }

    fn default_min_tokens(self) -> usize {
        match self {
            RowLayout::Five => 5,
            RowLayout::Six => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Fixed(RowLayout),
    /// Try the six-field layout, fall back to five when it rejects the line.
    SixThenFive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowFormat {
    pub mode: ParseMode,
    /// Overrides the per-layout minimum token count.
    pub min_tokens: Option<usize>,
}

impl Default for RowFormat {
    fn default() -> Self {
        Self::fixed(RowLayout::Five)
    }
}

impl RowFormat {
    pub fn fixed(layout: RowLayout) -> Self {
        Self {
            mode: ParseMode::Fixed(layout),
            min_tokens: None,
        }
    }

    fn min_tokens_for(&self, layout: RowLayout) -> usize {
        self.min_tokens.unwrap_or_else(|| layout.default_min_tokens())
    }
}

/// Why a line did not produce a row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowSkip {
    #[error("{found} tokens, need at least {min}")]
    TooFewTokens { found: usize, min: usize },
    #[error("non-numeric value {0:?}")]
    NotNumeric(String),
    #[error("empty product name")]
    EmptyProduct,
    #[error("header row")]
    HeaderRow,
}

/// The fields of one data line, before a date is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceRow {
    pub product: String,
    pub unit: String,
    pub wholesaler: String,
    pub minimum: String,
    pub maximum: String,
    pub mode: String,
    pub average: String,
}

impl PriceRow {
    pub fn with_date(self, date: &str) -> PriceRecord {
        PriceRecord {
            product: self.product,
            unit: self.unit,
            wholesaler: self.wholesaler,
            minimum: self.minimum,
            maximum: self.maximum,
            mode: self.mode,
            average: self.average,
            effective_date: date.to_string(),
        }
    }
}

pub fn parse_row(line: &str, format: &RowFormat) -> Result<PriceRow, RowSkip> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match format.mode {
        ParseMode::Fixed(layout) => parse_tokens(&tokens, layout, format.min_tokens_for(layout)),
        ParseMode::SixThenFive => {
            parse_tokens(&tokens, RowLayout::Six, format.min_tokens_for(RowLayout::Six)).or_else(
                |_| parse_tokens(&tokens, RowLayout::Five, format.min_tokens_for(RowLayout::Five)),
            )
        }
    }
}

fn parse_tokens(tokens: &[&str], layout: RowLayout, min: usize) -> Result<PriceRow, RowSkip> {
    let trailing = layout.trailing();
    if tokens.len() < min.max(trailing) {
        return Err(RowSkip::TooFewTokens {
            found: tokens.len(),
            min: min.max(trailing),
        });
    }

    let split = tokens.len() - trailing;
    let (head, tail) = tokens.split_at(split);

    // Last four tokens are always min/max/mode/avg.
    let first = trailing - 4;
    let amount = |i: usize| {
        normalize_amount(tail[i]).ok_or_else(|| RowSkip::NotNumeric(tail[i].to_string()))
    };
    let minimum = amount(first)?;
    let maximum = amount(first + 1)?;
    let mode = amount(first + 2)?;
    let average = amount(first + 3)?;

    let product = head.join(" ");
    if product.trim().is_empty() {
        return Err(RowSkip::EmptyProduct);
    }
    if product.to_lowercase().starts_with(HEADER_WORD) {
        return Err(RowSkip::HeaderRow);
    }

    let (unit, wholesaler) = match layout {
        RowLayout::Five => (tail[0].to_string(), tail[0].to_string()),
        RowLayout::Six => (tail[0].to_string(), tail[1].to_string()),
    };
    Ok(PriceRow {
        product,
        unit,
        wholesaler,
        minimum,
        maximum,
        mode,
        average,
    })
}

/// Normalize a price token to plain decimal text (`1.250,50` → `1250.50`,
/// `500,00` → `500.00`, `12,500` → `12500`). `None` if it is not a number.
pub fn normalize_amount(token: &str) -> Option<String> {
    let cleaned = match (token.rfind(','), token.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => {
            format!("{}.{}", token[..comma].replace('.', ""), &token[comma + 1..])
        }
        (Some(comma), None) if is_decimal_comma(token, comma) => token.replace(',', "."),
        _ => token.replace(',', ""),
    };
    AMOUNT_RE.is_match(&cleaned).then_some(cleaned)
}

fn is_decimal_comma(token: &str, comma: usize) -> bool {
    let fraction = &token[comma + 1..];
    token.matches(',').count() == 1
        && (1..=2).contains(&fraction.len())
        && fraction.chars().all(|c| c.is_ascii_digit())
}
