//! Row codec for persisted execution logs.
//!
//! Every row holds seven space-separated fields:
//! `id time mark price size buyer seller`.
//!
//! A raw row stores each field literally. A delta row stores each field
//! against the previous record and leaves it empty when it has its default:
//!
//! | field  | stored as                        | empty when      |
//! |--------|----------------------------------|-----------------|
//! | id     | `id - prev.id`                   | difference is 1 |
//! | time   | `time - prev.time`               | difference is 0 |
//! | mark   | `+` / `-`                        | side unchanged  |
//! | price  | `price - prev.price`             | difference is 0 |
//! | size   | `size * 100` (absolute)          | size unchanged  |
//! | tags   | numeric difference, or literal   | tag unchanged   |
//!
//! Sizes must therefore be exact multiples of 0.01. A tag is written as a
//! difference only when both it and the previous tag are plain integers.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Direction, Execution, Price, Size};
use crate::error::CodecError;

/// Fields per row.
pub const FIELD_COUNT: usize = 7;

const SIZE_SCALE: Decimal = Decimal::ONE_HUNDRED;

/// One persisted execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: u64,
    pub time_ms: i64,
    pub direction: Direction,
    pub price: Price,
    pub size: Size,
    pub buyer: String,
    pub seller: String,
}

impl LogRecord {
    /// Record an execution with the given counterparty tags.
    pub fn from_execution(
        execution: &Execution,
        buyer: impl Into<String>,
        seller: impl Into<String>,
    ) -> Self {
        Self {
            id: execution.id,
            time_ms: execution.time_ms,
            direction: execution.direction,
            price: execution.price,
            size: execution.size,
            buyer: buyer.into(),
            seller: seller.into(),
        }
    }
}

fn check_tag(tag: &str) -> Result<(), CodecError> {
    if tag.is_empty() || tag.chars().any(char::is_whitespace) {
        return Err(CodecError::InvalidTag(tag.to_owned()));
    }
    Ok(())
}

/// Integer value of a tag written in canonical form.
fn numeric_tag(tag: &str) -> Option<i128> {
    tag.parse::<i128>()
        .ok()
        .filter(|value| value.to_string() == tag)
}

/// Encode `record` as a raw row.
pub fn encode_raw(record: &LogRecord) -> Result<String, CodecError> {
    check_tag(&record.buyer)?;
    check_tag(&record.seller)?;

    Ok(format!(
        "{} {} {} {} {} {} {}",
        record.id,
        record.time_ms,
        record.direction.mark(),
        record.price.normalize(),
        record.size.normalize(),
        record.buyer,
        record.seller,
    ))
}

/// Encode `record` as a delta row against `previous`.
pub fn encode_delta(record: &LogRecord, previous: &LogRecord) -> Result<String, CodecError> {
    let id = i128::from(record.id) - i128::from(previous.id);
    let time = i128::from(record.time_ms) - i128::from(previous.time_ms);
    let price = record.price - previous.price;

    let fields = [
        if id == 1 { String::new() } else { id.to_string() },
        if time == 0 { String::new() } else { time.to_string() },
        if record.direction == previous.direction {
            String::new()
        } else {
            record.direction.mark().to_owned()
        },
        if price.is_zero() {
            String::new()
        } else {
            price.normalize().to_string()
        },
        encode_size(record.size, previous.size)?,
        encode_tag(&record.buyer, &previous.buyer)?,
        encode_tag(&record.seller, &previous.seller)?,
    ];
    Ok(fields.join(" "))
}

fn encode_size(size: Size, previous: Size) -> Result<String, CodecError> {
    if size == previous {
        return Ok(String::new());
    }
    let scaled = size * SIZE_SCALE;
    if !scaled.fract().is_zero() {
        return Err(CodecError::InexactSize(size));
    }
    Ok(scaled.normalize().to_string())
}

fn encode_tag(tag: &str, previous: &str) -> Result<String, CodecError> {
    check_tag(tag)?;
    if tag == previous {
        return Ok(String::new());
    }

    match (numeric_tag(tag), numeric_tag(previous)) {
        (Some(current), Some(previous)) => current
            .checked_sub(previous)
            .map(|diff| diff.to_string())
            .ok_or_else(|| CodecError::InvalidTag(tag.to_owned())),
        // Would be read back as a difference.
        (None, Some(_)) if tag.parse::<i128>().is_ok() => Err(CodecError::InvalidTag(tag.to_owned())),
        _ => Ok(tag.to_owned()),
    }
}

fn split(row: &str, line: usize) -> Result<[&str; FIELD_COUNT], CodecError> {
    let fields: Vec<&str> = row.split(' ').collect();
    <[&str; FIELD_COUNT]>::try_from(fields.as_slice()).map_err(|_| CodecError::MalformedRecord {
        line,
        found: fields.len(),
    })
}

fn number<T: std::str::FromStr>(value: &str, field: &'static str, line: usize) -> Result<T, CodecError> {
    value.parse().map_err(|_| CodecError::InvalidNumber {
        line,
        field,
        value: value.to_owned(),
    })
}

fn mark(value: &str, line: usize) -> Result<Direction, CodecError> {
    Direction::from_mark(value).map_err(|source| CodecError::InvalidMark { line, source })
}

/// Decode a raw row; `line` is reported in errors.
pub fn decode_raw(row: &str, line: usize) -> Result<LogRecord, CodecError> {
    let [id, time, side, price, size, buyer, seller] = split(row, line)?;
    check_tag(buyer)?;
    check_tag(seller)?;

    Ok(LogRecord {
        id: number(id, "id", line)?,
        time_ms: number(time, "time", line)?,
        direction: mark(side, line)?,
        price: number(price, "price", line)?,
        size: number(size, "size", line)?,
        buyer: buyer.to_owned(),
        seller: seller.to_owned(),
    })
}

/// Decode a delta row against the previously decoded record.
pub fn decode_delta(row: &str, previous: &LogRecord, line: usize) -> Result<LogRecord, CodecError> {
    let [id, time, side, price, size, buyer, seller] = split(row, line)?;

    let id = if id.is_empty() {
        i128::from(previous.id) + 1
    } else {
        i128::from(previous.id) + number::<i128>(id, "id", line)?
    };
    let time = if time.is_empty() {
        i128::from(previous.time_ms)
    } else {
        i128::from(previous.time_ms) + number::<i128>(time, "time", line)?
    };

    Ok(LogRecord {
        id: u64::try_from(id).map_err(|_| CodecError::InvalidNumber {
            line,
            field: "id",
            value: id.to_string(),
        })?,
        time_ms: i64::try_from(time).map_err(|_| CodecError::InvalidNumber {
            line,
            field: "time",
            value: time.to_string(),
        })?,
        direction: if side.is_empty() {
            previous.direction
        } else {
            mark(side, line)?
        },
        price: if price.is_empty() {
            previous.price
        } else {
            previous.price + number::<Decimal>(price, "price", line)?
        },
        size: if size.is_empty() {
            previous.size
        } else {
            number::<Decimal>(size, "size", line)? / SIZE_SCALE
        },
        buyer: decode_tag(buyer, &previous.buyer, line)?,
        seller: decode_tag(seller, &previous.seller, line)?,
    })
}

fn decode_tag(value: &str, previous: &str, line: usize) -> Result<String, CodecError> {
    if value.is_empty() {
        return Ok(previous.to_owned());
    }
    match (numeric_tag(previous), value.parse::<i128>()) {
        (Some(previous), Ok(diff)) => previous
            .checked_add(diff)
            .map(|tag| tag.to_string())
            .ok_or_else(|| CodecError::InvalidNumber {
                line,
                field: "tag",
                value: value.to_owned(),
            }),
        _ => {
            check_tag(value).map_err(|_| CodecError::InvalidNumber {
                line,
                field: "tag",
                value: value.to_owned(),
            })?;
            Ok(value.to_owned())
        }
    }
}

/// Stateful encoder writing the first record raw and the rest as deltas.
#[derive(Debug, Default)]
pub struct DeltaEncoder {
    previous: Option<LogRecord>,
}

impl DeltaEncoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue a file whose last record is `previous`.
    #[must_use]
    pub const fn resume(previous: LogRecord) -> Self {
        Self {
            previous: Some(previous),
        }
    }

    pub fn encode(&mut self, record: &LogRecord) -> Result<String, CodecError> {
        let row = match &self.previous {
            Some(previous) => encode_delta(record, previous)?,
            None => encode_raw(record)?,
        };
        self.previous = Some(record.clone());
        Ok(row)
    }
}

/// Stateful decoder mirroring [`DeltaEncoder`].
///
/// Stops being useful after the first error: every later row depends on it.
#[derive(Debug, Default)]
pub struct DeltaDecoder {
    previous: Option<LogRecord>,
    line: usize,
}

impl DeltaDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the row following the last one.
    pub fn decode(&mut self, row: &str) -> Result<LogRecord, CodecError> {
        self.decode_line(row, self.line + 1)
    }

    /// Decode a row read from `line`, for inputs with skipped lines.
    pub fn decode_line(&mut self, row: &str, line: usize) -> Result<LogRecord, CodecError> {
        self.line = line;
        let record = match &self.previous {
            Some(previous) => decode_delta(row, previous, line)?,
            None => decode_raw(row, line)?,
        };
        self.previous = Some(record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(id: u64, time_ms: i64) -> LogRecord {
        LogRecord {
            id,
            time_ms,
            direction: Direction::Buy,
            price: dec!(100.00),
            size: dec!(1.00),
            buyer: "b1".into(),
            seller: "s1".into(),
        }
    }

    #[test]
    fn time_only_change_leaves_other_fields_empty() {
        let a = record(1, 0);
        let b = record(2, 500);

        let row = encode_delta(&b, &a).unwrap();
        assert_eq!(row, " 500     ");
        assert_eq!(row.split(' ').collect::<Vec<_>>(), ["", "500", "", "", "", "", ""]);
        assert_eq!(decode_delta(&row, &a, 2).unwrap(), b);
    }

    #[test]
    fn raw_row_is_literal() {
        let row = encode_raw(&record(1, 0)).unwrap();
        assert_eq!(row, "1 0 + 100 1 b1 s1");
        assert_eq!(decode_raw(&row, 1).unwrap(), record(1, 0));
    }

    #[test]
    fn size_is_absolute_hundredths() {
        let a = record(1, 0);
        let mut b = record(2, 0);
        b.size = dec!(0.25);
        let mut c = record(3, 0);
        c.size = dec!(0.25);

        assert_eq!(encode_delta(&b, &a).unwrap(), "    25  ");
        assert_eq!(encode_delta(&c, &b).unwrap(), "      ");
    }

    #[test]
    fn size_below_hundredths_is_rejected() {
        let a = record(1, 0);
        let mut b = record(2, 0);
        b.size = dec!(0.001);

        assert_eq!(encode_delta(&b, &a), Err(CodecError::InexactSize(dec!(0.001))));
    }

    #[test]
    fn every_field_changing() {
        let a = record(10, 1_000);
        let b = LogRecord {
            id: 8,
            time_ms: 990,
            direction: Direction::Sell,
            price: dec!(99.5),
            size: dec!(3),
            buyer: "b1x".into(),
            seller: "s1".into(),
        };

        let row = encode_delta(&b, &a).unwrap();
        assert_eq!(row, "-2 -10 - -0.5 300 b1x ");
        assert_eq!(decode_delta(&row, &a, 2).unwrap(), b);
    }

    #[test]
    fn numeric_tags_are_differences() {
        let mut a = record(1, 0);
        a.buyer = "1000".into();
        a.seller = "7".into();
        let mut b = record(2, 0);
        b.buyer = "998".into();
        b.seller = "anon".into();

        let row = encode_delta(&b, &a).unwrap();
        assert_eq!(row, "     -2 anon");
        assert_eq!(decode_delta(&row, &a, 2).unwrap(), b);
    }

    #[test]
    fn numeric_tags_wider_than_i64_are_differences() {
        let mut a = record(1, 0);
        a.buyer = "5".into();
        a.seller = "99999999999999999999".into();
        let mut b = record(2, 0);
        b.buyer = "99999999999999999999".into();
        b.seller = "3".into();

        let row = encode_delta(&b, &a).unwrap();
        assert_eq!(row, "     99999999999999999994 -99999999999999999996");
        assert_eq!(decode_delta(&row, &a, 2).unwrap(), b);
    }

    #[test]
    fn tag_difference_overflow_is_rejected() {
        let mut a = record(1, 0);
        a.buyer = i128::MIN.to_string();
        let mut b = record(2, 0);
        b.buyer = i128::MAX.to_string();

        assert!(matches!(encode_delta(&b, &a), Err(CodecError::InvalidTag(_))));
    }

    #[test]
    fn non_canonical_number_after_numeric_tag_is_rejected() {
        let mut a = record(1, 0);
        a.buyer = "5".into();
        let mut b = record(2, 0);
        b.buyer = "007".into();

        assert!(matches!(encode_delta(&b, &a), Err(CodecError::InvalidTag(_))));
    }

    #[test]
    fn tags_with_whitespace_are_rejected() {
        let mut a = record(1, 0);
        a.buyer = "b 1".into();
        assert!(matches!(encode_raw(&a), Err(CodecError::InvalidTag(_))));
    }

    #[test]
    fn wrong_field_count_is_malformed() {
        let a = record(1, 0);
        assert_eq!(
            decode_delta(" 500", &a, 4),
            Err(CodecError::MalformedRecord { line: 4, found: 2 })
        );
    }

    #[test]
    fn bad_number_reports_field() {
        let err = decode_raw("x 0 + 1 1 a b", 1).unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidNumber {
                line: 1,
                field: "id",
                value: "x".into()
            }
        );
    }

    #[test]
    fn stateful_codec_chains_rows() {
        let records = vec![record(1, 0), record(2, 500), record(3, 500), record(10, 900)];

        let mut encoder = DeltaEncoder::new();
        let rows: Vec<String> = records.iter().map(|r| encoder.encode(r).unwrap()).collect();

        let mut decoder = DeltaDecoder::new();
        let decoded: Vec<LogRecord> = rows.iter().map(|r| decoder.decode(r).unwrap()).collect();
        assert_eq!(decoded, records);
        assert_eq!(rows[2], "      ");
    }
}
