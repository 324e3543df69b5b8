//! Integration tests for daily execution log files.

use std::fs;

use rust_decimal_macros::dec;
use tradeline::domain::{Direction, SequenceContext, Sequencer};
use tradeline::infrastructure::log::{
    compact, expand, read_log, ExecutionLogWriter, LogFormat, LogRecord,
};

// 2024-01-02T23:59:59.998Z
const NEAR_MIDNIGHT: i64 = 1_704_239_999_998;

fn records_from_trades() -> Vec<LogRecord> {
    let sequencer = Sequencer::with_default_padding("bitflyer");
    let mut context = SequenceContext::default();
    let trades = [
        (Direction::Buy, dec!(0.01), dec!(6500000), NEAR_MIDNIGHT),
        (Direction::Buy, dec!(0.02), dec!(6500000), NEAR_MIDNIGHT),
        (Direction::Sell, dec!(1.5), dec!(6499995), NEAR_MIDNIGHT + 1),
        (Direction::Sell, dec!(0.3), dec!(6499990), NEAR_MIDNIGHT + 2),
        (Direction::Buy, dec!(0.3), dec!(6500010), NEAR_MIDNIGHT + 2),
    ];

    trades
        .into_iter()
        .enumerate()
        .map(|(i, (direction, size, price, time_ms))| {
            let execution = sequencer.create_execution(direction, size, price, time_ms, &mut context);
            LogRecord::from_execution(&execution, format!("B{}", i / 2), format!("{}", 900 + i))
        })
        .collect()
}

#[test]
fn writer_rolls_over_at_utc_midnight() {
    let dir = tempfile::tempdir().unwrap();
    let records = records_from_trades();

    {
        let mut writer = ExecutionLogWriter::new(dir.path(), LogFormat::Compact).unwrap();
        for record in &records {
            writer.append(record).unwrap();
        }
        writer.flush().unwrap();
    }

    let first = read_log(&dir.path().join("execution20240102.clog")).unwrap();
    let second = read_log(&dir.path().join("execution20240103.clog")).unwrap();

    assert_eq!(first, records[..3].to_vec());
    assert_eq!(second, records[3..].to_vec());
}

#[test]
fn compacted_rows_reuse_previous_fields() {
    let dir = tempfile::tempdir().unwrap();
    let records = records_from_trades();
    let full = dir.path().join("day.log");
    let compacted = dir.path().join("day.clog");

    {
        let mut writer = ExecutionLogWriter::new(dir.path(), LogFormat::Full).unwrap();
        for record in &records[..3] {
            writer.append(record).unwrap();
        }
    }
    fs::rename(dir.path().join("execution20240102.log"), &full).unwrap();

    assert_eq!(compact(&full, &compacted).unwrap(), 3);
    let rows: Vec<String> = fs::read_to_string(&compacted)
        .unwrap()
        .lines()
        .map(str::to_owned)
        .collect();

    // Same millisecond, side, price and buyer: only size and seller change.
    assert_eq!(rows[1], "    2  1");
    assert!(rows.iter().all(|row| row.split(' ').count() == 7));

    let restored = dir.path().join("restored.log");
    assert_eq!(expand(&compacted, &restored).unwrap(), 3);
    assert_eq!(
        fs::read_to_string(&restored).unwrap(),
        fs::read_to_string(&full).unwrap()
    );
}

#[test]
fn unknown_extension_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("execution20240102.txt");
    fs::write(&path, "").unwrap();

    assert!(read_log(&path).is_err());
}
