//! End-to-end flow: shared channel, live sequencing, gap backfill and the
//! execution log, wired through the registry.

use std::sync::Arc;

use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tradeline::domain::{Direction, Execution, SequenceContext};
use tradeline::infrastructure::backfill::Backfiller;
use tradeline::infrastructure::config::exchange::LimitSettings;
use tradeline::infrastructure::config::settings::Config;
use tradeline::infrastructure::log::{read_log, ExecutionLogWriter, LogFormat, LogRecord};
use tradeline::infrastructure::registry::ExchangeRegistry;
use tradeline::testkit::config;
use tradeline::testkit::domain::{trade, MemoryTradeSource};
use tradeline::testkit::transport::scripted_connector;

fn extract(msg: &Value) -> Option<String> {
    msg["channel"].as_str().map(str::to_owned)
}

fn registry_config() -> Config {
    let mut settings = config::exchange();
    settings.padding = 1_000;
    settings.ack_timeout_ms = 100;
    settings.limit = Some(LimitSettings {
        permits: 10,
        refresh_ms: 3_600_000,
        persist: false,
    });

    let mut config = Config {
        reconnection: config::reconnection(),
        ..Config::default()
    };
    config.exchanges.insert("scripted".into(), settings);
    config
}

fn trade_frame(key: &str, side: &str, price: i64, time_ms: i64) -> Value {
    json!({"channel": key, "data": {"side": side, "price": price, "size": "1", "ts": time_ms}})
}

#[tokio::test(start_paused = true)]
async fn live_trades_and_backfill_share_one_id_scheme() {
    let (connector, mut server) = scripted_connector();
    let registry = ExchangeRegistry::new(registry_config(), Arc::new(connector)).unwrap();
    let channel = registry.channel("scripted", extract).unwrap();
    let sequencer = registry.sequencer("scripted").unwrap();

    // Two connectors of the same exchange share the channel and its connection.
    let mut first = channel.subscribe(config::topic("trades"));
    let mut second = registry
        .channel("scripted", |_| None)
        .unwrap()
        .subscribe(config::topic("trades"));
    assert_eq!(server.next_sent().await.unwrap()["op"], "subscribe");

    server.push(config::ack("trades"));
    server.push(trade_frame("trades", "buy", 100, 5_000));
    server.push(trade_frame("trades", "buy", 101, 5_000));

    let mut context = SequenceContext::default();
    let mut live: Vec<Execution> = Vec::new();
    for _ in 0..2 {
        let frame = first.next().await.unwrap().unwrap();
        let copy = second.next().await.unwrap().unwrap();
        assert_eq!(frame, copy);

        let data = &frame["data"];
        let direction: Direction = data["side"].as_str().unwrap().parse().unwrap();
        let price = Decimal::from(data["price"].as_i64().unwrap());
        let time_ms = data["ts"].as_i64().unwrap();
        live.push(sequencer.create_execution(direction, Decimal::ONE, price, time_ms, &mut context));
    }
    assert_eq!(server.connect_count(), 1);

    // The connection drops; the gap is filled from REST history.
    server.drop_connection();
    let history = MemoryTradeSource::new(
        vec![
            trade(Direction::Buy, 100, 5_000),
            trade(Direction::Buy, 101, 5_000),
            trade(Direction::Sell, 99, 5_000),
            trade(Direction::Sell, 98, 5_001),
        ],
        3,
    );
    let backfiller = Backfiller::new((*sequencer).clone());
    let missed = backfiller
        .trades_after(live.last().unwrap().id, &history)
        .await
        .unwrap();
    assert_eq!(missed.len(), 2);
    assert_eq!(sequencer.decode(missed[0].id), (5_000, 2));

    // Both subscriptions come back after the reconnect.
    assert_eq!(server.next_sent().await.unwrap()["channel"], "trades");
    server.push(config::ack("trades"));
    server.push(trade_frame("trades", "sell", 97, 5_002));
    assert_eq!(first.next().await.unwrap().unwrap()["data"]["price"], 97);
    assert_eq!(second.next().await.unwrap().unwrap()["data"]["price"], 97);

    let dir = tempfile::tempdir().unwrap();
    {
        let mut writer = ExecutionLogWriter::new(dir.path(), LogFormat::Compact).unwrap();
        for execution in live.iter().chain(&missed) {
            writer
                .append(&LogRecord::from_execution(execution, "-", "-"))
                .unwrap();
        }
    }

    let stored = read_log(&dir.path().join("execution19700101.clog")).unwrap();
    let ids: Vec<u64> = stored.iter().map(|record| record.id).collect();
    assert_eq!(ids, vec![5_000_000, 5_000_001, 5_000_002, 5_001_000]);

    // Each live subscribe frame took one permit from the shared quota.
    let limiter = registry.limiter("scripted").unwrap().unwrap();
    assert_eq!(limiter.available(), 8);
}
