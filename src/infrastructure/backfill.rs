//! Gap filling after a reconnect.
//!
//! Most history endpoints filter by time, not by id. [`Backfiller`] turns
//! "everything after id X" into time-filtered REST pages, re-sequences the
//! trades with one [`SequenceContext`] and drops what the caller already has.
//! Exchanges without trade history are filled from candles instead.

use tracing::{debug, info};

use crate::domain::{Execution, SequenceContext, Sequencer, Span};
use crate::error::Result;
use crate::port::{CandleSource, RawTrade, TradeSource};

/// Fills execution gaps for one exchange.
#[derive(Debug, Clone)]
pub struct Backfiller {
    sequencer: Sequencer,
}

impl Backfiller {
    pub fn new(sequencer: Sequencer) -> Self {
        Self { sequencer }
    }

    #[must_use]
    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    /// Executions strictly after the synthetic id `last_id`, oldest first.
    ///
    /// The resume time is decoded from `last_id`, so it must come from this
    /// backfiller's sequencer. Streams carrying native exchange ids resume
    /// with [`Self::trades_since`] instead.
    pub async fn trades_after(
        &self,
        last_id: u64,
        source: &dyn TradeSource,
    ) -> Result<Vec<Execution>> {
        let from_ms = self.sequencer.compute_epoch_time(last_id);
        self.page_from(from_ms, last_id, source).await
    }

    /// Executions strictly after `last`, oldest first.
    ///
    /// Resumes at `last.time_ms`, whatever kind of id `last` carries.
    pub async fn trades_since(
        &self,
        last: &Execution,
        source: &dyn TradeSource,
    ) -> Result<Vec<Execution>> {
        self.page_from(last.time_ms, last.id, source).await
    }

    /// Page through `source` starting at `from_ms`, keeping ids past `last_id`.
    ///
    /// Each following page starts at the last trade's time and skips the
    /// trades already taken at that boundary millisecond. A page with nothing
    /// past the boundary moves on to the next millisecond, so a single
    /// millisecond with more trades than one page is truncated. Stops at the
    /// first empty page.
    async fn page_from(
        &self,
        mut from_ms: i64,
        last_id: u64,
        source: &dyn TradeSource,
    ) -> Result<Vec<Execution>> {
        let mut context = SequenceContext::default();
        let mut executions: Vec<Execution> = Vec::new();
        let mut taken_at_boundary = 0usize;
        let mut pages = 0usize;

        loop {
            let page = source.trades_from(from_ms).await?;
            pages += 1;
            if page.is_empty() {
                break;
            }

            let fresh: Vec<RawTrade> = page.into_iter().skip(taken_at_boundary).collect();
            let Some(last_time) = fresh.last().map(|trade| trade.time_ms) else {
                // The page holds nothing past the boundary millisecond.
                debug!(from_ms, "Boundary millisecond exhausted");
                from_ms += 1;
                taken_at_boundary = 0;
                continue;
            };
            debug!(from_ms, trades = fresh.len(), "Backfill page");

            let at_last_time = fresh.iter().filter(|t| t.time_ms == last_time).count();
            for trade in fresh {
                executions.push(self.sequence(trade, &mut context));
            }

            if last_time == from_ms {
                taken_at_boundary += at_last_time;
            } else {
                from_ms = last_time;
                taken_at_boundary = at_last_time;
            }
        }

        let fetched = executions.len();
        executions.retain(|execution| execution.id > last_id);
        info!(
            source = %self.sequencer.source(),
            last_id,
            pages,
            fetched,
            kept = executions.len(),
            "Trade backfill complete"
        );
        Ok(executions)
    }

    fn sequence(&self, trade: RawTrade, context: &mut SequenceContext) -> Execution {
        match trade.id {
            Some(id) => Execution {
                id,
                direction: trade.direction,
                size: trade.size,
                price: trade.price,
                time_ms: trade.time_ms,
                consecutive: Sequencer::compute_consecutive(
                    trade.direction,
                    trade.time_ms,
                    context,
                ),
                source_tag: self.sequencer.source().to_owned(),
            },
            None => self.sequencer.create_execution(
                trade.direction,
                trade.size,
                trade.price,
                trade.time_ms,
                context,
            ),
        }
    }

    /// Pseudo executions reconstructed from candles in `[start_ms, end_ms)`.
    ///
    /// Truncated pages are continued one span after the last bar. Ids are
    /// strictly increasing; records that would not advance the id are
    /// dropped.
    pub async fn candles(
        &self,
        start_ms: i64,
        end_ms: i64,
        span: Span,
        source: &dyn CandleSource,
    ) -> Result<Vec<Execution>> {
        let mut executions: Vec<Execution> = Vec::new();
        let mut start = start_ms;
        let mut bars = 0usize;

        while start < end_ms {
            let page = source.candles(span, start, end_ms).await?;
            let Some(next) = page.last().map(|bar| bar.time_ms + span.millis()) else {
                break;
            };

            for candle in page.iter().filter(|bar| bar.time_ms >= start) {
                bars += 1;
                for execution in self.sequencer.create_executions(candle) {
                    if executions.last().map_or(true, |prev| execution.id > prev.id) {
                        executions.push(execution);
                    }
                }
            }

            if next <= start {
                break;
            }
            start = next;
        }

        info!(
            source = %self.sequencer.source(),
            span = %span,
            bars,
            executions = executions.len(),
            "Candle backfill complete"
        );
        Ok(executions)
    }
}
