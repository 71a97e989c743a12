use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::ledger::{BlockRange, EventFilter, EventSubscription, Ledger, LedgerEvent, LedgerResult};
use crate::transport::Delivery;

// ─── EventFeed ────────────────────────────────────────────────────────────

/// New ledger events matching one filter, in ledger order.
///
/// Backed by a Tokio mpsc channel. A background task either forwards a push
/// subscription or polls `get_past_events` on an interval. Dropping the feed
/// closes the receiver and the task exits at its next send or tick.
///
/// On push transports the subscription is opened first and the blocks from
/// the start block up to the head are then backfilled from history. Live
/// events at or before the last backfilled position are dropped, so an event
/// recorded while the subscription was being set up is delivered exactly once.
///
/// ```rust,ignore
/// let mut feed = EventFeed::open(ledger, filter, None, Delivery::Push).await?;
/// while let Some(event) = feed.next().await {
///     println!("{:?}", event?.payload);
/// }
/// ```
pub struct EventFeed {
    rx: mpsc::Receiver<LedgerResult<LedgerEvent>>,
    start_block: u64,
}

impl EventFeed {
    /// Open a feed delivering events at or after `from_block`; `None` means
    /// the block after the current head.
    ///
    /// Returns once the feed is live: the start block is fixed and, on push
    /// transports, the subscription is established before this resolves.
    pub async fn open<L>(
        ledger: Arc<L>,
        filter: EventFilter,
        from_block: Option<u64>,
        delivery: Delivery,
    ) -> LedgerResult<Self>
    where
        L: Ledger + ?Sized + 'static,
    {
        let (tx, rx) = mpsc::channel(64);

        let start_block = match from_block {
            Some(b) => b,
            None => ledger.block_number().await? + 1,
        };
        match delivery {
            Delivery::Push => {
                let subscription = ledger.subscribe(&filter).await?;
                tokio::spawn(push(ledger, filter, subscription, start_block, tx));
            }
            Delivery::Poll(interval) => {
                tokio::spawn(poll(ledger, filter, start_block, interval, tx));
            }
        }

        tracing::debug!(start_block, ?delivery, "event feed opened");
        Ok(EventFeed { rx, start_block })
    }

    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    /// Test-only constructor: wrap a raw receiver as a feed.
    #[cfg(test)]
    pub(crate) fn from_channel(rx: mpsc::Receiver<LedgerResult<LedgerEvent>>) -> Self {
        Self { rx, start_block: 0 }
    }
}

impl Stream for EventFeed {
    type Item = LedgerResult<LedgerEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// ─── Push ─────────────────────────────────────────────────────────────────

async fn push<L>(
    ledger: Arc<L>,
    filter: EventFilter,
    subscription: EventSubscription,
    start_block: u64,
    tx: mpsc::Sender<LedgerResult<LedgerEvent>>,
) where
    L: Ledger + ?Sized,
{
    let mut backfilled = None;
    match backfill(ledger.as_ref(), &filter, start_block).await {
        Ok(events) => {
            tracing::debug!(start_block, count = events.len(), "backfilled");
            for event in events {
                backfilled = Some(event.position());
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        }
        Err(e) => {
            if tx.send(Err(e)).await.is_err() {
                return;
            }
        }
    }
    forward(subscription, start_block, backfilled, tx).await;
}

/// History from `start_block` up to the current head, in ledger order.
async fn backfill<L>(ledger: &L, filter: &EventFilter, start_block: u64) -> LedgerResult<Vec<LedgerEvent>>
where
    L: Ledger + ?Sized,
{
    let head = ledger.block_number().await?;
    if head < start_block {
        return Ok(Vec::new());
    }
    let mut events = ledger
        .get_past_events(filter, BlockRange::new(start_block, head))
        .await?;
    events.sort_by_key(LedgerEvent::position);
    Ok(events)
}

/// Forward live events, dropping those before `start_block` or at or before
/// the `backfilled` position.
async fn forward(
    mut subscription: EventSubscription,
    start_block: u64,
    backfilled: Option<(u64, u64)>,
    tx: mpsc::Sender<LedgerResult<LedgerEvent>>,
) {
    loop {
        let item = tokio::select! {
            _ = tx.closed() => break,
            item = subscription.next() => item,
        };
        match item {
            None => break,
            Some(Ok(event)) if event.block_number < start_block => {
                tracing::debug!(block = event.block_number, start_block, "dropping stale event");
            }
            Some(Ok(event)) if backfilled.is_some_and(|seen| event.position() <= seen) => {
                tracing::debug!(block = event.block_number, "dropping backfilled event");
            }
            Some(item) => {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("push feed stopped");
}

// ─── Poll ─────────────────────────────────────────────────────────────────

async fn poll<L>(
    ledger: Arc<L>,
    filter: EventFilter,
    start_block: u64,
    interval: std::time::Duration,
    tx: mpsc::Sender<LedgerResult<LedgerEvent>>,
) where
    L: Ledger + ?Sized,
{
    let mut next_block = start_block;
    loop {
        tokio::select! {
            _ = tx.closed() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let head = match ledger.block_number().await {
            Ok(head) => head,
            Err(e) => {
                if tx.send(Err(e)).await.is_err() {
                    break;
                }
                continue;
            }
        };
        if head < next_block {
            continue;
        }

        match ledger
            .get_past_events(&filter, BlockRange::new(next_block, head))
            .await
        {
            Ok(mut events) => {
                events.sort_by_key(LedgerEvent::position);
                tracing::debug!(from = next_block, to = head, count = events.len(), "polled");
                for event in events {
                    if tx.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
                next_block = head + 1;
            }
            Err(e) => {
                if tx.send(Err(e)).await.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("poll feed stopped");
}

// ─── Tests ────────────────────────────────────────────────────────────────
