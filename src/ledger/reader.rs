//! Ordered, resumable views over the ledger.

use std::{collections::VecDeque, future::Future, ops::RangeInclusive, time::Duration};

use futures::{stream, Stream};
use log::warn;
use tokio_util::sync::CancellationToken;

use crate::{
    db::models::{Block, Operation},
    error::LedgerError,
    ledger::client::Ledger,
};

/// Extra attempts the reader makes after the client has given up on a
/// transient fault, spaced by the poll interval.
const RECONNECT_ATTEMPTS: u32 = 3;

/// Wraps a [`Ledger`] handle and turns per-block lookups into infinite,
/// height-ordered streams.
#[derive(Clone)]
pub struct LedgerReader {
    ledger: Ledger,
    poll_interval: Duration,
}

struct Follow<T, F> {
    ledger: Ledger,
    cancel: CancellationToken,
    poll_interval: Duration,
    fetch: F,
    next: u64,
    head: u64,
    buffer: VecDeque<T>,
    done: bool,
}

/// Run `call`, re-running it on transient faults. Returns `Cancelled` as soon
/// as the token fires.
async fn with_reconnect<T, Fut>(
    cancel: &CancellationToken,
    poll_interval: Duration,
    mut call: impl FnMut() -> Fut,
) -> Result<T, LedgerError>
where
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let mut attempt = 0;
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(LedgerError::Cancelled),
            r = call() => r,
        };
        match result {
            Err(e) if e.is_transient() && attempt < RECONNECT_ATTEMPTS => {
                attempt += 1;
                warn!("Ledger connection lost ({e}), reconnecting ({attempt}/{RECONNECT_ATTEMPTS})");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(LedgerError::Cancelled),
                    _ = tokio::time::sleep(poll_interval) => {},
                }
            },
            other => return other,
        }
    }
}

impl LedgerReader {
    pub fn new(ledger: Ledger, poll_interval: Duration) -> Self {
        Self {
            ledger,
            poll_interval,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub async fn head_height(&self) -> Result<u64, LedgerError> {
        self.ledger.head_height().await
    }

    /// Every operation from block `from` onwards, in ledger order. Never ends
    /// on its own; ends cleanly when `cancel` fires and after yielding an
    /// unrecoverable error.
    pub fn stream(
        &self,
        from: u64,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<Operation, LedgerError>> + Send + 'static {
        self.follow(from, cancel, |ledger: Ledger, height| async move {
            ledger.get_ops_in_block(height).await
        })
    }

    /// Every block from `from` onwards.
    pub fn block_stream(
        &self,
        from: u64,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<Block, LedgerError>> + Send + 'static {
        self.follow(from, cancel, |ledger: Ledger, height| async move {
            ledger.get_blocks(&[height]).await
        })
    }

    /// A finite range of blocks, in height order.
    pub async fn blocks(&self, range: RangeInclusive<u64>) -> Result<Vec<Block>, LedgerError> {
        let heights: Vec<u64> = range.collect();
        if heights.is_empty() {
            return Ok(Vec::new());
        }
        self.ledger.get_blocks(&heights).await
    }

    fn follow<T, F, Fut>(
        &self,
        from: u64,
        cancel: CancellationToken,
        fetch: F,
    ) -> impl Stream<Item = Result<T, LedgerError>> + Send + 'static
    where
        T: Send + 'static,
        F: Fn(Ledger, u64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>, LedgerError>> + Send,
    {
        let state = Follow {
            ledger: self.ledger.clone(),
            cancel,
            poll_interval: self.poll_interval,
            fetch,
            next: from.max(1),
            head: 0,
            buffer: VecDeque::new(),
            done: false,
        };

        stream::unfold(state, |mut st| async move {
            loop {
                if let Some(item) = st.buffer.pop_front() {
                    return Some((Ok(item), st));
                }
                if st.done || st.cancel.is_cancelled() {
                    return None;
                }

                if st.next > st.head {
                    let ledger = st.ledger.clone();
                    match with_reconnect(&st.cancel, st.poll_interval, || ledger.head_height())
                        .await
                    {
                        Ok(head) => st.head = head,
                        Err(LedgerError::Cancelled) => return None,
                        Err(e) => {
                            st.done = true;
                            return Some((Err(e), st));
                        },
                    }
                    if st.next > st.head {
                        tokio::select! {
                            _ = st.cancel.cancelled() => return None,
                            _ = tokio::time::sleep(st.poll_interval) => {},
                        }
                    }
                    continue;
                }

                let height = st.next;
                let fetched = {
                    let fetch = &st.fetch;
                    let ledger = &st.ledger;
                    with_reconnect(&st.cancel, st.poll_interval, || fetch(ledger.clone(), height))
                        .await
                };
                match fetched {
                    Ok(items) => {
                        st.buffer.extend(items);
                        st.next += 1;
                    },
                    Err(LedgerError::Cancelled) => return None,
                    Err(e) => {
                        st.done = true;
                        return Some((Err(e), st));
                    },
                }
            }
        })
    }
}
