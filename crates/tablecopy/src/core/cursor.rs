//! Forward-only row cursors.
//!
//! Drivers read rows in a spawned producer task and hand them to the copier
//! through a bounded channel, the same backpressure arrangement the readers
//! use for batches. The producer first reports whether the query could be
//! opened, then streams rows until the result set is exhausted, an error
//! occurs, or the consumer drops the cursor.
//!
//! A closed channel only means end of data once the producer task has
//! finished cleanly. A panicked or aborted producer surfaces as an error
//! item instead of a short result set.

use std::future::Future;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};

use super::value::Row;
use crate::error::{CopyError, Result};

/// Default number of rows buffered between producer and consumer.
pub const DEFAULT_CURSOR_BUFFER: usize = 1024;

/// Producer side of a [`RowCursor`].
pub struct CursorSink {
    opened: Option<oneshot::Sender<Result<()>>>,
    tx: mpsc::Sender<Result<Row>>,
}

impl CursorSink {
    /// Report that the query is open and rows will follow.
    pub fn opened(&mut self) {
        if let Some(tx) = self.opened.take() {
            let _ = tx.send(Ok(()));
        }
    }

    /// Send one row. Returns `false` once the consumer is gone, which tells
    /// the producer to stop reading.
    pub async fn send(&mut self, row: Row) -> bool {
        self.opened();
        self.tx.send(Ok(row)).await.is_ok()
    }

    /// Report a failure. Before [`opened`](Self::opened) it fails the open
    /// call, afterwards it is delivered as the next cursor item.
    pub async fn fail(&mut self, err: CopyError) {
        match self.opened.take() {
            Some(tx) => {
                let _ = tx.send(Err(err));
            }
            None => {
                let _ = self.tx.send(Err(err)).await;
            }
        }
    }
}

/// Forward-only, read-only iterator over a query's rows.
pub struct RowCursor {
    rx: mpsc::Receiver<Result<Row>>,
    producer: Option<JoinHandle<()>>,
}

impl RowCursor {
    /// Spawn `producer` and wait until it reports the query open.
    pub async fn spawn<F, Fut>(buffer: usize, producer: F) -> Result<Self>
    where
        F: FnOnce(CursorSink) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (opened_tx, opened_rx) = oneshot::channel();
        let sink = CursorSink {
            opened: Some(opened_tx),
            tx,
        };
        let handle = tokio::spawn(producer(sink));

        match opened_rx.await {
            Ok(Ok(())) => Ok(Self {
                rx,
                producer: Some(handle),
            }),
            Ok(Err(e)) => Err(e),
            // The sink was dropped before reporting anything. That is an
            // empty result set only if the producer returned normally.
            Err(_) => match handle.await {
                Ok(()) => Ok(Self { rx, producer: None }),
                Err(e) => Err(producer_failed(e)),
            },
        }
    }

    /// Cursor over rows already in memory.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let (tx, rx) = mpsc::channel(rows.len().max(1));
        for row in rows {
            // Capacity covers every row, so this never fails.
            let _ = tx.try_send(Ok(row));
        }
        Self { rx, producer: None }
    }

    /// Next row, `None` when the result set is exhausted.
    pub async fn next(&mut self) -> Option<Result<Row>> {
        if let Some(item) = self.rx.recv().await {
            return Some(item);
        }
        let handle = self.producer.take()?;
        match handle.await {
            Ok(()) => None,
            Err(e) => Some(Err(producer_failed(e))),
        }
    }
}

fn producer_failed(e: JoinError) -> CopyError {
    if e.is_panic() {
        CopyError::Database(format!("Reader task panicked: {}", e))
    } else {
        CopyError::Database(format!("Reader task stopped before the end of the result set: {}", e))
    }
}

impl Drop for RowCursor {
    fn drop(&mut self) {
        if let Some(handle) = self.producer.take() {
            handle.abort();
        }
    }
}
