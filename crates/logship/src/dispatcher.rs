// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The queue between inputs and outputs.
//!
//! Inputs push into a bounded channel. The dispatcher runs each record through the filter
//! chain and hands a copy to every output. Each output is driven by its own task behind its
//! own bounded channel, so it only ever sees one record at a time and a stalled output slows
//! down the pipeline instead of growing a buffer.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::ForwardError;
use crate::plugin::{Filter, Output};
use crate::record::Record;

struct OutputHandle {
    tag: String,
    tx: mpsc::Sender<Record>,
    task: JoinHandle<()>,
}

/// Counters returned by [`Dispatcher::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub filtered: u64,
}

pub struct Dispatcher {
    rx: mpsc::Receiver<Record>,
    queue_size: usize,
    filters: Vec<Box<dyn Filter>>,
    outputs: Vec<OutputHandle>,
    cancel_token: CancellationToken,
}

impl Dispatcher {
    /// Creates the dispatcher and the sender inputs write into.
    #[must_use]
    pub fn new(queue_size: usize, cancel_token: CancellationToken) -> (Self, mpsc::Sender<Record>) {
        let queue_size = queue_size.max(1);
        let (tx, rx) = mpsc::channel(queue_size);
        let dispatcher = Self {
            rx,
            queue_size,
            filters: Vec::new(),
            outputs: Vec::new(),
            cancel_token,
        };
        (dispatcher, tx)
    }

    /// Appends a filter; filters run in the order they were added.
    pub fn add_filter(&mut self, filter: Box<dyn Filter>) {
        debug!(filter = filter.name(), "filter added");
        self.filters.push(filter);
    }

    /// Starts a task driving `output`.
    pub fn add_output(&mut self, output: Box<dyn Output>) {
        let tag = output.tag().to_string();
        let (tx, rx) = mpsc::channel(self.queue_size);
        let task = tokio::spawn(drive(output, rx));
        debug!(tag = %tag, "output started");
        self.outputs.push(OutputHandle { tag, tx, task });
    }

    /// Delivers records until every input sender is dropped or the token fires, then waits
    /// for the outputs to finish.
    pub async fn run(mut self) -> DispatchStats {
        let mut stats = DispatchStats::default();
        if self.outputs.is_empty() {
            warn!("dispatcher has no outputs, records will be discarded");
        }

        'records: loop {
            let record = tokio::select! {
                record = self.rx.recv() => record,
                () = self.cancel_token.cancelled() => break,
            };
            let Some(record) = record else {
                debug!("all inputs closed");
                break;
            };
            stats.received += 1;

            let Some(record) = self.apply_filters(record) else {
                stats.filtered += 1;
                continue;
            };

            let last = self.outputs.len().saturating_sub(1);
            let mut record = Some(record);
            for (index, output) in self.outputs.iter().enumerate() {
                let copy = if index == last {
                    record.take()
                } else {
                    record.clone()
                };
                let Some(copy) = copy else { break };

                let delivered = tokio::select! {
                    result = output.tx.send(copy) => result.is_ok(),
                    () = self.cancel_token.cancelled() => break 'records,
                };
                if !delivered {
                    warn!(tag = %output.tag, "output stopped, record not delivered");
                }
            }
        }

        // Dropping the senders lets every output drain its queue and close.
        let outputs = std::mem::take(&mut self.outputs);
        for output in outputs {
            drop(output.tx);
            if let Err(e) = output.task.await {
                warn!(tag = %output.tag, error = %e, "output task failed");
            }
        }
        info!(
            received = stats.received,
            filtered = stats.filtered,
            "dispatcher stopped"
        );
        stats
    }

    fn apply_filters(&self, record: Record) -> Option<Record> {
        self.filters.iter().try_fold(record, |record, filter| {
            let result = filter.apply(record);
            if result.is_none() {
                debug!(filter = filter.name(), "record dropped by filter");
            }
            result
        })
    }
}

async fn drive(mut output: Box<dyn Output>, mut rx: mpsc::Receiver<Record>) {
    while let Some(record) = rx.recv().await {
        match output.send(record).await {
            Ok(()) => {}
            Err(ForwardError::Cancelled) => break,
            Err(e) => warn!(tag = %output.tag(), error = %e, "record not forwarded"),
        }
    }
    output.close().await;
}
