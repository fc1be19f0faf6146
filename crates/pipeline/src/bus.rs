//! Bounded audio frame bus
//!
//! One bus connects exactly one producer stage to one consumer stage. Frames come
//! out in the order they went in. Two producer policies are offered:
//!
//! - ingress (`push_drop_oldest`): caller audio must never stall the transport, so a
//!   full bus evicts its oldest frame
//! - egress (`send`): synthesized audio must never be lost, so a full bus makes the
//!   synthesizer wait
//!
//! Egress frames are stamped with an epoch. `discard_pending` clears the queue and
//! advances the epoch, so a producer working for a cancelled response can never
//! enqueue another frame.

use futures::Stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use parley_core::{AudioFrame, Error, Result};

/// Bus counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub pushed: u64,
    pub pulled: u64,
    pub dropped: u64,
}

struct BusInner {
    queue: VecDeque<AudioFrame>,
    closed: bool,
    epoch: u64,
}

/// Bounded FIFO handoff between two pipeline stages
pub struct AudioFrameBus {
    name: &'static str,
    max_depth: usize,
    inner: Mutex<BusInner>,
    /// Consumer wakeup (frame available or closed)
    readable: Notify,
    /// Producer wakeup (capacity available, epoch advanced or closed)
    writable: Notify,
    /// Queue became empty
    emptied: Notify,
    pushed: AtomicU64,
    pulled: AtomicU64,
    dropped: AtomicU64,
}

impl AudioFrameBus {
    /// Create a bus holding at most `max_depth` frames (at least one)
    pub fn new(name: &'static str, max_depth: usize) -> Self {
        let max_depth = max_depth.max(1);
        Self {
            name,
            max_depth,
            inner: Mutex::new(BusInner {
                queue: VecDeque::with_capacity(max_depth),
                closed: false,
                epoch: 0,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
            emptied: Notify::new(),
            pushed: AtomicU64::new(0),
            pulled: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a frame, failing when the bus is full
    pub fn push(&self, frame: AudioFrame) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(Error::Closed);
            }
            if inner.queue.len() >= self.max_depth {
                return Err(Error::BufferOverflow {
                    max_depth: self.max_depth,
                });
            }
            inner.queue.push_back(frame);
        }

        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.readable.notify_one();
        Ok(())
    }

    /// Enqueue a frame, evicting the oldest buffered frame when the bus is full
    ///
    /// Returns `true` when a frame was evicted. Only fails once the bus is closed.
    pub fn push_drop_oldest(&self, frame: AudioFrame) -> Result<bool> {
        let evicted = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(Error::Closed);
            }
            let evicted = if inner.queue.len() >= self.max_depth {
                inner.queue.pop_front()
            } else {
                None
            };
            inner.queue.push_back(frame);
            evicted
        };

        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.readable.notify_one();

        match evicted {
            Some(old) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    bus = self.name,
                    sequence = old.sequence,
                    dropped,
                    "Bus full, dropped oldest frame"
                );
                Ok(true)
            },
            None => Ok(false),
        }
    }

    /// Current epoch, to be passed to `send`
    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    /// Enqueue a frame produced under `epoch`, waiting for capacity
    ///
    /// Fails with `Cancelled` once the epoch has moved on and with `Closed` after close.
    pub async fn send(&self, frame: AudioFrame, epoch: u64) -> Result<()> {
        let mut frame = Some(frame);
        loop {
            let notified = self.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return Err(Error::Closed);
                }
                if inner.epoch != epoch {
                    return Err(Error::Cancelled);
                }
                if inner.queue.len() < self.max_depth {
                    if let Some(frame) = frame.take() {
                        inner.queue.push_back(frame);
                    }
                    drop(inner);
                    self.pushed.fetch_add(1, Ordering::Relaxed);
                    self.readable.notify_one();
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Wait for the next frame
    ///
    /// Buffered frames are still handed out after `close`; `Closed` is returned once
    /// the bus is closed and empty.
    pub async fn pull(&self) -> Result<AudioFrame> {
        loop {
            let notified = self.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(frame) = self.try_pull()? {
                return Ok(frame);
            }

            notified.await;
        }
    }

    /// Take the next frame without waiting
    pub fn try_pull(&self) -> Result<Option<AudioFrame>> {
        let (frame, now_empty) = {
            let mut inner = self.inner.lock();
            match inner.queue.pop_front() {
                Some(frame) => (frame, inner.queue.is_empty()),
                None if inner.closed => return Err(Error::Closed),
                None => return Ok(None),
            }
        };

        self.pulled.fetch_add(1, Ordering::Relaxed);
        self.writable.notify_waiters();
        if now_empty {
            self.emptied.notify_waiters();
        }
        tracing::trace!(bus = self.name, sequence = frame.sequence, "Frame pulled");
        Ok(Some(frame))
    }

    /// Drop every buffered frame and advance the epoch
    ///
    /// Returns the number of frames discarded.
    pub fn discard_pending(&self) -> usize {
        let discarded = {
            let mut inner = self.inner.lock();
            inner.epoch += 1;
            let discarded = inner.queue.len();
            inner.queue.clear();
            discarded
        };

        self.writable.notify_waiters();
        self.emptied.notify_waiters();
        if discarded > 0 {
            tracing::debug!(bus = self.name, discarded, "Discarded pending frames");
        }
        discarded
    }

    /// Wait until the consumer has taken every buffered frame
    pub async fn drained(&self) {
        loop {
            let notified = self.emptied.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let inner = self.inner.lock();
                if inner.queue.is_empty() || inner.closed {
                    return;
                }
            }

            notified.await;
        }
    }

    /// Stop accepting frames; idempotent
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
        }

        tracing::debug!(bus = self.name, "Bus closed");
        self.readable.notify_waiters();
        self.writable.notify_waiters();
        self.emptied.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            pulled: self.pulled.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Consume the bus as a stream that ends when the bus is closed and drained
    pub fn into_stream(self: Arc<Self>) -> impl Stream<Item = AudioFrame> + Send + 'static {
        async_stream::stream! {
            while let Ok(frame) = self.pull().await {
                yield frame;
            }
        }
    }
}

impl std::fmt::Debug for AudioFrameBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrameBus")
            .field("name", &self.name)
            .field("max_depth", &self.max_depth)
            .field("len", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use parley_core::{Channels, SampleRate};
    use std::time::Duration;

    fn frame(seq: u64) -> AudioFrame {
        AudioFrame::new(vec![0.0; 160], SampleRate::Hz8000, Channels::Mono, seq)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let bus = AudioFrameBus::new("test", 8);
        for seq in 0..5 {
            bus.push(frame(seq)).unwrap();
        }

        for seq in 0..5 {
            assert_eq!(bus.pull().await.unwrap().sequence, seq);
        }
    }

    #[tokio::test]
    async fn test_fifo_across_interleaved_producers() {
        let bus = Arc::new(AudioFrameBus::new("test", 64));
        let producer = {
            let bus = bus.clone();
            tokio::spawn(async move {
                for seq in 0..40 {
                    bus.send(frame(seq), 0).await.unwrap();
                    if seq % 7 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                bus.close();
            })
        };

        let sequences: Vec<u64> = bus.clone().into_stream().map(|f| f.sequence).collect().await;
        producer.await.unwrap();
        assert_eq!(sequences, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn test_push_overflow() {
        let bus = AudioFrameBus::new("test", 2);
        bus.push(frame(0)).unwrap();
        bus.push(frame(1)).unwrap();

        assert_eq!(
            bus.push(frame(2)),
            Err(Error::BufferOverflow { max_depth: 2 })
        );
        assert_eq!(bus.len(), 2);
    }

    #[tokio::test]
    async fn test_drop_oldest() {
        let bus = AudioFrameBus::new("test", 2);
        assert!(!bus.push_drop_oldest(frame(0)).unwrap());
        assert!(!bus.push_drop_oldest(frame(1)).unwrap());
        assert!(bus.push_drop_oldest(frame(2)).unwrap());

        assert_eq!(bus.pull().await.unwrap().sequence, 1);
        assert_eq!(bus.pull().await.unwrap().sequence, 2);
        assert_eq!(bus.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let bus = AudioFrameBus::new("test", 4);
        bus.push(frame(0)).unwrap();
        bus.push(frame(1)).unwrap();
        bus.close();
        bus.close();

        assert_eq!(bus.push(frame(2)), Err(Error::Closed));
        assert_eq!(bus.pull().await.unwrap().sequence, 0);
        assert_eq!(bus.pull().await.unwrap().sequence, 1);
        assert_eq!(bus.pull().await.unwrap_err(), Error::Closed);
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumer() {
        let bus = Arc::new(AudioFrameBus::new("test", 4));
        let consumer = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.pull().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.close();

        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap_err(), Error::Closed);
    }

    #[tokio::test]
    async fn test_send_waits_for_capacity() {
        let bus = Arc::new(AudioFrameBus::new("test", 1));
        bus.send(frame(0), 0).await.unwrap();

        let producer = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.send(frame(1), 0).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!producer.is_finished());

        assert_eq!(bus.pull().await.unwrap().sequence, 0);
        producer.await.unwrap().unwrap();
        assert_eq!(bus.pull().await.unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn test_discard_cancels_stale_epoch() {
        let bus = Arc::new(AudioFrameBus::new("test", 1));
        let epoch = bus.epoch();
        bus.send(frame(0), epoch).await.unwrap();

        let blocked = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.send(frame(1), epoch).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(bus.discard_pending(), 1);
        assert_eq!(blocked.await.unwrap(), Err(Error::Cancelled));
        assert_eq!(bus.send(frame(2), epoch).await, Err(Error::Cancelled));

        bus.send(frame(3), bus.epoch()).await.unwrap();
        assert_eq!(bus.pull().await.unwrap().sequence, 3);
    }

    #[tokio::test]
    async fn test_drained() {
        let bus = Arc::new(AudioFrameBus::new("test", 4));
        bus.push(frame(0)).unwrap();
        bus.push(frame(1)).unwrap();

        let waiter = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.drained().await })
        };

        bus.pull().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        bus.pull().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
