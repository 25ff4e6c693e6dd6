//! Latest-frame hand-off from one camera producer to many HTTP consumers.
//!
//! The broadcaster owns a single slot holding the most recent JPEG. Publishing
//! overwrites the slot and wakes every waiter; nothing is queued, so a slow
//! consumer simply skips to whatever is newest when it next asks. The slot is a
//! `tokio::sync::watch` channel: its version counter is compared under the
//! channel lock, which closes the classic check-then-wait race between a
//! publish and a consumer registering interest.
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, info};

/// One complete JPEG image together with its publish generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    generation: u64,
    data: Bytes,
}

impl Frame {
    /// Monotonic per-broadcaster sequence number, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Statistics for monitoring a broadcaster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub frames_published: u64,
    pub bytes_published: u64,
    pub subscribers: usize,
}

/// Single-producer, multi-consumer "latest value wins" frame slot.
///
/// `publish` never blocks and never fails. Consumers either hold a
/// [`FrameSubscriber`] (which remembers the last generation it consumed) or
/// call [`FrameBroadcaster::wait_for_next`] for a one-off wait.
#[derive(Debug)]
pub struct FrameBroadcaster {
    name: String,
    tx: watch::Sender<Option<Frame>>,
    bytes_published: AtomicU64,
}

impl FrameBroadcaster {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let (tx, _rx) = watch::channel(None);

        debug!(stream = %name, "Frame broadcaster created");

        Self {
            name,
            tx,
            bytes_published: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the current frame and wake every waiting consumer.
    ///
    /// Returns the generation assigned to the frame.
    pub fn publish(&self, data: impl Into<Bytes>) -> u64 {
        let data = data.into();
        let len = data.len() as u64;
        let mut generation = 0;

        // send_modify notifies even when nobody is subscribed yet
        self.tx.send_modify(|slot| {
            generation = slot.as_ref().map_or(0, |f| f.generation) + 1;
            *slot = Some(Frame { generation, data });
        });

        self.bytes_published.fetch_add(len, Ordering::Relaxed);
        generation
    }

    /// Register a consumer. Whatever is current right now counts as already
    /// seen, so the first wait returns the next published frame.
    pub fn subscribe(&self) -> FrameSubscriber {
        let rx = self.tx.subscribe();
        let last_generation = rx.borrow().as_ref().map_or(0, |f| f.generation);

        debug!(
            stream = %self.name,
            subscribers = self.subscriber_count(),
            "New frame subscriber"
        );

        FrameSubscriber {
            rx,
            last_generation,
            frames_received: 0,
            frames_skipped: 0,
        }
    }

    /// Block until a frame newer than the one current at call time arrives.
    ///
    /// The sender lives in `self`, so this only yields `None` if the
    /// broadcaster is torn down mid-wait.
    pub async fn wait_for_next(&self) -> Option<Frame> {
        self.subscribe().wait_for_next().await
    }

    /// The frame currently held in the slot, if any has been published.
    pub fn current(&self) -> Option<Frame> {
        self.tx.borrow().clone()
    }

    pub fn generation(&self) -> u64 {
        self.tx.borrow().as_ref().map_or(0, |f| f.generation)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            frames_published: self.generation(),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }

    /// Log statistics (call periodically for monitoring)
    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            stream = %self.name,
            published = stats.frames_published,
            bytes = stats.bytes_published,
            subscribers = stats.subscribers,
            "Frame broadcast stats"
        );
    }
}

/// A consumer's cursor into a [`FrameBroadcaster`].
#[derive(Debug)]
pub struct FrameSubscriber {
    rx: watch::Receiver<Option<Frame>>,
    last_generation: u64,
    frames_received: u64,
    frames_skipped: u64,
}

impl FrameSubscriber {
    /// Wait for a frame newer than the last one this subscriber returned.
    ///
    /// If several frames were published since the previous call only the
    /// newest is returned. Returns `None` once the broadcaster is dropped.
    pub async fn wait_for_next(&mut self) -> Option<Frame> {
        loop {
            self.rx.changed().await.ok()?;

            let frame = match self.rx.borrow_and_update().as_ref() {
                Some(frame) if frame.generation > self.last_generation => frame.clone(),
                _ => continue,
            };

            self.frames_skipped += frame.generation - self.last_generation - 1;
            self.last_generation = frame.generation;
            self.frames_received += 1;
            return Some(frame);
        }
    }

    pub fn last_generation(&self) -> u64 {
        self.last_generation
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Generations published while this subscriber was busy elsewhere.
    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::{sleep, timeout, Duration};

    #[tokio::test]
    async fn test_latest_frame_wins() {
        let broadcaster = FrameBroadcaster::new("left");
        let mut sub = broadcaster.subscribe();

        broadcaster.publish(Bytes::from_static(b"f1"));
        broadcaster.publish(Bytes::from_static(b"f2"));
        broadcaster.publish(Bytes::from_static(b"f3"));

        let frame = sub.wait_for_next().await.unwrap();
        assert_eq!(&frame.data()[..], b"f3");
        assert_eq!(frame.generation(), 3);
        assert_eq!(sub.frames_received(), 1);
    }

    #[tokio::test]
    async fn test_waiting_consumer_sees_a_then_b() {
        let broadcaster = Arc::new(FrameBroadcaster::new("left"));
        let mut sub = broadcaster.subscribe();

        let consumer = tokio::spawn(async move {
            let a = sub.wait_for_next().await.unwrap();
            let b = sub.wait_for_next().await.unwrap();
            (a, b)
        });

        sleep(Duration::from_millis(20)).await;
        broadcaster.publish(vec![0x01, 0x02, 0x03]);
        sleep(Duration::from_millis(20)).await;
        broadcaster.publish(vec![0xFF]);

        let (a, b) = consumer.await.unwrap();
        assert_eq!(&a.data()[..], &[0x01u8, 0x02, 0x03][..]);
        assert_eq!(&b.data()[..], &[0xFFu8][..]);
        assert!(b.generation() > a.generation());
    }

    #[tokio::test]
    async fn test_new_subscriber_gets_no_backlog() {
        let broadcaster = FrameBroadcaster::new("left");
        broadcaster.publish(Bytes::from_static(b"old"));

        let mut sub = broadcaster.subscribe();
        let pending = timeout(Duration::from_millis(50), sub.wait_for_next()).await;
        assert!(pending.is_err(), "current frame must not be replayed");

        broadcaster.publish(Bytes::from_static(b"new"));
        let frame = sub.wait_for_next().await.unwrap();
        assert_eq!(&frame.data()[..], b"new");
    }

    #[tokio::test]
    async fn test_blocks_until_first_frame() {
        let broadcaster = Arc::new(FrameBroadcaster::new("left"));
        assert!(broadcaster.current().is_none());

        let waiter = {
            let broadcaster = broadcaster.clone();
            tokio::spawn(async move { broadcaster.wait_for_next().await })
        };

        sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        broadcaster.publish(Bytes::from_static(b"first"));
        let frame = timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame.generation(), 1);
    }

    #[tokio::test]
    async fn test_fan_out_to_all_waiters() {
        let broadcaster = Arc::new(FrameBroadcaster::new("left"));
        let mut consumers = Vec::new();

        for _ in 0..8 {
            let mut sub = broadcaster.subscribe();
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..3 {
                    seen.push(sub.wait_for_next().await.unwrap());
                }
                seen
            }));
        }

        for payload in [b"one".as_slice(), b"two", b"three"] {
            // Let every consumer park on the slot before publishing
            sleep(Duration::from_millis(20)).await;
            broadcaster.publish(Bytes::copy_from_slice(payload));
        }

        for consumer in consumers {
            let seen = consumer.await.unwrap();
            let data: Vec<&[u8]> = seen.iter().map(|f| &f.data()[..]).collect();
            assert_eq!(data, vec![b"one".as_slice(), b"two", b"three"]);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_lost_wakeup_under_racing_publishes() {
        let broadcaster = Arc::new(FrameBroadcaster::new("left"));
        let mut sub = broadcaster.subscribe();
        let producer = {
            let broadcaster = broadcaster.clone();
            std::thread::spawn(move || {
                for i in 0u32..2_000 {
                    broadcaster.publish(i.to_be_bytes().to_vec());
                    if i % 64 == 0 {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mut last = 0;
        // Every wait must complete while publishes keep coming
        while last < 1_900 {
            let frame = timeout(Duration::from_secs(5), sub.wait_for_next())
                .await
                .expect("waiter stalled while frames were being published")
                .unwrap();
            assert!(frame.generation() > last);
            last = frame.generation();
        }

        producer.join().unwrap();
        assert_eq!(sub.last_generation(), last);
        assert_eq!(sub.frames_received() + sub.frames_skipped(), last);
    }

    #[tokio::test]
    async fn test_skipped_generations_are_counted() {
        let broadcaster = FrameBroadcaster::new("left");
        let mut sub = broadcaster.subscribe();

        broadcaster.publish(Bytes::from_static(b"1"));
        sub.wait_for_next().await.unwrap();

        for _ in 0..4 {
            broadcaster.publish(Bytes::from_static(b"x"));
        }
        let frame = sub.wait_for_next().await.unwrap();
        assert_eq!(frame.generation(), 5);
        assert_eq!(sub.frames_skipped(), 3);
    }

    #[tokio::test]
    async fn test_closed_broadcaster_ends_waits() {
        let broadcaster = FrameBroadcaster::new("left");
        let mut sub = broadcaster.subscribe();
        drop(broadcaster);

        assert!(sub.wait_for_next().await.is_none());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let broadcaster = FrameBroadcaster::new("left");
        assert_eq!(broadcaster.publish(Bytes::from_static(b"abc")), 1);
        assert_eq!(broadcaster.publish(Bytes::from_static(b"de")), 2);

        let stats = broadcaster.stats();
        assert_eq!(stats.frames_published, 2);
        assert_eq!(stats.bytes_published, 5);
        assert_eq!(stats.subscribers, 0);
        assert_eq!(&broadcaster.current().unwrap().data()[..], b"de");
    }
}
