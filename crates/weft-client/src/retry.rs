//! Bounded delivery retry queue.
//!
//! Failed sends are parked here and retried on a backoff schedule by a
//! single drain timer. The queue never returns errors from the drain path —
//! every outcome becomes a [`DeliveryEvent`] on the status stream:
//!
//! ```text
//! pending → sending → (delivered | expired | failed)
//! ```
//!
//! Events for one `message_id` are totally ordered; ordering across ids is
//! not guaranteed. The timer stops itself when the queue empties and is
//! restarted by the next enqueue.
//!
//! The queue only schedules; the injected send function owns the dispatch
//! decision. The agent layer's send function gates every attempt on peer
//! presence, so a peer known offline costs no network round-trip.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use weft_types::events::DeliveryEvent;
use weft_types::DeliveryStatus;

/// The injected send function: delivers one message, reporting success.
pub type SendFn =
    Arc<dyn Fn(QueuedMessage) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;

/// A message parked for redelivery.
#[derive(Clone, Debug)]
pub struct QueuedMessage {
    pub message_id: String,
    pub recipient: String,
    /// The sealed envelope, re-sent byte-identically on every attempt.
    pub envelope: serde_json::Value,
    pub group_id: Option<String>,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub created_at: Instant,
    pub next_retry_at: Instant,
}

/// Queue tuning knobs.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum queued messages; `enqueue` refuses beyond this.
    pub capacity: usize,
    /// Entries older than this expire undelivered.
    pub max_age: Duration,
    /// Drain timer period.
    pub tick: Duration,
    /// Backoff after each failed attempt; its length caps the attempts.
    pub schedule: Vec<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            max_age: Duration::from_secs(3600),
            tick: Duration::from_secs(1),
            schedule: vec![
                Duration::from_secs(10),
                Duration::from_secs(30),
                Duration::from_secs(90),
            ],
        }
    }
}

struct Inner {
    config: RetryConfig,
    send_fn: SendFn,
    queue: Mutex<HashMap<String, QueuedMessage>>,
    events: broadcast::Sender<DeliveryEvent>,
    timer: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

/// The retry queue handle. Cheap to clone.
#[derive(Clone)]
pub struct RetryQueue {
    inner: Arc<Inner>,
}

impl RetryQueue {
    /// Create a queue around the given send function.
    pub fn new(config: RetryConfig, send_fn: SendFn) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                config,
                send_fn,
                queue: Mutex::new(HashMap::new()),
                events,
                timer: Mutex::new(None),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to delivery-status events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.inner.events.subscribe()
    }

    /// Queue a message for delivery. Returns `false` when the queue is full.
    pub async fn enqueue(
        &self,
        message_id: String,
        recipient: String,
        envelope: serde_json::Value,
        group_id: Option<String>,
    ) -> bool {
        {
            let mut queue = self.inner.queue.lock().await;
            if queue.len() >= self.inner.config.capacity {
                tracing::warn!(message_id, "delivery queue full, refusing message");
                return false;
            }
            let now = Instant::now();
            let message = QueuedMessage {
                message_id: message_id.clone(),
                recipient,
                envelope,
                group_id,
                status: DeliveryStatus::Pending,
                attempts: 0,
                created_at: now,
                next_retry_at: now,
            };
            emit(&self.inner.events, &message);
            queue.insert(message_id, message);
        }
        self.ensure_timer().await;
        true
    }

    /// Number of messages currently queued.
    pub async fn len(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.queue.lock().await.is_empty()
    }

    /// Stop the drain timer. An in-flight send attempt completes first;
    /// queued messages stay put until a later enqueue restarts the timer.
    pub async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let handle = self.inner.timer.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn ensure_timer(&self) {
        let mut timer = self.inner.timer.lock().await;
        let running = timer.as_ref().is_some_and(|handle| !handle.is_finished());
        if running {
            return;
        }
        self.inner.stopped.store(false, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        *timer = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(inner.config.tick);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if inner.stopped.load(Ordering::SeqCst) {
                    break;
                }
                if drain(&inner).await {
                    break;
                }
            }
        }));
    }
}

/// One drain pass. Returns true when the queue has emptied.
async fn drain(inner: &Inner) -> bool {
    let now = Instant::now();
    let due: Vec<QueuedMessage> = {
        let mut queue = inner.queue.lock().await;

        // Expire overaged entries first.
        let expired: Vec<String> = queue
            .values()
            .filter(|m| now.duration_since(m.created_at) > inner.config.max_age)
            .map(|m| m.message_id.clone())
            .collect();
        for id in expired {
            if let Some(mut message) = queue.remove(&id) {
                message.status = DeliveryStatus::Expired;
                emit(&inner.events, &message);
                tracing::debug!(message_id = %id, "queued message expired");
            }
        }

        queue
            .values_mut()
            .filter(|m| m.status != DeliveryStatus::Sending && now >= m.next_retry_at)
            .map(|m| {
                m.status = DeliveryStatus::Sending;
                m.attempts += 1;
                emit(&inner.events, m);
                m.clone()
            })
            .collect()
    };

    for message in due {
        let delivered = (inner.send_fn)(message.clone()).await;
        let mut queue = inner.queue.lock().await;
        let Some(entry) = queue.get_mut(&message.message_id) else {
            continue;
        };

        if delivered {
            entry.status = DeliveryStatus::Delivered;
            let done = entry.clone();
            queue.remove(&message.message_id);
            emit(&inner.events, &done);
        } else if entry.attempts as usize >= inner.config.schedule.len() {
            entry.status = DeliveryStatus::Failed;
            let done = entry.clone();
            queue.remove(&message.message_id);
            emit(&inner.events, &done);
            tracing::warn!(message_id = %done.message_id, "delivery abandoned");
        } else {
            let backoff = inner.config.schedule[entry.attempts as usize - 1];
            entry.status = DeliveryStatus::Pending;
            entry.next_retry_at = Instant::now() + backoff;
            emit(&inner.events, entry);
        }
    }

    inner.queue.lock().await.is_empty()
}

fn emit(events: &broadcast::Sender<DeliveryEvent>, message: &QueuedMessage) {
    // No subscribers is fine.
    let _ = events.send(DeliveryEvent {
        message_id: message.message_id.clone(),
        status: message.status,
        attempts: message.attempts,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config() -> RetryConfig {
        RetryConfig {
            capacity: 100,
            max_age: Duration::from_secs(3600),
            tick: Duration::from_millis(5),
            schedule: vec![
                Duration::from_millis(10),
                Duration::from_millis(30),
                Duration::from_millis(90),
            ],
        }
    }

    fn always_fail() -> SendFn {
        Arc::new(|_| Box::pin(async { false }))
    }

    fn succeed_on(attempt: u32) -> SendFn {
        let calls = Arc::new(AtomicU32::new(0));
        Arc::new(move |_| {
            let calls = Arc::clone(&calls);
            Box::pin(async move { calls.fetch_add(1, Ordering::SeqCst) + 1 >= attempt })
        })
    }

    async fn collect_until_terminal(
        rx: &mut broadcast::Receiver<DeliveryEvent>,
    ) -> Vec<DeliveryEvent> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
                .await
                .expect("event stream stalled")
                .expect("channel open");
            let status = event.status;
            events.push(event);
            if matches!(
                status,
                DeliveryStatus::Delivered | DeliveryStatus::Expired | DeliveryStatus::Failed
            ) {
                return events;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_attempts_fail() {
        let queue = RetryQueue::new(test_config(), always_fail());
        let mut rx = queue.subscribe();
        assert!(
            queue
                .enqueue("m-1".into(), "bmo".into(), serde_json::json!({}), None)
                .await
        );

        let events = collect_until_terminal(&mut rx).await;
        let statuses: Vec<DeliveryStatus> = events.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                DeliveryStatus::Pending,
                DeliveryStatus::Sending,
                DeliveryStatus::Pending,
                DeliveryStatus::Sending,
                DeliveryStatus::Pending,
                DeliveryStatus::Sending,
                DeliveryStatus::Failed,
            ]
        );
        let attempts: Vec<u32> = events
            .iter()
            .filter(|e| e.status == DeliveryStatus::Sending)
            .map(|e| e.attempts)
            .collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivered_on_second_attempt() {
        let queue = RetryQueue::new(test_config(), succeed_on(2));
        let mut rx = queue.subscribe();
        assert!(
            queue
                .enqueue("m-2".into(), "bmo".into(), serde_json::json!({}), None)
                .await
        );

        let events = collect_until_terminal(&mut rx).await;
        let last = events.last().expect("terminal event");
        assert_eq!(last.status, DeliveryStatus::Delivered);
        assert_eq!(last.attempts, 2);
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_bound() {
        let config = RetryConfig {
            capacity: 1,
            ..test_config()
        };
        // A very slow send keeps the first message occupying the queue.
        let slow: SendFn = Arc::new(|_| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                false
            })
        });
        let queue = RetryQueue::new(config, slow);
        assert!(
            queue
                .enqueue("m-1".into(), "bmo".into(), serde_json::json!({}), None)
                .await
        );
        assert!(
            !queue
                .enqueue("m-2".into(), "bmo".into(), serde_json::json!({}), None)
                .await
        );
        queue.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let config = RetryConfig {
            max_age: Duration::from_millis(50),
            // Retries scheduled beyond the max age, so expiry wins.
            schedule: vec![Duration::from_secs(600), Duration::from_secs(600)],
            ..test_config()
        };
        let queue = RetryQueue::new(config, always_fail());
        let mut rx = queue.subscribe();
        queue
            .enqueue("m-3".into(), "bmo".into(), serde_json::json!({}), None)
            .await;

        let events = collect_until_terminal(&mut rx).await;
        assert_eq!(
            events.last().expect("terminal").status,
            DeliveryStatus::Expired
        );
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_restarts_after_empty() {
        let queue = RetryQueue::new(test_config(), succeed_on(1));

        let mut rx = queue.subscribe();
        queue
            .enqueue("m-4".into(), "bmo".into(), serde_json::json!({}), None)
            .await;
        collect_until_terminal(&mut rx).await;
        assert!(queue.is_empty().await);

        // The timer stopped with the empty queue; a new enqueue revives it.
        let mut rx = queue.subscribe();
        queue
            .enqueue("m-5".into(), "bmo".into(), serde_json::json!({}), None)
            .await;
        let events = collect_until_terminal(&mut rx).await;
        assert_eq!(
            events.last().expect("terminal").status,
            DeliveryStatus::Delivered
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_message_event_order() {
        let queue = RetryQueue::new(test_config(), succeed_on(2));
        let mut rx = queue.subscribe();
        queue
            .enqueue("a".into(), "bmo".into(), serde_json::json!({}), None)
            .await;
        queue
            .enqueue("b".into(), "bmo".into(), serde_json::json!({}), None)
            .await;

        // Collect both terminal events.
        let mut per_message: HashMap<String, Vec<DeliveryStatus>> = HashMap::new();
        let mut terminal = 0;
        while terminal < 2 {
            let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
                .await
                .expect("stalled")
                .expect("open");
            if matches!(
                event.status,
                DeliveryStatus::Delivered | DeliveryStatus::Failed | DeliveryStatus::Expired
            ) {
                terminal += 1;
            }
            per_message
                .entry(event.message_id.clone())
                .or_default()
                .push(event.status);
        }

        for statuses in per_message.values() {
            assert_eq!(statuses.first(), Some(&DeliveryStatus::Pending));
            // Sending must always directly follow a pending.
            for window in statuses.windows(2) {
                if window[1] == DeliveryStatus::Sending {
                    assert_eq!(window[0], DeliveryStatus::Pending);
                }
            }
        }
    }
}
