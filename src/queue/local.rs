//! In-process task queue.
//!
//! Messages live in a ready list and an unacknowledged map. When a journal path is given,
//! every publish and every settle is appended to a JSON-lines file before it takes effect,
//! and outstanding messages are restored (as redeliveries) when the queue is reopened.

use super::TaskQueue;
use super::types::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
struct Message {
    tag: u64,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Message>,
    unacked: HashMap<u64, Message>,
    next_tag: u64,
    closed: bool,
    /// Prefetch windows of open consumers, closed together with the queue.
    windows: Vec<Weak<Semaphore>>,
}

struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
    journal: Option<Journal>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn requeue(&self, tag: u64) {
        {
            let mut state = self.lock();
            if let Some(mut message) = state.unacked.remove(&tag) {
                message.redelivered = true;
                state.ready.push_front(message);
            }
        }
        self.notify.notify_waiters();
    }

    async fn settle(&self, tag: u64) -> Result<(), QueueError> {
        let removed = self.lock().unacked.remove(&tag).is_some();

        if removed && let Some(journal) = &self.journal {
            journal.append(&JournalEntry::Settle { tag }).await?;
        }

        Ok(())
    }
}

/// In-process implementation of [`TaskQueue`].
pub struct LocalQueue {
    shared: Arc<Shared>,
    prefetch: usize,
}

impl LocalQueue {
    /// Creates a volatile queue. `prefetch` bounds unacknowledged deliveries per consumer.
    pub fn new(prefetch: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                journal: None,
            }),
            prefetch: prefetch.max(1),
        }
    }

    /// Opens a journaled queue, restoring every message that was published but never
    /// settled. Restored messages are delivered with `redelivered = true`.
    pub async fn open(journal_path: impl AsRef<Path>, prefetch: usize) -> Result<Self, QueueError> {
        let path = journal_path.as_ref().to_path_buf();
        let (outstanding, next_tag) = Journal::replay(&path).await?;
        let journal = Journal::compact(&path, &outstanding).await?;

        tracing::info!(
            "Opened queue journal {} ({} outstanding messages)",
            path.display(),
            outstanding.len()
        );

        let state = QueueState {
            ready: outstanding.into_iter().collect(),
            next_tag,
            ..QueueState::default()
        };

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                notify: Notify::new(),
                journal: Some(journal),
            }),
            prefetch: prefetch.max(1),
        })
    }

    pub fn prefetch(&self) -> usize {
        self.prefetch
    }

    /// Messages waiting to be delivered.
    pub fn depth(&self) -> usize {
        self.shared.lock().ready.len()
    }

    /// Messages delivered but not yet acknowledged.
    pub fn unacked_count(&self) -> usize {
        self.shared.lock().unacked.len()
    }

    /// Closes the queue. Open consumers end their streams; further publishes and consumes
    /// fail with [`QueueError::Closed`]. Unsettled deliveries can still be settled.
    pub fn close(&self) {
        let windows = {
            let mut state = self.shared.lock();
            state.closed = true;
            std::mem::take(&mut state.windows)
        };

        for window in windows.iter().filter_map(Weak::upgrade) {
            window.close();
        }

        self.shared.notify.notify_waiters();
        tracing::info!("Queue closed");
    }
}

#[async_trait]
impl TaskQueue for LocalQueue {
    async fn publish(&self, body: Vec<u8>) -> Result<(), QueueError> {
        let tag = {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.next_tag += 1;
            state.next_tag
        };

        if let Some(journal) = &self.shared.journal {
            journal
                .append(&JournalEntry::Publish {
                    tag,
                    body: hex::encode(&body),
                })
                .await?;
        }

        self.shared.lock().ready.push_back(Message {
            tag,
            body,
            redelivered: false,
        });
        self.shared.notify.notify_waiters();

        tracing::debug!("Published message {}", tag);
        Ok(())
    }

    async fn consume(&self) -> Result<Box<dyn DeliveryStream>, QueueError> {
        let window = Arc::new(Semaphore::new(self.prefetch));
        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.windows.retain(|w| w.strong_count() > 0);
            state.windows.push(Arc::downgrade(&window));
        }

        Ok(Box::new(LocalConsumer {
            shared: self.shared.clone(),
            window,
        }))
    }
}

struct LocalConsumer {
    shared: Arc<Shared>,
    window: Arc<Semaphore>,
}

#[async_trait]
impl DeliveryStream for LocalConsumer {
    async fn next(&mut self) -> Option<Delivery> {
        // Prefetch bound: one permit per unacknowledged delivery.
        let permit = self.window.clone().acquire_owned().await.ok()?;

        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.lock();
                if state.closed {
                    return None;
                }
                if let Some(message) = state.ready.pop_front() {
                    state.unacked.insert(message.tag, message.clone());
                    let settle = LocalSettle {
                        shared: self.shared.clone(),
                        tag: message.tag,
                        _permit: permit,
                    };
                    return Some(Delivery::new(
                        message.tag,
                        message.body,
                        message.redelivered,
                        Box::new(settle),
                    ));
                }
            }

            notified.await;
        }
    }
}

struct LocalSettle {
    shared: Arc<Shared>,
    tag: u64,
    /// Released when the delivery is settled, reopening a prefetch slot.
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Settle for LocalSettle {
    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        tracing::trace!("Ack {}", self.tag);
        self.shared.settle(self.tag).await
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), QueueError> {
        if requeue {
            tracing::debug!("Nack {} with requeue", self.tag);
            self.shared.requeue(self.tag);
            Ok(())
        } else {
            tracing::debug!("Nack {} without requeue, discarding", self.tag);
            self.shared.settle(self.tag).await
        }
    }

    fn abandon(self: Box<Self>) {
        self.shared.requeue(self.tag);
    }
}

// --- Journal ---

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalEntry {
    Publish { tag: u64, body: String },
    Settle { tag: u64 },
}

struct Journal {
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl Journal {
    async fn append(&self, entry: &JournalEntry) -> Result<(), QueueError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Reads the journal and returns unsettled messages in publish order plus the last tag.
    async fn replay(path: &Path) -> Result<(Vec<Message>, u64), QueueError> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e.into()),
        };

        let mut published: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
        let mut last_tag = 0;

        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(line) {
                Ok(JournalEntry::Publish { tag, body }) => match hex::decode(&body) {
                    Ok(bytes) => {
                        last_tag = last_tag.max(tag);
                        published.insert(tag, bytes);
                    }
                    Err(e) => tracing::warn!("Skipping journal line {}: bad body: {}", line_no + 1, e),
                },
                Ok(JournalEntry::Settle { tag }) => {
                    last_tag = last_tag.max(tag);
                    published.remove(&tag);
                }
                // A torn final write after a crash lands here.
                Err(e) => tracing::warn!("Skipping journal line {}: {}", line_no + 1, e),
            }
        }

        let outstanding = published
            .into_iter()
            .map(|(tag, body)| Message {
                tag,
                body,
                redelivered: true,
            })
            .collect();

        Ok((outstanding, last_tag))
    }

    /// Rewrites the journal to hold only `outstanding` and opens it for appending.
    async fn compact(path: &Path, outstanding: &[Message]) -> Result<Self, QueueError> {
        let mut contents = Vec::new();
        for message in outstanding {
            let entry = JournalEntry::Publish {
                tag: message.tag,
                body: hex::encode(&message.body),
            };
            contents.extend(serde_json::to_vec(&entry)?);
            contents.push(b'\n');
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp: PathBuf = path.with_extension("compact");
        tokio::fs::write(&tmp, &contents).await?;
        tokio::fs::rename(&tmp, path).await?;

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        Ok(Self {
            file: tokio::sync::Mutex::new(file),
        })
    }
}
