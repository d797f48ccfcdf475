/*
 * vSMTP mail transfer agent
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 *  This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/
use crate::log_channels;
use mailetd_common::{
    re::{anyhow, log},
    Mail, MailRepository,
};

/// Why a queue operation failed
#[derive(Debug)]
pub enum QueueError {
    /// the repository failed
    Storage(anyhow::Error),
    /// no mail with this key in the queue
    NotFound(String),
    /// the lease expired, the mail has been (or will be) handed out again
    LeaseLost(String),
    /// the queue has been closed
    Closed,
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::NotFound(key) => write!(f, "mail '{key}' is not in the queue"),
            Self::LeaseLost(key) => write!(f, "the lease on mail '{key}' has expired"),
            Self::Closed => f.write_str("the queue is closed"),
        }
    }
}

impl std::error::Error for QueueError {}

/// Proof that a dequeued mail is held by its consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckHandle {
    key: String,
    lease_id: u64,
}

impl AckHandle {
    /// name of the mail
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// A dequeued mail
#[derive(Debug)]
pub struct QueueItem {
    ///
    pub mail: Mail,
    /// to give to [`MailQueue::ack`], [`MailQueue::requeue`] or [`MailQueue::release`]
    pub handle: AckHandle,
}

/// Where a mail is in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// can be dequeued now
    Ready,
    /// can be dequeued in
    Delayed(std::time::Duration),
    /// held by a consumer
    InFlight,
}

/// Snapshot of an entry, see [`MailQueue::browse`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    ///
    pub key: String,
    ///
    pub status: EntryStatus,
    /// number of time the mail has been requeued
    pub attempts: u32,
}

#[derive(Debug)]
enum Status {
    Ready,
    Delayed {
        until: tokio::time::Instant,
        seq: u64,
    },
    InFlight {
        lease_id: u64,
    },
}

#[derive(Debug)]
struct Entry {
    status: Status,
    attempts: u32,
}

/// a mail the repository failed to read is handed out again after this delay
const READ_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

type Schedule = std::collections::BinaryHeap<std::cmp::Reverse<(tokio::time::Instant, u64, String)>>;

#[derive(Debug, Default)]
struct QueueState {
    entries: std::collections::HashMap<String, Entry>,
    ready: std::collections::VecDeque<String>,
    delayed: Schedule,
    leases: Schedule,
    next_id: u64,
    closed: bool,
}

impl QueueState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn schedule(&mut self, key: String, delay: Option<std::time::Duration>) -> Status {
        match delay {
            Some(delay) if !delay.is_zero() => {
                let seq = self.next_id();
                let until = tokio::time::Instant::now() + delay;
                self.delayed.push(std::cmp::Reverse((until, seq, key)));
                Status::Delayed { until, seq }
            }
            _ => {
                self.ready.push_back(key);
                Status::Ready
            }
        }
    }

    /// move the due delayed entries and the expired leases to the ready list
    fn promote(&mut self, now: tokio::time::Instant) {
        while let Some(std::cmp::Reverse((until, seq, _))) = self.delayed.peek() {
            if *until > now {
                break;
            }
            let seq = *seq;
            if let Some(std::cmp::Reverse((_, _, key))) = self.delayed.pop() {
                if let Some(entry) = self.entries.get_mut(&key) {
                    if matches!(entry.status, Status::Delayed { seq: s, .. } if s == seq) {
                        entry.status = Status::Ready;
                        self.ready.push_back(key);
                    }
                }
            }
        }

        while let Some(std::cmp::Reverse((until, lease_id, _))) = self.leases.peek() {
            if *until > now {
                break;
            }
            let lease_id = *lease_id;
            if let Some(std::cmp::Reverse((_, _, key))) = self.leases.pop() {
                if let Some(entry) = self.entries.get_mut(&key) {
                    if matches!(entry.status, Status::InFlight { lease_id: l } if l == lease_id) {
                        log::warn!(
                            target: log_channels::QUEUE,
                            "lease on '{}' expired, the mail is visible again",
                            key
                        );
                        entry.status = Status::Ready;
                        self.ready.push_back(key);
                    }
                }
            }
        }
    }

    /// the first ready entry, now held until the lease expires
    fn pop_ready(&mut self, lease: std::time::Duration) -> Option<AckHandle> {
        while let Some(key) = self.ready.pop_front() {
            if !matches!(
                self.entries.get(&key).map(|e| &e.status),
                Some(Status::Ready)
            ) {
                continue;
            }
            let lease_id = self.next_id();
            self.leases.push(std::cmp::Reverse((
                tokio::time::Instant::now() + lease,
                lease_id,
                key.clone(),
            )));
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.status = Status::InFlight { lease_id };
            }
            return Some(AckHandle { key, lease_id });
        }
        None
    }

    fn next_deadline(&self) -> Option<tokio::time::Instant> {
        let delayed = self.delayed.peek().map(|std::cmp::Reverse((until, _, _))| *until);
        let lease = self.leases.peek().map(|std::cmp::Reverse((until, _, _))| *until);
        match (delayed, lease) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn check_lease(&self, handle: &AckHandle) -> Result<(), QueueError> {
        match self.entries.get(&handle.key).map(|e| &e.status) {
            Some(Status::InFlight { lease_id }) if *lease_id == handle.lease_id => Ok(()),
            Some(_) => Err(QueueError::LeaseLost(handle.key.clone())),
            None => Err(QueueError::NotFound(handle.key.clone())),
        }
    }
}

enum Dequeue {
    Item(QueueItem),
    Wait(Option<tokio::time::Instant>),
}

/// Durable queue of the mails waiting to be processed.
///
/// The mails are stored in a repository, the scheduling is kept in memory
/// and rebuilt from the repository when the queue is opened. A dequeued mail
/// stays in the repository until it is acknowledged: if the consumer does not
/// acknowledge, requeue or release it before the lease expires, the mail is
/// handed out again.
pub struct MailQueue {
    repository: std::sync::Arc<dyn MailRepository>,
    lease: std::time::Duration,
    state: std::sync::Mutex<QueueState>,
    notify: tokio::sync::Notify,
}

impl MailQueue {
    /// every mail in the repository is ready
    ///
    /// # Errors
    ///
    /// * the repository cannot be listed
    pub fn open(
        repository: std::sync::Arc<dyn MailRepository>,
        lease: std::time::Duration,
    ) -> anyhow::Result<Self> {
        let mut state = QueueState::default();
        for key in repository.list()? {
            state.entries.insert(
                key.clone(),
                Entry {
                    status: Status::Ready,
                    attempts: 0,
                },
            );
            state.ready.push_back(key);
        }
        if !state.ready.is_empty() {
            log::info!(
                target: log_channels::QUEUE,
                "{} mail(s) recovered from the spool",
                state.ready.len()
            );
        }

        Ok(Self {
            repository,
            lease,
            state: std::sync::Mutex::new(state),
            notify: tokio::sync::Notify::new(),
        })
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, QueueState>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Storage(anyhow::anyhow!("queue state poisoned")))
    }

    /// store the mail, it can be dequeued after `delay`
    ///
    /// # Errors
    ///
    /// * the queue is closed
    /// * the mail cannot be stored
    pub fn enqueue(&self, mail: &Mail, delay: Option<std::time::Duration>) -> Result<(), QueueError> {
        if self.state()?.closed {
            return Err(QueueError::Closed);
        }
        self.repository.store(mail).map_err(QueueError::Storage)?;

        let mut state = self.state()?;
        let status = state.schedule(mail.name.clone(), delay);
        let attempts = state.entries.get(&mail.name).map_or(0, |e| e.attempts);
        state
            .entries
            .insert(mail.name.clone(), Entry { status, attempts });
        drop(state);

        log::debug!(
            target: log_channels::QUEUE,
            "mail '{}' enqueued, delay={:?}",
            mail.name,
            delay
        );
        self.notify.notify_one();
        Ok(())
    }

    fn try_dequeue(&self) -> Result<Dequeue, QueueError> {
        loop {
            let (handle, more) = {
                let mut state = self.state()?;
                if state.closed {
                    return Err(QueueError::Closed);
                }
                state.promote(tokio::time::Instant::now());
                match state.pop_ready(self.lease) {
                    Some(handle) => (handle, !state.ready.is_empty()),
                    None => return Ok(Dequeue::Wait(state.next_deadline())),
                }
            };

            match self.repository.retrieve(&handle.key) {
                Ok(Some(mail)) => {
                    if more {
                        self.notify.notify_one();
                    }
                    return Ok(Dequeue::Item(QueueItem { mail, handle }));
                }
                Ok(None) => {
                    log::warn!(
                        target: log_channels::QUEUE,
                        "mail '{}' disappeared from the spool",
                        handle.key
                    );
                    self.state()?.entries.remove(&handle.key);
                }
                Err(error) => {
                    log::error!(
                        target: log_channels::QUEUE,
                        "mail '{}' cannot be read, retry in {:?}: {}",
                        handle.key,
                        READ_RETRY_DELAY,
                        error
                    );
                    let mut state = self.state()?;
                    if state.check_lease(&handle).is_ok() {
                        let status = state.schedule(handle.key.clone(), Some(READ_RETRY_DELAY));
                        if let Some(entry) = state.entries.get_mut(&handle.key) {
                            entry.status = status;
                        }
                    }
                }
            }
        }
    }

    /// wait for a mail to be ready, and hold it
    ///
    /// # Errors
    ///
    /// * the queue is closed
    /// * the queue state is poisoned
    pub async fn dequeue(&self) -> Result<QueueItem, QueueError> {
        loop {
            match self.try_dequeue()? {
                Dequeue::Item(item) => return Ok(item),
                Dequeue::Wait(Some(deadline)) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                Dequeue::Wait(None) => self.notify.notified().await,
            }
        }
    }

    /// the mail has been processed, remove it
    ///
    /// # Errors
    ///
    /// * the lease has expired
    /// * the mail cannot be removed from the repository
    pub fn ack(&self, handle: &AckHandle) -> Result<(), QueueError> {
        let mut state = self.state()?;
        state.check_lease(handle)?;
        self.repository
            .remove(&handle.key)
            .map_err(QueueError::Storage)?;
        state.entries.remove(&handle.key);
        Ok(())
    }

    /// store the updated mail, it can be dequeued again after `delay`
    ///
    /// # Errors
    ///
    /// * the lease has expired
    /// * the mail cannot be stored
    pub fn requeue(
        &self,
        handle: &AckHandle,
        mail: &Mail,
        delay: Option<std::time::Duration>,
    ) -> Result<(), QueueError> {
        if mail.name != handle.key {
            return Err(QueueError::NotFound(mail.name.clone()));
        }
        self.state()?.check_lease(handle)?;
        self.repository.store(mail).map_err(QueueError::Storage)?;

        let mut state = self.state()?;
        state.check_lease(handle)?;
        let status = state.schedule(handle.key.clone(), delay);
        if let Some(entry) = state.entries.get_mut(&handle.key) {
            entry.status = status;
            entry.attempts += 1;
        }
        drop(state);

        self.notify.notify_one();
        Ok(())
    }

    /// give the mail back untouched, it can be dequeued right away
    ///
    /// # Errors
    ///
    /// * the lease has expired
    pub fn release(&self, handle: &AckHandle) -> Result<(), QueueError> {
        let mut state = self.state()?;
        state.check_lease(handle)?;
        let status = state.schedule(handle.key.clone(), None);
        if let Some(entry) = state.entries.get_mut(&handle.key) {
            entry.status = status;
        }
        drop(state);

        self.notify.notify_one();
        Ok(())
    }

    /// remove a mail, whatever its status
    ///
    /// # Errors
    ///
    /// * the mail is not in the queue
    /// * the mail cannot be removed from the repository
    pub fn remove(&self, key: &str) -> Result<(), QueueError> {
        let mut state = self.state()?;
        if !state.entries.contains_key(key) {
            return Err(QueueError::NotFound(key.to_string()));
        }
        self.repository.remove(key).map_err(QueueError::Storage)?;
        state.entries.remove(key);
        Ok(())
    }

    /// number of mails in the queue, held ones included
    ///
    /// # Errors
    ///
    /// * the queue state is poisoned
    pub fn size(&self) -> Result<usize, QueueError> {
        Ok(self.state()?.entries.len())
    }

    /// status of every mail, sorted by key
    ///
    /// # Errors
    ///
    /// * the queue state is poisoned
    pub fn browse(&self) -> Result<Vec<QueueEntry>, QueueError> {
        let now = tokio::time::Instant::now();
        let state = self.state()?;
        let mut entries = state
            .entries
            .iter()
            .map(|(key, entry)| QueueEntry {
                key: key.clone(),
                status: match entry.status {
                    Status::Ready => EntryStatus::Ready,
                    Status::Delayed { until, .. } => EntryStatus::Delayed(until.saturating_duration_since(now)),
                    Status::InFlight { .. } => EntryStatus::InFlight,
                },
                attempts: entry.attempts,
            })
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// the stored mail, whatever its status
    ///
    /// # Errors
    ///
    /// * the repository failed
    pub fn retrieve(&self, key: &str) -> Result<Option<Mail>, QueueError> {
        self.repository.retrieve(key).map_err(QueueError::Storage)
    }

    /// refuse new mails and wake up the consumers
    pub fn close(&self) {
        if let Ok(mut state) = self.state() {
            state.closed = true;
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}
