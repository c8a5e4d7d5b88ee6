//! In-memory portal used by the loop and controller tests.

use super::{ApiReply, Portal};
use crate::error::PortalError;
use crate::model::SeatStatus;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub(crate) enum Scripted<T> {
    Reply(ApiReply<T>),
    Fail(String),
    Panic,
    /// Reply after holding the request open for a while.
    Slow(Duration, ApiReply<T>),
}

/// Replays scripted replies in order; the last entry repeats forever.
pub(crate) struct ScriptedPortal {
    statuses: Mutex<VecDeque<Scripted<SeatStatus>>>,
    enrolls: Mutex<VecDeque<Scripted<()>>>,
    pub status_calls: AtomicUsize,
    pub enroll_calls: AtomicUsize,
}

pub(crate) fn seats(capacity: u32, enrolled_count: u32) -> Scripted<SeatStatus> {
    Scripted::Reply(ApiReply::ok(SeatStatus {
        capacity,
        enrolled_count,
    }))
}

pub(crate) fn code<T>(code: i64, message: &str) -> Scripted<T> {
    Scripted::Reply(ApiReply::failed(code, message))
}

pub(crate) fn enrolled() -> Scripted<()> {
    Scripted::Reply(ApiReply::ok(()))
}

pub(crate) fn slow_seats(
    delay: Duration,
    capacity: u32,
    enrolled_count: u32,
) -> Scripted<SeatStatus> {
    Scripted::Slow(
        delay,
        ApiReply::ok(SeatStatus {
            capacity,
            enrolled_count,
        }),
    )
}

fn pick<T: Clone>(queue: &Mutex<VecDeque<Scripted<T>>>) -> Scripted<T> {
    let mut q = queue.lock().unwrap();
    if q.len() > 1 {
        if let Some(item) = q.pop_front() {
            return item;
        }
    }
    match q.front() {
        Some(Scripted::Reply(r)) => Scripted::Reply(r.clone()),
        Some(Scripted::Fail(m)) => Scripted::Fail(m.clone()),
        Some(Scripted::Panic) => Scripted::Panic,
        Some(Scripted::Slow(d, r)) => Scripted::Slow(*d, r.clone()),
        None => panic!("no scripted reply"),
    }
}

async fn next<T: Clone>(
    queue: &Mutex<VecDeque<Scripted<T>>>,
) -> Result<ApiReply<T>, PortalError> {
    match pick(queue) {
        Scripted::Reply(r) => Ok(r),
        Scripted::Fail(m) => Err(PortalError::decode(m)),
        Scripted::Panic => panic!("scripted portal panic"),
        Scripted::Slow(delay, r) => {
            tokio::time::sleep(delay).await;
            Ok(r)
        }
    }
}

impl ScriptedPortal {
    pub fn new(statuses: Vec<Scripted<SeatStatus>>, enrolls: Vec<Scripted<()>>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            enrolls: Mutex::new(enrolls.into()),
            status_calls: AtomicUsize::new(0),
            enroll_calls: AtomicUsize::new(0),
        }
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn enroll_calls(&self) -> usize {
        self.enroll_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Portal for ScriptedPortal {
    async fn query_status(
        &self,
        _section_id: &str,
        _execution_id: &str,
    ) -> Result<ApiReply<SeatStatus>, PortalError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        next(&self.statuses).await
    }

    async fn attempt_enroll(
        &self,
        _section_id: &str,
        _execution_id: &str,
    ) -> Result<ApiReply<()>, PortalError> {
        self.enroll_calls.fetch_add(1, Ordering::SeqCst);
        next(&self.enrolls).await
    }
}
