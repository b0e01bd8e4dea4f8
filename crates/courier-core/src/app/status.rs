//! Status - consumer の処理件数
//!
//! メッセージ単位の失敗は呼び出し元に返らないので、ログ以外で
//! 状況を知る手段としてカウンタを公開します。

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerStats {
    pub received: u64,
    pub acked: u64,
    pub rejected: u64,
    pub recovered_panics: u64,
    /// ack / reject calls the broker refused.
    pub terminate_failures: u64,
    pub stream_failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    received: AtomicU64,
    acked: AtomicU64,
    rejected: AtomicU64,
    recovered_panics: AtomicU64,
    terminate_failures: AtomicU64,
    stream_failures: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn recovered_panic(&self) {
        self.recovered_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn terminate_failed(&self) {
        self.terminate_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stream_failed(&self) {
        self.stream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            received: self.received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            recovered_panics: self.recovered_panics.load(Ordering::Relaxed),
            terminate_failures: self.terminate_failures.load(Ordering::Relaxed),
            stream_failures: self.stream_failures.load(Ordering::Relaxed),
        }
    }
}
