//! WorkerPool - panic を境界で止める task pool
//!
//! - `go()` は即座に return する（spawn するだけで、ここでは backpressure をかけない）
//! - `wait()` は実行中の全 task が終わるまで待つ。実行中の task が `go()` した
//!   task も含む
//! - panic は task の中で捕まえて recover callback に渡す。兄弟 task や
//!   `go()` の呼び出し元には伝播しない
//! - キャンセルは cooperative。pool は実行中の task を abort しない

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::error;

/// Called with the pool token and the panic message of a crashed task.
pub type RecoverFn = Arc<dyn Fn(&CancellationToken, &str) + Send + Sync>;

#[derive(Clone)]
pub struct WorkerPool {
    token: CancellationToken,
    tracker: TaskTracker,
    recover: RecoverFn,
}

impl WorkerPool {
    /// The pool token is a child of `root`: cancelling `root` cancels the pool.
    pub fn new(root: &CancellationToken) -> Self {
        Self {
            token: root.child_token(),
            tracker: TaskTracker::new(),
            recover: Arc::new(|_token: &CancellationToken, panic: &str| {
                error!(panic = %panic, "recover");
            }),
        }
    }

    pub fn with_recover(mut self, recover: RecoverFn) -> Self {
        self.recover = recover;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Number of scheduled functions that have not returned yet.
    pub fn running(&self) -> usize {
        self.tracker.len()
    }

    /// Hand a panic caught outside `go` (e.g. per message) to the recover
    /// callback.
    pub fn recover(&self, panic: &str) {
        (self.recover)(&self.token, panic);
    }

    /// Schedule `f` on the runtime and return immediately.
    pub fn go<F, Fut>(&self, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        let recover = Arc::clone(&self.recover);

        self.tracker.spawn(async move {
            // f の呼び出し自体も catch_unwind の内側に入れる
            let task_token = token.clone();
            let run = AssertUnwindSafe(async move { f(task_token).await }).catch_unwind();
            if let Err(panic) = run.await {
                recover(&token, &panic_message(panic.as_ref()));
            }
        });
    }

    /// Block until every scheduled function has returned.
    ///
    /// Functions may still be scheduled after `wait()` starts; they are waited
    /// for as long as they are submitted before the pool drains.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn wait_covers_functions_scheduled_by_running_functions() {
        let pool = WorkerPool::new(&CancellationToken::new());
        let done = Arc::new(AtomicUsize::new(0));

        let inner_pool = pool.clone();
        let outer_done = Arc::clone(&done);
        pool.go(move |_token| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let inner_done = Arc::clone(&outer_done);
            inner_pool.go(move |_token| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                inner_done.fetch_add(1, Ordering::SeqCst);
            });
            outer_done.fetch_add(1, Ordering::SeqCst);
        });

        pool.wait().await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert_eq!(pool.running(), 0);
    }

    async fn explode_static() {
        panic!("kaboom")
    }

    async fn explode(detail: String) {
        panic!("{detail} kaboom")
    }

    #[tokio::test]
    async fn panics_are_recovered_and_pool_stays_live() {
        let recovered = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&recovered);
        let pool = WorkerPool::new(&CancellationToken::new()).with_recover(Arc::new(
            move |_token: &CancellationToken, panic: &str| sink.lock().push(panic.to_string()),
        ));

        pool.go(|_token| explode_static());
        pool.go(|_token| explode(String::from("formatted")));

        let survived = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&survived);
        pool.go(move |_token| async move {
            flag.fetch_add(1, Ordering::SeqCst);
        });

        pool.wait().await;

        let mut messages = recovered.lock().clone();
        messages.sort();
        assert_eq!(messages, vec!["formatted kaboom".to_string(), "kaboom".to_string()]);
        assert_eq!(survived.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn root_cancellation_reaches_scheduled_functions() {
        let root = CancellationToken::new();
        let pool = WorkerPool::new(&root);

        let observed = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&observed);
        pool.go(move |token| async move {
            token.cancelled().await;
            flag.fetch_add(1, Ordering::SeqCst);
        });

        root.cancel();
        pool.wait().await;
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }
}
