//! ObjectPool - デコード先オブジェクトの再利用
//!
//! # 学習ポイント
//! - RAII guard (`Pooled<T>`) の Drop で pool に返却する
//!   （エラー経路や panic の unwind でも返却漏れが起きない）
//! - `parking_lot::Mutex` で free list を保護。lock は push/pop の間だけ
//! - 返却時に `Reusable::reset()` を呼ぶので、次の acquire で前の中身は見えない

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

/// Objects that can be scrubbed and handed out again.
pub trait Reusable: Default + Send {
    fn reset(&mut self);
}

pub struct ObjectPool<T> {
    free: Mutex<Vec<T>>,
    capacity: usize,
}

impl<T: Reusable> ObjectPool<T> {
    /// `capacity` bounds how many idle objects are retained, not how many
    /// can be live at once.
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Take an idle object, or build a fresh one when none is idle.
    pub fn acquire(self: &Arc<Self>) -> Pooled<T> {
        let value = self.free.lock().pop().unwrap_or_default();
        Pooled {
            value,
            pool: Arc::clone(self),
        }
    }

    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    fn release(&self, mut value: T) {
        value.reset();
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(value);
        }
    }
}

/// Exclusive handle on a pooled object; returns it to the pool on drop.
pub struct Pooled<T: Reusable> {
    value: T,
    pool: Arc<ObjectPool<T>>,
}

impl<T: Reusable> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Reusable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Reusable> Drop for Pooled<T> {
    fn drop(&mut self) {
        // Default は空の値なので take のコストは無視できる
        self.pool.release(std::mem::take(&mut self.value));
    }
}
