// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Object pool for per-call pickers.
//!
//! An object leaves the pool wrapped in a [`Pooled`] handle. Releasing the handle, explicitly
//! with [`Pooled::recycle`] or by dropping it, resets the object and returns it exactly once.
//! Since the handle is consumed on release, a recycled object cannot be reached through it
//! anymore.

use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Default number of idle objects kept by a pool.
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// Objects that can be brought back to their initial state.
pub trait Reset {
    /// After `reset`, the object must be indistinguishable from `Default::default()`.
    fn reset(&mut self);
}

/// A pool of reusable objects.
pub struct PickerPool<T> {
    idle: Mutex<Vec<Box<T>>>,
    capacity: usize,
    created: AtomicUsize,
}

impl<T: Default + Reset> PickerPool<T> {
    /// Creates a pool keeping at most `capacity` idle objects.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            idle: Mutex::new(Vec::new()),
            capacity,
            created: AtomicUsize::new(0),
        })
    }

    /// Takes an idle object, or creates one if none is idle.
    pub fn get(self: &Arc<Self>) -> Pooled<T> {
        let obj = self.idle.lock().pop();
        let obj = obj.unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            Box::default()
        });
        Pooled { obj: Some(obj), pool: self.clone() }
    }

    /// Number of idle objects.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Number of objects created by the pool so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Drops every idle object.
    pub fn clear(&self) {
        self.idle.lock().clear();
    }

    fn put(&self, mut obj: Box<T>) {
        obj.reset();
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(obj);
        }
    }
}

impl<T> fmt::Debug for PickerPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PickerPool")
            .field("idle", &self.idle.lock().len())
            .field("capacity", &self.capacity)
            .field("created", &self.created.load(Ordering::Relaxed))
            .finish()
    }
}

/// An object on loan from a [`PickerPool`].
pub struct Pooled<T: Default + Reset> {
    obj: Option<Box<T>>,
    pool: Arc<PickerPool<T>>,
}

impl<T: Default + Reset> Pooled<T> {
    /// Resets the object and gives it back to the pool.
    pub fn recycle(self) {}
}

impl<T: Default + Reset> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.obj {
            Some(obj) => obj,
            None => unreachable!("pooled object is only taken on drop"),
        }
    }
}

impl<T: Default + Reset> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.obj {
            Some(obj) => obj,
            None => unreachable!("pooled object is only taken on drop"),
        }
    }
}

impl<T: Default + Reset> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(obj) = self.obj.take() {
            self.pool.put(obj);
        }
    }
}

impl<T: Default + Reset + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&**self).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Buffer {
        owner: Option<String>,
        items: Vec<u32>,
        touched: bool,
    }

    impl Reset for Buffer {
        fn reset(&mut self) {
            self.owner = None;
            self.items.clear();
            self.touched = false;
        }
    }

    #[test]
    fn test_recycle_resets() {
        let pool = PickerPool::<Buffer>::new(4);
        let mut buf = pool.get();
        buf.owner = Some("call-1".to_string());
        buf.items.extend([1, 2, 3]);
        buf.touched = true;
        buf.recycle();
        assert_eq!(pool.idle(), 1);

        let buf = pool.get();
        assert_eq!(*buf, Buffer::default());
        // the buffer was reused, keeping its allocation
        assert!(buf.items.capacity() >= 3);
        assert_eq!(pool.created(), 1);
    }

    #[test]
    fn test_drop_returns_once() {
        let pool = PickerPool::<Buffer>::new(4);
        {
            let _a = pool.get();
            let _b = pool.get();
        }
        assert_eq!(pool.idle(), 2);
        assert_eq!(pool.created(), 2);
    }

    #[test]
    fn test_capacity() {
        let pool = PickerPool::<Buffer>::new(1);
        let a = pool.get();
        let b = pool.get();
        a.recycle();
        b.recycle();
        assert_eq!(pool.idle(), 1);
        pool.clear();
        assert_eq!(pool.idle(), 0);
        let mut c = pool.get();
        c.touched = true;
        assert_eq!(pool.created(), 3);
    }

    #[test]
    fn test_concurrent_get_put() {
        let pool = PickerPool::<Buffer>::new(64);
        std::thread::scope(|s| {
            for t in 0..8 {
                let pool = pool.clone();
                s.spawn(move || {
                    for i in 0..1000 {
                        let mut buf = pool.get();
                        assert_eq!(buf.owner, None);
                        assert!(buf.items.is_empty());
                        buf.owner = Some(format!("{t}-{i}"));
                        buf.items.push(i);
                    }
                });
            }
        });
        assert!(pool.created() <= 8);
    }
}
