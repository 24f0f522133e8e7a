//! Bounded free lists for per-trajectory scratch objects.

use std::{
    any::{
        Any,
        TypeId,
    },
    collections::HashMap,
    sync::{
        Arc,
        OnceLock,
    },
};

use parking_lot::{
    Mutex,
    RwLock,
};

pub const DEFAULT_CAPACITY: usize = 500;

/// Objects that can be returned to their freshly constructed state in place.
pub trait Recycle {
    fn reset(&mut self);
}

/// A free list holding at most `capacity` idle objects. Released objects are reset before
/// they are kept, so an idle object holds nothing. Releasing into a full pool drops the
/// object; acquiring from an empty one allocates.
pub struct Pool<T: Recycle + Default> {
    free: Mutex<Vec<T>>,
    capacity: usize,
}

impl<T: Recycle + Default> Default for Pool<T> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl<T: Recycle + Default> Pool<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Pool {
            free: Mutex::new(Vec::new()),
            capacity,
        }
    }

    pub fn acquire(&self) -> T {
        let recycled = self.free.lock().pop();
        recycled.unwrap_or_default()
    }

    pub fn release(&self, mut item: T) {
        item.reset();
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(item);
        }
    }

    /// Idle objects currently pooled.
    pub fn len(&self) -> usize {
        self.free.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Pools indexed by the type they hold.
#[derive(Default)]
pub struct PoolRegistry {
    pools: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T>(&self) -> Arc<Pool<T>>
    where
        T: Recycle + Default + Send + 'static,
    {
        let id = TypeId::of::<T>();
        let existing = self.pools.read().get(&id).cloned();
        let pool = match existing {
            Some(pool) => pool,
            None => {
                let mut pools = self.pools.write();
                let pool = pools.entry(id).or_insert_with(|| Arc::new(Pool::<T>::default()));
                Arc::clone(pool)
            }
        };
        match pool.downcast::<Pool<T>>() {
            Ok(pool) => pool,
            // the map only ever holds `Pool<T>` under `TypeId::of::<T>()`
            Err(_) => unreachable!("pool registered under a foreign type id"),
        }
    }
}

/// The process-wide pool for `T`.
pub fn pool<T>() -> Arc<Pool<T>>
where
    T: Recycle + Default + Send + 'static,
{
    static REGISTRY: OnceLock<PoolRegistry> = OnceLock::new();
    REGISTRY.get_or_init(PoolRegistry::new).get::<T>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Scratch {
        path: Vec<u8>,
        shared: Vec<Arc<u8>>,
        total: f64,
        done: bool,
    }

    impl Recycle for Scratch {
        fn reset(&mut self) {
            self.path.clear();
            self.shared.clear();
            self.total = 0.0;
            self.done = false;
        }
    }

    #[test]
    fn test_acquire_after_release_is_fresh() {
        let pool = Pool::<Scratch>::default();
        let mut item = pool.acquire();
        item.path.extend([1, 2, 3]);
        item.total = 4.5;
        item.done = true;
        pool.release(item);
        assert_eq!(1, pool.len());

        let item = pool.acquire();
        assert_eq!(Scratch::default(), item);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_idle_objects_hold_nothing() {
        let pool = Pool::<Scratch>::default();
        let shared = Arc::new(7);
        let mut item = pool.acquire();
        item.shared.push(Arc::clone(&shared));
        assert_eq!(2, Arc::strong_count(&shared));
        pool.release(item);
        assert_eq!(1, pool.len());
        assert_eq!(1, Arc::strong_count(&shared));
    }

    #[test]
    fn test_release_beyond_capacity_discards() {
        let pool = Pool::<Scratch>::with_capacity(2);
        for _ in 0..5 {
            pool.release(Scratch::default());
        }
        assert_eq!(2, pool.len());
        for _ in 0..3 {
            // a miss allocates instead of failing
            assert_eq!(Scratch::default(), pool.acquire());
        }
        assert!(pool.is_empty());
    }

    #[test]
    fn test_registry_returns_the_same_pool_per_type() {
        let registry = PoolRegistry::new();
        let a = registry.get::<Scratch>();
        let b = registry.get::<Scratch>();
        assert!(Arc::ptr_eq(&a, &b));
        a.release(Scratch::default());
        assert_eq!(1, b.len());
        assert_eq!(DEFAULT_CAPACITY, a.capacity());
    }
}
