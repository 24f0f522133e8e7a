//! Parallel production with strictly ordered consumption.

use std::{
    collections::BTreeMap,
    marker::PhantomData,
    panic::{
        self,
        AssertUnwindSafe,
    },
    sync::{
        atomic::{
            AtomicBool,
            AtomicUsize,
            Ordering,
        },
        Arc,
    },
};

use log::warn;
use parking_lot::Mutex;
use rayon::{
    ThreadPool,
    ThreadPoolBuilder,
};

pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Cooperative stop signal shared between a driver and whoever wants to halt it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Items are indexed `0, 1, 2, ...`. `produce` may run for many indices at once;
/// `consume` sees them one by one in index order on the thread calling [`Pipeline::run`].
/// `is_complete(i)` is asked about the next index to consume and must stay true once it
/// turned true. A panicking `produce` stops the run and the panic resumes on the caller.
pub struct Pipeline<'a, T, E, P, C, D>
where
    P: Fn(usize) -> T + Sync,
    C: FnMut(usize, T) -> Result<(), E>,
    D: Fn(usize) -> bool + Sync,
    T: Send,
{
    produce: P,
    consume: C,
    is_complete: D,
    workers: Option<&'a ThreadPool>,
    max_in_flight: usize,
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<'a, T, E, P, C, D> Pipeline<'a, T, E, P, C, D>
where
    P: Fn(usize) -> T + Sync,
    C: FnMut(usize, T) -> Result<(), E>,
    D: Fn(usize) -> bool + Sync,
    T: Send,
{
    pub fn new(produce: P, consume: C, is_complete: D) -> Self {
        Pipeline {
            produce,
            consume,
            is_complete,
            workers: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            _marker: PhantomData,
        }
    }

    pub fn with_workers(mut self, workers: &'a ThreadPool) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Upper bound on how far production may run ahead of consumption.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Runs until `is_complete` holds or `consume` fails. Returns the number of items
    /// consumed.
    pub fn run(self, parallel: bool) -> Result<usize, E> {
        if !parallel {
            return self.run_sequential();
        }
        match self.workers {
            Some(workers) => self.run_parallel(workers),
            None => match ThreadPoolBuilder::new().build() {
                Ok(workers) => self.run_parallel(&workers),
                Err(err) => {
                    warn!("failed to build a worker pool, running sequentially: {}", err);
                    self.run_sequential()
                }
            },
        }
    }

    fn run_sequential(self) -> Result<usize, E> {
        let Pipeline {
            produce,
            mut consume,
            is_complete,
            ..
        } = self;
        let mut index = 0;
        while !is_complete(index) {
            let item = produce(index);
            consume(index, item)?;
            index += 1;
        }
        Ok(index)
    }

    fn run_parallel(self, workers: &ThreadPool) -> Result<usize, E> {
        let Pipeline {
            produce,
            mut consume,
            is_complete,
            max_in_flight,
            ..
        } = self;
        let next_claim = AtomicUsize::new(0);
        let next_consume = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let staged: Mutex<BTreeMap<usize, std::thread::Result<T>>> = Mutex::new(BTreeMap::new());

        let produce = &produce;
        let is_complete = &is_complete;
        let (next_claim, next_consume) = (&next_claim, &next_consume);
        let (abort, staged) = (&abort, &staged);

        let outcome = workers.in_place_scope(|scope| {
            for _ in 0..workers.current_num_threads() {
                scope.spawn(move |_| loop {
                    if abort.load(Ordering::Acquire) {
                        return;
                    }
                    let index = next_claim.fetch_add(1, Ordering::AcqRel);
                    if is_complete(index) {
                        return;
                    }
                    while index >= next_consume.load(Ordering::Acquire) + max_in_flight {
                        if abort.load(Ordering::Acquire) {
                            return;
                        }
                        std::thread::yield_now();
                    }
                    let item = panic::catch_unwind(AssertUnwindSafe(|| produce(index)));
                    staged.lock().insert(index, item);
                });
            }

            let mut index = 0;
            let mut batch = Vec::new();
            let result = loop {
                if is_complete(index) {
                    break Ok(Ok(index));
                }
                {
                    let mut staged = staged.lock();
                    let mut next = index;
                    while let Some(item) = staged.remove(&next) {
                        batch.push(item);
                        next += 1;
                        if is_complete(next) {
                            break;
                        }
                    }
                }
                if batch.is_empty() {
                    std::thread::yield_now();
                    continue;
                }
                let mut failed = None;
                for item in batch.drain(..) {
                    let consumed = match item {
                        Ok(item) => consume(index, item).map_err(Ok),
                        Err(payload) => Err(Err(payload)),
                    };
                    if let Err(err) = consumed {
                        failed = Some(err);
                        break;
                    }
                    index += 1;
                    next_consume.store(index, Ordering::Release);
                }
                match failed {
                    Some(Ok(err)) => break Ok(Err(err)),
                    Some(Err(payload)) => break Err(payload),
                    None => {}
                }
            };
            abort.store(true, Ordering::Release);
            result
        });
        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{
        Duration,
        Instant,
    };

    use rand::Rng;

    use super::*;

    fn workers() -> ThreadPool {
        ThreadPoolBuilder::new().num_threads(4).build().unwrap()
    }

    #[test]
    fn test_parallel_consumption_is_in_order() {
        let pool = workers();
        let mut consumed: Vec<(usize, usize, Instant)> = vec![];
        let count = Pipeline::new(
            |i| {
                let delay = rand::thread_rng().gen_range(0..300);
                std::thread::sleep(Duration::from_micros(delay));
                i * 10
            },
            |i, item| -> Result<(), ()> {
                consumed.push((i, item, Instant::now()));
                Ok(())
            },
            |i| i >= 200,
        )
        .with_workers(&pool)
        .with_max_in_flight(16)
        .run(true)
        .unwrap();

        assert_eq!(200, count);
        assert_eq!(200, consumed.len());
        for (expected, (i, item, _)) in consumed.iter().enumerate() {
            assert_eq!(expected, *i);
            assert_eq!(expected * 10, *item);
        }
        for pair in consumed.windows(2) {
            assert!(pair[0].2 <= pair[1].2);
        }
    }

    #[test]
    fn test_sequential_interleaves() {
        let log = Mutex::new(vec![]);
        let count = Pipeline::new(
            |i| {
                log.lock().push(format!("p{}", i));
                i
            },
            |i, _| -> Result<(), ()> {
                log.lock().push(format!("c{}", i));
                Ok(())
            },
            |i| i == 3,
        )
        .run(false)
        .unwrap();
        assert_eq!(3, count);
        assert_eq!(vec!["p0", "c0", "p1", "c1", "p2", "c2"], *log.lock());
    }

    #[test]
    fn test_consumer_error_stops_the_run() {
        let pool = workers();
        let mut seen = vec![];
        let result = Pipeline::new(
            |i| i,
            |i, _| {
                if i == 7 {
                    return Err(format!("bad item {}", i));
                }
                seen.push(i);
                Ok(())
            },
            |_| false,
        )
        .with_workers(&pool)
        .run(true);
        assert_eq!(Err("bad item 7".to_string()), result);
        assert_eq!((0..7).collect::<Vec<_>>(), seen);
    }

    #[test]
    fn test_producer_panic_resumes_on_the_caller() {
        let pool = workers();
        let mut seen = vec![];
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            Pipeline::new(
                |i| {
                    if i == 3 {
                        panic!("producer failed at {}", i);
                    }
                    i
                },
                |i, _| -> Result<(), ()> {
                    seen.push(i);
                    Ok(())
                },
                |i| i >= 8,
            )
            .with_workers(&pool)
            .run(true)
        }));
        assert!(result.is_err());
        assert_eq!(vec![0, 1, 2], seen);

        // the pool is still usable afterwards
        let count = Pipeline::new(|i| i, |_, _| -> Result<(), ()> { Ok(()) }, |i| i >= 8)
            .with_workers(&pool)
            .run(true)
            .unwrap();
        assert_eq!(8, count);
    }

    #[test]
    fn test_nothing_to_do() {
        let count = Pipeline::new(|i| i, |_, _| -> Result<(), ()> { Ok(()) }, |_| true)
            .run(true)
            .unwrap();
        assert_eq!(0, count);
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
