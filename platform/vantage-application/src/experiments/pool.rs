//! Bounded worker pool shared by the optimizers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    Cancelled,
    Incomplete { expected: usize, received: usize },
}

enum WorkerMessage<R> {
    Done { index: usize, result: R },
    Cancelled,
}

pub fn normalize_parallelism(value: Option<usize>) -> usize {
    value.unwrap_or(1).max(1)
}

pub(crate) fn should_cancelled(should_cancel: Option<&(dyn Fn() -> bool + Sync)>) -> bool {
    should_cancel.map(|f| f()).unwrap_or(false)
}

/// Runs `work` over every item with at most `parallelism` concurrent workers and returns the
/// results in input order once all workers have joined. `should_cancel` is consulted before each
/// item is picked up; work already in flight runs to completion.
pub fn run_bounded<T, R, F>(
    items: &[T],
    parallelism: usize,
    should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
    work: F,
) -> Result<Vec<R>, PoolError>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    if parallelism <= 1 || items.len() <= 1 {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if should_cancelled(should_cancel) {
                return Err(PoolError::Cancelled);
            }
            out.push(work(item));
        }
        return Ok(out);
    }

    let worker_count = parallelism.min(items.len());
    let next_index = AtomicUsize::new(0);
    let cancelled = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel::<WorkerMessage<R>>();
    let work = &work;

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let tx = tx.clone();
            let next_index_ref = &next_index;
            let cancelled_ref = &cancelled;
            scope.spawn(move || loop {
                if cancelled_ref.load(Ordering::Relaxed) || should_cancelled(should_cancel) {
                    cancelled_ref.store(true, Ordering::Relaxed);
                    let _ = tx.send(WorkerMessage::Cancelled);
                    break;
                }

                let index = next_index_ref.fetch_add(1, Ordering::Relaxed);
                if index >= items.len() {
                    break;
                }

                let result = work(&items[index]);
                if tx.send(WorkerMessage::Done { index, result }).is_err() {
                    break;
                }
            });
        }

        drop(tx);

        let mut slots: Vec<Option<R>> = (0..items.len()).map(|_| None).collect();
        let mut was_cancelled = false;
        let mut received = 0usize;
        while let Ok(message) = rx.recv() {
            match message {
                WorkerMessage::Done { index, result } => {
                    slots[index] = Some(result);
                    received += 1;
                }
                WorkerMessage::Cancelled => was_cancelled = true,
            }
        }

        if was_cancelled {
            return Err(PoolError::Cancelled);
        }
        if received != items.len() {
            return Err(PoolError::Incomplete {
                expected: items.len(),
                received,
            });
        }
        slots
            .into_iter()
            .collect::<Option<Vec<R>>>()
            .ok_or(PoolError::Incomplete {
                expected: items.len(),
                received,
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn preserves_input_order() {
        let items: Vec<u64> = (0..32).collect();
        let out = run_bounded(&items, 4, None, |v| {
            std::thread::sleep(Duration::from_micros(50 * (32 - *v)));
            v * 2
        })
        .unwrap();
        assert_eq!(out, items.iter().map(|v| v * 2).collect::<Vec<_>>());
    }

    #[test]
    fn never_exceeds_parallelism() {
        let active = AtomicUsize::new(0);
        let high_water = AtomicUsize::new(0);
        let items: Vec<usize> = (0..24).collect();
        run_bounded(&items, 3, None, |_| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            high_water.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            active.fetch_sub(1, Ordering::SeqCst);
        })
        .unwrap();
        let peak = high_water.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 3, "peak concurrency {peak}");
    }

    #[test]
    fn cancellation_before_dispatch_stops_the_pool() {
        let items: Vec<usize> = (0..8).collect();
        let always = || true;
        assert_eq!(
            run_bounded(&items, 2, Some(&always), |v| *v),
            Err(PoolError::Cancelled)
        );
        assert_eq!(
            run_bounded(&items, 1, Some(&always), |v| *v),
            Err(PoolError::Cancelled)
        );
    }

    #[test]
    fn normalizes_parallelism() {
        assert_eq!(normalize_parallelism(None), 1);
        assert_eq!(normalize_parallelism(Some(0)), 1);
        assert_eq!(normalize_parallelism(Some(8)), 8);
    }
}
