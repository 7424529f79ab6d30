//! Aggregate waits over many task handles
//!
//! - [`wait_all_or_first_failure`] resolves as soon as the first input
//!   faults, or with every value in input order once all inputs completed.
//!   Siblings of a faulted input keep running; their results are discarded.
//! - [`wait_all`] waits for every input and reports every failure.

use crate::error::TaskError;
use crate::task::{Completer, TaskHandle, TaskOutcome};
use parking_lot::Mutex;
use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Outcome of [`wait_all_or_first_failure`]
///
/// `Completed` carries the values in input order, `Faulted` the first fault.
pub type AggregateOutcome<T, E> = TaskOutcome<Vec<T>, E>;

struct Countdown<T, E> {
    completer: Completer<Vec<T>, E>,
    remaining: AtomicUsize,
    values: Mutex<Vec<Option<T>>>,
}

impl<T, E> Countdown<T, E> {
    fn record(&self, index: usize, outcome: TaskOutcome<T, E>) {
        match outcome {
            TaskOutcome::Completed(value) => {
                if !self.completer.is_set() {
                    self.values.lock()[index] = Some(value);
                }
            }
            TaskOutcome::Faulted(error) => {
                if self.completer.try_fault(error) {
                    debug!(index, "aggregate short-circuited on first fault");
                }
            }
            TaskOutcome::Canceled => {
                if self.completer.try_cancel() {
                    debug!(index, "aggregate canceled by input");
                }
            }
        }

        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 && !self.completer.is_set() {
            let values: Option<Vec<T>> = std::mem::take(&mut *self.values.lock())
                .into_iter()
                .collect();
            match values {
                Some(values) => self.completer.try_complete(values),
                None => self.completer.try_cancel(),
            };
        }
    }
}

/// Wait for every handle, or return early on the first fault
///
/// A canceled input resolves the aggregate as `Canceled` unless a fault was
/// recorded first. An empty input completes immediately with an empty
/// vector.
pub fn wait_all_or_first_failure<T, E, I>(handles: I) -> TaskHandle<Vec<T>, E>
where
    I: IntoIterator<Item = TaskHandle<T, E>>,
    T: Send + 'static,
    E: Send + 'static,
{
    let inputs: Vec<_> = handles.into_iter().collect();
    if inputs.is_empty() {
        return TaskHandle::completed(Vec::new());
    }

    let (completer, aggregate) = TaskHandle::pending();
    let countdown = Arc::new(Countdown {
        completer,
        remaining: AtomicUsize::new(inputs.len()),
        values: Mutex::new((0..inputs.len()).map(|_| None).collect()),
    });

    for (index, input) in inputs.into_iter().enumerate() {
        let countdown = Arc::clone(&countdown);
        input.on_complete(move |outcome| countdown.record(index, outcome));
    }

    aggregate
}

/// Wait for every handle and collect the values in input order
///
/// Unlike [`wait_all_or_first_failure`] this never returns early; on
/// failure the error lists every input that did not complete.
pub async fn wait_all<T, E, I>(handles: I) -> Result<Vec<T>, AggregateError<E>>
where
    I: IntoIterator<Item = TaskHandle<T, E>>,
{
    let outcomes = futures::future::join_all(handles).await;
    let total = outcomes.len();

    let mut values = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for (index, outcome) in outcomes.into_iter().enumerate() {
        match outcome.into_result() {
            Ok(value) => values.push(value),
            Err(error) => failures.push((index, error)),
        }
    }

    if failures.is_empty() {
        Ok(values)
    } else {
        Err(AggregateError { failures, total })
    }
}

/// Every failure observed by [`wait_all`]
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateError<E> {
    failures: Vec<(usize, TaskError<E>)>,
    total: usize,
}

impl<E> AggregateError<E> {
    /// `(input index, error)` pairs in input order
    pub fn failures(&self) -> &[(usize, TaskError<E>)] {
        &self.failures
    }

    pub fn first(&self) -> Option<&TaskError<E>> {
        self.failures.first().map(|(_, error)| error)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn into_failures(self) -> Vec<(usize, TaskError<E>)> {
        self.failures
    }
}

impl<E: fmt::Display> fmt::Display for AggregateError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} tasks failed", self.failures.len(), self.total)?;
        for (index, error) in &self.failures {
            write!(f, "; [{}] {}", index, error)?;
        }
        Ok(())
    }
}

impl<E: StdError + 'static> StdError for AggregateError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.failures
            .iter()
            .find_map(|(_, error)| error.fault())
            .map(|error| error as &(dyn StdError + 'static))
    }
}
