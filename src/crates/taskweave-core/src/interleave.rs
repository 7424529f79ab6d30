//! Completion-order multiplexing
//!
//! [`interleave`] turns N handles into N new handles ("slots") such that
//! slot `i` resolves with the outcome of the `i`-th input to finish. Each
//! input claims its slot with an atomic `fetch_add` when it settles, so the
//! binding depends only on the order in which inputs reach a terminal
//! state.
//!
//! ```rust,ignore
//! let mut total = 0;
//! for slot in interleave(handles) {
//!     // slots resolve in completion order
//!     total += slot.result().await?;
//! }
//! ```

use crate::task::{Completer, TaskHandle, TaskOutcome};
use futures::Stream;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::debug;

/// Reorder `handles` into completion order
///
/// Returns exactly as many slots as there were inputs. Faulted and canceled
/// inputs produce faulted and canceled slots; nothing is dropped.
pub fn interleave<T, E, I>(handles: I) -> Vec<TaskHandle<T, E>>
where
    I: IntoIterator<Item = TaskHandle<T, E>>,
    T: Send + 'static,
    E: Send + 'static,
{
    let inputs: Vec<_> = handles.into_iter().collect();
    let (completers, slots): (Vec<Completer<T, E>>, Vec<TaskHandle<T, E>>) =
        (0..inputs.len()).map(|_| TaskHandle::pending()).unzip();

    let completers = Arc::new(completers);
    let next_slot = Arc::new(AtomicUsize::new(0));

    for input in inputs {
        let completers = Arc::clone(&completers);
        let next_slot = Arc::clone(&next_slot);
        let task_id = input.id();

        input.on_complete(move |outcome| {
            let slot = next_slot.fetch_add(1, Ordering::AcqRel);
            debug!(%task_id, slot, state = %outcome.state(), "completion bound to slot");
            if let Some(completer) = completers.get(slot) {
                completer.try_set(outcome);
            }
        });
    }

    slots
}

/// [`Stream`] over interleaved outcomes
///
/// Yields one [`TaskOutcome`] per input in completion order, then ends.
pub struct InterleavedCompletionStream<T, E> {
    slots: VecDeque<TaskHandle<T, E>>,
}

impl<T, E> InterleavedCompletionStream<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new<I>(handles: I) -> Self
    where
        I: IntoIterator<Item = TaskHandle<T, E>>,
    {
        Self {
            slots: interleave(handles).into(),
        }
    }
}

impl<T, E> InterleavedCompletionStream<T, E> {
    /// Number of outcomes not yet yielded
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The remaining slots, in completion order
    pub fn into_slots(self) -> Vec<TaskHandle<T, E>> {
        self.slots.into()
    }
}

impl<T, E> Stream for InterleavedCompletionStream<T, E> {
    type Item = TaskOutcome<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(front) = this.slots.front_mut() else {
            return Poll::Ready(None);
        };

        match Pin::new(front).poll(cx) {
            Poll::Ready(outcome) => {
                this.slots.pop_front();
                Poll::Ready(Some(outcome))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.slots.len(), Some(self.slots.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use proptest::prelude::*;
    use std::time::Duration;

    fn delayed(value: u64, millis: u64) -> TaskHandle<u64, String> {
        TaskHandle::spawn(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(value)
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_slots_follow_completion_order() {
        let handles = vec![delayed(0, 300), delayed(1, 100), delayed(2, 200)];
        let slots = interleave(handles);
        assert_eq!(slots.len(), 3);

        let mut order = Vec::new();
        for slot in slots {
            order.push(slot.result().await.unwrap());
        }
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_surfaces_in_its_slot() {
        let failing = TaskHandle::spawn(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err::<u64, _>("bad gateway".to_string())
        });
        let handles = vec![delayed(7, 100), failing, TaskHandle::canceled()];

        let outcomes: Vec<_> = InterleavedCompletionStream::new(handles).collect().await;

        assert_eq!(
            outcomes,
            vec![
                TaskOutcome::Canceled,
                TaskOutcome::Faulted("bad gateway".to_string()),
                TaskOutcome::Completed(7),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_input() {
        let slots = interleave(Vec::<TaskHandle<u64, String>>::new());
        assert!(slots.is_empty());

        let mut stream = InterleavedCompletionStream::new(Vec::<TaskHandle<u64, String>>::new());
        assert!(stream.is_empty());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_len_tracks_remaining() {
        let mut stream = InterleavedCompletionStream::new(vec![delayed(1, 10), delayed(2, 20)]);
        assert_eq!(stream.len(), 2);
        assert_eq!(stream.size_hint(), (2, Some(2)));

        assert_eq!(stream.next().await, Some(TaskOutcome::Completed(1)));
        assert_eq!(stream.len(), 1);

        let rest = stream.into_slots();
        assert_eq!(rest.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_simultaneous_completions_never_collide() {
        const N: usize = 256;

        let (completers, handles): (Vec<_>, Vec<_>) =
            (0..N).map(|_| TaskHandle::<usize, String>::pending()).unzip();
        let slots = interleave(handles);

        let barrier = Arc::new(tokio::sync::Barrier::new(N));
        let mut workers = Vec::with_capacity(N);
        for (value, completer) in completers.into_iter().enumerate() {
            let barrier = Arc::clone(&barrier);
            workers.push(tokio::spawn(async move {
                barrier.wait().await;
                completer.try_complete(value);
            }));
        }
        for worker in workers {
            worker.await.unwrap();
        }

        let mut values = Vec::with_capacity(N);
        for slot in slots {
            values.push(slot.result().await.unwrap());
        }
        values.sort_unstable();
        assert_eq!(values, (0..N).collect::<Vec<_>>());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_slot_i_is_ith_completion(
            delays in Just((0u64..8).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let values = runtime.block_on(async {
                let handles: Vec<_> = delays
                    .iter()
                    .map(|&delay| delayed(delay, (delay + 1) * 10))
                    .collect();

                let mut values = Vec::new();
                for slot in interleave(handles) {
                    values.push(slot.result().await.unwrap());
                }
                values
            });

            prop_assert_eq!(values, (0u64..8).collect::<Vec<_>>());
        }
    }
}
