//! "First to finish" waits
//!
//! [`when_any`] is single-shot: it reports which handle settled first and
//! leaves every handle in place. Draining a set by completion is a loop of
//! [`next_completed`] calls.

use crate::task::TaskHandle;
use futures::future::select_all;

/// Index of the first handle in `handles` to reach a terminal state
///
/// Returns `None` for an empty slice. When several handles are already
/// terminal the lowest index wins. No outcome is consumed.
pub async fn when_any<T, E>(handles: &[TaskHandle<T, E>]) -> Option<usize> {
    if handles.is_empty() {
        return None;
    }

    let waits = handles.iter().map(|handle| Box::pin(handle.wait()));
    let (_, index, _) = select_all(waits).await;
    Some(index)
}

/// Remove and return the first handle in `pending` to settle
///
/// The returned handle is terminal, so awaiting it does not suspend.
pub async fn next_completed<T, E>(pending: &mut Vec<TaskHandle<T, E>>) -> Option<TaskHandle<T, E>> {
    let index = when_any(pending).await?;
    Some(pending.remove(index))
}
