use futures::FutureExt;
use futures::future::Shared;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;

use crate::error::FieldError;

/// Scheduling ticks a dispatching caller waits so that sibling resolvers can
/// enqueue their keys first.
const COALESCE_YIELDS: usize = 4;

type PendingResult = Result<Value, FieldError>;
type SharedResult = Shared<oneshot::Receiver<PendingResult>>;

#[derive(Default)]
struct LoaderState {
    cache: HashMap<String, SharedResult>,
    pending: Vec<(Value, oneshot::Sender<PendingResult>)>,
    dispatching: bool,
}

/// Per-request key to result cache that coalesces the keys requested within
/// one scheduling tick into a single batch call.
///
/// The caller that enqueues the first key of a batch dispatches it using the
/// batch function it passed in; the other callers of that batch only wait for
/// their slot. Results are matched to keys by position.
#[derive(Default)]
pub struct BatchLoader {
    state: Mutex<LoaderState>,
}

impl BatchLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load<F, Fut>(&self, key: Value, batch_fn: F) -> Result<Value, FieldError>
    where
        F: FnOnce(Vec<Value>) -> Fut,
        Fut: Future<Output = Result<Vec<Value>, FieldError>>,
    {
        let cache_key = key.to_string();
        let (receiver, dispatch) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match state.cache.get(&cache_key) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let (sender, receiver) = oneshot::channel();
                    let receiver = receiver.shared();
                    state.cache.insert(cache_key, receiver.clone());
                    state.pending.push((key, sender));
                    let dispatch = !state.dispatching;
                    state.dispatching = true;
                    (receiver, dispatch)
                }
            }
        };

        if dispatch {
            for _ in 0..COALESCE_YIELDS {
                tokio::task::yield_now().await;
            }
            let pending = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                state.dispatching = false;
                std::mem::take(&mut state.pending)
            };
            let (keys, senders): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
            tracing::debug!(keys = keys.len(), "dispatching batch");
            match batch_fn(keys).await {
                Ok(values) => {
                    let mut values = values.into_iter();
                    for sender in senders {
                        let _ = sender.send(Ok(values.next().unwrap_or(Value::Null)));
                    }
                }
                Err(error) => {
                    for sender in senders {
                        let _ = sender.send(Err(error.clone()));
                    }
                }
            }
        }

        receiver
            .await
            .map_err(|_| FieldError::new("batch was cancelled before it completed"))?
    }
}
