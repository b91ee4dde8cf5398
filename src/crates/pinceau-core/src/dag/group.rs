//! Structured concurrency scope of one run.
//!
//! Every activation is spawned through a [`TaskGroup`]; the run's
//! [`GroupJoin`] completes once every spawned activation has completed and all
//! group handles are gone. The first failing activation aborts the rest, and
//! so does dropping the join before it completes.

use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{DagError, Result};

type Handle = JoinHandle<Result<()>>;

#[derive(Debug, Clone)]
pub(crate) struct TaskGroup {
    handles: mpsc::UnboundedSender<Handle>,
}

#[derive(Debug)]
pub(crate) struct GroupJoin {
    handles: mpsc::UnboundedReceiver<Handle>,
}

impl TaskGroup {
    pub(crate) fn new() -> (Self, GroupJoin) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { handles: tx }, GroupJoin { handles: rx })
    }

    pub(crate) fn spawn<F>(&self, activation: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if let Err(mpsc::error::SendError(handle)) = self.handles.send(tokio::spawn(activation)) {
            // The join already gave up on this run.
            handle.abort();
        }
    }
}

impl GroupJoin {
    /// Wait for every activation, failing fast and aborting the rest on the first
    /// error or once `deadline` passes.
    pub(crate) async fn join(mut self, deadline: Option<(Instant, u64)>) -> Result<()> {
        let mut running = InFlight::default();
        let expiry = async {
            match deadline {
                Some((at, _)) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expiry);
        let mut open = true;

        loop {
            if !open && running.0.is_empty() {
                return Ok(());
            }
            tokio::select! {
                received = self.handles.recv(), if open => match received {
                    Some(handle) => running.0.push(handle),
                    None => open = false,
                },
                Some(joined) = running.0.next(), if !running.0.is_empty() => {
                    let outcome = match joined {
                        Ok(outcome) => outcome,
                        Err(e) if e.is_cancelled() => Ok(()),
                        Err(e) => Err(DagError::Execution(format!("activation panicked: {e}"))),
                    };
                    if let Err(e) = outcome {
                        self.abort_all(&running);
                        return Err(e);
                    }
                }
                () = &mut expiry => {
                    self.abort_all(&running);
                    let duration_ms = deadline.map(|(_, ms)| ms).unwrap_or_default();
                    return Err(DagError::Timeout {
                        operation: "dag run".into(),
                        duration_ms,
                    });
                }
            }
        }
    }

    fn abort_all(&mut self, running: &InFlight) {
        self.abort_queued();
        running.abort();
    }

    fn abort_queued(&mut self) {
        self.handles.close();
        while let Ok(handle) = self.handles.try_recv() {
            handle.abort();
        }
    }
}

impl Drop for GroupJoin {
    fn drop(&mut self) {
        self.abort_queued();
    }
}

/// Joined activations; aborted when the join is dropped mid-run.
#[derive(Default)]
struct InFlight(FuturesUnordered<Handle>);

impl InFlight {
    fn abort(&self) {
        for handle in self.0.iter() {
            handle.abort();
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_join_waits_for_nested_spawns() {
        let (group, join) = TaskGroup::new();
        let done = Arc::new(AtomicUsize::new(0));
        {
            let inner = group.clone();
            let done = done.clone();
            group.spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let done_inner = done.clone();
                inner.spawn(async move {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    done_inner.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        drop(group);

        join.join(None).await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_error_aborts_siblings() {
        let (group, join) = TaskGroup::new();
        let finished = Arc::new(AtomicUsize::new(0));
        {
            let finished = finished.clone();
            group.spawn(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        group.spawn(async { Err(DagError::Execution("boom".into())) });
        drop(group);

        let err = join.join(None).await.unwrap_err();
        assert!(matches!(err, DagError::Execution(_)));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_times_out() {
        let (group, join) = TaskGroup::new();
        group.spawn(async {
            std::future::pending::<()>().await;
            Ok(())
        });
        drop(group);

        let deadline = Instant::now() + Duration::from_millis(500);
        let err = join.join(Some((deadline, 500))).await.unwrap_err();
        assert!(matches!(err, DagError::Timeout { duration_ms: 500, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_the_join_aborts_activations() {
        let (group, join) = TaskGroup::new();
        let finished = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let finished = finished.clone();
            group.spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let cut = tokio::time::timeout(Duration::from_secs(1), join.join(None)).await;
        assert!(cut.is_err());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        drop(group);
    }
}
