//! Fan-out/fan-in over tokio tasks
//!
//! Workers never touch shared state: each spawned task sends exactly one
//! result over the channel and the owner drains the expected count.

use std::future::Future;
use tokio::sync::mpsc;

pub struct FanOut<R> {
    tx: mpsc::UnboundedSender<R>,
    rx: mpsc::UnboundedReceiver<R>,
    launched: usize,
}

impl<R: Send + 'static> FanOut<R> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            launched: 0,
        }
    }

    /// Launch one worker; its output is delivered by [`FanOut::drain`]
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = R> + Send + 'static,
    {
        let tx = self.tx.clone();
        self.launched += 1;
        tokio::spawn(async move {
            let result = task.await;
            // The receiver only goes away if the owner gave up draining
            let _ = tx.send(result);
        });
    }

    pub fn launched(&self) -> usize {
        self.launched
    }

    /// Wait for every launched worker, in completion order.
    ///
    /// A worker that panicked never reports; draining stops once all
    /// senders are gone, so the returned list can be shorter than
    /// [`FanOut::launched`].
    pub async fn drain(self) -> Vec<R> {
        let Self {
            tx,
            mut rx,
            launched,
        } = self;
        drop(tx);

        let mut results = Vec::with_capacity(launched);
        while results.len() < launched {
            match rx.recv().await {
                Some(result) => results.push(result),
                None => break,
            }
        }

        if results.len() < launched {
            tracing::error!(
                "{} of {} workers ended without reporting a result",
                launched - results.len(),
                launched
            );
        }

        results
    }
}

impl<R: Send + 'static> Default for FanOut<R> {
    fn default() -> Self {
        Self::new()
    }
}
