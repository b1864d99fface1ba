//! Ordered, backpressured result delivery from a blocking run to an async
//! consumer.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Sending half handed to the blocking run.
pub struct Emitter<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Emitter<T> {
    /// Send one result, waiting while the channel is full.
    ///
    /// Returns `false` once the consumer has gone away; the run should stop.
    pub fn emit(&self, item: T) -> bool {
        self.tx.blocking_send(item).is_ok()
    }
}

/// Receiving half of a run. Results arrive in processing order; the stream
/// ends when the run finishes.
pub struct ResultStream<T> {
    rx: mpsc::Receiver<T>,
    handle: JoinHandle<()>,
}

impl<T: Send + 'static> ResultStream<T> {
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Drain the stream and wait for the run to finish.
    pub async fn collect(mut self) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(item) = self.rx.recv().await {
            out.push(item);
        }
        self.join().await;
        out
    }

    /// Wait for the run thread. Call after [`next`](Self::next) returned
    /// `None`, or to abandon the remaining results.
    pub async fn join(self) {
        drop(self.rx);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "bridge run panicked");
        }
    }
}

/// Run `f` on a blocking thread with a channel of `buffer` slots.
///
/// Must be called from within a tokio runtime.
pub fn spawn_run<T, F>(buffer: usize, f: F) -> ResultStream<T>
where
    T: Send + 'static,
    F: FnOnce(Emitter<T>) + Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let handle = tokio::task::spawn_blocking(move || f(Emitter { tx }));
    ResultStream { rx, handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn preserves_order() {
        let stream = spawn_run(2, |emitter| {
            for i in 0..50 {
                assert!(emitter.emit(i));
            }
        });
        let got = stream.collect().await;
        assert_eq!(got, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_receiver_stops_sender() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let mut stream = spawn_run(1, move |emitter| {
            let mut sent = 0;
            while emitter.emit(sent) {
                sent += 1;
            }
            let _ = done_tx.send(sent);
        });
        assert_eq!(stream.next().await, Some(0));
        drop(stream);
        let sent = done_rx.await.expect("run finished");
        assert!(sent >= 1);
    }
}
