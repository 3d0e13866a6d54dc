use std::future::Future;
use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::context::ActionContext;
use crate::error::Error;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Serializes all bridge-facing work for one device.
///
/// A single consumer task services a bounded FIFO queue, so at most one job
/// is in flight per device and submission order is execution order.
pub struct Executor {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Executor {
    pub fn new(buffer: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(buffer);
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job().await;
            }
        });
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Runs `job` on the device's consumer and waits for its result.
    ///
    /// If the context dies before the job is enqueued, or while waiting for
    /// the reply, the caller gets the context error immediately. A job whose
    /// context is already dead when dequeued is skipped. A job cancelled
    /// mid-run keeps running on the consumer and its reply is discarded.
    pub async fn submit<T, F, Fut>(&self, ctx: &ActionContext, job: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(ActionContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let tx = match &*self.tx.lock().expect("executor lock") {
            Some(tx) => tx.clone(),
            None => return Err(Error::ExecutorClosed),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let job_ctx = ctx.clone();
        let boxed: Job = Box::new(move || {
            Box::pin(async move {
                if let Err(err) = job_ctx.check() {
                    let _ = reply_tx.send(Err(err));
                    return;
                }
                let _ = reply_tx.send(job(job_ctx.clone()).await);
            })
        });

        tokio::select! {
            sent = tx.send(boxed) => {
                if sent.is_err() {
                    return Err(Error::ExecutorClosed);
                }
            }
            _ = ctx.done() => return Err(ctx.error()),
        }

        tokio::select! {
            reply = reply_rx => match reply {
                Ok(out) => out,
                Err(_) => Err(Error::ExecutorClosed),
            },
            _ = ctx.done() => Err(ctx.error()),
        }
    }

    /// Stops accepting submissions and waits for the queue to drain.
    pub async fn close(&self) {
        let tx = self.tx.lock().expect("executor lock").take();
        drop(tx);
        let worker = self.worker.lock().expect("executor lock").take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}
