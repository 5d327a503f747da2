use crossbeam_channel::{unbounded, Sender};
use std::io;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of background threads for work the event loop must not wait on,
/// such as freeing large values.
///
/// Jobs are fire-and-forget: nothing is reported back to the submitter.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` named workers.
    pub fn new(threads: usize) -> io::Result<Self> {
        if threads == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "worker pool needs at least one thread",
            ));
        }
        let (sender, receiver) = unbounded::<Job>();

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("pollkv-worker-{}", id))
                .spawn(move || {
                    debug!("Worker {} started", id);
                    for job in receiver.iter() {
                        job();
                    }
                    debug!("Worker {} exiting", id);
                })?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Queue one unit of work.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(sender) = &self.sender {
            if sender.send(Box::new(job)).is_err() {
                error!("Worker pool is gone, dropping job");
            }
        }
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Jobs submitted but not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map_or(0, |sender| sender.len())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets workers finish the queue and exit.
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
