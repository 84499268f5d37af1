// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Background image decoding with a bounded worker pool.
//!
//! Decode jobs go through one shared queue; `workers` threads pull from it,
//! so at most that many decodes run at once. Each job answers on its own
//! channel, which the engine holds as a [`PendingLoad`] next to the object
//! being populated. Nothing the workers touch is shared with the video
//! thread except those two channels.

use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};

use log::{debug, error, warn};
use thiserror::Error;

use crate::store::PixelFormat;

/// Size limits passed through to the decoder; 0 means unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LoadConstraints {
    /// Widest acceptable result.
    pub max_width: u32,
    /// Tallest acceptable result.
    pub max_height: u32,
}

/// A decoded image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Tightly packed rows.
    pub pixels: Vec<u8>,
}

/// Why a decode failed. Never surfaces past the engine; a failed load ends
/// up as a placeholder store and an event.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// No decoder has been installed.
    #[error("no image decoder configured")]
    NoDecoder,
    /// The source could not be read.
    #[error("could not read {0}")]
    Unreadable(String),
    /// The data is not an image the decoder understands.
    #[error("unsupported image data in {0}")]
    Unsupported(String),
    /// The worker went away before answering.
    #[error("decode worker stopped")]
    WorkerGone,
}

/// Turns a path into pixels. Called on worker threads.
pub trait ImageDecoder: Send + Sync {
    /// Decodes the image at `path`.
    fn decode(&self, path: &str, constraints: LoadConstraints) -> Result<DecodedImage, DecodeError>;
}

impl<F> ImageDecoder for F
where
    F: Fn(&str, LoadConstraints) -> Result<DecodedImage, DecodeError> + Send + Sync,
{
    fn decode(&self, path: &str, constraints: LoadConstraints) -> Result<DecodedImage, DecodeError> {
        self(path, constraints)
    }
}

/// The decoder installed until one is provided; every load fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDecoder;

impl ImageDecoder for NoDecoder {
    fn decode(&self, _path: &str, _constraints: LoadConstraints) -> Result<DecodedImage, DecodeError> {
        Err(DecodeError::NoDecoder)
    }
}

type Reply = Result<DecodedImage, DecodeError>;

#[derive(Debug)]
struct Job {
    path: String,
    constraints: LoadConstraints,
    reply: mpsc::Sender<Reply>,
}

/// The answer channel of one submitted job.
#[derive(Debug)]
pub struct PendingLoad {
    path: String,
    rx: mpsc::Receiver<Reply>,
}

impl PendingLoad {
    /// Source path of the load.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the result if the worker has finished.
    pub(crate) fn try_join(&self) -> Option<Reply> {
        match self.rx.try_recv() {
            Ok(r) => Some(r),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(DecodeError::WorkerGone)),
        }
    }

    /// Blocks until the worker answers.
    pub(crate) fn join(self) -> Reply {
        self.rx.recv().unwrap_or(Err(DecodeError::WorkerGone))
    }
}

/// A lazily started pool of decode workers.
pub struct AsyncLoader {
    decoder: Arc<dyn ImageDecoder>,
    worker_count: usize,
    tx: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl core::fmt::Debug for AsyncLoader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AsyncLoader")
            .field("worker_count", &self.worker_count)
            .field("running", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl AsyncLoader {
    /// Creates a pool of at most `worker_count` threads (at least one).
    #[must_use]
    pub fn new(worker_count: usize, decoder: Arc<dyn ImageDecoder>) -> Self {
        Self {
            decoder,
            worker_count: worker_count.max(1),
            tx: None,
            workers: Vec::new(),
        }
    }

    /// Replaces the decoder. Jobs already queued finish with the old one.
    pub fn set_decoder(&mut self, decoder: Arc<dyn ImageDecoder>) {
        self.shutdown();
        self.decoder = decoder;
    }

    /// Queues a decode of `path`.
    pub fn submit(&mut self, path: &str, constraints: LoadConstraints) -> PendingLoad {
        let (reply, rx) = mpsc::channel();
        let job = Job {
            path: path.to_owned(),
            constraints,
            reply,
        };
        if let Err(mpsc::SendError(job)) = self.sender().send(job) {
            warn!("decode queue closed, failing load of {}", job.path);
            _ = job.reply.send(Err(DecodeError::WorkerGone));
        }
        PendingLoad {
            path: path.to_owned(),
            rx,
        }
    }

    fn sender(&mut self) -> &mpsc::Sender<Job> {
        if self.tx.is_none() {
            self.tx = Some(self.spawn_workers());
        }
        self.tx.get_or_insert_with(|| mpsc::channel().0)
    }

    fn spawn_workers(&mut self) -> mpsc::Sender<Job> {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        debug!("starting {} decode worker(s)", self.worker_count);

        for worker_id in 0..self.worker_count {
            let rx = Arc::clone(&rx);
            let decoder = Arc::clone(&self.decoder);
            let spawned = thread::Builder::new()
                .name(format!("strata-decode-{worker_id}"))
                .spawn(move || {
                    loop {
                        let job = {
                            let Ok(receiver) = rx.lock() else {
                                error!("decode queue poisoned, worker {worker_id} exiting");
                                break;
                            };
                            receiver.recv()
                        };
                        let Ok(job) = job else {
                            break;
                        };
                        let result = decoder.decode(&job.path, job.constraints);
                        if let Err(err) = &result {
                            warn!("worker {worker_id} failed to decode {}: {err}", job.path);
                        }
                        _ = job.reply.send(result);
                    }
                });
            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(err) => error!("could not start decode worker {worker_id}: {err}"),
            }
        }
        tx
    }

    /// Closes the queue and joins every worker. Pending jobs are finished
    /// first.
    pub fn shutdown(&mut self) {
        self.tx = None;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("decode worker panicked");
            }
        }
    }
}

impl Drop for AsyncLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(path: &str, _c: LoadConstraints) -> Result<DecodedImage, DecodeError> {
        if path.ends_with(".png") {
            Ok(DecodedImage {
                width: 2,
                height: 3,
                format: PixelFormat::Rgba8,
                pixels: vec![255; 24],
            })
        } else {
            Err(DecodeError::Unsupported(path.to_owned()))
        }
    }

    #[test]
    fn successful_and_failed_jobs() {
        let mut loader = AsyncLoader::new(2, Arc::new(solid));
        let ok = loader.submit("a.png", LoadConstraints::default());
        let bad = loader.submit("a.txt", LoadConstraints::default());
        assert_eq!(ok.path(), "a.png");
        assert_eq!(ok.join().map(|i| (i.width, i.height)), Ok((2, 3)));
        assert_eq!(bad.join(), Err(DecodeError::Unsupported("a.txt".into())));
    }

    #[test]
    fn default_decoder_fails_every_load() {
        let mut loader = AsyncLoader::new(1, Arc::new(NoDecoder));
        let p = loader.submit("x.png", LoadConstraints::default());
        assert_eq!(p.join(), Err(DecodeError::NoDecoder));
    }

    #[test]
    fn workers_start_lazily_and_stop_on_shutdown() {
        let mut loader = AsyncLoader::new(3, Arc::new(NoDecoder));
        assert!(loader.workers.is_empty(), "no threads before first job");
        let p = loader.submit("x", LoadConstraints::default());
        assert_eq!(loader.workers.len(), 3);
        _ = p.join();
        loader.shutdown();
        assert!(loader.workers.is_empty());
    }
}
