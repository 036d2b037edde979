// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The function-body validation worker pool.
//!
//! One producer (the parser) enqueues each code entry as it is sliced;
//! any number of workers drain the queue, each validating bodies against
//! the frozen [`ModuleContext`] snapshot. The first reported failure wins
//! and cancels the rest; bodies in flight abort between instructions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use log::debug;

use crate::error::Error;
use crate::module::ModuleContext;
use crate::types::{FunctionType, LocalsGroup};
use crate::validate;

/// One function body, queued for validation with everything needed to
/// resolve the indices it can use.
pub(crate) struct Job {
    pub(crate) index: u32,
    pub(crate) ty: FunctionType,
    pub(crate) locals: Vec<LocalsGroup>,
    pub(crate) body: Vec<u8>,
    pub(crate) context: Arc<ModuleContext>,
}

pub(crate) struct ValidationPool {
    sender: Option<Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
    failure: Arc<Mutex<Option<Error>>>,
    cancel: Arc<AtomicBool>,
}

impl ValidationPool {
    /// Spawns `workers` (at least one) validation threads.
    pub(crate) fn new(workers: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let failure = Arc::new(Mutex::new(None));
        let cancel = Arc::new(AtomicBool::new(false));
        let workers = (0..workers.max(1))
            .map(|_| {
                let receiver = receiver.clone();
                let failure = Arc::clone(&failure);
                let cancel = Arc::clone(&cancel);
                thread::spawn(move || worker_loop(&receiver, &failure, &cancel))
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
            failure,
            cancel,
        }
    }

    /// Enqueues a body. A no-op once a failure has been recorded.
    pub(crate) fn submit(&self, job: Job) {
        if self.cancel.load(Ordering::Relaxed) {
            return;
        }
        if let Some(sender) = &self.sender {
            // Send fails only once every worker has exited, which cannot
            // precede closing the channel in shutdown().
            let _ = sender.send(job);
        }
    }

    /// Closes the queue, waits for in-flight work, and surfaces the first
    /// recorded failure.
    pub(crate) fn finish(&mut self) -> Result<(), Error> {
        self.shutdown(false);
        let mut slot = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        slot.take().map_or(Ok(()), Err)
    }

    fn shutdown(&mut self, cancel: bool) {
        if cancel {
            self.cancel.store(true, Ordering::Relaxed);
        }
        // Dropping the sender closes the channel; workers drain what is
        // left and exit.
        self.sender = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ValidationPool {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}

fn worker_loop(receiver: &Receiver<Job>, failure: &Mutex<Option<Error>>, cancel: &AtomicBool) {
    for job in receiver.iter() {
        if cancel.load(Ordering::Relaxed) {
            continue;
        }
        let result = validate::validate_function(
            &*job.context,
            &job.ty,
            &job.locals,
            &job.body,
            Some(cancel),
        );
        if let Err(error) = result {
            debug!("function body {} failed validation: {error}", job.index);
            cancel.store(true, Ordering::Relaxed);
            let mut slot = failure.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(error);
            }
        }
    }
}

/// The default worker count for new parsers.
pub(crate) fn default_workers() -> usize {
    thread::available_parallelism().map_or(1, |count| count.get().min(8))
}
