use std::io::Error as IoError;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use log::{debug, error};

/// A single recurring task on its own thread.
///
/// The interval is re-read before every wait, so changes apply from the next
/// cycle on. `tick` returning `false` stops the task without re-arming it.
pub struct PeriodicTask {
    name: String,
    cancel: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    pub fn spawn<I, T>(name: &str, interval: I, mut tick: T) -> Result<Self, IoError>
    where
        I: Fn() -> Duration + Send + 'static,
        T: FnMut() -> bool + Send + 'static,
    {
        let (cancel, cancelled) = channel::bounded::<()>(1);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    match cancelled.recv_timeout(interval()) {
                        Err(RecvTimeoutError::Timeout) => {
                            if !tick() {
                                break;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        debug!("{name}: armed");
        Ok(Self {
            name: name.to_string(),
            cancel,
            handle: Some(handle),
        })
    }

    /// Whether the task has stopped on its own
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|handle| handle.is_finished())
    }

    /// Drop the pending cycle and wait for a running one to complete.
    /// No cycle runs after this returns.
    pub fn cancel(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        // a finished worker has dropped its receiver
        let _ = self.cancel.try_send(());
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("{}: worker panicked", self.name);
        }
        debug!("{}: cancelled", self.name);
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}
