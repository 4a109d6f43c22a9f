//! Background loading of [`Loadable`] objects, one at a time per loader.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, trace};

use crate::DashPlayerError;

/// Shared flag through which an in-flight load is canceled. Once set it stays set until the
/// load's outcome has been delivered, so a canceled load can never be misreported.
#[derive(Debug, Default)]
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An object that can be loaded to completion on a background thread.
pub trait Loadable: Send {
    /// The flag observed by [`Loadable::load`] at its suspension points. [`Loader`] keeps a
    /// clone so cancellation works while the loadable is owned by the worker thread.
    fn cancel_flag(&self) -> Arc<CancelFlag>;

    /// Performs the load, returning on completion or cancellation. Should return soon after the
    /// cancel flag is set; returning [`DashPlayerError::Canceled`] in that case is conventional
    /// but not required, since the loader normalizes the outcome against the flag.
    fn load(&mut self) -> Result<(), DashPlayerError>;
}

/// The terminal state of one load.
#[derive(Debug)]
pub enum LoadOutcome {
    Complete,
    Canceled,
    Error(DashPlayerError),
}

struct InFlight<L> {
    cancel: Arc<CancelFlag>,
    rx: Receiver<(L, LoadOutcome)>,
    join: Option<JoinHandle<()>>,
}

/// Manages the background loading of one [`Loadable`] at a time on a dedicated, named worker
/// thread. For every successful [`Loader::start_loading`] call, exactly one outcome is later
/// returned by [`Loader::poll`], on whichever thread polls; a cancellation requested at any
/// point before that delivery yields [`LoadOutcome::Canceled`], even if the load itself had
/// already finished successfully.
pub struct Loader<L: Loadable + 'static> {
    thread_name: String,
    in_flight: Option<InFlight<L>>,
}

impl<L: Loadable + 'static> Loader<L> {
    pub fn new(thread_name: impl Into<String>) -> Loader<L> {
        Loader { thread_name: thread_name.into(), in_flight: None }
    }

    /// Starts loading. Returns false (without consuming side effects) when a load is already in
    /// progress or the worker thread could not be spawned.
    pub fn start_loading(&mut self, mut loadable: L) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        let cancel = loadable.cancel_flag();
        let flag = cancel.clone();
        let (tx, rx): (Sender<(L, LoadOutcome)>, _) = mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                let outcome = if flag.is_set() {
                    LoadOutcome::Canceled
                } else {
                    let result = loadable.load();
                    if flag.is_set() {
                        LoadOutcome::Canceled
                    } else {
                        match result {
                            Ok(()) => LoadOutcome::Complete,
                            Err(DashPlayerError::Canceled) => LoadOutcome::Canceled,
                            Err(e) => LoadOutcome::Error(e),
                        }
                    }
                };
                // The receiver half may already be gone if the loader was dropped.
                let _ = tx.send((loadable, outcome));
            });
        match spawned {
            Ok(join) => {
                trace!("{}: load started", self.thread_name);
                self.in_flight = Some(InFlight { cancel, rx, join: Some(join) });
                true
            }
            Err(e) => {
                error!("couldn't spawn loader thread {}: {e}", self.thread_name);
                false
            }
        }
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Requests cancellation of the current load, if any.
    pub fn cancel_loading(&self) {
        if let Some(in_flight) = &self.in_flight {
            in_flight.cancel.set();
        }
    }

    /// Returns the finished load if its worker has completed, without blocking. The outcome is
    /// re-checked against the cancel flag at this point, so a cancellation that raced with
    /// completion is still reported as canceled.
    pub fn poll(&mut self) -> Option<(L, LoadOutcome)> {
        let received = match &self.in_flight {
            Some(in_flight) => match in_flight.rx.try_recv() {
                Ok(done) => done,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            },
            None => return None,
        };
        Some(self.finish(received))
    }

    /// Like [`Loader::poll`], but waits up to `timeout` for the worker to finish.
    pub fn poll_timeout(&mut self, timeout: Duration) -> Option<(L, LoadOutcome)> {
        let received = match &self.in_flight {
            Some(in_flight) => in_flight.rx.recv_timeout(timeout).ok()?,
            None => return None,
        };
        Some(self.finish(received))
    }

    fn finish(&mut self, (loadable, outcome): (L, LoadOutcome)) -> (L, LoadOutcome) {
        let in_flight = self.in_flight.take().expect("finish without in-flight load");
        if let Some(join) = in_flight.join {
            let _ = join.join();
        }
        let outcome = if in_flight.cancel.is_set() { LoadOutcome::Canceled } else { outcome };
        trace!("{}: load finished: {outcome:?}", self.thread_name);
        (loadable, outcome)
    }
}
