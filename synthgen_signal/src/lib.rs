//! Shutdown signalling for the synthgen generators.
//!
//! Every generator in this project runs an otherwise unbounded loop. The loop
//! is stopped by a one-shot signal with two halves, a `Broadcaster` and a
//! `Watcher`. The `Broadcaster` fires the signal exactly once and may wait in
//! `signal_and_wait` until the `Watcher` has observed it or dropped. The
//! `Watcher` observes it, typically from inside a `tokio::select!` alongside
//! the generator's sleep.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::{Notify, watch};
use tracing::info;

/// Construct a `Watcher` and `Broadcaster` pair.
#[must_use]
pub fn signal() -> (Watcher, Broadcaster) {
    let (sender, receiver) = watch::channel(false);
    let watching = Arc::new(AtomicBool::new(true));
    let notify = Arc::new(Notify::new());

    let w = Watcher {
        watching: Arc::clone(&watching),
        receiver,
        notify: Arc::clone(&notify),
    };

    let b = Broadcaster {
        watching,
        sender,
        notify,
    };

    (w, b)
}

#[derive(Debug)]
/// Fires the signal for the `Watcher` of the same pair.
pub struct Broadcaster {
    /// Cleared once the `Watcher` has observed the signal or dropped.
    watching: Arc<AtomicBool>,
    /// The signal itself, flipped to `true` exactly once.
    sender: watch::Sender<bool>,
    /// Woken when the `Watcher` logs off.
    notify: Arc<Notify>,
}

impl Broadcaster {
    /// Fire the signal. Does NOT wait for the watcher to observe it.
    pub fn signal(self) {
        self.sender.send_replace(true);
    }

    /// Fire the signal and wait until the `Watcher` has either observed it or
    /// been dropped.
    pub async fn signal_and_wait(self) {
        self.sender.send_replace(true);

        loop {
            // Register interest before reading the flag, otherwise a watcher
            // logging off between the load and the await is missed.
            let notified = self.notify.notified();

            if !self.watching.load(Ordering::SeqCst) {
                break;
            }
            info!("Waiting for watcher to observe shutdown");

            notified.await;
        }
    }
}

#[derive(Debug)]
/// Observes the signal fired by a `Broadcaster`, typically to stop a loop.
pub struct Watcher {
    /// Shared with the `Broadcaster`, see `Broadcaster::watching`.
    watching: Arc<AtomicBool>,
    receiver: watch::Receiver<bool>,
    notify: Arc<Notify>,
}

impl Watcher {
    fn log_off(&self) {
        if self.watching.swap(false, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Wait for the signal. Returns immediately if it has already fired.
    ///
    /// A `Broadcaster` dropped without signalling counts as a signal: nothing
    /// remains that could ever fire it.
    pub async fn recv(mut self) {
        // An error here means the sender is gone, see above.
        let _ = self.receiver.wait_for(|signalled| *signalled).await;
        self.log_off();
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.log_off();
    }
}
