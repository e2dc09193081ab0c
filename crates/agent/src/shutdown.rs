//! Signal handling. Grounded on the teacher's `ShutdownController` /
//! `spawn_ctrl_c_handler` pair, generalized to also watch SIGTERM (the
//! teacher only ran as an interactive foreground process; this agent runs
//! under a process supervisor too).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

#[derive(Debug)]
pub struct ShutdownController {
    forced: AtomicU8,
}

#[derive(Debug, Clone, Copy)]
pub enum ShutdownEvent {
    Graceful,
    Immediate,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self { forced: AtomicU8::new(0) }
    }

    fn bump(&self) -> u8 {
        self.forced.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns a task that turns SIGINT/SIGTERM into [`ShutdownEvent`]s: the
/// first signal requests a graceful stop, a second forces an immediate
/// exit (spec.md §5, "Cancellation").
pub fn spawn_signal_handler(shutdown: Arc<ShutdownController>, shutdown_tx: mpsc::UnboundedSender<ShutdownEvent>) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();

        loop {
            let signalled = match &mut sigterm {
                Some(term) => {
                    tokio::select! {
                        res = tokio::signal::ctrl_c() => res.is_ok(),
                        _ = term.recv() => true,
                    }
                }
                None => tokio::signal::ctrl_c().await.is_ok(),
            };
            if !signalled {
                return;
            }

            let n = shutdown.bump();
            if n == 1 {
                let _ = shutdown_tx.send(ShutdownEvent::Graceful);
            } else {
                let _ = shutdown_tx.send(ShutdownEvent::Immediate);
                return;
            }
        }
    });
}
