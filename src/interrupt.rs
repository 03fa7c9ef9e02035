//! SIGINT/SIGTERM routing into per-turn cancellation flags.
//!
//! One handler lives for the whole process. While a turn runs, the caller arms
//! the handler with that turn's flag and an interrupt raises it; between turns
//! interrupts are only counted so the prompt can react.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

#[derive(Debug, Default)]
struct InterruptState {
    armed: Mutex<Option<Arc<AtomicBool>>>,
    interrupts: AtomicU64,
    terminate: AtomicBool,
}

impl InterruptState {
    fn armed(&self) -> MutexGuard<'_, Option<Arc<AtomicBool>>> {
        self.armed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        if let Some(flag) = self.armed().as_ref() {
            flag.store(true, Ordering::Release);
        }
    }

    fn terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
        self.interrupt();
    }
}

#[cfg(unix)]
struct SignalThread {
    handle: signal_hook::iterator::Handle,
    thread: Option<JoinHandle<()>>,
}

#[cfg(unix)]
impl Drop for SignalThread {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Process-wide interrupt router.
pub struct InterruptHandler {
    state: Arc<InterruptState>,
    #[cfg(unix)]
    _signals: Option<SignalThread>,
}

impl InterruptHandler {
    /// Registers SIGINT and SIGTERM listeners on a background thread.
    #[cfg(unix)]
    pub fn install() -> std::io::Result<Self> {
        use signal_hook::iterator::Signals;

        let state = Arc::new(InterruptState::default());
        let mut signals = Signals::new([libc::SIGINT, libc::SIGTERM])?;
        let handle = signals.handle();
        let thread_state = Arc::clone(&state);

        let thread = std::thread::Builder::new()
            .name("agent-terminal-signals".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    if signal == libc::SIGTERM {
                        thread_state.terminate();
                    } else {
                        thread_state.interrupt();
                    }
                }
            })?;

        Ok(Self {
            state,
            _signals: Some(SignalThread {
                handle,
                thread: Some(thread),
            }),
        })
    }

    /// A handler with no OS signal registration. Interrupts arrive only via
    /// [`InterruptHandler::deliver`].
    #[must_use]
    pub fn detached() -> Self {
        Self {
            state: Arc::new(InterruptState::default()),
            #[cfg(unix)]
            _signals: None,
        }
    }

    /// Routes subsequent interrupts to `flag` until [`disarm`](Self::disarm).
    pub fn arm(&self, flag: Arc<AtomicBool>) {
        *self.state.armed() = Some(flag);
    }

    pub fn disarm(&self) {
        *self.state.armed() = None;
    }

    /// Handles one interrupt exactly as a received SIGINT would.
    pub fn deliver(&self) {
        self.state.interrupt();
    }

    /// Total interrupts observed since install.
    #[must_use]
    pub fn interrupt_count(&self) -> u64 {
        self.state.interrupts.load(Ordering::SeqCst)
    }

    /// True once SIGTERM has been received.
    #[must_use]
    pub fn terminate_requested(&self) -> bool {
        self.state.terminate.load(Ordering::SeqCst)
    }
}
