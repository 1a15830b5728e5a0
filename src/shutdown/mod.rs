use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(unix)]
use signal_hook::consts::signal::{SIGINT, SIGTERM};
#[cfg(unix)]
use signal_hook::flag;
#[cfg(unix)]
use signal_hook::low_level::unregister;
#[cfg(unix)]
use signal_hook::SigId;

/// Cooperative stop flag shared by the accept loop and every agency handler.
/// Handlers only look at it between batches, never mid-read.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    raised: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

pub struct ShutdownHooks {
    signal: StopSignal,
    #[cfg(unix)]
    sig_ids: Vec<SigId>,
}

impl ShutdownHooks {
    /// Routes SIGINT and SIGTERM into `signal`.
    pub fn install(signal: StopSignal) -> io::Result<Self> {
        #[cfg(unix)]
        {
            let mut sig_ids = Vec::with_capacity(2);
            for signo in [SIGINT, SIGTERM] {
                sig_ids.push(flag::register(signo, Arc::clone(&signal.raised))?);
            }
            return Ok(Self { signal, sig_ids });
        }

        #[cfg(not(unix))]
        {
            Ok(Self { signal })
        }
    }

    pub fn signal(&self) -> &StopSignal {
        &self.signal
    }

    pub fn is_triggered(&self) -> bool {
        self.signal.is_raised()
    }
}

impl Drop for ShutdownHooks {
    fn drop(&mut self) {
        #[cfg(unix)]
        for id in self.sig_ids.drain(..) {
            unregister(id);
        }
    }
}
