use crate::{Error, Result};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

/// Install a ctrl-c handler that flips the shared running flag instead of exiting immediately.
pub(super) fn create_shutdown_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let running_handle = running.clone();

    ctrlc::set_handler(move || {
        running_handle.store(false, Ordering::SeqCst);
    })
    .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

    Ok(running)
}

/// Sleep in `tick` steps until `total` has elapsed or the flag drops.
/// Returns false when shutdown was requested.
pub(super) fn sleep_while_running(running: &AtomicBool, total: Duration, tick: Duration) -> bool {
    let mut slept = Duration::ZERO;
    while slept < total {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let step = tick.min(total - slept);
        thread::sleep(step);
        slept += step;
    }
    running.load(Ordering::SeqCst)
}
