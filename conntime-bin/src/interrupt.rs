use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Cancel `token` on the first Ctrl+C; the second one exits right away.
pub fn register(token: CancellationToken, waiting_for: &'static str) -> Result<(), ctrlc::Error> {
    let interrupted = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler(move || {
        if interrupted.swap(true, Ordering::SeqCst) {
            println!("User requested abort (Ctrl+C twice)");
            std::process::exit(1);
        }
        println!("Waiting for {} (Ctrl+C again to abort)...", waiting_for);
        token.cancel();
    })
}
