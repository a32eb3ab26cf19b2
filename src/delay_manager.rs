use std::thread;
use std::time::Duration;

use log::debug;

pub fn page_delay(delay: Duration) {
    if delay.is_zero() {
        return;
    }
    debug!("Waiting {:.1}s before the next page request...", delay.as_secs_f64());
    thread::sleep(delay);
}

pub fn retry_backoff(pause: Duration) {
    if pause.is_zero() {
        return;
    }
    debug!("Waiting {:.1}s before retrying...", pause.as_secs_f64());
    thread::sleep(pause);
}
