use std::thread;
use std::time::{Duration, Instant};

use crate::barrier::WaitStatus;
use crate::config::Config;
use crate::member::Member;
use crate::subsystem::BarrierSubsystem;

const POLL_INTERVAL: Duration = Duration::from_millis(1);
const POLL_LIMIT: Duration = Duration::from_secs(10);

/// A subsystem with the diagnostic log switched on.
pub fn logging_subsystem() -> BarrierSubsystem {
    let mut config = Config::default();
    config.set_logging_enabled(true);
    BarrierSubsystem::new(config)
}

/// Spins until `member` is observed sleeping at barrier `name`.
///
/// Panics after ten seconds, so a broken rendezvous fails the test instead of
/// hanging it.
pub fn wait_until_sleeping(subsystem: &BarrierSubsystem, member: Member, name: &str) {
    let start = Instant::now();
    loop {
        match subsystem.member_wait_status(member, name) {
            Ok(WaitStatus::Waiting) => return,
            Ok(WaitStatus::NotWaiting) => {}
            Err(e) => panic!("cannot query {} at '{}': {}", member, name, e),
        }
        assert!(
            start.elapsed() < POLL_LIMIT,
            "{} never went to sleep at '{}'",
            member,
            name
        );
        thread::sleep(POLL_INTERVAL);
    }
}
