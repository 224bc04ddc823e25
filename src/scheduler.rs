use crate::config::Config;

/// Tracks cycle cadence and gates the low-frequency maintenance work
/// (backup purging) that should not run every cycle.
pub struct Scheduler {
    tick_count: u64,
    purge_every_cycles: u64,
    force_all: bool,
}

impl Scheduler {
    pub fn new(config: &Config) -> Self {
        Self {
            tick_count: 0,
            purge_every_cycles: config.general.purge_every_cycles.max(1),
            force_all: false,
        }
    }

    /// Scheduler for run-once mode: every gated task fires.
    pub fn new_force_all(config: &Config) -> Self {
        let mut s = Self::new(config);
        s.force_all = true;
        s
    }

    pub fn tick(&mut self) {
        self.tick_count += 1;
    }

    /// Should expired backups be purged this cycle?
    pub fn should_run_purge(&self) -> bool {
        if self.force_all {
            return true;
        }
        self.tick_count % self.purge_every_cycles == 0
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_config() -> Config {
        Config::test_default()
    }

    #[test]
    fn test_tick_increments() {
        let config = test_config();
        let mut sched = Scheduler::new(&config);
        assert_eq!(sched.tick_count(), 0);
        sched.tick();
        assert_eq!(sched.tick_count(), 1);
    }

    #[test]
    fn test_purge_runs_at_configured_interval() {
        let mut config = test_config();
        config.general.purge_every_cycles = 4;
        let mut sched = Scheduler::new(&config);
        // Tick 0: runs (0 % 4 == 0)
        assert!(sched.should_run_purge());
        for _ in 0..3 {
            sched.tick();
            assert!(!sched.should_run_purge(), "tick {}", sched.tick_count());
        }
        sched.tick();
        assert_eq!(sched.tick_count(), 4);
        assert!(sched.should_run_purge());
    }

    #[test]
    fn test_force_all_always_runs() {
        let config = test_config();
        let mut sched = Scheduler::new_force_all(&config);
        assert!(sched.should_run_purge());
        sched.tick();
        assert!(sched.should_run_purge());
    }
}
