//! Worker configuration, read from flags or `TERM_STORE_*` environment variables.

use clap::Parser;

use term_store_core::cleanup::CleanupPolicy;

#[derive(Parser, Debug, Clone)]
#[command(name = "term_store_worker")]
#[command(about = "Consumes term store cleanup jobs and deletes orphaned terms")]
pub struct Args {
    /// Postgres connection string
    #[arg(long, env = "TERM_STORE_DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "TERM_STORE_MAX_CONNECTIONS", default_value_t = 10)]
    pub max_connections: u32,

    /// Poll interval when the queue is empty
    #[arg(long, env = "TERM_STORE_DISPATCHER_INTERVAL_MS", default_value_t = 500)]
    pub interval_ms: u64,

    /// Attempts before a failing job is dead-lettered
    #[arg(long, env = "TERM_STORE_DISPATCHER_MAX_FAILS", default_value_t = 5)]
    pub max_fails: u32,

    #[arg(long, env = "TERM_STORE_WORKER_ID", default_value = "cleanup-worker-1")]
    pub worker_id: String,

    /// Seconds before an unfinished claim may be taken over
    #[arg(long, env = "TERM_STORE_CLAIM_TIMEOUT_SECS", default_value_t = 300)]
    pub claim_timeout_secs: i64,

    /// Orphans enqueued per sweep (0 disables the sweep)
    #[arg(long, env = "TERM_STORE_ORPHAN_SWEEP_LIMIT", default_value_t = 0)]
    pub orphan_sweep_limit: i64,

    #[arg(long, env = "TERM_STORE_ORPHAN_SWEEP_INTERVAL_SECS", default_value_t = 3600)]
    pub orphan_sweep_interval_secs: u64,

    /// Apply the bundled migrations before starting
    #[arg(long, env = "TERM_STORE_RUN_MIGRATIONS")]
    pub run_migrations: bool,
}

impl Args {
    pub fn policy(&self) -> CleanupPolicy {
        CleanupPolicy {
            interval_ms: self.interval_ms,
            max_fails: self.max_fails,
            claimer_id: self.worker_id.clone(),
            claim_timeout_secs: self.claim_timeout_secs,
            orphan_sweep_limit: self.orphan_sweep_limit,
            orphan_sweep_interval_secs: self.orphan_sweep_interval_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_policy() {
        let args = Args::try_parse_from([
            "term_store_worker",
            "--database-url",
            "postgresql:///term_store",
            "--max-fails",
            "3",
            "--worker-id",
            "cleanup-worker-7",
            "--orphan-sweep-limit",
            "1000",
        ])
        .unwrap();

        let policy = args.policy();
        assert_eq!(policy.max_fails, 3);
        assert_eq!(policy.claimer_id, "cleanup-worker-7");
        assert_eq!(policy.orphan_sweep_limit, 1000);
        assert_eq!(args.database_url, "postgresql:///term_store");
    }

    #[test]
    fn defaults_match_the_dispatcher_defaults() {
        let args =
            Args::try_parse_from(["term_store_worker", "--database-url", "postgresql:///x"]).unwrap();
        let defaults = CleanupPolicy::default();
        let policy = args.policy();
        assert_eq!(policy.interval_ms, defaults.interval_ms);
        assert_eq!(policy.claim_timeout_secs, defaults.claim_timeout_secs);
        assert_eq!(policy.orphan_sweep_interval_secs, defaults.orphan_sweep_interval_secs);
        assert!(!args.run_migrations);
    }
}
