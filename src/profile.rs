//! Env-gated timing counters for planning and aggregation.
//!
//! Profiling is enabled by setting `UMBRAL_PROFILE`; when unset every hook is
//! a branch on a cached boolean.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A snapshot of the profiling counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileSnapshot {
    /// Total nanoseconds spent in complete join-order enumerations.
    pub enumerate_ns: u64,
    /// Number of enumerations.
    pub enumerate_count: u64,
    /// Total nanoseconds spent generating extend moves.
    pub extend_ns: u64,
    /// Number of extend passes (one per DP level).
    pub extend_count: u64,
    /// Total nanoseconds spent generating hash-join moves.
    pub hash_join_ns: u64,
    /// Number of hash-join passes (one per DP level).
    pub hash_join_count: u64,
    /// Total nanoseconds spent in aggregate `append`.
    pub aggregate_append_ns: u64,
    /// Number of aggregate `append` calls.
    pub aggregate_append_count: u64,
    /// Total nanoseconds spent merging aggregate tables.
    pub aggregate_merge_ns: u64,
    /// Number of aggregate merges.
    pub aggregate_merge_count: u64,
    /// Total nanoseconds spent finalizing partitions.
    pub partition_finalize_ns: u64,
    /// Number of partitions finalized.
    pub partition_finalize_count: u64,
}

#[derive(Default)]
struct ProfileCounters {
    enumerate_ns: AtomicU64,
    enumerate_count: AtomicU64,
    extend_ns: AtomicU64,
    extend_count: AtomicU64,
    hash_join_ns: AtomicU64,
    hash_join_count: AtomicU64,
    aggregate_append_ns: AtomicU64,
    aggregate_append_count: AtomicU64,
    aggregate_merge_ns: AtomicU64,
    aggregate_merge_count: AtomicU64,
    partition_finalize_ns: AtomicU64,
    partition_finalize_count: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<ProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("UMBRAL_PROFILE").is_some())
}

fn counters() -> Option<&'static ProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(ProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum ProfileKind {
    Enumerate,
    Extend,
    HashJoin,
    AggregateAppend,
    AggregateMerge,
    PartitionFinalize,
}

pub(crate) fn record_profile_timer(kind: ProfileKind, start: Option<Instant>) {
    let Some(start) = start else {
        return;
    };
    let Some(counters) = counters() else {
        return;
    };
    let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    let (ns, count) = match kind {
        ProfileKind::Enumerate => (&counters.enumerate_ns, &counters.enumerate_count),
        ProfileKind::Extend => (&counters.extend_ns, &counters.extend_count),
        ProfileKind::HashJoin => (&counters.hash_join_ns, &counters.hash_join_count),
        ProfileKind::AggregateAppend => (
            &counters.aggregate_append_ns,
            &counters.aggregate_append_count,
        ),
        ProfileKind::AggregateMerge => (
            &counters.aggregate_merge_ns,
            &counters.aggregate_merge_count,
        ),
        ProfileKind::PartitionFinalize => (
            &counters.partition_finalize_ns,
            &counters.partition_finalize_count,
        ),
    };
    ns.fetch_add(nanos, Ordering::Relaxed);
    count.fetch_add(1, Ordering::Relaxed);
}

/// Retrieves a snapshot of the profiling counters.
///
/// Returns `None` when `UMBRAL_PROFILE` is not set. With `reset = true` the
/// counters are zeroed as they are read.
///
/// # Example
///
/// ```no_run
/// use umbral::profile::profile_snapshot;
///
/// if let Some(snapshot) = profile_snapshot(false) {
///     println!("enumeration time: {}ns", snapshot.enumerate_ns);
/// }
/// ```
pub fn profile_snapshot(reset: bool) -> Option<ProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(ProfileSnapshot {
        enumerate_ns: load(&counters.enumerate_ns),
        enumerate_count: load(&counters.enumerate_count),
        extend_ns: load(&counters.extend_ns),
        extend_count: load(&counters.extend_count),
        hash_join_ns: load(&counters.hash_join_ns),
        hash_join_count: load(&counters.hash_join_count),
        aggregate_append_ns: load(&counters.aggregate_append_ns),
        aggregate_append_count: load(&counters.aggregate_append_count),
        aggregate_merge_ns: load(&counters.aggregate_merge_ns),
        aggregate_merge_count: load(&counters.aggregate_merge_count),
        partition_finalize_ns: load(&counters.partition_finalize_ns),
        partition_finalize_count: load(&counters.partition_finalize_count),
    })
}
