use crate::domain::{SessionDescriptor, SessionSource, SourceNotice, compare_descriptors};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

/// Cheap change detector for the render loop. Either counter advancing means a new snapshot is
/// worth taking.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RegistryStamp {
    pub generation: u64,
    pub notice_revision: u64,
}

/// Point-in-time copy of the registry. `sessions` is shared and never mutated.
#[derive(Clone, Debug)]
pub struct RegistrySnapshot {
    pub sessions: Arc<[SessionDescriptor]>,
    pub generation: u64,
    pub notices: Vec<SourceNotice>,
    pub warnings: usize,
    pub stamp: RegistryStamp,
}

#[derive(Default)]
struct RegistryState {
    sessions: Vec<SessionDescriptor>,
    known: HashMap<String, SessionSource>,
    needs_sort: bool,
    view: Option<Arc<[SessionDescriptor]>>,
    notices: BTreeMap<SessionSource, String>,
    warnings: BTreeMap<SessionSource, usize>,
}

/// The merged, deduplicated session list shared by the scheduler and the pager.
///
/// All state lives behind one mutex that is only held for in-memory bookkeeping; callers do
/// their I/O first and hand finished batches to [`SessionRegistry::merge`].
///
/// Dedup policy: an id is owned by the first source that reports it. Later reports of that id
/// from other sources are dropped. A report from the owning source with a strictly newer
/// `updated_at` replaces the stored descriptor.
#[derive(Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
    generation: AtomicU64,
    notice_revision: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of newly admitted ids. Nothing is admitted when `source_enabled` is
    /// false.
    pub fn merge(&self, batch: Vec<SessionDescriptor>, source_enabled: bool) -> usize {
        if !source_enabled || batch.is_empty() {
            return 0;
        }

        let mut state = self.lock();
        let mut admitted = 0usize;
        let mut replaced = 0usize;
        for descriptor in batch {
            match state.known.get(&descriptor.id).copied() {
                None => {
                    state.known.insert(descriptor.id.clone(), descriptor.source);
                    state.sessions.push(descriptor);
                    admitted += 1;
                }
                Some(owner) if owner == descriptor.source => {
                    let Some(existing) = state
                        .sessions
                        .iter_mut()
                        .find(|existing| existing.id == descriptor.id)
                    else {
                        continue;
                    };
                    if descriptor.updated_at > existing.updated_at {
                        *existing = descriptor;
                        replaced += 1;
                    }
                }
                Some(_) => {}
            }
        }

        if admitted + replaced > 0 {
            state.needs_sort = true;
            state.view = None;
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        admitted
    }

    /// Sets or clears the notice for `source`.
    pub fn record_notice(&self, source: SessionSource, notice: Option<String>) {
        let mut state = self.lock();
        let changed = match notice {
            Some(message) => state.notices.insert(source, message.clone()) != Some(message),
            None => state.notices.remove(&source).is_some(),
        };
        if changed {
            self.notice_revision.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Replaces the per-record warning count last reported by `source`.
    pub fn record_warnings(&self, source: SessionSource, warnings: usize) {
        let mut state = self.lock();
        let previous = state.warnings.insert(source, warnings).unwrap_or(0);
        if previous != warnings {
            self.notice_revision.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut state = self.lock();
        self.snapshot_locked(&mut state)
    }

    /// Like [`Self::snapshot`] but gives up instead of waiting when a merge holds the lock.
    pub fn try_snapshot(&self) -> Option<RegistrySnapshot> {
        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(self.snapshot_locked(&mut state))
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn stamp(&self) -> RegistryStamp {
        RegistryStamp {
            generation: self.generation.load(Ordering::Acquire),
            notice_revision: self.notice_revision.load(Ordering::Acquire),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot_locked(&self, state: &mut RegistryState) -> RegistrySnapshot {
        if state.needs_sort {
            state.sessions.sort_by(compare_descriptors);
            state.needs_sort = false;
        }
        let sessions = match state.view.clone() {
            Some(view) => view,
            None => {
                let view: Arc<[SessionDescriptor]> = Arc::from(state.sessions.as_slice());
                state.view = Some(Arc::clone(&view));
                view
            }
        };

        let notices = state
            .notices
            .iter()
            .map(|(source, message)| SourceNotice {
                source: *source,
                message: message.clone(),
            })
            .collect();

        // Counters only move while the lock is held, so these match the copied state.
        let stamp = self.stamp();
        RegistrySnapshot {
            sessions,
            generation: stamp.generation,
            notices,
            warnings: state.warnings.values().sum(),
            stamp,
        }
    }

    // The state is consistent between statements, so a panic elsewhere never leaves it torn.
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SessionLocator, SummaryFields};
    use std::path::PathBuf;
    use std::time::{Duration, UNIX_EPOCH};

    fn descriptor(id: &str, source: SessionSource, secs: u64) -> SessionDescriptor {
        SessionDescriptor {
            id: id.to_string(),
            source,
            updated_at: UNIX_EPOCH + Duration::from_secs(secs),
            locator: SessionLocator::File {
                path: PathBuf::from(format!("/tmp/{id}.jsonl")),
            },
            summary: SummaryFields {
                title: Some(format!("{id}@{secs}")),
                ..SummaryFields::default()
            },
        }
    }

    fn ids(snapshot: &RegistrySnapshot) -> Vec<&str> {
        snapshot.sessions.iter().map(|s| s.id.as_str()).collect()
    }

    fn assert_sorted(snapshot: &RegistrySnapshot) {
        for pair in snapshot.sessions.windows(2) {
            assert!(
                pair[0].updated_at >= pair[1].updated_at,
                "{} before {}",
                pair[0].id,
                pair[1].id
            );
        }
    }

    #[test]
    fn dedup_is_independent_of_batching_and_order() {
        let all = vec![
            descriptor("a", SessionSource::Store, 30),
            descriptor("b", SessionSource::PrimaryTree, 10),
            descriptor("a", SessionSource::PrimaryTree, 50),
            descriptor("c", SessionSource::SecondaryTree, 20),
            descriptor("b", SessionSource::PrimaryTree, 10),
            descriptor("c", SessionSource::SecondaryTree, 20),
        ];

        let single = SessionRegistry::new();
        assert_eq!(single.merge(all.clone(), true), 3);

        let split = SessionRegistry::new();
        let mut admitted = 0;
        for chunk in all.chunks(2) {
            admitted += split.merge(chunk.to_vec(), true);
        }
        assert_eq!(admitted, 3);

        let repeated = SessionRegistry::new();
        repeated.merge(all.clone(), true);
        assert_eq!(repeated.merge(all.clone(), true), 0);

        for registry in [&single, &split, &repeated] {
            let snapshot = registry.snapshot();
            let mut unique = ids(&snapshot);
            unique.sort_unstable();
            assert_eq!(unique, vec!["a", "b", "c"]);
            assert_sorted(&snapshot);
        }
    }

    #[test]
    fn first_source_to_report_an_id_wins() {
        let registry = SessionRegistry::new();
        registry.merge(vec![descriptor("x", SessionSource::Store, 10)], true);
        registry.merge(vec![descriptor("x", SessionSource::PrimaryTree, 99)], true);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.sessions.len(), 1);
        assert_eq!(snapshot.sessions[0].source, SessionSource::Store);
        assert_eq!(
            snapshot.sessions[0].updated_at,
            UNIX_EPOCH + Duration::from_secs(10)
        );
    }

    #[test]
    fn same_source_refresh_replaces_and_bumps_generation() {
        let registry = SessionRegistry::new();
        registry.merge(vec![descriptor("x", SessionSource::Store, 10)], true);
        registry.merge(vec![descriptor("y", SessionSource::Store, 20)], true);
        let before = registry.generation();

        assert_eq!(
            registry.merge(vec![descriptor("x", SessionSource::Store, 30)], true),
            0
        );
        assert_eq!(registry.generation(), before + 1);

        let snapshot = registry.snapshot();
        assert_eq!(ids(&snapshot), vec!["x", "y"]);
        assert_eq!(snapshot.sessions[0].summary.title.as_deref(), Some("x@30"));

        // Older or equal refreshes are ignored.
        registry.merge(vec![descriptor("x", SessionSource::Store, 30)], true);
        registry.merge(vec![descriptor("x", SessionSource::Store, 5)], true);
        assert_eq!(registry.generation(), before + 1);
    }

    #[test]
    fn disabled_source_admits_nothing() {
        let registry = SessionRegistry::new();
        assert_eq!(
            registry.merge(vec![descriptor("a", SessionSource::PrimaryTree, 1)], false),
            0
        );
        assert!(registry.is_empty());
        assert_eq!(registry.generation(), 0);
    }

    #[test]
    fn sort_holds_for_every_snapshot() {
        let registry = SessionRegistry::new();
        let mut seed = 7u64;
        for round in 0..20 {
            let batch = (0..15)
                .map(|i| {
                    seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    let source = SessionSource::ALL[(seed >> 33) as usize % 3];
                    descriptor(&format!("s{}", (seed >> 40) % 60), source, (seed >> 20) % 1_000 + i)
                })
                .collect::<Vec<_>>();
            registry.merge(batch, round % 5 != 4);
            let snapshot = registry.snapshot();
            assert_sorted(&snapshot);

            let mut unique = ids(&snapshot);
            let total = unique.len();
            unique.sort_unstable();
            unique.dedup();
            assert_eq!(unique.len(), total);
        }
    }

    #[test]
    fn snapshots_share_storage_until_the_next_change() {
        let registry = SessionRegistry::new();
        registry.merge(vec![descriptor("a", SessionSource::Store, 1)], true);
        let first = registry.snapshot();
        let second = registry.snapshot();
        assert!(Arc::ptr_eq(&first.sessions, &second.sessions));

        registry.merge(vec![descriptor("b", SessionSource::Store, 2)], true);
        let third = registry.snapshot();
        assert!(!Arc::ptr_eq(&first.sessions, &third.sessions));
        assert_eq!(first.sessions.len(), 1);
        assert_eq!(third.generation, first.generation + 1);
    }

    #[test]
    fn notices_and_warnings_bump_the_stamp_only_on_change() {
        let registry = SessionRegistry::new();
        let start = registry.stamp();

        registry.record_notice(SessionSource::Store, Some("gone".to_string()));
        let after_notice = registry.stamp();
        assert_ne!(after_notice, start);
        assert_eq!(after_notice.generation, start.generation);

        registry.record_notice(SessionSource::Store, Some("gone".to_string()));
        assert_eq!(registry.stamp(), after_notice);

        registry.record_warnings(SessionSource::SecondaryTree, 2);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.warnings, 2);
        assert_eq!(snapshot.notices.len(), 1);
        assert_eq!(snapshot.notices[0].message, "gone");

        registry.record_notice(SessionSource::Store, None);
        assert!(registry.snapshot().notices.is_empty());
    }

    #[test]
    fn try_snapshot_skips_while_locked() {
        let registry = SessionRegistry::new();
        let guard = registry.lock();
        assert!(registry.try_snapshot().is_none());
        drop(guard);
        assert!(registry.try_snapshot().is_some());
    }

    #[test]
    fn concurrent_merges_and_snapshots_never_tear() {
        let registry = Arc::new(SessionRegistry::new());
        let writers = (0..4)
            .map(|w| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..200u64 {
                        let source = SessionSource::ALL[w % 3];
                        registry.merge(
                            vec![descriptor(&format!("s{}", i % 150), source, i + w as u64)],
                            true,
                        );
                    }
                })
            })
            .collect::<Vec<_>>();

        let reader = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    if let Some(snapshot) = registry.try_snapshot() {
                        assert_sorted(&snapshot);
                    }
                }
            })
        };

        for writer in writers {
            writer.join().expect("writer");
        }
        reader.join().expect("reader");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.sessions.len(), 150);
        assert_sorted(&snapshot);
    }
}
