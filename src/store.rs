//! Report history.
//!
//! Reports are appended once and never modified. Readers get `Arc` handles, so a
//! report handed to a request stays valid whatever happens to the store afterwards.

use crate::error::StoreError;
use crate::models::UploadReport;
use crate::saving::{load_reports, save_reports};
use log::{info, warn};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Append-only, newest-first collection of reports.
pub trait ReportStore: Send + Sync {
    /// Store a report and return the shared handle to it.
    fn append(&self, report: UploadReport) -> Result<Arc<UploadReport>, StoreError>;

    /// All reports, newest first.
    fn list(&self) -> Vec<Arc<UploadReport>>;

    fn latest(&self) -> Option<Arc<UploadReport>> {
        self.list().into_iter().next()
    }

    fn get(&self, id: &str) -> Option<Arc<UploadReport>> {
        self.list().into_iter().find(|report| report.id == id)
    }
}

/// In-process store. Optionally keeps only the newest `limit` reports; a limit of 0 is unbounded.
#[derive(Debug, Default)]
pub struct MemoryReportStore {
    reports: RwLock<VecDeque<Arc<UploadReport>>>,
    limit: Option<usize>,
}

impl MemoryReportStore {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            reports: RwLock::new(VecDeque::new()),
            limit: limit.filter(|limit| *limit > 0),
        }
    }

    /// Seed from reports already ordered newest first.
    pub fn from_reports(reports: Vec<UploadReport>, limit: Option<usize>) -> Self {
        let limit = limit.filter(|limit| *limit > 0);
        let mut reports: VecDeque<Arc<UploadReport>> = reports.into_iter().map(Arc::new).collect();
        if let Some(limit) = limit {
            reports.truncate(limit);
        }
        Self {
            reports: RwLock::new(reports),
            limit,
        }
    }

    fn push(&self, report: Arc<UploadReport>) {
        let mut reports = self.reports.write().unwrap_or_else(PoisonError::into_inner);
        reports.push_front(report);
        if let Some(limit) = self.limit {
            reports.truncate(limit);
        }
    }

    pub fn len(&self) -> usize {
        self.reports.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReportStore for MemoryReportStore {
    fn append(&self, report: UploadReport) -> Result<Arc<UploadReport>, StoreError> {
        let report = Arc::new(report);
        self.push(Arc::clone(&report));
        Ok(report)
    }

    fn list(&self) -> Vec<Arc<UploadReport>> {
        self.reports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn latest(&self) -> Option<Arc<UploadReport>> {
        self.reports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .front()
            .cloned()
    }

    fn get(&self, id: &str) -> Option<Arc<UploadReport>> {
        self.reports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|report| report.id == id)
            .cloned()
    }
}

/// Memory store mirrored to a gzip + bincode snapshot file.
///
/// A report only becomes visible after the snapshot containing it has been written.
#[derive(Debug)]
pub struct SnapshotReportStore {
    inner: MemoryReportStore,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SnapshotReportStore {
    /// Open a snapshot, starting empty if the file does not exist yet.
    pub fn open(path: &Path, limit: Option<usize>) -> Result<Self, StoreError> {
        let reports = if path.exists() {
            let reports = load_reports(path)?;
            info!("Loaded {} reports from {}", reports.len(), path.display());
            reports
        } else {
            Vec::new()
        };
        Ok(Self {
            inner: MemoryReportStore::from_reports(reports, limit),
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportStore for SnapshotReportStore {
    fn append(&self, report: UploadReport) -> Result<Arc<UploadReport>, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let report = Arc::new(report);

        let mut snapshot = self.inner.list();
        snapshot.insert(0, Arc::clone(&report));
        if let Some(limit) = self.inner.limit {
            snapshot.truncate(limit);
        }
        if let Err(e) = save_reports(&snapshot, &self.path) {
            warn!("Failed to write report snapshot {}: {}", self.path.display(), e);
            return Err(e);
        }

        self.inner.push(Arc::clone(&report));
        Ok(report)
    }

    fn list(&self) -> Vec<Arc<UploadReport>> {
        self.inner.list()
    }

    fn latest(&self) -> Option<Arc<UploadReport>> {
        self.inner.latest()
    }

    fn get(&self, id: &str) -> Option<Arc<UploadReport>> {
        self.inner.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Analyzer;
    use std::collections::HashSet;

    fn report(user: &str) -> UploadReport {
        Analyzer::default()
            .analyze(b"timestamp,pH\n2024-01-01,7.1\n2024-01-02,7.4\n", Some("lab.csv"), user)
            .unwrap()
    }

    #[test]
    fn empty_store_has_no_latest() {
        let store = MemoryReportStore::new(None);
        assert!(store.latest().is_none());
        assert!(store.list().is_empty());
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn lists_newest_first() {
        let store = MemoryReportStore::new(None);
        let first = store.append(report("a")).unwrap();
        let second = store.append(report("b")).unwrap();
        let ids: Vec<String> = store.list().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![second.id.clone(), first.id.clone()]);
        assert_eq!(store.latest().unwrap().id, second.id);
        assert_eq!(store.get(&first.id).unwrap().uploaded_by, "a");
    }

    #[test]
    fn limit_drops_oldest() {
        let store = MemoryReportStore::new(Some(2));
        let first = store.append(report("a")).unwrap();
        store.append(report("b")).unwrap();
        store.append(report("c")).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get(&first.id).is_none());
    }

    #[test]
    fn zero_limit_keeps_everything() {
        let store = MemoryReportStore::new(Some(0));
        let first = store.append(report("a")).unwrap();
        store.append(report("b")).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get(&first.id).is_some());
    }

    #[test]
    fn handles_outlive_the_store() {
        let store = MemoryReportStore::new(None);
        let handle = store.append(report("a")).unwrap();
        drop(store);
        assert_eq!(handle.uploaded_by, "a");
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history").join("reports.bin.gz");

        let store = SnapshotReportStore::open(&path, None).unwrap();
        let first = store.append(report("a")).unwrap();
        let second = store.append(report("b")).unwrap();
        drop(store);

        let reopened = SnapshotReportStore::open(&path, None).unwrap();
        assert_eq!(reopened.path(), path.as_path());
        let list = reopened.list();
        assert_eq!(list.len(), 2);
        assert_eq!(*list[0], *second);
        assert_eq!(*list[1], *first);
    }

    fn append_from_threads(store: &dyn ReportStore, writers: usize) -> Vec<String> {
        let appended: Vec<String> = std::thread::scope(|scope| {
            let reader = scope.spawn(|| {
                for _ in 0..50 {
                    let ids: HashSet<String> = store.list().iter().map(|r| r.id.clone()).collect();
                    assert!(ids.len() <= writers);
                }
            });
            let handles: Vec<_> = (0..writers)
                .map(|i| scope.spawn(move || store.append(report(&format!("user{i}"))).unwrap().id.clone()))
                .collect();
            let ids = handles.into_iter().map(|h| h.join().unwrap()).collect();
            reader.join().unwrap();
            ids
        });
        appended
    }

    #[test]
    fn concurrent_appends_each_appear_once() {
        let store = MemoryReportStore::new(None);
        let appended = append_from_threads(&store, 8);

        let listed: Vec<String> = store.list().iter().map(|r| r.id.clone()).collect();
        assert_eq!(store.len(), 8);
        let unique: HashSet<&String> = listed.iter().collect();
        assert_eq!(unique.len(), 8);
        assert_eq!(unique, appended.iter().collect::<HashSet<_>>());
    }

    #[test]
    fn concurrent_snapshot_appends_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.bin.gz");
        let store = SnapshotReportStore::open(&path, None).unwrap();
        let appended = append_from_threads(&store, 6);
        let in_memory: Vec<String> = store.list().iter().map(|r| r.id.clone()).collect();
        drop(store);

        let reopened = SnapshotReportStore::open(&path, None).unwrap();
        let on_disk: Vec<String> = reopened.list().iter().map(|r| r.id.clone()).collect();
        assert_eq!(on_disk, in_memory);
        assert_eq!(
            on_disk.iter().collect::<HashSet<_>>(),
            appended.iter().collect::<HashSet<_>>()
        );
        assert_eq!(on_disk.len(), 6);
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.bin.gz");
        std::fs::write(&path, b"not gzip").unwrap();
        assert!(SnapshotReportStore::open(&path, None).is_err());
    }
}
