//! Breakpoint store
//!
//! Breakpoints are keyed by normalized file path and line. A
//! `setBreakpoints` call replaces the whole set for one file; lines that
//! survive a replacement keep their id, omitted lines are cleared.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::engine::{LineStatus, Location};

const PENDING_MESSAGE: &str = "pending";

/// Breakpoint information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: u32,
    pub file: PathBuf,
    pub line: u32,
    pub verified: bool,
    pub message: Option<String>,
}

/// Active breakpoints of one debug session
#[derive(Debug)]
pub struct BreakpointStore {
    files: HashMap<PathBuf, BTreeMap<u32, Breakpoint>>,
    /// Files whose breakpoints changed while the evaluator was running
    pending: BTreeSet<PathBuf>,
    next_id: u32,
}

impl Default for BreakpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakpointStore {
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
            pending: BTreeSet::new(),
            next_id: 1,
        }
    }

    /// Replace the breakpoints of `file`, verifying each line with `status`
    ///
    /// Returns one entry per requested line, in request order.
    pub fn replace(
        &mut self,
        file: &Path,
        lines: &[u32],
        status: impl Fn(u32) -> LineStatus,
    ) -> Vec<Breakpoint> {
        self.pending.remove(file);
        self.replace_with(file, lines, |line, _| verification(status(line)))
    }

    /// Replace the breakpoints of `file` while the evaluator runs
    ///
    /// New lines are recorded unverified and the file is queued until
    /// [`take_pending`](Self::take_pending) hands it to the evaluator. Lines
    /// that survive the replacement are still armed and keep their status.
    pub fn replace_pending(&mut self, file: &Path, lines: &[u32]) -> Vec<Breakpoint> {
        self.pending.insert(file.to_path_buf());
        self.replace_with(file, lines, |_, previous| match previous {
            Some(bp) => (bp.verified, bp.message.clone()),
            None => (false, Some(PENDING_MESSAGE.to_string())),
        })
    }

    /// Files with queued changes, clearing the queue
    pub fn take_pending(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.pending).into_iter().collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Re-verify every breakpoint of `file` after it reached the evaluator
    pub fn verify(&mut self, file: &Path, status: impl Fn(u32) -> LineStatus) -> Vec<Breakpoint> {
        let Some(entries) = self.files.get_mut(file) else {
            return Vec::new();
        };
        entries
            .values_mut()
            .map(|bp| {
                let (verified, message) = verification(status(bp.line));
                bp.verified = verified;
                bp.message = message;
                bp.clone()
            })
            .collect()
    }

    /// Lines with a breakpoint in `file`, ascending
    pub fn lines(&self, file: &Path) -> Vec<u32> {
        self.files
            .get(file)
            .map(|entries| entries.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Ids of the breakpoints at a stop location
    pub fn hits(&self, location: &Location) -> Vec<u32> {
        self.files
            .get(&location.file)
            .and_then(|entries| entries.get(&location.line))
            .map(|bp| vec![bp.id])
            .unwrap_or_default()
    }

    /// All breakpoints, ordered by id
    pub fn list(&self) -> Vec<Breakpoint> {
        let mut all: Vec<Breakpoint> = self
            .files
            .values()
            .flat_map(|entries| entries.values().cloned())
            .collect();
        all.sort_by_key(|bp| bp.id);
        all
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn replace_with(
        &mut self,
        file: &Path,
        lines: &[u32],
        judge: impl Fn(u32, Option<&Breakpoint>) -> (bool, Option<String>),
    ) -> Vec<Breakpoint> {
        let previous = self.files.remove(file).unwrap_or_default();
        let mut entries: BTreeMap<u32, Breakpoint> = BTreeMap::new();
        let mut result = Vec::with_capacity(lines.len());

        for &line in lines {
            if let Some(existing) = entries.get(&line) {
                result.push(existing.clone());
                continue;
            }
            let survivor = previous.get(&line);
            let id = match survivor {
                Some(bp) => bp.id,
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    id
                }
            };
            let (verified, message) = judge(line, survivor);
            let bp = Breakpoint {
                id,
                file: file.to_path_buf(),
                line,
                verified,
                message,
            };
            entries.insert(line, bp.clone());
            result.push(bp);
        }

        tracing::debug!(
            file = %file.display(),
            count = entries.len(),
            removed = previous.keys().filter(|l| !entries.contains_key(l)).count(),
            "Replaced breakpoints"
        );

        if !entries.is_empty() {
            self.files.insert(file.to_path_buf(), entries);
        }
        result
    }
}

/// Unknown lines are optimistically verified
fn verification(status: LineStatus) -> (bool, Option<String>) {
    match status {
        LineStatus::Executable | LineStatus::Unknown => (true, None),
        LineStatus::NotExecutable(message) => (false, Some(message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any_line(_: u32) -> LineStatus {
        LineStatus::Unknown
    }

    fn file() -> PathBuf {
        PathBuf::from("/work/a.jsonnet")
    }

    #[test]
    fn test_replace_returns_requested_lines() {
        let mut store = BreakpointStore::new();
        let bps = store.replace(&file(), &[3, 7], any_line);

        assert_eq!(bps.len(), 2);
        assert_eq!(bps[0].line, 3);
        assert_eq!(bps[1].line, 7);
        assert!(bps.iter().all(|bp| bp.verified));
        assert_ne!(bps[0].id, bps[1].id);
    }

    #[test]
    fn test_surviving_lines_keep_ids() {
        let mut store = BreakpointStore::new();
        let first = store.replace(&file(), &[3, 7], any_line);
        let second = store.replace(&file(), &[7, 9], any_line);

        assert_eq!(second[0].id, first[1].id);
        assert!(second[1].id > first[1].id);
        assert_eq!(store.lines(&file()), vec![7, 9]);
    }

    #[test]
    fn test_cleared_line_gets_new_id_when_readded() {
        let mut store = BreakpointStore::new();
        let first = store.replace(&file(), &[3], any_line);
        store.replace(&file(), &[], any_line);
        assert!(store.is_empty());

        let again = store.replace(&file(), &[3], any_line);
        assert_ne!(again[0].id, first[0].id);
    }

    #[test]
    fn test_replacement_semantics_over_call_sequences() {
        let sequences: Vec<Vec<Vec<u32>>> = vec![
            vec![vec![1, 2, 3], vec![2], vec![2, 4], vec![]],
            vec![vec![5, 5, 6], vec![6, 5], vec![7]],
            vec![vec![], vec![10], vec![10, 11, 12], vec![12, 10]],
        ];

        for sequence in sequences {
            let mut store = BreakpointStore::new();
            let mut ids: HashMap<u32, u32> = HashMap::new();
            let mut seen_ids = BTreeSet::new();

            for lines in sequence {
                let bps = store.replace(&file(), &lines, any_line);

                let expected: BTreeSet<u32> = lines.iter().copied().collect();
                let actual: BTreeSet<u32> = store.lines(&file()).into_iter().collect();
                assert_eq!(actual, expected);

                let mut this_call = BTreeSet::new();
                for bp in bps.iter().filter(|bp| this_call.insert(bp.line)) {
                    if let Some(old) = ids.get(&bp.line) {
                        assert_eq!(*old, bp.id, "line {} changed id", bp.line);
                    } else {
                        assert!(!seen_ids.contains(&bp.id), "id {} reused", bp.id);
                    }
                    seen_ids.insert(bp.id);
                }
                ids.retain(|line, _| expected.contains(line));
                for bp in &bps {
                    ids.insert(bp.line, bp.id);
                }
            }
        }
    }

    #[test]
    fn test_non_executable_lines_are_unverified() {
        let mut store = BreakpointStore::new();
        let bps = store.replace(&file(), &[1, 2], |line| {
            if line == 1 {
                LineStatus::NotExecutable("comment".to_string())
            } else {
                LineStatus::Executable
            }
        });
        assert!(!bps[0].verified);
        assert_eq!(bps[0].message.as_deref(), Some("comment"));
        assert!(bps[1].verified);
    }

    #[test]
    fn test_pending_changes_are_queued_then_verified() {
        let mut store = BreakpointStore::new();
        let bps = store.replace_pending(&file(), &[4]);
        assert!(!bps[0].verified);
        assert_eq!(bps[0].message.as_deref(), Some("pending"));
        assert!(store.has_pending());

        let files = store.take_pending();
        assert_eq!(files, vec![file()]);
        assert!(!store.has_pending());

        let verified = store.verify(&file(), |_| LineStatus::Executable);
        assert_eq!(verified.len(), 1);
        assert!(verified[0].verified);
        assert_eq!(verified[0].id, bps[0].id);
        assert_eq!(verified[0].message, None);
    }

    #[test]
    fn test_pending_replacement_keeps_armed_lines_verified() {
        let mut store = BreakpointStore::new();
        let armed = store.replace(&file(), &[4], |_| LineStatus::Executable);

        let bps = store.replace_pending(&file(), &[4, 5]);
        assert_eq!(bps[0].id, armed[0].id);
        assert!(bps[0].verified);
        assert_eq!(bps[0].message, None);
        assert!(!bps[1].verified);
        assert_eq!(bps[1].message.as_deref(), Some("pending"));
    }

    #[test]
    fn test_hits_match_stop_location() {
        let mut store = BreakpointStore::new();
        let bps = store.replace(&file(), &[3], any_line);
        let location = Location {
            file: file(),
            line: 3,
            column: 1,
        };
        assert_eq!(store.hits(&location), vec![bps[0].id]);

        let elsewhere = Location { line: 4, ..location };
        assert!(store.hits(&elsewhere).is_empty());
    }
}
