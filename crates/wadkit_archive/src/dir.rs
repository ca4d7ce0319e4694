//! Directory nodes of the archive tree.

use std::sync::atomic::{AtomicU64, Ordering};

use derive_more::Display;
use tracing::debug;

use crate::entry::{split_extension, Entry, EntryId, EntryRef};

static NEXT_DIR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a directory node
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("dir#{_0}")]
pub struct DirId(u64);

impl DirId {
    fn next() -> Self {
        DirId(NEXT_DIR_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id value
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy)]
enum CopyMode {
    Fresh,
    Keep,
}

/// How [`ArchiveDir::merge`] treats an incoming entry whose name is already taken
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Replace the existing entry in place
    Overwrite,
    /// Leave the existing entry and drop the incoming one
    Skip,
    /// Add the incoming entry under a fresh name
    #[default]
    KeepBoth,
}

/// An ordered list of entries plus the directories nested below it
///
/// Entry order is significant (lump order matters to the games) and is the order used when
/// the archive is written.
#[derive(Debug)]
pub struct ArchiveDir {
    id: DirId,
    parent: Option<DirId>,
    dir_entry: EntryRef,
    entries: Vec<EntryRef>,
    subdirs: Vec<ArchiveDir>,
    allow_duplicate_names: bool,
}

impl ArchiveDir {
    /// Create an empty directory called `name`
    pub fn new(name: impl Into<String>, parent: Option<DirId>) -> Self {
        ArchiveDir {
            id: DirId::next(),
            parent,
            dir_entry: Entry::dir_entry(name).into_ref(),
            entries: Vec::new(),
            subdirs: Vec::new(),
            allow_duplicate_names: false,
        }
    }

    /// Create an unnamed root directory
    pub fn root(allow_duplicate_names: bool) -> Self {
        ArchiveDir {
            allow_duplicate_names,
            ..ArchiveDir::new("", None)
        }
    }

    pub fn id(&self) -> DirId {
        self.id
    }

    pub fn parent_id(&self) -> Option<DirId> {
        self.parent
    }

    /// Name of the directory (empty for the root)
    pub fn name(&self) -> String {
        self.dir_entry.read().name().to_owned()
    }

    /// The synthetic entry standing in for this directory
    ///
    /// The root's entry carries archive-level properties such as the WAD kind.
    pub fn dir_entry(&self) -> &EntryRef {
        &self.dir_entry
    }

    pub fn allow_duplicate_names(&self) -> bool {
        self.allow_duplicate_names
    }

    pub fn entries(&self) -> &[EntryRef] {
        &self.entries
    }

    /// Number of entries in this directory, optionally counting every subdirectory as well
    pub fn num_entries(&self, recursive: bool) -> usize {
        let nested = if recursive {
            self.subdirs.iter().map(|dir| dir.num_entries(true)).sum()
        } else {
            0
        };
        self.entries.len() + nested
    }

    pub fn entry_at(&self, index: usize) -> Option<&EntryRef> {
        self.entries.get(index)
    }

    /// Position of the entry with `id` in this directory
    pub fn entry_index(&self, id: EntryId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.read().id() == id)
    }

    /// First entry called `name`, ignoring case
    pub fn entry(&self, name: &str) -> Option<&EntryRef> {
        self.entries
            .iter()
            .find(|entry| entry.read().name().eq_ignore_ascii_case(name))
    }

    pub fn subdirs(&self) -> &[ArchiveDir] {
        &self.subdirs
    }

    /// Direct subdirectory called `name`, ignoring case
    pub fn subdir(&self, name: &str) -> Option<&ArchiveDir> {
        self.subdirs
            .iter()
            .find(|dir| dir.name().eq_ignore_ascii_case(name))
    }

    pub fn subdir_mut(&mut self, name: &str) -> Option<&mut ArchiveDir> {
        self.subdirs
            .iter_mut()
            .find(|dir| dir.name().eq_ignore_ascii_case(name))
    }

    /// This directory or a descendant with the given id
    pub fn find_dir(&self, id: DirId) -> Option<&ArchiveDir> {
        if self.id == id {
            return Some(self);
        }
        self.subdirs.iter().find_map(|dir| dir.find_dir(id))
    }

    pub fn find_dir_mut(&mut self, id: DirId) -> Option<&mut ArchiveDir> {
        if self.id == id {
            return Some(self);
        }
        self.subdirs.iter_mut().find_map(|dir| dir.find_dir_mut(id))
    }

    /// Path from this directory to the descendant `id`, with a trailing slash
    ///
    /// Returns an empty string for this directory itself.
    pub fn path_to(&self, id: DirId) -> Option<String> {
        if self.id == id {
            return Some(String::new());
        }
        self.subdirs.iter().find_map(|dir| {
            dir.path_to(id)
                .map(|rest| format!("{}/{}", dir.name(), rest))
        })
    }

    /// Descendant reached by following `path`, ignoring case and empty or `.` components
    pub fn dir_at_path(&self, path: &str) -> Option<&ArchiveDir> {
        path_parts(path).try_fold(self, |dir, part| dir.subdir(part))
    }

    pub fn dir_at_path_mut(&mut self, path: &str) -> Option<&mut ArchiveDir> {
        let mut dir = self;
        for part in path_parts(path) {
            dir = dir.subdir_mut(part)?;
        }
        Some(dir)
    }

    /// Descendant at `path`, creating any missing directories on the way
    pub fn ensure_subdir_path(&mut self, path: &str) -> &mut ArchiveDir {
        let mut dir = self;
        for part in path_parts(path) {
            let index = match dir
                .subdirs
                .iter()
                .position(|sub| sub.name().eq_ignore_ascii_case(part))
            {
                Some(index) => index,
                None => {
                    let mut sub = ArchiveDir::new(part, Some(dir.id));
                    sub.allow_duplicate_names = dir.allow_duplicate_names;
                    dir.subdirs.push(sub);
                    dir.subdirs.len() - 1
                }
            };
            dir = &mut dir.subdirs[index];
        }
        dir
    }

    /// Adopt `dir` as a subdirectory, renaming it if the name is taken
    pub fn add_subdir(&mut self, mut dir: ArchiveDir) -> DirId {
        let name = dir.name();
        if self.subdir(&name).is_some() {
            let unique = self.unique_subdir_name(&name);
            debug!(from = %name, to = %unique, "renamed conflicting directory");
            dir.dir_entry.write().set_name(unique);
        }
        dir.parent = Some(self.id);
        let id = dir.id;
        self.subdirs.push(dir);
        id
    }

    /// Detach the direct subdirectory `id`
    pub fn remove_subdir(&mut self, id: DirId) -> Option<ArchiveDir> {
        let index = self.subdirs.iter().position(|dir| dir.id == id)?;
        let mut dir = self.subdirs.remove(index);
        dir.parent = None;
        Some(dir)
    }

    /// Insert `entry` at `position` (appending when `None` or past the end)
    ///
    /// When duplicates are not allowed a conflicting name is replaced with the smallest free
    /// numbered variant. Returns the index the entry landed at.
    pub fn add_entry(&mut self, entry: EntryRef, position: Option<usize>) -> usize {
        let name = entry.read().name().to_owned();
        let unique = (!self.allow_duplicate_names && self.entry(&name).is_some())
            .then(|| self.unique_name(&name));

        {
            let mut guard = entry.write();
            if let Some(unique) = unique {
                debug!(from = %name, to = %unique, "renamed conflicting entry");
                guard.set_name(unique);
            }
            guard.set_parent(Some(self.id));
        }

        let index = position.unwrap_or(self.entries.len()).min(self.entries.len());
        self.entries.insert(index, entry);
        index
    }

    /// Detach the entry at `index`
    pub fn remove_entry(&mut self, index: usize) -> Option<EntryRef> {
        if index >= self.entries.len() {
            return None;
        }
        let entry = self.entries.remove(index);
        entry.write().set_parent(None);
        Some(entry)
    }

    /// Exchange the entries at `a` and `b`
    pub fn swap_entries(&mut self, a: usize, b: usize) -> bool {
        if a >= self.entries.len() || b >= self.entries.len() {
            return false;
        }
        self.entries.swap(a, b);
        true
    }

    /// Move the entry at `from` so that it ends up at index `to` (clamped to the last slot)
    pub fn move_entry(&mut self, from: usize, to: usize) -> Option<usize> {
        if from >= self.entries.len() {
            return None;
        }
        let entry = self.entries.remove(from);
        let to = to.min(self.entries.len());
        self.entries.insert(to, entry);
        Some(to)
    }

    /// Whether a sibling other than `except` already uses `name`
    pub fn name_in_use(&self, name: &str, except: Option<EntryId>) -> bool {
        self.entries.iter().any(|entry| {
            let entry = entry.read();
            Some(entry.id()) != except && entry.name().eq_ignore_ascii_case(name)
        })
    }

    /// `name` with the smallest numeric suffix that no sibling uses, e.g. `stem1.ext`
    pub fn unique_name(&self, name: &str) -> String {
        let (stem, ext) = split_extension(name);
        (1..)
            .map(|n| format!("{stem}{n}{ext}"))
            .find(|candidate| !self.name_in_use(candidate, None))
            .unwrap_or_else(|| name.to_owned())
    }

    fn unique_subdir_name(&self, name: &str) -> String {
        (1..)
            .map(|n| format!("{name}{n}"))
            .find(|candidate| self.subdir(candidate).is_none())
            .unwrap_or_else(|| name.to_owned())
    }

    /// Deep copy of the subtree with fresh identities, detached from any parent
    pub fn clone_tree(&self) -> ArchiveDir {
        self.copy_tree(None, CopyMode::Fresh)
    }

    /// Deep copy of the subtree keeping every identity, for undo snapshots
    pub fn snapshot(&self) -> ArchiveDir {
        self.copy_tree(self.parent, CopyMode::Keep)
    }

    fn copy_tree(&self, parent: Option<DirId>, mode: CopyMode) -> ArchiveDir {
        let id = match mode {
            CopyMode::Fresh => DirId::next(),
            CopyMode::Keep => self.id,
        };
        let copy_entry = |entry: &EntryRef, parent: Option<DirId>| {
            let entry = entry.read();
            let mut copy = match mode {
                CopyMode::Fresh => entry.duplicate(),
                CopyMode::Keep => entry.snapshot(),
            };
            copy.set_parent(parent);
            copy.into_ref()
        };

        ArchiveDir {
            id,
            parent,
            dir_entry: copy_entry(&self.dir_entry, parent),
            entries: self
                .entries
                .iter()
                .map(|entry| copy_entry(entry, Some(id)))
                .collect(),
            subdirs: self
                .subdirs
                .iter()
                .map(|dir| dir.copy_tree(Some(id), mode))
                .collect(),
            allow_duplicate_names: self.allow_duplicate_names,
        }
    }

    /// Copy the contents of `other` into this directory
    ///
    /// Entries are duplicated (never aliased) and inserted from `position` onwards in their
    /// original order; subdirectories with matching names are merged recursively. Returns the
    /// entries that were added or that replaced an existing one.
    ///
    /// Where duplicate names are allowed the policy only weighs entries that were present before
    /// the merge, and [`MergePolicy::KeepBoth`] keeps the incoming names as they are.
    pub fn merge(
        &mut self,
        other: &ArchiveDir,
        position: Option<usize>,
        policy: MergePolicy,
    ) -> Vec<EntryRef> {
        let mut added = Vec::new();
        let mut next = position.map(|p| p.min(self.entries.len()));
        let before: Vec<EntryId> = self.entries.iter().map(|entry| entry.read().id()).collect();

        for source in &other.entries {
            let copy = source.read().duplicate();
            let existing = self.entries.iter().position(|entry| {
                let entry = entry.read();
                entry.name().eq_ignore_ascii_case(copy.name())
                    && (!self.allow_duplicate_names || before.contains(&entry.id()))
            });

            let copy = match (existing, policy) {
                (Some(_), MergePolicy::Skip) => continue,
                (Some(index), MergePolicy::Overwrite) => {
                    let copy = copy.into_ref();
                    copy.write().set_parent(Some(self.id));
                    if let Some(old) = self.entries.get(index) {
                        old.write().set_parent(None);
                    }
                    self.entries[index] = copy.clone();
                    added.push(copy);
                    continue;
                }
                (Some(_), MergePolicy::KeepBoth) if self.allow_duplicate_names => copy,
                (Some(_), MergePolicy::KeepBoth) => {
                    let unique = self.unique_name(copy.name());
                    let mut copy = copy;
                    copy.set_name(unique);
                    copy
                }
                (None, _) => copy,
            };

            let copy = copy.into_ref();
            let index = self.add_entry(copy.clone(), next);
            next = next.map(|_| index + 1);
            added.push(copy);
        }

        for dir in &other.subdirs {
            let name = dir.name();
            match self.subdir_mut(&name) {
                Some(target) => added.extend(target.merge(dir, None, policy)),
                None => {
                    let copy = dir.clone_tree();
                    added.extend(copy.all_entries());
                    self.add_subdir(copy);
                }
            }
        }

        added
    }

    /// Every entry in this subtree, own entries first, then each subdirectory in order
    pub fn all_entries(&self) -> Vec<EntryRef> {
        let mut all = self.entries.clone();
        for dir in &self.subdirs {
            all.extend(dir.all_entries());
        }
        all
    }

    /// Check the parent links and the duplicate-name policy across the subtree
    pub fn is_consistent(&self) -> bool {
        let entries_ok = self.entries.iter().enumerate().all(|(index, entry)| {
            let entry = entry.read();
            let parent_ok = entry.parent_dir() == Some(self.id);
            let unique_ok = self.allow_duplicate_names
                || !self.entries[..index]
                    .iter()
                    .any(|other| other.read().name().eq_ignore_ascii_case(entry.name()));
            parent_ok && unique_ok
        });

        entries_ok
            && self
                .subdirs
                .iter()
                .all(|dir| dir.parent == Some(self.id) && dir.is_consistent())
    }

    pub(crate) fn entries_mut(&mut self) -> &mut Vec<EntryRef> {
        &mut self.entries
    }

    pub(crate) fn subdirs_mut(&mut self) -> &mut Vec<ArchiveDir> {
        &mut self.subdirs
    }
}

/// Components of a stored path, skipping empty and `.` parts
fn path_parts(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty() && *part != ".")
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{ArchiveDir, MergePolicy};
    use crate::entry::Entry;

    fn names(dir: &ArchiveDir) -> Vec<String> {
        dir.entries()
            .iter()
            .map(|entry| entry.read().name().to_owned())
            .collect()
    }

    #[test]
    fn conflicting_names_are_renamed() {
        let mut dir = ArchiveDir::root(false);
        dir.add_entry(Entry::new("a.txt").into_ref(), None);
        dir.add_entry(Entry::new("A.TXT").into_ref(), None);
        dir.add_entry(Entry::new("a.txt").into_ref(), Some(0));

        assert_eq!(names(&dir), vec!["a2.txt", "a.txt", "A1.TXT"]);
        assert!(dir.is_consistent());
    }

    #[test]
    fn duplicates_allowed_in_flat_dirs() {
        let mut dir = ArchiveDir::root(true);
        dir.add_entry(Entry::new("THINGS").into_ref(), None);
        dir.add_entry(Entry::new("THINGS").into_ref(), None);

        assert_eq!(names(&dir), vec!["THINGS", "THINGS"]);
        assert!(dir.is_consistent());
    }

    #[test]
    fn paths() {
        let mut root = ArchiveDir::root(false);
        let id = root.ensure_subdir_path("maps/extra/").id();

        assert_eq!(root.path_to(id).as_deref(), Some("maps/extra/"));
        assert_eq!(root.path_to(root.id()).as_deref(), Some(""));
        assert_eq!(root.dir_at_path("MAPS/Extra").map(|d| d.id()), Some(id));
        assert!(root.dir_at_path("sounds").is_none());
        assert!(root.is_consistent());
    }

    #[test]
    fn move_clamps_to_end() {
        let mut dir = ArchiveDir::root(false);
        for name in ["A", "B", "C"] {
            dir.add_entry(Entry::new(name).into_ref(), None);
        }

        assert_eq!(dir.move_entry(0, 10), Some(2));
        assert_eq!(names(&dir), vec!["B", "C", "A"]);
    }

    #[test]
    fn clone_tree_gets_new_ids_and_snapshot_keeps_them() {
        let mut root = ArchiveDir::root(false);
        root.ensure_subdir_path("sub")
            .add_entry(Entry::new("x").into_ref(), None);

        let clone = root.clone_tree();
        assert_ne!(clone.id(), root.id());
        assert!(clone.is_consistent());

        let snap = root.snapshot();
        assert_eq!(snap.id(), root.id());
        assert_eq!(snap.subdirs()[0].id(), root.subdirs()[0].id());
        assert_eq!(
            snap.all_entries()[0].read().id(),
            root.all_entries()[0].read().id()
        );
        assert!(snap.is_consistent());
    }

    #[test]
    fn flat_merge_keeps_repeated_names() {
        let mut incoming = ArchiveDir::root(true);
        for name in ["MAP01", "THINGS", "MAP02", "THINGS"] {
            incoming.add_entry(Entry::new(name).into_ref(), None);
        }

        let mut wad = ArchiveDir::root(true);
        wad.merge(&incoming, None, MergePolicy::KeepBoth);
        assert_eq!(names(&wad), vec!["MAP01", "THINGS", "MAP02", "THINGS"]);

        let mut skip = ArchiveDir::root(true);
        skip.add_entry(Entry::new("THINGS").into_ref(), None);
        skip.merge(&incoming, None, MergePolicy::Skip);
        assert_eq!(names(&skip), vec!["THINGS", "MAP01", "MAP02"]);
        assert!(skip.is_consistent());
    }

    #[test]
    fn merge_policies() {
        let mut target = ArchiveDir::root(false);
        target.add_entry(Entry::with_data("a", vec![1]).into_ref(), None);

        let mut other = ArchiveDir::root(false);
        other.add_entry(Entry::with_data("a", vec![2]).into_ref(), None);
        other.add_entry(Entry::with_data("b", vec![3]).into_ref(), None);

        let mut skip = ArchiveDir::root(false);
        skip.merge(&target, None, MergePolicy::KeepBoth);
        skip.merge(&other, None, MergePolicy::Skip);
        assert_eq!(names(&skip), vec!["a", "b"]);

        let mut both = ArchiveDir::root(false);
        both.merge(&target, None, MergePolicy::KeepBoth);
        let added = both.merge(&other, Some(0), MergePolicy::KeepBoth);
        assert_eq!(added.len(), 2);
        assert_eq!(names(&both), vec!["a1", "b", "a"]);

        target.merge(&other, None, MergePolicy::Overwrite);
        assert_eq!(names(&target), vec!["a", "b"]);
        assert_eq!(&*target.entries()[0].write().data().unwrap(), &[2]);
        assert!(target.is_consistent());
    }
}
