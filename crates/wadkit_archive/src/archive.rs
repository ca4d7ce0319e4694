//! The archive: a tree of entries bound to one on-disk layout
//!

use std::{
    fs,
    io::{BufWriter, Cursor, Seek, Write},
    path::{Path, PathBuf},
    sync::{Arc, Weak},
};

use bon::Builder;
use parking_lot::RwLock;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::{
    dir::{ArchiveDir, DirId, MergePolicy},
    entry::{Entry, EntryId, EntryRef, EntryState},
    error::{unsupported, EntryNotFoundError, Error, Result},
    formats::{entry_paths, split_path, ArchiveFormat},
    maps::{detect_flat, detect_hierarchical, MapDesc},
    namespace::{self, NamespacePointers},
    search::{Matcher, SearchOptions},
    sniff,
    source::Source,
};

/// Options for [`Archive::import_dir`]
#[derive(Debug, Clone, Builder)]
pub struct ImportOptions {
    /// Descend into subdirectories of the imported directory
    #[builder(default = true)]
    pub recursive: bool,

    /// Follow symbolic links while walking
    #[builder(default)]
    pub follow_links: bool,

    /// Drop file extensions from entry names; defaults to on for WAD style archives
    pub strip_extensions: Option<bool>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions::builder().build()
    }
}

/// An archive of a given [`ArchiveFormat`]
///
/// ```
/// # fn doit() -> wadkit_archive::error::Result<()> {
/// use wadkit_archive::{Archive, ArchiveFormat};
///
/// let mut wad = Archive::new(ArchiveFormat::Wad);
/// wad.add_entry_at_path("MAP01", Vec::<u8>::new())?;
/// wad.add_entry_at_path("THINGS", vec![0; 10])?;
///
/// let bytes = wad.write_to_vec()?;
/// let again = Archive::from_bytes(bytes)?;
/// assert_eq!(again.format(), ArchiveFormat::Wad);
/// assert_eq!(again.num_entries(), 2);
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
#[derive(Debug)]
pub struct Archive {
    format: ArchiveFormat,
    root: ArchiveDir,
    filename: Option<PathBuf>,
    on_disk: bool,
    read_only: bool,
    structure_modified: bool,
    parent: Option<Weak<RwLock<Entry>>>,
    pointers: Option<NamespacePointers>,
}

impl Archive {
    /// Create an empty archive
    pub fn new(format: ArchiveFormat) -> Self {
        Archive {
            format,
            root: ArchiveDir::root(format.allows_duplicate_names()),
            filename: None,
            on_disk: false,
            read_only: false,
            structure_modified: false,
            parent: None,
            pointers: None,
        }
    }

    /// Open an archive held in memory, detecting its format
    pub fn from_bytes(data: impl Into<Arc<[u8]>>) -> Result<Self> {
        let source = Source::new(data);
        let format = detect_format(&source)?;
        let mut archive = Archive::new(format);
        archive.load(source, None)?;
        Ok(archive)
    }

    /// Open an archive file, detecting its format
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = Source::new(fs::read(path)?);
        let format = detect_format(&source)?;
        let mut archive = Archive::new(format);
        archive.load_file(path, source)?;
        Ok(archive)
    }

    /// Open the payload of `entry` as an archive nested inside the entry's archive
    ///
    /// Saving the nested archive writes back into the entry.
    pub fn open_entry(entry: &EntryRef) -> Result<Self> {
        let (source, name) = {
            let entry = entry.read();
            (Source::new(entry.payload()?.into_owned()), entry.name().to_owned())
        };
        let format = detect_format(&source)?;
        let mut archive = Archive::new(format);
        archive.load(source, Some(&name))?;
        archive.parent = Some(Arc::downgrade(entry));
        Ok(archive)
    }

    /// Replace the contents with the archive in `data`, parsed as this archive's format
    ///
    /// On error the archive is left as it was.
    pub fn open(&mut self, data: impl Into<Arc<[u8]>>) -> Result<()> {
        let hint = self.file_name_hint();
        self.load(Source::new(data), hint.as_deref())
    }

    /// Replace the contents with the archive file at `path`, parsed as this archive's format
    ///
    /// On error the archive is left as it was.
    pub fn open_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let source = Source::new(fs::read(path)?);
        self.load_file(path, source)
    }

    fn load_file(&mut self, path: &Path, source: Source) -> Result<()> {
        let hint = path.file_name().map(|name| name.to_string_lossy().into_owned());
        let read_only = fs::metadata(path)?.permissions().readonly();
        self.load(source, hint.as_deref())?;
        self.read_only = read_only;
        self.filename = Some(path.to_path_buf());
        self.on_disk = true;
        Ok(())
    }

    #[instrument(skip_all, fields(format = %self.format, size = source.len()), err)]
    fn load(&mut self, source: Source, name_hint: Option<&str>) -> Result<()> {
        let mut root = ArchiveDir::root(self.format.allows_duplicate_names());
        self.format.read(&source, &mut root, name_hint)?;

        let registry = sniff::global();
        for entry in root.all_entries() {
            let mut entry = entry.write();
            if let Err(error) = entry.detect_kind(&registry) {
                debug!(name = entry.name(), %error, "type detection skipped");
            }
        }

        info!(entries = root.num_entries(true), "opened archive");
        for entry in self.root.all_entries() {
            entry.write().set_parent(None);
        }
        self.root = root;
        self.structure_modified = false;
        self.update_namespaces();
        Ok(())
    }

    fn file_name_hint(&self) -> Option<String> {
        if let Some(parent) = self.parent_entry() {
            return Some(parent.read().name().to_owned());
        }
        self.filename
            .as_ref()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// The root directory
    pub fn root(&self) -> &ArchiveDir {
        &self.root
    }

    /// Path of the file the archive was opened from or last saved to
    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn is_on_disk(&self) -> bool {
        self.on_disk
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// The entry this archive was opened from, while it is still part of its archive
    pub fn parent_entry(&self) -> Option<EntryRef> {
        self.parent
            .as_ref()?
            .upgrade()
            .filter(|entry| entry.read().parent_dir().is_some())
    }

    /// Forget the entry this archive was opened from
    pub fn detach_parent(&mut self) {
        self.parent = None;
    }

    /// Drop every entry, detaching them so nested archives see their parent go away
    pub fn close(&mut self) {
        for entry in self.root.all_entries() {
            entry.write().set_parent(None);
        }
        self.root = ArchiveDir::root(self.format.allows_duplicate_names());
        self.filename = None;
        self.on_disk = false;
        self.structure_modified = false;
        self.pointers = None;
    }

    /// Whether anything changed since the archive was opened or saved
    pub fn is_modified(&self) -> bool {
        fn dir_modified(dir: &ArchiveDir) -> bool {
            dir.dir_entry().read().state() != EntryState::Unmodified
                || dir
                    .entries()
                    .iter()
                    .any(|entry| entry.read().state() != EntryState::Unmodified)
                || dir.subdirs().iter().any(dir_modified)
        }

        self.structure_modified || dir_modified(&self.root)
    }

    /// Serialize the archive into `out`
    #[instrument(skip_all, fields(format = %self.format), err)]
    pub fn write<W: Write + Seek>(&self, out: &mut W) -> Result<()> {
        self.format.write(&self.root, out)
    }

    /// Serialize the archive into a new buffer
    pub fn write_to_vec(&self) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        self.write(&mut out)?;
        Ok(out.into_inner())
    }

    /// Write the archive back to where it came from
    ///
    /// Nested archives are written into their parent entry, others to [`Archive::filename`].
    pub fn save(&mut self) -> Result<()> {
        if self.read_only {
            return Err(unsupported("archive is read only"));
        }

        if let Some(parent) = self.parent_entry() {
            let bytes = self.write_to_vec()?;
            parent.write().set_data(bytes);
            debug!(parent = %parent.read().name(), "saved into parent entry");
            self.commit();
            return Ok(());
        }

        let path = self
            .filename
            .clone()
            .ok_or_else(|| unsupported("archive has no file name to save to"))?;
        self.save_as(path)
    }

    /// Write the archive to `path` and make that its file name
    ///
    /// The data is staged in a temporary file next to `path` that replaces it only once
    /// everything has been written.
    #[instrument(skip_all, fields(format = %self.format, path = %path.as_ref().display()), err)]
    pub fn save_as(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut staged = NamedTempFile::new_in(&dir)?;
        {
            let mut out = BufWriter::new(staged.as_file_mut());
            self.write(&mut out)?;
            out.flush()?;
        }
        staged.as_file().sync_all()?;
        staged.persist(path).map_err(|error| error.error)?;

        info!("saved archive");
        self.filename = Some(path.to_path_buf());
        self.on_disk = true;
        self.read_only = false;
        self.parent = None;
        self.commit();
        Ok(())
    }

    fn commit(&mut self) {
        fn commit_dir(dir: &ArchiveDir) {
            dir.dir_entry().write().commit();
            for entry in dir.entries() {
                entry.write().commit();
            }
            dir.subdirs().iter().for_each(commit_dir);
        }

        commit_dir(&self.root);
        self.structure_modified = false;
    }

    /// The directory `id` refers to; flat archives always resolve to the root
    fn target_dir(&self, id: Option<DirId>) -> Result<&ArchiveDir> {
        match id {
            Some(id) if self.format.supports_dirs() => self
                .root
                .find_dir(id)
                .ok_or_else(|| EntryNotFoundError::Dir(id.to_string()).into()),
            _ => Ok(&self.root),
        }
    }

    fn target_dir_mut(&mut self, id: Option<DirId>) -> Result<&mut ArchiveDir> {
        match id {
            Some(id) if self.format.supports_dirs() => self
                .root
                .find_dir_mut(id)
                .ok_or_else(|| EntryNotFoundError::Dir(id.to_string()).into()),
            _ => Ok(&mut self.root),
        }
    }

    /// Directory and index of an entry of this archive
    fn locate(&self, entry: &EntryRef) -> Result<(DirId, usize)> {
        let (id, parent) = {
            let entry = entry.read();
            (entry.id(), entry.parent_dir())
        };
        parent
            .and_then(|parent| self.root.find_dir(parent))
            .and_then(|dir| Some((dir.id(), dir.entry_index(id)?)))
            .ok_or_else(|| EntryNotFoundError::Id(id.get()).into())
    }

    /// Entries of the root directory
    pub fn entries(&self) -> &[EntryRef] {
        self.root.entries()
    }

    /// Number of entries in the whole archive
    pub fn num_entries(&self) -> usize {
        self.root.num_entries(true)
    }

    /// First root entry called `name`, ignoring case
    pub fn entry(&self, name: &str) -> Option<EntryRef> {
        self.root.entry(name).cloned()
    }

    pub fn entry_by_id(&self, id: EntryId) -> Option<EntryRef> {
        self.root
            .all_entries()
            .into_iter()
            .find(|entry| entry.read().id() == id)
    }

    /// Entry at a slash separated path; flat archives only look at the last component
    pub fn entry_at_path(&self, path: &str) -> Option<EntryRef> {
        let (dir, name) = split_path(path.trim_start_matches('/'));
        self.dir_at_path(dir)?.entry(name).cloned()
    }

    /// Index of `entry` within its directory
    pub fn entry_index(&self, entry: &EntryRef) -> Option<usize> {
        self.locate(entry).ok().map(|(_, index)| index)
    }

    /// Full path of `entry` inside the archive
    pub fn entry_path(&self, entry: &EntryRef) -> Option<String> {
        let (dir, _) = self.locate(entry).ok()?;
        let prefix = self.root.path_to(dir)?;
        Some(format!("{prefix}{}", entry.read().name()))
    }

    /// The directory `id`, or the root when `id` is `None` or the format is flat
    pub fn dir(&self, id: Option<DirId>) -> Option<&ArchiveDir> {
        self.target_dir(id).ok()
    }

    /// Directory at a slash separated path; flat archives always resolve to the root
    pub fn dir_at_path(&self, path: &str) -> Option<&ArchiveDir> {
        if self.format.supports_dirs() {
            self.root.dir_at_path(path)
        } else {
            Some(&self.root)
        }
    }

    /// Create the directory at `path` and any missing parents
    pub fn create_dir(&mut self, path: &str) -> Result<DirId> {
        if !self.format.supports_dirs() {
            return Err(unsupported(format!("{} archives have no directories", self.format)));
        }
        if path.split('/').all(str::is_empty) {
            return Err(Error::InvalidName(path.to_owned()));
        }
        let existed = self.root.dir_at_path(path).is_some();
        let id = self.root.ensure_subdir_path(path).id();
        self.structure_modified |= !existed;
        Ok(id)
    }

    /// Remove the directory `id` with everything in it
    pub fn remove_dir(&mut self, id: DirId) -> Result<ArchiveDir> {
        if !self.format.supports_dirs() {
            return Err(unsupported(format!("{} archives have no directories", self.format)));
        }
        if id == self.root.id() {
            return Err(unsupported("the root directory cannot be removed"));
        }
        let parent = self
            .root
            .find_dir(id)
            .and_then(ArchiveDir::parent_id)
            .ok_or_else(|| Error::from(EntryNotFoundError::Dir(id.to_string())))?;
        let removed = self
            .root
            .find_dir_mut(parent)
            .and_then(|dir| dir.remove_subdir(id))
            .ok_or_else(|| Error::from(EntryNotFoundError::Dir(id.to_string())))?;
        self.structure_modified = true;
        Ok(removed)
    }

    /// Every entry matching `options`, in archive order
    pub fn find_all(&self, options: &SearchOptions) -> Result<Vec<EntryRef>> {
        let matcher = Matcher::new(options)?;
        let start = self.target_dir(options.dir)?;

        let mut dirs = vec![start];
        if options.search_subdirs {
            let mut index = 0;
            while index < dirs.len() {
                let dir: &ArchiveDir = dirs[index];
                dirs.extend(dir.subdirs());
                index += 1;
            }
        }

        let spans = match (&options.match_namespace, self.format.supports_dirs()) {
            (Some(_), false) => namespace::scan(&namespace::entry_names(&self.root)),
            _ => Vec::new(),
        };

        let mut found = Vec::new();
        for dir in dirs {
            for (index, entry) in dir.entries().iter().enumerate() {
                if !matcher.matches(&entry.read()) {
                    continue;
                }
                if let Some(wanted) = &options.match_namespace {
                    let namespace = if self.format.supports_dirs() {
                        self.entry_path(entry)
                            .map_or_else(|| namespace::GLOBAL.to_owned(), |path| {
                                namespace::namespace_of_path(&path)
                            })
                    } else {
                        self.pointer_namespace(index).map_or_else(
                            || namespace::namespace_at(&spans, index).to_owned(),
                            str::to_owned,
                        )
                    };
                    if !namespace.eq_ignore_ascii_case(wanted) {
                        continue;
                    }
                }
                found.push(entry.clone());
            }
        }

        Ok(found)
    }

    /// First entry matching `options`
    pub fn find_first(&self, options: &SearchOptions) -> Result<Option<EntryRef>> {
        Ok(self.find_all(options)?.into_iter().next())
    }

    /// Last entry matching `options`
    pub fn find_last(&self, options: &SearchOptions) -> Result<Option<EntryRef>> {
        Ok(self.find_all(options)?.pop())
    }

    fn check_capacity(&self, incoming: usize) -> Result<()> {
        if self.format.single_entry() && self.root.num_entries(true) + incoming > 1 {
            return Err(unsupported(format!(
                "{} archives hold a single entry",
                self.format
            )));
        }
        Ok(())
    }

    /// The name or path an entry called `name` in directory `dir` is stored under
    fn stored_path(&self, dir: DirId, name: &str) -> String {
        if !self.format.stores_paths() {
            return name.to_owned();
        }
        let prefix = self.root.path_to(dir).unwrap_or_default();
        format!("{prefix}{name}")
    }

    /// Refuse names longer than the format can store
    fn check_fits(&self, stored: &str) -> Result<()> {
        match self.format.max_name_length() {
            Some(limit) if stored.len() > limit => {
                debug!(name = stored, limit, format = %self.format, "name does not fit");
                Err(Error::InvalidName(stored.to_owned()))
            }
            _ => Ok(()),
        }
    }

    /// Add a detached entry to directory `dir` (the root when `None`) at `position`
    ///
    /// A name already used in the directory is replaced with a numbered variant unless the format
    /// allows duplicates. Returns the index the entry landed at.
    pub fn add_entry(
        &mut self,
        entry: EntryRef,
        position: Option<usize>,
        dir: Option<DirId>,
    ) -> Result<usize> {
        let name = {
            let entry = entry.read();
            validate_name(entry.name())?;
            if entry.parent_dir().is_some() {
                return Err(unsupported(format!(
                    "{} already belongs to a directory",
                    entry.name()
                )));
            }
            entry.name().to_owned()
        };
        self.check_capacity(1)?;
        let target = self.target_dir(dir)?.id();
        self.check_fits(&self.stored_path(target, &name))?;

        let index = self.target_dir_mut(dir)?.add_entry(entry, position);
        self.structure_modified = true;
        Ok(index)
    }

    /// Create an empty entry called `name` and add it
    pub fn add_new_entry(
        &mut self,
        name: &str,
        position: Option<usize>,
        dir: Option<DirId>,
    ) -> Result<EntryRef> {
        let entry = Entry::new(name).into_ref();
        self.add_entry(entry.clone(), position, dir)?;
        Ok(entry)
    }

    /// Create an entry holding `data` at `path`, creating directories as needed
    ///
    /// Flat archives drop the directory part of the path.
    pub fn add_entry_at_path(
        &mut self,
        path: &str,
        data: impl Into<Arc<[u8]>>,
    ) -> Result<EntryRef> {
        let path = path.trim_start_matches('/');
        let (dir, name) = split_path(path);
        validate_name(name)?;
        self.check_capacity(1)?;
        self.check_fits(if self.format.stores_paths() { path } else { name })?;

        let entry = Entry::with_data(name, data).into_ref();
        let target = if self.format.supports_dirs() {
            self.root.ensure_subdir_path(dir)
        } else {
            &mut self.root
        };
        target.add_entry(entry.clone(), None);
        self.structure_modified = true;
        Ok(entry)
    }

    /// Take `entry` out of the archive
    pub fn remove_entry(&mut self, entry: &EntryRef) -> Result<EntryRef> {
        let (dir, index) = self.locate(entry)?;
        let removed = self
            .target_dir_mut(Some(dir))?
            .remove_entry(index)
            .ok_or(EntryNotFoundError::Index(index))?;
        self.structure_modified = true;
        Ok(removed)
    }

    /// Move `entry` to `position` in directory `dir` (its own directory when `None`)
    ///
    /// Returns the index the entry ended up at.
    pub fn move_entry(
        &mut self,
        entry: &EntryRef,
        position: Option<usize>,
        dir: Option<DirId>,
    ) -> Result<usize> {
        let (from_dir, from) = self.locate(entry)?;
        let to_dir = match dir {
            Some(dir) => self.target_dir(Some(dir))?.id(),
            None => from_dir,
        };
        if to_dir != from_dir {
            let name = entry.read().name().to_owned();
            self.check_fits(&self.stored_path(to_dir, &name))?;
        }

        let index = if to_dir == from_dir {
            let dir = self.target_dir_mut(Some(from_dir))?;
            let to = position.unwrap_or(dir.entries().len());
            dir.move_entry(from, to)
                .ok_or(EntryNotFoundError::Index(from))?
        } else {
            let moved = self
                .target_dir_mut(Some(from_dir))?
                .remove_entry(from)
                .ok_or(EntryNotFoundError::Index(from))?;
            self.target_dir_mut(Some(to_dir))?.add_entry(moved, position)
        };
        self.structure_modified = true;
        Ok(index)
    }

    /// Rename `entry`, refusing names its siblings already use unless duplicates are allowed
    ///
    /// Names longer than the format stores are an [`Error::InvalidName`].
    pub fn rename_entry(&mut self, entry: &EntryRef, name: &str) -> Result<()> {
        validate_name(name)?;
        let (dir, _) = self.locate(entry)?;
        self.check_fits(&self.stored_path(dir, name))?;
        let id = entry.read().id();
        let dir = self.target_dir(Some(dir))?;
        if !dir.allow_duplicate_names() && dir.name_in_use(name, Some(id)) {
            return Err(Error::NameConflict(name.to_owned()));
        }
        entry.write().set_name(name);
        Ok(())
    }

    /// Exchange two entries of the same directory
    pub fn swap_entries(&mut self, a: &EntryRef, b: &EntryRef) -> Result<()> {
        let (dir_a, index_a) = self.locate(a)?;
        let (dir_b, index_b) = self.locate(b)?;
        if dir_a != dir_b {
            return Err(unsupported("only entries of the same directory can be swapped"));
        }
        self.target_dir_mut(Some(dir_a))?
            .swap_entries(index_a, index_b);
        self.structure_modified = true;
        Ok(())
    }

    /// Restore the saved payload of `entry`; returns whether anything changed
    pub fn revert_entry(&mut self, entry: &EntryRef) -> Result<bool> {
        self.locate(entry)?;
        Ok(entry.write().revert())
    }

    /// Every map in the archive
    pub fn detect_maps(&self) -> Vec<MapDesc> {
        if self.format.supports_dirs() {
            detect_hierarchical(&self.root)
        } else {
            detect_flat(self.root.entries())
        }
    }

    /// Namespace `entry` belongs to
    pub fn detect_namespace(&self, entry: &EntryRef) -> Result<String> {
        if self.format.supports_dirs() {
            let path = self
                .entry_path(entry)
                .ok_or_else(|| EntryNotFoundError::Id(entry.read().id().get()))?;
            return Ok(namespace::namespace_of_path(&path));
        }
        let (_, index) = self.locate(entry)?;
        Ok(self.detect_namespace_at(index))
    }

    /// Namespace of the root entry at `index`
    pub fn detect_namespace_at(&self, index: usize) -> String {
        if self.format.supports_dirs() {
            return namespace::GLOBAL.to_owned();
        }
        if let Some(category) = self.pointer_namespace(index) {
            return category.to_owned();
        }
        let spans = namespace::scan(&namespace::entry_names(&self.root));
        namespace::namespace_at(&spans, index).to_owned()
    }

    fn pointer_namespace(&self, index: usize) -> Option<&'static str> {
        self.pointers
            .as_ref()?
            .category_at(&self.root, index)
            .map(|category| category.name())
    }

    /// Recompute the namespace pointers of dialects that keep them
    pub fn update_namespaces(&mut self) {
        self.pointers = (self.format == ArchiveFormat::WadJ)
            .then(|| NamespacePointers::scan(&self.root))
            .filter(|pointers| !pointers.is_empty());
    }

    pub fn namespace_pointers(&self) -> Option<&NamespacePointers> {
        self.pointers.as_ref()
    }

    /// Classify every entry with the process-wide format registry
    pub fn detect_entry_types(&self) -> usize {
        let registry = sniff::global();
        let mut detected = 0;
        for entry in self.root.all_entries() {
            let mut entry = entry.write();
            match entry.detect_kind(&registry) {
                Ok(kind) if kind != Entry::UNKNOWN_KIND => detected += 1,
                Ok(_) => {}
                Err(error) => warn!(name = entry.name(), %error, "could not classify entry"),
            }
        }
        detected
    }

    /// Import the files under `path` into directory `dir`
    ///
    /// Every file is read before the archive is touched, so a failure leaves it unchanged.
    #[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
    pub fn import_dir(
        &mut self,
        path: impl AsRef<Path>,
        dir: Option<DirId>,
        options: &ImportOptions,
    ) -> Result<Vec<EntryRef>> {
        let base = path.as_ref();
        let strip = options.strip_extensions.unwrap_or(matches!(
            self.format,
            ArchiveFormat::Wad | ArchiveFormat::WadJ | ArchiveFormat::Wad2
        ));

        let mut walker = WalkDir::new(base)
            .follow_links(options.follow_links)
            .sort_by_file_name()
            .min_depth(1);
        if !options.recursive {
            walker = walker.max_depth(1);
        }

        let mut staged = ArchiveDir::root(true);
        for file in walker {
            let file = file.map_err(std::io::Error::from)?;
            if !file.file_type().is_file() {
                continue;
            }
            let relative = file
                .path()
                .strip_prefix(base)
                .unwrap_or(file.path())
                .to_string_lossy()
                .replace('\\', "/");
            let (parent, name) = split_path(&relative);
            let name = if strip {
                crate::entry::split_extension(name).0
            } else {
                name
            };
            validate_name(name)?;

            let data = fs::read(file.path())?;
            debug!(path = %relative, size = data.len(), "staged file");
            staged
                .ensure_subdir_path(parent)
                .add_entry(Entry::with_data(name, data).into_ref(), None);
        }

        self.paste(&staged, None, dir, MergePolicy::KeepBoth)
    }

    /// Copy the contents of `tree` into directory `dir` at `position`
    ///
    /// Flat archives receive every entry of the tree in one level. Returns the added entries.
    pub fn paste(
        &mut self,
        tree: &ArchiveDir,
        position: Option<usize>,
        dir: Option<DirId>,
        policy: MergePolicy,
    ) -> Result<Vec<EntryRef>> {
        let incoming = tree.num_entries(true);
        self.check_capacity(incoming)?;
        let target = self.target_dir(dir)?.id();
        for (path, entry) in entry_paths(tree) {
            let stored = if self.format.stores_paths() {
                self.stored_path(target, &path)
            } else {
                entry.read().name().to_owned()
            };
            self.check_fits(&stored)?;
        }

        let added = if self.format.supports_dirs() {
            self.target_dir_mut(dir)?.merge(tree, position, policy)
        } else {
            let mut flat = ArchiveDir::root(true);
            for entry in tree.all_entries() {
                let copy = entry.read().duplicate();
                flat.add_entry(copy.into_ref(), None);
            }
            self.root.merge(&flat, position, policy)
        };

        if !added.is_empty() {
            self.structure_modified = true;
        }
        Ok(added)
    }

    /// Copy of the tree keeping every identity, for undo
    pub fn snapshot(&self) -> ArchiveDir {
        self.root.snapshot()
    }

    /// Replace the tree with a copy of `snapshot`
    ///
    /// Entries keep the ids they had when the snapshot was taken, so references by id stay
    /// valid. The snapshot itself can be restored again later.
    pub fn restore_snapshot(&mut self, snapshot: &ArchiveDir) {
        for entry in self.root.all_entries() {
            entry.write().set_parent(None);
        }
        self.root = snapshot.snapshot();
        self.structure_modified = true;
        self.update_namespaces();
    }
}

fn detect_format(source: &Source) -> Result<ArchiveFormat> {
    let format = sniff::global()
        .archive_format(source)
        .ok_or(Error::UnknownFormat)?;
    debug!(%format, "detected archive format");
    Ok(format)
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(Error::InvalidName(name.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use super::{Archive, ImportOptions};
    use crate::{
        dir::{ArchiveDir, MergePolicy},
        entry::{Entry, EntryState},
        error::{Error, Result},
        formats::ArchiveFormat,
        search::SearchOptions,
    };

    #[test]
    #[traced_test]
    fn flat_archives_redirect_to_root() -> Result<()> {
        let mut wad = Archive::new(ArchiveFormat::Wad);
        let entry = wad.add_entry_at_path("sprites/TROOA1", vec![1])?;
        assert_eq!(wad.entry_path(&entry).as_deref(), Some("TROOA1"));
        assert!(wad.dir_at_path("anything/at/all").is_some());
        assert!(matches!(wad.create_dir("maps"), Err(Error::UnsupportedOperation(_))));
        assert!(matches!(
            wad.remove_dir(wad.root().id()),
            Err(Error::UnsupportedOperation(_))
        ));
        Ok(())
    }

    #[test]
    fn hierarchical_paths() -> Result<()> {
        let mut zip = Archive::new(ArchiveFormat::Zip);
        let dir = zip.create_dir("sprites/monsters")?;
        let entry = zip.add_entry_at_path("sprites/monsters/troo.png", vec![1])?;
        assert_eq!(entry.read().parent_dir(), Some(dir));
        assert_eq!(
            zip.entry_path(&entry).as_deref(),
            Some("sprites/monsters/troo.png")
        );
        assert!(zip.entry_at_path("SPRITES/Monsters/TROO.PNG").is_some());
        assert_eq!(zip.detect_namespace(&entry)?, "sprites");

        let removed = zip.remove_dir(dir)?;
        assert_eq!(removed.num_entries(true), 1);
        assert!(zip.entry_at_path("sprites/monsters/troo.png").is_none());
        Ok(())
    }

    #[test]
    fn rename_conflicts() -> Result<()> {
        let mut pak = Archive::new(ArchiveFormat::Pak);
        pak.add_entry_at_path("a.txt", vec![])?;
        let b = pak.add_entry_at_path("b.txt", vec![])?;
        assert!(matches!(
            pak.rename_entry(&b, "A.TXT"),
            Err(Error::NameConflict(_))
        ));
        assert!(matches!(pak.rename_entry(&b, ""), Err(Error::InvalidName(_))));
        assert!(matches!(pak.rename_entry(&b, "x/y"), Err(Error::InvalidName(_))));
        pak.rename_entry(&b, "c.txt")?;
        assert_eq!(b.read().name(), "c.txt");

        let duplicate = pak.add_entry_at_path("c.txt", vec![])?;
        assert_eq!(duplicate.read().name(), "c1.txt");
        Ok(())
    }

    #[test]
    fn single_entry_formats() -> Result<()> {
        let mut gz = Archive::new(ArchiveFormat::Gzip);
        gz.add_entry_at_path("data.bin", vec![1, 2, 3])?;
        assert!(matches!(
            gz.add_new_entry("second", None, None),
            Err(Error::UnsupportedOperation(_))
        ));
        Ok(())
    }

    #[test]
    fn attached_entries_are_rejected() -> Result<()> {
        let mut wad = Archive::new(ArchiveFormat::Wad);
        let entry = wad.add_new_entry("THINGS", None, None)?;
        assert!(wad.add_entry(entry, None, None).is_err());
        Ok(())
    }

    #[test]
    fn search_by_namespace() -> Result<()> {
        let mut wad = Archive::new(ArchiveFormat::Wad);
        for name in ["TROOA1", "S_START", "TROOB1", "TROOC1", "S_END", "PLAYPAL"] {
            wad.add_new_entry(name, None, None)?;
        }

        let sprites = SearchOptions::builder()
            .match_name("troo*")
            .match_namespace("sprites")
            .build();
        let found = wad.find_all(&sprites)?;
        let names: Vec<_> = found.iter().map(|e| e.read().name().to_owned()).collect();
        assert_eq!(names, vec!["TROOB1", "TROOC1"]);

        let last = wad.find_last(&sprites)?.map(|e| e.read().name().to_owned());
        assert_eq!(last.as_deref(), Some("TROOC1"));

        let any = SearchOptions::builder().match_name("TROO*").build();
        assert_eq!(wad.find_first(&any)?.map(|e| e.read().id()), Some(wad.entries()[0].read().id()));
        Ok(())
    }

    #[test]
    fn jaguar_pointers_win_over_markers() -> Result<()> {
        let mut wad = Archive::new(ArchiveFormat::WadJ);
        for name in ["T_START", "STARTAN", "T_END", "DEMO1"] {
            wad.add_new_entry(name, None, None)?;
        }
        assert_eq!(wad.detect_namespace_at(1), "t");
        wad.update_namespaces();
        assert_eq!(wad.detect_namespace_at(1), "textures");
        assert_eq!(wad.detect_namespace_at(3), "global");
        Ok(())
    }

    #[test]
    fn move_between_directories() -> Result<()> {
        let mut zip = Archive::new(ArchiveFormat::Zip);
        let a = zip.add_entry_at_path("a/readme.txt", vec![1])?;
        zip.add_entry_at_path("b/readme.txt", vec![2])?;
        let b = zip.create_dir("b")?;

        let index = zip.move_entry(&a, Some(0), Some(b))?;
        assert_eq!(index, 0);
        assert_eq!(zip.entry_path(&a).as_deref(), Some("b/readme1.txt"));
        assert!(zip.root().is_consistent());
        Ok(())
    }

    #[test]
    fn import_stages_before_touching_the_tree() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("sub"))?;
        std::fs::write(dir.path().join("THINGS.lmp"), [1, 2])?;
        std::fs::write(dir.path().join("sub").join("LINEDEFS.lmp"), [3])?;

        let mut wad = Archive::new(ArchiveFormat::Wad);
        let added = wad.import_dir(dir.path(), None, &ImportOptions::default())?;
        let names: Vec<_> = added.iter().map(|e| e.read().name().to_owned()).collect();
        assert_eq!(names, vec!["THINGS", "LINEDEFS"]);
        assert_eq!(wad.entries().len(), 2);
        assert_eq!(wad.entries()[0].read().state(), EntryState::New);

        let mut zip = Archive::new(ArchiveFormat::Zip);
        zip.import_dir(dir.path(), None, &ImportOptions::default())?;
        assert!(zip.entry_at_path("sub/LINEDEFS.lmp").is_some());

        assert!(wad
            .import_dir(dir.path().join("missing"), None, &ImportOptions::default())
            .is_err());
        assert_eq!(wad.entries().len(), 2);
        Ok(())
    }

    #[test]
    fn flat_paste_keeps_repeated_lumps() -> Result<()> {
        let mut tree = ArchiveDir::root(false);
        for map in ["map01", "map02"] {
            let dir = tree.ensure_subdir_path(map);
            dir.add_entry(Entry::new(map.to_uppercase()).into_ref(), None);
            dir.add_entry(Entry::new("THINGS").into_ref(), None);
        }

        let mut wad = Archive::new(ArchiveFormat::Wad);
        wad.paste(&tree, None, None, MergePolicy::KeepBoth)?;
        let names: Vec<_> = wad.entries().iter().map(|e| e.read().name().to_owned()).collect();
        assert_eq!(names, vec!["MAP01", "THINGS", "MAP02", "THINGS"]);

        wad.paste(&tree, None, None, MergePolicy::Skip)?;
        assert_eq!(wad.entries().len(), 4);
        Ok(())
    }

    #[test]
    fn flat_import_keeps_repeated_lumps() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for map in ["a", "b"] {
            std::fs::create_dir(dir.path().join(map))?;
            std::fs::write(dir.path().join(map).join("THINGS.lmp"), [1])?;
        }

        let mut wad = Archive::new(ArchiveFormat::Wad);
        wad.import_dir(dir.path(), None, &ImportOptions::default())?;
        let names: Vec<_> = wad.entries().iter().map(|e| e.read().name().to_owned()).collect();
        assert_eq!(names, vec!["THINGS", "THINGS"]);
        Ok(())
    }

    #[test]
    fn failed_file_open_keeps_contents() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut wad = Archive::new(ArchiveFormat::Wad);
        wad.add_new_entry("KEEP", None, None)?;

        assert!(wad.open_file(dir.path().join("missing.wad")).is_err());
        let garbage = dir.path().join("garbage.wad");
        std::fs::write(&garbage, b"PWAD\x05\0\0\0\xff\xff\0\0")?;
        assert!(wad.open_file(&garbage).is_err());

        assert_eq!(wad.entries().len(), 1);
        assert!(wad.filename().is_none());
        assert!(!wad.is_on_disk());
        Ok(())
    }

    #[test]
    fn revert_requires_membership() -> Result<()> {
        let mut wad = Archive::new(ArchiveFormat::Wad);
        let stray = Entry::new("STRAY").into_ref();
        assert!(wad.revert_entry(&stray).is_err());
        Ok(())
    }
}
