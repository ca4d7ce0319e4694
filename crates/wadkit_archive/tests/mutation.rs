use std::fs;

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tracing_test::traced_test;
use wadkit_archive::{
    error::{Error, Result},
    Archive, ArchiveFormat, Entry, EntryState,
};

fn names(archive: &Archive) -> Vec<String> {
    archive
        .entries()
        .iter()
        .map(|entry| entry.read().name().to_owned())
        .collect()
}

fn wad(lumps: &[&str]) -> Result<Archive> {
    let mut archive = Archive::new(ArchiveFormat::Wad);
    for (index, name) in lumps.iter().enumerate() {
        archive.add_entry_at_path(name, vec![index as u8; index + 1])?;
    }
    Ok(archive)
}

#[test]
fn swapping_twice_restores_order() -> Result<()> {
    let mut archive = wad(&["A", "B", "C", "D"])?;
    let before = names(&archive);
    let a = archive.entry("A").expect("A");
    let c = archive.entry("C").expect("C");

    archive.swap_entries(&a, &c)?;
    assert_eq!(names(&archive), ["C", "B", "A", "D"]);
    archive.swap_entries(&a, &c)?;
    assert_eq!(names(&archive), before);

    Ok(())
}

#[test]
fn moving_an_entry_lands_at_the_requested_index() -> Result<()> {
    let mut archive = wad(&["A", "B", "C", "D"])?;
    let a = archive.entry("A").expect("A");

    assert_eq!(archive.move_entry(&a, Some(2), None)?, 2);
    assert_eq!(names(&archive), ["B", "C", "A", "D"]);
    assert_eq!(archive.entry_index(&a), Some(2));

    assert_eq!(archive.move_entry(&a, None, None)?, 3);
    assert_eq!(names(&archive), ["B", "C", "D", "A"]);

    Ok(())
}

#[test]
fn removed_entries_are_detached() -> Result<()> {
    let mut archive = wad(&["A", "B"])?;
    let b = archive.entry("B").expect("B");

    let removed = archive.remove_entry(&b)?;
    assert!(removed.read().parent_dir().is_none());
    assert_eq!(names(&archive), ["A"]);
    assert!(matches!(archive.remove_entry(&b), Err(Error::EntryNotFound(_))));

    archive.add_entry(removed, Some(0), None)?;
    assert_eq!(names(&archive), ["B", "A"]);

    Ok(())
}

#[test]
fn revert_restores_the_saved_payload() -> Result<()> {
    let original = wad(&["PLAYPAL", "COLORMAP"])?.write_to_vec()?;
    let mut archive = Archive::from_bytes(original)?;
    let playpal = archive.entry("PLAYPAL").expect("PLAYPAL");
    let saved = playpal.write().data()?;

    playpal.write().set_data(b"changed".to_vec());
    assert_eq!(playpal.read().state(), EntryState::Modified);
    assert!(archive.is_modified());

    assert!(archive.revert_entry(&playpal)?);
    assert_eq!(playpal.read().state(), EntryState::Unmodified);
    assert_eq!(playpal.write().data()?, saved);
    assert!(!archive.is_modified());
    assert!(!archive.revert_entry(&playpal)?);

    Ok(())
}

#[test]
fn new_entries_cannot_be_reverted() -> Result<()> {
    let mut archive = wad(&["A"])?;
    let a = archive.entry("A").expect("A");
    a.write().set_data(b"edit".to_vec());
    assert_eq!(a.read().state(), EntryState::New);
    assert!(!archive.revert_entry(&a)?);
    assert_eq!(&*a.write().data()?, b"edit");
    Ok(())
}

#[test]
fn snapshots_keep_identities() -> Result<()> {
    let mut archive = Archive::new(ArchiveFormat::Zip);
    archive.add_entry_at_path("textures/WALL.PNG", b"wall".to_vec())?;
    archive.add_entry_at_path("README.TXT", b"readme".to_vec())?;
    let readme = archive.entry("README.TXT").expect("README.TXT");
    let id = readme.read().id();

    let snapshot = archive.snapshot();
    archive.remove_entry(&readme)?;
    archive.add_entry_at_path("textures/FLOOR.PNG", b"floor".to_vec())?;
    assert!(archive.entry_by_id(id).is_none());

    archive.restore_snapshot(&snapshot);
    let restored = archive.entry_by_id(id).expect("restored entry");
    assert_eq!(restored.read().name(), "README.TXT");
    assert!(archive.entry_at_path("textures/floor.png").is_none());
    assert!(archive.root().is_consistent());

    archive.remove_entry(&restored)?;
    archive.restore_snapshot(&snapshot);
    assert!(archive.entry_by_id(id).is_some());

    Ok(())
}

#[test]
#[traced_test]
fn failed_open_leaves_the_archive_untouched() -> Result<()> {
    let mut archive = wad(&["A", "B"])?;
    assert!(archive.open(b"PWAD\x05\0\0\0\xff\xff\0\0".to_vec()).is_err());
    assert_eq!(names(&archive), ["A", "B"]);
    assert!(archive.root().is_consistent());
    Ok(())
}

#[test]
#[traced_test]
fn save_to_disk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("test.wad");

    let mut archive = wad(&["PLAYPAL", "ENDOOM"])?;
    assert!(archive.is_modified());
    assert!(archive.save().is_err());

    archive.save_as(&path)?;
    assert!(!archive.is_modified());
    assert!(archive.is_on_disk());
    assert_eq!(archive.filename(), Some(path.as_path()));

    let endoom = archive.entry("ENDOOM").expect("ENDOOM");
    endoom.write().set_data(vec![0x20; 4000]);
    assert!(archive.is_modified());
    archive.save()?;
    assert!(!archive.is_modified());

    let reopened = Archive::from_file(&path)?;
    assert_eq!(reopened.format(), ArchiveFormat::Wad);
    assert_eq!(names(&reopened), ["PLAYPAL", "ENDOOM"]);
    assert_eq!(reopened.entry("ENDOOM").expect("ENDOOM").read().size(), 4000);
    assert_eq!(fs::read(&path)?, reopened.write_to_vec()?);

    archive.set_read_only(true);
    assert!(archive.save().is_err());

    Ok(())
}

#[test]
#[traced_test]
fn nested_archives_save_into_their_parent() -> Result<()> {
    let inner_bytes = wad(&["MAP01", "THINGS"])?.write_to_vec()?;
    let mut outer = Archive::new(ArchiveFormat::Zip);
    let holder = outer.add_entry_at_path("maps/map01.wad", inner_bytes)?;

    let mut inner = Archive::open_entry(&holder)?;
    assert_eq!(inner.format(), ArchiveFormat::Wad);
    assert!(inner.parent_entry().is_some());

    inner.add_entry_at_path("LINEDEFS", b"lines".to_vec())?;
    inner.save()?;
    assert!(!inner.is_modified());

    let reread = Archive::open_entry(&holder)?;
    assert_eq!(names(&reread), ["MAP01", "THINGS", "LINEDEFS"]);

    outer.close();
    assert!(inner.parent_entry().is_none());
    assert_eq!(outer.num_entries(), 0);

    Ok(())
}

#[test]
fn renaming() -> Result<()> {
    let mut archive = Archive::new(ArchiveFormat::Pak);
    let a = archive.add_entry_at_path("A.TXT", b"a".to_vec())?;
    archive.add_entry_at_path("B.TXT", b"b".to_vec())?;

    assert!(matches!(archive.rename_entry(&a, "b.txt"), Err(Error::NameConflict(_))));
    assert!(matches!(archive.rename_entry(&a, "x/y"), Err(Error::InvalidName(_))));
    archive.rename_entry(&a, "C.TXT")?;
    assert_eq!(archive.entry_path(&a).as_deref(), Some("C.TXT"));

    let detached = Entry::new("C.TXT").into_ref();
    archive.add_entry(detached.clone(), None, None)?;
    assert_eq!(detached.read().name(), "C1.TXT");

    Ok(())
}

#[derive(Debug, Clone)]
enum Op {
    Add(usize),
    Remove(usize),
    Move { from: usize, to: usize, into_sub: bool },
    Swap(usize, usize),
    Rename(usize, usize),
}

const NAMES: [&str; 4] = ["A.LMP", "B.LMP", "A1.LMP", "C"];

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..NAMES.len()).prop_map(Op::Add),
        (0..8usize).prop_map(Op::Remove),
        (0..8usize, 0..8usize, any::<bool>())
            .prop_map(|(from, to, into_sub)| Op::Move { from, to, into_sub }),
        (0..8usize, 0..8usize).prop_map(|(a, b)| Op::Swap(a, b)),
        (0..8usize, 0..NAMES.len()).prop_map(|(i, n)| Op::Rename(i, n)),
    ]
}

proptest! {
    #[test]
    fn tree_stays_consistent(ops in proptest::collection::vec(op(), 1..40)) {
        let mut archive = Archive::new(ArchiveFormat::Zip);
        let sub = archive.create_dir("sub").expect("create sub");
        let mut expected = 0usize;

        for op in ops {
            let all = archive.root().all_entries();
            let pick = |i: usize| (!all.is_empty()).then(|| all[i % all.len()].clone());
            match op {
                Op::Add(n) => {
                    archive.add_new_entry(NAMES[n], None, None).expect("add");
                    expected += 1;
                }
                Op::Remove(i) => {
                    if let Some(entry) = pick(i) {
                        archive.remove_entry(&entry).expect("remove");
                        expected -= 1;
                    }
                }
                Op::Move { from, to, into_sub } => {
                    if let Some(entry) = pick(from) {
                        let dir = into_sub.then_some(sub);
                        let index = archive.move_entry(&entry, Some(to), dir).expect("move");
                        prop_assert_eq!(archive.entry_index(&entry), Some(index));
                    }
                }
                Op::Swap(a, b) => {
                    if let (Some(a), Some(b)) = (pick(a), pick(b)) {
                        let same_dir = a.read().parent_dir() == b.read().parent_dir();
                        prop_assert_eq!(archive.swap_entries(&a, &b).is_ok(), same_dir);
                    }
                }
                Op::Rename(i, n) => {
                    if let Some(entry) = pick(i) {
                        let _ = archive.rename_entry(&entry, NAMES[n]);
                    }
                }
            }

            prop_assert!(archive.root().is_consistent());
            prop_assert_eq!(archive.num_entries(), expected);
        }
    }
}
