use pretty_assertions::assert_eq;
use tracing::info;
use tracing_test::traced_test;
use wadkit_archive::{
    error::{Error, Result},
    sniff, Archive, ArchiveDir, ArchiveFormat, Confidence, Entry, EntryState, MergePolicy,
};

fn names_for(format: ArchiveFormat) -> &'static [&'static str] {
    match format {
        ArchiveFormat::Wad | ArchiveFormat::WadJ | ArchiveFormat::Wad2 => {
            &["PLAYPAL", "COLORMAP", "ENDOOM"]
        }
        ArchiveFormat::Gzip | ArchiveFormat::Bzip2 => &["PAYLOAD.BIN"],
        ArchiveFormat::Bsp => &["+0slip", "*water1", "sky4"],
        ArchiveFormat::Wolf => &["WAL00000", "SPR00000", "SND00000"],
        _ => &["PALETTE.DAT", "TILES.ART", "GAME.CON"],
    }
}

fn payload(index: usize) -> Vec<u8> {
    (0..64 + index * 37).map(|i| (i * (index + 3)) as u8).collect()
}

/// BSP textures are miptex blobs that open with their NUL padded name
fn payload_for(format: ArchiveFormat, index: usize, name: &str) -> Vec<u8> {
    if format != ArchiveFormat::Bsp {
        return payload(index);
    }
    let mut blob = vec![0u8; 16];
    blob[..name.len()].copy_from_slice(name.as_bytes());
    blob.extend(payload(index));
    blob
}

fn build(format: ArchiveFormat) -> Result<Archive> {
    let mut archive = Archive::new(format);
    for (index, name) in names_for(format).iter().enumerate() {
        archive.add_entry_at_path(name, payload_for(format, index, name))?;
    }
    if format.supports_dirs() {
        archive.add_entry_at_path("sub/NESTED.TXT", b"nested entry".to_vec())?;
    }
    Ok(archive)
}

/// Every entry as (path, payload), in archive order
fn contents(archive: &Archive) -> Result<Vec<(String, Vec<u8>)>> {
    fn walk(
        archive: &Archive,
        dir: &ArchiveDir,
        out: &mut Vec<(String, Vec<u8>)>,
    ) -> Result<()> {
        for entry in dir.entries() {
            let path = archive.entry_path(entry).unwrap_or_default();
            let data = entry.write().data()?.to_vec();
            out.push((path, data));
        }
        for sub in dir.subdirs() {
            walk(archive, sub, out)?;
        }
        Ok(())
    }

    let mut out = Vec::new();
    walk(archive, archive.root(), &mut out)?;
    Ok(out)
}

#[test]
#[traced_test]
fn every_format_round_trips() -> Result<()> {
    for format in ArchiveFormat::ALL {
        info!(%format, "round trip");
        let archive = build(format)?;
        let first = archive.write_to_vec()?;
        assert_eq!(format.sniff(&first), Confidence::Certain, "{format}");
        assert_eq!(sniff::global().archive_format(&first), Some(format), "{format}");

        let reopened = Archive::from_bytes(first.clone())?;
        assert_eq!(reopened.format(), format);
        assert!(!reopened.is_modified(), "{format}");

        let expected = contents(&archive)?;
        let actual = contents(&reopened)?;
        assert_eq!(expected.len(), actual.len(), "{format}");
        for ((expected_path, expected_data), (actual_path, actual_data)) in
            expected.iter().zip(&actual)
        {
            if format != ArchiveFormat::Bzip2 {
                assert_eq!(expected_path, actual_path, "{format}");
            }
            assert_eq!(expected_data, actual_data, "{format} {expected_path}");
        }

        let second = reopened.write_to_vec()?;
        assert_eq!(first, second, "{format} save is not idempotent");
    }

    Ok(())
}

#[test]
fn directories_survive_in_hierarchical_formats() -> Result<()> {
    for format in [ArchiveFormat::Zip, ArchiveFormat::Tar, ArchiveFormat::Res] {
        let mut archive = build(format)?;
        archive.create_dir("empty/deeper")?;

        let reopened = Archive::from_bytes(archive.write_to_vec()?)?;
        assert!(reopened.dir_at_path("empty/deeper").is_some(), "{format}");
        assert!(reopened.entry_at_path("sub/nested.txt").is_some(), "{format}");
        assert!(reopened.root().is_consistent());
    }

    Ok(())
}

#[test]
fn reopened_entries_are_lazy_and_unmodified() -> Result<()> {
    let archive = build(ArchiveFormat::Pak)?;
    let reopened = Archive::from_bytes(archive.write_to_vec()?)?;

    let entry = reopened.entry("TILES.ART").expect("TILES.ART");
    assert_eq!(entry.read().state(), EntryState::Unmodified);
    assert!(!entry.read().is_loaded());
    assert_eq!(entry.read().size(), payload(1).len() as u64);
    assert_eq!(&*entry.write().data()?, payload(1).as_slice());
    assert!(entry.read().is_loaded());
    assert!(!reopened.is_modified());

    Ok(())
}

#[test]
fn truncated_input_is_an_error() -> Result<()> {
    for format in ArchiveFormat::ALL {
        let bytes = build(format)?.write_to_vec()?;
        let cut = &bytes[..bytes.len() / 2];

        let mut archive = Archive::new(format);
        assert!(archive.open(cut.to_vec()).is_err(), "{format}");
        assert_eq!(archive.num_entries(), 0, "{format}");
    }

    Ok(())
}

#[test]
fn unknown_data_is_rejected() {
    assert!(Archive::from_bytes(b"just some text".to_vec()).is_err());
    assert!(Archive::from_bytes(Vec::<u8>::new()).is_err());
}

#[test]
fn names_must_fit_the_format() -> Result<()> {
    let mut wad = Archive::new(ArchiveFormat::Wad);
    assert!(matches!(
        wad.add_new_entry("LONGNAME9", None, None),
        Err(Error::InvalidName(_))
    ));
    assert!(matches!(
        wad.add_entry_at_path("LONGNAME9", vec![1]),
        Err(Error::InvalidName(_))
    ));
    let things = wad.add_entry_at_path("THINGS", vec![1])?;
    assert!(matches!(
        wad.rename_entry(&things, "LONGNAME9"),
        Err(Error::InvalidName(_))
    ));
    assert_eq!(things.read().name(), "THINGS");

    let mut tree = ArchiveDir::root(true);
    tree.add_entry(Entry::with_data("LONGNAME9", vec![2]).into_ref(), None);
    assert!(wad.paste(&tree, None, None, MergePolicy::KeepBoth).is_err());
    assert_eq!(wad.num_entries(), 1);

    let mut pak = Archive::new(ArchiveFormat::Pak);
    let deep = format!("{}/file.txt", "d".repeat(50));
    assert!(matches!(
        pak.add_entry_at_path(&deep, vec![3]),
        Err(Error::InvalidName(_))
    ));
    pak.add_entry_at_path("short/file.txt", vec![3])?;

    // RES limits each path component rather than the whole path
    let mut res = Archive::new(ArchiveFormat::Res);
    res.add_entry_at_path(&format!("{}/FILE.TXT", "D".repeat(14)), vec![4])?;
    assert!(matches!(
        res.add_entry_at_path("sub/FIFTEEN_CHARS.X", vec![5]),
        Err(Error::InvalidName(_))
    ));
    let reopened = Archive::from_bytes(res.write_to_vec()?)?;
    assert!(reopened.entry_at_path("DDDDDDDDDDDDDD/FILE.TXT").is_some());

    Ok(())
}

#[test]
#[traced_test]
fn corrupt_compressed_entry_fails_on_access() -> Result<()> {
    let mut archive = Archive::new(ArchiveFormat::Zip);
    archive.add_entry_at_path("readme.txt", b"wadkit ".repeat(200))?;
    archive.add_entry_at_path("other.txt", b"fine".to_vec())?;
    let mut bytes = archive.write_to_vec()?;
    // the deflate stream of readme.txt follows the 30 byte local header and its name
    bytes[40..48].fill(0xFF);

    let reopened = Archive::from_bytes(bytes)?;
    let readme = reopened.entry_at_path("readme.txt").expect("readme.txt");
    assert!(!readme.read().is_loaded());
    assert!(readme.write().data().is_err());
    assert!(!readme.read().is_loaded());

    let other = reopened.entry_at_path("other.txt").expect("other.txt");
    assert_eq!(&*other.write().data()?, b"fine");

    Ok(())
}

#[test]
fn zip_checksums_are_verified() -> Result<()> {
    let mut archive = Archive::new(ArchiveFormat::Zip);
    archive.add_entry_at_path("readme.txt", b"wadkit ".repeat(200))?;
    let mut bytes = archive.write_to_vec()?;
    let central = bytes
        .windows(4)
        .position(|window| window == b"PK\x01\x02")
        .expect("central directory");
    // crc32 field of the first central record
    bytes[central + 16] ^= 0xFF;

    let reopened = Archive::from_bytes(bytes)?;
    let readme = reopened.entry_at_path("readme.txt").expect("readme.txt");
    assert!(matches!(
        readme.write().data(),
        Err(Error::MalformedInput(_))
    ));

    Ok(())
}

#[test]
fn bsp_level_data_survives_texture_edits() -> Result<()> {
    let mut level = build(ArchiveFormat::Bsp)?.write_to_vec()?;
    // point the entities lump at a block appended to the file
    let entities = b"{ \"classname\" \"worldspawn\" }\0";
    let offset = level.len() as u32;
    level[4..8].copy_from_slice(&offset.to_le_bytes());
    level[8..12].copy_from_slice(&(entities.len() as u32).to_le_bytes());
    level.extend_from_slice(entities);

    let mut archive = Archive::from_bytes(level)?;
    assert_eq!(archive.format(), ArchiveFormat::Bsp);
    let sky = archive.entry("sky4").expect("sky4");
    archive.remove_entry(&sky)?;
    let written = archive.write_to_vec()?;

    let lump_offset = u32::from_le_bytes([written[4], written[5], written[6], written[7]]);
    let lump_size = u32::from_le_bytes([written[8], written[9], written[10], written[11]]);
    assert_eq!(
        &written[lump_offset as usize..(lump_offset + lump_size) as usize],
        &entities[..]
    );
    assert_eq!(Archive::from_bytes(written)?.num_entries(), 2);

    Ok(())
}
