use pretty_assertions::assert_eq;
use tracing_test::traced_test;
use wadkit_archive::{
    error::Result,
    sniff::{self, FormatRegistry},
    Archive, ArchiveFormat, Confidence, MapFormat, SearchOptions,
};

fn wad_with(lumps: &[(&str, &[u8])]) -> Result<Archive> {
    let mut archive = Archive::new(ArchiveFormat::Wad);
    for (name, data) in lumps {
        archive.add_entry_at_path(name, data.to_vec())?;
    }
    Ok(archive)
}

#[test]
#[traced_test]
fn sprite_namespace() -> Result<()> {
    let names = ["A", "S_START", "SPR1", "SPR2", "S_END", "B"];
    let lumps: Vec<(&str, &[u8])> = names.iter().map(|name| (*name, &b"x"[..])).collect();
    let archive = Archive::from_bytes(wad_with(&lumps)?.write_to_vec()?)?;

    let namespaces: Vec<String> = (0..names.len())
        .map(|index| archive.detect_namespace_at(index))
        .collect();
    assert_eq!(
        namespaces,
        ["global", "global", "sprites", "sprites", "global", "global"]
    );

    let sprites = archive.find_all(&SearchOptions::builder().match_namespace("sprites").build())?;
    let found: Vec<String> = sprites
        .iter()
        .map(|entry| entry.read().name().to_owned())
        .collect();
    assert_eq!(found, ["SPR1", "SPR2"]);

    let last = archive.find_last(&SearchOptions::builder().match_name("SPR*").build())?;
    assert_eq!(last.map(|entry| entry.read().name().to_owned()).as_deref(), Some("SPR2"));

    Ok(())
}

#[test]
fn directory_namespaces() -> Result<()> {
    let mut archive = Archive::new(ArchiveFormat::Zip);
    let wall = archive.add_entry_at_path("textures/walls/BRICK.PNG", b"brick".to_vec())?;
    let readme = archive.add_entry_at_path("README.TXT", b"readme".to_vec())?;

    assert_eq!(archive.detect_namespace(&wall)?, "textures");
    assert_eq!(archive.detect_namespace(&readme)?, "global");

    let options = SearchOptions::builder()
        .match_namespace("textures")
        .search_subdirs(true)
        .build();
    assert_eq!(archive.find_all(&options)?.len(), 1);

    Ok(())
}

#[test]
#[traced_test]
fn classic_map() -> Result<()> {
    let lumps: Vec<(&str, &[u8])> = [
        "MAP01", "THINGS", "LINEDEFS", "SIDEDEFS", "VERTEXES", "SEGS", "SSECTORS", "NODES",
        "SECTORS", "REJECT", "BLOCKMAP",
    ]
    .into_iter()
    .map(|name| (name, &b"map data"[..]))
    .collect();
    let archive = Archive::from_bytes(wad_with(&lumps)?.write_to_vec()?)?;

    let maps = archive.detect_maps();
    assert_eq!(maps.len(), 1);
    assert_eq!(maps[0].name, "MAP01");
    assert_eq!(maps[0].format, MapFormat::Doom);
    assert_eq!(maps[0].end.read().name(), "BLOCKMAP");
    assert!(!maps[0].archive);

    Ok(())
}

#[test]
fn maps_in_directory_archives() -> Result<()> {
    let map = wad_with(&[
        ("MAP05", &b""[..]),
        ("TEXTMAP", &b"namespace = \"zdoom\";"[..]),
        ("ENDMAP", &b""[..]),
    ])?;
    let mut archive = Archive::new(ArchiveFormat::Zip);
    archive.add_entry_at_path("maps/MAP05.wad", map.write_to_vec()?)?;
    archive.add_entry_at_path("maps/broken.wad", b"not a wad".to_vec())?;

    let maps = archive.detect_maps();
    let found: Vec<(String, MapFormat)> = maps
        .iter()
        .map(|map| (map.name.clone(), map.format))
        .collect();
    assert_eq!(
        found,
        [
            ("MAP05".to_owned(), MapFormat::Udmf),
            ("broken".to_owned(), MapFormat::Unknown)
        ]
    );

    Ok(())
}

#[rustfmt::skip]
const PNG: [u8; 33] = [
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89,
];

#[test]
#[traced_test]
fn entry_types_are_detected_on_open() -> Result<()> {
    let nested = wad_with(&[("PLAYPAL", &[0u8; 16][..])])?.write_to_vec()?;
    let mut archive = Archive::new(ArchiveFormat::Pak);
    archive.add_entry_at_path("graphics/TITLE.PNG", PNG.to_vec())?;
    archive.add_entry_at_path("DECORATE.TXT", b"actor Imp2 : DoomImp {}".to_vec())?;
    archive.add_entry_at_path("MARKER", Vec::new())?;
    archive.add_entry_at_path("maps/E1M1.WAD", nested)?;

    let reopened = Archive::from_bytes(archive.write_to_vec()?)?;
    let kind = |path: &str| {
        reopened
            .entry_at_path(path)
            .map(|entry| entry.read().kind().to_owned())
    };
    assert_eq!(kind("graphics/title.png").as_deref(), Some("png"));
    assert_eq!(kind("decorate.txt").as_deref(), Some("text"));
    assert_eq!(kind("marker").as_deref(), Some("marker"));
    assert_eq!(kind("maps/e1m1.wad").as_deref(), Some("wad"));

    let wads = reopened.find_all(
        &SearchOptions::builder()
            .match_type("wad")
            .search_subdirs(true)
            .build(),
    )?;
    assert_eq!(wads.len(), 1);

    Ok(())
}

#[test]
fn sniffing_precedence() -> Result<()> {
    let registry = FormatRegistry::builtin();

    let wad = wad_with(&[("A", &b"a"[..]), ("B", &b"b"[..])])?.write_to_vec()?;
    assert_eq!(registry.classify(&wad), Some(("wad", Confidence::Certain)));
    assert_eq!(ArchiveFormat::WadJ.sniff(&wad), Confidence::None);

    let mut zip = Archive::new(ArchiveFormat::Zip);
    zip.add_entry_at_path("a.txt", b"a".to_vec())?;
    let zip = zip.write_to_vec()?;
    assert_eq!(registry.archive_format(&zip), Some(ArchiveFormat::Zip));

    assert_eq!(registry.archive_format(b"plain text"), None);
    assert_eq!(registry.classify(b"plain text"), Some(("text", Confidence::Unlikely)));

    Ok(())
}

#[test]
#[traced_test]
fn registry_lifecycle() -> Result<()> {
    let mut registry = FormatRegistry::builtin();
    let json = r#"[{"id": "wad", "name": "Where's All the Data", "extensions": ["wad"]}]"#;
    assert_eq!(registry.load_descriptors_json(json.as_bytes())?, 1);

    sniff::init(registry);
    assert_eq!(
        sniff::global().descriptor("wad").map(|d| d.name.clone()).as_deref(),
        Some("Where's All the Data")
    );

    let dropped = sniff::teardown();
    assert!(dropped.is_some());
    assert_ne!(
        sniff::global().descriptor("wad").map(|d| d.name.clone()).as_deref(),
        Some("Where's All the Data")
    );
    assert!(sniff::teardown().is_none());

    Ok(())
}
