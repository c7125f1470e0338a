use std::io::Cursor;

use maple_wz::{
    error::Error,
    property::Payload,
    sound::{Sound, WaveFormat, WAVE_FORMAT_PCM},
    tree::{ImageState, Node},
    Bitmap, MapleVersion, NodeId, OpenOptions, Pixels, Point, PropertyValue, SaveOptions, WzArchive,
};
use miette::{IntoDiagnostic, Result};
use pretty_assertions::assert_eq;
use tracing_test::traced_test;

type MemoryArchive = WzArchive<Cursor<Vec<u8>>>;

fn pixels() -> Pixels {
    #[rustfmt::skip]
    let data = vec![
        0xFF, 0x00, 0x00, 0xFF,   0x00, 0xFF, 0x00, 0xFF,
        0x00, 0x00, 0xFF, 0x80,   0x10, 0x20, 0x30, 0x00,
    ];
    Pixels { width: 2, height: 2, data }
}

fn wave() -> WaveFormat {
    WaveFormat {
        format_tag: WAVE_FORMAT_PCM,
        channels: 2,
        sample_rate: 44100,
        average_bytes_per_second: 176400,
        block_align: 4,
        bits_per_sample: 16,
        extra_size: 0,
    }
}

fn options(maple_version: MapleVersion) -> OpenOptions {
    OpenOptions::builder().maple_version(maple_version).build()
}

fn required(id: Option<NodeId>) -> Result<NodeId> {
    Ok(id.ok_or(Error::InvalidNode)?)
}

/// Item.wz with a potion image, an etc image linking into it and an empty directory
fn build(maple_version: MapleVersion) -> Result<MemoryArchive> {
    let mut wz = WzArchive::create("Item.wz", options(maple_version));
    let root = wz.root();
    let consume = wz.add_directory(root, "Consume")?;
    wz.add_directory(root, "Empty")?;

    let potion = wz.add_image(consume, "0200.img")?;
    let info = wz.add_property(potion, "info", PropertyValue::SubProperty)?;
    wz.add_property(info, "price", PropertyValue::Short(50))?;
    wz.add_property(info, "name", PropertyValue::String("Red Potion".into()))?;
    wz.add_property(info, "weight", PropertyValue::Double(0.25))?;
    wz.add_property(potion, "origin", PropertyValue::Vector(Point::new(-4, 12)))?;
    wz.add_property(potion, "alias", PropertyValue::Uol("info/price".into()))?;

    let icon = wz.add_property(potion, "icon", PropertyValue::Null)?;
    wz.set_value(icon, PropertyValue::Canvas(Bitmap::encode(&Pixels::new(1, 1), None)?))?;
    wz.set_bitmap(icon, &pixels(), true)?;
    let raw = wz.add_property(potion, "iconRaw", PropertyValue::Canvas(Bitmap::encode(&Pixels::new(1, 1), None)?))?;
    wz.add_property(raw, "_inlink", PropertyValue::String("icon".into()))?;

    let etc = wz.add_image(consume, "0201.img")?;
    wz.add_property(etc, "price", PropertyValue::Uol("../0200.img/info/price".into()))?;
    wz.add_property(
        etc,
        "use",
        PropertyValue::Sound(Sound::new(vec![1, 2, 3, 4, 5, 6, 7, 8], 1200, wave())?),
    )?;
    wz.add_property(etc, "blob", PropertyValue::RawData(Payload::Loaded(vec![9; 40])))?;
    Ok(wz)
}

fn save(wz: &mut MemoryArchive) -> Result<Vec<u8>> {
    Ok(wz
        .write_to(Cursor::new(Vec::new()), &SaveOptions::default())?
        .into_inner())
}

fn reopen(bytes: Vec<u8>, maple_version: MapleVersion) -> Result<MemoryArchive> {
    Ok(WzArchive::new(Cursor::new(bytes), "Item.wz", options(maple_version))?)
}

#[traced_test]
#[test]
fn saved_tree_reopens_with_equal_values() -> Result<()> {
    let mut wz = build(MapleVersion::Gms)?;
    let mut reopened = reopen(save(&mut wz)?, MapleVersion::Gms)?;

    assert_eq!(reopened.version(), 83);
    assert_eq!(reopened.name(), "Item.wz");

    let root = reopened.root();
    let names: Vec<String> = reopened
        .children(root)?
        .into_iter()
        .filter_map(|id| reopened.node(id).map(|node| node.name().to_owned()))
        .collect();
    assert_eq!(names, vec!["Consume", "Empty"]);

    let price = required(reopened.get("Consume/0200.img/info/price")?)?;
    assert_eq!(reopened.value(price), Some(&PropertyValue::Short(50)));
    assert_eq!(reopened.as_int(price, 0), 50);
    assert_eq!(reopened.as_string(price, ""), "50");

    let name = required(reopened.get("Item.wz/consume/0200/info/name")?)?;
    assert_eq!(reopened.as_string(name, ""), "Red Potion");
    assert_eq!(reopened.as_int(name, -1), -1);

    let weight = required(reopened.get("Consume/0200.img/info/weight")?)?;
    assert_eq!(reopened.as_double(weight, 0.0), 0.25);

    let origin = required(reopened.get("Consume/0200.img/origin")?)?;
    assert_eq!(reopened.as_point(origin, Point::default()), Point::new(-4, 12));

    let alias = required(reopened.get("Consume/0200.img/alias")?)?;
    assert_eq!(reopened.as_node(alias), Some(price));
    assert_eq!(reopened.as_short(alias, 0), 50);

    let icon = required(reopened.get("Consume/0200.img/icon")?)?;
    assert_eq!(reopened.as_bitmap(icon, Pixels::new(0, 0)), pixels());
    let raw = required(reopened.get("Consume/0200.img/iconRaw")?)?;
    assert_eq!(reopened.as_bitmap(raw, Pixels::new(0, 0)), pixels());

    let sound = required(reopened.get("Consume/0201.img/use")?)?;
    match reopened.value(sound) {
        Some(PropertyValue::Sound(sound)) => {
            assert_eq!(sound.duration_ms, 1200);
            assert_eq!(sound.format(), Some(wave()));
            assert_eq!(sound.extension(), "wav");
        }
        other => panic!("expected a sound, found {other:?}"),
    }
    assert_eq!(reopened.as_bytes(sound, Vec::new()), vec![1, 2, 3, 4, 5, 6, 7, 8]);

    let blob = required(reopened.get("Consume/0201.img/blob")?)?;
    assert_eq!(reopened.as_bytes(blob, Vec::new()), vec![9; 40]);
    assert_eq!(reopened.as_bytes(price, vec![1]), vec![1]);

    assert_eq!(reopened.get("Consume/missing.img")?, None);
    assert_eq!(reopened.get("Item.wz")?, Some(root));
    Ok(())
}

#[test]
fn zero_key_archives_round_trip() -> Result<()> {
    let mut wz = build(MapleVersion::Bms)?;
    let mut reopened = reopen(save(&mut wz)?, MapleVersion::Bms)?;

    let name = required(reopened.get("Consume/0200.img/info/name")?)?;
    assert_eq!(reopened.as_string(name, ""), "Red Potion");
    let icon = required(reopened.get("Consume/0200.img/icon")?)?;
    assert_eq!(reopened.as_bitmap(icon, Pixels::new(0, 0)), pixels());
    Ok(())
}

#[test]
fn saving_twice_is_stable() -> Result<()> {
    let mut wz = build(MapleVersion::Gms)?;
    let first = save(&mut wz)?;
    let mut reopened = reopen(first.clone(), MapleVersion::Gms)?;
    let second = save(&mut reopened)?;

    assert_eq!(first, second);

    let image = required(reopened.get("Consume/0200.img")?)?;
    let state = reopened.node(image).and_then(Node::as_image).map(|i| i.state());
    assert_eq!(state, Some(ImageState::Unparsed));
    Ok(())
}

#[test]
fn version_is_found_for_a_later_client() -> Result<()> {
    let mut wz = build(MapleVersion::Gms)?;
    let bytes = wz
        .write_to(
            Cursor::new(Vec::new()),
            &SaveOptions::builder().game_version(176).build(),
        )?
        .into_inner();

    let mut reopened = reopen(bytes.clone(), MapleVersion::Gms)?;
    assert_eq!(reopened.version(), 176);
    let price = required(reopened.get("Consume/0200.img/info/price")?)?;
    assert_eq!(reopened.as_int(price, 0), 50);

    let known = WzArchive::new(
        Cursor::new(bytes),
        "Item.wz",
        OpenOptions::builder().game_version(176).build(),
    )?;
    assert_eq!(known.hash(), reopened.hash());
    Ok(())
}

#[test]
fn colliding_digests_resolve_to_the_saved_version() -> Result<()> {
    // 16 shares the digest of 95 and is tried first
    let mut wz = build(MapleVersion::Gms)?;
    let bytes = wz
        .write_to(
            Cursor::new(Vec::new()),
            &SaveOptions::builder().game_version(95).build(),
        )?
        .into_inner();
    assert_eq!(u16::from_le_bytes([bytes[60], bytes[61]]), 142);

    let mut reopened = reopen(bytes, MapleVersion::Gms)?;
    assert_eq!(reopened.version(), 95);
    let name = required(reopened.get("Consume/0200.img/info/name")?)?;
    assert_eq!(reopened.as_string(name, ""), "Red Potion");
    Ok(())
}

#[traced_test]
#[test]
fn partial_dispose_reparses_linked_images() -> Result<()> {
    let mut wz = build(MapleVersion::Gms)?;
    let mut reopened = reopen(save(&mut wz)?, MapleVersion::Gms)?;

    let potion = required(reopened.get("Consume/0200.img")?)?;
    let etc = required(reopened.get("Consume/0201.img")?)?;
    let link = required(reopened.get("Consume/0201.img/price")?)?;
    assert_eq!(reopened.as_int(link, 0), 50);

    let references: Vec<NodeId> = reopened
        .node(etc)
        .and_then(Node::as_image)
        .map(|image| image.references().collect())
        .unwrap_or_default();
    assert_eq!(references, vec![potion]);

    reopened.partial_dispose(etc)?;
    let state = |wz: &MemoryArchive, id| wz.node(id).and_then(Node::as_image).map(|i| i.state());
    assert_eq!(state(&reopened, etc), Some(ImageState::PartiallyDisposed));
    assert_eq!(state(&reopened, potion), Some(ImageState::PartiallyDisposed));
    assert!(reopened.node(link).is_none());

    let link = required(reopened.get("Consume/0201.img/price")?)?;
    assert_eq!(reopened.as_int(link, 0), 50);
    assert_eq!(state(&reopened, etc), Some(ImageState::Parsed));
    assert_eq!(state(&reopened, potion), Some(ImageState::Parsed));
    Ok(())
}

#[test]
fn vector_coordinates_resolve_by_path() -> Result<()> {
    let mut wz = build(MapleVersion::Gms)?;
    let etc = required(wz.get("Consume/0201.img")?)?;
    wz.add_property(etc, "originY", PropertyValue::Uol("../0200.img/origin/Y".into()))?;
    let bytes = save(&mut wz)?;
    let mut reopened = reopen(bytes.clone(), MapleVersion::Gms)?;

    let x = required(reopened.get("Consume/0200.img/origin/x")?)?;
    assert_eq!(reopened.full_path(x).as_deref(), Some("Item.wz/Consume/0200.img/origin/X"));
    assert_eq!(reopened.as_int(x, 0), -4);
    let link = required(reopened.get("Consume/0201.img/originY")?)?;
    assert_eq!(reopened.as_int(link, 0), 12);
    assert_eq!(reopened.get("Consume/0200.img/origin/Z")?, None);

    reopened.set_value(x, PropertyValue::Int(30))?;
    let origin = required(reopened.get("Consume/0200.img/origin")?)?;
    assert_eq!(reopened.as_point(origin, Point::default()), Point::new(30, 12));
    assert!(reopened.rename_node(x, "W").is_err());

    // coordinates are not written as children of the vector
    let resaved = save(&mut reopened)?;
    assert_eq!(resaved.len(), bytes.len());
    let mut again = reopen(resaved, MapleVersion::Gms)?;
    let origin = required(again.get("Consume/0200.img/origin")?)?;
    assert_eq!(again.as_point(origin, Point::default()), Point::new(30, 12));
    Ok(())
}

#[test]
fn disposed_images_cannot_be_read() -> Result<()> {
    let mut wz = build(MapleVersion::Gms)?;
    let mut reopened = reopen(save(&mut wz)?, MapleVersion::Gms)?;

    let etc = required(reopened.get("Consume/0201.img")?)?;
    reopened.dispose(etc)?;

    assert!(matches!(reopened.children(etc), Err(Error::ImageDisposed(_))));
    assert!(matches!(reopened.get("Consume/0201.img/use"), Err(Error::ImageDisposed(_))));
    Ok(())
}

#[test]
fn broken_links_fall_back_to_defaults() -> Result<()> {
    let mut wz = build(MapleVersion::Gms)?;
    let image = required(wz.get("Consume/0201.img")?)?;
    let broken = wz.add_property(image, "broken", PropertyValue::Uol("../nowhere.img/x".into()))?;
    let looped = wz.add_property(image, "looped", PropertyValue::Uol("looped".into()))?;

    assert_eq!(wz.as_node(broken), None);
    assert_eq!(wz.as_int(broken, 3), 3);
    assert_eq!(wz.as_node(looped), None);
    assert_eq!(wz.as_string(looped, "none"), "none");
    Ok(())
}

#[test]
fn searches_match_full_paths() -> Result<()> {
    let mut wz = build(MapleVersion::Gms)?;
    let mut reopened = reopen(save(&mut wz)?, MapleVersion::Gms)?;

    let images = reopened.find_wildcard("Item.wz/Consume/*.img")?;
    let paths: Vec<String> = images.iter().filter_map(|&id| reopened.full_path(id)).collect();
    assert_eq!(paths, vec!["Item.wz/Consume/0200.img", "Item.wz/Consume/0201.img"]);

    let prices = reopened.find_regex(r"/price$")?;
    let paths: Vec<String> = prices.iter().filter_map(|&id| reopened.full_path(id)).collect();
    assert_eq!(
        paths,
        vec!["Item.wz/Consume/0200.img/info/price", "Item.wz/Consume/0201.img/price"]
    );

    assert_eq!(reopened.find_wildcard("Item.wz")?, vec![reopened.root()]);
    assert!(matches!(reopened.find_regex("("), Err(Error::InvalidPattern(_))));
    Ok(())
}

#[test]
fn edits_are_checked() -> Result<()> {
    let mut wz = build(MapleVersion::Gms)?;
    let root = wz.root();
    let consume = required(wz.get("Consume")?)?;
    let price = required(wz.get("Consume/0200.img/info/price")?)?;

    assert!(matches!(wz.add_directory(root, "Consume"), Err(Error::DuplicateName(_))));
    assert!(matches!(wz.add_image(consume, "bad:name.img"), Err(Error::InvalidNodeName(_))));
    assert!(matches!(wz.add_property(consume, "x", PropertyValue::Int(1)), Err(Error::InvalidNode)));
    assert!(matches!(wz.add_property(price, "x", PropertyValue::Int(1)), Err(Error::InvalidNode)));
    assert!(matches!(wz.remove_node(root), Err(Error::InvalidNode)));

    wz.rename_node(price, "cost")?;
    assert_eq!(wz.get("Consume/0200.img/info/price")?, None);
    assert_eq!(wz.get("Consume/0200.img/info/cost")?, Some(price));

    wz.set_value(price, PropertyValue::Int(75))?;
    assert_eq!(wz.as_long(price, 0), 75);

    let potion = required(wz.get("Consume/0200.img")?)?;
    wz.remove_node(potion)?;
    assert!(wz.node(price).is_none());
    assert_eq!(wz.get("Consume/0200.img")?, None);
    Ok(())
}

#[test]
fn atomic_save_keeps_the_old_file_on_failure() -> Result<()> {
    let dir = tempfile::tempdir().into_diagnostic()?;
    let path = dir.path().join("Item.wz");

    let mut wz = build(MapleVersion::Gms)?;
    wz.save(&path, &SaveOptions::default())?;

    let mut opened = WzArchive::open(&path, options(MapleVersion::Gms))?;
    let price = required(opened.get("Consume/0200.img/info/price")?)?;
    assert_eq!(opened.as_int(price, 0), 50);
    drop(opened);

    let saved = std::fs::read(&path).into_diagnostic()?;
    let mut reopened = reopen(saved.clone(), MapleVersion::Gms)?;
    let etc = required(reopened.get("Consume/0201.img")?)?;
    reopened.dispose(etc)?;
    assert!(reopened.save(&path, &SaveOptions::default()).is_err());

    assert_eq!(std::fs::read(&path).into_diagnostic()?, saved);
    let leftovers = std::fs::read_dir(dir.path()).into_diagnostic()?.count();
    assert_eq!(leftovers, 1);
    Ok(())
}
