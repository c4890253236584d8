//! End-to-end duplicate detection over real files.

use std::path::Path;

use mediadup_core::grouping::{self, GroupKey};
use mediadup_core::media::{MediaAttributes, MediaRecord};
use mediadup_core::pipeline::{ImageDecoder, RasterDecoder};
use mediadup_core::{Config, Library, MetadataStore, StoreLayout};
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

const MIB: usize = 1024 * 1024;

fn library(dir: &TempDir) -> Library {
    let mut config = Config::default();
    config.general.root_dir = dir.path().to_path_buf();
    config.general.db_file = dir.path().join("mediadup.db");
    config.general.signature_cache_dir = dir.path().join("frames");
    Library::open(config).unwrap()
}

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    path.to_string_lossy().into_owned()
}

fn sorted_paths(group: &mediadup_core::DuplicateGroup) -> Vec<String> {
    let mut paths: Vec<String> = group.paths().map(str::to_string).collect();
    paths.sort();
    paths
}

#[tokio::test]
async fn identical_ten_mib_files_group_by_quick_and_full_hash() {
    let dir = TempDir::new().unwrap();
    let mut lib = library(&dir);
    let content = random_bytes(1, 10 * MIB);
    let a = write(&dir, "a.bin", &content);
    let b = write(&dir, "copy/of/a.bin", &{
        std::fs::create_dir_all(dir.path().join("copy/of")).unwrap();
        content.clone()
    });
    let other = write(&dir, "other.bin", &random_bytes(2, 10 * MIB));

    lib.detect_and_add(&[a.clone(), b.clone(), other], None)
        .await
        .unwrap();

    let store = lib.store();
    let qa = store.get(&a).unwrap().unwrap();
    let qb = store.get(&b).unwrap().unwrap();
    assert_eq!(qa.quick_hash, qb.quick_hash);
    assert!(qa.full_hash.is_none(), "large files are not fully hashed on ingest");

    let by_quick = grouping::group(store, GroupKey::QuickHash, None).unwrap();
    assert_eq!(by_quick.len(), 1);
    assert_eq!(sorted_paths(&by_quick[0]), vec![a.clone(), b.clone()]);

    lib.compute_full_hashes(None, None).await.unwrap();
    let by_full = grouping::group(lib.store(), GroupKey::FullHash, Some(&by_quick)).unwrap();
    assert_eq!(by_full.len(), 1);
    assert_eq!(sorted_paths(&by_full[0]), vec![a, b]);
}

#[tokio::test]
async fn known_difference_breaks_up_quick_hash_group() {
    let dir = TempDir::new().unwrap();
    let mut lib = library(&dir);
    let content = random_bytes(3, 4096);
    let first = write(&dir, "one.bin", &content);
    let second = write(&dir, "two.bin", &content);
    lib.detect_and_add(&[first.clone(), second.clone()], None)
        .await
        .unwrap();

    assert_eq!(lib.find_duplicates(&[GroupKey::QuickHash]).unwrap().len(), 1);

    lib.mark_different(&first, &second).unwrap();
    assert!(lib.find_duplicates(&[GroupKey::QuickHash]).unwrap().is_empty());
    assert!(lib.find_duplicates(&GroupKey::FUNNEL).unwrap().is_empty());

    // A third copy still pairs up with one of them.
    let third = write(&dir, "three.bin", &content);
    lib.detect_and_add(&[third.clone()], None).await.unwrap();
    let groups = lib.find_duplicates(&[GroupKey::QuickHash]).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].len(), 2);
    assert!(groups[0].paths().any(|p| p == third));
}

#[tokio::test]
async fn grouping_twice_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut lib = library(&dir);
    let mut listing = Vec::new();
    for i in 0..12u64 {
        listing.push(write(&dir, &format!("f{i}.bin"), &random_bytes(i % 4, 2048)));
    }
    lib.detect_and_add(&listing, None).await.unwrap();

    let store = lib.store();
    let once = grouping::group(store, GroupKey::QuickHash, None).unwrap();
    let twice = grouping::group(store, GroupKey::QuickHash, Some(&once)).unwrap();
    assert_eq!(once.len(), 4);
    assert_eq!(once, twice);
}

#[tokio::test]
async fn removed_record_is_gone() {
    let dir = TempDir::new().unwrap();
    let mut lib = library(&dir);
    let keep = write(&dir, "keep.jpg", b"keep");
    let drop = write(&dir, "drop.jpg", b"drop");
    lib.detect_and_add(&[keep.clone(), drop.clone()], None)
        .await
        .unwrap();

    std::fs::remove_file(&drop).unwrap();
    assert_eq!(lib.cleanup(&[keep.clone()]).unwrap(), 1);
    assert!(lib.store().get(&drop).unwrap().is_none());
    assert!(lib.store().get(&keep).unwrap().is_some());
    assert!(lib.check_integrity().unwrap().is_clean());
}

#[tokio::test]
async fn image_signature_pass_over_real_png() {
    let dir = TempDir::new().unwrap();
    let mut lib = library(&dir);
    let gray = dir.path().join("gray.png");
    image::RgbImage::from_pixel(33, 21, image::Rgb([128, 128, 128]))
        .save(&gray)
        .unwrap();
    let broken = write(&dir, "broken.png", b"not an image");
    let gray = gray.to_string_lossy().into_owned();

    lib.detect_and_add(&[gray.clone(), broken.clone()], None)
        .await
        .unwrap();
    assert_eq!(
        lib.store().paths_missing_image_signature().unwrap().len(),
        2
    );

    let report = lib.compute_image_signatures(None, None).await.unwrap();
    assert_eq!(report.committed, 2);
    assert!(lib.store().paths_missing_image_signature().unwrap().is_empty());

    let MediaAttributes::Image(attrs) = lib.store().get(&gray).unwrap().unwrap().attributes else {
        panic!("expected image attributes");
    };
    assert_eq!((attrs.height, attrs.width), (21, 33));
    assert!(attrs
        .signature
        .unwrap()
        .values()
        .iter()
        .all(|&v| v == 32768));

    let MediaAttributes::Image(attrs) = lib.store().get(&broken).unwrap().unwrap().attributes
    else {
        panic!("expected image attributes");
    };
    assert_eq!((attrs.height, attrs.width), (0, 0));
    assert!(attrs.signature.unwrap().is_all_zero());
}

#[test]
fn reencoded_image_keeps_its_signature() {
    let dir = TempDir::new().unwrap();
    let mut rng = rand::rngs::StdRng::seed_from_u64(9);
    let img = image::RgbImage::from_fn(64, 48, |_, _| image::Rgb([rng.gen(), rng.gen(), rng.gen()]));
    let png = dir.path().join("a.png");
    let bmp = dir.path().join("a.bmp");
    img.save(&png).unwrap();
    img.save(&bmp).unwrap();

    let fingerprinter = mediadup_core::media::ImageFingerprinter::new(3, 3);
    let sig = |path: &Path| {
        fingerprinter
            .fingerprint(&RasterDecoder.decode(path).unwrap())
            .signature
            .unwrap()
    };
    assert_eq!(sig(&png), sig(&bmp));
}

#[test]
fn store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("store.db");
    let mut record = MediaRecord::non_media("/x/y.txt");
    record.size = Some(3);
    record.quick_hash = Some(mediadup_core::Digest([4; 16]));

    {
        let mut store = MetadataStore::open(&db, StoreLayout::default(), None).unwrap();
        store.upsert(&record).unwrap();
    }
    let store = MetadataStore::open(&db, StoreLayout::default(), None).unwrap();
    assert_eq!(store.get("/x/y.txt").unwrap(), Some(record));
}
