//! End-to-end tests of a datastore connection over on-disk fjall stores

use fingerdb::testing::{check_all_invariants, default_invariants};
use fingerdb::{
    BlockHeader, Connection, DataStore, DatastoreConfig, DatastoreInfo, FingerdbError, ListId,
    MatchType, OpMode,
};
use tempfile::TempDir;

fn create_test_config(dir: &TempDir) -> DatastoreConfig {
    DatastoreConfig::new(dir.path())
        .with_block_capacity(64)
        .with_cache_limit(1024)
}

fn index_chunk(conn: &mut Connection, list_id: ListId, data: &[u8]) -> (u32, u32) {
    let lh = conn.on_indexer_list_header(list_id).unwrap();
    let bh = match lh.last_block() {
        Some(last) => conn.on_indexer_block_header(list_id, last).unwrap(),
        None => BlockHeader::default(),
    };
    let (_, bh) = conn.on_indexer_chunk(list_id, &lh, &bh, data).unwrap();
    (bh.block_id, bh.body_size)
}

fn posting(list_id: ListId, n: u32) -> Vec<u8> {
    let mut chunk = Vec::with_capacity(8);
    chunk.extend_from_slice(&list_id.to_le_bytes());
    chunk.extend_from_slice(&n.to_le_bytes());
    chunk
}

#[test]
fn test_build_then_search() {
    let temp_dir = TempDir::new().unwrap();
    let mut conn = Connection::with_fjall(create_test_config(&temp_dir)).unwrap();

    conn.open(OpMode::Build, true, true, true).unwrap();
    conn.on_indexer_start().unwrap();
    for fid in 1..=20u32 {
        for list_id in [fid % 3, 10 + fid % 5] {
            index_chunk(&mut conn, list_id, &posting(list_id, fid));
        }
        conn.on_indexer_fingerprint(fid, &vec![fid as u8; 100]).unwrap();
        conn.put_metadata(fid, &format!("track {}", fid)).unwrap();
    }
    conn.put_info(&DatastoreInfo::new(MatchType::Xscale)).unwrap();
    conn.on_indexer_end().unwrap();
    conn.close().unwrap();

    conn.open(OpMode::Get, true, true, true).unwrap();
    assert!(!conn.is_empty().unwrap());
    assert_eq!(conn.get_fingerprints_count().unwrap(), 20);
    assert_eq!(conn.get_fingerprint(7, 50, 25).unwrap(), vec![7u8; 50]);
    assert_eq!(conn.get_metadata(7).unwrap(), "track 7");
    assert_eq!(conn.get_info().unwrap().match_type, MatchType::Xscale);

    // fid % 3 == 1 for 7 of the 20 fingerprints: 56 bytes fit one 64-byte block
    let lh = conn.main_index().get_list_header(1).unwrap();
    assert_eq!(lh.record_count, 7);
    assert_eq!(lh.block_count, 1);
    assert_eq!(conn.get_plist_block(1, 0, false).unwrap().len(), 56);

    let violations = check_all_invariants(conn.main_index(), &default_invariants());
    assert!(violations.is_empty(), "{:?}", violations);
}

#[test]
fn test_fingerprint_partial_reads() {
    let temp_dir = TempDir::new().unwrap();
    let mut conn = Connection::with_fjall(create_test_config(&temp_dir)).unwrap();
    conn.open(OpMode::Build, true, false, false).unwrap();

    let data: Vec<u8> = (0..100u8).collect();
    conn.put_fingerprint(1, &data).unwrap();

    assert_eq!(conn.get_fingerprint_size(1).unwrap(), 100);
    assert_eq!(conn.get_fingerprint(1, 50, 25).unwrap(), data[25..75].to_vec());
    assert_eq!(conn.get_fingerprint(1, 0, 0).unwrap(), data);
    assert!(matches!(
        conn.get_fingerprint(1, 50, 60),
        Err(FingerdbError::Range(_))
    ));
    assert_eq!(conn.get_fingerprint_size(2).unwrap(), 0);
    assert!(conn.get_fingerprint(2, 0, 0).unwrap().is_empty());
}

#[test]
fn test_read_mode_rejects_writes() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&temp_dir);

    let mut conn = Connection::with_fjall(config.clone()).unwrap();
    assert!(conn.open(OpMode::Get, false, false, false).unwrap_err().is_io());

    conn.open(OpMode::Build, true, false, false).unwrap();
    conn.close().unwrap();

    conn.open(OpMode::Get, true, false, false).unwrap();
    assert!(matches!(
        conn.put_fingerprint(1, b"x"),
        Err(FingerdbError::State(_))
    ));
    assert!(matches!(conn.clear(), Err(FingerdbError::State(_))));
}

#[test]
fn test_clear_and_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let mut conn = Connection::with_fjall(create_test_config(&temp_dir)).unwrap();
    conn.open(OpMode::Build, true, true, false).unwrap();
    index_chunk(&mut conn, 1, b"posting");
    conn.put_fingerprint(1, b"fp").unwrap();
    conn.main_index_mut().flush_block_cache().unwrap();

    conn.clear().unwrap();
    assert_eq!(conn.main_index().record_count().unwrap(), 0);
    assert!(conn.is_empty().unwrap());

    conn.close().unwrap();
    conn.open(OpMode::Build, true, true, false).unwrap();
    assert!(conn.is_empty().unwrap());
}

#[test]
fn test_blocks_survive_drop() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&temp_dir);
    let mut expected = Vec::new();
    {
        let mut conn = Connection::with_fjall(config.clone()).unwrap();
        conn.open(OpMode::Build, false, false, false).unwrap();
        for n in 0..30u32 {
            index_chunk(&mut conn, 4, &posting(4, n));
            expected.extend_from_slice(&posting(4, n));
        }
    }

    let mut conn = Connection::with_fjall(config).unwrap();
    conn.open(OpMode::Get, false, false, false).unwrap();
    let lh = conn.main_index().verify_list(4).unwrap();
    assert_eq!(lh.record_count, 30);

    let mut bodies = Vec::new();
    for block_id in 0..lh.block_count {
        bodies.extend(conn.get_plist_block(4, block_id, false).unwrap());
    }
    assert_eq!(bodies, expected);
}
