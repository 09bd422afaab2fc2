//! Tests for tile keys and wraparound normalization.

use tile_common::{parse_key, CanonicalKey, RawKey, TileCoord, TileError};

// ============================================================================
// Normalization tests
// ============================================================================

#[test]
fn test_normalize_negative_column() {
    let coord = TileCoord::new(3, -1, 5);
    assert_eq!(coord.normalize(), TileCoord::new(3, 7, 5));
}

#[test]
fn test_normalize_column_past_matrix() {
    let coord = TileCoord::new(3, 8, 0);
    assert_eq!(coord.normalize(), TileCoord::new(3, 0, 0));
}

#[test]
fn test_normalize_rows_wrap_too() {
    let coord = TileCoord::new(2, 1, -1);
    assert_eq!(coord.normalize(), TileCoord::new(2, 1, 3));
}

#[test]
fn test_copies_one_world_apart_collapse() {
    let base = TileCoord::new(4, 5, 9);
    for offset in [-3i64, -1, 1, 2, 7] {
        let wrapped = TileCoord::new(4, 5 + offset * 16, 9);
        assert_eq!(wrapped.canonical_key(), base.canonical_key());
        assert_ne!(wrapped.raw_key(), base.raw_key());
    }
}

// ============================================================================
// Key parsing tests
// ============================================================================

#[test]
fn test_parse_key_inverse_of_format() {
    let coord = TileCoord::new(2, -4, 1);
    let key = coord.raw_key().to_string();
    assert_eq!(key, "2:-4:1");
    assert_eq!(parse_key(&key).unwrap(), coord);
}

#[test]
fn test_parse_key_rejects_whitespace() {
    assert_eq!(
        parse_key(" 2:0:1"),
        Err(TileError::MalformedKey(" 2:0:1".to_string()))
    );
}

#[test]
fn test_parse_key_rejects_wrong_separator() {
    assert!(parse_key("2/0/1").is_err());
}

// ============================================================================
// Serde tests
// ============================================================================

#[test]
fn test_keys_serialize_as_strings() {
    let raw = TileCoord::new(2, -4, 1).raw_key();
    let canonical = raw.canonical();

    assert_eq!(serde_json::to_string(&raw).unwrap(), "\"2:-4:1\"");
    assert_eq!(serde_json::to_string(&canonical).unwrap(), "\"2:0:1\"");

    let back: RawKey = serde_json::from_str("\"2:-4:1\"").unwrap();
    assert_eq!(back, raw);
}

#[test]
fn test_canonical_key_deserialize_enforces_range() {
    let result: Result<CanonicalKey, _> = serde_json::from_str("\"2:-4:1\"");
    assert!(result.is_err());
}
