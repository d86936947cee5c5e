use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use xenofetch::config::{ConfigLoader, DEFAULT_BASE_URL};
use xenofetch::error::XenoError;

#[test]
fn resolve_reads_overrides_from_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("xenofetch.json");
    std::fs::write(
        &path,
        r#"{
            "api_key": "abc123",
            "request_delay_ms": 2000,
            "per_page": 200,
            "country": "",
            "cache_dir": "my_cache"
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(resolved.api_key, "abc123");
    assert_eq!(resolved.base_url, DEFAULT_BASE_URL);
    assert_eq!(resolved.request_delay.as_millis(), 2000);
    assert_eq!(resolved.per_page, 200);
    assert_eq!(resolved.country, None);
    assert_eq!(resolved.cache_dir, Utf8PathBuf::from("my_cache"));
}

#[test]
fn explicit_missing_path_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, XenoError::ConfigRead(_));
}

#[test]
fn malformed_json_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("xenofetch.json");
    std::fs::write(&path, "{not json").unwrap();
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, XenoError::ConfigParse(_));
}
