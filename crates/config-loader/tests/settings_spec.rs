use config_loader::{find_up, locate, Settings, SettingsError, SETTINGS_ENV};
use serial_test::serial;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_settings(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn given_settings_written_by_the_original_tool_when_loaded_then_fields_map() {
    let temp = TempDir::new().unwrap();
    let path = write_settings(
        &temp,
        ".m2envrc",
        r#"{
            "magento": "2.3.1",
            "php": "7.1",
            "username": "public-key",
            "password": "private-key",
            "servername": "shop.test",
            "packages": null
        }"#,
    );

    let settings = Settings::load(&path).unwrap();
    assert_eq!(settings.magento.as_deref(), Some("2.3.1"));
    assert_eq!(settings.server_name.as_deref(), Some("shop.test"));
    assert_eq!(settings.packages, None);

    let params = settings.to_build_parameters().unwrap();
    assert_eq!(params.magento(), "2.3.1");
    assert_eq!(params.server_name, "shop.test");
    assert_eq!(params.username.as_deref(), Some("public-key"));
}

#[test]
fn given_invalid_locale_when_loaded_then_validation_names_the_field() {
    let temp = TempDir::new().unwrap();
    let path = write_settings(
        &temp,
        ".m2envrc",
        r#"{"magento": "2.3", "language": "english"}"#,
    );

    let err = Settings::load(&path).unwrap_err();
    match &err {
        SettingsError::ValidationFailed { errors } => {
            assert!(errors.iter().any(|e| e.json_pointer == "/language"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_precondition());
    assert!(err.to_string().contains("/language"));
}

#[test]
fn given_malformed_json_when_loaded_then_parsing_fails() {
    let temp = TempDir::new().unwrap();
    let path = write_settings(&temp, ".m2envrc", "{ magento: 2.3 ");
    assert!(matches!(
        Settings::load(&path).unwrap_err(),
        SettingsError::JsonParsingFailed { .. }
    ));
}

#[test]
fn given_missing_file_when_loaded_then_not_found() {
    let temp = TempDir::new().unwrap();
    let err = Settings::load(&temp.path().join(".m2envrc")).unwrap_err();
    assert!(matches!(err, SettingsError::NotFound { .. }));
}

#[test]
fn given_saved_settings_when_reloaded_then_nothing_is_lost() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join(".m2envrc");
    let settings = Settings {
        magento: Some("2.2.6".to_string()),
        php: Some("7.0".to_string()),
        composer: Some(PathBuf::from("/home/dev/.composer")),
        ..Settings::default()
    };

    settings.save(&path).unwrap();
    assert_eq!(Settings::load(&path).unwrap(), settings);

    let raw = fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("username"));
    assert!(raw.ends_with('\n'));
}

#[cfg(unix)]
#[test]
fn given_saved_settings_then_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let path = temp.path().join(".m2envrc");
    Settings::default().save(&path).unwrap();
    let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);
}

#[test]
fn given_nested_directory_when_discovering_then_ancestor_file_is_found() {
    let temp = TempDir::new().unwrap();
    let nested = temp.path().join("project/app/code");
    fs::create_dir_all(&nested).unwrap();
    let path = write_settings(&temp, ".m2env.json", r#"{"magento": "2.3"}"#);

    assert_eq!(find_up(&nested), Some(path.clone()));
}

#[test]
#[serial]
fn given_explicit_path_in_environment_when_locating_then_it_wins() {
    let temp = TempDir::new().unwrap();
    write_settings(&temp, ".m2envrc", "{}");
    let explicit = temp.path().join("elsewhere.json");

    std::env::set_var(SETTINGS_ENV, &explicit);
    let located = locate(temp.path());
    std::env::remove_var(SETTINGS_ENV);

    assert_eq!(located, Some(explicit));
}

#[test]
#[serial]
fn given_no_settings_anywhere_when_discovering_then_none() {
    std::env::remove_var(SETTINGS_ENV);
    let temp = TempDir::new().unwrap();
    // The temp root's ancestors are not expected to carry settings files.
    let found = Settings::discover(temp.path()).unwrap();
    assert!(found.is_none());
}
