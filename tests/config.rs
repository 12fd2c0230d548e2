use std::fs;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use filetime::FileTime;
use ironsync::config::{self, ConfigError, Defaults};
use ironsync::ConnectionKind;
use tempfile::tempdir;

#[test]
fn test_load_wires_resources_to_connections() {
    let dir = tempdir().unwrap();
    let installed = dir.path().join("motd");
    fs::write(&installed, b"old").unwrap();
    let mtime = Utc.with_ymd_and_hms(2022, 3, 4, 5, 6, 7).unwrap();
    filetime::set_file_mtime(&installed, FileTime::from_unix_time(mtime.timestamp(), 0)).unwrap();

    let conn_file = dir.path().join("conn.toml");
    fs::write(
        &conn_file,
        r#"
        [web]
        type = "http"
        url = "http://127.0.0.1:1/files"

        [legacy]
        type = "ftp"
        hostname = "ftp.example.com"
        auth_username = "anonymous"
        auth_password = "guest"
        port = 2121

        [dbx]
        type = "dropbox"
        dropbox_token = "t"
        "#,
    )
    .unwrap();

    let res_file = dir.path().join("res.toml");
    fs::write(
        &res_file,
        format!(
            r#"
            [{installed:?}]
            connection = "web"
            remote_path = "motd"

            ["/srv/banner"]
            connection = "legacy"
            remote_path = "/pub/banner"
            interval = 300
            "#
        ),
    )
    .unwrap();

    let defaults = Defaults {
        retry_interval: Duration::from_secs(7),
        ..Defaults::default()
    };
    let connections = config::load(&conn_file, &res_file, &defaults).unwrap();
    assert_eq!(connections.len(), 3);

    let web = &connections[0];
    assert_eq!(web.kind, ConnectionKind::Http);
    assert_eq!(web.resources.len(), 1);
    assert_eq!(web.resources[0].last_modified_time, Some(mtime));
    assert_eq!(web.resources[0].retry_interval, Duration::from_secs(7));

    let legacy = &connections[1];
    assert_eq!(legacy.kind, ConnectionKind::Ftp);
    assert_eq!(legacy.resources[0].remote_path, "/pub/banner");
    assert_eq!(legacy.resources[0].interval, Duration::from_secs(300));
    assert_eq!(legacy.resources[0].last_modified_time, None);

    assert!(connections[2].resources.is_empty());
}

#[test]
fn test_load_missing_file() {
    let dir = tempdir().unwrap();
    let err = config::load(
        &dir.path().join("nope.toml"),
        &dir.path().join("res.toml"),
        &Defaults::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn test_load_rejects_malformed_toml() {
    let dir = tempdir().unwrap();
    let conn_file = dir.path().join("conn.toml");
    let res_file = dir.path().join("res.toml");
    fs::write(&conn_file, "[web\ntype = \"http\"\n").unwrap();
    fs::write(&res_file, "").unwrap();

    let err = config::load(&conn_file, &res_file, &Defaults::default()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().starts_with(&conn_file.display().to_string()));
}
