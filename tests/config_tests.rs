use std::path::PathBuf;
use std::time::Duration;

use bird_slideshow::config::{Configuration, PlaylistOrder, Resolution, SourceSpec};

fn parse(yaml: &str) -> Configuration {
    serde_yaml::from_str(yaml).unwrap()
}

fn validation_error(yaml: &str) -> String {
    let err = parse(yaml).validated().unwrap_err();
    format!("{err:#}")
}

#[test]
fn parse_every_source_kind() {
    let cfg = parse(
        r#"
sources:
  - type: directory
    path: /srv/birds
    recursive: true
  - type: website
    url: https://example.org/gallery/
  - type: remote-shell
    host: nas.local
    user: pi
    port: 2222
    identity-file: /home/pi/.ssh/id_ed25519
    path: /volume1/birds
  - type: tag-query
    expression: "jay and not blurry"
    database: /var/lib/tmsu/db
wait-time: 8s
start-full: true
default-resolution: 1280x720
max-resize: 2.5
cache-dir: /var/cache/birds
max-preload: 5
retain-behind: 1
small-memory: true
workers: 3
playlist-order: round-robin
shuffle-seed: 42
disk-cache:
  max-bytes: 1048576
  max-age: 7days
fetch:
  timeout: 3s
  retries: 1
  backoff: 100ms
"#,
    )
    .validated()
    .unwrap();

    assert_eq!(
        cfg.sources,
        vec![
            SourceSpec::Directory {
                path: PathBuf::from("/srv/birds"),
                recursive: true,
            },
            SourceSpec::Website {
                url: "https://example.org/gallery/".into(),
            },
            SourceSpec::RemoteShell {
                host: "nas.local".into(),
                user: Some("pi".into()),
                port: Some(2222),
                identity_file: Some(PathBuf::from("/home/pi/.ssh/id_ed25519")),
                path: "/volume1/birds".into(),
            },
            SourceSpec::TagQuery {
                expression: "jay and not blurry".into(),
                database: Some(PathBuf::from("/var/lib/tmsu/db")),
            },
        ]
    );
    assert_eq!(cfg.wait_time, Duration::from_secs(8));
    assert!(cfg.start_full);
    assert_eq!(
        cfg.default_resolution,
        Resolution {
            width: 1280,
            height: 720
        }
    );
    assert!((cfg.max_resize - 2.5).abs() < f32::EPSILON);
    assert_eq!(cfg.cache_dir, PathBuf::from("/var/cache/birds"));
    assert_eq!(cfg.max_preload, 5);
    assert_eq!(cfg.retain_behind, 1);
    assert!(cfg.small_memory);
    assert_eq!(cfg.workers, 3);
    assert_eq!(cfg.playlist_order, PlaylistOrder::RoundRobin);
    assert_eq!(cfg.shuffle_seed, Some(42));
    assert_eq!(cfg.disk_cache.max_bytes, 1_048_576);
    assert_eq!(cfg.disk_cache.max_age, Some(Duration::from_secs(7 * 24 * 3600)));
    assert_eq!(cfg.fetch.timeout, Duration::from_secs(3));
    assert_eq!(cfg.fetch.retries, 1);
    assert_eq!(cfg.fetch.backoff, Duration::from_millis(100));
}

#[test]
fn defaults_fill_everything_but_sources() {
    let cfg = parse(
        r#"
sources:
  - type: directory
    path: birds
"#,
    )
    .validated()
    .unwrap();
    assert_eq!(
        cfg.sources,
        vec![SourceSpec::Directory {
            path: PathBuf::from("birds"),
            recursive: false,
        }]
    );
    assert_eq!(cfg.wait_time, Duration::from_secs(5));
    assert!(!cfg.start_full);
    assert_eq!(cfg.default_resolution, Resolution::default());
    assert!((cfg.max_resize - 4.0).abs() < f32::EPSILON);
    assert_eq!(cfg.max_preload, 3);
    assert_eq!(cfg.retain_behind, 2);
    assert!(!cfg.small_memory);
    assert_eq!(cfg.playlist_order, PlaylistOrder::Concatenate);
    assert_eq!(cfg.disk_cache.max_age, None);
    assert_eq!(cfg.fetch.retries, 2);
}

#[test]
fn rejects_nonsensical_values() {
    let dir = "sources:\n  - type: directory\n    path: birds\n";

    assert!(validation_error("sources: []\n").contains("at least one source"));
    assert!(validation_error(&format!("{dir}max-resize: -1.0\n")).contains("max-resize"));
    assert!(validation_error(&format!("{dir}max-preload: 0\n")).contains("max-preload"));
    assert!(validation_error(&format!("{dir}workers: 0\n")).contains("workers"));
    assert!(validation_error(&format!("{dir}wait-time: 0s\n")).contains("wait-time"));
    assert!(
        validation_error(&format!("{dir}default-resolution: 0x720\n"))
            .contains("default-resolution")
    );

    let bad_url = validation_error(
        "sources:\n  - type: website\n    url: ftp://example.org/birds\n",
    );
    assert!(bad_url.contains("source #1"), "{bad_url}");
    assert!(bad_url.contains("http or https"), "{bad_url}");

    let bad_tags = validation_error(
        "sources:\n  - type: directory\n    path: a\n  - type: tag-query\n    expression: \"jay and (robin\"\n",
    );
    assert!(bad_tags.contains("source #2"), "{bad_tags}");
    assert!(bad_tags.contains("invalid tag expression"), "{bad_tags}");
}

#[test]
fn unknown_fields_are_rejected() {
    let top = serde_yaml::from_str::<Configuration>("sources: []\nphoto-library-path: /x\n");
    assert!(top.is_err());
    let nested = serde_yaml::from_str::<Configuration>(
        "sources:\n  - type: website\n    url: https://example.org\n    depth: 2\n",
    );
    assert!(nested.is_err());
    let kind = serde_yaml::from_str::<Configuration>("sources:\n  - type: ftp\n    path: /x\n");
    assert!(kind.is_err());
}

#[test]
fn bad_resolution_is_a_parse_error() {
    let err = serde_yaml::from_str::<Configuration>("default-resolution: huge\n").unwrap_err();
    assert!(err.to_string().contains("1280x720"), "{err}");
}
