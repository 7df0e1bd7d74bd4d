mod common;

use std::sync::Arc;
use std::time::Duration;

use bird_slideshow::cache::disk::DiskCache;
use bird_slideshow::config::{PlaylistOrder, SourceSpec};
use bird_slideshow::playlist::Playlist;
use bird_slideshow::sources::ImageSource;
use bird_slideshow::tasks::preloader::{Preloader, SlotState};
use common::{Route, TestServer, preload_options};
use futures::future::join_all;
use tempfile::tempdir;

async fn website_playlist(server: &TestServer) -> Arc<Playlist> {
    let spec = SourceSpec::Website {
        url: server.url("/birds/"),
    };
    let source = ImageSource::from_spec(&spec, &preload_options().fetch).unwrap();
    Arc::new(Playlist::build(vec![source], PlaylistOrder::Concatenate, None).await)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_fetch() {
    let server = TestServer::start(vec![
        (
            "/birds/",
            Route::html(r#"<img src="jay.png"><img src="/robin.png">"#),
        ),
        (
            "/birds/jay.png",
            Route::slow_png(40, 30, Duration::from_millis(200)),
        ),
        ("/robin.png", Route::png(40, 30)),
    ])
    .await;
    let cache_dir = tempdir().unwrap();
    let disk = Arc::new(DiskCache::open(cache_dir.path(), 1 << 20, None).unwrap());
    let playlist = website_playlist(&server).await;
    assert_eq!(playlist.len(), 2);

    let preloader = Preloader::new(playlist, disk, preload_options());
    let results = join_all((0..8).map(|_| {
        let preloader = preloader.clone();
        async move { preloader.get(0).await }
    }))
    .await;

    let first = results[0].as_ref().unwrap();
    for res in &results {
        assert!(Arc::ptr_eq(first, res.as_ref().unwrap()));
    }
    assert_eq!(server.hits("/birds/jay.png"), 1);
    assert_eq!(preloader.state(0), SlotState::Ready);
    assert_eq!(preloader.stats().source_fetches, 1);
    assert_eq!(preloader.stats().decodes, 1);

    // served from memory now
    preloader.get(0).await.unwrap();
    assert_eq!(server.hits("/birds/jay.png"), 1);
    assert_eq!(preloader.stats().memory_hits, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disk_cache_is_reused_across_sessions() {
    let server = TestServer::start(vec![
        ("/birds/", Route::html(r#"<a href="wren.png">wren</a>"#)),
        ("/birds/wren.png", Route::png(16, 16)),
    ])
    .await;
    let cache_dir = tempdir().unwrap();

    {
        let disk = Arc::new(DiskCache::open(cache_dir.path(), 1 << 20, None).unwrap());
        let preloader = Preloader::new(website_playlist(&server).await, disk, preload_options());
        preloader.get(0).await.unwrap();
    }
    assert_eq!(server.hits("/birds/wren.png"), 1);

    let disk = Arc::new(DiskCache::open(cache_dir.path(), 1 << 20, None).unwrap());
    assert_eq!(disk.len(), 1);
    let preloader = Preloader::new(website_playlist(&server).await, disk, preload_options());
    preloader.get(0).await.unwrap();
    assert_eq!(server.hits("/birds/wren.png"), 1);
    assert_eq!(preloader.stats().disk_hits, 1);
    assert_eq!(preloader.stats().source_fetches, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn positions_sharing_a_key_all_settle() {
    let server = TestServer::start(vec![
        ("/birds/", Route::html(r#"<img src="owl.png">"#)),
        (
            "/birds/owl.png",
            Route::slow_png(20, 20, Duration::from_millis(200)),
        ),
    ])
    .await;
    let spec = SourceSpec::Website {
        url: server.url("/birds/"),
    };
    let fetch = preload_options().fetch;
    let sources = vec![
        ImageSource::from_spec(&spec, &fetch).unwrap(),
        ImageSource::from_spec(&spec, &fetch).unwrap(),
    ];
    let playlist = Playlist::build(sources, PlaylistOrder::Concatenate, None).await;
    assert_eq!(playlist.len(), 2);
    assert_eq!(playlist.items()[0].key, playlist.items()[1].key);

    let cache_dir = tempdir().unwrap();
    let disk = Arc::new(DiskCache::open(cache_dir.path(), 1 << 20, None).unwrap());
    let preloader = Preloader::new(Arc::new(playlist), disk, preload_options());
    let (a, b) = tokio::join!(preloader.get(0), preloader.get(1));
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));

    assert_eq!(server.hits("/birds/owl.png"), 1);
    assert_eq!(preloader.state(0), SlotState::Ready);
    assert_eq!(preloader.state(1), SlotState::Ready);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_failure_marks_every_position() {
    let server = TestServer::start(vec![
        ("/birds/", Route::html(r#"<img src="gone.png">"#)),
        ("/birds/gone.png", Route::Status(404)),
    ])
    .await;
    let spec = SourceSpec::Website {
        url: server.url("/birds/"),
    };
    let fetch = preload_options().fetch;
    let sources = vec![
        ImageSource::from_spec(&spec, &fetch).unwrap(),
        ImageSource::from_spec(&spec, &fetch).unwrap(),
    ];
    let playlist = Playlist::build(sources, PlaylistOrder::Concatenate, None).await;
    let cache_dir = tempdir().unwrap();
    let disk = Arc::new(DiskCache::open(cache_dir.path(), 1 << 20, None).unwrap());
    let preloader = Preloader::new(Arc::new(playlist), disk, preload_options());

    let (a, b) = tokio::join!(preloader.get(0), preloader.get(1));
    assert!(a.is_err() && b.is_err());
    assert_eq!(preloader.state(0), SlotState::Failed);
    assert_eq!(preloader.state(1), SlotState::Failed);
    assert!(preloader.all_failed());
}
