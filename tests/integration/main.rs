//! Integration tests for blobcache

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn blobcache() -> Command {
        cargo_bin_cmd!("blobcache")
    }

    /// Base invocation that never touches the host machine's state
    fn isolated(dir: &TempDir) -> Command {
        let mut cmd = blobcache();
        cmd.arg("--no-local")
            .arg("--state-file")
            .arg(dir.path().join("state.json"))
            .arg("--config")
            .arg(dir.path().join("config.toml"))
            .env_remove("BLOBCACHE_CONNECTION_STRING")
            .env_remove("BLOBCACHE_CONTAINER")
            .env_remove("BLOBCACHE_URL")
            .env_remove("GITHUB_OUTPUT");
        cmd
    }

    #[test]
    fn help_displays() {
        blobcache()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Remote artifact cache"));
    }

    #[test]
    fn version_displays() {
        blobcache()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("blobcache"));
    }

    #[test]
    fn restore_requires_key() {
        blobcache().arg("restore").assert().failure();
    }

    #[test]
    fn restore_without_ref_is_skipped() {
        let dir = TempDir::new().unwrap();
        isolated(&dir)
            .args(["restore", "--key", "k1"])
            .env_remove("GITHUB_REF")
            .assert()
            .success();
    }

    #[test]
    fn save_without_ref_is_skipped() {
        let dir = TempDir::new().unwrap();
        isolated(&dir)
            .arg("save")
            .env_remove("GITHUB_REF")
            .assert()
            .success();
    }

    #[test]
    fn restore_without_container_fails_with_hint() {
        let dir = TempDir::new().unwrap();
        isolated(&dir)
            .args(["restore", "--key", "k1"])
            .env("GITHUB_REF", "refs/heads/main")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Required input missing: container"));
    }

    #[test]
    fn save_without_prior_restore_warns_but_succeeds() {
        // Cache population is best-effort: no recorded primary key
        // must never fail the job.
        let dir = TempDir::new().unwrap();
        isolated(&dir)
            .arg("save")
            .env("GITHUB_REF", "refs/heads/main")
            .assert()
            .success();
    }

    #[test]
    fn save_is_best_effort_even_with_bad_store() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("state.json"),
            r#"{"primary-key": "k1", "cache-hit": "false"}"#,
        )
        .unwrap();

        isolated(&dir)
            .args(["save", "--path", "does-not-exist/**"])
            .env("GITHUB_REF", "refs/heads/main")
            .assert()
            .success();
    }
}

mod pipeline_tests {
    use async_trait::async_trait;
    use blobcache::error::{CacheError, CacheResult};
    use blobcache::pipeline::CachePipeline;
    use blobcache::store::{BlobStore, ByteStream};
    use bytes::Bytes;
    use futures_util::StreamExt;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn tar_with_zstd_available() -> bool {
        std::process::Command::new("tar")
            .args(["--zstd", "-cf", "/dev/null", "-T", "/dev/null"])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[derive(Default)]
    struct Entry {
        payload: Vec<u8>,
        metadata: HashMap<String, String>,
    }

    /// In-memory blob store with injectable faults
    #[derive(Default)]
    struct MemoryStore {
        entries: Mutex<HashMap<String, Entry>>,
        fail_uploads: bool,
        fail_metadata_writes: bool,
    }

    /// Shared handle so a test can retain the store while the pipeline owns it.
    struct SharedStore(Arc<MemoryStore>);

    #[async_trait]
    impl BlobStore for SharedStore {
        async fn exists(&self, key: &str) -> CacheResult<bool> {
            Ok(self.0.entries.lock().unwrap().contains_key(key))
        }

        async fn get_metadata(&self, key: &str) -> CacheResult<HashMap<String, String>> {
            Ok(self
                .0
                .entries
                .lock()
                .unwrap()
                .get(key)
                .map(|e| e.metadata.clone())
                .unwrap_or_default())
        }

        async fn set_metadata(
            &self,
            key: &str,
            metadata: HashMap<String, String>,
        ) -> CacheResult<()> {
            if self.0.fail_metadata_writes {
                return Err(CacheError::StoreStatus {
                    context: format!("PUT {key}?comp=metadata"),
                    status: 500,
                });
            }
            if let Some(entry) = self.0.entries.lock().unwrap().get_mut(key) {
                entry.metadata = metadata;
            }
            Ok(())
        }

        async fn delete_if_exists(&self, key: &str) -> CacheResult<()> {
            self.0.entries.lock().unwrap().remove(key);
            Ok(())
        }

        async fn upload_stream(&self, key: &str, mut body: ByteStream) -> CacheResult<()> {
            let mut payload = Vec::new();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| CacheError::Upload {
                    key: key.to_string(),
                    code: e.to_string(),
                })?;
                payload.extend_from_slice(&chunk);
            }
            if self.0.fail_uploads {
                return Err(CacheError::Upload {
                    key: key.to_string(),
                    code: "503".to_string(),
                });
            }
            self.0.entries.lock().unwrap().insert(
                key.to_string(),
                Entry {
                    payload,
                    metadata: HashMap::new(),
                },
            );
            Ok(())
        }

        async fn download_stream(&self, key: &str) -> CacheResult<ByteStream> {
            let payload = self
                .0
                .entries
                .lock()
                .unwrap()
                .get(key)
                .map(|e| e.payload.clone())
                .ok_or_else(|| CacheError::Download {
                    key: key.to_string(),
                    code: "404".to_string(),
                })?;
            Ok(Box::pin(futures_util::stream::once(async move {
                Ok(Bytes::from(payload))
            })))
        }
    }

    fn pipeline(store: &Arc<MemoryStore>) -> CachePipeline {
        CachePipeline::new(Box::new(SharedStore(Arc::clone(store))))
    }

    fn write_files(dir: &TempDir, files: &[(&str, &str)]) -> Vec<PathBuf> {
        files
            .iter()
            .map(|(name, contents)| {
                let path = dir.path().join(name);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).unwrap();
                }
                std::fs::write(&path, contents).unwrap();
                path
            })
            .collect()
    }

    #[tokio::test]
    async fn restore_without_prior_save_misses() {
        let store = Arc::new(MemoryStore::default());
        assert!(!pipeline(&store).restore("never-saved").await.unwrap());
    }

    #[tokio::test]
    async fn round_trip_restores_files_path_for_path() {
        if !tar_with_zstd_available() {
            eprintln!("skipping: tar --zstd unavailable");
            return;
        }

        let dir = TempDir::new().unwrap();
        let files = write_files(&dir, &[("a.txt", "alpha"), ("sub/b.txt", "beta")]);

        let store = Arc::new(MemoryStore::default());
        let pipe = pipeline(&store);
        pipe.save("k1", &files).await.unwrap();

        // Wipe the originals; restore must bring them back in place.
        for file in &files {
            std::fs::remove_file(file).unwrap();
        }

        assert!(pipe.restore("k1").await.unwrap());
        assert_eq!(std::fs::read_to_string(&files[0]).unwrap(), "alpha");
        assert_eq!(std::fs::read_to_string(&files[1]).unwrap(), "beta");
    }

    #[tokio::test]
    async fn interrupted_save_is_observed_as_a_miss() {
        if !tar_with_zstd_available() {
            eprintln!("skipping: tar --zstd unavailable");
            return;
        }

        let dir = TempDir::new().unwrap();
        let files = write_files(&dir, &[("a.txt", "alpha")]);

        // Upload succeeds but the run dies before the validity commit.
        let store = Arc::new(MemoryStore {
            fail_metadata_writes: true,
            ..Default::default()
        });
        let pipe = pipeline(&store);
        assert!(pipe.save("k1", &files).await.is_err());

        // The payload is there, but never marked valid.
        assert!(store.entries.lock().unwrap().contains_key("k1"));
        assert!(!pipe.restore("k1").await.unwrap());
    }

    #[tokio::test]
    async fn failed_upload_is_observed_as_a_miss() {
        if !tar_with_zstd_available() {
            eprintln!("skipping: tar --zstd unavailable");
            return;
        }

        let dir = TempDir::new().unwrap();
        let files = write_files(&dir, &[("a.txt", "alpha")]);

        let store = Arc::new(MemoryStore {
            fail_uploads: true,
            ..Default::default()
        });
        let pipe = pipeline(&store);
        assert!(pipe.save("k1", &files).await.is_err());
        assert!(!pipe.restore("k1").await.unwrap());
    }

    #[tokio::test]
    async fn repeated_save_replaces_the_payload() {
        if !tar_with_zstd_available() {
            eprintln!("skipping: tar --zstd unavailable");
            return;
        }

        let dir = TempDir::new().unwrap();
        let files = write_files(&dir, &[("a.txt", "version one")]);

        let store = Arc::new(MemoryStore::default());
        let pipe = pipeline(&store);
        pipe.save("k1", &files).await.unwrap();

        std::fs::write(&files[0], "version two").unwrap();
        pipe.save("k1", &files).await.unwrap();

        std::fs::remove_file(&files[0]).unwrap();
        assert!(pipe.restore("k1").await.unwrap());
        assert_eq!(std::fs::read_to_string(&files[0]).unwrap(), "version two");
    }
}

mod store_tests {
    use blobcache::error::CacheError;
    use blobcache::store::{AzureBlobStore, BlobStore, ByteStream};
    use bytes::Bytes;
    use futures_util::StreamExt;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DEV_KEY: &str =
        "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

    async fn store_for(server: &MockServer) -> AzureBlobStore {
        let conn = format!(
            "BlobEndpoint={};AccountName=devstoreaccount1;AccountKey={DEV_KEY}",
            server.uri()
        );
        AzureBlobStore::from_connection_string(&conn, "builds").unwrap()
    }

    #[tokio::test]
    async fn exists_maps_status_codes() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/builds/present"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/builds/absent"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        assert!(store.exists("present").await.unwrap());
        assert!(!store.exists("absent").await.unwrap());
    }

    #[tokio::test]
    async fn metadata_headers_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/builds/k1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ms-meta-valid", "true")
                    .insert_header("x-ms-request-id", "ignored"),
            )
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let metadata = store.get_metadata("k1").await.unwrap();
        assert_eq!(metadata.get("valid").map(String::as_str), Some("true"));
        assert!(!metadata.contains_key("request-id"));
    }

    #[tokio::test]
    async fn delete_tolerates_absent_blobs() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/builds/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        store.delete_if_exists("gone").await.unwrap();
    }

    #[tokio::test]
    async fn delete_surfaces_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/builds/k1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let err = store.delete_if_exists("k1").await.unwrap_err();
        assert!(matches!(err, CacheError::StoreStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn upload_stages_blocks_then_commits() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/builds/k1"))
            .and(query_param("comp", "block"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/builds/k1"))
            .and(query_param("comp", "blocklist"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let body: ByteStream = Box::pin(futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]));
        store.upload_stream("k1", body).await.unwrap();
    }

    #[tokio::test]
    async fn upload_surfaces_rejected_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/builds/k1"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let body: ByteStream = Box::pin(futures_util::stream::iter(vec![Ok(Bytes::from_static(
            b"payload",
        ))]));
        let err = store.upload_stream("k1", body).await.unwrap_err();
        assert!(matches!(err, CacheError::Upload { .. }));
    }

    #[tokio::test]
    async fn download_streams_the_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/builds/k1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"compressed bytes".to_vec()))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let mut stream = store.download_stream("k1").await.unwrap();
        let mut payload = Vec::new();
        while let Some(chunk) = stream.next().await {
            payload.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(payload, b"compressed bytes");
    }

    #[tokio::test]
    async fn download_of_absent_key_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/builds/absent"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let Err(err) = store.download_stream("absent").await else {
            panic!("expected download of absent key to fail");
        };
        assert!(matches!(err, CacheError::Download { .. }));
    }

    #[tokio::test]
    async fn container_existence_check() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/builds"))
            .and(query_param("restype", "container"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        assert!(store.container_exists().await.unwrap());
    }
}
