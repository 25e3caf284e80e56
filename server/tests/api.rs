use std::time::Duration;

use models::{Delta, LongpollResponse, Metadata, ServerConfig, Token};
use server::{AppState, BlobStore, Store};

struct TestServer {
    base: String,
    http: reqwest::Client,
    _dir: tempfile::TempDir,
}

impl TestServer {
    async fn spawn(longpoll_timeout_secs: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().unwrap();
        let blobs = BlobStore::new(dir.path().join("data")).await.unwrap();
        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            db_path: dir.path().join("meta.db"),
            data_dir: dir.path().join("data"),
            log_path: dir.path().join("server.log"),
            longpoll_timeout_secs,
        };
        let state = AppState::new(store, blobs, config);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = server::build_router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        TestServer {
            base: format!("http://{addr}"),
            http: reqwest::Client::new(),
            _dir: dir,
        }
    }

    async fn register(&self, username: &str) -> String {
        let resp = self
            .http
            .post(format!("{}/register", self.base))
            .form(&[
                ("username", username),
                ("password", "secret"),
                ("computername", "test-box"),
            ])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        resp.json::<Token>().await.unwrap().authencity_token
    }

    fn authed(&self, req: reqwest::RequestBuilder, username: &str, token: &str) -> reqwest::RequestBuilder {
        req.header("X-Cloudsyncer-Username", username)
            .header("X-Cloudsyncer-Authtoken", token)
    }

    async fn put_file(&self, username: &str, token: &str, path: &str, body: &[u8]) -> Metadata {
        let resp = self
            .authed(
                self.http.put(format!("{}/files_put{path}", self.base)),
                username,
                token,
            )
            .body(body.to_vec())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        resp.json().await.unwrap()
    }

    async fn delta(&self, username: &str, token: &str, cursor: Option<&str>) -> Delta {
        let mut form = Vec::new();
        if let Some(c) = cursor {
            form.push(("cursor", c.to_string()));
        }
        let resp = self
            .authed(self.http.post(format!("{}/delta", self.base)), username, token)
            .form(&form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        resp.json().await.unwrap()
    }
}

#[tokio::test]
async fn register_login_and_auth_are_enforced() {
    let server = TestServer::spawn(1).await;
    let token = server.register("alice").await;

    // Second registration conflicts.
    let resp = server
        .http
        .post(format!("{}/register", server.base))
        .form(&[("username", "alice"), ("password", "x")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    // Login with good and bad credentials.
    let resp = server
        .http
        .post(format!("{}/login", server.base))
        .form(&[
            ("username", "alice"),
            ("password", "secret"),
            ("computername", "other-box"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let second_token = resp.json::<Token>().await.unwrap().authencity_token;
    assert_ne!(second_token, token);

    let resp = server
        .http
        .post(format!("{}/login", server.base))
        .form(&[
            ("username", "alice"),
            ("password", "wrong"),
            ("computername", "other-box"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Missing, bogus, and oversized credentials on an authed endpoint.
    let resp = server
        .http
        .post(format!("{}/delta", server.base))
        .form(&[("cursor", "0")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = server
        .authed(
            server.http.post(format!("{}/delta", server.base)),
            "alice",
            "bogus-token",
        )
        .form(&[("cursor", "0")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let long_token = "x".repeat(300);
    let resp = server
        .authed(
            server.http.post(format!("{}/delta", server.base)),
            "alice",
            &long_token,
        )
        .form(&[("cursor", "0")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 413);
}

#[tokio::test]
async fn upload_download_round_trip_and_delta() {
    let server = TestServer::spawn(1).await;
    let token = server.register("alice").await;

    let meta = server.put_file("alice", &token, "/a.txt", b"hi\n").await;
    assert_eq!(meta.size, 3);
    assert_eq!(meta.path, "/a.txt");
    assert_eq!(meta.hash, toolkit::sha1_hex(b"hi\n"));
    assert!(meta.rev > 0);

    let resp = server
        .authed(
            server.http.get(format!("{}/files/a.txt", server.base)),
            "alice",
            &token,
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"hi\n");

    let delta = server.delta("alice", &token, Some("0")).await;
    assert!(!delta.reset);
    assert_eq!(delta.cursor, meta.rev.to_string());
    let changes: Vec<_> = delta.changes().collect();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].0, "/a.txt");
    assert_eq!(changes[0].1.unwrap().rev, meta.rev);

    // Nothing new past the returned cursor.
    let delta = server.delta("alice", &token, Some(&meta.rev.to_string())).await;
    assert!(delta.entries.is_empty());

    // Cursor-less delta is a full-state reset.
    let delta = server.delta("alice", &token, None).await;
    assert!(delta.reset);
    assert_eq!(delta.cursor, "0");
    assert_eq!(delta.entries.len(), 1);
}

#[tokio::test]
async fn directory_removal_surfaces_as_single_tombstone() {
    let server = TestServer::spawn(1).await;
    let token = server.register("alice").await;

    let resp = server
        .authed(
            server.http.post(format!("{}/create_folder", server.base)),
            "alice",
            &token,
        )
        .form(&[("path", "/dir")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    server.put_file("alice", &token, "/dir/x", b"x").await;
    let before = server.put_file("alice", &token, "/dir/y", b"y").await;

    let resp = server
        .authed(server.http.post(format!("{}/remove", server.base)), "alice", &token)
        .form(&[("path", "/dir")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let removed: Metadata = resp.json().await.unwrap();
    assert!(removed.is_removed);
    assert!(removed.is_dir);

    let delta = server.delta("alice", &token, Some(&before.rev.to_string())).await;
    let changes: Vec<_> = delta.changes().collect();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].0, "/dir");
    assert!(changes[0].1.is_none());

    // The removed file 404s without a rev, but stays fetchable by revision.
    let resp = server
        .authed(
            server.http.get(format!("{}/files/dir/x", server.base)),
            "alice",
            &token,
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn missing_parent_is_a_server_error() {
    let server = TestServer::spawn(1).await;
    let token = server.register("alice").await;

    let resp = server
        .authed(
            server.http.put(format!("{}/files_put/no-dir/a.txt", server.base)),
            "alice",
            &token,
        )
        .body(b"x".to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
}

#[tokio::test]
async fn longpoll_times_out_then_wakes_on_upload() {
    let server = TestServer::spawn(1).await;
    let token = server.register("alice").await;

    // No activity: the poll times out with changes:false.
    let resp = server
        .authed(
            server
                .http
                .get(format!("{}/longpoll_delta?cursor=0", server.base)),
            "alice",
            &token,
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let poll: LongpollResponse = resp.json().await.unwrap();
    assert!(!poll.changes);

    // A write while a poll is parked wakes it with changes:true.
    let meta = server.put_file("alice", &token, "/a.txt", b"a").await;
    let cursor = meta.rev.to_string();
    let poll_fut = {
        let req = server.authed(
            server.http.get(format!(
                "{}/longpoll_delta?cursor={cursor}",
                server.base
            )),
            "alice",
            &token,
        );
        tokio::spawn(async move { req.send().await.unwrap().json::<LongpollResponse>().await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    server.put_file("alice", &token, "/b.txt", b"b").await;
    let poll = poll_fut.await.unwrap();
    assert!(poll.changes);
}

#[tokio::test]
async fn check_upload_probe_statuses() {
    let server = TestServer::spawn(1).await;
    let token = server.register("alice").await;

    let hash = toolkit::sha1_hex(b"content");
    let check = |name: &'static str, size: &'static str, hash: String| {
        server
            .authed(
                server.http.post(format!("{}/check_upload", server.base)),
                "alice",
                &token,
            )
            .form(&[
                ("filepath", "/a.txt".to_string()),
                ("size", size.to_string()),
                ("hash", hash),
                ("name", name.to_string()),
            ])
            .send()
    };

    // Unknown path: content needed.
    let resp = check("a.txt", "7", hash.clone()).await.unwrap();
    assert_eq!(resp.status(), 204);

    let uploaded = server.put_file("alice", &token, "/a.txt", b"content").await;

    // Same content, same name, current revision: nothing to do.
    let resp = check("a.txt", "7", hash.clone()).await.unwrap();
    assert_eq!(resp.status(), 200);
    let meta: Metadata = resp.json().await.unwrap();
    assert_eq!(meta.rev, uploaded.rev);

    // Known content under a different name: linked as a fresh revision.
    let resp = check("A.txt", "7", hash.clone()).await.unwrap();
    assert_eq!(resp.status(), 201);
    let meta: Metadata = resp.json().await.unwrap();
    assert!(meta.rev > uploaded.rev);

    // Unknown content at a known path.
    let resp = check("a.txt", "7", "0000000000000000000000000000000000000000".into())
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
}
