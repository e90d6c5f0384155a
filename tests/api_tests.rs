mod common;

use std::sync::Arc;
use std::time::Duration;

use file_drop::client::{Client, HttpTransport, Transport, UPLOAD_TOKEN_HEADER, USER_TOKEN_HEADER};
use file_drop::config::UploadPolicy;
use file_drop::error::Error;
use file_drop::models::{FileStatus, User, UploadParams};

use common::{read_all, source, spawn_server, test_env, test_state, TestEnv};

async fn server(policy: UploadPolicy) -> (TestEnv, String) {
    let env = test_env(policy);
    let base_url = spawn_server(test_state(&env)).await;
    (env, base_url)
}

fn http_client(base_url: &str) -> Client {
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(base_url).unwrap());
    Client::new(transport)
}

#[tokio::test]
async fn test_health() {
    let (_env, base_url) = server(UploadPolicy::default()).await;

    let response = reqwest::get(format!("{base_url}/_internal/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn test_upload_round_trip() {
    let (_env, base_url) = server(UploadPolicy::default()).await;
    let client = http_client(&base_url);

    let upload = client.new_upload(UploadParams {
        comments: Some("holiday pictures".to_string()),
        ..Default::default()
    });
    let declared = upload.add_file("beach photo.png", source(b"png bytes"));
    upload.upload_all().await.unwrap();

    let info = declared.info().unwrap();
    assert_eq!(info.status, FileStatus::Uploaded);
    assert_eq!(info.size, 9);
    assert_eq!(info.mime_type.as_deref(), Some("image/png"));
    assert!(info.backend_details.is_none());

    let content = read_all(upload.download_file(&declared).await.unwrap()).await;
    assert_eq!(content, b"png bytes");

    // Anyone with the id can read it
    let stranger = http_client(&base_url);
    let attached = stranger
        .get_upload(&upload.id().unwrap(), None)
        .await
        .unwrap();
    let shown = attached.info().unwrap();
    assert!(shown.upload_token.is_none());
    assert_eq!(shown.comments.as_deref(), Some("holiday pictures"));

    upload.delete().await.unwrap();
    let result = stranger.get_upload(&upload.id().unwrap(), None).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_add_file_without_declaring_it() {
    let (_env, base_url) = server(UploadPolicy::default()).await;
    let transport = HttpTransport::new(&base_url).unwrap();

    let upload = transport
        .create_upload(&UploadParams::default())
        .await
        .unwrap();
    let file = transport
        .upload_file(&upload, None, "late.txt", source(b"late"))
        .await
        .unwrap();
    assert_eq!(file.name, "late.txt");
    assert_eq!(file.status, FileStatus::Uploaded);

    let reader = transport.download_file(&upload, &file).await.unwrap();
    assert_eq!(read_all(reader).await, b"late");
}

#[tokio::test]
async fn test_download_headers() {
    let (_env, base_url) = server(UploadPolicy::default()).await;
    let transport = HttpTransport::new(&base_url).unwrap();
    let upload = transport
        .create_upload(&UploadParams {
            one_shot: true,
            ..Default::default()
        })
        .await
        .unwrap();
    let file = transport
        .upload_file(&upload, None, "report.txt", source(b"quarterly"))
        .await
        .unwrap();

    let url = format!("{base_url}/file/{}/{}/report.txt", upload.id, file.id);
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), 200);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "text/plain");
    assert_eq!(headers["content-length"], "9");
    assert_eq!(
        headers["content-disposition"],
        "attachment; filename=\"report.txt\""
    );
    assert_eq!(headers["cache-control"], "no-store");
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"quarterly");

    // One-shot, the second download is refused
    let second = reqwest::get(&url).await.unwrap();
    assert_eq!(second.status(), 409);
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["status"], "fail");
}

#[tokio::test]
async fn test_file_name_must_match() {
    let (_env, base_url) = server(UploadPolicy::default()).await;
    let transport = HttpTransport::new(&base_url).unwrap();
    let upload = transport
        .create_upload(&UploadParams::default())
        .await
        .unwrap();
    let file = transport
        .upload_file(&upload, None, "real.txt", source(b"x"))
        .await
        .unwrap();

    let url = format!("{base_url}/file/{}/{}/fake.txt", upload.id, file.id);
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_owner_only_operations() {
    let (_env, base_url) = server(UploadPolicy::default()).await;
    let client = http_client(&base_url);
    let upload = client.new_upload(UploadParams::default());
    let file = upload.add_file("a.txt", source(b"a"));
    upload.upload_all().await.unwrap();
    let token = upload.upload_token().unwrap();

    upload.set_upload_token(None);
    assert!(matches!(
        upload.delete_file(&file).await,
        Err(Error::Forbidden(_))
    ));
    assert!(matches!(upload.delete().await, Err(Error::Forbidden(_))));

    upload.set_upload_token(Some(token));
    let removed = upload.delete_file(&file).await.unwrap();
    assert_eq!(removed.status, FileStatus::Removed);
}

#[tokio::test]
async fn test_invalid_requests() {
    let (_env, base_url) = server(UploadPolicy {
        max_file_size: 4,
        ..Default::default()
    })
    .await;
    let transport = HttpTransport::new(&base_url).unwrap();

    let response = reqwest::Client::new()
        .post(format!("{base_url}/upload"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let upload = transport
        .create_upload(&UploadParams::default())
        .await
        .unwrap();
    let result = transport
        .upload_file(&upload, None, "big.bin", source(b"0123456789"))
        .await;
    assert!(matches!(result, Err(Error::Invalid(_))));

    let missing = transport.get_upload("doesnotexist", None).await;
    assert!(matches!(missing, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_password_protected_upload() {
    let (_env, base_url) = server(UploadPolicy::default()).await;
    let transport = HttpTransport::new(&base_url).unwrap();
    let upload = transport
        .create_upload(&UploadParams {
            login: Some("foo".to_string()),
            password: Some("bar".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(upload.protected_by_password);
    assert!(upload.password.is_none());

    let denied = transport.get_upload(&upload.id, None).await;
    assert!(matches!(denied, Err(Error::Forbidden(_))));

    let response = reqwest::Client::new()
        .get(format!("{base_url}/upload/{}", upload.id))
        .basic_auth("foo", Some("bar"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // The owner does not need the credentials
    let owned = transport
        .get_upload(&upload.id, upload.upload_token.as_deref())
        .await
        .unwrap();
    assert!(owned.upload_token.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stream_over_http() {
    let (_env, base_url) = server(UploadPolicy::default()).await;
    let transport = Arc::new(HttpTransport::new(&base_url).unwrap());
    let upload = transport
        .create_upload(&UploadParams {
            stream: true,
            files: vec![file_drop::models::FileParams {
                name: "live.txt".to_string(),
                reference: None,
            }],
            ..Default::default()
        })
        .await
        .unwrap();
    let declared = upload.files[0].clone();

    let writer = {
        let transport = Arc::clone(&transport);
        let upload = upload.clone();
        let file_id = declared.id.clone();
        tokio::spawn(async move {
            transport
                .upload_file(&upload, Some(&file_id), "live.txt", source(b"relayed"))
                .await
        })
    };

    let mut content = None;
    for _ in 0..200 {
        match transport.download_file(&upload, &declared).await {
            Ok(reader) => {
                content = Some(read_all(reader).await);
                break;
            }
            Err(Error::Conflict(_)) | Err(Error::NotFound(_)) => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(content.as_deref(), Some(&b"relayed"[..]));

    let file = writer.await.unwrap().unwrap();
    assert_eq!(file.status, FileStatus::Removed);
}

// ============================================================================
// Users
// ============================================================================

#[tokio::test]
async fn test_user_uploads_and_stats() {
    let (env, base_url) = server(UploadPolicy::default()).await;
    let mut alice = User::new("local", "alice");
    let token = alice.new_token(None).token;
    env.metadata.create_user(&alice).unwrap();

    let transport = HttpTransport::new(&base_url)
        .unwrap()
        .with_user_token(token.clone());
    let upload = transport
        .create_upload(&UploadParams::default())
        .await
        .unwrap();
    transport
        .upload_file(&upload, None, "a.txt", source(b"12345"))
        .await
        .unwrap();

    let http = reqwest::Client::new();
    let listing: serde_json::Value = http
        .get(format!("{base_url}/me/uploads"))
        .header(USER_TOKEN_HEADER, &token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let uploads = listing["data"].as_array().unwrap();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0]["id"], upload.id.as_str());

    let stats: serde_json::Value = http
        .get(format!("{base_url}/me/stats"))
        .header(USER_TOKEN_HEADER, &token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["data"]["uploads"], 1);
    assert_eq!(stats["data"]["totalSize"], 5);

    // Token owners act as the upload owner
    let removed = transport.remove_upload(&upload.sanitized()).await;
    assert!(removed.is_ok());
}

#[tokio::test]
async fn test_user_endpoints_need_auth() {
    let (env, base_url) = server(UploadPolicy::default()).await;
    let http = reqwest::Client::new();

    let anonymous = http
        .get(format!("{base_url}/me/uploads"))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), 403);

    let bad_token = http
        .get(format!("{base_url}/me/uploads"))
        .header(USER_TOKEN_HEADER, "not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(bad_token.status(), 403);

    let mut bob = User::new("local", "bob");
    let bob_token = bob.new_token(None).token;
    env.metadata.create_user(&bob).unwrap();
    let not_admin = http
        .get(format!("{base_url}/stats"))
        .header(USER_TOKEN_HEADER, &bob_token)
        .send()
        .await
        .unwrap();
    assert_eq!(not_admin.status(), 403);

    let mut root = User::new("local", "root");
    root.is_admin = true;
    let root_token = root.new_token(None).token;
    env.metadata.create_user(&root).unwrap();
    let stats: serde_json::Value = http
        .get(format!("{base_url}/stats"))
        .header(USER_TOKEN_HEADER, &root_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["data"]["users"], 2);
}

#[tokio::test]
async fn test_token_management() {
    let (env, base_url) = server(UploadPolicy::default()).await;
    let mut alice = User::new("local", "alice");
    let first = alice.new_token(None).token;
    env.metadata.create_user(&alice).unwrap();
    let http = reqwest::Client::new();

    let created: serde_json::Value = http
        .post(format!("{base_url}/me/token"))
        .header(USER_TOKEN_HEADER, &first)
        .json(&serde_json::json!({ "comment": "ci" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created["status"], "success");
    assert_eq!(created["data"]["comment"], "ci");
    let second = created["data"]["token"].as_str().unwrap().to_string();

    // An empty body is accepted too
    let bare = http
        .post(format!("{base_url}/me/token"))
        .header(USER_TOKEN_HEADER, &first)
        .send()
        .await
        .unwrap();
    assert_eq!(bare.status(), 200);

    let me: serde_json::Value = http
        .get(format!("{base_url}/me"))
        .header(USER_TOKEN_HEADER, &second)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["data"]["id"], "local:alice");
    assert_eq!(me["data"]["tokens"].as_array().unwrap().len(), 3);

    let revoked = http
        .delete(format!("{base_url}/me/token/{second}"))
        .header(USER_TOKEN_HEADER, &first)
        .send()
        .await
        .unwrap();
    assert_eq!(revoked.status(), 200);

    let stale = http
        .get(format!("{base_url}/me"))
        .header(USER_TOKEN_HEADER, &second)
        .send()
        .await
        .unwrap();
    assert_eq!(stale.status(), 403);

    let unknown = http
        .delete(format!("{base_url}/me/token/{second}"))
        .header(USER_TOKEN_HEADER, &first)
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), 404);

    let anonymous = http
        .post(format!("{base_url}/me/token"))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), 403);
}

#[tokio::test]
async fn test_remove_own_uploads_and_account() {
    let (env, base_url) = server(UploadPolicy::default()).await;
    let mut alice = User::new("local", "alice");
    let token = alice.new_token(None).token;
    env.metadata.create_user(&alice).unwrap();

    let transport = HttpTransport::new(&base_url)
        .unwrap()
        .with_user_token(token.clone());
    let mut ids = Vec::new();
    for _ in 0..2 {
        let upload = transport
            .create_upload(&UploadParams::default())
            .await
            .unwrap();
        transport
            .upload_file(&upload, None, "a.txt", source(b"data"))
            .await
            .unwrap();
        ids.push(upload.id);
    }
    // Not alice's, must survive
    let other = HttpTransport::new(&base_url)
        .unwrap()
        .create_upload(&UploadParams::default())
        .await
        .unwrap();

    let http = reqwest::Client::new();
    let removed: serde_json::Value = http
        .delete(format!("{base_url}/me/uploads"))
        .header(USER_TOKEN_HEADER, &token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(removed["data"]["removed"], 2);
    for id in &ids {
        assert!(env.metadata.get_upload(id).unwrap().is_none());
    }
    assert!(env.metadata.get_upload(&other.id).unwrap().is_some());

    let deleted = http
        .delete(format!("{base_url}/me"))
        .header(USER_TOKEN_HEADER, &token)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 200);
    assert!(env.metadata.get_user("local:alice").unwrap().is_none());
    assert!(env.metadata.get_user_from_token(&token).unwrap().is_none());
}

#[tokio::test]
async fn test_admin_token_does_not_own_other_uploads() {
    let (env, base_url) = server(UploadPolicy {
        removable: true,
        ..Default::default()
    })
    .await;
    let mut root = User::new("local", "root");
    root.is_admin = true;
    let root_token = root.new_token(None).token;
    env.metadata.create_user(&root).unwrap();

    let transport = HttpTransport::new(&base_url).unwrap();
    let upload = transport
        .create_upload(&UploadParams::default())
        .await
        .unwrap();
    let file = transport
        .upload_file(&upload, None, "a.txt", source(b"keep"))
        .await
        .unwrap();

    let http = reqwest::Client::new();
    let response = http
        .delete(format!(
            "{base_url}/file/{}/{}/{}",
            upload.id, file.id, file.name
        ))
        .header(USER_TOKEN_HEADER, &root_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(
        body["data"]["message"],
        "you are not allowed to remove files from this upload"
    );
}

#[tokio::test]
async fn test_users_listing_is_admin_only() {
    let (env, base_url) = server(UploadPolicy::default()).await;
    let mut root = User::new("local", "root");
    root.is_admin = true;
    let root_token = root.new_token(None).token;
    env.metadata.create_user(&root).unwrap();
    let mut bob = User::new("local", "bob");
    let bob_token = bob.new_token(None).token;
    env.metadata.create_user(&bob).unwrap();
    let http = reqwest::Client::new();

    let forbidden = http
        .get(format!("{base_url}/users"))
        .header(USER_TOKEN_HEADER, &bob_token)
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), 403);

    let users: serde_json::Value = http
        .get(format!("{base_url}/users"))
        .header(USER_TOKEN_HEADER, &root_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let users = users["data"].as_array().unwrap();
    assert_eq!(users.len(), 2);
    assert!(users
        .iter()
        .all(|u| u["tokens"].as_array().map_or(true, |t| t.is_empty())));
}

#[tokio::test]
async fn test_config_and_version() {
    let (_env, base_url) = server(UploadPolicy {
        max_file_size: 1234,
        ..Default::default()
    })
    .await;

    let config: serde_json::Value = reqwest::get(format!("{base_url}/config"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(config["data"]["maxFileSize"], 1234);
    assert_eq!(config["data"]["oneShot"], true);

    let version: serde_json::Value = reqwest::get(format!("{base_url}/version"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(version["data"]["name"], "file-drop");
    assert_eq!(version["data"]["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_upload_token_header_grants_ownership() {
    let (_env, base_url) = server(UploadPolicy::default()).await;
    let transport = HttpTransport::new(&base_url).unwrap();
    let upload = transport
        .create_upload(&UploadParams::default())
        .await
        .unwrap();
    let token = upload.upload_token.clone().unwrap();

    let http = reqwest::Client::new();
    let forbidden = http
        .delete(format!("{base_url}/upload/{}", upload.id))
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), 403);

    let deleted: serde_json::Value = http
        .delete(format!("{base_url}/upload/{}", upload.id))
        .header(UPLOAD_TOKEN_HEADER, token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted["status"], "success");
    assert_eq!(deleted["data"]["id"], upload.id.as_str());
}
