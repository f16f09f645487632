use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use warp::http::{StatusCode, header};

use bundle_cdn::bundler::BundlerCommand;
use bundle_cdn::config::{BuildOptions, Config, Mode, PostprocessOptions};
use bundle_cdn::manifest::{BuildManifest, MANIFEST_FILE};
use bundle_cdn::pipeline;
use bundle_cdn::placeholder::PlaceholderToken;
use bundle_cdn::server::{self, AppState};

const ENTRY_SOURCE: &str = r#"var base="$WCPOS_BASEURL_PLACEHOLDER";var chunk="$WCPOS_BASEURL_PLACEHOLDER/_expo/static/js/web/chunk-1.js";var logo="$WCPOS_BASEURL_PLACEHOLDER/assets/logo.png";"#;

fn build_options(app_dir: &Path, script: &str, diagnostics: bool) -> BuildOptions {
    BuildOptions {
        app_dir: app_dir.to_path_buf(),
        bundler_output_dir: app_dir.join("web-build"),
        cache_dir: app_dir.join(".expo"),
        bundler: BundlerCommand {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
        },
        diagnostics,
        strict_patterns: true,
    }
}

/// Emits a small Expo-like export that embeds the placeholder from the environment.
fn fake_export_script() -> String {
    format!(
        "set -e\n\
         mkdir -p web-build/_expo/static/js/web web-build/_expo/static/css\n\
         cat > web-build/_expo/static/js/web/entry-abc123.js <<EOF\n{ENTRY_SOURCE}\nEOF\n\
         printf 'load(\"/_expo/static/js/web/legacy.js\")' > web-build/_expo/static/js/web/other.js\n\
         printf 'body{{}}' > web-build/_expo/static/css/web-1.css\n\
         printf '<html></html>' > web-build/index.html\n"
    )
}

#[cfg(unix)]
#[test]
fn build_rewrites_bundle_and_writes_manifest() {
    let app = TempDir::new().unwrap();
    let publish = TempDir::new().unwrap();
    let publish_dir = publish.path().join("build");
    fs::create_dir_all(&publish_dir).unwrap();
    fs::write(publish_dir.join("stale.js"), "old").unwrap();
    fs::create_dir_all(app.path().join(".expo")).unwrap();
    fs::write(app.path().join(".expo/atlas.jsonl"), "stale").unwrap();

    let config = Config {
        publish_dir: publish_dir.clone(),
        mode: Mode::Build(build_options(app.path(), &fake_export_script(), false)),
    };
    let manifest = pipeline::run(&config).expect("build succeeds");

    assert_eq!(
        manifest.bundle(),
        Some("_expo/static/js/web/entry-abc123.js")
    );
    assert_eq!(manifest.css(), Some("_expo/static/css/web-1.css"));
    assert!(!publish_dir.join("stale.js").exists());
    assert!(!app.path().join(".expo").exists());
    assert!(publish_dir.join("index.html").is_file());

    let entry =
        fs::read_to_string(publish_dir.join("_expo/static/js/web/entry-abc123.js")).unwrap();
    assert!(!entry.contains("__WCPOS_BASEURL_PLACEHOLDER_"));
    assert!(entry.contains(r#"var base=(window.baseUrl||"");"#));
    assert!(
        entry.contains(r#"var chunk=(window.cdnBaseUrl||"")+"/_expo/static/js/web/chunk-1.js";"#)
    );
    assert!(entry.contains(r#"var logo=(window.cdnBaseUrl||"")+"/assets/logo.png";"#));

    let other = fs::read_to_string(publish_dir.join("_expo/static/js/web/other.js")).unwrap();
    assert_eq!(
        other,
        r#"load((window.cdnBaseUrl||"")+"/_expo/static/js/web/legacy.js")"#
    );

    let written: BuildManifest =
        serde_json::from_slice(&fs::read(publish_dir.join(MANIFEST_FILE)).unwrap()).unwrap();
    assert_eq!(written, manifest);
}

#[cfg(unix)]
#[test]
fn build_copies_diagnostics_when_enabled() {
    let app = TempDir::new().unwrap();
    let publish = TempDir::new().unwrap();
    let script = format!(
        "{}mkdir -p .expo\nprintf '{{}}' > .expo/atlas.jsonl\n",
        fake_export_script()
    );

    let config = Config {
        publish_dir: publish.path().to_path_buf(),
        mode: Mode::Build(build_options(app.path(), &script, true)),
    };
    pipeline::run(&config).expect("build succeeds");

    assert_eq!(
        fs::read_to_string(publish.path().join("atlas.jsonl")).unwrap(),
        "{}"
    );
}

#[cfg(unix)]
#[test]
fn failing_bundler_aborts_build() {
    let app = TempDir::new().unwrap();
    let publish = TempDir::new().unwrap();
    let config = Config {
        publish_dir: publish.path().join("build"),
        mode: Mode::Build(build_options(app.path(), "echo boom >&2; exit 1", false)),
    };

    let err = pipeline::run(&config).expect_err("bundler failure is fatal");
    assert!(err.to_string().contains("failed"));
    assert!(!publish.path().join("build").join(MANIFEST_FILE).exists());
}

#[test]
fn postprocess_uses_supplied_placeholder() {
    let publish = TempDir::new().unwrap();
    let scripts = publish.path().join("_expo/static/js/web");
    fs::create_dir_all(&scripts).unwrap();
    fs::write(scripts.join("main.js"), r#"fetch("/__TOKEN__")"#).unwrap();

    let config = Config {
        publish_dir: publish.path().to_path_buf(),
        mode: Mode::Postprocess(PostprocessOptions {
            placeholder: PlaceholderToken::new("/__TOKEN__").unwrap(),
            strict_patterns: true,
        }),
    };
    let manifest = pipeline::run(&config).unwrap();

    assert_eq!(manifest.bundle(), Some("_expo/static/js/web/main.js"));
    assert_eq!(
        fs::read_to_string(scripts.join("main.js")).unwrap(),
        r#"fetch((window.baseUrl||""))"#
    );
}

fn seeded_publish_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    let scripts = dir.path().join("_expo/static/js/web");
    fs::create_dir_all(&scripts).unwrap();
    fs::write(scripts.join("entry-abc123.js"), "console.log('hi')").unwrap();
    fs::write(
        dir.path().join(MANIFEST_FILE),
        r#"{"version":0,"bundler":"metro","fileMetadata":{"web":{"bundle":"_expo/static/js/web/entry-abc123.js"}}}"#,
    )
    .unwrap();
    dir
}

#[tokio::test]
async fn server_serves_manifest_at_mount_root() {
    let dir = seeded_publish_dir();
    let expected = fs::read(dir.path().join(MANIFEST_FILE)).unwrap();
    let routes = server::routes(Arc::new(AppState::new(dir.path(), "build")));

    for path in ["/build", "/build/"] {
        let resp = warp::test::request().path(path).reply(&routes).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body().as_ref(), expected.as_slice());
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(
            resp.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-cache, no-store, must-revalidate"
        );
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
    }
}

#[tokio::test]
async fn server_serves_bundle_files() {
    let dir = seeded_publish_dir();
    let routes = server::routes(Arc::new(AppState::new(dir.path(), "build")));

    let resp = warp::test::request()
        .path("/build/_expo/static/js/web/entry-abc123.js?v=2")
        .reply(&routes)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/javascript"
    );
    assert_eq!(resp.body().as_ref(), b"console.log('hi')");
}

#[tokio::test]
async fn server_rejects_path_traversal() {
    let dir = seeded_publish_dir();
    let routes = server::routes(Arc::new(AppState::new(dir.path(), "build")));

    for path in [
        "/build/../../etc/passwd",
        "/build/%2e%2e/%2e%2e/etc/passwd",
        "/build/..%2f..%2fetc%2fpasswd",
    ] {
        let resp = warp::test::request().path(path).reply(&routes).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{path}");
    }
}

#[tokio::test]
async fn server_only_serves_mount_paths() {
    let dir = seeded_publish_dir();
    let routes = server::routes(Arc::new(AppState::new(dir.path(), "build")));

    let resp = warp::test::request().path("/other").reply(&routes).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        resp.body().as_ref(),
        b"Not Found - This server only serves /build/* paths"
    );
}

#[tokio::test]
async fn server_method_handling() {
    let dir = seeded_publish_dir();
    let routes = server::routes(Arc::new(AppState::new(dir.path(), "build")));

    let post = warp::test::request()
        .method("POST")
        .path("/build/metadata.json")
        .reply(&routes)
        .await;
    assert_eq!(post.status(), StatusCode::METHOD_NOT_ALLOWED);

    let options = warp::test::request()
        .method("OPTIONS")
        .path("/build/metadata.json")
        .reply(&routes)
        .await;
    assert_eq!(options.status(), StatusCode::OK);
    assert!(options.body().is_empty());
    assert_eq!(
        options
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
    assert_eq!(
        options
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_METHODS)
            .unwrap(),
        "GET, HEAD, OPTIONS"
    );
    assert_eq!(
        options
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
            .unwrap(),
        "Content-Type, Authorization"
    );
}
