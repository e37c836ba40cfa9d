//! Shared fixtures for integration tests
//!
//! Git fixtures shell out to the `git` binary; callers skip when
//! [`git_available`] is false. HTTP fixtures serve a fixed route table from
//! a local listener so no test touches the network.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, Once};
use tempfile::TempDir;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// A throwaway repository on `main`
pub struct GitRepo {
    _temp: TempDir,
    path: PathBuf,
}

impl GitRepo {
    pub fn init() -> Self {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("origin");
        std::fs::create_dir_all(&path).unwrap();
        let repo = Self { _temp: temp, path };
        repo.git(&["init", "--quiet"]);
        repo.git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        repo
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clone URL for the registry config
    pub fn url(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn write(&self, relative: &str, content: &str) -> &Self {
        self.write_bytes(relative, content.as_bytes())
    }

    pub fn write_bytes(&self, relative: &str, content: &[u8]) -> &Self {
        let target = self.path.join(relative);
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(target, content).unwrap();
        self
    }

    pub fn remove(&self, relative: &str) -> &Self {
        std::fs::remove_file(self.path.join(relative)).unwrap();
        self
    }

    pub fn commit(&self, message: &str) -> &Self {
        self.git(&["add", "--all"]);
        self.git(&["commit", "--quiet", "--allow-empty", "-m", message]);
        self
    }

    pub fn tag(&self, name: &str) -> &Self {
        self.git(&["tag", name]);
        self
    }

    pub fn branch(&self, name: &str) -> &Self {
        self.git(&["checkout", "--quiet", "-B", name]);
        self
    }

    pub fn checkout(&self, name: &str) -> &Self {
        self.git(&["checkout", "--quiet", name]);
        self
    }

    fn git(&self, args: &[&str]) {
        let output = Command::new("git")
            .args([
                "-c",
                "user.name=ARM Tests",
                "-c",
                "user.email=tests@example.com",
                "-c",
                "commit.gpgsign=false",
                "-c",
                "tag.gpgsign=false",
            ])
            .args(args)
            .current_dir(&self.path)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }
}

#[derive(Debug, Clone)]
pub struct Route {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Route {
    pub fn json(body: serde_json::Value) -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.to_string().into_bytes(),
        }
    }

    pub fn bytes(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type".into(), "application/octet-stream".into())],
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: b"{\"message\":\"denied\"}".to_vec(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// One request the server saw
#[derive(Debug, Clone)]
pub struct Recorded {
    pub target: String,
    pub authorization: Option<String>,
}

/// Answers from a route table keyed by request target
///
/// A target with a query string first matches an exact `path?query` route,
/// then falls back to the bare path. Unknown targets get 404.
pub struct TestServer {
    base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl TestServer {
    pub fn start(routes: HashMap<String, Route>) -> Self {
        Self::start_with(|_| routes)
    }

    /// Build the route table from the server's own base URL
    pub fn start_with(build: impl FnOnce(&str) -> HashMap<String, Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let routes = build(&base_url);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut reader = BufReader::new(stream.try_clone().unwrap());

                let mut request_line = String::new();
                if reader.read_line(&mut request_line).is_err() {
                    continue;
                }
                let target = request_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();

                let mut authorization = None;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 {
                        break;
                    }
                    let line = line.trim_end();
                    if line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        if name.eq_ignore_ascii_case("authorization") {
                            authorization = Some(value.trim().to_string());
                        }
                    }
                }

                recorded.lock().unwrap().push(Recorded {
                    target: target.clone(),
                    authorization,
                });

                let path = target.split('?').next().unwrap_or("/");
                let route = routes
                    .get(&target)
                    .or_else(|| routes.get(path))
                    .cloned()
                    .unwrap_or(Route {
                        status: 404,
                        headers: Vec::new(),
                        body: b"{\"message\":\"404 Not Found\"}".to_vec(),
                    });

                let mut head = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                    route.status,
                    reason(route.status),
                    route.body.len()
                );
                for (name, value) in &route.headers {
                    head.push_str(&format!("{name}: {value}\r\n"));
                }
                head.push_str("\r\n");

                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&route.body);
                let _ = stream.flush();
            }
        });

        Self { base_url, requests }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Host and port, as used in `.armrc` GitLab sections
    pub fn authority(&self) -> &str {
        self.base_url.trim_start_matches("http://")
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    }
}

pub const STYLE_V1: &str = r#"apiVersion: v1
kind: Ruleset
metadata:
  id: style
  name: Style
spec:
  rules:
    naming:
      name: Naming
      enforcement: must
      body: Name things well.
"#;

pub const STYLE_V2: &str = r#"apiVersion: v1
kind: Ruleset
metadata:
  id: style
  name: Style
spec:
  rules:
    naming:
      name: Naming
      enforcement: must
      body: Name things well.
    errors:
      name: Errors
      enforcement: should
      body: Propagate errors.
"#;

pub const REVIEW_PROMPTS: &str = r#"apiVersion: v1
kind: Promptset
metadata:
  id: review
  name: Review
spec:
  prompts:
    summary:
      name: Summary
      body: Summarise the change.
"#;

/// In-memory `.tar.gz` with one regular file per entry
pub fn tar_gz(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let encoder = flate2::write::GzEncoder::new(&mut bytes, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, content.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }
    bytes
}
