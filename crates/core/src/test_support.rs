//! Scripted collaborators shared by the unit tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::deploy::{ArtifactSet, DeploymentBuilder, PackagedOutput};
use crate::error::{BuildError, GenerationError, SearchError, SearchErrorKind};
use crate::generation::{GenerationRequest, Generator};
use crate::search::{SearchHit, SearchProvider};

/// What a scripted search call does
#[derive(Debug, Clone)]
pub enum SearchScript {
    Hits(usize),
    Fail(SearchErrorKind),
    /// Sleep, then return hits
    Delay(Duration, usize),
    Panic,
    /// Never returns
    Hang,
}

/// Search provider whose behavior is chosen per query by substring rules
pub struct ScriptedSearch {
    default: SearchScript,
    rules: Vec<(String, SearchScript)>,
    calls: AtomicUsize,
}

impl ScriptedSearch {
    pub fn new(default: SearchScript) -> Self {
        Self {
            default,
            rules: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(hits: usize) -> Self {
        Self::new(SearchScript::Hits(hits))
    }

    /// Queries containing `needle` follow `script` instead of the default
    pub fn with_rule(mut self, needle: &str, script: SearchScript) -> Self {
        self.rules.push((needle.to_string(), script));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn script_for(&self, query: &str) -> SearchScript {
        self.rules
            .iter()
            .find(|(needle, _)| query.contains(needle.as_str()))
            .map(|(_, script)| script.clone())
            .unwrap_or_else(|| self.default.clone())
    }
}

fn hits(query: &str, n: usize) -> Vec<SearchHit> {
    (0..n)
        .map(|i| SearchHit {
            title: format!("{} #{}", query, i),
            snippet: format!("About {}", query),
            url: format!("https://example.com/{}/{}", query.replace(' ', "-"), i),
        })
        .collect()
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script_for(query) {
            SearchScript::Hits(n) => Ok(hits(query, n.min(max_results))),
            SearchScript::Fail(kind) => Err(SearchError::new(kind, "scripted failure")),
            SearchScript::Delay(delay, n) => {
                tokio::time::sleep(delay).await;
                Ok(hits(query, n.min(max_results)))
            }
            SearchScript::Panic => panic!("scripted provider panic"),
            SearchScript::Hang => std::future::pending().await,
        }
    }
}

/// What a scripted generation call does
#[derive(Debug, Clone)]
pub enum GenScript {
    Text(String),
    Fail(String),
    Delay(Duration),
    Hang,
}

/// Generator that answers by role and records every request
pub struct ScriptedGenerator {
    rules: Vec<(String, GenScript)>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_role(mut self, role: &str, script: GenScript) -> Self {
        self.rules.push((role.to_string(), script));
        self
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Default output: a small two-file site from the engineer, prose from everyone else
    fn default_output(role: &str) -> String {
        match role {
            "engineer" => "Here is the code.\n\n```html index.html\n<!doctype html>\n<html><body><ul id=\"todos\"></ul>\n<script src=\"app.js\"></script>\n</body></html>\n```\n\n```js app.js\nexport const todos = [];\n```\n".to_string(),
            other => format!("## {} notes\n\nDone.", other),
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        let role = request.role.as_str();
        let script = self
            .rules
            .iter()
            .find(|(r, _)| r == role)
            .map(|(_, s)| s.clone());

        match script {
            None => Ok(Self::default_output(role)),
            Some(GenScript::Text(text)) => Ok(text),
            Some(GenScript::Fail(message)) => Err(GenerationError::Provider(message)),
            Some(GenScript::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(Self::default_output(role))
            }
            Some(GenScript::Hang) => std::future::pending().await,
        }
    }
}

/// Builder that records what it was asked to package
pub struct RecordingBuilder {
    outcome: Result<PackagedOutput, BuildError>,
    seen: Mutex<Vec<ArtifactSet>>,
}

impl RecordingBuilder {
    pub fn succeeding(package_ref: &str) -> Self {
        Self {
            outcome: Ok(PackagedOutput {
                package_ref: package_ref.to_string(),
                root: package_ref.into(),
                entrypoint: package_ref.into(),
                file_count: 0,
            }),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(err: BuildError) -> Self {
        Self {
            outcome: Err(err),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<ArtifactSet> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeploymentBuilder for RecordingBuilder {
    async fn build(&self, artifacts: &ArtifactSet, _project_type: &str) -> Result<PackagedOutput, BuildError> {
        self.seen.lock().unwrap().push(artifacts.clone());
        self.outcome.clone()
    }
}

/// Serve `router` on an ephemeral local port and return its base URL
pub async fn serve_stub(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
