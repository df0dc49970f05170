//! Remote executor: talks to a host's agent over HTTP(S).
//!
//! | Operation | Request |
//! |-----------|---------|
//! | version   | `GET /version` |
//! | initialize | `POST /deployment/{id}/initialize` (zip body) |
//! | execute   | `POST /unit/{id}/{unit}/{command}?packageId=...` (multipart) |
//! | state     | `GET /deployment/{id}/state` |
//! | logs      | `GET /logs/{name}` |
//! | clean     | `POST /deployment/{id}/clean` |
//! | purge     | `DELETE /deployment/{id}/purge` |
//!
//! Requests are never retried. Host names in agent certificates are not
//! verified, agents come and go with the infrastructure they run on.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use semver::Version;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::consts::{MIN_AGENT_VERSION, RECOMMENDED_AGENT_VERSION};

use super::archive::solution_archive;
use super::executor::{CommandRequest, Executor, HostInfo, log_candidates};
use super::state::StateStore;
use super::types::{ExecuteConfig, ExecuteError, TlsConfig};

/// Build the HTTP client shared by all remote executors of a run.
pub(crate) fn build_client(config: &ExecuteConfig) -> Result<Client, ExecuteError> {
  let mut builder = Client::builder()
    .use_rustls_tls()
    .connect_timeout(config.connect_timeout)
    .timeout(config.request_timeout);

  if let Some(tls) = &config.tls {
    builder = with_tls(builder, tls)?;
  }

  builder.build().map_err(|e| ExecuteError::Client(e.to_string()))
}

fn with_tls(builder: reqwest::ClientBuilder, tls: &TlsConfig) -> Result<reqwest::ClientBuilder, ExecuteError> {
  let tls_err = |path: &Path, message: String| ExecuteError::Tls {
    path: path.to_path_buf(),
    message,
  };

  let identity_pem = std::fs::read(&tls.identity).map_err(|e| tls_err(&tls.identity, e.to_string()))?;
  let identity = reqwest::Identity::from_pem(&identity_pem).map_err(|e| tls_err(&tls.identity, e.to_string()))?;

  let trust_pem = std::fs::read(&tls.truststore).map_err(|e| tls_err(&tls.truststore, e.to_string()))?;
  let certificates =
    reqwest::Certificate::from_pem_bundle(&trust_pem).map_err(|e| tls_err(&tls.truststore, e.to_string()))?;
  if certificates.is_empty() {
    return Err(tls_err(&tls.truststore, "no certificates found".to_string()));
  }

  let mut builder = builder.identity(identity).danger_accept_invalid_hostnames(true);
  for certificate in certificates {
    builder = builder.add_root_certificate(certificate);
  }
  Ok(builder)
}

/// Parse an agent version leniently: `v2.4`, `2.4.1-SNAPSHOT`, `2.4.1 (build 17)`.
pub(crate) fn parse_version(text: &str) -> Option<Version> {
  let token = text.split_whitespace().next()?;
  let token = token.strip_prefix('v').unwrap_or(token);
  if let Ok(version) = Version::parse(token) {
    return Some(version);
  }

  let (core, suffix) = match token.find('-') {
    Some(i) => token.split_at(i),
    None => (token, ""),
  };
  let mut parts: Vec<&str> = core.split('.').collect();
  if parts.is_empty() || parts.len() > 3 {
    return None;
  }
  while parts.len() < 3 {
    parts.push("0");
  }
  Version::parse(&format!("{}{suffix}", parts.join("."))).ok()
}

/// Refuse agents below the minimum version, warn below the recommended one.
pub(crate) fn check_agent_version(host: &HostInfo, reported: &str) -> Result<Version, ExecuteError> {
  let version = parse_version(reported).ok_or_else(|| ExecuteError::InvalidAgentVersion {
    host: host.to_string(),
    version: reported.trim().to_string(),
  })?;

  if parse_version(MIN_AGENT_VERSION).is_some_and(|minimum| version < minimum) {
    return Err(ExecuteError::AgentTooOld {
      host: host.to_string(),
      version: version.to_string(),
      minimum: MIN_AGENT_VERSION.to_string(),
    });
  }
  if parse_version(RECOMMENDED_AGENT_VERSION).is_some_and(|recommended| version < recommended) {
    warn!(
      host = %host,
      version = %version,
      recommended = RECOMMENDED_AGENT_VERSION,
      "agent is older than the recommended version"
    );
  }

  Ok(version)
}

#[derive(Debug)]
pub struct RemoteExecutor {
  host: HostInfo,
  base_url: String,
  deployment_id: String,
  client: Client,
}

impl RemoteExecutor {
  pub fn new(host: HostInfo, base_url: impl Into<String>, deployment_id: impl Into<String>, client: Client) -> Self {
    Self {
      host,
      base_url: base_url.into(),
      deployment_id: deployment_id.into(),
      client,
    }
  }

  fn transport(&self, message: impl ToString) -> ExecuteError {
    ExecuteError::Transport {
      host: self.host.to_string(),
      message: message.to_string(),
    }
  }

  fn url(&self, segments: &[&str]) -> Result<Url, ExecuteError> {
    let mut url = Url::parse(&self.base_url).map_err(|e| self.transport(e))?;
    url
      .path_segments_mut()
      .map_err(|_| self.transport(format!("{} cannot carry a path", self.base_url)))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  fn request(&self, method: Method, segments: &[&str]) -> Result<(Url, RequestBuilder), ExecuteError> {
    let url = self.url(segments)?;
    let builder = self.client.request(method, url.clone());
    Ok((url, builder))
  }

  /// Send a request; anything but 200 is an error carrying the response body.
  async fn send(&self, url: &Url, request: RequestBuilder) -> Result<Response, ExecuteError> {
    debug!(host = %self.host, url = %url, "agent request");
    let response = request.send().await.map_err(|e| self.transport(e))?;

    let status = response.status();
    if status != StatusCode::OK {
      let body = response.text().await.unwrap_or_default();
      return Err(ExecuteError::Status {
        host: self.host.to_string(),
        url: url.to_string(),
        status: status.as_u16(),
        body: body.trim().to_string(),
      });
    }
    Ok(response)
  }

  async fn fetch_log(&self, name: &str) -> Result<Option<Vec<u8>>, ExecuteError> {
    let (url, request) = self.request(Method::GET, &["logs", name])?;
    let response = self.send(&url, request).await?;
    let bytes = response.bytes().await.map_err(|e| self.transport(e))?;
    Ok((!bytes.is_empty()).then(|| bytes.to_vec()))
  }
}

#[async_trait]
impl Executor for RemoteExecutor {
  fn host(&self) -> &HostInfo {
    &self.host
  }

  async fn host_available(&self) -> Result<(), ExecuteError> {
    let (url, request) = self.request(Method::GET, &["version"])?;
    let response = self.send(&url, request).await?;
    let reported = response.text().await.map_err(|e| self.transport(e))?;

    let version = check_agent_version(&self.host, &reported)?;
    info!(host = %self.host, version = %version, "agent available");
    Ok(())
  }

  async fn initialize(&self, solution_dir: &Path) -> Result<(), ExecuteError> {
    let solution = solution_dir.to_path_buf();
    let archive = tokio::task::spawn_blocking(move || solution_archive(&solution))
      .await
      .map_err(|e| ExecuteError::Io(std::io::Error::other(e)))??;
    let size = archive.len();

    let (url, request) = self.request(Method::POST, &["deployment", &self.deployment_id, "initialize"])?;
    let request = request.header(reqwest::header::CONTENT_TYPE, "application/zip").body(archive);
    self.send(&url, request).await?;

    info!(host = %self.host, deployment = %self.deployment_id, size, "solution shipped to agent");
    Ok(())
  }

  async fn execute(&self, request: &CommandRequest) -> Result<(), ExecuteError> {
    let command = request.command.to_string();
    let (url, builder) = self.request(Method::POST, &["unit", &request.deployment_id, &request.unit, &command])?;

    let form = Form::new()
      .part(
        "properties",
        Part::bytes(request.properties_bytes()).file_name("properties"),
      )
      .part(
        "prerequisites",
        Part::bytes(request.prerequisites_bytes()).file_name("prerequisites"),
      );
    let builder = builder.query(&[("packageId", request.package.as_str())]).multipart(form);

    self.send(&url, builder).await?;
    info!(host = %self.host, unit = %request.unit, command = %request.command, "command executed by agent");
    Ok(())
  }

  async fn retrieve_state(&self, store: &StateStore) -> Result<(), ExecuteError> {
    let (url, request) = self.request(Method::GET, &["deployment", &self.deployment_id, "state"])?;
    let response = self.send(&url, request).await?;
    let bytes = response.bytes().await.map_err(|e| self.transport(e))?;

    store.merge_remote(&self.host.name, &self.deployment_id, &bytes)?;
    Ok(())
  }

  async fn retrieve_logs(&self, names: &[String], dir: &Path) -> Result<Vec<PathBuf>, ExecuteError> {
    let dest_dir = dir.join(&self.host.name);
    fs::create_dir_all(&dest_dir).await?;

    let mut fetched = Vec::new();
    for name in names {
      let mut found = None;
      for candidate in log_candidates(name) {
        match self.fetch_log(candidate).await {
          Ok(Some(bytes)) => {
            found = Some((candidate, bytes));
            break;
          }
          Ok(None) => debug!(host = %self.host, log = candidate, "log is empty"),
          Err(e) => debug!(host = %self.host, log = candidate, error = %e, "log not retrieved"),
        }
      }

      match found {
        Some((candidate, bytes)) => {
          let dest = dest_dir.join(candidate);
          fs::write(&dest, bytes).await?;
          fetched.push(dest);
        }
        None => warn!(host = %self.host, log = %name, "log not available"),
      }
    }

    Ok(fetched)
  }

  async fn clean(&self) -> Result<(), ExecuteError> {
    let (url, request) = self.request(Method::POST, &["deployment", &self.deployment_id, "clean"])?;
    self.send(&url, request).await?;
    info!(host = %self.host, deployment = %self.deployment_id, "agent cleaned");
    Ok(())
  }

  async fn purge(&self) -> Result<(), ExecuteError> {
    let (url, request) = self.request(Method::DELETE, &["deployment", &self.deployment_id, "purge"])?;
    self.send(&url, request).await?;
    info!(host = %self.host, deployment = %self.deployment_id, "agent purged");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::LifecycleCommand;
  use crate::properties::Properties;
  use mockito::Matcher;
  use tempfile::TempDir;

  fn host() -> HostInfo {
    HostInfo::new("web", "web01", 8443)
  }

  fn executor(server: &mockito::Server) -> RemoteExecutor {
    let client = build_client(&ExecuteConfig::default()).unwrap();
    RemoteExecutor::new(host(), server.url(), "shop", client)
  }

  #[test]
  fn versions_parse_leniently() {
    assert_eq!(parse_version("2.4.1"), Some(Version::new(2, 4, 1)));
    assert_eq!(parse_version("v2.4\n"), Some(Version::new(2, 4, 0)));
    assert_eq!(parse_version("3 (build 7)"), Some(Version::new(3, 0, 0)));
    assert!(parse_version("2.4-SNAPSHOT").is_some_and(|v| !v.pre.is_empty()));
    assert_eq!(parse_version("unknown"), None);
    assert_eq!(parse_version(""), None);
  }

  #[test]
  fn old_agents_are_refused() {
    assert!(matches!(
      check_agent_version(&host(), "1.9.9"),
      Err(ExecuteError::AgentTooOld { .. })
    ));
    assert!(matches!(
      check_agent_version(&host(), "garbage"),
      Err(ExecuteError::InvalidAgentVersion { .. })
    ));
    assert_eq!(check_agent_version(&host(), "2.1.0").unwrap(), Version::new(2, 1, 0));
  }

  #[tokio::test]
  async fn host_available_checks_version() {
    let mut server = mockito::Server::new_async().await;
    let version = server
      .mock("GET", "/version")
      .with_status(200)
      .with_body("2.4.3\n")
      .create_async()
      .await;

    executor(&server).host_available().await.unwrap();
    version.assert_async().await;
  }

  #[tokio::test]
  async fn host_available_refuses_old_agents() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/version")
      .with_status(200)
      .with_body("1.2.0")
      .create_async()
      .await;

    let err = executor(&server).host_available().await.unwrap_err();
    assert!(matches!(err, ExecuteError::AgentTooOld { .. }));
  }

  #[tokio::test]
  async fn execute_posts_both_payloads() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/unit/shop/app/install")
      .match_query(Matcher::UrlEncoded("packageId".into(), "app-pkg".into()))
      .match_body(Matcher::AllOf(vec![
        Matcher::Regex("name=\"properties\"".into()),
        Matcher::Regex("port=8080".into()),
        Matcher::Regex("name=\"prerequisites\"".into()),
        Matcher::Regex("db._unit.id=db".into()),
      ]))
      .with_status(200)
      .create_async()
      .await;

    let request = CommandRequest {
      deployment_id: "shop".to_string(),
      unit: "app".to_string(),
      command: LifecycleCommand::Install,
      package: "app-pkg".to_string(),
      properties: Properties::from([("port".to_string(), "8080".to_string())]),
      prerequisites: Properties::from([("db._unit.id".to_string(), "db".to_string())]),
    };
    executor(&server).execute(&request).await.unwrap();
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn non_200_carries_the_error_body() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/unit/shop/app/start")
      .match_query(Matcher::Any)
      .with_status(500)
      .with_body("package app-pkg has no start script")
      .create_async()
      .await;

    let request = CommandRequest {
      deployment_id: "shop".to_string(),
      unit: "app".to_string(),
      command: LifecycleCommand::Start,
      package: "app-pkg".to_string(),
      properties: Properties::new(),
      prerequisites: Properties::new(),
    };
    let err = executor(&server).execute(&request).await.unwrap_err();
    match err {
      ExecuteError::Status { status, body, .. } => {
        assert_eq!(status, 500);
        assert_eq!(body, "package app-pkg has no start script");
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[tokio::test]
  async fn initialize_ships_zip() {
    let solution = TempDir::new().unwrap();
    std::fs::create_dir_all(solution.path().join("packages/app")).unwrap();
    std::fs::write(solution.path().join("packages/app/install.sh"), "true").unwrap();

    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/deployment/shop/initialize")
      .match_header("content-type", "application/zip")
      .match_body(Matcher::Regex("packages/app/install.sh".into()))
      .with_status(200)
      .create_async()
      .await;

    executor(&server).initialize(solution.path()).await.unwrap();
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn state_is_merged_into_store() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/deployment/shop/state")
      .with_status(200)
      .with_body("opaque-state")
      .create_async()
      .await;
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path());

    executor(&server).retrieve_state(&store).await.unwrap();
    let stored = std::fs::read(dir.path().join("web01").join("shop.remote")).unwrap();
    assert_eq!(stored, b"opaque-state");
  }

  #[tokio::test]
  async fn missing_logs_fall_back() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/logs/install.log")
      .with_status(404)
      .create_async()
      .await;
    server
      .mock("GET", "/logs/agent.log")
      .with_status(200)
      .with_body("agent says hi")
      .create_async()
      .await;
    let dir = TempDir::new().unwrap();

    let fetched = executor(&server)
      .retrieve_logs(&["install.log".to_string()], dir.path())
      .await
      .unwrap();
    assert_eq!(fetched, vec![dir.path().join("web01").join("agent.log")]);
    assert_eq!(std::fs::read_to_string(&fetched[0]).unwrap(), "agent says hi");
  }

  #[tokio::test]
  async fn missing_agent_log_is_requested_once() {
    let mut server = mockito::Server::new_async().await;
    let agent_log = server
      .mock("GET", "/logs/agent.log")
      .with_status(404)
      .expect(1)
      .create_async()
      .await;
    let dir = TempDir::new().unwrap();

    let fetched = executor(&server)
      .retrieve_logs(&["agent.log".to_string()], dir.path())
      .await
      .unwrap();
    assert!(fetched.is_empty());
    agent_log.assert_async().await;
  }

  #[tokio::test]
  async fn clean_and_purge_use_deployment_endpoints() {
    let mut server = mockito::Server::new_async().await;
    let clean = server
      .mock("POST", "/deployment/shop/clean")
      .with_status(200)
      .create_async()
      .await;
    let purge = server
      .mock("DELETE", "/deployment/shop/purge")
      .with_status(200)
      .create_async()
      .await;

    let executor = executor(&server);
    executor.clean().await.unwrap();
    executor.purge().await.unwrap();
    clean.assert_async().await;
    purge.assert_async().await;
  }

  #[test]
  fn unreadable_tls_material_is_reported() {
    let config = ExecuteConfig {
      tls: Some(TlsConfig {
        identity: PathBuf::from("/nonexistent/identity.pem"),
        truststore: PathBuf::from("/nonexistent/trust.pem"),
      }),
      ..ExecuteConfig::default()
    };
    assert!(matches!(build_client(&config), Err(ExecuteError::Tls { .. })));
  }
}
