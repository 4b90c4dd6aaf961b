// Readiness checks run after a container starts
// Port, log, HTTP and exec strategies share one polling loop

use crate::docker::container::{is_transient_port_error, StartedContainer};
use crate::errors::{DyError, Result};
use crate::ports::{ContainerPort, IntoContainerPort};
use regex::Regex;
use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// A readiness condition checked against a started container
pub trait WaitStrategy: Send + Sync + fmt::Debug {
    /// Short label used in timeout errors and logs
    fn name(&self) -> &'static str;

    /// Block until the container is ready or the timeout elapses
    fn wait_until_ready(&self, container: &StartedContainer) -> Result<()>;
}

/// Timeout and poll interval of a wait strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTiming {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitTiming {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl WaitTiming {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }
}

/// Call `check` until it reports ready, fails, or the timeout passes
fn poll_until<F>(
    container: &StartedContainer,
    strategy: &str,
    timing: WaitTiming,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    let clock = container.clock();
    let started = clock.now();

    loop {
        if check()? {
            tracing::debug!(container = %container.name(), strategy, "container ready");
            return Ok(());
        }

        if clock.elapsed_since(started) >= timing.timeout {
            return Err(DyError::WaitTimeout {
                strategy: strategy.to_string(),
                container: container.name().to_string(),
                timeout: timing.timeout,
            });
        }

        clock.sleep(timing.poll_interval);
    }
}

/// Host port for `port` (or the first exposed port); `None` while bindings
/// are still being published.
fn resolve_host_port(
    container: &StartedContainer,
    port: Option<ContainerPort>,
) -> Result<Option<u16>> {
    let container_port = match port {
        Some(port) => port,
        None => match container.exposed_ports().first() {
            Some(port) => *port,
            None => {
                return Err(DyError::PortNotExposed {
                    container: container.name().to_string(),
                    port: "<any>".to_string(),
                })
            }
        },
    };

    match container.lookup_mapped_port(&container_port) {
        Ok(host_port) => Ok(Some(host_port)),
        Err(e) if is_transient_port_error(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

/// `host:port` with IPv6 literals bracketed
pub fn socket_address(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn is_port_open(host: &str, port: u16) -> bool {
    let Ok(addrs) = socket_address(host, port).to_socket_addrs() else {
        return false;
    };

    addrs
        .into_iter()
        .any(|addr| TcpStream::connect_timeout(&addr, Duration::from_secs(2)).is_ok())
}

/// Ready once a TCP connection to the mapped port succeeds
#[derive(Debug, Clone)]
pub struct WaitForPort {
    port: Option<ContainerPort>,
    timing: WaitTiming,
}

impl WaitForPort {
    /// Wait on the first exposed port
    pub fn first_exposed() -> Self {
        Self {
            port: None,
            timing: WaitTiming::default(),
        }
    }

    pub fn new(port: impl IntoContainerPort) -> Result<Self> {
        Ok(Self::first_exposed().on_port(port.into_container_port()?))
    }

    pub fn on_port(mut self, port: ContainerPort) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_timing(mut self, timing: WaitTiming) -> Self {
        self.timing = timing;
        self
    }
}

impl WaitStrategy for WaitForPort {
    fn name(&self) -> &'static str {
        "port"
    }

    fn wait_until_ready(&self, container: &StartedContainer) -> Result<()> {
        let host = container.host();
        poll_until(container, self.name(), self.timing, || {
            Ok(resolve_host_port(container, self.port)?
                .map(|port| is_port_open(&host, port))
                .unwrap_or(false))
        })
    }
}

#[derive(Debug, Clone)]
enum LogPattern {
    Substring(String),
    Regex(Regex),
}

/// Ready once the container logs contain a message
#[derive(Debug, Clone)]
pub struct WaitForLog {
    pattern: LogPattern,
    timing: WaitTiming,
}

impl WaitForLog {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            pattern: LogPattern::Substring(message.into()),
            timing: WaitTiming::default(),
        }
    }

    /// Match logs against a regular expression; an invalid pattern fails here
    pub fn regex(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| {
            DyError::ConfigError(format!("Invalid log wait pattern '{}': {}", pattern, e))
        })?;
        Ok(Self {
            pattern: LogPattern::Regex(regex),
            timing: WaitTiming::default(),
        })
    }

    pub fn with_timing(mut self, timing: WaitTiming) -> Self {
        self.timing = timing;
        self
    }

    fn matches(&self, logs: &str) -> bool {
        match &self.pattern {
            LogPattern::Substring(message) => logs.contains(message.as_str()),
            LogPattern::Regex(regex) => regex.is_match(logs),
        }
    }
}

impl WaitStrategy for WaitForLog {
    fn name(&self) -> &'static str {
        "log"
    }

    fn wait_until_ready(&self, container: &StartedContainer) -> Result<()> {
        poll_until(container, self.name(), self.timing, || {
            Ok(self.matches(&container.raw_logs()?))
        })
    }
}

/// Ready once an HTTP request to the mapped port answers with the expected status
#[derive(Debug, Clone)]
pub struct WaitForHttp {
    port: Option<ContainerPort>,
    path: String,
    method: reqwest::Method,
    expected_status: u16,
    https: bool,
    allow_insecure: bool,
    headers: Vec<(String, String)>,
    read_timeout: Duration,
    timing: WaitTiming,
}

impl WaitForHttp {
    pub fn new(port: impl IntoContainerPort) -> Result<Self> {
        let mut wait = Self::first_exposed();
        wait.port = Some(port.into_container_port()?);
        Ok(wait)
    }

    pub fn first_exposed() -> Self {
        Self {
            port: None,
            path: "/".to_string(),
            method: reqwest::Method::GET,
            expected_status: 200,
            https: false,
            allow_insecure: false,
            headers: Vec::new(),
            read_timeout: Duration::from_secs(1),
            timing: WaitTiming::default(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        self
    }

    pub fn with_method(mut self, method: &str) -> Result<Self> {
        self.method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| DyError::ConfigError(format!("Invalid HTTP method '{}'", method)))?;
        Ok(self)
    }

    pub fn with_expected_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }

    pub fn using_https(mut self) -> Self {
        self.https = true;
        self
    }

    /// Accept self-signed certificates
    pub fn allow_insecure(mut self) -> Self {
        self.allow_insecure = true;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_timing(mut self, timing: WaitTiming) -> Self {
        self.timing = timing;
        self
    }

    fn url(&self, host: &str, port: u16) -> String {
        let scheme = if self.https { "https" } else { "http" };
        format!("{}://{}{}", scheme, socket_address(host, port), self.path)
    }
}

impl WaitStrategy for WaitForHttp {
    fn name(&self) -> &'static str {
        "http"
    }

    fn wait_until_ready(&self, container: &StartedContainer) -> Result<()> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.read_timeout)
            .danger_accept_invalid_certs(self.allow_insecure)
            .build()?;
        let host = container.host();

        poll_until(container, self.name(), self.timing, || {
            let Some(port) = resolve_host_port(container, self.port)? else {
                return Ok(false);
            };

            let mut request = client.request(self.method.clone(), self.url(&host, port));
            for (name, value) in &self.headers {
                request = request.header(name.as_str(), value.as_str());
            }

            match request.send() {
                Ok(response) => Ok(response.status().as_u16() == self.expected_status),
                Err(e) => {
                    tracing::trace!(error = %e, "http wait request failed");
                    Ok(false)
                }
            }
        })
    }
}

/// Ready once a command inside the container exits with status 0
#[derive(Debug, Clone)]
pub struct WaitForExec {
    command: Vec<String>,
    timing: WaitTiming,
}

impl WaitForExec {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            timing: WaitTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: WaitTiming) -> Self {
        self.timing = timing;
        self
    }
}

impl WaitStrategy for WaitForExec {
    fn name(&self) -> &'static str {
        "exec"
    }

    fn wait_until_ready(&self, container: &StartedContainer) -> Result<()> {
        poll_until(container, self.name(), self.timing, || {
            match container.exec(self.command.iter().cloned()) {
                Ok(result) => Ok(result.successful()),
                // exec can race the container's own startup
                Err(DyError::DockerError(message)) => {
                    tracing::trace!(%message, "exec wait not ready");
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        })
    }
}
