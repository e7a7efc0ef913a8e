//! Gateway supervisor: every configured port, started and stopped together.
//!
//! # Responsibilities
//! - Build one [`ProxyInstance`] per entry (fatal on any failure)
//! - Bind all listeners concurrently: all ports or none
//! - Serve every instance on its own task
//! - On shutdown, drain everything under one shared deadline and force-close
//!   whatever is still open when it passes

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, try_join_all};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::{GatewaySettings, ProxyConfig};
use crate::http::{ProxyError, ProxyInstance};
use crate::lifecycle::shutdown::Shutdown;
use crate::net::ListenerError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no proxy entries configured")]
    Empty,
    #[error("port {0} configured more than once")]
    DuplicatePort(u16),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Every instance, built but not yet listening.
pub struct Gateway {
    instances: Vec<Arc<ProxyInstance>>,
    deadline: Duration,
}

impl Gateway {
    pub fn build(configs: &[ProxyConfig], settings: &GatewaySettings) -> Result<Self, GatewayError> {
        if configs.is_empty() {
            return Err(GatewayError::Empty);
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = configs.iter().find(|c| !seen.insert(c.port)) {
            return Err(GatewayError::DuplicatePort(duplicate.port));
        }

        let instances = configs
            .iter()
            .map(|config| ProxyInstance::new(config, settings).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            instances,
            deadline: settings.shutdown_deadline,
        })
    }

    pub fn instances(&self) -> &[Arc<ProxyInstance>] {
        &self.instances
    }

    /// Bind every port, then start serving.
    pub async fn start(self) -> Result<RunningGateway, GatewayError> {
        let listeners = match try_join_all(self.instances.iter().map(|instance| instance.bind())).await {
            Ok(listeners) => listeners,
            Err(e) => {
                for instance in &self.instances {
                    instance.mark_closed();
                }
                return Err(e.into());
            }
        };

        let shutdown = Shutdown::new();
        let mut tasks = Vec::with_capacity(self.instances.len());
        for (instance, listener) in self.instances.iter().zip(listeners) {
            tracing::info!("{} -> {} hold: {:?}", instance.port(), instance.target(), instance.hold());

            let instance = Arc::clone(instance);
            let signal = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = instance.serve(listener, signal).await {
                    tracing::error!(port = instance.port(), error = %e, "Server error");
                    instance.mark_closed();
                }
            }));
        }

        Ok(RunningGateway {
            instances: self.instances,
            shutdown,
            tasks,
            deadline: self.deadline,
        })
    }
}

/// How a shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownOutcome {
    /// Everything finished before the deadline.
    pub drained: bool,
}

/// Instances serving traffic.
pub struct RunningGateway {
    instances: Vec<Arc<ProxyInstance>>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
    deadline: Duration,
}

impl RunningGateway {
    pub fn instances(&self) -> &[Arc<ProxyInstance>] {
        &self.instances
    }

    /// Serve until `signal` resolves, then shut down.
    pub async fn run_until<F>(self, signal: F) -> ShutdownOutcome
    where
        F: Future<Output = ()>,
    {
        signal.await;
        self.shutdown().await
    }

    /// Stop accepting on every port and drain under the shared deadline.
    pub async fn shutdown(mut self) -> ShutdownOutcome {
        tracing::info!(deadline = ?self.deadline, "Shutting down");
        self.shutdown.trigger();

        let drained = tokio::time::timeout(self.deadline, join_all(self.tasks.iter_mut()))
            .await
            .is_ok();

        if drained {
            tracing::info!("Shutdown complete");
        } else {
            tracing::warn!(deadline = ?self.deadline, "Shutdown deadline elapsed; forcing close");
            for instance in &self.instances {
                instance.force_close();
            }
            for task in &self.tasks {
                task.abort();
            }
            for instance in &self.instances {
                instance.mark_closed();
            }
        }

        ShutdownOutcome { drained }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &std::path::Path) -> GatewaySettings {
        GatewaySettings {
            log_dir: dir.to_path_buf(),
            bind_host: "127.0.0.1".into(),
            ..GatewaySettings::default()
        }
    }

    #[test]
    fn empty_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(Gateway::build(&[], &settings(dir.path())), Err(GatewayError::Empty)));
    }

    #[test]
    fn duplicate_port_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let configs = [
            ProxyConfig::new(18201, "http://localhost:9000"),
            ProxyConfig::new(18201, "http://localhost:9001"),
        ];
        assert!(matches!(
            Gateway::build(&configs, &settings(dir.path())),
            Err(GatewayError::DuplicatePort(18201))
        ));
    }

    #[test]
    fn invalid_target_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let configs = [
            ProxyConfig::new(18202, "http://localhost:9000"),
            ProxyConfig::new(18203, "ftp://localhost"),
        ];
        assert!(matches!(
            Gateway::build(&configs, &settings(dir.path())),
            Err(GatewayError::Proxy(ProxyError::InvalidTarget { port: 18203, .. }))
        ));
    }

    #[tokio::test]
    async fn bind_conflict_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken_port = taken.local_addr().unwrap().port();

        let configs = [
            ProxyConfig::new(18204, "http://localhost:9000"),
            ProxyConfig::new(taken_port, "http://localhost:9000"),
        ];
        let gateway = Gateway::build(&configs, &settings(dir.path())).unwrap();
        let err = gateway.start().await.err().unwrap();
        assert!(matches!(err, GatewayError::Listener(_)));

        // The port that did bind was released again.
        tokio::net::TcpListener::bind("127.0.0.1:18204").await.unwrap();
    }
}
