//! Liveness probes.
//!
//! A probe only decides live-registry membership; it never touches the
//! process. Jobs without a health check use [`AlwaysHealthy`].

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::error::JobError;
use crate::types::{HealthCheckSpec, Protocol};

#[async_trait]
pub trait HealthCheck: Send {
	async fn check(&mut self) -> Result<(), JobError>;
}

/// Picks the prober for a job's (optional) health check.
pub fn for_spec(spec: Option<&HealthCheckSpec>) -> Box<dyn HealthCheck> {
	match spec {
		None => Box::new(AlwaysHealthy),
		Some(hc) => match hc.protocol {
			Protocol::Tcp => Box::new(TcpChecker::new(hc.target.clone(), hc.max_await)),
		},
	}
}

pub struct AlwaysHealthy;

#[async_trait]
impl HealthCheck for AlwaysHealthy {
	async fn check(&mut self) -> Result<(), JobError> {
		Ok(())
	}
}

/// Keeps one connection open to the target and reads from it each check.
///
/// Only dialing can fail a check. A connection that reached end of stream is
/// replaced by a fresh dial; if that dial fails the check fails, otherwise the
/// check passes.
pub struct TcpChecker {
	target: String,
	max_await: Duration,
	conn: Option<TcpStream>,
}

impl TcpChecker {
	pub fn new(target: String, max_await: Duration) -> Self {
		Self {
			target,
			max_await,
			conn: None,
		}
	}

	pub fn is_connected(&self) -> bool {
		self.conn.is_some()
	}

	async fn connect(&mut self) -> Result<(), JobError> {
		let dial = tokio::time::timeout(self.max_await, TcpStream::connect(&self.target)).await;
		let conn = match dial {
			Ok(Ok(conn)) => conn,
			Ok(Err(e)) => return Err(self.failure(e.to_string())),
			Err(_) => {
				return Err(self.failure(format!("dial timed out after {:?}", self.max_await)))
			}
		};
		self.conn = Some(conn);
		Ok(())
	}

	/// True when the held connection is finished and must be replaced.
	async fn is_stale(&mut self) -> bool {
		let Some(conn) = self.conn.as_mut() else {
			return false;
		};
		let mut buf = [0u8; 1];
		match tokio::time::timeout(self.max_await, conn.read(&mut buf)).await {
			Ok(Ok(0)) => true,
			Ok(Ok(_)) => false,
			Ok(Err(e)) => {
				tracing::debug!(addr = %self.target, "health check read error: {}", e);
				true
			}
			// Nothing to read within the deadline: the peer is still there.
			Err(_) => false,
		}
	}

	fn failure(&self, reason: String) -> JobError {
		JobError::Probe {
			target: self.target.clone(),
			reason,
		}
	}
}

#[async_trait]
impl HealthCheck for TcpChecker {
	async fn check(&mut self) -> Result<(), JobError> {
		tracing::debug!(addr = %self.target, "health check");
		if self.conn.is_none() {
			self.connect().await?;
		}
		if self.is_stale().await {
			self.conn = None;
			self.connect().await?;
		}
		Ok(())
	}
}
