use std::io::BufRead;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use mr_core::{JobId, JobManager};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	List,
	Restart(String),
	Ignored,
}

impl Command {
	pub fn parse(line: &str) -> Self {
		let mut words = line.split_whitespace();
		match (words.next(), words.next()) {
			(Some("list" | "ls"), _) => Command::List,
			(Some("restart" | "rs"), Some(id)) => Command::Restart(id.to_string()),
			_ => Command::Ignored,
		}
	}
}

/// Reads stdin on a plain thread so a blocked read never holds up runtime
/// shutdown. The channel closes at end of input.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
	let (tx, rx) = mpsc::unbounded_channel();
	std::thread::spawn(move || {
		let stdin = std::io::stdin();
		for line in stdin.lock().lines() {
			let Ok(line) = line else { break };
			if tx.send(line).is_err() {
				break;
			}
		}
	});
	rx
}

/// Serves commands until the input channel closes.
pub async fn run<W>(manager: Arc<JobManager>, mut lines: mpsc::UnboundedReceiver<String>, mut out: W)
where
	W: AsyncWrite + Unpin,
{
	while let Some(line) = lines.recv().await {
		let reply = match Command::parse(&line) {
			Command::List => {
				let mut text = String::new();
				for job in manager.jobs().await {
					text.push_str(&format!("> {} {}\n", job.id, job.name));
				}
				text
			}
			Command::Restart(raw) => match raw.parse::<JobId>() {
				Ok(id) => match manager.restart(id).await {
					Ok(()) => String::new(),
					Err(e) => format!("! {}\n", e),
				},
				Err(_) => format!("! invalid job id: {}\n", raw),
			},
			Command::Ignored => continue,
		};
		if reply.is_empty() {
			continue;
		}
		if let Err(e) = out.write_all(reply.as_bytes()).await {
			tracing::warn!("shell output closed: {}", e);
			break;
		}
		let _ = out.flush().await;
	}
	tracing::debug!("shell input closed");
}

#[cfg(test)]
mod tests {
	use super::*;
	use mr_core::{JobConfig, JobSpec, OutputHub};
	use std::time::Duration;
	use tokio_util::sync::CancellationToken;

	#[test]
	fn parses_commands_and_aliases() {
		assert_eq!(Command::parse("list"), Command::List);
		assert_eq!(Command::parse("  ls  "), Command::List);
		assert_eq!(Command::parse("restart 3"), Command::Restart("3".into()));
		assert_eq!(Command::parse("rs 0"), Command::Restart("0".into()));
		assert_eq!(Command::parse("restart"), Command::Ignored);
		assert_eq!(Command::parse(""), Command::Ignored);
		assert_eq!(Command::parse("stop 1"), Command::Ignored);
	}

	async fn run_script(manager: Arc<JobManager>, input: &[&str]) -> String {
		let (tx, rx) = mpsc::unbounded_channel();
		for line in input {
			tx.send(line.to_string()).unwrap();
		}
		drop(tx);
		let mut out = Vec::new();
		run(manager, rx, &mut out).await;
		String::from_utf8(out).unwrap()
	}

	#[tokio::test]
	async fn lists_jobs_and_reports_errors() {
		let mut job = JobSpec::new("web", "sh");
		job.args = vec!["-c".into(), "sleep 60".into()];
		let manager = JobManager::new(
			JobConfig::new("shell.toml").with_job(job),
			OutputHub::discard(),
			&CancellationToken::new(),
		);
		manager.start_jobs();
		for _ in 0..100 {
			if !manager.jobs().await.is_empty() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(20)).await;
		}

		let text = run_script(
			Arc::clone(&manager),
			&["ls", "hello", "rs 7", "restart nope"],
		)
		.await;
		assert_eq!(
			text,
			"> 0 web\n! job 7 not found\n! invalid job id: nope\n"
		);

		manager.wait_terminate(async {}).await;
	}
}
