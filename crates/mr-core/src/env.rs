use std::path::Path;

use crate::error::JobError;
use crate::types::EnvSource;

/// Resolves a job's extra environment. Inline lists are returned as-is.
pub async fn resolve(name: &str, source: &EnvSource) -> Result<Vec<String>, JobError> {
	match source {
		EnvSource::Inline(entries) => Ok(entries.clone()),
		EnvSource::File(path) => read_env_file(name, path).await,
	}
}

async fn read_env_file(name: &str, path: &Path) -> Result<Vec<String>, JobError> {
	let content = tokio::fs::read_to_string(path)
		.await
		.map_err(|source| JobError::EnvFile {
			name: name.to_string(),
			path: path.to_path_buf(),
			source,
		})?;
	Ok(parse_env_lines(&content))
}

/// Keeps every line that is neither blank nor a comment.
///
/// Detection looks at the line trimmed of spaces, CR and LF, but the kept
/// entry is the untrimmed line, so `KEY=v  ` keeps its trailing spaces.
pub fn parse_env_lines(content: &str) -> Vec<String> {
	content
		.lines()
		.filter(|line| {
			let trimmed = line.trim_matches(|c| c == ' ' || c == '\r' || c == '\n');
			!line.is_empty() && !trimmed.is_empty() && !trimmed.starts_with('#')
		})
		.map(str::to_string)
		.collect()
}

/// Splits `KEY=VALUE` entries for `Command::envs`. Later keys win.
pub fn pairs(entries: &[String]) -> Vec<(String, String)> {
	entries
		.iter()
		.filter_map(|entry| match entry.split_once('=') {
			Some((key, value)) if !key.is_empty() => Some((key.to_string(), value.to_string())),
			_ => {
				tracing::warn!("skipping env entry without KEY=VALUE form: {:?}", entry);
				None
			}
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn drops_blank_and_comment_lines_keeping_raw_text() {
		let content = "KEY=1\n  \n# comment\nKEY2=2  \n";
		assert_eq!(parse_env_lines(content), vec!["KEY=1", "KEY2=2  "]);
	}

	#[test]
	fn indented_comment_and_crlf_are_handled() {
		let content = "A=1\r\n   # indented comment\r\n\r\nB=2\r\n";
		assert_eq!(parse_env_lines(content), vec!["A=1", "B=2"]);
	}

	#[test]
	fn leading_space_is_preserved() {
		assert_eq!(parse_env_lines("  PAD=x"), vec!["  PAD=x"]);
	}

	#[test]
	fn pairs_split_on_first_equals() {
		let entries = vec![
			"URL=postgres://u:p@h/db?a=b".to_string(),
			"EMPTY=".to_string(),
			"garbage".to_string(),
		];
		assert_eq!(
			pairs(&entries),
			vec![
				("URL".to_string(), "postgres://u:p@h/db?a=b".to_string()),
				("EMPTY".to_string(), String::new()),
			]
		);
	}

	#[tokio::test]
	async fn inline_source_is_verbatim() {
		let src = EnvSource::Inline(vec!["A=1".into(), "# not a comment here".into()]);
		let env = resolve("web", &src).await.unwrap();
		assert_eq!(env, vec!["A=1", "# not a comment here"]);
	}

	#[tokio::test]
	async fn missing_file_is_an_env_error() {
		let src = EnvSource::File("/definitely/not/here/.env".into());
		let err = resolve("web", &src).await.unwrap_err();
		assert!(matches!(err, JobError::EnvFile { .. }));
		assert_eq!(err.as_label(), "start_env_file");
	}
}
