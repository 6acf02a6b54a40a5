use owo_colors::{AnsiColors, OwoColorize};
use std::collections::{HashMap, VecDeque};
use std::io::{IsTerminal, Write};
use std::sync::{Arc, Mutex, PoisonError};

const RING_BUFFER_SIZE: usize = 64 * 1024;
const LABEL_WIDTH: usize = 20;
const LABEL_KEEP: usize = 8;

const PALETTE: [AnsiColors; 6] = [
	AnsiColors::BrightBlack,
	AnsiColors::Green,
	AnsiColors::BrightBlue,
	AnsiColors::BrightCyan,
	AnsiColors::BrightGreen,
	AnsiColors::BrightYellow,
];
const ERROR_COLOR: AnsiColors = AnsiColors::Red;

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
	Stdout,
	Stderr,
}

/// Hands out one [`JobOutput`] per (config, job) pair, all writing to the same
/// console.
#[derive(Clone)]
pub struct OutputHub {
	writer: SharedWriter,
	colored: bool,
	state: Arc<Mutex<HubState>>,
}

#[derive(Default)]
struct HubState {
	outputs: HashMap<(String, String), JobOutput>,
	next_color: usize,
}

impl OutputHub {
	pub fn new(writer: Box<dyn Write + Send>, colored: bool) -> Self {
		Self {
			writer: Arc::new(Mutex::new(writer)),
			colored,
			state: Arc::new(Mutex::new(HubState::default())),
		}
	}

	/// Console output, colored when stdout is a terminal.
	pub fn stdout() -> Self {
		let colored = std::io::stdout().is_terminal();
		Self::new(Box::new(std::io::stdout()), colored)
	}

	/// Discards console output. Ring buffers still fill.
	pub fn discard() -> Self {
		Self::new(Box::new(std::io::sink()), false)
	}

	pub fn acquire(&self, config: &str, job: &str) -> JobOutput {
		let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
		let key = (config.to_string(), job.to_string());
		if let Some(existing) = state.outputs.get(&key) {
			return existing.clone();
		}
		let color = PALETTE[state.next_color % PALETTE.len()];
		state.next_color += 1;
		let output = JobOutput {
			label: Arc::from(collapse_label(&format!("{}-{}", config, job))),
			color,
			colored: self.colored,
			ring: Arc::new(Mutex::new(VecDeque::with_capacity(RING_BUFFER_SIZE))),
			writer: Arc::clone(&self.writer),
		};
		state.outputs.insert(key, output.clone());
		output
	}
}

/// Output sink of a single job: prefixed console lines plus a raw ring buffer.
#[derive(Clone)]
pub struct JobOutput {
	label: Arc<str>,
	color: AnsiColors,
	colored: bool,
	ring: Arc<Mutex<VecDeque<u8>>>,
	writer: SharedWriter,
}

impl JobOutput {
	/// Writes one line (without its newline).
	pub fn write_line(&self, stream: Stream, line: &[u8]) {
		{
			let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
			for &byte in line.iter().chain(std::iter::once(&b'\n')) {
				if ring.len() >= RING_BUFFER_SIZE {
					ring.pop_front();
				}
				ring.push_back(byte);
			}
		}

		let text = String::from_utf8_lossy(line);
		let rendered = self.render(stream, &text);
		let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
		let _ = writer.write_all(rendered.as_bytes());
		let _ = writer.flush();
	}

	pub fn snapshot(&self) -> Vec<u8> {
		let ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
		ring.iter().copied().collect()
	}

	fn render(&self, stream: Stream, text: &str) -> String {
		let label = format!("{:<width$}", self.label, width = LABEL_WIDTH);
		if !self.colored {
			return format!("{} | {}\n", label, text);
		}
		let color = match stream {
			Stream::Stdout => self.color,
			Stream::Stderr => ERROR_COLOR,
		};
		format!("{} | {}\n", label.color(color), text.color(color))
	}
}

/// Labels longer than 20 chars keep their first and last 8 around `...`.
pub fn collapse_label(label: &str) -> String {
	let chars: Vec<char> = label.chars().collect();
	if chars.len() <= LABEL_WIDTH {
		return label.to_string();
	}
	let head: String = chars[..LABEL_KEEP].iter().collect();
	let tail: String = chars[chars.len() - LABEL_KEEP..].iter().collect();
	format!("{}...{}", head, tail)
}
