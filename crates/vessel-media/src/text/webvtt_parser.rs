//! WebVTT file parser, the origin handler of every text chain.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use vessel_core::error::{PackagerError, Result};
use vessel_core::handler::{
    MediaHandler, OriginHandler, OutputSlot, StreamData, StreamInfo, StreamType, TextSample,
};
use vessel_core::io;

use super::parse_timestamp;

const NAME: &str = "webvtt_parser";

pub struct WebVttParser {
    input: String,
    language: String,
    next: OutputSlot,
    eos: Mutex<bool>,
}

impl WebVttParser {
    pub fn new(input: &str, language: &str) -> Self {
        Self {
            input: input.to_string(),
            language: language.to_string(),
            next: OutputSlot::new(),
            eos: Mutex::new(false),
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }
}

/// Parse a whole WebVTT document into cues.  Comment (`NOTE`), `STYLE` and
/// `REGION` blocks are skipped; `X-TIMESTAMP-MAP` headers are ignored.
pub fn parse_document(content: &str) -> Result<Vec<TextSample>> {
    let content = content.trim_start_matches('\u{FEFF}');
    let mut lines = content.lines();

    match lines.next() {
        Some(first) if first.trim_end().starts_with("WEBVTT") => {}
        _ => {
            return Err(PackagerError::ParserFailure(
                "Missing WEBVTT file header".into(),
            ));
        }
    }

    let mut cues = Vec::new();
    let mut block: Vec<&str> = Vec::new();
    for line in lines.chain(std::iter::once("")) {
        if !line.trim().is_empty() {
            block.push(line);
            continue;
        }
        if block.is_empty() {
            continue;
        }
        if let Some(cue) = parse_block(&block)? {
            cues.push(cue);
        }
        block.clear();
    }
    Ok(cues)
}

fn parse_block(block: &[&str]) -> Result<Option<TextSample>> {
    let first = block[0].trim();
    if first.starts_with("NOTE") || first.starts_with("STYLE") || first.starts_with("REGION") {
        return Ok(None);
    }
    if first.starts_with("X-TIMESTAMP-MAP") {
        return Ok(None);
    }

    let (id, timing_index) = if block[0].contains("-->") {
        (String::new(), 0)
    } else if block.len() > 1 && block[1].contains("-->") {
        (block[0].trim().to_string(), 1)
    } else {
        return Err(PackagerError::ParserFailure(format!(
            "Cue block without a timing line: '{}'",
            block[0]
        )));
    };

    let timing = block[timing_index];
    let (start_text, rest) = timing.split_once("-->").ok_or_else(|| {
        PackagerError::ParserFailure(format!("Malformed cue timing: '{timing}'"))
    })?;
    let rest = rest.trim_start();
    let (end_text, settings) = match rest.split_once(char::is_whitespace) {
        Some((end, settings)) => (end, settings.trim().to_string()),
        None => (rest, String::new()),
    };

    let start_ms = parse_timestamp(start_text).ok_or_else(|| {
        PackagerError::ParserFailure(format!("Bad cue start time: '{}'", start_text.trim()))
    })?;
    let end_ms = parse_timestamp(end_text).ok_or_else(|| {
        PackagerError::ParserFailure(format!("Bad cue end time: '{}'", end_text.trim()))
    })?;
    if end_ms <= start_ms {
        return Err(PackagerError::ParserFailure(format!(
            "Cue end must be after start: '{timing}'"
        )));
    }

    Ok(Some(TextSample {
        id,
        start_ms,
        end_ms,
        settings,
        payload: block[timing_index + 1..].join("\n"),
    }))
}

impl MediaHandler for WebVttParser {
    fn name(&self) -> &'static str {
        NAME
    }

    fn connect(&self, downstream: Arc<dyn MediaHandler>) -> Result<()> {
        self.next.bind(NAME, downstream)
    }

    fn initialize(&self) -> Result<()> {
        self.next.initialize(NAME)
    }

    fn handle(&self, _data: StreamData) -> Result<()> {
        Err(PackagerError::Chain(
            "webvtt parser is an origin and accepts no upstream data".into(),
        ))
    }

    fn flush(&self) -> Result<()> {
        let mut eos = self.eos.lock().unwrap();
        if *eos {
            return Ok(());
        }
        *eos = true;
        drop(eos);
        self.next.flush(NAME)
    }
}

impl OriginHandler for WebVttParser {
    fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let content = io::read_to_string(&self.input)?;
        let cues = parse_document(&content).map_err(|e| {
            PackagerError::ParserFailure(format!("Failed to parse {}: {e}", self.input))
        })?;
        tracing::info!(input = %self.input, cues = cues.len(), "WebVTT parsed");

        let mut info = StreamInfo::new(StreamType::Text, 1000, "wvtt");
        info.language = self.language.clone();
        self.next.send(NAME, StreamData::StreamInfo(Arc::new(info)))?;

        for cue in cues {
            if cancel.is_cancelled() {
                return Err(PackagerError::Cancelled);
            }
            self.next
                .send(NAME, StreamData::TextSample(Arc::new(cue)))?;
        }
        self.flush()
    }
}
