use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use netexpect_common::{CliProfile, NamedPattern, NetexpectError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::*;
use uuid::Uuid;

use crate::expect::{expect, ExpectError, ExpectSet};
use crate::{ReadBuffer, Streamer, Trace};

/// Cap on the opportunistic read that collects the tail of an error line.
const ERROR_TAIL_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdStatus {
    Ok,
    /// One of the device's error patterns matched. This is a result, not a
    /// failure; the caller decides whether it is fatal.
    ErrorDetected,
}

#[derive(Debug, Clone)]
pub struct CmdResult {
    pub output: Bytes,
    pub status: CmdStatus,
    /// Name of the error pattern that fired, when `status` is
    /// [`CmdStatus::ErrorDetected`].
    pub error_pattern: Option<String>,
}

impl CmdResult {
    pub fn output_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }

    /// Escalate a detected device error into a failure.
    pub fn into_result(self) -> Result<CmdResult, NetexpectError> {
        match self.status {
            CmdStatus::Ok => Ok(self),
            CmdStatus::ErrorDetected => Err(NetexpectError::Device {
                pattern: self.error_pattern.unwrap_or_default(),
                output: self.output,
            }),
        }
    }
}

pub type QuestionHandler = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Session-wide defaults; every field can be overridden per call through
/// [`CmdOpts`].
#[derive(Clone)]
pub struct DeviceOptions {
    /// Resets on every batch of bytes received.
    pub read_timeout: Duration,
    /// Hard overall bound for one command.
    pub cmd_timeout: Duration,
    pub trim_echo: bool,
    pub enable_pager: bool,
    pub question_handler: Option<QuestionHandler>,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            cmd_timeout: Duration::from_secs(60),
            trim_echo: true,
            enable_pager: true,
            question_handler: None,
        }
    }
}

/// Per-call overrides and dialog answers.
#[derive(Clone, Default)]
pub struct CmdOpts {
    pub read_timeout: Option<Duration>,
    pub cmd_timeout: Option<Duration>,
    /// `(question regex, answer)` pairs, tried in order. The regexes also
    /// join the expect bank as question patterns.
    pub answers: Vec<(String, String)>,
    pub question_handler: Option<QuestionHandler>,
    pub trim_echo: Option<bool>,
    pub enable_pager: Option<bool>,
    /// Extra error patterns for this call only.
    pub error_patterns: Vec<NamedPattern>,
    /// Replaces the session prompt pattern for this call.
    pub prompt: Option<String>,
}

impl CmdOpts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_answer<Q: Into<String>, A: Into<String>>(mut self, question: Q, answer: A) -> Self {
        self.answers.push((question.into(), answer.into()));
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_cmd_timeout(mut self, timeout: Duration) -> Self {
        self.cmd_timeout = Some(timeout);
        self
    }

    pub fn with_question_handler(mut self, handler: QuestionHandler) -> Self {
        self.question_handler = Some(handler);
        self
    }

    pub fn with_error_pattern(mut self, pattern: NamedPattern) -> Self {
        self.error_patterns.push(pattern);
        self
    }

    pub fn with_prompt<P: Into<String>>(mut self, pattern: P) -> Self {
        self.prompt = Some(pattern.into());
        self
    }

    pub fn keep_echo(mut self) -> Self {
        self.trim_echo = Some(false);
        self
    }

    pub fn no_pager(mut self) -> Self {
        self.enable_pager = Some(false);
        self
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BankKind {
    Error,
    Question,
    Pager,
    Prompt,
}

/// One interactive session with a device: a transport, the shared read
/// buffer, and the profile's pattern vocabulary.
///
/// Not re-entrant; one command runs at a time, which `&mut self` enforces.
pub struct Device {
    id: Uuid,
    transport: Box<dyn Streamer>,
    profile: CliProfile,
    options: DeviceOptions,
    buffer: ReadBuffer,
    cancel: CancellationToken,
    /// Effective prompt pattern; replaced by a tightened variant after
    /// discovery when the profile marks a stable group.
    prompt_pattern: String,
    connected: bool,
}

impl Device {
    pub fn new(transport: impl Streamer + 'static, profile: CliProfile) -> Self {
        Self::with_options(transport, profile, DeviceOptions::default())
    }

    pub fn with_options(
        transport: impl Streamer + 'static,
        profile: CliProfile,
        options: DeviceOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transport: Box::new(transport),
            prompt_pattern: profile.prompt.clone(),
            profile,
            options,
            buffer: ReadBuffer::new(),
            cancel: CancellationToken::new(),
            connected: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cancelling this token aborts the in-flight command (or connect) with
    /// [`NetexpectError::Cancelled`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn set_trace(&mut self, trace: Trace) {
        self.transport.set_trace(trace);
    }

    /// Open the transport, discover the prompt, run the profile's terminal
    /// setup commands.
    pub async fn connect(&mut self) -> Result<(), NetexpectError> {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(NetexpectError::Cancelled {
                    command: "connect".into(),
                    output: Bytes::new(),
                })
            }
            result = self.transport.connect() => result?,
        }
        self.discover_prompt().await?;
        self.connected = true;
        info!(session=%self.id, "connected");

        for command in self.profile.terminal_setup.clone() {
            let result = self.cmd(&command).await?;
            if result.status == CmdStatus::ErrorDetected {
                warn!(session=%self.id, command=%command, "terminal setup command rejected");
            }
        }
        Ok(())
    }

    /// Nudge the device with a newline and wait for the first prompt.
    async fn discover_prompt(&mut self) -> Result<(), NetexpectError> {
        let mut set = ExpectSet::new();
        set.add("prompt", &self.profile.prompt)?;

        self.transport.write(b"\n").await?;
        let deadline = Instant::now() + self.options.cmd_timeout;
        let found = expect(
            self.transport.as_mut(),
            &mut self.buffer,
            &set,
            self.options.read_timeout,
            deadline,
            &self.cancel,
        )
        .await
        .map_err(|error| match error {
            ExpectError::Timeout => NetexpectError::PromptNotFound {
                output: self.buffer.take_all(),
            },
            ExpectError::Cancelled => NetexpectError::Cancelled {
                command: "connect".into(),
                output: self.buffer.take_all(),
            },
            ExpectError::Closed => NetexpectError::Closed,
            ExpectError::Transport(error) => error,
        })?;

        if let Some(suffix) = found.named_group("stable") {
            let literal = String::from_utf8_lossy(suffix);
            if let Some(tightened) = tighten_prompt(&self.profile.prompt, &literal) {
                debug!(session=%self.id, suffix=%literal, "tightened prompt pattern");
                self.prompt_pattern = tightened;
            }
        }
        self.buffer.skip(found.end);
        Ok(())
    }

    pub async fn cmd(&mut self, command: &str) -> Result<CmdResult, NetexpectError> {
        self.cmd_with(command, CmdOpts::default()).await
    }

    pub async fn cmd_with(
        &mut self,
        command: &str,
        opts: CmdOpts,
    ) -> Result<CmdResult, NetexpectError> {
        if !self.connected {
            return Err(NetexpectError::Closed);
        }

        let read_timeout = opts.read_timeout.unwrap_or(self.options.read_timeout);
        let cmd_timeout = opts.cmd_timeout.unwrap_or(self.options.cmd_timeout);
        let trim_echo = opts.trim_echo.unwrap_or(self.options.trim_echo);
        let enable_pager = opts.enable_pager.unwrap_or(self.options.enable_pager);
        let deadline = Instant::now() + cmd_timeout;

        let (bank, kinds) = self.pattern_bank(&opts, enable_pager)?;
        let mut prompt_only = ExpectSet::new();
        prompt_only.add("prompt", opts.prompt.as_deref().unwrap_or(&self.prompt_pattern))?;

        let answers = opts
            .answers
            .iter()
            .map(|(question, answer)| {
                Ok((regex::bytes::Regex::new(question)?, answer.clone()))
            })
            .collect::<Result<Vec<_>, NetexpectError>>()?;
        let question_handler = opts
            .question_handler
            .clone()
            .or_else(|| self.options.question_handler.clone());

        debug!(session=%self.id, command=%command, "running command");
        self.transport.write(command.as_bytes()).await?;
        self.transport.write(b"\n").await?;

        let mut output = BytesMut::new();
        // Set right after a pager continue: the erasing control bytes that
        // follow the pager token do not belong in the output.
        let mut strip_controls = false;

        let matched_error = loop {
            let found = match expect(
                self.transport.as_mut(),
                &mut self.buffer,
                &bank,
                read_timeout,
                deadline,
                &self.cancel,
            )
            .await
            {
                Ok(found) => found,
                Err(ExpectError::Timeout) => {
                    append_segment(&mut output, self.buffer.take_all(), &mut strip_controls);
                    return Err(NetexpectError::Timeout {
                        command: command.into(),
                        output: output.freeze(),
                    });
                }
                Err(ExpectError::Cancelled) => {
                    append_segment(&mut output, self.buffer.take_all(), &mut strip_controls);
                    return Err(NetexpectError::Cancelled {
                        command: command.into(),
                        output: output.freeze(),
                    });
                }
                Err(ExpectError::Closed) => return Err(NetexpectError::Closed),
                Err(ExpectError::Transport(error)) => return Err(error),
            };

            match kinds[found.index] {
                BankKind::Prompt => {
                    let pre = self.buffer.take(found.start);
                    append_segment(&mut output, pre, &mut strip_controls);
                    self.buffer.skip(found.end - found.start);
                    break None;
                }
                BankKind::Error => {
                    debug!(session=%self.id, pattern=%found.name, "device error matched");
                    let segment = self.buffer.take(found.end);
                    append_segment(&mut output, segment, &mut strip_controls);
                    self.slurp_error_tail(&mut output, &prompt_only, &mut strip_controls)
                        .await;
                    break Some(found.name);
                }
                BankKind::Question => {
                    let segment = self.buffer.take(found.end);
                    let question = String::from_utf8_lossy(&segment[found.start..]).into_owned();
                    append_segment(&mut output, segment, &mut strip_controls);

                    let answer = answers
                        .iter()
                        .find(|(pattern, _)| pattern.is_match(question.as_bytes()))
                        .map(|(_, answer)| answer.clone())
                        .or_else(|| question_handler.as_ref().and_then(|h| h(&question)));
                    let Some(answer) = answer else {
                        return Err(NetexpectError::UnansweredQuestion {
                            command: command.into(),
                            question,
                        });
                    };
                    debug!(session=%self.id, question=%question, "answering question");
                    self.transport.write(answer.as_bytes()).await?;
                    self.transport.write(b"\n").await?;
                }
                BankKind::Pager => {
                    let pre = self.buffer.take(found.start);
                    append_segment(&mut output, pre, &mut strip_controls);
                    self.buffer.skip(found.end - found.start);
                    self.transport
                        .write(self.profile.pager_continue.as_bytes())
                        .await?;
                    strip_controls = true;
                }
            }
        };

        let mut output = output.freeze();
        if trim_echo {
            output = trim_echo_line(output, command);
        }
        Ok(match matched_error {
            Some(name) => CmdResult {
                output,
                status: CmdStatus::ErrorDetected,
                error_pattern: Some(name),
            },
            None => CmdResult {
                output,
                status: CmdStatus::Ok,
                error_pattern: None,
            },
        })
    }

    /// See [`Streamer::download`].
    pub async fn download(
        &mut self,
        paths: &[String],
    ) -> Result<HashMap<String, Bytes>, NetexpectError> {
        self.transport.download(paths).await
    }

    /// See [`Streamer::upload`].
    pub async fn upload(&mut self, files: HashMap<String, Bytes>) -> Result<(), NetexpectError> {
        self.transport.upload(files).await
    }

    /// Idempotent; the first call closes the transport, later calls are
    /// no-ops.
    pub async fn close(&mut self) -> Result<(), NetexpectError> {
        if !self.connected {
            debug!(session=%self.id, "already closed");
            return Ok(());
        }
        self.connected = false;
        self.transport.close().await
    }

    /// The full bank for one command, priority order: errors, questions,
    /// pagers, prompt. Priority here means tie-breaks; the earliest match
    /// in the stream still wins overall.
    fn pattern_bank(
        &self,
        opts: &CmdOpts,
        enable_pager: bool,
    ) -> Result<(ExpectSet, Vec<BankKind>), NetexpectError> {
        let mut set = ExpectSet::new();
        let mut kinds = Vec::new();

        for NamedPattern { name, pattern } in
            self.profile.errors.iter().chain(opts.error_patterns.iter())
        {
            set.add(name, pattern)?;
            kinds.push(BankKind::Error);
        }
        for pattern in &self.profile.questions {
            set.add("question", pattern)?;
            kinds.push(BankKind::Question);
        }
        for (pattern, _) in &opts.answers {
            set.add("question", pattern)?;
            kinds.push(BankKind::Question);
        }
        if enable_pager {
            if let Some(pattern) = &self.profile.pager {
                set.add("pager", pattern)?;
                kinds.push(BankKind::Pager);
            }
        }
        set.add("prompt", opts.prompt.as_deref().unwrap_or(&self.prompt_pattern))?;
        kinds.push(BankKind::Prompt);

        Ok((set, kinds))
    }

    /// One opportunistic read after an error match, so the rest of the
    /// error line makes it into the output. Cut just before the prompt if
    /// one is already visible.
    async fn slurp_error_tail(
        &mut self,
        output: &mut BytesMut,
        prompt: &ExpectSet,
        strip_controls: &mut bool,
    ) {
        let mut chunk = [0u8; 4096];
        if let Ok(Ok(n)) =
            tokio::time::timeout(ERROR_TAIL_TIMEOUT, self.transport.read(&mut chunk)).await
        {
            if n > 0 {
                self.buffer.append(&chunk[..n]);
            }
        }
        match prompt.match_earliest(self.buffer.pending()) {
            Some(found) => {
                let pre = self.buffer.take(found.start);
                append_segment(output, pre, strip_controls);
                self.buffer.skip(found.end - found.start);
            }
            None => {
                let rest = self.buffer.take_all();
                append_segment(output, rest, strip_controls);
            }
        }
    }
}

fn append_segment(output: &mut BytesMut, segment: Bytes, strip_controls: &mut bool) {
    if segment.is_empty() {
        return;
    }
    let mut bytes: &[u8] = &segment;
    if *strip_controls {
        while let [b'\r' | b'\0' | 0x08, rest @ ..] = bytes {
            bytes = rest;
        }
        *strip_controls = false;
    }
    output.extend_from_slice(bytes);
}

/// Strip the leading line iff it is exactly the echoed command.
fn trim_echo_line(output: Bytes, command: &str) -> Bytes {
    let bytes: &[u8] = &output;
    let (line, rest_at) = match bytes.iter().position(|b| *b == b'\n') {
        Some(pos) => (&bytes[..pos], pos + 1),
        None => (bytes, bytes.len()),
    };
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line == command.as_bytes() {
        output.slice(rest_at..)
    } else {
        output
    }
}

/// Replace the body of the `(?P<stable>...)` group with a literal, keeping
/// the surrounding pattern. Returns `None` when the pattern has no such
/// group (or it cannot be delimited).
fn tighten_prompt(pattern: &str, literal: &str) -> Option<String> {
    const MARKER: &str = "(?P<stable>";
    let start = pattern.find(MARKER)?;
    let body_start = start + MARKER.len();

    let mut depth = 1usize;
    let mut escaped = false;
    for (offset, ch) in pattern[body_start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    let mut tightened = String::with_capacity(pattern.len() + literal.len());
                    tightened.push_str(&pattern[..body_start]);
                    tightened.push_str(&regex::escape(literal));
                    tightened.push_str(&pattern[body_start + offset..]);
                    return Some(tightened);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockStreamer;

    fn profile() -> CliProfile {
        CliProfile::new(r"(?P<stable>\S+)> $")
    }

    fn written_string(written: &Arc<std::sync::Mutex<Vec<u8>>>) -> String {
        String::from_utf8(written.lock().unwrap().clone()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_simple_prompt_command() {
        let transport = MockStreamer::new()
            .chunk(b"router> ")
            .chunk(b"show version\nCisco IOS Software\nrouter> ");
        let written = transport.written();
        let mut device = Device::new(transport, profile());

        device.connect().await.unwrap();
        let result = device.cmd("show version").await.unwrap();

        assert_eq!(result.status, CmdStatus::Ok);
        assert_eq!(result.output.as_ref(), b"Cisco IOS Software\n");
        assert!(written_string(&written).contains("show version\n"));
        // The prompt itself was consumed, nothing trails in the buffer.
        assert!(device.buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_tightening_from_stable_group() {
        let transport = MockStreamer::new().chunk(b"some banner\ncore-sw1> ");
        let mut device = Device::new(transport, profile());
        device.connect().await.unwrap();
        assert_eq!(device.prompt_pattern, r"(?P<stable>core\-sw1)> $");
    }

    #[tokio::test(start_paused = true)]
    async fn test_paged_output_is_reassembled() {
        let transport = MockStreamer::new()
            .chunk(b"r> ")
            .chunk(b"show run\nline1\nline2\n--More--")
            .chunk(b"\rline3\nr> ");
        let written = transport.written();
        let mut device = Device::new(transport, profile().with_pager("--More--"));

        device.connect().await.unwrap();
        let result = device.cmd("show run").await.unwrap();

        assert_eq!(result.status, CmdStatus::Ok);
        assert_eq!(result.output.as_ref(), b"line1\nline2\nline3\n");
        assert!(written_string(&written).ends_with(' '));
    }

    #[tokio::test(start_paused = true)]
    async fn test_question_dialog_answered() {
        let transport = MockStreamer::new()
            .chunk(b"r> ")
            .chunk(b"reload\nProceed with reload? confirm?")
            .chunk(b"\nSystem going down\nr> ");
        let written = transport.written();
        let mut device = Device::new(transport, profile());

        device.connect().await.unwrap();
        let result = device
            .cmd_with("reload", CmdOpts::new().with_answer(r"confirm\?", "y"))
            .await
            .unwrap();

        assert_eq!(result.status, CmdStatus::Ok);
        assert_eq!(
            result.output.as_ref(),
            b"Proceed with reload? confirm?\nSystem going down\n"
        );
        assert!(written_string(&written).contains("y\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_question_without_answer_fails() {
        let transport = MockStreamer::new()
            .chunk(b"r> ")
            .chunk(b"erase\nAre you sure? [yes/no]: ");
        let mut device = Device::new(
            transport,
            profile().with_question(r"\[yes/no\]: "),
        );

        device.connect().await.unwrap();
        let error = device.cmd("erase").await.unwrap_err();
        match error {
            NetexpectError::UnansweredQuestion { question, .. } => {
                assert!(question.contains("[yes/no]"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_question_handler_fallback() {
        let transport = MockStreamer::new()
            .chunk(b"r> ")
            .chunk(b"erase\nAre you sure? [yes/no]: ")
            .chunk(b"\ndone\nr> ");
        let written = transport.written();
        let mut device = Device::new(
            transport,
            profile().with_question(r"\[yes/no\]: "),
        );

        device.connect().await.unwrap();
        let handler: QuestionHandler = Arc::new(|question: &str| {
            question.contains("[yes/no]").then(|| "yes".to_string())
        });
        let result = device
            .cmd_with("erase", CmdOpts::new().with_question_handler(handler))
            .await
            .unwrap();
        assert_eq!(result.status, CmdStatus::Ok);
        assert!(written_string(&written).contains("yes\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_pattern_produces_result_not_failure() {
        let transport = MockStreamer::new()
            .chunk(b"r> ")
            .chunk(b"bad cmd\n% Invalid input\nr> ");
        let mut device = Device::new(
            transport,
            profile().with_error(NamedPattern::new("invalid", r"% Invalid input")),
        );

        device.connect().await.unwrap();
        let result = device.cmd("bad cmd").await.unwrap();

        assert_eq!(result.status, CmdStatus::ErrorDetected);
        assert_eq!(result.error_pattern.as_deref(), Some("invalid"));
        assert_eq!(result.output.as_ref(), b"% Invalid input\n");
        assert!(result.into_result().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_partial_output() {
        let transport = MockStreamer::new()
            .chunk(b"r> ")
            .chunk(b"slow cmd\n")
            .silent();
        let mut device = Device::new(transport, profile());

        device.connect().await.unwrap();
        let started = Instant::now();
        let error = device
            .cmd_with(
                "slow cmd",
                CmdOpts::new().with_read_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_millis(150));
        match error {
            NetexpectError::Timeout { command, output } => {
                assert_eq!(command, "slow cmd");
                assert_eq!(output.as_ref(), b"slow cmd\n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_command() {
        let transport = MockStreamer::new()
            .chunk(b"r> ")
            .chunk(b"long running\n")
            .silent();
        let mut device = Device::new(transport, profile());
        device.connect().await.unwrap();

        let cancel = device.cancellation_token();
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        };

        let started = Instant::now();
        let (result, _) = tokio::join!(device.cmd("long running"), canceller);
        assert!(started.elapsed() < Duration::from_millis(100));
        match result.unwrap_err() {
            NetexpectError::Cancelled { output, .. } => {
                assert_eq!(output.as_ref(), b"long running\n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_not_found() {
        let transport = MockStreamer::new().chunk(b"Username: ").silent();
        let mut device = Device::with_options(
            transport,
            profile(),
            DeviceOptions {
                read_timeout: Duration::from_millis(50),
                cmd_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        );
        match device.connect().await.unwrap_err() {
            NetexpectError::PromptNotFound { output } => {
                assert_eq!(output.as_ref(), b"Username: ");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_setup_runs_after_discovery() {
        let transport = MockStreamer::new()
            .chunk(b"r> ")
            .chunk(b"terminal length 0\nr> ")
            .chunk(b"show clock\n12:00:00\nr> ");
        let written = transport.written();
        let mut device = Device::new(
            transport,
            profile().with_terminal_setup("terminal length 0"),
        );

        device.connect().await.unwrap();
        assert!(written_string(&written).contains("terminal length 0\n"));
        let result = device.cmd("show clock").await.unwrap();
        assert_eq!(result.output.as_ref(), b"12:00:00\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent() {
        let transport = MockStreamer::new().chunk(b"r> ");
        let mut device = Device::new(transport, profile());
        device.connect().await.unwrap();
        device.close().await.unwrap();
        device.close().await.unwrap();
        assert!(device.cmd("show version").await.is_err());
    }

    #[test]
    fn test_tighten_prompt_replaces_group_body() {
        assert_eq!(
            tighten_prompt(r"(?P<stable>\S+)[>#] $", "edge-fw2").as_deref(),
            Some(r"(?P<stable>edge\-fw2)[>#] $")
        );
        assert_eq!(tighten_prompt(r"\S+[>#] $", "x"), None);
        // Nested groups inside the stable body keep their delimiters.
        assert_eq!(
            tighten_prompt(r"(?P<stable>(\w+-)+\w+)> $", "a-b").as_deref(),
            Some(r"(?P<stable>a\-b)> $")
        );
    }

    #[test]
    fn test_trim_echo_only_strips_exact_command() {
        let output = Bytes::from_static(b"show ver\r\nIOS\n");
        assert_eq!(trim_echo_line(output, "show ver").as_ref(), b"IOS\n");

        let output = Bytes::from_static(b"unrelated\nIOS\n");
        assert_eq!(
            trim_echo_line(output, "show ver").as_ref(),
            b"unrelated\nIOS\n"
        );
    }
}
