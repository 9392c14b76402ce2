//! Console monitor core logic.
//!
//! Drives one `EngineClient`: connects, logs status transitions, prints
//! the on-air set whenever it changes and runs operator commands typed
//! on stdin until `:quit`, end of input or a stop request.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

use peptalk_core::{EngineClient, PlayingElement};

use crate::config::MonitorConfig;

// ── ConsoleCommand ───────────────────────────────────────────────

/// One line of operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Plain line, sent to the engine as a correlated request.
    Request(String),
    /// `:onair`
    OnAir,
    /// `:playing <element_id>`
    Playing(String),
    /// `:find <show> [playlist]`
    Find {
        show: String,
        playlist: Option<String>,
    },
    /// `:quit`
    Quit,
}

impl ConsoleCommand {
    /// `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(directive) = line.strip_prefix(':') else {
            return Ok(Some(Self::Request(line.to_string())));
        };

        let mut words = directive.split_whitespace();
        let name = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();

        let cmd = match (name, args.as_slice()) {
            ("onair", []) => Self::OnAir,
            ("quit" | "q", []) => Self::Quit,
            ("playing", [id]) => Self::Playing(id.to_string()),
            ("find", [show]) => Self::Find {
                show: show.to_string(),
                playlist: None,
            },
            ("find", [show, playlist]) => Self::Find {
                show: show.to_string(),
                playlist: Some(playlist.to_string()),
            },
            ("onair" | "quit" | "q" | "playing" | "find", _) => {
                return Err(format!("usage: {}", Self::usage(name)));
            }
            _ => return Err(format!("unknown command :{name}")),
        };
        Ok(Some(cmd))
    }

    fn usage(name: &str) -> &'static str {
        match name {
            "playing" => ":playing <element_id>",
            "find" => ":find <show> [playlist]",
            "onair" => ":onair",
            _ => ":quit",
        }
    }
}

/// Render the on-air set as an aligned table, one record per line.
pub fn format_on_air(records: &[(String, PlayingElement)]) -> String {
    if records.is_empty() {
        return "nothing on air".into();
    }
    let width = records.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    let mut out = String::new();
    for (key, rec) in records {
        let _ = writeln!(
            out,
            "{key:<width$}  {}  show={} playlist={}",
            rec.element_id, rec.show_name, rec.playlist_name
        );
    }
    out.truncate(out.trim_end().len());
    out
}

// ── EngineMonitor ────────────────────────────────────────────────

/// Console monitor for one engine.
pub struct EngineMonitor {
    client: EngineClient,
    report_interval: Option<Duration>,
    running: Arc<AtomicBool>,
}

impl EngineMonitor {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            client: EngineClient::with_options(config.engine.clone(), config.to_client_options()),
            report_interval: config.report_interval(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn client(&self) -> &EngineClient {
        &self.client
    }

    /// Obtain a handle that can be used to stop the monitor from
    /// another task (Ctrl-C).
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run until `:quit` or a stop request, reading commands from
    /// `input`. The link is disconnected on the way out.
    pub async fn run<R>(&self, input: R)
    where
        R: AsyncBufRead + Unpin,
    {
        self.running.store(true, Ordering::SeqCst);

        let config = self.client.config();
        if config.enabled {
            if let Err(e) = self.client.connect().await {
                warn!("initial connect to {config} failed: {e}");
            }
        } else {
            info!("engine link disabled; use a config with enabled = true to connect");
        }

        let status_log = tokio::spawn(log_status(self.client.clone()));

        let mut lines = input.lines();
        let mut input_open = true;
        let mut ticker = tokio::time::interval(self.report_interval.unwrap_or(Duration::from_secs(3600)));
        let mut last_report: BTreeSet<String> = BTreeSet::new();

        while self.is_running() {
            tokio::select! {
                line = lines.next_line(), if input_open => match line {
                    Ok(Some(line)) => match ConsoleCommand::parse(&line) {
                        Ok(Some(ConsoleCommand::Quit)) => break,
                        // A request can wait for its full timeout; stop must not.
                        Ok(Some(cmd)) => tokio::select! {
                            out = self.execute(cmd) => println!("{out}"),
                            _ = Self::wait_for_stop(&self.running) => break,
                        },
                        Ok(None) => {}
                        Err(e) => println!("{e}"),
                    },
                    Ok(None) => {
                        info!("input closed; monitoring until stopped");
                        input_open = false;
                    }
                    Err(e) => {
                        warn!("stdin error: {e}");
                        input_open = false;
                    }
                },
                _ = ticker.tick(), if self.report_interval.is_some() => {
                    self.report_if_changed(&mut last_report);
                }
                _ = Self::wait_for_stop(&self.running) => break,
            }
        }

        status_log.abort();
        self.client.disconnect().await;
        self.running.store(false, Ordering::SeqCst);
        info!("monitor stopped");
    }

    /// Carry out one console command and return the text to print.
    pub async fn execute(&self, cmd: ConsoleCommand) -> String {
        match cmd {
            ConsoleCommand::Request(body) => match self.client.request(&body).await {
                Ok(reply) if reply.values.is_empty() => format!("#{} ok", reply.request_id),
                Ok(reply) => format!("#{} ok {}", reply.request_id, reply.values.join(" ")),
                Err(e) => format!("error: {e}"),
            },
            ConsoleCommand::OnAir => format_on_air(&self.client.on_air().snapshot()),
            ConsoleCommand::Playing(id) => {
                let state = if self.client.is_element_playing(&id) {
                    "on air"
                } else {
                    "not on air"
                };
                format!("{id}: {state}")
            }
            ConsoleCommand::Find { show, playlist } => {
                match self.client.get_playing_element_id(&show, playlist.as_deref()) {
                    Some(id) => id,
                    None => format!("nothing on air for {show}"),
                }
            }
            ConsoleCommand::Quit => String::new(),
        }
    }

    /// Log the on-air set when it differs from `last`.
    fn report_if_changed(&self, last: &mut BTreeSet<String>) -> bool {
        let current: BTreeSet<String> = self.client.get_all_playing_element_ids().into_iter().collect();
        if current == *last {
            return false;
        }
        let ids: Vec<&str> = current.iter().map(String::as_str).collect();
        info!(count = current.len(), "on air: [{}]", ids.join(", "));
        *last = current;
        true
    }

    /// Resolves when `running` becomes false.
    async fn wait_for_stop(running: &Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Log every status transition until the client goes away.
async fn log_status(client: EngineClient) {
    let mut status = client.watch_status();
    while status.changed().await.is_ok() {
        let current = status.borrow_and_update().clone();
        match current.error_message() {
            Some(cause) => warn!(status = current.as_str(), "engine link: {cause}"),
            None => info!(status = current.as_str(), engine = %client.config(), "engine link"),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
