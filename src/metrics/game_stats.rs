//! Game-level statistics.
//!
//! [`ProtocolSource`] asks the server over its remote console. When the
//! console is unreachable the collector falls back to [`LogHeuristicSource`],
//! which scans the tail of the server log.

use crate::container::ContainerRuntime;
use crate::instance::Instance;
use crate::metrics::{CollectError, GameStats};
use crate::rcon::{RconClient, RconError, SessionRegistry};
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Extension key for the server startup duration in seconds.
pub const STARTUP_SECONDS: &str = "startup_seconds";
/// Extension key for the mean tick duration in milliseconds.
pub const MS_PER_TICK: &str = "ms_per_tick";
/// Extension key for the heap limit reported by the game, in bytes.
pub const GAME_MEMORY_MAX_BYTES: &str = "game_memory_max_bytes";

/// Compiled patterns for console replies and log lines.
#[derive(Debug, Clone)]
pub struct StatsParser {
    formatting: Regex,
    list: Regex,
    paper_tps: Regex,
    forge_tps: Regex,
    memory: Regex,
    joined: Regex,
    left: Regex,
    done: Regex,
}

impl StatsParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            formatting: Regex::new(r"§.")?,
            list: Regex::new(r"There are (\d+)(?: of a max(?: of)? |/)(\d+) players online")?,
            paper_tps: Regex::new(r"TPS from last 1m, 5m, 15m:\s*\*?([0-9]+(?:\.[0-9]+)?)")?,
            forge_tps: Regex::new(
                r"Overall\s*:\s*Mean tick time:\s*([0-9.]+)\s*ms\.?\s*Mean TPS:\s*([0-9.]+)",
            )?,
            memory: Regex::new(r"(?i)memory:?\s*(\d+)\s*(?:MB)?\s*/\s*(\d+)\s*MB")?,
            joined: Regex::new(r"\b(\w{1,16}) joined the game")?,
            left: Regex::new(r"\b(\w{1,16}) left the game")?,
            done: Regex::new(r"Done \(([0-9.]+)s\)!")?,
        })
    }

    fn strip<'a>(&self, text: &'a str) -> std::borrow::Cow<'a, str> {
        self.formatting.replace_all(text, "")
    }

    /// `(online, max)` from a `list` reply.
    pub fn parse_list(&self, text: &str) -> Option<(u32, u32)> {
        let text = self.strip(text);
        let caps = self.list.captures(&text)?;
        Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
    }

    /// One-minute TPS and, for Forge, the mean tick time in ms.
    pub fn parse_tps(&self, text: &str) -> Option<(f64, Option<f64>)> {
        let text = self.strip(text);
        if let Some(caps) = self.paper_tps.captures(&text) {
            return Some((caps[1].parse().ok()?, None));
        }
        let caps = self.forge_tps.captures(&text)?;
        Some((caps[2].parse().ok()?, caps[1].parse().ok()))
    }

    /// `(used, max)` heap in bytes.
    pub fn parse_memory(&self, text: &str) -> Option<(u64, u64)> {
        let text = self.strip(text);
        let caps = self.memory.captures(&text)?;
        let used: u64 = caps[1].parse().ok()?;
        let max: u64 = caps[2].parse().ok()?;
        Some((used * BYTES_PER_MB, max * BYTES_PER_MB))
    }

    /// Estimate stats from recent log lines, oldest first.
    ///
    /// Players are joins minus leaves over the window, floored at zero, unless
    /// a `list` reply appears in the window; the last one wins.
    pub fn analyze_log_lines(&self, lines: &[String]) -> GameStats {
        let mut stats = GameStats::default();
        let mut joins: u32 = 0;
        let mut leaves: u32 = 0;
        let mut listed = None;

        for line in lines {
            let line = self.strip(line);
            if self.joined.is_match(&line) {
                joins += 1;
            } else if self.left.is_match(&line) {
                leaves += 1;
            }
            if let Some(counts) = self.parse_list(&line) {
                listed = Some(counts);
            }
            if let Some((tps, ms)) = self.parse_tps(&line) {
                stats.tps = Some(tps);
                if let Some(ms) = ms {
                    stats.extensions.insert(MS_PER_TICK.to_string(), ms);
                }
            }
            if let Some((used, max)) = self.parse_memory(&line) {
                stats.memory_bytes = Some(used);
                stats
                    .extensions
                    .insert(GAME_MEMORY_MAX_BYTES.to_string(), max as f64);
            }
            if let Some(caps) = self.done.captures(&line) {
                if let Ok(seconds) = caps[1].parse::<f64>() {
                    stats.extensions.insert(STARTUP_SECONDS.to_string(), seconds);
                }
            }
        }

        match listed {
            Some((online, max)) => {
                stats.players = Some(online);
                stats.max_players = Some(max);
            }
            None => stats.players = Some(joins.saturating_sub(leaves)),
        }
        stats
    }
}

/// A provider of [`GameStats`] for a running instance.
#[async_trait]
pub trait GameStatsSource: Send + Sync {
    async fn fetch(&self, instance: &Instance) -> Result<GameStats, CollectError>;
}

/// Game stats over the remote console.
pub struct ProtocolSource {
    sessions: Arc<SessionRegistry>,
    host: String,
    command_timeout: Duration,
    parser: StatsParser,
}

impl ProtocolSource {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        host: impl Into<String>,
        command_timeout: Duration,
        parser: StatsParser,
    ) -> Self {
        Self {
            sessions,
            host: host.into(),
            command_timeout,
            parser,
        }
    }

    /// Run a command whose failure only costs its figures; lost connections still fail.
    async fn optional(
        &self,
        client: &RconClient,
        instance: &Instance,
        command: &str,
    ) -> Result<Option<String>, RconError> {
        match client
            .execute_with_timeout(command, self.command_timeout)
            .await
        {
            Ok(reply) => Ok(Some(reply)),
            Err(RconError::Io(e)) => Err(RconError::Io(e)),
            Err(e) => {
                debug!("`{}` failed for instance {}: {}", command, instance.id, e);
                Ok(None)
            }
        }
    }

    async fn query(&self, instance: &Instance) -> Result<GameStats, RconError> {
        let client = self
            .sessions
            .get_or_connect(
                &instance.id,
                &self.host,
                instance.ports.rcon,
                &instance.rcon_password,
            )
            .await?;

        let mut stats = GameStats::default();

        let list = client
            .execute_with_timeout("list", self.command_timeout)
            .await?;
        if let Some((online, max)) = self.parser.parse_list(&list) {
            stats.players = Some(online);
            stats.max_players = Some(max);
        }

        // vanilla servers answer "Unknown command"; nothing to parse then
        if let Some(reply) = self.optional(&client, instance, "tps").await? {
            if let Some((tps, ms)) = self.parser.parse_tps(&reply) {
                stats.tps = Some(tps);
                if let Some(ms) = ms {
                    stats.extensions.insert(MS_PER_TICK.to_string(), ms);
                }
            }
        }

        if let Some(reply) = self.optional(&client, instance, "memory").await? {
            if let Some((used, max)) = self.parser.parse_memory(&reply) {
                stats.memory_bytes = Some(used);
                stats
                    .extensions
                    .insert(GAME_MEMORY_MAX_BYTES.to_string(), max as f64);
            }
        }

        Ok(stats)
    }
}

#[async_trait]
impl GameStatsSource for ProtocolSource {
    async fn fetch(&self, instance: &Instance) -> Result<GameStats, CollectError> {
        if !instance.monitoring.rcon.enabled {
            return Err(CollectError::ConsoleDisabled(instance.id.clone()));
        }

        match self.query(instance).await {
            Ok(stats) => Ok(stats),
            Err(e) => {
                if !matches!(e, RconError::Timeout(_) | RconError::Malformed(_)) {
                    self.sessions.disconnect(&instance.id).await;
                }
                Err(CollectError::Console(e))
            }
        }
    }
}

/// Game stats guessed from the tail of the server log.
pub struct LogHeuristicSource {
    runtime: Arc<dyn ContainerRuntime>,
    tail: usize,
    parser: StatsParser,
}

impl LogHeuristicSource {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, tail: usize, parser: StatsParser) -> Self {
        Self {
            runtime,
            tail,
            parser,
        }
    }
}

#[async_trait]
impl GameStatsSource for LogHeuristicSource {
    async fn fetch(&self, instance: &Instance) -> Result<GameStats, CollectError> {
        let Some(container_id) = &instance.container_id else {
            return Ok(GameStats::default());
        };

        let lines = self
            .runtime
            .logs(container_id, self.tail)
            .await
            .map_err(|source| CollectError::Runtime {
                instance_id: instance.id.clone(),
                source,
            })?;
        Ok(self.parser.analyze_log_lines(&lines))
    }
}
