use super::probe::{sorted_entries, CommandRunner};
use crate::state::GameInfo;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use sysinfo::{ProcessExt, System, SystemExt};
use tracing::debug;

pub const STEAMOS: &str = "SteamOS";
pub const GAMEMODE_ACTIVE: &str = "Gaming (Active)";

const LAUNCH_WRAPPER: &str = "SteamLaunch";
const COMPOSITOR: &str = "gamescope";
const MAX_TITLE_CHARS: usize = 50;

static MANIFEST_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""name"\s+"([^"]+)""#).expect("valid regex"));
static LAUNCH_APPID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"AppId[=/](\d+)").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub name: String,
    pub cmdline: String,
}

impl ProcessInfo {
    pub fn new(name: impl Into<String>, cmdline: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmdline: cmdline.into(),
        }
    }
}

pub trait ProcessSource: Send {
    fn snapshot(&mut self) -> Vec<ProcessInfo>;
}

impl ProcessSource for Vec<ProcessInfo> {
    fn snapshot(&mut self) -> Vec<ProcessInfo> {
        self.clone()
    }
}

/// Process list used for presence checks. One snapshot per detection.
pub struct ProcessTable {
    system: System,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl ProcessSource for ProcessTable {
    fn snapshot(&mut self) -> Vec<ProcessInfo> {
        self.system.refresh_processes();
        self.system
            .processes()
            .values()
            .map(|p| {
                let cmdline = if p.cmd().is_empty() {
                    p.name().to_string()
                } else {
                    p.cmd().join(" ")
                };
                ProcessInfo::new(p.name(), cmdline)
            })
            .collect()
    }
}

/// Debounce slot for the last positively identified game.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GameCache {
    #[default]
    Idle,
    Detected { game: GameInfo, at: Instant },
}

impl GameCache {
    fn fresh(&self, now: Instant, ttl: Duration) -> Option<&GameInfo> {
        match self {
            GameCache::Detected { game, at } if now.saturating_duration_since(*at) < ttl => {
                Some(game)
            }
            _ => None,
        }
    }
}

pub fn default_library_roots() -> Vec<PathBuf> {
    let Some(home) = std::env::var_os("HOME").map(PathBuf::from) else {
        return Vec::new();
    };
    vec![
        home.join(".steam/steam/steamapps"),
        home.join(".local/share/Steam/steamapps"),
    ]
}

pub struct GameDetector {
    cache: GameCache,
    ttl: Duration,
    candidate_roots: Vec<PathBuf>,
    library_roots: Option<Vec<PathBuf>>,
    timeout: Duration,
}

impl GameDetector {
    pub fn new(ttl: Duration, candidate_roots: Vec<PathBuf>, timeout: Duration) -> Self {
        Self {
            cache: GameCache::Idle,
            ttl,
            candidate_roots,
            library_roots: None,
            timeout,
        }
    }

    #[cfg(test)]
    pub fn cache(&self) -> &GameCache {
        &self.cache
    }

    /// First method that yields a game wins. Strong signals (a running
    /// manifest game, the launch wrapper) refresh the cache; weak ones
    /// (compositor, gamemode) only read it.
    pub async fn detect(
        &mut self,
        procs: &[ProcessInfo],
        runner: &dyn CommandRunner,
        now: Instant,
    ) -> GameInfo {
        if let Some(game) = self.from_manifests(procs) {
            return self.remember(game, now);
        }
        if let Some(game) = from_launch_wrapper(procs) {
            return self.remember(game, now);
        }

        if procs.iter().any(|p| p.name.contains(COMPOSITOR)) {
            return self.cached_or(now, STEAMOS);
        }
        if gamemode_active(runner, self.timeout).await {
            return self.cached_or(now, GAMEMODE_ACTIVE);
        }

        if let Some(game) = self.cache.fresh(now, self.ttl) {
            return game.clone();
        }
        if self.cache != GameCache::Idle {
            debug!("кеш игры устарел");
            self.cache = GameCache::Idle;
        }
        GameInfo::default()
    }

    fn remember(&mut self, game: GameInfo, now: Instant) -> GameInfo {
        self.cache = GameCache::Detected {
            game: game.clone(),
            at: now,
        };
        game
    }

    fn cached_or(&self, now: Instant, label: &str) -> GameInfo {
        self.cache
            .fresh(now, self.ttl)
            .cloned()
            .unwrap_or_else(|| GameInfo::new(label, None))
    }

    fn library_roots(&mut self) -> &[PathBuf] {
        let candidates = &self.candidate_roots;
        self.library_roots
            .get_or_insert_with(|| candidates.iter().filter(|p| p.is_dir()).cloned().collect())
    }

    fn from_manifests(&mut self, procs: &[ProcessInfo]) -> Option<GameInfo> {
        for root in self.library_roots().to_vec() {
            let Ok(entries) = sorted_entries(&root) else {
                continue;
            };
            for manifest in entries {
                let Some(appid) = manifest
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_prefix("appmanifest_"))
                    .and_then(|n| n.strip_suffix(".acf"))
                else {
                    continue;
                };
                if !steam_app_running(procs, appid) {
                    continue;
                }
                let title = fs::read(&manifest)
                    .ok()
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .and_then(|text| parse_manifest_name(&text));
                match title {
                    Some(title) => return Some(GameInfo::new(title, Some(appid.to_string()))),
                    None => debug!(manifest = %manifest.display(), "манифест без имени"),
                }
            }
        }
        None
    }
}

pub fn parse_manifest_name(text: &str) -> Option<String> {
    MANIFEST_NAME
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// A process tagged `steam_app_<appid>` exists. The tag must not be
/// followed by another digit (`steam_app_12` is not `steam_app_123`).
fn steam_app_running(procs: &[ProcessInfo], appid: &str) -> bool {
    let tag = format!("steam_app_{appid}");
    procs.iter().any(|p| {
        p.cmdline.match_indices(&tag).any(|(idx, _)| {
            !p.cmdline[idx + tag.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit())
        })
    })
}

fn from_launch_wrapper(procs: &[ProcessInfo]) -> Option<GameInfo> {
    procs
        .iter()
        .filter(|p| p.cmdline.contains(LAUNCH_WRAPPER))
        .find_map(|p| parse_launch_cmdline(&p.cmdline))
}

/// Title from the first `.exe`/`.x86_64` token and the AppId, if any.
pub fn parse_launch_cmdline(cmdline: &str) -> Option<GameInfo> {
    let appid = LAUNCH_APPID
        .captures(cmdline)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());
    let token = cmdline
        .split_whitespace()
        .find(|t| t.contains(".exe") || t.contains(".x86_64"))?;
    let file = token.rsplit(['/', '\\']).next().unwrap_or(token);
    let title: String = file
        .replace(".exe", "")
        .replace(".x86_64", "")
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();
    Some(GameInfo::new(title, appid))
}

async fn gamemode_active(runner: &dyn CommandRunner, timeout: Duration) -> bool {
    match runner.run("gamemoded", &["--status"], timeout).await {
        Ok(out) => out.stdout.to_lowercase().contains("gamemode is active"),
        Err(err) => {
            debug!(error = %err, "gamemoded недоступен");
            false
        }
    }
}
