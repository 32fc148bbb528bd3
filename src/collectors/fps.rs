use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const FRESHNESS: Duration = Duration::from_secs(3);

static FPS_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)fps:\s*(\d+(?:\.\d+)?)").expect("valid regex"));
static FIRST_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("valid regex"));

/// Frame rate published by an in-game overlay. Files older than a few
/// seconds belong to a game that is no longer running and are ignored.
#[derive(Debug, Clone)]
pub struct FpsSampler {
    mangohud_file: PathBuf,
    gamescope_stats: PathBuf,
}

impl FpsSampler {
    pub fn new(mangohud_file: impl Into<PathBuf>, gamescope_stats: impl Into<PathBuf>) -> Self {
        Self {
            mangohud_file: mangohud_file.into(),
            gamescope_stats: gamescope_stats.into(),
        }
    }

    pub fn sample(&self) -> u32 {
        self.sample_at(SystemTime::now())
    }

    fn sample_at(&self, now: SystemTime) -> u32 {
        if let Some(fps) = fresh_contents(&self.mangohud_file, now)
            .and_then(|text| text.trim().parse::<u32>().ok())
            .filter(|fps| *fps > 0)
        {
            return fps;
        }

        fresh_contents(&self.gamescope_stats, now)
            .and_then(|text| parse_gamescope_fps(&text))
            .unwrap_or(0)
    }
}

fn fresh_contents(path: &Path, now: SystemTime) -> Option<String> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    // A timestamp in the future counts as fresh.
    let age = now.duration_since(modified).unwrap_or_default();
    if age > FRESHNESS {
        return None;
    }
    fs::read_to_string(path).ok()
}

pub fn parse_gamescope_fps(text: &str) -> Option<u32> {
    let value = FPS_FIELD
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .or_else(|| {
            text.lines()
                .map(|line| line.trim().to_lowercase())
                .find(|line| line.starts_with("fps"))
                .and_then(|line| FIRST_NUMBER.find(&line).map(|m| m.as_str().to_string()))
        })?;
    let fps = value.parse::<f64>().ok()? as u32;
    (fps > 0).then_some(fps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gamescope_formats() {
        assert_eq!(parse_gamescope_fps("frametime: 16.6\nFPS: 59.94\n"), Some(59));
        assert_eq!(parse_gamescope_fps("fps 144\n"), Some(144));
        assert_eq!(parse_gamescope_fps("latency: 12\n"), None);
    }

    #[test]
    fn mangohud_file_wins_when_fresh() {
        let dir = tempfile::tempdir().expect("временный каталог");
        let mango = dir.path().join("fps.txt");
        let gamescope = dir.path().join("gamescope-stats");
        fs::write(&mango, "117\n").expect("запись fps.txt");
        fs::write(&gamescope, "fps: 60\n").expect("запись gamescope-stats");

        let sampler = FpsSampler::new(&mango, &gamescope);
        assert_eq!(sampler.sample(), 117);
    }

    #[test]
    fn stale_files_are_ignored() {
        let dir = tempfile::tempdir().expect("временный каталог");
        let mango = dir.path().join("fps.txt");
        let gamescope = dir.path().join("gamescope-stats");
        fs::write(&mango, "117\n").expect("запись fps.txt");
        fs::write(&gamescope, "fps: 60\n").expect("запись gamescope-stats");

        let sampler = FpsSampler::new(&mango, &gamescope);
        let later = SystemTime::now() + Duration::from_secs(10);
        assert_eq!(sampler.sample_at(later), 0);
    }

    #[test]
    fn non_numeric_mangohud_falls_through_to_gamescope() {
        let dir = tempfile::tempdir().expect("временный каталог");
        let mango = dir.path().join("fps.txt");
        let gamescope = dir.path().join("gamescope-stats");
        fs::write(&mango, "n/a\n").expect("запись fps.txt");
        fs::write(&gamescope, "FPS: 89.5\n").expect("запись gamescope-stats");

        assert_eq!(FpsSampler::new(&mango, &gamescope).sample(), 89);
    }

    #[test]
    fn missing_files_yield_zero() {
        let dir = tempfile::tempdir().expect("временный каталог");
        let sampler = FpsSampler::new(dir.path().join("a"), dir.path().join("b"));
        assert_eq!(sampler.sample(), 0);
    }
}
