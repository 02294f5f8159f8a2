use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::Result;
use crate::job::ImageTiming;

/// One frame of the concat script: an asset and how long it stays visible.
/// The trailing duplicate entry carries no duration.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub path: PathBuf,
    pub duration: Option<f64>,
}

/// Ordered frame-duration script for the concat demuxer.
#[derive(Debug, Clone, Default)]
pub struct TimelineScript {
    entries: Vec<TimelineEntry>,
}

impl TimelineScript {
    /// Build the script, preserving input order. The final asset is appended
    /// a second time without a duration entry: the concat demuxer otherwise
    /// drops the last frame's display duration.
    pub fn build(images: &[PathBuf], timings: &[ImageTiming]) -> Self {
        let mut entries: Vec<TimelineEntry> = images
            .iter()
            .zip(timings.iter())
            .map(|(path, timing)| TimelineEntry {
                path: path.clone(),
                duration: Some(timing.duration()),
            })
            .collect();

        if let Some(last) = images.last() {
            entries.push(TimelineEntry {
                path: last.clone(),
                duration: None,
            });
        }

        Self { entries }
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render in concat demuxer format. Paths are single-quoted; embedded
    /// quotes use the demuxer's '\'' escape.
    pub fn to_concat_format(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let path = entry.path.to_string_lossy().replace('\'', "'\\''");
            out.push_str(&format!("file '{}'\n", path));
            if let Some(duration) = entry.duration {
                out.push_str(&format!("duration {}\n", duration));
            }
        }
        out
    }

    pub async fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_concat_format()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(start: f64, end: f64) -> ImageTiming {
        ImageTiming {
            start_seconds: start,
            end_seconds: end,
        }
    }

    #[test]
    fn test_trailing_duplicate() {
        let images = vec![PathBuf::from("/t/a.png"), PathBuf::from("/t/b.png")];
        let timings = vec![timing(0.0, 3.0), timing(3.0, 5.0)];

        let script = TimelineScript::build(&images, &timings);
        let entries = script.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].duration, Some(3.0));
        assert_eq!(entries[1].duration, Some(2.0));
        assert_eq!(entries[2].path, PathBuf::from("/t/b.png"));
        assert_eq!(entries[2].duration, None);
    }

    #[test]
    fn test_empty_input() {
        let script = TimelineScript::build(&[], &[]);
        assert!(script.is_empty());
        assert_eq!(script.to_concat_format(), "");
    }

    #[test]
    fn test_entry_count_is_images_plus_one() {
        for n in 1..5 {
            let images: Vec<PathBuf> = (0..n)
                .map(|i| PathBuf::from(format!("/t/{}.png", i)))
                .collect();
            let timings: Vec<ImageTiming> =
                (0..n).map(|i| timing(i as f64, i as f64 + 1.0)).collect();
            let script = TimelineScript::build(&images, &timings);
            assert_eq!(script.entries().len(), n + 1);
        }
    }

    #[test]
    fn test_concat_format() {
        let images = vec![PathBuf::from("/t/a.png")];
        let timings = vec![timing(0.0, 2.5)];
        let script = TimelineScript::build(&images, &timings);
        assert_eq!(
            script.to_concat_format(),
            "file '/t/a.png'\nduration 2.5\nfile '/t/a.png'\n"
        );
    }

    #[test]
    fn test_concat_format_escapes_quotes() {
        let images = vec![PathBuf::from("/t/o'brien.png")];
        let timings = vec![timing(0.0, 1.0)];
        let script = TimelineScript::build(&images, &timings);
        assert!(script.to_concat_format().contains("o'\\''brien"));
    }
}
