//! Output file naming

use crate::recorder::MediaFormat;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

const FILE_PREFIX: &str = "screen-recording";

/// `screen-recording-<YYYY-MM-DD>.<ext>`
pub fn recording_filename(format: MediaFormat, date: NaiveDate) -> String {
    format!("{}-{}.{}", FILE_PREFIX, date.format("%Y-%m-%d"), format.extension())
}

/// Paths to try for `file_name` in `dir`: the name itself, then `-1`, `-2`, …
/// appended to the stem
pub fn candidate_paths<'a>(dir: &'a Path, file_name: &'a str) -> impl Iterator<Item = PathBuf> + 'a {
    let (stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (file_name, None),
    };

    std::iter::once(dir.join(file_name)).chain((1u32..).map(move |n| match extension {
        Some(ext) => dir.join(format!("{}-{}.{}", stem, n, ext)),
        None => dir.join(format!("{}-{}", stem, n)),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 9).unwrap()
    }

    #[test]
    fn test_filename_extension_table() {
        assert_eq!(recording_filename(MediaFormat::Mp4, date()), "screen-recording-2026-03-09.mp4");
        assert_eq!(recording_filename(MediaFormat::Gif, date()), "screen-recording-2026-03-09.gif");
        assert_eq!(recording_filename(MediaFormat::Webm, date()), "screen-recording-2026-03-09.webm");
    }

    #[test]
    fn test_candidates_append_counter() {
        let dir = Path::new("/downloads");
        let names: Vec<PathBuf> = candidate_paths(dir, "screen-recording-2026-03-09.webm").take(3).collect();
        assert_eq!(
            names,
            vec![
                dir.join("screen-recording-2026-03-09.webm"),
                dir.join("screen-recording-2026-03-09-1.webm"),
                dir.join("screen-recording-2026-03-09-2.webm"),
            ]
        );

        let bare: Vec<PathBuf> = candidate_paths(dir, "recording").skip(1).take(1).collect();
        assert_eq!(bare, vec![dir.join("recording-1")]);
    }
}
