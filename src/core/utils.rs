use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::{JudgeError, Result};

/// Pack named blobs into an in-memory zip archive
pub fn pack_zip<'a>(entries: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    for (name, content) in entries {
        writer
            .start_file(name, options)
            .map_err(|e| JudgeError::system_with("Failed to pack {0}: {1}", vec![name.into(), e.to_string()]))?;
        writer.write_all(content)?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| JudgeError::system_with("Failed to finish archive: {0}", vec![e.to_string()]))?;
    Ok(cursor.into_inner())
}

/// Unpack a test-data archive into `dest`
pub fn extract_zip<R: Read + Seek>(data: R, dest: &Path) -> Result<()> {
    let zip_err = |e: zip::result::ZipError| JudgeError::format_with("Invalid test data archive: {0}", vec![e.to_string()]);
    let mut archive = ZipArchive::new(data).map_err(zip_err)?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(zip_err)?;

        // ZIP Slip protection: entries must stay inside dest
        let file_path = match file.enclosed_name() {
            Some(path) => path.to_owned(),
            None => continue,
        };

        let outpath = dest.join(&file_path);

        if file.name().ends_with('/') {
            std::fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut outfile = std::fs::File::create(&outpath)?;
            std::io::copy(&mut file, &mut outfile)?;
        }
    }

    Ok(())
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9]+(?:\.[0-9]*)?)([mu]?)s?$").expect("valid time regex"))
}

fn memory_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9]+(?:\.[0-9]*)?)([kmg])b?$").expect("valid memory regex"))
}

/// Parse a time limit string (`1s`, `500ms`, `1.5s`) into milliseconds
pub fn parse_time_ms(value: &str) -> Option<u64> {
    let value = value.trim().to_lowercase();
    let caps = time_re().captures(&value)?;
    let amount: f64 = caps[1].parse().ok()?;
    let scale = match &caps[2] {
        "" => 1000.0,
        "m" => 1.0,
        "u" => 0.001,
        _ => return None,
    };
    Some((amount * scale).floor() as u64)
}

/// Parse a memory limit string (`256m`, `1g`, `512kb`) into megabytes
pub fn parse_memory_mb(value: &str) -> Option<u64> {
    let value = value.trim().to_lowercase();
    let caps = memory_re().captures(&value)?;
    let amount: f64 = caps[1].parse().ok()?;
    let scale = match &caps[2] {
        "k" => 1.0 / 1024.0,
        "m" => 1.0,
        "g" => 1024.0,
        _ => return None,
    };
    Some((amount * scale).ceil() as u64)
}

/// Conventional names for signals below 32
pub fn signal_name(code: i32) -> Option<&'static str> {
    let name = match code {
        1 => "SIGHUP",
        2 => "SIGINT",
        3 => "SIGQUIT",
        4 => "SIGILL",
        5 => "SIGTRAP",
        6 => "SIGABRT",
        7 => "SIGBUS",
        8 => "SIGFPE",
        9 => "SIGKILL",
        10 => "SIGUSR1",
        11 => "SIGSEGV",
        12 => "SIGUSR2",
        13 => "SIGPIPE",
        14 => "SIGALRM",
        15 => "SIGTERM",
        16 => "SIGSTKFLT",
        17 => "SIGCHLD",
        18 => "SIGCONT",
        19 => "SIGSTOP",
        20 => "SIGTSTP",
        21 => "SIGTTIN",
        22 => "SIGTTOU",
        23 => "SIGURG",
        24 => "SIGXCPU",
        25 => "SIGXFSZ",
        26 => "SIGVTALRM",
        27 => "SIGPROF",
        28 => "SIGWINCH",
        29 => "SIGIO",
        30 => "SIGPWR",
        31 => "SIGSYS",
        _ => return None,
    };
    Some(name)
}

/// Truncate on a char boundary, never exceeding `max` bytes
pub fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Join non-blank compiler stdout/stderr, each capped at 1 MiB
pub fn compiler_text(stdout: &str, stderr: &str) -> String {
    [stdout, stderr]
        .iter()
        .filter(|s| !s.trim().is_empty())
        .map(|s| truncate(s, 1024 * 1024))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Last path component, used as the in-sandbox name of staged files
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Strip absolute prefixes and parent references from a test-data path
pub fn restrict_file(path: &str) -> String {
    if path.is_empty() {
        return "/".into();
    }
    let path = if path.starts_with('/') { "" } else { path };
    path.replace("..", "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time_ms("1s"), Some(1000));
        assert_eq!(parse_time_ms("500ms"), Some(500));
        assert_eq!(parse_time_ms("1.5s"), Some(1500));
        assert_eq!(parse_time_ms("2"), Some(2000));
        assert_eq!(parse_time_ms("fast"), None);
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_memory_mb("256m"), Some(256));
        assert_eq!(parse_memory_mb("1g"), Some(1024));
        assert_eq!(parse_memory_mb("512MB"), Some(512));
        assert_eq!(parse_memory_mb("1024k"), Some(1));
        assert_eq!(parse_memory_mb("lots"), None);
    }

    #[test]
    fn test_truncate_char_boundary() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn test_compiler_text_skips_blank() {
        assert_eq!(compiler_text("  \n", "error: x"), "error: x");
        assert_eq!(compiler_text("warn", "error"), "warn\nerror");
    }

    #[test]
    fn test_restrict_file() {
        assert_eq!(restrict_file("../../etc/passwd"), "//etc/passwd");
        assert_eq!(restrict_file("/etc/passwd"), "");
        assert_eq!(restrict_file("1.in"), "1.in");
    }

    #[test]
    fn test_zip_pack_and_extract() {
        let data = pack_zip([("1.in", b"1 2".as_slice()), ("1.out", b"3".as_slice())]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        extract_zip(Cursor::new(data), dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("1.out")).unwrap(), "3");
    }
}
