//! 运行前检查：请求表、浏览器、用户目录
//!
//! 错误阻止运行；警告只打印。

use std::fs;
use std::path::Path;

use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::sheet::{CsvSheet, EXPECTED_HEADER};

/// 警告中最多列出的空行数
const MAX_LISTED_ROWS: usize = 5;

#[derive(Debug, Default)]
pub struct Preflight {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Preflight {
    pub fn run(cfg: &AppConfig) -> Self {
        let mut report = Self::default();
        report.check_sheet(&cfg.sheet.path);
        if let Some(exe) = &cfg.browser.executable {
            report.check_browser(exe);
        }
        report.check_profile_dir(&cfg.browser.profile_dir);
        report
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn check_sheet(&mut self, path: &Path) {
        let sheet = match CsvSheet::load(path) {
            Ok(sheet) => sheet,
            Err(e) => {
                self.errors.push(format!("Cannot read sheet {}: {e}", path.display()));
                return;
            }
        };

        for (col, expected) in EXPECTED_HEADER.iter().enumerate() {
            let actual = sheet.header().get(col).map(String::as_str).unwrap_or("");
            if !actual.eq_ignore_ascii_case(expected) {
                self.warnings.push(format!(
                    "Column {}: expected header '{expected}', found '{actual}'",
                    col + 1
                ));
            }
        }

        if sheet.row_count() == 0 {
            self.errors.push("Sheet has no data rows".to_string());
            return;
        }

        let empty = sheet.empty_request_rows();
        if empty.len() == sheet.row_count() {
            self.errors.push("Sheet has no requests to process".to_string());
            return;
        }
        if !empty.is_empty() {
            let listed: Vec<String> = empty.iter().take(MAX_LISTED_ROWS).map(usize::to_string).collect();
            let more = if empty.len() > MAX_LISTED_ROWS { "..." } else { "" };
            self.warnings
                .push(format!("Empty request rows: {}{more}", listed.join(", ")));
        }
    }

    pub fn check_browser(&mut self, exe: &Path) {
        if !exe.exists() {
            self.errors
                .push(format!("Browser executable not found: {}", exe.display()));
        }
    }

    pub fn check_profile_dir(&mut self, dir: &Path) {
        if let Err(e) = fs::create_dir_all(dir) {
            self.errors.push(format!(
                "Cannot create profile directory {}: {e}",
                dir.display()
            ));
        }
    }

    pub fn log(&self) {
        for e in &self.errors {
            error!("{e}");
        }
        for w in &self.warnings {
            warn!("{w}");
        }
        match (self.is_ok(), self.warnings.is_empty()) {
            (true, true) => info!("preflight passed"),
            (true, false) => info!(warnings = self.warnings.len(), "preflight passed with warnings"),
            (false, _) => error!(errors = self.errors.len(), "preflight failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "request,response,status,completed_at,error,project,model,chat_mode\n";

    #[test]
    fn test_valid_sheet_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.csv");
        fs::write(&path, format!("{HEADER}hello,,,,,,,\n")).unwrap();
        let mut report = Preflight::default();
        report.check_sheet(&path);
        assert!(report.is_ok());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_empty_rows_warn_and_list_first_five() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.csv");
        let mut body = format!("{HEADER}hello,,,,,,,\n");
        for _ in 0..7 {
            body.push_str(",,,,,,,\n");
        }
        fs::write(&path, body).unwrap();
        let mut report = Preflight::default();
        report.check_sheet(&path);
        assert!(report.is_ok());
        assert_eq!(report.warnings, vec!["Empty request rows: 3, 4, 5, 6, 7...".to_string()]);
    }

    #[test]
    fn test_sheet_without_requests_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.csv");
        fs::write(&path, HEADER).unwrap();
        let mut report = Preflight::default();
        report.check_sheet(&path);
        assert!(!report.is_ok());

        fs::write(&path, format!("{HEADER},,,,,,,\n")).unwrap();
        let mut report = Preflight::default();
        report.check_sheet(&path);
        assert_eq!(report.errors, vec!["Sheet has no requests to process".to_string()]);
    }

    #[test]
    fn test_unexpected_header_is_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.csv");
        fs::write(&path, "prompt\nhello\n").unwrap();
        let mut report = Preflight::default();
        report.check_sheet(&path);
        assert!(report.is_ok());
        assert_eq!(
            report.warnings,
            vec!["Column 1: expected header 'request', found 'prompt'".to_string()]
        );
    }

    #[test]
    fn test_missing_browser_and_profile_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = Preflight::default();
        report.check_browser(&dir.path().join("no-such-chrome"));
        report.check_profile_dir(&dir.path().join("profile"));
        assert_eq!(report.errors.len(), 1);
        assert!(dir.path().join("profile").is_dir());
    }
}
