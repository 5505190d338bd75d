//! 每个请求一个 JSON 文件
//!
//! 文件名 `<净化后的提示词>_<YYYYmmdd_HHMMSS_mmm>.json`：西里尔字母转写为拉丁字母，
//! 去掉非法字符，空白折叠为下划线，最长 60 个字符，小写。导出失败只记日志，不影响请求结果。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Local;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::core::batch::RequestOutcome;
use crate::sheet::PromptRequest;

const MAX_NAME_CHARS: usize = 60;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct Metadata<'a> {
    row: usize,
    timestamp: String,
    project: Option<&'a str>,
    model: Option<&'a str>,
    attempts: u32,
    duration_seconds: f64,
}

#[derive(Debug, Serialize)]
struct LengthStats {
    request_length: usize,
    response_length: usize,
}

#[derive(Debug, Serialize)]
struct ExportDocument<'a> {
    metadata: Metadata<'a>,
    request: &'a str,
    response: Option<&'a str>,
    status: String,
    success: bool,
    error: Option<&'a str>,
    stats: LengthStats,
}

fn transliterate_char(c: char) -> Option<&'static str> {
    let s = match c {
        'а' => "a", 'б' => "b", 'в' => "v", 'г' => "g", 'д' => "d",
        'е' => "e", 'ё' => "yo", 'ж' => "zh", 'з' => "z", 'и' => "i",
        'й' => "y", 'к' => "k", 'л' => "l", 'м' => "m", 'н' => "n",
        'о' => "o", 'п' => "p", 'р' => "r", 'с' => "s", 'т' => "t",
        'у' => "u", 'ф' => "f", 'х' => "h", 'ц' => "ts", 'ч' => "ch",
        'ш' => "sh", 'щ' => "sch", 'ъ' => "", 'ы' => "y", 'ь' => "",
        'э' => "e", 'ю' => "yu", 'я' => "ya",
        'А' => "A", 'Б' => "B", 'В' => "V", 'Г' => "G", 'Д' => "D",
        'Е' => "E", 'Ё' => "Yo", 'Ж' => "Zh", 'З' => "Z", 'И' => "I",
        'Й' => "Y", 'К' => "K", 'Л' => "L", 'М' => "M", 'Н' => "N",
        'О' => "O", 'П' => "P", 'Р' => "R", 'С' => "S", 'Т' => "T",
        'У' => "U", 'Ф' => "F", 'Х' => "H", 'Ц' => "Ts", 'Ч' => "Ch",
        'Ш' => "Sh", 'Щ' => "Sch", 'Ъ' => "", 'Ы' => "Y", 'Ь' => "",
        'Э' => "E", 'Ю' => "Yu", 'Я' => "Ya",
        _ => return None,
    };
    Some(s)
}

pub fn transliterate(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match transliterate_char(c) {
            Some(latin) => out.push_str(latin),
            None => out.push(c),
        }
    }
    out
}

static FORBIDDEN_RE: OnceLock<Regex> = OnceLock::new();
static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();
static UNDERSCORES_RE: OnceLock<Regex> = OnceLock::new();
static NON_NAME_RE: OnceLock<Regex> = OnceLock::new();

/// 把提示词变成可用作文件名的短串
pub fn sanitize_filename(text: &str) -> String {
    let forbidden = FORBIDDEN_RE.get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap());
    let whitespace = WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").unwrap());
    let underscores = UNDERSCORES_RE.get_or_init(|| Regex::new(r"_{2,}").unwrap());
    let non_name = NON_NAME_RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_\-]").unwrap());

    let text = transliterate(text);
    let text = forbidden.replace_all(&text, "");
    let text = whitespace.replace_all(&text, "_");
    let text = underscores.replace_all(&text, "_");
    let text = non_name.replace_all(&text, "");
    let truncated: String = text.chars().take(MAX_NAME_CHARS).collect();
    let name = truncated.trim_matches(|c| c == '_' || c == '-').to_lowercase();
    if name.is_empty() {
        "untitled".to_string()
    } else {
        name
    }
}

pub struct JsonExporter {
    dir: PathBuf,
}

impl JsonExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn unique_path(&self, base: &str) -> PathBuf {
        let mut path = self.dir.join(format!("{base}.json"));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{base}_{n}.json"));
            n += 1;
        }
        path
    }

    pub fn save(&self, request: &PromptRequest, outcome: &RequestOutcome) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(&self.dir)?;
        let now = Local::now();
        let base = format!(
            "{}_{}",
            sanitize_filename(&request.prompt),
            now.format("%Y%m%d_%H%M%S_%3f")
        );
        let path = self.unique_path(&base);

        let response = outcome.response.as_deref();
        let doc = ExportDocument {
            metadata: Metadata {
                row: request.id,
                timestamp: now.to_rfc3339(),
                project: request.project.as_deref(),
                model: request.model.as_deref(),
                attempts: outcome.attempts,
                duration_seconds: (outcome.duration.as_secs_f64() * 100.0).round() / 100.0,
            },
            request: &request.prompt,
            response,
            status: outcome.status().to_string(),
            success: outcome.success,
            error: (!outcome.success).then_some(outcome.detail.as_str()),
            stats: LengthStats {
                request_length: request.prompt.chars().count(),
                response_length: response.map(|r| r.chars().count()).unwrap_or(0),
            },
        };

        fs::write(&path, serde_json::to_string_pretty(&doc)?)?;
        tracing::debug!(path = %path.display(), "JSON exported");
        Ok(path)
    }
}
