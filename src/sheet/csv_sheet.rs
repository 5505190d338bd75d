//! CSV 请求表
//!
//! 列顺序：request, response, status, completed_at, error, project, model, chat_mode。
//! 整表在内存中维护，每次 record 后通过「临时文件 + 重命名」原子地写回。

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::debug;

use crate::context::{is_default_model, is_default_project};
use crate::sheet::{ChatMode, OutcomeSink, PromptRequest, RequestSource, RequestStatus, SheetError};

pub const EXPECTED_HEADER: [&str; 8] = [
    "request",
    "response",
    "status",
    "completed_at",
    "error",
    "project",
    "model",
    "chat_mode",
];

const COL_REQUEST: usize = 0;
const COL_RESPONSE: usize = 1;
const COL_STATUS: usize = 2;
const COL_DATE: usize = 3;
const COL_ERROR: usize = 4;
const COL_PROJECT: usize = 5;
const COL_MODEL: usize = 6;
const COL_CHAT_MODE: usize = 7;

/// 表头占第 1 行，数据从第 2 行开始
const FIRST_DATA_ROW: usize = 2;

/// 表格统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SheetStats {
    pub total: usize,
    pub success: usize,
    pub errors: usize,
    pub in_progress: usize,
    pub pending: usize,
}

#[derive(Debug)]
pub struct CsvSheet {
    path: PathBuf,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

fn optional(cell: &str) -> Option<String> {
    let cell = cell.trim();
    (!cell.is_empty()).then(|| cell.to_string())
}

impl CsvSheet {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SheetError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(SheetError::NotFound(path));
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&path)?;

        let mut records = reader.records();
        let mut header: Vec<String> = match records.next() {
            Some(record) => record?.iter().map(|s| s.trim().to_string()).collect(),
            None => return Err(SheetError::MissingHeader),
        };
        // 缺失的结果列按标准列名补齐
        for name in EXPECTED_HEADER.iter().skip(header.len()) {
            header.push(name.to_string());
        }

        let mut rows = Vec::new();
        for record in records {
            let mut row: Vec<String> = record?.iter().map(String::from).collect();
            row.resize(EXPECTED_HEADER.len().max(row.len()), String::new());
            rows.push(row);
        }
        debug!(path = %path.display(), rows = rows.len(), "sheet loaded");
        Ok(Self { path, header, rows })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// 数据行数（不含表头）
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// 按行号取单元格；行号从表头（第 1 行）开始计
    pub fn cell(&self, id: usize, col: usize) -> Option<&str> {
        id.checked_sub(FIRST_DATA_ROW)
            .and_then(|i| self.rows.get(i))
            .and_then(|row| row.get(col))
            .map(String::as_str)
    }

    pub fn status_of(&self, id: usize) -> Option<&str> {
        self.cell(id, COL_STATUS)
    }

    pub fn response_of(&self, id: usize) -> Option<&str> {
        self.cell(id, COL_RESPONSE)
    }

    pub fn error_of(&self, id: usize) -> Option<&str> {
        self.cell(id, COL_ERROR)
    }

    /// 请求文本为空的行号
    pub fn empty_request_rows(&self) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row[COL_REQUEST].trim().is_empty())
            .map(|(i, _)| i + FIRST_DATA_ROW)
            .collect()
    }

    pub fn statistics(&self) -> SheetStats {
        let mut stats = SheetStats::default();
        for row in self.rows.iter().filter(|r| !r[COL_REQUEST].trim().is_empty()) {
            stats.total += 1;
            match RequestStatus::parse(&row[COL_STATUS]) {
                Some(RequestStatus::Success) => stats.success += 1,
                Some(RequestStatus::Error(_)) => stats.errors += 1,
                Some(RequestStatus::InProgress) => stats.in_progress += 1,
                None => stats.pending += 1,
            }
        }
        stats
    }

    /// 原子写回：先写同目录临时文件再重命名
    pub fn save(&self) -> Result<(), SheetError> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut writer = csv::WriterBuilder::new().flexible(true).from_path(&tmp)?;
            writer.write_record(&self.header)?;
            for row in &self.rows {
                writer.write_record(row)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl RequestSource for CsvSheet {
    fn pending(&self) -> Vec<PromptRequest> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| !row[COL_REQUEST].trim().is_empty())
            .filter(|(_, row)| RequestStatus::parse(&row[COL_STATUS]) != Some(RequestStatus::Success))
            .map(|(i, row)| PromptRequest {
                id: i + FIRST_DATA_ROW,
                prompt: row[COL_REQUEST].trim().to_string(),
                project: optional(&row[COL_PROJECT]).filter(|p| !is_default_project(p)),
                model: optional(&row[COL_MODEL]).filter(|m| !is_default_model(m)),
                chat_mode: ChatMode::parse(&row[COL_CHAT_MODE]),
            })
            .collect()
    }
}

impl OutcomeSink for CsvSheet {
    fn record(
        &mut self,
        id: usize,
        status: RequestStatus,
        response: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), SheetError> {
        let row = id
            .checked_sub(FIRST_DATA_ROW)
            .and_then(|i| self.rows.get_mut(i))
            .ok_or(SheetError::UnknownRow(id))?;

        row[COL_STATUS] = status.to_string();
        if let Some(response) = response {
            row[COL_RESPONSE] = response.to_string();
        }
        match status {
            RequestStatus::Success => {
                row[COL_DATE] = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
                row[COL_ERROR].clear();
            }
            _ => {
                if let Some(error) = error {
                    row[COL_ERROR] = error.to_string();
                }
            }
        }
        self.save()?;
        debug!(row = id, %status, "outcome recorded");
        Ok(())
    }
}
