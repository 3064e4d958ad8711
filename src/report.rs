/*!
 * Console reports for nerdstore
 *
 * Renders sync summaries, scan reports and file listings as tables using
 * the tabled library.
 */

use serde_json::Value;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Padding, Style},
    Table, Tabled,
};

use crate::types::{FileComponent, FileManagerSummary, JsonMap, ScanReport};
use crate::utils::format_file_size;

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Metric")]
    key: String,

    #[tabled(rename = "Value")]
    value: String,
}

impl SummaryRow {
    fn new(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Tabled)]
struct FileRow {
    #[tabled(rename = "Id")]
    id: String,

    #[tabled(rename = "Path")]
    path: String,

    #[tabled(rename = "Size")]
    size: String,

    #[tabled(rename = "Checksum")]
    checksum: String,
}

/// Report generator for console output
#[derive(Debug, Clone)]
pub struct Reporter {
    max_path_len: usize,
}

impl Default for Reporter {
    fn default() -> Self {
        Self { max_path_len: 60 }
    }
}

impl Reporter {
    pub fn new(max_path_len: usize) -> Self {
        Self { max_path_len }
    }

    fn render<T: Tabled>(rows: Vec<T>) -> String {
        let mut table = Table::new(rows);
        table
            .with(Style::rounded())
            .with(Padding::new(1, 1, 0, 0))
            .with(Modify::new(Columns::new(..)).with(Alignment::left()));
        table.to_string()
    }

    fn count(n: i64) -> String {
        if n < 0 {
            "unknown".to_string()
        } else {
            n.to_string()
        }
    }

    // Keep the last path segments when a path is too long to display
    fn format_path(&self, path: &str) -> String {
        if path.chars().count() <= self.max_path_len {
            return path.to_string();
        }
        let mut kept = Vec::new();
        let mut len = 3;
        for part in path.rsplit('/') {
            let part_len = part.chars().count() + 1;
            if len + part_len > self.max_path_len && !kept.is_empty() {
                break;
            }
            kept.push(part);
            len += part_len;
        }
        kept.reverse();
        format!(".../{}", kept.join("/"))
    }

    /// Table describing a record's synchronisation state
    pub fn summary_table(&self, record_id: &str, summary: &FileManagerSummary) -> String {
        let rows = vec![
            SummaryRow::new("Record", record_id),
            SummaryRow::new("Status", summary.syncing.to_string()),
            SummaryRow::new("Files", Self::count(summary.file_count)),
            SummaryRow::new("Folders", Self::count(summary.folder_count)),
            SummaryRow::new(
                "Usage",
                if summary.usage < 0 {
                    "unknown".to_string()
                } else {
                    format_file_size(summary.usage as u64)
                },
            ),
            SummaryRow::new(
                "Last scan",
                summary.last_scan_id.clone().unwrap_or_else(|| "-".to_string()),
            ),
            SummaryRow::new(
                "Last modified",
                summary.last_modified.clone().unwrap_or_else(|| "-".to_string()),
            ),
        ];
        Self::render(rows)
    }

    /// Table describing one scan of a space
    pub fn scan_table(&self, report: &ScanReport) -> String {
        let rows = vec![
            SummaryRow::new("Space", report.space_id.as_str()),
            SummaryRow::new("Scan", report.scan_id.as_str()),
            SummaryRow::new(
                "Started",
                report.scan_datetime.clone().unwrap_or_else(|| "-".to_string()),
            ),
            SummaryRow::new("Status", report.status().to_string()),
            SummaryRow::new("Files", report.file_count().to_string()),
            SummaryRow::new("Folders", report.folder_count().to_string()),
            SummaryRow::new("Total size", format_file_size(report.accumulated_size)),
        ];
        Self::render(rows)
    }

    /// Table listing file components in the order given
    pub fn files_table(&self, files: &[FileComponent]) -> String {
        let rows: Vec<FileRow> = files
            .iter()
            .map(|comp| FileRow {
                id: comp.id().to_string(),
                path: if comp.is_collection() {
                    format!("{}/", self.format_path(comp.filepath()))
                } else {
                    self.format_path(comp.filepath())
                },
                size: comp.size().map(format_file_size).unwrap_or_default(),
                checksum: comp
                    .as_file()
                    .and_then(|f| f.checksum.as_ref())
                    .map(|c| c.hash.chars().take(12).collect())
                    .unwrap_or_default(),
            })
            .collect();
        Self::render(rows)
    }

    /// Table of a record's top-level metadata
    pub fn metadata_table(&self, md: &JsonMap) -> String {
        let rows: Vec<SummaryRow> = md
            .iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                SummaryRow::new(key, text)
            })
            .collect();
        Self::render(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_long_paths_keep_tail() {
        let reporter = Reporter::new(20);
        let formatted = reporter.format_path("data/raw/2024/january/readings.csv");
        assert!(formatted.starts_with(".../"));
        assert!(formatted.ends_with("readings.csv"));
        assert_eq!(reporter.format_path("short.txt"), "short.txt");
    }

    #[test]
    fn test_unknown_counts() {
        let reporter = Reporter::default();
        let table = reporter.summary_table("nrd:0001", &FileManagerSummary::default());
        assert!(table.contains("unknown"));
        assert!(table.contains("nrd:0001"));
    }

    #[test]
    fn test_files_table_marks_folders() {
        let mut file = FileComponent::new_file("file_1", "docs/readme.txt");
        if let FileComponent::File(f) = &mut file {
            f.size = Some(2048);
        }
        let folder = FileComponent::new_folder("file_0", "docs");
        let table = Reporter::default().files_table(&[folder, file]);
        assert!(table.contains("docs/"));
        assert!(table.contains("docs/readme.txt"));

        let md = json!({"title": "Rainfall", "version": 2});
        let meta = Reporter::default().metadata_table(md.as_object().unwrap());
        assert!(meta.contains("Rainfall"));
    }
}
