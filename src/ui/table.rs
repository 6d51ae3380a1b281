use crate::storage::{FileSummary, Repository};
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: impl ToString) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

#[derive(Tabled)]
struct RepoRow {
    #[tabled(rename = "Repository")]
    name: String,
    #[tabled(rename = "Language")]
    language: String,
    #[tabled(rename = "Revision")]
    revision: String,
    #[tabled(rename = "Last synced")]
    synced: String,
}

pub fn repos_table(repos: &[Repository]) -> String {
    let rows: Vec<RepoRow> = repos
        .iter()
        .map(|r| RepoRow {
            name: r.full_name.clone(),
            language: r.language.clone().unwrap_or_else(|| "-".to_string()),
            revision: r
                .last_revision
                .as_deref()
                .map(short_sha)
                .unwrap_or_else(|| "-".to_string()),
            synced: r
                .last_synced_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string()),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

#[derive(Tabled)]
struct FileRow {
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Language")]
    language: String,
    #[tabled(rename = "Lines")]
    lines: usize,
    #[tabled(rename = "Tokens")]
    tokens: usize,
    #[tabled(rename = "Symbols")]
    symbols: usize,
}

pub fn files_table(files: &[FileSummary]) -> String {
    let rows: Vec<FileRow> = files
        .iter()
        .map(|f| FileRow {
            path: f.path.clone(),
            language: f.language.clone(),
            lines: f.line_count,
            tokens: f.token_count,
            symbols: f.symbol_count,
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

fn short_sha(sha: &str) -> String {
    sha.chars().take(10).collect()
}
