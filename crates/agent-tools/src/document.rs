//! Document tools
//!
//! `document_parser` loads a plain-text document from disk; `document_search`
//! ranks the paragraphs of already-loaded content against a query.

use std::ffi::OsStr;
use std::path::Path;

use agent_core::message::truncate_chars;
use agent_core::{
    AgentError, Result, Tool, ToolDefinition, ToolParameter, ToolParams, ToolParamsExt,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

/// Largest file the parser will load
pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Formats read as text. Binary office formats are not handled here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentFormat {
    Text,
    Markdown,
    Csv,
    Tsv,
    Json,
}

impl DocumentFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "" | "txt" | "text" | "log" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            "csv" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Json => "json",
        }
    }

    const fn delimiter(self) -> Option<char> {
        match self {
            Self::Csv => Some(','),
            Self::Tsv => Some('\t'),
            _ => None,
        }
    }
}

/// Reads a document from disk
#[derive(Clone, Debug)]
pub struct DocumentParserTool {
    max_bytes: u64,
}

impl Default for DocumentParserTool {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl DocumentParserTool {
    pub const NAME: &'static str = "document_parser";

    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

#[async_trait]
impl Tool for DocumentParserTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            Self::NAME,
            "Read a document file (txt, md, csv, tsv, json) and return its text content",
        )
        .param("file_path", ToolParameter::string("Path of the document file").required())
        .param(
            "extract_tables",
            ToolParameter::boolean("Also return rows of delimited (csv/tsv) files").with_default(false),
        )
    }

    async fn execute(&self, params: &ToolParams) -> Result<Value> {
        let file_path = params.str_param("file_path")?;
        let extract_tables = params.bool_or("extract_tables", false);

        let path = Path::new(file_path);
        let extension = path.extension().and_then(OsStr::to_str).unwrap_or_default();
        let format = DocumentFormat::from_extension(extension).ok_or_else(|| {
            AgentError::ToolExecution(format!("unsupported document format: .{extension}"))
        })?;

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| AgentError::ToolExecution(format!("cannot open '{file_path}': {e}")))?;
        if !metadata.is_file() {
            return Err(AgentError::ToolExecution(format!("'{file_path}' is not a file")));
        }
        if metadata.len() > self.max_bytes {
            return Err(AgentError::ToolExecution(format!(
                "'{file_path}' is {} bytes, limit is {}",
                metadata.len(),
                self.max_bytes
            )));
        }

        let bytes = tokio::fs::read(path).await?;
        let content = String::from_utf8_lossy(&bytes).into_owned();
        debug!(path = %file_path, format = format.as_str(), bytes = bytes.len(), "Parsed document");

        let mut output = json!({
            "file_path": file_path,
            "format": format.as_str(),
            "char_count": content.chars().count(),
            "line_count": content.lines().count(),
            "word_count": content.split_whitespace().count(),
            "file_info": {
                "name": path.file_name().and_then(OsStr::to_str).unwrap_or_default(),
                "extension": extension,
                "size_bytes": metadata.len(),
            },
        });
        if extract_tables {
            output["tables"] = match format.delimiter() {
                Some(delimiter) => json!([split_rows(&content, delimiter)]),
                None => json!([]),
            };
        }
        output["content"] = Value::String(content);
        Ok(output)
    }
}

/// Naive delimited split; quoted fields are not unescaped
fn split_rows(content: &str, delimiter: char) -> Vec<Vec<String>> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.split(delimiter).map(|cell| cell.trim().to_string()).collect())
        .collect()
}

/// Ranks paragraphs of a document by relevance to a query
#[derive(Clone, Copy, Debug, Default)]
pub struct DocumentSearchTool;

impl DocumentSearchTool {
    pub const NAME: &'static str = "document_search";
}

#[async_trait]
impl Tool for DocumentSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            Self::NAME,
            "Search document content for a query and return the most relevant paragraphs",
        )
        .param("document_content", ToolParameter::string("Document text").required())
        .param("query", ToolParameter::string("What to look for").required())
        .param(
            "max_results",
            ToolParameter::integer("Maximum number of paragraphs to return").with_default(3),
        )
        .param(
            "context_size",
            ToolParameter::integer("Characters of each paragraph to preview").with_default(200),
        )
    }

    async fn execute(&self, params: &ToolParams) -> Result<Value> {
        let content = params.str_param("document_content")?;
        let query = params.str_param("query")?.trim();
        if query.is_empty() {
            return Err(AgentError::ToolValidation("query must not be empty".into()));
        }
        let max_results = usize::try_from(params.i64_or("max_results", 3)).unwrap_or(0);
        let context_size = usize::try_from(params.i64_or("context_size", 200)).unwrap_or(0);

        let mut matches = rank_paragraphs(content, query);
        let total = matches.len();
        matches.truncate(max_results);

        let results: Vec<Value> = matches
            .into_iter()
            .map(|m| {
                json!({
                    "paragraph": m.paragraph,
                    "score": m.score,
                    "index": m.index,
                    "preview": truncate_chars(m.paragraph, context_size),
                })
            })
            .collect();

        Ok(json!({
            "query": query,
            "total_matches": total,
            "search_summary": format!(
                "Found {total} relevant paragraphs, returning the top {}",
                results.len()
            ),
            "results": results,
        }))
    }
}

#[derive(Debug, PartialEq, Eq)]
struct ParagraphMatch<'a> {
    paragraph: &'a str,
    index: usize,
    score: u32,
}

/// Score every non-blank line: +10 when the whole query appears, +2 per query
/// word found anywhere, +1 per query word found inside a single token.
/// Highest score first, then document order.
fn rank_paragraphs<'a>(content: &'a str, query: &str) -> Vec<ParagraphMatch<'a>> {
    let query = query.to_lowercase();
    let words: Vec<&str> = query.split_whitespace().collect();

    let mut matches: Vec<ParagraphMatch<'a>> = content
        .lines()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .enumerate()
        .filter_map(|(index, paragraph)| {
            let lower = paragraph.to_lowercase();
            let mut score = 0;
            if lower.contains(&query) {
                score += 10;
            }
            for word in &words {
                if lower.contains(word) {
                    score += 2;
                }
                if lower.split_whitespace().any(|token| token.contains(word)) {
                    score += 1;
                }
            }
            (score > 0).then_some(ParagraphMatch {
                paragraph,
                index,
                score,
            })
        })
        .collect();

    matches.sort_unstable_by(|a, b| b.score.cmp(&a.score).then(a.index.cmp(&b.index)));
    matches
}
