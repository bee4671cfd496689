//! Canonicalizes whatever the OCR engine returned.
//!
//! Engines disagree on key names and sometimes return only markdown. Every
//! input maps to an [`OcrResult`]; nothing here fails. Feeding a normalized
//! result back in (serialized) yields the same result.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

const BLOCK_KEYS: &[&str] = &["blocks", "ocrBlocks", "ocr_blocks", "items"];
const MARKDOWN_KEYS: &[&str] = &[
    "layoutMarkdown",
    "layout_markdown",
    "markdown",
    "rawMarkdown",
    "md",
];
const QUALITY_KEYS: &[&str] = &["qualityScore", "quality_score", "confidence", "score"];
const TEXT_KEYS: &[&str] = &["text", "plainText", "plain_text", "rawText", "raw_text"];
const WRAPPER_KEYS: &[&str] = &["result", "data", "ocr"];
const MAX_UNWRAP_DEPTH: usize = 3;

const KIND_KEYS: &[&str] = &["type", "kind", "blockType", "block_type"];
const CONTENT_KEYS: &[&str] = &["content", "text", "markdown", "value"];
const LATEX_KEYS: &[&str] = &["latex", "formula"];
const CONFIDENCE_KEYS: &[&str] = &["confidence", "score"];
const BBOX_KEYS: &[&str] = &["bbox", "box"];

static TEX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$[^$]+\$|\\\(|\\\[|\\(frac|sqrt|int|sum|cdot|times|pi|alpha|beta|theta|infty)\b")
        .unwrap()
});
static EQUATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z\s+\-*/=^().,<>²³√π]+$").unwrap());
static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z]{2,}").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Text,
    Formula,
    Table,
    Figure,
}

impl BlockKind {
    fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "text" | "paragraph" | "line" | "title" | "heading" | "list" | "caption" => {
                Some(BlockKind::Text)
            }
            "formula" | "math" | "equation" | "latex" | "expression" => Some(BlockKind::Formula),
            "table" => Some(BlockKind::Table),
            "figure" | "image" | "picture" | "diagram" => Some(BlockKind::Figure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrBlock {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub blocks: Vec<OcrBlock>,
    pub layout_markdown: String,
    pub quality_score: Option<f64>,
    pub text: String,
}

impl OcrResult {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.layout_markdown.is_empty() && self.text.is_empty()
    }

    pub fn formula_blocks(&self) -> impl Iterator<Item = &OcrBlock> {
        self.blocks.iter().filter(|b| b.kind == BlockKind::Formula)
    }
}

pub fn normalize(raw: &Value) -> OcrResult {
    normalize_at(raw, 0)
}

fn normalize_at(raw: &Value, depth: usize) -> OcrResult {
    match raw {
        Value::String(s) => from_parts(Vec::new(), clean_text(s), None, None),
        Value::Array(items) => from_parts(collect_blocks(items), String::new(), None, None),
        Value::Object(map) => {
            let known = BLOCK_KEYS
                .iter()
                .chain(MARKDOWN_KEYS)
                .chain(QUALITY_KEYS)
                .chain(TEXT_KEYS)
                .any(|k| map.contains_key(*k));
            if !known && depth < MAX_UNWRAP_DEPTH {
                if let Some(inner) = WRAPPER_KEYS.iter().find_map(|k| map.get(*k)) {
                    return normalize_at(inner, depth + 1);
                }
            }
            let blocks = match first(map, BLOCK_KEYS) {
                Some(Value::Array(items)) => collect_blocks(items),
                _ => Vec::new(),
            };
            let markdown = first_str(map, MARKDOWN_KEYS).unwrap_or_default();
            let quality = first(map, QUALITY_KEYS).and_then(score);
            let text = first_str(map, TEXT_KEYS);
            from_parts(blocks, markdown, quality, text)
        }
        _ => OcrResult::default(),
    }
}

fn from_parts(
    mut blocks: Vec<OcrBlock>,
    mut layout_markdown: String,
    mut quality_score: Option<f64>,
    text: Option<String>,
) -> OcrResult {
    if layout_markdown.is_empty() && !blocks.is_empty() {
        layout_markdown = clean_text(&blocks_to_markdown(&blocks));
    }
    if blocks.is_empty() && !layout_markdown.is_empty() {
        blocks.push(OcrBlock {
            kind: infer_kind(&layout_markdown, false),
            content: layout_markdown.clone(),
            latex: None,
            confidence: None,
            bbox: None,
        });
    }
    if quality_score.is_none() {
        let scores: Vec<f64> = blocks.iter().filter_map(|b| b.confidence).collect();
        if !scores.is_empty() {
            quality_score = Some(scores.iter().sum::<f64>() / scores.len() as f64);
        }
    }
    let text = match text {
        Some(t) if !t.is_empty() => t,
        _ => clean_text(&markdown_to_text(&layout_markdown)),
    };
    OcrResult {
        blocks,
        layout_markdown,
        quality_score,
        text,
    }
}

fn collect_blocks(items: &[Value]) -> Vec<OcrBlock> {
    items.iter().filter_map(block).collect()
}

fn block(v: &Value) -> Option<OcrBlock> {
    let (kind_name, content, latex, confidence, bbox) = match v {
        Value::String(s) => (None, clean_text(s), None, None, None),
        Value::Object(map) => (
            first(map, KIND_KEYS).and_then(Value::as_str),
            first_str(map, CONTENT_KEYS).unwrap_or_default(),
            first_str(map, LATEX_KEYS),
            first(map, CONFIDENCE_KEYS).and_then(score),
            first(map, BBOX_KEYS).and_then(bbox),
        ),
        _ => return None,
    };

    let content = if content.is_empty() {
        latex.clone().unwrap_or_default()
    } else {
        content
    };
    if content.is_empty() {
        return None;
    }

    let kind = kind_name
        .and_then(BlockKind::from_name)
        .unwrap_or_else(|| infer_kind(&content, latex.is_some()));

    Some(OcrBlock {
        kind,
        content,
        latex,
        confidence,
        bbox,
    })
}

fn infer_kind(content: &str, has_latex: bool) -> BlockKind {
    if has_latex || looks_like_math(content) {
        BlockKind::Formula
    } else {
        BlockKind::Text
    }
}

fn looks_like_math(s: &str) -> bool {
    if TEX_RE.is_match(s) {
        return true;
    }
    // Bare equations like "2x + 3 = 7": operators and digits, single-letter variables only.
    s.contains('=')
        && s.chars().any(|c| c.is_ascii_digit())
        && EQUATION_RE.is_match(s)
        && !WORD_RE.is_match(s)
}

fn first<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k).filter(|v| !v.is_null()))
}

fn first_str(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k).and_then(Value::as_str))
        .map(clean_text)
        .find(|s| !s.is_empty())
}

/// Confidence-like number in `[0,1]`; values in `(1,100]` are read as percentages.
fn score(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok()?,
        _ => return None,
    };
    if !n.is_finite() {
        return None;
    }
    let n = if n > 1.0 && n <= 100.0 { n / 100.0 } else { n };
    Some(n.clamp(0.0, 1.0))
}

fn bbox(v: &Value) -> Option<[f64; 4]> {
    let nums: Vec<f64> = match v {
        Value::Array(items) => items.iter().filter_map(Value::as_f64).collect(),
        Value::Object(map) => ["x", "y", "width", "height"]
            .iter()
            .filter_map(|k| map.get(*k).and_then(Value::as_f64))
            .collect(),
        _ => return None,
    };
    match nums.as_slice() {
        [a, b, c, d] => Some([*a, *b, *c, *d]),
        _ => None,
    }
}

fn blocks_to_markdown(blocks: &[OcrBlock]) -> String {
    blocks
        .iter()
        .map(|b| match (&b.kind, &b.latex) {
            (BlockKind::Formula, Some(latex)) => format!("$${latex}$$"),
            _ => b.content.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Newlines to LF, control characters dropped (tabs and newlines kept), NFC, trimmed.
pub fn clean_text(s: &str) -> String {
    let s = s.replace("\r\n", "\n").replace('\r', "\n");
    let s: String = s
        .chars()
        .filter(|&ch| ch == '\n' || ch == '\t' || !ch.is_control())
        .nfc()
        .collect();
    s.trim().to_string()
}

/// Strips the markdown decoration that matters for a plain-text preview.
pub fn markdown_to_text(md: &str) -> String {
    md.lines()
        .map(|line| {
            let line = line.trim_start();
            let line = line.trim_start_matches('#').trim_start();
            line.replace("**", "").replace("__", "").replace('`', "")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
