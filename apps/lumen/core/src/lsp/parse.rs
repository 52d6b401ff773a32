//! Response parsing helpers
//!
//! Servers answer with several shapes for the same request (a single
//! location or an array, a `CompletionList` or a bare item array, ...).
//! These helpers normalize them into the crate's types and never fail:
//! anything unrecognized becomes an empty result.

use serde_json::Value;
use std::collections::HashMap;

use crate::types::{
    Diagnostic, DiagnosticSeverity, LspCompletionItem, LspCompletionList, LspHover, LspLocation,
    LspMarkupContent, LspPosition, LspRange, LspTextEdit, LspWorkspaceEdit,
};

pub fn parse_position(value: &Value) -> Option<LspPosition> {
    let line = value.get("line")?.as_u64()? as u32;
    let character = value.get("character")?.as_u64()? as u32;
    Some(LspPosition { line, character })
}

pub fn parse_range(value: &Value) -> Option<LspRange> {
    let start = parse_position(value.get("start")?)?;
    let end = parse_position(value.get("end")?)?;
    Some(LspRange { start, end })
}

pub fn parse_location(value: &Value) -> Option<LspLocation> {
    let uri = value.get("uri")?.as_str()?.to_string();
    let range = parse_range(value.get("range")?)?;
    Some(LspLocation { uri, range })
}

fn parse_location_link(value: &Value) -> Option<LspLocation> {
    let uri = value.get("targetUri")?.as_str()?.to_string();
    let range = value
        .get("targetSelectionRange")
        .or_else(|| value.get("targetRange"))
        .and_then(parse_range)?;
    Some(LspLocation { uri, range })
}

/// `Location | Location[] | LocationLink[] | null`
pub fn parse_locations(value: &Value) -> Vec<LspLocation> {
    let single = |item: &Value| parse_location(item).or_else(|| parse_location_link(item));

    match value {
        Value::Array(items) => items.iter().filter_map(single).collect(),
        Value::Object(_) => single(value).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn marked_string(value: &Value) -> Option<String> {
    if let Some(s) = value.as_str() {
        return Some(s.to_string());
    }
    let code = value.get("value")?.as_str()?;
    let language = value
        .get("language")
        .and_then(Value::as_str)
        .unwrap_or("text");
    Some(format!("```{}\n{}\n```", language, code))
}

/// `string | MarkupContent | MarkedString | MarkedString[]`
pub fn parse_markup_content(value: &Value) -> LspMarkupContent {
    if let Some(s) = value.as_str() {
        return LspMarkupContent::plaintext(s);
    }

    if let (Some(kind), Some(text)) = (
        value.get("kind").and_then(Value::as_str),
        value.get("value").and_then(Value::as_str),
    ) {
        return LspMarkupContent {
            kind: kind.to_string(),
            value: text.to_string(),
        };
    }

    if value.is_object() {
        if let Some(text) = marked_string(value) {
            return LspMarkupContent::markdown(text);
        }
    }

    if let Some(items) = value.as_array() {
        let parts: Vec<String> = items.iter().filter_map(marked_string).collect();
        return LspMarkupContent::markdown(parts.join("\n\n"));
    }

    LspMarkupContent::plaintext(String::new())
}

pub fn parse_hover(value: &Value) -> Option<LspHover> {
    let contents = parse_markup_content(value.get("contents")?);
    if contents.value.is_empty() {
        return None;
    }
    Some(LspHover {
        contents,
        range: value.get("range").and_then(parse_range),
    })
}

pub fn parse_text_edit(value: &Value) -> Option<LspTextEdit> {
    let range = parse_range(value.get("range")?)?;
    let new_text = value.get("newText")?.as_str()?.to_string();
    Some(LspTextEdit { range, new_text })
}

pub fn parse_text_edits(value: &Value) -> Vec<LspTextEdit> {
    value
        .as_array()
        .map(|edits| edits.iter().filter_map(parse_text_edit).collect())
        .unwrap_or_default()
}

pub fn parse_completion_item(value: &Value) -> Option<LspCompletionItem> {
    let string = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);

    Some(LspCompletionItem {
        label: value.get("label")?.as_str()?.to_string(),
        kind: value.get("kind").and_then(Value::as_u64).map(|k| k as u32),
        detail: string("detail"),
        documentation: value.get("documentation").map(parse_markup_content),
        insert_text: string("insertText"),
        insert_text_format: value
            .get("insertTextFormat")
            .and_then(Value::as_u64)
            .map(|f| f as u32),
        sort_text: string("sortText"),
        filter_text: string("filterText"),
        text_edit: value.get("textEdit").and_then(parse_text_edit),
    })
}

/// `CompletionList | CompletionItem[] | null`
pub fn parse_completion_list(value: &Value) -> LspCompletionList {
    let (is_incomplete, items) = match value {
        Value::Array(items) => (false, items.as_slice()),
        Value::Object(_) => (
            value
                .get("isIncomplete")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            value
                .get("items")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        ),
        _ => (false, &[][..]),
    };

    LspCompletionList {
        is_incomplete,
        items: items.iter().filter_map(parse_completion_item).collect(),
    }
}

/// Only the `changes` map is read; `documentChanges` is flattened into it
/// when the server uses versioned edits.
pub fn parse_workspace_edit(value: &Value) -> LspWorkspaceEdit {
    let mut changes: HashMap<String, Vec<LspTextEdit>> = HashMap::new();

    if let Some(map) = value.get("changes").and_then(Value::as_object) {
        for (uri, edits) in map {
            changes.insert(uri.clone(), parse_text_edits(edits));
        }
    }

    if let Some(document_changes) = value.get("documentChanges").and_then(Value::as_array) {
        for change in document_changes {
            let Some(uri) = change
                .get("textDocument")
                .and_then(|doc| doc.get("uri"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            let edits = change.get("edits").map(parse_text_edits).unwrap_or_default();
            changes.entry(uri.to_string()).or_default().extend(edits);
        }
    }

    LspWorkspaceEdit { changes }
}

fn parse_diagnostic(value: &Value) -> Option<Diagnostic> {
    let code = value.get("code").and_then(|code| match code {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    Some(Diagnostic {
        range: parse_range(value.get("range")?)?,
        severity: value
            .get("severity")
            .and_then(Value::as_u64)
            .map(DiagnosticSeverity::from_lsp)
            .unwrap_or(DiagnosticSeverity::Error),
        message: value.get("message")?.as_str()?.to_string(),
        source: value.get("source").and_then(Value::as_str).map(str::to_string),
        code,
    })
}

/// `textDocument/publishDiagnostics` params → `(uri, diagnostics)`
pub fn parse_publish_diagnostics(params: &Value) -> Option<(String, Vec<Diagnostic>)> {
    let uri = params.get("uri")?.as_str()?.to_string();
    let diagnostics = params
        .get("diagnostics")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_diagnostic).collect())
        .unwrap_or_default();
    Some((uri, diagnostics))
}
