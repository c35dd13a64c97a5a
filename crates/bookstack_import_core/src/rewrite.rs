//! Reference rewriting for exported Markdown.
//!
//! Every pass reads the previous pass's output and builds a fresh buffer by
//! copying the bytes between matches, so replacement text is never scanned
//! again. Matching is purely delimiter based (see [`crate::scanner`]); nothing
//! here parses Markdown.

use std::ops::Range;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use tracing::{debug, info};

use crate::model::Attachment;
use crate::scanner::{find_balanced, find_marker};

pub const EMBED_OPENER: &[u8] = br"\<\<";
pub const EMBED_CLOSER: &[u8] = br"\>\>";

/// Uploads a local file as an attachment of the page being rewritten.
pub trait AttachmentUploader {
    fn upload(&mut self, path: &Path) -> Result<Attachment>;
}

/// A `[label](target)` pair located in a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reference {
    label: Range<usize>,
    target: Range<usize>,
    /// Index of the closing parenthesis.
    end: usize,
}

fn match_reference(content: &[u8], bracket_start: usize) -> Option<Reference> {
    let (label_open, label_close) = find_balanced(content, bracket_start, b'[', b']')?;
    let (target_open, target_close) = find_balanced(content, label_close + 1, b'(', b')')?;
    Some(Reference {
        label: label_open + 1..label_close,
        target: target_open + 1..target_close,
        end: target_close,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InternalLink {
    pub label: String,
    pub target: String,
}

/// Replace every local `![label](target)` with a link to a freshly uploaded attachment.
pub fn rewrite_images<U: AttachmentUploader>(
    content: &[u8],
    source_path: &Path,
    uploader: &mut U,
) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(content.len());
    let mut copied = 0;
    let mut index = 0;

    while index < content.len() {
        if content[index] != b'!' {
            index += 1;
            continue;
        }
        let Some(reference) = match_reference(content, index + 1) else {
            index += 1;
            continue;
        };

        let target = decode_target(&content[reference.target.clone()])?;
        if is_remote_target(&target) {
            debug!("leaving remote image {target} untouched");
            index = reference.end + 1;
            continue;
        }

        let path = resolve_target(source_path, &target);
        let attachment = uploader
            .upload(&path)
            .context("upload attachment")?;
        output.extend_from_slice(&content[copied..index]);
        output.extend_from_slice(
            format!("![{}]({})", file_label(&path), attachment.link()).as_bytes(),
        );
        index = reference.end + 1;
        copied = index;
    }

    output.extend_from_slice(&content[copied..]);
    Ok(output)
}

/// Replace every `\<\<[label](target)\>\>` embed with a plain link to an uploaded attachment.
pub fn rewrite_embeds<U: AttachmentUploader>(
    content: &[u8],
    source_path: &Path,
    uploader: &mut U,
) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(content.len());
    let mut copied = 0;
    let mut index = 0;

    while index < content.len() {
        if !content[index..].starts_with(EMBED_OPENER) {
            index += 1;
            continue;
        }
        let Some(reference) = match_reference(content, index + EMBED_OPENER.len()) else {
            index += 1;
            continue;
        };
        // The closer must follow the parenthesis directly.
        let span_end = reference.end + 1 + EMBED_CLOSER.len();
        if find_marker(content, reference.end + 1, EMBED_CLOSER) != Some(span_end - 1) {
            index += 1;
            continue;
        }

        let target = decode_target(&content[reference.target.clone()])?;
        if is_remote_target(&target) {
            debug!("leaving remote embed {target} untouched");
            index = span_end;
            continue;
        }

        let path = resolve_target(source_path, &target);
        let attachment = uploader
            .upload(&path)
            .context("upload attachment")?;
        output.extend_from_slice(&content[copied..index]);
        output.extend_from_slice(
            format!("[{}]({})", file_label(&path), attachment.link()).as_bytes(),
        );
        index = span_end;
        copied = index;
    }

    output.extend_from_slice(&content[copied..]);
    Ok(output)
}

/// Report links whose target uses one of `schemes` (e.g. `onenote:`).
///
/// These point into the source notebook and have no wiki equivalent yet, so
/// they are only collected for manual follow-up; the content is not changed.
pub fn find_internal_links(content: &[u8], schemes: &[String]) -> Result<Vec<InternalLink>> {
    let mut links = Vec::new();

    for index in 0..content.len() {
        if content[index] != b'[' {
            continue;
        }
        let Some(reference) = match_reference(content, index) else {
            continue;
        };

        let target = decode_target(&content[reference.target.clone()])?;
        if schemes
            .iter()
            .any(|scheme| target.starts_with(scheme.as_str()))
        {
            info!("found internal link {target}");
            links.push(InternalLink {
                label: String::from_utf8_lossy(&content[reference.label]).into_owned(),
                target,
            });
        }
    }

    Ok(links)
}

/// Decode a link target as the body of a double-quoted string literal.
///
/// Supports the escapes `\a \b \f \n \r \t \v \\ \"`, `\xHH`, octal `\ooo`,
/// `\uHHHH` and `\UHHHHHHHH`. Unknown escapes, bare quotes and raw newlines are
/// rejected.
pub fn decode_target(raw: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(raw).context("unquote: target is not valid UTF-8")?;
    let mut output: Vec<u8> = Vec::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => bail!("unquote {text:?}: unescaped double quote"),
            '\n' => bail!("unquote {text:?}: newline in target"),
            '\\' => {
                let escape = chars
                    .next()
                    .ok_or_else(|| anyhow!("unquote {text:?}: trailing backslash"))?;
                match escape {
                    'a' => output.push(0x07),
                    'b' => output.push(0x08),
                    'f' => output.push(0x0C),
                    'n' => output.push(b'\n'),
                    'r' => output.push(b'\r'),
                    't' => output.push(b'\t'),
                    'v' => output.push(0x0B),
                    '\\' => output.push(b'\\'),
                    '"' => output.push(b'"'),
                    'x' => {
                        let value = take_digits(&mut chars, 2, 16, text)?;
                        output.push(value as u8);
                    }
                    '0'..='7' => {
                        let rest = take_digits(&mut chars, 2, 8, text)?;
                        let value = (escape as u32 - '0' as u32) * 64 + rest;
                        let byte = u8::try_from(value)
                            .map_err(|_| anyhow!("unquote {text:?}: octal escape out of range"))?;
                        output.push(byte);
                    }
                    'u' | 'U' => {
                        let width = if escape == 'u' { 4 } else { 8 };
                        let value = take_digits(&mut chars, width, 16, text)?;
                        let decoded = char::from_u32(value).ok_or_else(|| {
                            anyhow!("unquote {text:?}: invalid code point {value:#x}")
                        })?;
                        let mut buffer = [0u8; 4];
                        output.extend_from_slice(decoded.encode_utf8(&mut buffer).as_bytes());
                    }
                    other => bail!("unquote {text:?}: unknown escape \\{other}"),
                }
            }
            other => {
                let mut buffer = [0u8; 4];
                output.extend_from_slice(other.encode_utf8(&mut buffer).as_bytes());
            }
        }
    }

    String::from_utf8(output).with_context(|| format!("unquote {text:?}: escapes produce invalid UTF-8"))
}

fn take_digits(chars: &mut std::str::Chars<'_>, count: usize, radix: u32, text: &str) -> Result<u32> {
    let mut value = 0u32;
    for _ in 0..count {
        let digit = chars
            .next()
            .and_then(|ch| ch.to_digit(radix))
            .ok_or_else(|| anyhow!("unquote {text:?}: malformed escape"))?;
        value = value * radix + digit;
    }
    Ok(value)
}

/// Targets with a URL scheme (`https:`, `data:`, …) are not local files.
/// Single-letter schemes are treated as Windows drive letters.
pub fn is_remote_target(target: &str) -> bool {
    let Some((scheme, _)) = target.split_once(':') else {
        return false;
    };
    scheme.len() > 1
        && scheme
            .chars()
            .next()
            .is_some_and(|first| first.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'))
}

/// Resolve `target` against the directory holding `source_path`.
pub fn resolve_target(source_path: &Path, target: &str) -> PathBuf {
    let base = source_path.parent().unwrap_or_else(|| Path::new(""));
    normalize_pathbuf(&base.join(target))
}

fn normalize_pathbuf(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Path::new(std::path::MAIN_SEPARATOR_STR)),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
