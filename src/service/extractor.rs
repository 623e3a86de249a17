use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

/// bfrange 单段展开上限
const MAX_RANGE: usize = 0x1_0000;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("unsupported document type: {0}")]
    UnsupportedMimeType(String),

    #[error("not a valid PDF document: {0}")]
    InvalidDocument(#[source] lopdf::Error),

    #[error("document has no page content")]
    NoPageContent,

    #[error("failed to read text of page {page}: {source}")]
    PageText {
        page: u32,
        #[source]
        source: lopdf::Error,
    },

    #[error("font {font} on page {page} uses {encoding} without a ToUnicode map")]
    UnmappedFont {
        page: u32,
        font: String,
        encoding: String,
    },
}

/// 文档 -> 纯文本；同步接口，由调用方放到阻塞线程池执行
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String, ExtractionError>;
}

/// 基于 lopdf 的 PDF 文本提取
///
/// 页按顺序处理，页内文本行去掉首尾空白后以单个空格连接，
/// 不做版面还原。字体带 ToUnicode 时按 CMap 解码 (Type0 / Identity-H
/// 字体只能这样还原)，其余简单字体走 lopdf 内置编码表。
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String, ExtractionError> {
        if !mime_type.eq_ignore_ascii_case("application/pdf") {
            return Err(ExtractionError::UnsupportedMimeType(mime_type.to_string()));
        }

        let document = Document::load_mem(bytes).map_err(ExtractionError::InvalidDocument)?;
        let pages = document.get_pages();
        if pages.is_empty() {
            return Err(ExtractionError::NoPageContent);
        }

        let mut page_texts = Vec::with_capacity(pages.len());
        for (page, page_id) in &pages {
            let text = normalize(&page_text(&document, *page, *page_id)?);
            if !text.is_empty() {
                page_texts.push(text);
            }
        }

        debug!("PDF 提取完成: {} 页, {} 页有文本", pages.len(), page_texts.len());
        Ok(page_texts.join(" "))
    }
}

/// 遍历页面内容流的文本操作符，按当前字体解码字符串
fn page_text(document: &Document, page: u32, page_id: ObjectId) -> Result<String, ExtractionError> {
    let decoders: BTreeMap<Vec<u8>, FontDecoder> = document
        .get_page_fonts(page_id)
        .into_iter()
        .map(|(name, font)| (name, FontDecoder::for_font(document, font)))
        .collect();
    let content = document
        .get_and_decode_page_content(page_id)
        .map_err(|source| ExtractionError::PageText { page, source })?;

    let mut text = String::new();
    let mut current: Option<(&[u8], &FontDecoder)> = None;
    for operation in &content.operations {
        match operation.operator.as_str() {
            "Tf" => {
                current = operation
                    .operands
                    .first()
                    .and_then(|operand| operand.as_name().ok())
                    .and_then(|name| decoders.get_key_value(name))
                    .map(|(name, decoder)| (name.as_slice(), decoder));
            }
            "Tj" | "TJ" | "'" | "\"" => {
                if operation.operator != "Tj" && operation.operator != "TJ" && !text.ends_with('\n') {
                    text.push('\n');
                }
                collect_text(&mut text, current.map(|(_, d)| d), &operation.operands).map_err(
                    |encoding| ExtractionError::UnmappedFont {
                        page,
                        font: current
                            .map(|(name, _)| String::from_utf8_lossy(name).into_owned())
                            .unwrap_or_default(),
                        encoding,
                    },
                )?;
            }
            "ET" => {
                if !text.ends_with('\n') {
                    text.push('\n');
                }
            }
            _ => {}
        }
    }
    Ok(text)
}

fn collect_text(
    text: &mut String,
    decoder: Option<&FontDecoder>,
    operands: &[Object],
) -> Result<(), String> {
    for operand in operands {
        match operand {
            Object::String(bytes, _) => match decoder {
                Some(decoder) => text.push_str(&decoder.decode(bytes)?),
                None => text.push_str(&Document::decode_text(None, bytes)),
            },
            Object::Array(items) => {
                collect_text(text, decoder, items)?;
                text.push(' ');
            }
            // TJ 中较大的负偏移视为词间距
            Object::Integer(offset) if *offset < -100 => text.push(' '),
            Object::Real(offset) if *offset < -100.0 => text.push(' '),
            _ => {}
        }
    }
    Ok(())
}

#[derive(Debug)]
enum FontDecoder {
    CMap(ToUnicode),
    /// 简单字体: 交给 lopdf 的编码表
    Simple(String),
    /// 复合字体且没有 ToUnicode，字形编号无法还原为文本
    Unmapped(String),
}

impl FontDecoder {
    fn for_font(document: &Document, font: &Dictionary) -> Self {
        let encoding = font.get_font_encoding().to_string();
        let composite = font.get(b"Subtype").and_then(Object::as_name).ok() == Some(b"Type0".as_slice());

        if let Some(cmap) = to_unicode(document, font, if composite { 2 } else { 1 }) {
            return Self::CMap(cmap);
        }
        if composite || encoding.starts_with("Identity") {
            Self::Unmapped(encoding)
        } else {
            Self::Simple(encoding)
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, String> {
        match self {
            Self::CMap(cmap) => Ok(cmap.decode(bytes)),
            Self::Simple(encoding) => Ok(Document::decode_text(Some(encoding.as_str()), bytes)),
            Self::Unmapped(encoding) => Err(encoding.clone()),
        }
    }
}

fn to_unicode(document: &Document, font: &Dictionary, default_width: usize) -> Option<ToUnicode> {
    let (_, object) = document.dereference(font.get(b"ToUnicode").ok()?).ok()?;
    let stream = object.as_stream().ok()?;
    let data = if stream.dict.get(b"Filter").is_ok() {
        stream.decompressed_content().ok()?
    } else {
        stream.content.clone()
    };
    let cmap = ToUnicode::parse(&data, default_width);
    (!cmap.map.is_empty()).then_some(cmap)
}

/// ToUnicode CMap: 字符编码 -> Unicode 文本
#[derive(Debug)]
struct ToUnicode {
    width: usize,
    map: HashMap<u32, String>,
}

impl ToUnicode {
    fn parse(data: &[u8], default_width: usize) -> Self {
        let mut width = None;
        let mut map = HashMap::new();
        let mut tokens = tokenize(data).into_iter();

        while let Some(token) = tokens.next() {
            let Token::Word(word) = token else { continue };
            match word.as_str() {
                "begincodespacerange" => {
                    while let Some(Token::Hex(low)) = tokens.next() {
                        tokens.next();
                        width.get_or_insert(low.len());
                    }
                }
                "beginbfchar" => {
                    while let Some(Token::Hex(src)) = tokens.next() {
                        if let Some(Token::Hex(dst)) = tokens.next() {
                            map.insert(code(&src), utf16(&dst));
                        }
                    }
                }
                "beginbfrange" => {
                    while let Some(Token::Hex(low)) = tokens.next() {
                        let Some(Token::Hex(high)) = tokens.next() else { break };
                        let (low, high) = (code(&low), code(&high));
                        match tokens.next() {
                            Some(Token::Hex(dst)) => {
                                let base = utf16_units(&dst);
                                for (offset, src) in (low..=high).take(MAX_RANGE).enumerate() {
                                    let mut units = base.clone();
                                    if let Some(last) = units.last_mut() {
                                        *last = last.wrapping_add(offset as u16);
                                    }
                                    map.insert(src, String::from_utf16_lossy(&units));
                                }
                            }
                            Some(Token::Open) => {
                                let mut src = low;
                                while let Some(Token::Hex(dst)) = tokens.next() {
                                    map.insert(src, utf16(&dst));
                                    src = src.saturating_add(1);
                                }
                            }
                            _ => break,
                        }
                    }
                }
                _ => {}
            }
        }

        Self {
            width: width.unwrap_or(default_width).clamp(1, 4),
            map,
        }
    }

    /// 未映射的编码直接丢弃
    fn decode(&self, bytes: &[u8]) -> String {
        bytes
            .chunks(self.width)
            .filter_map(|chunk| self.map.get(&code(chunk)))
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug)]
enum Token {
    Hex(Vec<u8>),
    Open,
    Close,
    Word(String),
}

fn tokenize(data: &[u8]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            b if b.is_ascii_whitespace() => i += 1,
            b'%' => {
                while i < data.len() && data[i] != b'\n' && data[i] != b'\r' {
                    i += 1;
                }
            }
            b'<' if data.get(i + 1) == Some(&b'<') => {
                tokens.push(Token::Word("<<".to_string()));
                i += 2;
            }
            b'>' if data.get(i + 1) == Some(&b'>') => {
                tokens.push(Token::Word(">>".to_string()));
                i += 2;
            }
            b'<' => {
                let end = data[i..].iter().position(|b| *b == b'>').map_or(data.len(), |p| i + p);
                tokens.push(Token::Hex(hex_bytes(&data[i + 1..end])));
                i = end + 1;
            }
            b'[' => {
                tokens.push(Token::Open);
                i += 1;
            }
            b']' => {
                tokens.push(Token::Close);
                i += 1;
            }
            b'(' => {
                let mut depth = 0usize;
                while i < data.len() {
                    match data[i] {
                        b'\\' => i += 1,
                        b'(' => depth += 1,
                        b')' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                i += 1;
            }
            _ => {
                let start = i;
                i += 1;
                while i < data.len() && !is_delimiter(data[i]) {
                    i += 1;
                }
                tokens.push(Token::Word(String::from_utf8_lossy(&data[start..i]).into_owned()));
            }
        }
    }
    tokens
}

fn is_delimiter(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b'<' | b'>' | b'[' | b']' | b'(' | b')' | b'/' | b'%')
}

fn hex_bytes(hex: &[u8]) -> Vec<u8> {
    let digits: Vec<u8> = hex
        .iter()
        .filter_map(|b| (*b as char).to_digit(16).map(|d| d as u8))
        .collect();
    digits
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
        .collect()
}

fn code(bytes: &[u8]) -> u32 {
    bytes.iter().take(4).fold(0, |acc, b| (acc << 8) | u32::from(*b))
}

fn utf16_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| (u16::from(pair[0]) << 8) | u16::from(pair.get(1).copied().unwrap_or(0)))
        .collect()
}

fn utf16(bytes: &[u8]) -> String {
    String::from_utf16_lossy(&utf16_units(bytes))
}

fn normalize(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
