//! PDF rendering of a [`ReportDocument`] with lopdf.
//!
//! US Letter pages, built-in Helvetica fonts (WinAnsi), images embedded as
//! raw RGB XObjects. No wall-clock data or random identifiers are written,
//! so the output is a pure function of the document.

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use models::{AggregateResult, ReportSettings};

use crate::error::ReportError;
use crate::layout::{case_document, Block, Figure, ReportDocument};
use crate::file_stem;

const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 54.0;
const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;

const REGULAR: &str = "F1";
const BOLD: &str = "F2";

const TITLE_COLOR: [f32; 3] = [0.118, 0.533, 0.898];
const HEADING_COLOR: [f32; 3] = [0.259, 0.259, 0.259];
const WARNING_COLOR: [f32; 3] = [0.776, 0.157, 0.157];
const TEXT_COLOR: [f32; 3] = [0.0, 0.0, 0.0];
const TABLE_HEADER_FILL: [f32; 3] = [0.118, 0.533, 0.898];
const TABLE_RULE: [f32; 3] = [0.8, 0.8, 0.8];

const MAX_FIGURE_WIDTH: f32 = 216.0;
const FIGURE_GAP: f32 = 18.0;

fn real(value: f32) -> Object {
    value.into()
}

fn pdf_err(e: impl std::fmt::Display) -> ReportError {
    ReportError::Pdf(e.to_string())
}

/// Maps text onto the WinAnsi subset the standard fonts can show.
/// Markdown emphasis markers are dropped.
fn encode_text(text: &str) -> Vec<u8> {
    let cleaned = text.replace("**", "");
    let mut out = Vec::with_capacity(cleaned.len());
    for c in cleaned.chars() {
        match c {
            '→' => out.extend_from_slice(b"->"),
            '█' => out.push(b'#'),
            '⚠' => out.push(b'!'),
            '–' | '—' | '−' => out.push(b'-'),
            '‘' | '’' => out.push(b'\''),
            '“' | '”' => out.push(b'"'),
            '•' => out.push(b'-'),
            '\t' => out.push(b' '),
            c if (c as u32) < 0x20 => {}
            c if (c as u32) < 0x80 || ((c as u32) >= 0xA0 && (c as u32) <= 0xFF) => {
                out.push(c as u32 as u8)
            }
            _ => out.push(b'?'),
        }
    }
    out
}

/// Approximate Helvetica advance width in points.
fn text_width(text: &str, size: f32, bold: bool) -> f32 {
    let em: f32 = text
        .chars()
        .map(|c| match c {
            'i' | 'j' | 'l' | '.' | ',' | ':' | ';' | '\'' | '|' | '!' => 0.278,
            ' ' | 'f' | 't' | 'I' | '(' | ')' | '[' | ']' | '/' | '-' => 0.333,
            'm' | 'w' | 'M' | 'W' | '%' | '@' => 0.889,
            c if c.is_ascii_uppercase() => 0.722,
            c if c.is_ascii_digit() => 0.556,
            _ => 0.556,
        })
        .sum();
    em * size * if bold { 1.05 } else { 1.0 }
}

fn wrap(text: &str, size: f32, bold: bool, width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let mut pieces = split_token(word, size, bold, width);
            let last = pieces.pop().unwrap_or_default();
            if !pieces.is_empty() {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                lines.extend(pieces);
                current = last;
                continue;
            }
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };
            if text_width(&candidate, size, bold) <= width || current.is_empty() {
                current = candidate;
            } else {
                lines.push(std::mem::take(&mut current));
                current = word.to_string();
            }
        }
        lines.push(current);
    }
    lines
}

/// Breaks a token wider than `width` into pieces that each fit.
fn split_token(token: &str, size: f32, bold: bool, width: f32) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut piece = String::new();
    for c in token.chars() {
        piece.push(c);
        if piece.chars().count() > 1 && text_width(&piece, size, bold) > width {
            piece.pop();
            pieces.push(std::mem::take(&mut piece));
            piece.push(c);
        }
    }
    if !piece.is_empty() {
        pieces.push(piece);
    }
    pieces
}

struct PdfWriter {
    doc: Document,
    pages_id: ObjectId,
    regular_id: ObjectId,
    bold_id: ObjectId,
    page_ids: Vec<ObjectId>,
    ops: Vec<Operation>,
    page_images: Vec<(String, ObjectId)>,
    image_count: usize,
    y: f32,
}

impl PdfWriter {
    fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let regular_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });
        Self {
            doc,
            pages_id,
            regular_id,
            bold_id,
            page_ids: Vec::new(),
            ops: Vec::new(),
            page_images: Vec::new(),
            image_count: 0,
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn finish_page(&mut self) -> Result<(), ReportError> {
        let number = self.page_ids.len() + 1;
        let footer = format!("Page {number}");
        let footer_x = PAGE_WIDTH - MARGIN - text_width(&footer, 8.0, false);
        self.text_at(&footer, footer_x, MARGIN / 2.0, 8.0, false, HEADING_COLOR);

        let content = Content {
            operations: std::mem::take(&mut self.ops),
        };
        let content_id = self
            .doc
            .add_object(Stream::new(dictionary! {}, content.encode().map_err(pdf_err)?));

        let mut xobjects = Dictionary::new();
        for (name, id) in self.page_images.drain(..) {
            xobjects.set(name, id);
        }
        let resources = dictionary! {
            "Font" => dictionary! {
                REGULAR => self.regular_id,
                BOLD => self.bold_id,
            },
            "XObject" => xobjects,
        };
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
            "Resources" => resources,
        });
        self.page_ids.push(page_id);
        self.y = PAGE_HEIGHT - MARGIN;
        Ok(())
    }

    /// Starts a new page unless `height` more points fit on this one.
    fn ensure_space(&mut self, height: f32) -> Result<(), ReportError> {
        if self.y - height < MARGIN && self.y < PAGE_HEIGHT - MARGIN {
            self.finish_page()?;
        }
        Ok(())
    }

    fn text_at(&mut self, text: &str, x: f32, y: f32, size: f32, bold: bool, color: [f32; 3]) {
        let font = if bold { BOLD } else { REGULAR };
        self.ops.extend([
            Operation::new("BT", vec![]),
            Operation::new("rg", color.iter().map(|c| real(*c)).collect()),
            Operation::new("Tf", vec![Object::Name(font.as_bytes().to_vec()), real(size)]),
            Operation::new("Td", vec![real(x), real(y)]),
            Operation::new("Tj", vec![Object::string_literal(encode_text(text))]),
            Operation::new("ET", vec![]),
        ]);
    }

    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: [f32; 3]) {
        self.ops.extend([
            Operation::new("rg", color.iter().map(|c| real(*c)).collect()),
            Operation::new("re", vec![real(x), real(y), real(w), real(h)]),
            Operation::new("f", vec![]),
        ]);
    }

    fn lines(
        &mut self,
        text: &str,
        size: f32,
        bold: bool,
        color: [f32; 3],
        indent: f32,
    ) -> Result<(), ReportError> {
        let leading = size * 1.3;
        for line in wrap(text, size, bold, CONTENT_WIDTH - indent) {
            self.ensure_space(leading)?;
            self.y -= leading;
            self.text_at(&line, MARGIN + indent, self.y, size, bold, color);
        }
        Ok(())
    }

    fn title(&mut self, title: &str) -> Result<(), ReportError> {
        let size = 16.0;
        let x = MARGIN + ((CONTENT_WIDTH - text_width(title, size, true)) / 2.0).max(0.0);
        self.ensure_space(size * 2.0)?;
        self.y -= size * 1.3;
        self.text_at(title, x, self.y, size, true, TITLE_COLOR);
        self.y -= size * 0.7;
        Ok(())
    }

    fn key_values(&mut self, pairs: &[(String, String)]) -> Result<(), ReportError> {
        let size = 10.0;
        let leading = size * 1.4;
        for (key, value) in pairs {
            self.ensure_space(leading)?;
            self.y -= leading;
            let label = format!("{key}: ");
            let value_x = MARGIN + text_width(&label, size, true);
            self.text_at(&label, MARGIN, self.y, size, true, TEXT_COLOR);
            self.text_at(value, value_x, self.y, size, false, TEXT_COLOR);
        }
        Ok(())
    }

    fn table(&mut self, header: &[String], rows: &[Vec<String>]) -> Result<(), ReportError> {
        let columns = header.len().max(1);
        let col_width = CONTENT_WIDTH / columns as f32;
        let size = 9.0;
        let row_height = 15.0;

        self.ensure_space(row_height * 2.0)?;
        self.y -= row_height;
        self.fill_rect(MARGIN, self.y, CONTENT_WIDTH, row_height, TABLE_HEADER_FILL);
        for (idx, cell) in header.iter().enumerate() {
            let x = MARGIN + idx as f32 * col_width + 4.0;
            self.text_at(cell, x, self.y + 4.0, size, true, [1.0, 1.0, 1.0]);
        }

        for row in rows {
            self.ensure_space(row_height)?;
            self.y -= row_height;
            for (idx, cell) in row.iter().enumerate().take(columns) {
                let x = MARGIN + idx as f32 * col_width + 4.0;
                let fitted = fit(cell, size, col_width - 8.0);
                self.text_at(&fitted, x, self.y + 4.0, size, false, TEXT_COLOR);
            }
            self.fill_rect(MARGIN, self.y, CONTENT_WIDTH, 0.5, TABLE_RULE);
        }
        self.y -= 6.0;
        Ok(())
    }

    fn add_image(&mut self, image: &RgbImage) -> String {
        self.image_count += 1;
        let name = format!("Im{}", self.image_count);
        let (width, height) = image.dimensions();
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            image.as_raw().clone(),
        );
        let id = self.doc.add_object(stream);
        self.page_images.push((name.clone(), id));
        name
    }

    fn figures(&mut self, figures: &[Figure]) -> Result<(), ReportError> {
        let visible: Vec<&Figure> = figures
            .iter()
            .filter(|f| f.image.width() > 0 && f.image.height() > 0)
            .collect();
        if visible.is_empty() {
            return Ok(());
        }

        let n = visible.len() as f32;
        let width = ((CONTENT_WIDTH - FIGURE_GAP * (n - 1.0)) / n).min(MAX_FIGURE_WIDTH);
        let height = visible
            .iter()
            .map(|f| width * f.image.height() as f32 / f.image.width() as f32)
            .fold(0.0f32, f32::max)
            .min(PAGE_HEIGHT - 2.0 * MARGIN - 40.0);
        let caption_size = 9.0;

        self.ensure_space(height + caption_size * 3.0)?;
        self.y -= 6.0;
        let top = self.y;
        let row_width = width * n + FIGURE_GAP * (n - 1.0);
        let start_x = MARGIN + (CONTENT_WIDTH - row_width) / 2.0;

        for (idx, figure) in visible.iter().enumerate() {
            let x = start_x + idx as f32 * (width + FIGURE_GAP);
            let h = (width * figure.image.height() as f32 / figure.image.width() as f32).min(height);
            let name = self.add_image(&figure.image);
            self.ops.extend([
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![real(width), real(0.0), real(0.0), real(h), real(x), real(top - h)],
                ),
                Operation::new("Do", vec![Object::Name(name.into_bytes())]),
                Operation::new("Q", vec![]),
            ]);
            let caption_x = x + ((width - text_width(&figure.caption, caption_size, true)) / 2.0).max(0.0);
            self.text_at(
                &figure.caption,
                caption_x,
                top - height - caption_size * 1.4,
                caption_size,
                true,
                HEADING_COLOR,
            );
        }
        self.y = top - height - caption_size * 2.4;
        Ok(())
    }

    fn block(&mut self, block: &Block) -> Result<(), ReportError> {
        match block {
            Block::Heading(text) => {
                self.ensure_space(40.0)?;
                self.y -= 8.0;
                self.lines(text, 12.0, true, HEADING_COLOR, 0.0)?;
                self.y -= 4.0;
            }
            Block::Paragraph(text) => {
                self.lines(text, 10.0, false, TEXT_COLOR, 0.0)?;
                self.y -= 4.0;
            }
            Block::Warning(text) => {
                self.lines(text, 10.0, true, WARNING_COLOR, 0.0)?;
                self.y -= 4.0;
            }
            Block::KeyValue(pairs) => self.key_values(pairs)?,
            Block::Table { header, rows } => self.table(header, rows)?,
            Block::Figures(figures) => self.figures(figures)?,
            Block::Spacer(points) => self.y -= *points,
        }
        Ok(())
    }

    fn finish(mut self, document: &ReportDocument) -> Result<Vec<u8>, ReportError> {
        self.finish_page()?;

        let kids: Vec<Object> = self.page_ids.iter().map(|id| (*id).into()).collect();
        let count = kids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![real(0.0), real(0.0), real(PAGE_WIDTH), real(PAGE_HEIGHT)],
        };
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        let created = format!("D:{}Z", document.created.format("%Y%m%d%H%M%S"));
        let info_id = self.doc.add_object(dictionary! {
            "Title" => Object::string_literal(encode_text(&document.title)),
            "Producer" => Object::string_literal("mri-report"),
            "CreationDate" => Object::string_literal(created),
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.trailer.set("Info", info_id);

        self.doc.compress();
        let mut bytes = Vec::new();
        self.doc.save_to(&mut bytes).map_err(pdf_err)?;
        Ok(bytes)
    }
}

/// Truncates `text` with an ellipsis so it fits in `width` points.
fn fit(text: &str, size: f32, width: f32) -> String {
    if text_width(text, size, false) <= width {
        return text.to_string();
    }
    let mut out = String::new();
    for c in text.chars() {
        let candidate = format!("{out}{c}...");
        if text_width(&candidate, size, false) > width {
            break;
        }
        out.push(c);
    }
    format!("{out}...")
}

pub fn render_pdf(document: &ReportDocument) -> Result<Vec<u8>, ReportError> {
    let mut writer = PdfWriter::new();
    writer.title(&document.title)?;
    for block in &document.blocks {
        writer.block(block)?;
    }
    let bytes = writer.finish(document)?;
    tracing::debug!("Rendered '{}' as {} byte PDF", document.title, bytes.len());
    Ok(bytes)
}

pub fn write_pdf(bytes: &[u8], path: &Path) -> Result<(), ReportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ReportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, bytes).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Renders the case report and writes it to `path`, or to
/// `{output_dir}/{stem}.pdf` when no path is given.
pub fn write_case_pdf(
    result: &AggregateResult,
    settings: &ReportSettings,
    path: Option<&Path>,
) -> Result<PathBuf, ReportError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => settings.output_dir.join(format!("{}.pdf", file_stem(result))),
    };
    let bytes = render_pdf(&case_document(result, settings))?;
    write_pdf(&bytes, &path)?;
    tracing::info!("Report written to {}", path.display());
    Ok(path)
}
