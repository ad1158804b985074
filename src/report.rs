//! Rendering of finished reports into HTML, Markdown and PDF.

use chrono::{DateTime, Utc};
use printpdf::{BuiltinFont, Mm, PdfDocument};
use serde::Deserialize;
use serde_json::Value;
use tracing::error;

use crate::error::StoreError;
use crate::state_machine::{Job, Stage};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Section {
    pub heading: String,
    #[serde(default)]
    pub body: Value,
}

/// A completed report ready to render.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub id: String,
    pub address: String,
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub sections: Vec<Section>,
}

#[derive(Deserialize)]
struct ReportOutput {
    title: String,
    sections: Vec<Section>,
}

impl Report {
    /// Build the artifact for a COMPLETE job.
    pub fn from_job(job: &Job) -> Result<Self, StoreError> {
        if job.stage != Stage::Complete {
            return Err(StoreError::NotReady {
                id: job.id.clone(),
                stage: job.stage,
            });
        }
        let output = job
            .output(Stage::Generating)
            .cloned()
            .and_then(|v| serde_json::from_value::<ReportOutput>(v).ok())
            .ok_or_else(|| StoreError::Unrenderable(job.id.clone()))?;

        Ok(Self {
            id: job.id.clone(),
            address: job.input.clone(),
            title: output.title,
            generated_at: job.updated_at,
            sections: output.sections,
        })
    }

    pub fn file_stem(&self) -> String {
        let short: String = self.id.chars().take(8).collect();
        format!("Property_Valuation_{short}")
    }

    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "# {}\n\n**Address:** {}  \n**Generated:** {}\n",
            self.title,
            self.address,
            self.generated_at.format("%B %d, %Y")
        );
        for section in &self.sections {
            out.push_str(&format!("\n## {}\n\n{}\n", section.heading, body_text(&section.body)));
        }
        out
    }

    pub fn to_html(&self) -> String {
        let mut body = String::new();
        for section in &self.sections {
            body.push_str(&format!(
                "<section><h2>{}</h2><p>{}</p></section>\n",
                escape(&section.heading),
                escape(&body_text(&section.body)).replace('\n', "<br>")
            ));
        }
        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n\
             <title>{title}</title>\n</head>\n<body>\n<header><h1>{title}</h1>\n\
             <p class=\"address\">{address}</p>\n<p class=\"date\">BTR REPORT GENERATED {date}</p></header>\n\
             {body}</body>\n</html>\n",
            title = escape(&self.title),
            address = escape(&self.address),
            date = self.generated_at.format("%B %d, %Y").to_string().to_uppercase(),
        )
    }
}

// A4 portrait, in millimetres.
const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 15.0;
const BODY_TOP: f32 = PAGE_HEIGHT - 30.0;
const BODY_BOTTOM: f32 = 25.0;
// Characters per line for 10pt Helvetica across the text width.
const BODY_WRAP: usize = 95;

#[derive(Debug, Clone, PartialEq)]
struct PdfLine {
    text: String,
    size: f32,
    bold: bool,
}

impl PdfLine {
    fn new(text: impl Into<String>, size: f32, bold: bool) -> Self {
        Self {
            text: text.into(),
            size,
            bold,
        }
    }

    fn gap() -> Self {
        Self::new("", 6.0, false)
    }

    // Leading of half the point size in millimetres, so 10pt body text sits on 5mm lines.
    fn height(&self) -> f32 {
        self.size * 0.5
    }
}

impl Report {
    /// Render as an A4 PDF with a dated header and page-numbered footer on every page.
    pub fn to_pdf(&self) -> Result<Vec<u8>, StoreError> {
        let unrenderable = |e: printpdf::Error| {
            error!(report_id = %self.id, error = ?e, "PDF rendering failed");
            StoreError::Unrenderable(self.id.clone())
        };

        let pages = paginate(self.pdf_lines());
        let header = format!(
            "BTR REPORT GENERATED {}",
            self.generated_at.format("%B %d, %Y").to_string().to_uppercase()
        );

        let (doc, first_page, first_layer) =
            PdfDocument::new(self.title.as_str(), Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(unrenderable)?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(unrenderable)?;
        let italic = doc
            .add_builtin_font(BuiltinFont::HelveticaOblique)
            .map_err(unrenderable)?;

        let total = pages.len();
        for (index, lines) in pages.iter().enumerate() {
            let (page, layer) = if index == 0 {
                (first_page, first_layer)
            } else {
                doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1")
            };
            let layer = doc.get_page(page).get_layer(layer);

            layer.use_text(header.as_str(), 12.0, Mm(MARGIN), Mm(PAGE_HEIGHT - 15.0), &bold);
            let mut y = BODY_TOP;
            for line in lines {
                y -= line.height();
                if !line.text.is_empty() {
                    let font = if line.bold { &bold } else { &regular };
                    layer.use_text(line.text.as_str(), line.size, Mm(MARGIN), Mm(y), font);
                }
            }
            layer.use_text(
                format!("Page {}/{total}", index + 1),
                8.0,
                Mm(PAGE_WIDTH / 2.0 - 8.0),
                Mm(10.0),
                &italic,
            );
        }

        doc.save_to_bytes().map_err(unrenderable)
    }

    fn pdf_lines(&self) -> Vec<PdfLine> {
        let mut lines = Vec::new();
        for text in wrap(&self.title, 55) {
            lines.push(PdfLine::new(text, 16.0, true));
        }
        for text in wrap(&self.address, 80) {
            lines.push(PdfLine::new(text, 12.0, false));
        }
        for section in &self.sections {
            lines.push(PdfLine::gap());
            for text in wrap(&section.heading.to_uppercase(), 65) {
                lines.push(PdfLine::new(text, 14.0, true));
            }
            for text in wrap(&body_text(&section.body), BODY_WRAP) {
                lines.push(PdfLine::new(text, 10.0, false));
            }
        }
        lines
    }
}

fn paginate(lines: Vec<PdfLine>) -> Vec<Vec<PdfLine>> {
    let mut pages = vec![Vec::new()];
    let mut y = BODY_TOP;
    for line in lines {
        if y - line.height() < BODY_BOTTOM {
            pages.push(Vec::new());
            y = BODY_TOP;
        }
        y -= line.height();
        if let Some(page) = pages.last_mut() {
            page.push(line);
        }
    }
    pages
}

/// Greedy word wrap. Paragraph breaks are kept; words longer than `width` are split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut out = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > width {
                if !line.is_empty() {
                    out.push(std::mem::take(&mut line));
                }
                let rest = word.split_off(width);
                out.push(word.into_iter().collect());
                word = rest;
            }
            let needed = if line.is_empty() { 0 } else { line.chars().count() + 1 };
            if needed + word.len() > width {
                out.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.extend(word);
        }
        out.push(line);
    }
    out
}

// Sections may carry prose or structured data; structured bodies render as pretty JSON.
fn body_text(body: &Value) -> String {
    match body {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
