//! Render de los análisis a PDF con `lopdf`.
//!
//! A4 con márgenes fijos de 20 mm, fuentes estándar Helvetica y saltos de
//! página automáticos. El ajuste de línea usa un ancho medio por carácter, lo
//! bastante preciso para texto corrido.

use anyhow::Result;
use lopdf::{
    content::{Content, Operation},
    dictionary, Document, Object, Stream,
};

use crate::models::{AnalysisResult, ConsolidatedAnalysis, ReportFeedback};

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MM: f32 = 72.0 / 25.4;
const MARGIN: f32 = 20.0 * MM;
const LINE_HEIGHT: f32 = 7.0 * MM;
const FONT_SIZE_NORMAL: f32 = 12.0;
const FONT_SIZE_H2: f32 = 16.0;
const FONT_SIZE_TITLE: f32 = 18.0;
/// Ancho medio de un glifo de Helvetica en unidades de tamaño de fuente.
const AVG_GLYPH_WIDTH: f32 = 0.5;

#[derive(Clone, Copy)]
enum Font {
    Regular,
    Bold,
    Italic,
}

impl Font {
    fn resource(&self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
            Font::Italic => "F3",
        }
    }
}

struct PdfWriter {
    pages: Vec<Vec<Operation>>,
    current: Vec<Operation>,
    y: f32,
}

impl PdfWriter {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: Vec::new(),
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn break_if_needed(&mut self) {
        if self.y < MARGIN {
            self.pages.push(std::mem::take(&mut self.current));
            self.y = PAGE_HEIGHT - MARGIN;
        }
    }

    fn text(&mut self, text: &str, font: Font, size: f32) {
        let max_chars = ((PAGE_WIDTH - 2.0 * MARGIN) / (size * AVG_GLYPH_WIDTH)) as usize;
        for line in wrap(text, max_chars) {
            self.break_if_needed();
            self.current.extend([
                Operation::new("BT", vec![]),
                Operation::new(
                    "Tf",
                    vec![font.resource().into(), Object::Integer(size as i64)],
                ),
                Operation::new(
                    "Td",
                    vec![Object::Integer(MARGIN as i64), Object::Integer(self.y as i64)],
                ),
                Operation::new("Tj", vec![Object::string_literal(win_ansi(&line))]),
                Operation::new("ET", vec![]),
            ]);
            self.y -= LINE_HEIGHT;
        }
    }

    fn heading(&mut self, text: &str) {
        self.text(text, Font::Bold, FONT_SIZE_H2);
    }

    fn paragraph(&mut self, text: &str) {
        self.text(text, Font::Regular, FONT_SIZE_NORMAL);
    }

    fn bullets(&mut self, items: &[String]) {
        for item in items {
            self.paragraph(&format!("- {item}"));
        }
    }

    fn gap(&mut self) {
        self.y -= LINE_HEIGHT;
    }

    fn finish(mut self) -> Result<Vec<u8>> {
        if !self.current.is_empty() || self.pages.is_empty() {
            self.pages.push(std::mem::take(&mut self.current));
        }

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font = |doc: &mut Document, base: &str| {
            doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => base,
                "Encoding" => "WinAnsiEncoding",
            })
        };
        let regular = font(&mut doc, "Helvetica");
        let bold = font(&mut doc, "Helvetica-Bold");
        let italic = font(&mut doc, "Helvetica-Oblique");
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => regular,
                "F2" => bold,
                "F3" => italic,
            },
        });

        let mut kids = Vec::with_capacity(self.pages.len());
        for operations in self.pages {
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(PAGE_WIDTH as i64),
                    Object::Integer(PAGE_HEIGHT as i64),
                ],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer)?;
        Ok(buffer)
    }
}

/// Parte el texto en líneas de como mucho `max_chars` caracteres, cortando
/// por espacios salvo en palabras más largas que la línea.
fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let word_len = word.chars().count();
            let current_len = current.chars().count();
            if current_len > 0 && current_len + 1 + word_len > max_chars {
                lines.push(std::mem::take(&mut current));
            }
            if word_len > max_chars {
                let chars: Vec<char> = word.chars().collect();
                for chunk in chars.chunks(max_chars) {
                    if !current.is_empty() {
                        lines.push(std::mem::take(&mut current));
                    }
                    current = chunk.iter().collect();
                }
                continue;
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        lines.push(current);
    }
    lines
}

/// Las fuentes estándar usan WinAnsi; fuera de Latin-1 se sustituye por '?'.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{2013}' | '\u{2014}' => b'-',
            '\u{2018}' | '\u{2019}' => b'\'',
            '\u{201C}' | '\u{201D}' => b'"',
            c if (c as u32) <= 0xFF => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

pub fn analysis_pdf(
    result: &AnalysisResult,
    file_name: &str,
    feedback: Option<&ReportFeedback>,
) -> Result<Vec<u8>> {
    let mut w = PdfWriter::new();
    w.text(
        &format!("Análisis del Reporte: {file_name}"),
        Font::Bold,
        FONT_SIZE_TITLE,
    );
    w.text(
        &format!("Análisis Dirigido a: Departamento de {}", result.detected_role),
        Font::Italic,
        FONT_SIZE_NORMAL,
    );
    w.gap();

    w.heading("Resumen Ejecutivo");
    w.paragraph(&result.summary);
    w.gap();

    w.heading("Métricas Clave");
    if result.key_metrics.is_empty() {
        w.paragraph("No se encontraron métricas clave.");
    }
    for m in &result.key_metrics {
        let context = m
            .context
            .as_deref()
            .map(|c| format!(" ({c})"))
            .unwrap_or_default();
        w.paragraph(&format!("- {}: {}{context}", m.metric, m.value));
    }
    w.gap();

    w.heading("Recomendaciones");
    w.bullets(&result.recommendations);
    w.gap();

    w.heading("Logros Destacados");
    w.bullets(&result.achievements);

    if let Some(feedback) = feedback {
        w.gap();
        w.text("Evaluación de Calidad del Reporte", Font::Bold, FONT_SIZE_TITLE);
        w.heading(&format!(
            "Puntuación: {}/10",
            feedback.quality_evaluation.score
        ));
        w.paragraph(&feedback.quality_evaluation.summary);
        w.gap();
        w.heading("Análisis Detallado de Calidad");
        w.paragraph(&feedback.detailed_analysis);
        w.gap();
        w.heading("Aspectos a Mejorar");
        for item in &feedback.areas_for_improvement {
            w.paragraph(&format!("- {}: {}", item.point, item.explanation));
        }
        w.gap();
        w.heading("Sugerencias de Optimización");
        w.bullets(&feedback.optimization_suggestions);
    }

    w.finish()
}

pub fn consolidated_pdf(analysis: &ConsolidatedAnalysis) -> Result<Vec<u8>> {
    let mut w = PdfWriter::new();
    w.text("Análisis Ejecutivo Consolidado", Font::Bold, FONT_SIZE_TITLE);
    w.text(
        "Generado por IA basado en reportes departamentales.",
        Font::Italic,
        FONT_SIZE_NORMAL,
    );
    w.gap();
    w.heading("Resumen Estratégico General");
    w.paragraph(&analysis.strategic_summary);
    w.gap();
    w.heading("Insights Interdepartamentales");
    w.bullets(&analysis.cross_department_insights);
    w.gap();
    w.heading("Recomendaciones Estratégicas de Negocio");
    w.bullets(&analysis.business_recommendations);
    w.finish()
}
