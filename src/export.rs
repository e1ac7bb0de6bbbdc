//! Exportación a Markdown de los análisis individuales y del consolidado.

use chrono::{NaiveDate, Utc};

use crate::models::{AnalysisResult, ConsolidatedAnalysis, ReportFeedback};

const METRIC_TABLE_HEADER: &str = "| Métrica | Valor | Contexto |";

pub fn analysis_markdown(
    result: &AnalysisResult,
    file_name: &str,
    feedback: Option<&ReportFeedback>,
) -> String {
    let mut md = format!("# Análisis del Reporte: {file_name}\n\n");
    md.push_str(&format!(
        "> **Análisis Dirigido a:** Departamento de {}\n\n",
        result.detected_role
    ));

    md.push_str("## Resumen Ejecutivo\n");
    md.push_str(&format!("{}\n\n", result.summary));

    md.push_str("## Métricas Clave\n");
    if result.key_metrics.is_empty() {
        md.push_str("No se encontraron métricas clave.\n");
    } else {
        md.push_str(METRIC_TABLE_HEADER);
        md.push_str("\n|---|---|---|\n");
        for m in &result.key_metrics {
            md.push_str(&format!(
                "| {} | {} | {} |\n",
                escape_cell(&m.metric),
                escape_cell(&m.value),
                escape_cell(m.context.as_deref().unwrap_or_default())
            ));
        }
    }
    md.push('\n');

    push_bullets(&mut md, "Recomendaciones", &result.recommendations);
    push_bullets(&mut md, "Logros Destacados", &result.achievements);

    if let Some(feedback) = feedback {
        md.push_str("\n---\n\n# Evaluación de Calidad del Reporte\n\n");
        md.push_str("## Evaluación General\n");
        md.push_str(&format!(
            "**Puntuación: {}/10**\n\n{}\n\n",
            feedback.quality_evaluation.score, feedback.quality_evaluation.summary
        ));
        md.push_str("## Análisis Detallado de Calidad\n");
        md.push_str(&format!("{}\n\n", feedback.detailed_analysis));
        md.push_str("## Aspectos a Mejorar\n");
        for item in &feedback.areas_for_improvement {
            md.push_str(&format!("* **{}:** {}\n", item.point, item.explanation));
        }
        md.push('\n');
        push_bullets(&mut md, "Sugerencias de Optimización", &feedback.optimization_suggestions);
    }

    md
}

pub fn consolidated_markdown(analysis: &ConsolidatedAnalysis) -> String {
    let mut md = String::from("# Análisis Ejecutivo Consolidado\n\n");
    md.push_str("> Generado por IA basado en reportes departamentales.\n\n");
    md.push_str("## Resumen Estratégico General\n");
    md.push_str(&format!("{}\n\n", analysis.strategic_summary));
    push_bullets(&mut md, "Insights Interdepartamentales", &analysis.cross_department_insights);
    push_bullets(
        &mut md,
        "Recomendaciones Estratégicas de Negocio",
        &analysis.business_recommendations,
    );
    md
}

fn push_bullets(md: &mut String, title: &str, items: &[String]) {
    md.push_str(&format!("## {title}\n"));
    for item in items {
        md.push_str(&format!("* {item}\n"));
    }
    md.push('\n');
}

/// Celda de tabla Markdown: `|` escapado y saltos de línea como `<br>`.
fn escape_cell(value: &str) -> String {
    value
        .replace('|', "\\|")
        .replace("\r\n", "<br>")
        .replace('\n', "<br>")
}

/// Nombre del fichero original sin la última extensión.
fn file_stem(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    }
}

pub fn analysis_download_name(file_name: &str, extension: &str) -> String {
    format!("Analisis-{}.{extension}", file_stem(file_name))
}

pub fn consolidated_download_name(date: NaiveDate, extension: &str) -> String {
    format!("Analisis-Consolidado-{}.{extension}", date.format("%Y-%m-%d"))
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
