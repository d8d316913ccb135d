//! HTML worklog renderer

use std::fmt::Write;

use rust_decimal::Decimal;

use crate::document::RenderedDocument;
use crate::error::DocumentError;
use crate::job::{JobPayload, Language};
use crate::ports::DocumentRenderer;

pub const HTML_MIME: &str = "text/html";

struct Headings {
    title: &'static str,
    customer: &'static str,
    period: &'static str,
    date: &'static str,
    description: &'static str,
    user: &'static str,
    hours: &'static str,
    total: &'static str,
}

fn headings(language: Language) -> Headings {
    match language {
        Language::Sv => Headings {
            title: "Arbetslogg",
            customer: "Kund",
            period: "Period",
            date: "Datum",
            description: "Beskrivning",
            user: "Utförd av",
            hours: "Timmar",
            total: "Totalt",
        },
        Language::En => Headings {
            title: "Worklog",
            customer: "Customer",
            period: "Period",
            date: "Date",
            description: "Description",
            user: "Performed by",
            hours: "Hours",
            total: "Total",
        },
    }
}

/// Renders a job payload as a standalone HTML worklog
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlWorklogRenderer;

impl HtmlWorklogRenderer {
    pub fn new() -> Self {
        Self
    }

    fn render_html(&self, payload: &JobPayload) -> Result<String, std::fmt::Error> {
        let h = headings(payload.language);
        let lang = match payload.language {
            Language::Sv => "sv",
            Language::En => "en",
        };

        let mut out = String::new();
        writeln!(out, "<!DOCTYPE html>")?;
        writeln!(out, "<html lang=\"{}\"><head><meta charset=\"utf-8\">", lang)?;
        writeln!(out, "<title>{} {}</title>", h.title, escape(&payload.customer_name))?;
        writeln!(out, "</head><body>")?;
        writeln!(out, "<h1>{}</h1>", h.title)?;
        writeln!(out, "<p><strong>{}:</strong> {}</p>", h.customer, escape(&payload.customer_name))?;
        writeln!(
            out,
            "<p><strong>{}:</strong> {} – {}</p>",
            h.period, payload.period.start, payload.period.end
        )?;
        writeln!(out, "<table>")?;
        writeln!(
            out,
            "<thead><tr><th>{}</th><th>{}</th><th>{}</th><th>{}</th></tr></thead>",
            h.date, h.description, h.user, h.hours
        )?;
        writeln!(out, "<tbody>")?;
        for row in &payload.rows {
            writeln!(
                out,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                row.date,
                escape(&row.description),
                escape(row.user_name.as_deref().unwrap_or("")),
                format_hours(row.hours)
            )?;
        }
        writeln!(out, "</tbody>")?;
        writeln!(
            out,
            "<tfoot><tr><td colspan=\"3\">{}</td><td>{}</td></tr></tfoot>",
            h.total,
            format_hours(payload.total_hours())
        )?;
        writeln!(out, "</table>")?;
        write!(out, "</body></html>")?;
        Ok(out)
    }
}

impl DocumentRenderer for HtmlWorklogRenderer {
    fn render(&self, payload: &JobPayload) -> Result<RenderedDocument, DocumentError> {
        if payload.rows.is_empty() {
            return Err(DocumentError::render("worklog has no rows"));
        }
        let html = self
            .render_html(payload)
            .map_err(|e| DocumentError::render(e.to_string()))?;
        Ok(RenderedDocument::new(html.into_bytes(), HTML_MIME))
    }
}

fn format_hours(hours: Decimal) -> String {
    hours.round_dp(2).normalize().to_string()
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
