//! Report emitter: one rich (HTML) and one plain (Markdown) artifact per
//! user per run.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use pulldown_cmark::{html, Options, Parser};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

const BUILTIN_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Calendar Summary for {user_name}</title>
</head>
<body>
<h1>Calendar Summary for {user_name}</h1>
<p><strong>Report Date:</strong> {report_date}</p>
<hr/>
{summary_content}
</body>
</html>
"#;

const REPORT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";
const STEM_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Rich,
    Plain,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Rich => "html",
            ReportFormat::Plain => "md",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Rich => f.write_str("rich"),
            ReportFormat::Plain => f.write_str("plain"),
        }
    }
}

/// A written report file. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifact {
    pub format: ReportFormat,
    pub path: PathBuf,
    pub rendered_content: String,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to write {format} report to {}: {source}", .path.display())]
pub struct ReportWriteError {
    pub format: ReportFormat,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Outcome of one emission. Each format succeeds or fails on its own.
#[derive(Debug)]
pub struct EmittedReport {
    pub rendered_rich: String,
    pub rich: Option<ReportArtifact>,
    pub plain: Option<ReportArtifact>,
    pub failures: Vec<ReportWriteError>,
}

impl EmittedReport {
    pub fn paths(&self) -> Vec<PathBuf> {
        self.rich
            .iter()
            .chain(self.plain.iter())
            .map(|artifact| artifact.path.clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ReportEmitter {
    output_dir: PathBuf,
    template_path: Option<PathBuf>,
}

impl ReportEmitter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            template_path: None,
        }
    }

    pub fn with_template(mut self, template_path: impl Into<PathBuf>) -> Self {
        self.template_path = Some(template_path.into());
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub async fn emit(&self, user_name: &str, summary_text: &str) -> EmittedReport {
        self.emit_at(user_name, summary_text, Local::now().naive_local())
            .await
    }

    pub async fn emit_at(
        &self,
        user_name: &str,
        summary_text: &str,
        at: NaiveDateTime,
    ) -> EmittedReport {
        let report_date = at.format(REPORT_DATE_FORMAT).to_string();
        let template = self.load_template().await;
        let rendered_rich = render_rich(&template, user_name, &report_date, summary_text);
        let plain = render_plain(user_name, &report_date, summary_text);

        let mut report = EmittedReport {
            rendered_rich: rendered_rich.clone(),
            rich: None,
            plain: None,
            failures: Vec::new(),
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.output_dir).await {
            error!(
                "Cannot create report directory {}: {}",
                self.output_dir.display(),
                e
            );
            for format in [ReportFormat::Rich, ReportFormat::Plain] {
                report.failures.push(ReportWriteError {
                    format,
                    path: self.output_dir.clone(),
                    source: io::Error::new(e.kind(), e.to_string()),
                });
            }
            return report;
        }

        let base = format!(
            "{}_summary_{}",
            user_name.replace(' ', "_"),
            at.format(STEM_TIMESTAMP_FORMAT)
        );
        let stem = self.free_stem(&base).await;

        for (format, content) in [(ReportFormat::Rich, rendered_rich), (ReportFormat::Plain, plain)] {
            let path = self
                .output_dir
                .join(format!("{}.{}", stem, format.extension()));
            match write_new(&path, &content).await {
                Ok(()) => {
                    info!(user = user_name, "{} report written to {}", format, path.display());
                    let artifact = ReportArtifact {
                        format,
                        path,
                        rendered_content: content,
                    };
                    match format {
                        ReportFormat::Rich => report.rich = Some(artifact),
                        ReportFormat::Plain => report.plain = Some(artifact),
                    }
                }
                Err(source) => {
                    let failure = ReportWriteError {
                        format,
                        path,
                        source,
                    };
                    error!(user = user_name, "{}", failure);
                    report.failures.push(failure);
                }
            }
        }

        report
    }

    async fn load_template(&self) -> String {
        let Some(path) = &self.template_path else {
            return BUILTIN_TEMPLATE.to_string();
        };
        match tokio::fs::read_to_string(path).await {
            Ok(template) => template,
            Err(e) => {
                warn!(
                    "Template {} unavailable ({}), using built-in template",
                    path.display(),
                    e
                );
                BUILTIN_TEMPLATE.to_string()
            }
        }
    }

    /// First stem for which neither the rich nor the plain file exists.
    async fn free_stem(&self, base: &str) -> String {
        let mut stem = base.to_string();
        let mut suffix = 0u32;
        loop {
            let taken = [ReportFormat::Rich, ReportFormat::Plain]
                .into_iter()
                .map(|format| self.output_dir.join(format!("{}.{}", stem, format.extension())));
            let mut any_taken = false;
            for path in taken {
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    any_taken = true;
                    break;
                }
            }
            if !any_taken {
                return stem;
            }
            suffix += 1;
            debug!("Report stem {} taken, trying suffix {}", stem, suffix);
            stem = format!("{}_{}", base, suffix);
        }
    }
}

async fn write_new(path: &Path, content: &str) -> io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await
}

/// Delete and recreate `dir`. A missing directory is not an error.
pub async fn clear_output_dir(dir: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Removed report directory {}", dir.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::create_dir_all(dir).await
}

/// CommonMark with tables and strikethrough to an HTML fragment.
pub fn render_markdown(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(text, options);
    let mut out = String::with_capacity(text.len() * 2);
    html::push_html(&mut out, parser);
    out
}

pub fn render_rich(template: &str, user_name: &str, report_date: &str, summary_text: &str) -> String {
    let body = render_markdown(summary_text);
    let user = escape_html(user_name);
    fill_template(template, |name| match name {
        "user_name" => Some(user.as_str()),
        "report_date" => Some(report_date),
        "summary_content" => Some(body.as_str()),
        _ => None,
    })
}

pub fn render_plain(user_name: &str, report_date: &str, summary_text: &str) -> String {
    format!(
        "# Calendar Summary for {}\n\n**Report Date:** {}\n\n## Summary\n\n{}",
        user_name, report_date, summary_text
    )
}

/// Single pass over `template`; substituted values are never rescanned and
/// unknown `{...}` groups (CSS blocks, for one) are left alone.
fn fill_template<'a, F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<&'a str>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replacement = after
            .find('}')
            .and_then(|close| lookup(&after[..close]).map(|value| (value, close)));
        match replacement {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
