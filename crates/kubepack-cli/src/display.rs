//! Display formatting for CLI output
//!
//! Reports go to stdout; styling is dropped automatically when stdout is
//! not a terminal.

use clap::ValueEnum;
use console::style;
use serde::Serialize;

use kubepack_core::FeatureTable;
use kubepack_kube::{AuditReport, InstallReport, ScriptRefs, UninstallReport};

use crate::error::Result;

/// Machine-readable output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

/// Serialize `value` to stdout
pub fn emit<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    let out = match format {
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
        OutputFormat::Json => {
            let mut json = serde_json::to_string_pretty(value)?;
            json.push('\n');
            json
        }
    };
    print!("{out}");
    Ok(())
}

pub fn print_install_report(report: &InstallReport) {
    for release in &report.releases {
        let verb = if release.upgraded { "Upgraded" } else { "Installed" };
        println!(
            "{} {} {} (revision {}) in namespace {}",
            style("✓").green().bold(),
            verb,
            style(&release.release).cyan(),
            style(release.revision).yellow(),
            style(&release.namespace).yellow()
        );
        if let Some(url) = &release.application_url {
            println!("  {} {}", style("application:").dim(), url);
        }
    }
    print_warnings(&report.warnings);
}

pub fn print_uninstall_report(report: &UninstallReport) {
    for release in &report.releases {
        println!(
            "{} Uninstalled {} from namespace {} ({} revision(s))",
            style("✓").green().bold(),
            style(&release.release).cyan(),
            style(&release.namespace).yellow(),
            release.revisions
        );
        for kept in &release.kept {
            println!("  {} kept {}", style("→").blue(), kept);
        }
    }
    print_warnings(&report.warnings);
}

pub fn print_audit_report(report: &AuditReport) {
    for entry in &report.entries {
        let a = &entry.attributes;
        let mark = if entry.allowed {
            style("✓").green().bold()
        } else {
            style("✗").red().bold()
        };
        let resource = if a.group.is_empty() {
            a.resource.clone()
        } else {
            format!("{}.{}", a.resource, a.group)
        };
        let namespace = if a.namespace.is_empty() { "(cluster)" } else { a.namespace.as_str() };
        println!(
            "{} {} {} in {} ({} object(s))",
            mark,
            a.verb,
            style(resource).cyan(),
            style(namespace).yellow(),
            entry.items.len()
        );
        if !entry.allowed {
            for item in &entry.items {
                println!("    {}", style(item).dim());
            }
        }
    }
    print_warnings(&report.warnings);
    println!();
    if report.allowed {
        println!("{} All operations allowed", style("✓").green().bold());
    } else {
        println!(
            "{} {} of {} checks denied",
            style("✗").red().bold(),
            report.denied().count(),
            report.entries.len()
        );
    }
}

pub fn print_script_refs(refs: &ScriptRefs) {
    println!("{} {}", style("linux: ").bold(), refs.linux);
    println!("{} {}", style("darwin:").bold(), refs.darwin);
}

pub fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        println!("{} {}", style("⚠").yellow(), warning);
    }
}

/// Plain-text table, one column per bundle
pub fn format_feature_table(table: &FeatureTable) -> String {
    let mut widths: Vec<usize> = Vec::with_capacity(table.bundles.len() + 1);
    widths.push(
        table
            .rows
            .iter()
            .map(|r| r.trait_name.len())
            .chain(std::iter::once("FEATURE".len()))
            .max()
            .unwrap_or_default(),
    );
    for (i, bundle) in table.bundles.iter().enumerate() {
        let cells = table.rows.iter().map(|r| r.values.get(i).map_or(0, String::len));
        widths.push(cells.chain(std::iter::once(bundle.len())).max().unwrap_or_default());
    }

    let mut out = String::new();
    let mut line = |cells: Vec<&str>| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        out.push_str(padded.join("  ").trim_end());
        out.push('\n');
    };
    line(
        std::iter::once("FEATURE")
            .chain(table.bundles.iter().map(String::as_str))
            .collect(),
    );
    for row in &table.rows {
        line(
            std::iter::once(row.trait_name.as_str())
                .chain(row.values.iter().map(String::as_str))
                .collect(),
        );
    }
    out
}
